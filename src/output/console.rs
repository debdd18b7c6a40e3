// 该文件是 Kanjian （看见） 项目的一部分。
// src/output/console.rs - 文本报告输出
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use std::fmt::Write as _;
use std::io::Write;

use tracing::debug;

use crate::label::LabelTable;
use crate::model::{DetectionBatch, Signature, TensorSpec};
use crate::output::{OutputError, Render, resolve_labels};

const NOTHING_FOUND: &str = "No objects detected with a high enough score.";
const SIGNATURE_RULE: &str = "-----------------------------------------------";

/// 每张图片输出 `* 文件名`，随后是达到阈值的检测行
pub struct ConsoleReport<W: Write> {
  out: W,
  labels: LabelTable,
  threshold: f32,
}

impl<W: Write> ConsoleReport<W> {
  pub fn new(out: W, labels: LabelTable, threshold: f32) -> Self {
    Self {
      out,
      labels,
      threshold,
    }
  }

  pub fn into_inner(self) -> W {
    self.out
  }
}

fn write_specs(block: &mut String, specs: &[TensorSpec]) {
  for (i, spec) in specs.iter().enumerate() {
    let _ = writeln!(
      block,
      "{} of {}: {:<20} (Node name in graph: {:<20}, type: {})",
      i + 1,
      specs.len(),
      spec.name,
      spec.node_name,
      spec.dtype
    );
  }
}

impl<W: Write> Render<DetectionBatch> for ConsoleReport<W> {
  type Error = OutputError;

  fn render_signature(&mut self, signature: &Signature) -> Result<(), Self::Error> {
    let mut block = String::from("MODEL SIGNATURE\nInputs:\n");
    write_specs(&mut block, &signature.inputs);
    block.push_str("Outputs:\n");
    write_specs(&mut block, &signature.outputs);
    block.push_str(SIGNATURE_RULE);
    block.push('\n');

    self.out.write_all(block.as_bytes())?;
    self.out.flush()?;
    Ok(())
  }

  fn render_result(&mut self, source: &str, result: &DetectionBatch) -> Result<(), Self::Error> {
    // 先解析全部标签，出错时不输出半个结果块
    let found = resolve_labels(&self.labels, result, self.threshold)?;
    debug!("{}: {} 个槽位中 {} 个达到阈值", source, result.len(), found.len());

    let mut block = String::new();
    let _ = writeln!(block, "* {}", source);
    if found.is_empty() {
      let _ = writeln!(block, "{}", NOTHING_FOUND);
    }
    for (label, slot) in found {
      let _ = writeln!(block, "\tFound {:<20} (score: {:.4})", label, slot.score);
    }

    self.out.write_all(block.as_bytes())?;
    self.out.flush()?;
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::label::LabelError;
  use crate::model::ElementType;

  fn batch(scores: Vec<f32>, classes: Vec<f32>) -> DetectionBatch {
    let boxes = vec![[0.0; 4]; scores.len()];
    DetectionBatch::new(scores, classes, boxes).unwrap()
  }

  fn report() -> ConsoleReport<Vec<u8>> {
    ConsoleReport::new(
      Vec::new(),
      LabelTable::new(["daisy", "dandelion", "roses"]),
      0.5,
    )
  }

  fn text(report: ConsoleReport<Vec<u8>>) -> String {
    String::from_utf8(report.into_inner()).unwrap()
  }

  #[test]
  fn prints_slots_at_or_above_threshold_in_model_order() {
    let mut report = report();
    report
      .render_result("flowers.jpg", &batch(vec![0.9, 0.3, 0.5], vec![1.0, 0.0, 2.0]))
      .unwrap();
    assert_eq!(
      text(report),
      "* flowers.jpg\n\tFound dandelion            (score: 0.9000)\n\tFound roses                (score: 0.5000)\n"
    );
  }

  #[test]
  fn nothing_above_threshold() {
    let mut report = report();
    report
      .render_result("empty.png", &batch(vec![0.1, 0.49], vec![0.0, 1.0]))
      .unwrap();
    assert_eq!(
      text(report),
      "* empty.png\nNo objects detected with a high enough score.\n"
    );
  }

  #[test]
  fn long_labels_are_not_truncated() {
    let mut report = ConsoleReport::new(
      Vec::new(),
      LabelTable::new(["a label longer than twenty"]),
      0.5,
    );
    report
      .render_result("x.png", &batch(vec![0.75], vec![0.0]))
      .unwrap();
    assert_eq!(
      text(report),
      "* x.png\n\tFound a label longer than twenty (score: 0.7500)\n"
    );
  }

  #[test]
  fn class_out_of_range_writes_nothing() {
    let mut report = report();
    let err = report
      .render_result("bad.jpg", &batch(vec![0.9, 0.8], vec![1.0, 7.0]))
      .unwrap_err();
    assert!(matches!(
      err,
      OutputError::Label(LabelError::ClassOutOfRange { len: 3, .. })
    ));
    assert!(text(report).is_empty());
  }

  #[test]
  fn class_below_threshold_is_not_resolved() {
    let mut report = report();
    report
      .render_result("ok.jpg", &batch(vec![0.9, 0.1], vec![0.0, 42.0]))
      .unwrap();
    assert_eq!(
      text(report),
      "* ok.jpg\n\tFound daisy                (score: 0.9000)\n"
    );
  }

  #[test]
  fn signature_banner() {
    let spec = |name: &str, node: &str, dtype| TensorSpec {
      name: name.to_string(),
      node_name: node.to_string(),
      dtype,
    };
    let signature = Signature {
      name: "serving_default".to_string(),
      inputs: vec![spec("inputs", "image_tensor:0", ElementType::UInt8)],
      outputs: vec![
        spec("detection_boxes", "detection_boxes:0", ElementType::Float),
        spec("detection_scores", "detection_scores:0", ElementType::Float),
      ],
    };

    let mut report = report();
    report.render_signature(&signature).unwrap();
    let expected = [
      "MODEL SIGNATURE",
      "Inputs:",
      "1 of 1: inputs               (Node name in graph: image_tensor:0      , type: DT_UINT8)",
      "Outputs:",
      "1 of 2: detection_boxes      (Node name in graph: detection_boxes:0   , type: DT_FLOAT)",
      "2 of 2: detection_scores     (Node name in graph: detection_scores:0  , type: DT_FLOAT)",
      "-----------------------------------------------",
      "",
    ]
    .join("\n");
    assert_eq!(text(report), expected);
  }
}
