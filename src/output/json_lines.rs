// 该文件是 Kanjian （看见） 项目的一部分。
// src/output/json_lines.rs - JSON Lines 报告输出
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

use std::io::Write;

use serde_json::json;

use crate::label::LabelTable;
use crate::model::DetectionBatch;
use crate::output::{OutputError, Render, resolve_labels};

/// 每张图片一行 JSON，签名不输出
pub struct JsonLinesReport<W: Write> {
  out: W,
  labels: LabelTable,
  threshold: f32,
}

impl<W: Write> JsonLinesReport<W> {
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

impl<W: Write> Render<DetectionBatch> for JsonLinesReport<W> {
  type Error = OutputError;

  fn render_result(&mut self, source: &str, result: &DetectionBatch) -> Result<(), Self::Error> {
    let detections: Vec<serde_json::Value> = resolve_labels(&self.labels, result, self.threshold)?
      .into_iter()
      .map(|(label, slot)| {
        json!({
          "label": label,
          "class_id": slot.class.trunc() as usize,
          "score": slot.score,
          "box": slot.bbox,
        })
      })
      .collect();

    let line = serde_json::to_string(&json!({
      "image": source,
      "detections": detections,
    }))?;
    writeln!(self.out, "{}", line)?;
    self.out.flush()?;
    Ok(())
  }
}
