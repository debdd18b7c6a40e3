// 该文件是 Kanjian （看见） 项目的一部分。
// src/output.rs - 输出定义
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

use thiserror::Error;

use crate::label::{LabelError, LabelTable};
use crate::model::{DetectionBatch, Signature};

mod console;
pub use self::console::ConsoleReport;

mod json_lines;
pub use self::json_lines::JsonLinesReport;

pub trait Render<Output> {
  type Error;

  /// 模型加载后调用一次，默认不输出
  fn render_signature(&mut self, _signature: &Signature) -> Result<(), Self::Error> {
    Ok(())
  }

  fn render_result(&mut self, source: &str, result: &Output) -> Result<(), Self::Error>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
  /// 每张图片一个文本块
  #[default]
  Text,
  /// 每张图片一行 JSON
  Json,
}

#[derive(Error, Debug)]
pub enum OutputError {
  #[error("写入输出失败: {0}")]
  Io(#[from] std::io::Error),
  #[error("类别标签错误: {0}")]
  Label(#[from] LabelError),
  #[error("JSON 序列化失败: {0}")]
  Json(#[from] serde_json::Error),
}

/// 阈值过滤后按模型顺序解析标签；任一类别无效即返回错误
fn resolve_labels<'a>(
  labels: &'a LabelTable,
  result: &DetectionBatch,
  threshold: f32,
) -> Result<Vec<(&'a str, crate::model::Slot)>, LabelError> {
  result
    .above(threshold)
    .map(|slot| labels.get(slot.class).map(|label| (label, slot)))
    .collect()
}

pub enum OutputWrapper<W: Write> {
  Console(ConsoleReport<W>),
  JsonLines(JsonLinesReport<W>),
}

impl<W: Write> OutputWrapper<W> {
  pub fn new(format: OutputFormat, out: W, labels: LabelTable, threshold: f32) -> Self {
    match format {
      OutputFormat::Text => OutputWrapper::Console(ConsoleReport::new(out, labels, threshold)),
      OutputFormat::Json => OutputWrapper::JsonLines(JsonLinesReport::new(out, labels, threshold)),
    }
  }
}

impl<W: Write> Render<DetectionBatch> for OutputWrapper<W> {
  type Error = OutputError;

  fn render_signature(&mut self, signature: &Signature) -> Result<(), Self::Error> {
    match self {
      OutputWrapper::Console(output) => output.render_signature(signature),
      OutputWrapper::JsonLines(output) => output.render_signature(signature),
    }
  }

  fn render_result(&mut self, source: &str, result: &DetectionBatch) -> Result<(), Self::Error> {
    match self {
      OutputWrapper::Console(output) => output.render_result(source, result),
      OutputWrapper::JsonLines(output) => output.render_result(source, result),
    }
  }
}
