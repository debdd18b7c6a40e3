// 该文件是 Kanjian （看见） 项目的一部分。
// src/task.rs - 推理任务
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

use anyhow::Context;
use tracing::{error, info};

use crate::{frame::RgbNhwcFrame, input::LoadedImage, model::Model, output::Render};

pub trait Task<I, M, O>: Sized {
  type Output;
  type Error;
  fn run_task(self, input: I, model: M, output: O) -> Result<Self::Output, Self::Error>;
}

/// 批处理结果统计
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchSummary {
  pub processed: usize,
  pub failed: usize,
}

/// 依次处理每张图片：解码、推理、输出
///
/// 默认遇到第一个错误即终止；`keep_going` 时记录错误并继续处理后续图片。
#[derive(Debug, Default)]
pub struct BatchTask {
  keep_going: bool,
}

impl BatchTask {
  pub fn with_keep_going(mut self, keep_going: bool) -> Self {
    self.keep_going = keep_going;
    self
  }
}

fn process_one<D, ME, RE, IE, M, O>(
  item: Result<LoadedImage, IE>,
  model: &mut M,
  output: &mut O,
) -> anyhow::Result<()>
where
  ME: std::error::Error + Sync + Send + 'static,
  RE: std::error::Error + Sync + Send + 'static,
  IE: std::error::Error + Sync + Send + 'static,
  M: Model<Input = RgbNhwcFrame, Output = D, Error = ME>,
  O: Render<D, Error = RE>,
{
  let LoadedImage { path, frame } = item?;
  info!("图片 {} 读取成功 ({}x{})，开始推理...", path, frame.width(), frame.height());

  let now = std::time::Instant::now();
  let result = model
    .infer(frame)
    .with_context(|| format!("图片 {} 推理失败", path))?;
  info!("推理完成，耗时: {:.2?}", now.elapsed());

  output
    .render_result(&path, &result)
    .with_context(|| format!("图片 {} 结果输出失败", path))?;
  Ok(())
}

impl<D, ME, RE, IE, I, M, O> Task<I, M, O> for BatchTask
where
  ME: std::error::Error + Sync + Send + 'static,
  RE: std::error::Error + Sync + Send + 'static,
  IE: std::error::Error + Sync + Send + 'static,
  I: Iterator<Item = Result<LoadedImage, IE>>,
  M: Model<Input = RgbNhwcFrame, Output = D, Error = ME>,
  O: Render<D, Error = RE>,
{
  type Output = BatchSummary;
  type Error = anyhow::Error;

  fn run_task(self, input: I, mut model: M, mut output: O) -> Result<Self::Output, Self::Error> {
    info!("开始任务...");
    let mut summary = BatchSummary::default();

    for item in input {
      match process_one(item, &mut model, &mut output) {
        Ok(()) => summary.processed += 1,
        Err(e) if self.keep_going => {
          error!("{:#}", e);
          summary.failed += 1;
        }
        Err(e) => return Err(e),
      }
    }

    info!(
      "任务完成，成功 {} 张，失败 {} 张",
      summary.processed, summary.failed
    );
    Ok(summary)
  }
}
