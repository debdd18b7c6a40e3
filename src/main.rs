// 该文件是 Kanjian （看见） 项目的一部分。
// src/main.rs - 项目主程序
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

mod args;

use anyhow::{Context, Result, bail};
use tracing::{info, warn};

use kanjian::{
  input::ImageFileInput,
  label::LabelTable,
  model::{Detector, ModelBuilder, ModelRuntime},
  output::{OutputWrapper, Render},
  task::{BatchTask, Task},
};

fn main() -> Result<()> {
  let args = args::Args::parse_or_exit();

  tracing_subscriber::fmt()
    .with_writer(std::io::stderr)
    .with_max_level(args.log_level())
    .init();

  info!("模型路径: {}", args.model);
  info!("标签文件: {}", args.label_map.display());
  info!("图片数量: {}", args.images.len());
  info!("置信度阈值: {}", args.threshold);

  let labels = if args.placeholder_labels {
    warn!("忽略标签文件 {}，使用内置占位标签", args.label_map.display());
    LabelTable::placeholder()
  } else {
    LabelTable::load(&args.label_map)?
  };

  let model = ModelBuilder::parse(&args.model)?
    .tag(&args.tag)
    .build()
    .with_context(|| format!("无法加载模型 {}", args.model))?;
  let signature = model.signature(&args.signature)?;

  let stdout = std::io::stdout().lock();
  let mut output = OutputWrapper::new(args.format, stdout, labels, args.threshold);
  output.render_signature(&signature)?;

  let detector = Detector::new(model, args.detection_config());
  let input = ImageFileInput::new(args.images.iter().cloned(), args.decode_options());

  let summary = BatchTask::default()
    .with_keep_going(args.keep_going)
    .run_task(input, detector, output)?;

  if summary.failed > 0 {
    bail!("{} 张图片处理失败", summary.failed);
  }
  Ok(())
}
