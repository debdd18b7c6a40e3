// 该文件是 Kanjian （看见） 项目的一部分。
// src/args.rs - 项目参数配置
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

use std::path::PathBuf;

use clap::{Parser, error::ErrorKind};
use tracing::level_filters::LevelFilter;

use kanjian::{
  frame::ChannelOrder,
  input::DecodeOptions,
  model::{DEFAULT_SIGNATURE, DEFAULT_TAG, DetectionConfig},
  output::OutputFormat,
};

const USAGE: &str = "\
USAGE: <model> <label_map> <image> [<image>] [<image>]

Where
<model> is the path to the SavedModel directory of the model to use.
        For example, the saved_model directory in tarballs from
        https://github.com/tensorflow/models/blob/master/research/object_detection/g3doc/detection_model_zoo.md)

<label_map> is the path to a file containing information about the labels detected by the model.
            For example, one of the .pbtxt files from
            https://github.com/tensorflow/models/tree/master/research/object_detection/data

<image> is the path to an image file.
        Sample images can be found from the COCO, Kitti, or Open Images dataset.
        See: https://github.com/tensorflow/models/blob/master/research/object_detection/g3doc/detection_model_zoo.md
";

/// Kanjian 目标检测命令行参数
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 模型目录、.onnx 文件，或带后端方案的地址（onnx:// 或 savedmodel://）
  #[arg(value_name = "MODEL")]
  pub model: String,

  /// 标签映射文件（.pbtxt、.json 或每行一个标签的文本）
  #[arg(value_name = "LABEL_MAP")]
  pub label_map: PathBuf,

  /// 待检测的图片文件
  #[arg(value_name = "IMAGE", required = true, num_args = 1..)]
  pub images: Vec<String>,

  /// 置信度阈值 (0.0 - 1.0)，分数不低于阈值的槽位会被输出
  #[arg(long, default_value = "0.5", value_name = "THRESHOLD", value_parser = parse_threshold)]
  pub threshold: f32,

  /// 加载模型时使用的标签
  #[arg(long, default_value = DEFAULT_TAG)]
  pub tag: String,

  /// 输出的模型签名
  #[arg(long, default_value = DEFAULT_SIGNATURE)]
  pub signature: String,

  /// 图像输入张量名称
  #[arg(long, default_value = "image_tensor")]
  pub input_name: String,

  /// 分数输出张量名称
  #[arg(long, default_value = "detection_scores")]
  pub scores_name: String,

  /// 类别输出张量名称
  #[arg(long, default_value = "detection_classes")]
  pub classes_name: String,

  /// 检测框输出张量名称
  #[arg(long, default_value = "detection_boxes")]
  pub boxes_name: String,

  /// 模型期望的输入通道顺序 (rgb 或 bgr)
  #[arg(long, default_value = "rgb", value_name = "ORDER")]
  pub channel_order: ChannelOrder,

  /// 将非 8 位三通道的图片转换为 RGB，而不是报错
  #[arg(long)]
  pub convert_color: bool,

  /// 忽略标签文件，使用内置的五个花卉标签
  #[arg(long)]
  pub placeholder_labels: bool,

  /// 单张图片失败时继续处理其余图片
  #[arg(long)]
  pub keep_going: bool,

  /// 结果输出格式
  #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
  pub format: OutputFormat,

  /// 日志详细程度，可重复 (-v, -vv, -vvv)
  #[arg(short, long, action = clap::ArgAction::Count)]
  pub verbose: u8,
}

fn parse_threshold(value: &str) -> Result<f32, String> {
  let threshold: f32 = value
    .parse()
    .map_err(|_| format!("'{}' 不是有效的数字", value))?;
  if (0.0..=1.0).contains(&threshold) {
    Ok(threshold)
  } else {
    Err(format!("阈值 {} 超出范围 0.0 - 1.0", threshold))
  }
}

impl Args {
  /// 解析命令行；参数不足时输出用法说明并以状态 1 退出
  pub fn parse_or_exit() -> Self {
    match Self::try_parse() {
      Ok(args) => args,
      Err(e) => usage_exit(e),
    }
  }

  pub fn detection_config(&self) -> DetectionConfig {
    DetectionConfig {
      input_name: self.input_name.clone(),
      scores_name: self.scores_name.clone(),
      classes_name: self.classes_name.clone(),
      boxes_name: self.boxes_name.clone(),
      channel_order: self.channel_order,
    }
  }

  pub fn decode_options(&self) -> DecodeOptions {
    DecodeOptions {
      convert_color: self.convert_color,
    }
  }

  pub fn log_level(&self) -> LevelFilter {
    match self.verbose {
      0 => LevelFilter::WARN,
      1 => LevelFilter::INFO,
      2 => LevelFilter::DEBUG,
      _ => LevelFilter::TRACE,
    }
  }
}

fn usage_exit(e: clap::Error) -> ! {
  match e.kind() {
    ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => e.exit(),
    ErrorKind::MissingRequiredArgument => eprint!("{}", USAGE),
    _ => {
      let _ = e.print();
    }
  }
  std::process::exit(1)
}
