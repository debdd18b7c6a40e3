// 该文件是 Kanjian （看见） 项目的一部分。
// src/model/detection.rs - 目标检测推理
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

use thiserror::Error;
use tracing::debug;

use crate::{
  frame::{ChannelOrder, RgbNhwcFrame},
  model::{ElementType, Model, ModelRuntime, OutputTensor},
};

const BOX_COORDS: usize = 4;

#[derive(Debug, Clone, PartialEq)]
pub struct DetectionConfig {
  pub input_name: String,
  pub scores_name: String,
  pub classes_name: String,
  pub boxes_name: String,
  /// 模型期望的输入通道顺序
  pub channel_order: ChannelOrder,
}

impl Default for DetectionConfig {
  fn default() -> Self {
    Self {
      input_name: "image_tensor".to_string(),
      scores_name: "detection_scores".to_string(),
      classes_name: "detection_classes".to_string(),
      boxes_name: "detection_boxes".to_string(),
      channel_order: ChannelOrder::Rgb,
    }
  }
}

#[derive(Error, Debug)]
pub enum DetectionError {
  #[error("推理失败: {0}")]
  Run(#[source] Box<dyn std::error::Error + Send + Sync>),
  #[error("期望 {expected} 个输出张量，实际为 {actual}")]
  OutputCount { expected: usize, actual: usize },
  #[error("输出 {name} 需要 DT_FLOAT 类型，实际为 {dtype}")]
  ElementType { name: String, dtype: ElementType },
  #[error("输出 {name} 形状为 {shape:?}，期望 {expected}")]
  Shape {
    name: String,
    shape: Vec<usize>,
    expected: String,
  },
}

/// 一个检测槽位
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Slot {
  pub index: usize,
  pub score: f32,
  pub class: f32,
  /// 两个角点坐标
  pub bbox: [f32; 4],
}

/// 单张图片的检测结果，三个数组按槽位一一对应
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DetectionBatch {
  scores: Vec<f32>,
  classes: Vec<f32>,
  boxes: Vec<[f32; 4]>,
}

impl DetectionBatch {
  /// 从 `(1, N)`、`(1, N)`、`(1, N, 4)` 三个输出构造，去掉批次维
  pub fn from_outputs(
    scores: &OutputTensor,
    classes: &OutputTensor,
    boxes: &OutputTensor,
  ) -> Result<Self, DetectionError> {
    let scores_data = expect_f32(scores)?;
    let classes_data = expect_f32(classes)?;
    let boxes_data = expect_f32(boxes)?;

    let max_objects = match scores.shape.as_slice() {
      [1, n] if scores_data.len() == *n => *n,
      _ => return Err(shape_error(scores, "(1, N)".to_string())),
    };

    if classes.shape != [1, max_objects] || classes_data.len() != max_objects {
      return Err(shape_error(classes, format!("(1, {})", max_objects)));
    }

    if boxes.shape != [1, max_objects, BOX_COORDS] || boxes_data.len() != max_objects * BOX_COORDS
    {
      return Err(shape_error(
        boxes,
        format!("(1, {}, {})", max_objects, BOX_COORDS),
      ));
    }

    let boxes = boxes_data
      .chunks_exact(BOX_COORDS)
      .map(|b| [b[0], b[1], b[2], b[3]])
      .collect();

    Ok(Self {
      scores: scores_data.to_vec(),
      classes: classes_data.to_vec(),
      boxes,
    })
  }

  /// 用于构造测试数据或其他来源的结果，三个数组长度必须一致
  pub fn new(scores: Vec<f32>, classes: Vec<f32>, boxes: Vec<[f32; 4]>) -> Option<Self> {
    (scores.len() == classes.len() && scores.len() == boxes.len()).then_some(Self {
      scores,
      classes,
      boxes,
    })
  }

  pub fn len(&self) -> usize {
    self.scores.len()
  }

  pub fn is_empty(&self) -> bool {
    self.scores.is_empty()
  }

  pub fn scores(&self) -> &[f32] {
    &self.scores
  }

  pub fn classes(&self) -> &[f32] {
    &self.classes
  }

  pub fn boxes(&self) -> &[[f32; 4]] {
    &self.boxes
  }

  /// 按模型原始顺序遍历所有槽位
  pub fn slots(&self) -> impl Iterator<Item = Slot> + '_ {
    self
      .scores
      .iter()
      .zip(&self.classes)
      .zip(&self.boxes)
      .enumerate()
      .map(|(index, ((&score, &class), &bbox))| Slot {
        index,
        score,
        class,
        bbox,
      })
  }

  /// 分数不低于阈值的槽位，保持原始顺序
  pub fn above(&self, threshold: f32) -> impl Iterator<Item = Slot> + '_ {
    self.slots().filter(move |slot| slot.score >= threshold)
  }
}

fn expect_f32(tensor: &OutputTensor) -> Result<&[f32], DetectionError> {
  tensor.as_f32().ok_or_else(|| DetectionError::ElementType {
    name: tensor.name.clone(),
    dtype: tensor.dtype.clone(),
  })
}

fn shape_error(tensor: &OutputTensor, expected: String) -> DetectionError {
  DetectionError::Shape {
    name: tensor.name.clone(),
    shape: tensor.shape.clone(),
    expected,
  }
}

/// 在运行时之上完成一次目标检测
pub struct Detector<R> {
  runtime: R,
  config: DetectionConfig,
}

impl<R: ModelRuntime> Detector<R> {
  pub fn new(runtime: R, config: DetectionConfig) -> Self {
    Self { runtime, config }
  }

  pub fn runtime(&self) -> &R {
    &self.runtime
  }

  pub fn config(&self) -> &DetectionConfig {
    &self.config
  }
}

impl<R: ModelRuntime> Model for Detector<R> {
  type Input = RgbNhwcFrame;
  type Output = DetectionBatch;
  type Error = DetectionError;

  fn infer(&mut self, input: Self::Input) -> Result<Self::Output, Self::Error> {
    let frame = input.into_reordered(self.config.channel_order);
    debug!(
      "执行模型推理, 输入 {} 形状 {:?}",
      self.config.input_name,
      frame.shape()
    );

    let output_names = [
      self.config.scores_name.as_str(),
      self.config.classes_name.as_str(),
      self.config.boxes_name.as_str(),
    ];
    let outputs = self
      .runtime
      .run(&self.config.input_name, frame, &output_names)
      .map_err(|e| DetectionError::Run(Box::new(e)))?;

    let [scores, classes, boxes] = outputs.as_slice() else {
      return Err(DetectionError::OutputCount {
        expected: output_names.len(),
        actual: outputs.len(),
      });
    };

    let batch = DetectionBatch::from_outputs(scores, classes, boxes)?;
    debug!("检测槽位数量: {}", batch.len());
    Ok(batch)
  }
}
