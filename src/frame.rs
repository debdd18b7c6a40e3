// 该文件是 Kanjian （看见） 项目的一部分。
// src/frame.rs - NHWC 帧定义
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

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

pub const RGB_CHANNELS: usize = 3;
const BATCH_SIZE: usize = 1;

/// 像素内三个通道的排列顺序
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChannelOrder {
  #[default]
  Rgb,
  Bgr,
}

impl fmt::Display for ChannelOrder {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      ChannelOrder::Rgb => write!(f, "rgb"),
      ChannelOrder::Bgr => write!(f, "bgr"),
    }
  }
}

impl FromStr for ChannelOrder {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_ascii_lowercase().as_str() {
      "rgb" => Ok(ChannelOrder::Rgb),
      "bgr" => Ok(ChannelOrder::Bgr),
      other => Err(format!("未知通道顺序 '{}'，可选 rgb 或 bgr", other)),
    }
  }
}

#[derive(Error, Debug)]
#[error("数据长度不匹配: 期望长度 {expected}, 实际长度 {actual}")]
pub struct FrameSizeError {
  pub expected: usize,
  pub actual: usize,
}

/// 交换每个 3 字节像素的第一和第三个通道，`(c0, c1, c2)` 变为 `(c2, c1, c0)`。
///
/// 交换两次即恢复原数据。末尾不足 3 字节的部分保持不变。
pub fn swap_red_blue(data: &mut [u8]) {
  for pixel in data.chunks_exact_mut(RGB_CHANNELS) {
    pixel.swap(0, 2);
  }
}

/// 形状为 `(1, H, W, 3)` 的 u8 图像张量
#[derive(Debug, Clone)]
pub struct RgbNhwcFrame {
  data: Box<[u8]>,
  height: usize,
  width: usize,
  order: ChannelOrder,
}

impl RgbNhwcFrame {
  pub fn from_raw(
    height: usize,
    width: usize,
    order: ChannelOrder,
    data: Vec<u8>,
  ) -> Result<Self, FrameSizeError> {
    let expected = RGB_CHANNELS * height * width;
    if data.len() != expected {
      return Err(FrameSizeError {
        expected,
        actual: data.len(),
      });
    }

    Ok(Self {
      data: data.into_boxed_slice(),
      height,
      width,
      order,
    })
  }

  pub fn height(&self) -> usize {
    self.height
  }

  pub fn width(&self) -> usize {
    self.width
  }

  pub fn channels(&self) -> usize {
    RGB_CHANNELS
  }

  pub fn order(&self) -> ChannelOrder {
    self.order
  }

  /// 张量形状 `[batch, height, width, channels]`
  pub fn shape(&self) -> [usize; 4] {
    [BATCH_SIZE, self.height, self.width, RGB_CHANNELS]
  }

  /// 原地重排通道，使帧满足模型期望的通道顺序
  pub fn reorder(&mut self, target: ChannelOrder) {
    if self.order != target {
      swap_red_blue(&mut self.data);
      self.order = target;
    }
  }

  pub fn into_reordered(mut self, target: ChannelOrder) -> Self {
    self.reorder(target);
    self
  }

  pub fn into_raw(self) -> Box<[u8]> {
    self.data
  }
}

impl AsRef<[u8]> for RgbNhwcFrame {
  fn as_ref(&self) -> &[u8] {
    &self.data
  }
}

impl AsMut<[u8]> for RgbNhwcFrame {
  fn as_mut(&mut self) -> &mut [u8] {
    &mut self.data
  }
}
