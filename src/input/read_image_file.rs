// 该文件是 Kanjian （看见） 项目的一部分。
// src/input/read_image_file.rs - 图像文件输入
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

use std::path::Path;

use image::{ColorType, DynamicImage, ImageReader};
use thiserror::Error;
use tracing::{debug, warn};

use crate::{
  frame::{ChannelOrder, FrameSizeError, RgbNhwcFrame},
  input::DecodeOptions,
};

#[derive(Error, Debug)]
pub enum ImageFileInputError {
  #[error("无法打开图片文件 {path}: {source}")]
  IoError {
    path: String,
    source: std::io::Error,
  },
  #[error("无法解码图片文件 {path}: {source}")]
  ImageLoadError {
    path: String,
    source: image::ImageError,
  },
  #[error("图片 {path} 需要 8 位三通道编码，实际为 {color:?}")]
  UnsupportedLayout { path: String, color: ColorType },
  #[error("图片 {path} 像素数据异常: {source}")]
  FrameError {
    path: String,
    source: FrameSizeError,
  },
}

impl ImageFileInputError {
  /// 出错的图片文件
  pub fn path(&self) -> &str {
    match self {
      ImageFileInputError::IoError { path, .. }
      | ImageFileInputError::ImageLoadError { path, .. }
      | ImageFileInputError::UnsupportedLayout { path, .. }
      | ImageFileInputError::FrameError { path, .. } => path,
    }
  }
}

/// 已解码的图片及其来源
#[derive(Debug)]
pub struct LoadedImage {
  pub path: String,
  pub frame: RgbNhwcFrame,
}

/// 按顺序逐个解码图片文件，每次迭代只持有一张图片
pub struct ImageFileInput {
  paths: std::vec::IntoIter<String>,
  options: DecodeOptions,
}

impl ImageFileInput {
  pub fn new<I, S>(paths: I, options: DecodeOptions) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    let paths: Vec<String> = paths.into_iter().map(Into::into).collect();
    Self {
      paths: paths.into_iter(),
      options,
    }
  }

  pub fn remaining(&self) -> usize {
    self.paths.len()
  }
}

impl Iterator for ImageFileInput {
  type Item = Result<LoadedImage, ImageFileInputError>;

  fn next(&mut self) -> Option<Self::Item> {
    let path = self.paths.next()?;
    Some(read_frame(&path, self.options).map(|frame| LoadedImage { path, frame }))
  }

  fn size_hint(&self) -> (usize, Option<usize>) {
    self.paths.size_hint()
  }
}

/// 读取一张图片为 `(1, H, W, 3)` 帧
///
/// 解码器输出 RGB 顺序，帧以 [`ChannelOrder::Rgb`] 标记。
pub fn read_frame(path: &str, options: DecodeOptions) -> Result<RgbNhwcFrame, ImageFileInputError> {
  debug!("读取图片文件: {}", path);
  let image = ImageReader::open(Path::new(path))
    .map_err(|source| ImageFileInputError::IoError {
      path: path.to_string(),
      source,
    })?
    .with_guessed_format()
    .map_err(|source| ImageFileInputError::IoError {
      path: path.to_string(),
      source,
    })?
    .decode()
    .map_err(|source| ImageFileInputError::ImageLoadError {
      path: path.to_string(),
      source,
    })?;

  let rgb = match image {
    DynamicImage::ImageRgb8(rgb) => rgb,
    other if options.convert_color => {
      warn!("图片 {} 为 {:?} 编码，转换为 8 位 RGB", path, other.color());
      other.to_rgb8()
    }
    other => {
      return Err(ImageFileInputError::UnsupportedLayout {
        path: path.to_string(),
        color: other.color(),
      });
    }
  };

  let (width, height) = rgb.dimensions();
  debug!("图片尺寸: {}x{}", width, height);

  RgbNhwcFrame::from_raw(
    height as usize,
    width as usize,
    ChannelOrder::Rgb,
    rgb.into_raw(),
  )
  .map_err(|source| ImageFileInputError::FrameError {
    path: path.to_string(),
    source,
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::{GrayImage, ImageBuffer, Luma, Rgb, Rgba, RgbaImage};
  use std::path::PathBuf;

  fn temp_png(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("kanjian-{}-{}.png", std::process::id(), name))
  }

  #[test]
  fn reads_rgb_png_in_nhwc_order() {
    let path = temp_png("rgb");
    let mut img = ImageBuffer::new(3, 2);
    for (x, y, pixel) in img.enumerate_pixels_mut() {
      *pixel = Rgb([x as u8, y as u8, 200]);
    }
    img.save(&path).unwrap();

    let frame = read_frame(path.to_str().unwrap(), DecodeOptions::default()).unwrap();
    assert_eq!(frame.shape(), [1, 2, 3, 3]);
    assert_eq!(frame.order(), ChannelOrder::Rgb);
    // 第二行第三列
    let offset = (3 + 2) * 3;
    assert_eq!(&frame.as_ref()[offset..offset + 3], &[2, 1, 200]);

    std::fs::remove_file(path).ok();
  }

  #[test]
  fn rejects_grayscale_and_names_file() {
    let path = temp_png("gray");
    GrayImage::from_pixel(4, 4, Luma([7])).save(&path).unwrap();
    let name = path.to_str().unwrap().to_string();

    let err = read_frame(&name, DecodeOptions::default()).unwrap_err();
    assert!(matches!(err, ImageFileInputError::UnsupportedLayout { color: ColorType::L8, .. }));
    assert_eq!(err.path(), name);
    assert!(err.to_string().contains(&name));

    std::fs::remove_file(path).ok();
  }

  #[test]
  fn converts_rgba_when_asked() {
    let path = temp_png("rgba");
    RgbaImage::from_pixel(2, 2, Rgba([1, 2, 3, 4])).save(&path).unwrap();
    let name = path.to_str().unwrap();

    assert!(read_frame(name, DecodeOptions::default()).is_err());

    let frame = read_frame(
      name,
      DecodeOptions {
        convert_color: true,
      },
    )
    .unwrap();
    assert_eq!(&frame.as_ref()[..3], &[1, 2, 3]);

    std::fs::remove_file(path).ok();
  }

  #[test]
  fn every_bad_file_fails_independently() {
    let gray = temp_png("gray-batch");
    GrayImage::from_pixel(2, 2, Luma([0])).save(&gray).unwrap();
    let missing = temp_png("missing-batch");
    let good = temp_png("good-batch");
    ImageBuffer::from_pixel(2, 2, Rgb([9u8, 9, 9])).save(&good).unwrap();

    let names: Vec<String> = [&gray, &missing, &good]
      .iter()
      .map(|p| p.to_str().unwrap().to_string())
      .collect();
    let input = ImageFileInput::new(names.clone(), DecodeOptions::default());
    assert_eq!(input.remaining(), 3);

    let results: Vec<_> = input.collect();
    assert_eq!(results[0].as_ref().unwrap_err().path(), names[0]);
    assert!(matches!(
      results[1].as_ref().unwrap_err(),
      ImageFileInputError::IoError { .. }
    ));
    assert_eq!(results[2].as_ref().unwrap().path, names[2]);

    std::fs::remove_file(gray).ok();
    std::fs::remove_file(good).ok();
  }
}
