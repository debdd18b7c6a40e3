// 该文件是 Kanjian （看见） 项目的一部分。
// src/model/onnx.rs - ONNX Runtime 推理后端
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

use std::path::{Path, PathBuf};

use ort::{
  session::{Session, builder::GraphOptimizationLevel},
  tensor::TensorElementType,
  value::{Tensor, ValueType},
};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::{
  frame::RgbNhwcFrame,
  model::{
    DEFAULT_SIGNATURE, ElementType, ModelRuntime, OutputTensor, Signature, TensorSpec,
    TensorValues,
  },
};

/// 模型目录中的默认文件名
const ONNX_MODEL_FILE: &str = "model.onnx";
/// 模型自定义元数据中记录导出标签的键
const ONNX_TAGS_KEY: &str = "tags";

#[derive(Error, Debug)]
pub enum OnnxModelError {
  #[error("找不到模型文件: {0}")]
  MissingModel(PathBuf),
  #[error("模型加载错误: {0}")]
  Load(String),
  #[error("模型不包含标签 '{requested}'，可用标签: {available}")]
  TagMismatch { requested: String, available: String },
  #[error("模型没有名为 '{0}' 的签名")]
  SignatureNotFound(String),
  #[error("模型没有名为 '{0}' 的输入")]
  InputNotFound(String),
  #[error("模型没有名为 '{0}' 的输出")]
  OutputNotFound(String),
  #[error("创建输入张量失败: {0}")]
  Input(String),
  #[error("推理执行失败: {0}")]
  Run(String),
  #[error("读取输出 {name} 失败: {message}")]
  Extract { name: String, message: String },
}

/// ONNX Runtime 会话，签名固定为 `serving_default`，图节点名即张量名
pub struct OnnxModel {
  session: Session,
  signature: Signature,
}

impl OnnxModel {
  pub const SCHEME: &'static str = "onnx";

  fn resolve_path(path: &Path) -> Result<PathBuf, OnnxModelError> {
    let file = if path.is_dir() {
      path.join(ONNX_MODEL_FILE)
    } else {
      path.to_path_buf()
    };

    if !file.is_file() {
      error!("模型文件不存在: {}", file.display());
      return Err(OnnxModelError::MissingModel(file));
    }
    Ok(file)
  }

  fn check_tag(session: &Session, tag: &str) -> Result<(), OnnxModelError> {
    let tags = match session.metadata() {
      Ok(metadata) => match metadata.custom(ONNX_TAGS_KEY) {
        Ok(Some(tags)) => tags,
        _ => {
          debug!("模型未记录导出标签，跳过标签 '{}' 检查", tag);
          return Ok(());
        }
      },
      Err(e) => {
        warn!("读取模型元数据失败: {}", e);
        return Ok(());
      }
    };

    if tags.split(',').map(str::trim).any(|t| t == tag) {
      Ok(())
    } else {
      Err(OnnxModelError::TagMismatch {
        requested: tag.to_string(),
        available: tags,
      })
    }
  }

  fn build_signature(session: &Session) -> Signature {
    let mut inputs: Vec<TensorSpec> = session
      .inputs
      .iter()
      .map(|input| TensorSpec {
        name: input.name.clone(),
        node_name: input.name.clone(),
        dtype: element_type(&input.input_type),
      })
      .collect();
    let mut outputs: Vec<TensorSpec> = session
      .outputs
      .iter()
      .map(|output| TensorSpec {
        name: output.name.clone(),
        node_name: output.name.clone(),
        dtype: element_type(&output.output_type),
      })
      .collect();
    inputs.sort_by(|a, b| a.name.cmp(&b.name));
    outputs.sort_by(|a, b| a.name.cmp(&b.name));

    Signature {
      name: DEFAULT_SIGNATURE.to_string(),
      inputs,
      outputs,
    }
  }

  fn output_dtype(&self, name: &str) -> Option<&ElementType> {
    self
      .signature
      .outputs
      .iter()
      .find(|spec| spec.name == name)
      .map(|spec| &spec.dtype)
  }
}

fn element_type(value_type: &ValueType) -> ElementType {
  match value_type {
    ValueType::Tensor { ty, .. } => match ty {
      TensorElementType::Float32 => ElementType::Float,
      TensorElementType::Float64 => ElementType::Double,
      TensorElementType::Uint8 => ElementType::UInt8,
      TensorElementType::Int8 => ElementType::Int8,
      TensorElementType::Int32 => ElementType::Int32,
      TensorElementType::Int64 => ElementType::Int64,
      TensorElementType::Bool => ElementType::Bool,
      TensorElementType::String => ElementType::String,
      other => ElementType::Other(format!("{:?}", other)),
    },
    other => ElementType::Other(format!("{:?}", other)),
  }
}

impl ModelRuntime for OnnxModel {
  type Error = OnnxModelError;

  fn load(path: &Path, tag: &str) -> Result<Self, Self::Error> {
    let file = Self::resolve_path(path)?;
    info!("加载 ONNX 模型文件: {}", file.display());

    let session = Session::builder()
      .map_err(|e| OnnxModelError::Load(e.to_string()))?
      .with_optimization_level(GraphOptimizationLevel::Level3)
      .map_err(|e| OnnxModelError::Load(e.to_string()))?
      .commit_from_file(&file)
      .map_err(|e| OnnxModelError::Load(e.to_string()))?;

    Self::check_tag(&session, tag)?;

    let signature = Self::build_signature(&session);
    debug!("模型输入数量: {}", signature.inputs.len());
    debug!("模型输出数量: {}", signature.outputs.len());
    info!("模型加载完成");

    Ok(Self { session, signature })
  }

  fn signature(&self, name: &str) -> Result<Signature, Self::Error> {
    if name != self.signature.name {
      return Err(OnnxModelError::SignatureNotFound(name.to_string()));
    }
    Ok(self.signature.clone())
  }

  fn run(
    &mut self,
    input_name: &str,
    input: RgbNhwcFrame,
    output_names: &[&str],
  ) -> Result<Vec<OutputTensor>, Self::Error> {
    if !self.signature.inputs.iter().any(|spec| spec.name == input_name) {
      return Err(OnnxModelError::InputNotFound(input_name.to_string()));
    }

    let mut dtypes = Vec::with_capacity(output_names.len());
    for &name in output_names {
      let dtype = self
        .output_dtype(name)
        .cloned()
        .ok_or_else(|| OnnxModelError::OutputNotFound(name.to_string()))?;
      dtypes.push(dtype);
    }

    let shape = input.shape();
    let tensor = Tensor::from_array((shape, input.into_raw().into_vec()))
      .map_err(|e| OnnxModelError::Input(e.to_string()))?;

    debug!("设置模型输入 {}: {:?}", input_name, shape);
    let outputs = self
      .session
      .run(ort::inputs![input_name => tensor])
      .map_err(|e| OnnxModelError::Run(e.to_string()))?;

    let mut tensors = Vec::with_capacity(output_names.len());
    for (&name, dtype) in output_names.iter().zip(dtypes) {
      let value = outputs
        .get(name)
        .ok_or_else(|| OnnxModelError::OutputNotFound(name.to_string()))?;
      let extract_error = |e: ort::Error| OnnxModelError::Extract {
        name: name.to_string(),
        message: e.to_string(),
      };

      let (shape, values) = match dtype {
        ElementType::Float => {
          let (shape, data) = value.try_extract_tensor::<f32>().map_err(extract_error)?;
          (shape.to_vec(), TensorValues::Float(data.into()))
        }
        ElementType::UInt8 => {
          let (shape, data) = value.try_extract_tensor::<u8>().map_err(extract_error)?;
          (shape.to_vec(), TensorValues::UInt8(data.into()))
        }
        _ => (Vec::new(), TensorValues::Unsupported),
      };

      tensors.push(OutputTensor {
        name: name.to_string(),
        dtype,
        shape: shape.iter().map(|&d| d.max(0) as usize).collect(),
        values,
      });
    }

    Ok(tensors)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::frame::ChannelOrder;

  const OUTPUTS: [&str; 3] = ["detection_scores", "detection_classes", "detection_boxes"];

  /// `image_tensor` (u8, 1xHxWx3) 的逐通道均值除以 255 作为三个分数，
  /// 类别与检测框为常量，元数据标签为 `serve`
  fn fixture() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/detector.onnx")
  }

  fn solid_frame(pixel: [u8; 3]) -> RgbNhwcFrame {
    RgbNhwcFrame::from_raw(2, 2, ChannelOrder::Rgb, pixel.repeat(4)).unwrap()
  }

  fn spec(name: &str, dtype: ElementType) -> TensorSpec {
    TensorSpec {
      name: name.to_string(),
      node_name: name.to_string(),
      dtype,
    }
  }

  #[test]
  fn signature_lists_session_tensors_by_name() {
    let model = OnnxModel::load(&fixture(), "serve").unwrap();
    let signature = model.signature("serving_default").unwrap();
    assert_eq!(signature.inputs, vec![spec("image_tensor", ElementType::UInt8)]);
    assert_eq!(
      signature.outputs,
      vec![
        spec("detection_boxes", ElementType::Float),
        spec("detection_classes", ElementType::Float),
        spec("detection_scores", ElementType::Float),
      ]
    );

    assert!(matches!(
      model.signature("predict"),
      Err(OnnxModelError::SignatureNotFound(name)) if name == "predict"
    ));
  }

  #[test]
  fn loads_model_onnx_from_directory() {
    let dir = std::env::temp_dir().join(format!("kanjian-onnx-dir-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::copy(fixture(), dir.join(ONNX_MODEL_FILE)).unwrap();

    let model = OnnxModel::load(&dir, "serve").unwrap();
    assert_eq!(model.signature("serving_default").unwrap().inputs.len(), 1);

    std::fs::remove_dir_all(dir).ok();
  }

  #[test]
  fn tag_must_be_listed_in_metadata() {
    match OnnxModel::load(&fixture(), "gpu") {
      Err(OnnxModelError::TagMismatch {
        requested,
        available,
      }) => {
        assert_eq!(requested, "gpu");
        assert_eq!(available, "serve");
      }
      Err(other) => panic!("unexpected error: {}", other),
      Ok(_) => panic!("tag 'gpu' should be rejected"),
    }
  }

  #[test]
  fn run_feeds_bytes_and_fetches_by_name() {
    let mut model = OnnxModel::load(&fixture(), "serve").unwrap();
    let outputs = model
      .run("image_tensor", solid_frame([255, 51, 0]), &OUTPUTS)
      .unwrap();

    let names: Vec<&str> = outputs.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, OUTPUTS);
    assert!(outputs.iter().all(|t| t.dtype == ElementType::Float));

    assert_eq!(outputs[0].shape, vec![1, 3]);
    let scores = outputs[0].as_f32().unwrap();
    assert!((scores[0] - 1.0).abs() < 1e-6);
    assert!((scores[1] - 0.2).abs() < 1e-6);
    assert_eq!(scores[2], 0.0);

    assert_eq!(outputs[1].shape, vec![1, 3]);
    assert_eq!(outputs[1].as_f32().unwrap(), &[1.0, 0.0, 2.0]);

    assert_eq!(outputs[2].shape, vec![1, 3, 4]);
    assert_eq!(outputs[2].as_f32().unwrap()[8..], [0.0, 0.0, 1.0, 1.0]);
  }

  #[test]
  fn unknown_tensor_names_are_reported() {
    let mut model = OnnxModel::load(&fixture(), "serve").unwrap();

    assert!(matches!(
      model.run("pixels", solid_frame([0, 0, 0]), &OUTPUTS),
      Err(OnnxModelError::InputNotFound(name)) if name == "pixels"
    ));
    assert!(matches!(
      model.run("image_tensor", solid_frame([0, 0, 0]), &["detection_scores", "num_detections"]),
      Err(OnnxModelError::OutputNotFound(name)) if name == "num_detections"
    ));
  }

  #[test]
  fn missing_model_file_is_reported() {
    let dir = std::env::temp_dir().join(format!("kanjian-onnx-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();

    match OnnxModel::load(&dir, "serve") {
      Err(OnnxModelError::MissingModel(path)) => assert_eq!(path, dir.join(ONNX_MODEL_FILE)),
      Err(other) => panic!("unexpected error: {}", other),
      Ok(_) => panic!("empty directory should not load"),
    }

    std::fs::remove_dir_all(dir).ok();
  }

  #[test]
  fn missing_file_path_is_reported() {
    let file = std::env::temp_dir().join("kanjian-does-not-exist.onnx");
    assert!(matches!(
      OnnxModel::load(&file, "serve"),
      Err(OnnxModelError::MissingModel(_))
    ));
  }
}
