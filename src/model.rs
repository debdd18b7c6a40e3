// 该文件是 Kanjian （看见） 项目的一部分。
// src/model.rs - 模型
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
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

use crate::{FromUrl, frame::RgbNhwcFrame};

mod detection;
pub use self::detection::{DetectionBatch, DetectionConfig, DetectionError, Detector, Slot};

#[cfg(feature = "onnx")]
mod onnx;
#[cfg(feature = "onnx")]
pub use self::onnx::{OnnxModel, OnnxModelError};

#[cfg(feature = "tensorflow")]
mod saved_model;
#[cfg(feature = "tensorflow")]
pub use self::saved_model::{SavedModel, SavedModelError};

pub const DEFAULT_TAG: &str = "serve";
pub const DEFAULT_SIGNATURE: &str = "serving_default";

/// 一次推理：输入帧，输出结果
pub trait Model {
  type Input;
  type Output;
  type Error;

  fn infer(&mut self, input: Self::Input) -> Result<Self::Output, Self::Error>;
}

/// 外部推理运行时提供的能力：按标签加载模型、查询签名、按名称喂入与取回张量
pub trait ModelRuntime {
  type Error: std::error::Error + Send + Sync + 'static;

  fn load(path: &Path, tag: &str) -> Result<Self, Self::Error>
  where
    Self: Sized;

  fn signature(&self, name: &str) -> Result<Signature, Self::Error>;

  /// 输出张量的顺序与 `output_names` 一致
  fn run(
    &mut self,
    input_name: &str,
    input: RgbNhwcFrame,
    output_names: &[&str],
  ) -> Result<Vec<OutputTensor>, Self::Error>;
}

/// 张量元素类型，显示为 TensorFlow 的 `DT_*` 写法
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ElementType {
  Float,
  Double,
  UInt8,
  Int8,
  Int32,
  Int64,
  Bool,
  String,
  Other(String),
}

impl fmt::Display for ElementType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      ElementType::Float => write!(f, "DT_FLOAT"),
      ElementType::Double => write!(f, "DT_DOUBLE"),
      ElementType::UInt8 => write!(f, "DT_UINT8"),
      ElementType::Int8 => write!(f, "DT_INT8"),
      ElementType::Int32 => write!(f, "DT_INT32"),
      ElementType::Int64 => write!(f, "DT_INT64"),
      ElementType::Bool => write!(f, "DT_BOOL"),
      ElementType::String => write!(f, "DT_STRING"),
      ElementType::Other(name) => write!(f, "{}", name),
    }
  }
}

/// 签名中的一个输入或输出
#[derive(Debug, Clone, PartialEq)]
pub struct TensorSpec {
  /// 签名中的名称
  pub name: String,
  /// 图中的节点名称
  pub node_name: String,
  pub dtype: ElementType,
}

/// 模型签名，输入输出均按名称排序
#[derive(Debug, Clone, PartialEq)]
pub struct Signature {
  pub name: String,
  pub inputs: Vec<TensorSpec>,
  pub outputs: Vec<TensorSpec>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TensorValues {
  Float(Box<[f32]>),
  UInt8(Box<[u8]>),
  /// 其余类型只保留元素类型，不拷贝数据
  Unsupported,
}

/// 运行时返回的输出张量
#[derive(Debug, Clone, PartialEq)]
pub struct OutputTensor {
  pub name: String,
  pub dtype: ElementType,
  pub shape: Vec<usize>,
  pub values: TensorValues,
}

impl OutputTensor {
  pub fn float(name: impl Into<String>, shape: Vec<usize>, values: Vec<f32>) -> Self {
    Self {
      name: name.into(),
      dtype: ElementType::Float,
      shape,
      values: TensorValues::Float(values.into_boxed_slice()),
    }
  }

  pub fn as_f32(&self) -> Option<&[f32]> {
    match &self.values {
      TensorValues::Float(values) => Some(values),
      _ => None,
    }
  }
}

#[derive(Error, Debug)]
pub enum ModelError {
  #[cfg(feature = "onnx")]
  #[error("ONNX 模型错误: {0}")]
  Onnx(#[from] OnnxModelError),
  #[cfg(feature = "tensorflow")]
  #[error("SavedModel 模型错误: {0}")]
  SavedModel(#[from] SavedModelError),
  #[error("不支持的模型方案: {0}")]
  SchemeMismatch(String),
  #[error("无效的模型地址 {0}: {1}")]
  InvalidLocation(String, url::ParseError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
  #[cfg(feature = "onnx")]
  Onnx,
  #[cfg(feature = "tensorflow")]
  SavedModel,
}

/// 选择推理后端并加载模型
#[derive(Debug, Clone)]
pub struct ModelBuilder {
  backend: Backend,
  path: PathBuf,
  tag: String,
}

impl FromUrl for ModelBuilder {
  type Error = ModelError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    let backend = match url.scheme() {
      #[cfg(feature = "onnx")]
      OnnxModel::SCHEME => Backend::Onnx,
      #[cfg(feature = "tensorflow")]
      SavedModel::SCHEME => Backend::SavedModel,
      other => return Err(ModelError::SchemeMismatch(other.to_string())),
    };

    Ok(ModelBuilder {
      backend,
      path: PathBuf::from(url.path()),
      tag: DEFAULT_TAG.to_string(),
    })
  }
}

impl ModelBuilder {
  /// 含 `://` 的地址按 URL 解析，其余视为本地路径
  pub fn parse(location: &str) -> Result<Self, ModelError> {
    if location.contains("://") {
      let url = Url::parse(location)
        .map_err(|e| ModelError::InvalidLocation(location.to_string(), e))?;
      Self::from_url(&url)
    } else {
      Self::from_path(location)
    }
  }

  /// 目录中含有 `saved_model.pb` 时优先使用 SavedModel 后端
  pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ModelError> {
    let path = path.as_ref();
    let backend = Self::detect_backend(path);
    Ok(ModelBuilder {
      backend,
      path: path.to_path_buf(),
      tag: DEFAULT_TAG.to_string(),
    })
  }

  fn detect_backend(path: &Path) -> Backend {
    let saved_model = path.join("saved_model.pb").is_file();
    if saved_model && !cfg!(feature = "tensorflow") {
      warn!(
        "{} 是 SavedModel 目录，但未启用 tensorflow 特性，将尝试按 ONNX 模型加载",
        path.display()
      );
    }
    match saved_model {
      #[cfg(feature = "tensorflow")]
      true => Backend::SavedModel,
      #[cfg(feature = "onnx")]
      _ => Backend::Onnx,
      #[cfg(not(feature = "onnx"))]
      _ => Backend::SavedModel,
    }
  }

  pub fn tag(mut self, tag: &str) -> Self {
    self.tag = tag.to_string();
    self
  }

  pub fn backend(&self) -> Backend {
    self.backend
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  pub fn build(self) -> Result<ModelWrapper, ModelError> {
    info!("加载模型: {} (标签: {})", self.path.display(), self.tag);
    debug!("推理后端: {:?}", self.backend);
    match self.backend {
      #[cfg(feature = "onnx")]
      Backend::Onnx => Ok(ModelWrapper::Onnx(OnnxModel::load(&self.path, &self.tag)?)),
      #[cfg(feature = "tensorflow")]
      Backend::SavedModel => Ok(ModelWrapper::SavedModel(SavedModel::load(
        &self.path, &self.tag,
      )?)),
    }
  }
}

pub enum ModelWrapper {
  #[cfg(feature = "onnx")]
  Onnx(OnnxModel),
  #[cfg(feature = "tensorflow")]
  SavedModel(SavedModel),
}

impl ModelRuntime for ModelWrapper {
  type Error = ModelError;

  fn load(path: &Path, tag: &str) -> Result<Self, Self::Error> {
    ModelBuilder::from_path(path)?.tag(tag).build()
  }

  fn signature(&self, name: &str) -> Result<Signature, Self::Error> {
    match self {
      #[cfg(feature = "onnx")]
      ModelWrapper::Onnx(model) => model.signature(name).map_err(ModelError::from),
      #[cfg(feature = "tensorflow")]
      ModelWrapper::SavedModel(model) => model.signature(name).map_err(ModelError::from),
    }
  }

  fn run(
    &mut self,
    input_name: &str,
    input: RgbNhwcFrame,
    output_names: &[&str],
  ) -> Result<Vec<OutputTensor>, Self::Error> {
    match self {
      #[cfg(feature = "onnx")]
      ModelWrapper::Onnx(model) => model
        .run(input_name, input, output_names)
        .map_err(ModelError::from),
      #[cfg(feature = "tensorflow")]
      ModelWrapper::SavedModel(model) => model
        .run(input_name, input, output_names)
        .map_err(ModelError::from),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn element_type_uses_tensorflow_names() {
    assert_eq!(ElementType::UInt8.to_string(), "DT_UINT8");
    assert_eq!(ElementType::Float.to_string(), "DT_FLOAT");
    assert_eq!(ElementType::Other("Float16".into()).to_string(), "Float16");
  }

  #[test]
  fn unknown_scheme_is_rejected() {
    let err = ModelBuilder::parse("http://example.com/model").unwrap_err();
    assert!(matches!(err, ModelError::SchemeMismatch(scheme) if scheme == "http"));
  }

  #[cfg(feature = "onnx")]
  #[test]
  fn onnx_scheme_keeps_path() {
    let builder = ModelBuilder::parse("onnx:///models/ssd").unwrap().tag("gpu");
    assert_eq!(builder.backend(), Backend::Onnx);
    assert_eq!(builder.path(), Path::new("/models/ssd"));
    assert_eq!(builder.tag, "gpu");
  }

  #[cfg(feature = "onnx")]
  #[test]
  fn plain_path_defaults_to_onnx() {
    let builder = ModelBuilder::parse("models/ssd_mobilenet").unwrap();
    assert_eq!(builder.backend(), Backend::Onnx);
    assert_eq!(builder.tag, DEFAULT_TAG);
  }

  /// 收集日志输出，用于检查告警内容
  #[cfg(not(feature = "tensorflow"))]
  #[derive(Clone, Default)]
  struct LogBuffer(std::sync::Arc<std::sync::Mutex<Vec<u8>>>);

  #[cfg(not(feature = "tensorflow"))]
  impl std::io::Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
      self.0.lock().unwrap().extend_from_slice(buf);
      Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
      Ok(())
    }
  }

  #[cfg(all(feature = "onnx", not(feature = "tensorflow")))]
  #[test]
  fn saved_model_dir_without_tensorflow_warns() {
    let dir = std::env::temp_dir().join(format!("kanjian-saved-model-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("saved_model.pb"), b"").unwrap();

    let logs = LogBuffer::default();
    let writer = logs.clone();
    let subscriber = tracing_subscriber::fmt()
      .with_writer(move || writer.clone())
      .with_ansi(false)
      .finish();
    let builder =
      tracing::subscriber::with_default(subscriber, || ModelBuilder::from_path(&dir)).unwrap();

    assert_eq!(builder.backend(), Backend::Onnx);
    let logs = String::from_utf8(logs.0.lock().unwrap().clone()).unwrap();
    assert!(logs.contains("WARN"), "{}", logs);
    assert!(logs.contains("tensorflow"), "{}", logs);

    std::fs::remove_dir_all(dir).ok();
  }

  #[cfg(feature = "tensorflow")]
  #[test]
  fn saved_model_dir_selects_tensorflow() {
    let dir = std::env::temp_dir().join(format!("kanjian-saved-model-tf-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("saved_model.pb"), b"").unwrap();
    assert_eq!(ModelBuilder::from_path(&dir).unwrap().backend(), Backend::SavedModel);
    std::fs::remove_dir_all(dir).ok();
  }

  #[test]
  fn float_output_exposes_values() {
    let tensor = OutputTensor::float("detection_scores", vec![1, 2], vec![0.5, 0.25]);
    assert_eq!(tensor.as_f32(), Some(&[0.5, 0.25][..]));

    let bytes = OutputTensor {
      values: TensorValues::UInt8(vec![1].into_boxed_slice()),
      dtype: ElementType::UInt8,
      ..tensor
    };
    assert_eq!(bytes.as_f32(), None);
  }
}
