// 该文件是 Kanjian （看见） 项目的一部分。
// src/model/saved_model.rs - TensorFlow SavedModel 推理后端
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

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tensorflow::{
  DataType, Graph, Operation, SavedModelBundle, SessionOptions, SessionRunArgs, Tensor,
  TensorInfo,
};
use thiserror::Error;
use tracing::{debug, error, info};

use crate::{
  frame::RgbNhwcFrame,
  model::{ElementType, ModelRuntime, OutputTensor, Signature, TensorSpec, TensorValues},
};

#[derive(Error, Debug)]
pub enum SavedModelError {
  #[error("找不到 SavedModel 目录: {0}")]
  MissingModel(PathBuf),
  #[error("SavedModel 加载错误: {0}")]
  Load(String),
  #[error("模型没有名为 '{0}' 的签名")]
  SignatureNotFound(String),
  #[error("签名 {signature} 没有名为 '{name}' 的张量")]
  TensorNotFound { signature: String, name: String },
  #[error("图中找不到节点 {0}")]
  OperationNotFound(String),
  #[error("创建输入张量失败: {0}")]
  Input(String),
  #[error("推理执行失败: {0}")]
  Run(String),
  #[error("读取输出 {name} 失败: {message}")]
  Extract { name: String, message: String },
}

/// 已加载的 SavedModel，推理时使用 `serving_default` 签名
pub struct SavedModel {
  // 会话须先于图释放
  bundle: SavedModelBundle,
  graph: Graph,
  signature_name: String,
}

impl SavedModel {
  pub const SCHEME: &'static str = "savedmodel";

  /// 先按签名中的张量名查找，找不到时按图中的 `op` 或 `op:index` 查找
  fn lookup(&self, name: &str, inputs: bool) -> Result<(Operation, i32), SavedModelError> {
    let signature = self
      .bundle
      .meta_graph_def()
      .get_signature(&self.signature_name)
      .map_err(|_| SavedModelError::SignatureNotFound(self.signature_name.clone()))?;
    let tensors = if inputs {
      signature.inputs()
    } else {
      signature.outputs()
    };

    let (node, index) = match tensors.get(name) {
      Some(info) => (info.name().name.as_str(), info.name().index),
      None => {
        debug!("签名 {} 中没有 {}，按图节点名查找", self.signature_name, name);
        parse_node_name(name).ok_or_else(|| SavedModelError::TensorNotFound {
          signature: self.signature_name.clone(),
          name: name.to_string(),
        })?
      }
    };

    let operation = self
      .graph
      .operation_by_name_required(node)
      .map_err(|_| SavedModelError::OperationNotFound(node.to_string()))?;
    Ok((operation, index))
  }
}

/// `op:index` 形式的节点名，省略下标时为 0
fn parse_node_name(name: &str) -> Option<(&str, i32)> {
  match name.rsplit_once(':') {
    Some((op, index)) => index.parse().ok().map(|index| (op, index)),
    None => Some((name, 0)),
  }
}

fn element_type(dtype: DataType) -> ElementType {
  match dtype {
    DataType::Float => ElementType::Float,
    DataType::Double => ElementType::Double,
    DataType::UInt8 => ElementType::UInt8,
    DataType::Int8 => ElementType::Int8,
    DataType::Int32 => ElementType::Int32,
    DataType::Int64 => ElementType::Int64,
    DataType::Bool => ElementType::Bool,
    DataType::String => ElementType::String,
    other => ElementType::Other(format!("DT_{:?}", other).to_uppercase()),
  }
}

fn tensor_specs(tensors: &HashMap<String, TensorInfo>) -> Vec<TensorSpec> {
  let mut specs: Vec<TensorSpec> = tensors
    .iter()
    .map(|(name, info)| TensorSpec {
      name: name.clone(),
      node_name: format!("{}:{}", info.name().name, info.name().index),
      dtype: element_type(info.dtype()),
    })
    .collect();
  specs.sort_by(|a, b| a.name.cmp(&b.name));
  specs
}

impl ModelRuntime for SavedModel {
  type Error = SavedModelError;

  fn load(path: &Path, tag: &str) -> Result<Self, Self::Error> {
    if !path.is_dir() {
      error!("SavedModel 目录不存在: {}", path.display());
      return Err(SavedModelError::MissingModel(path.to_path_buf()));
    }

    info!("加载 SavedModel: {} (标签: {})", path.display(), tag);
    let mut graph = Graph::new();
    let bundle = SavedModelBundle::load(&SessionOptions::new(), [tag], &mut graph, path)
      .map_err(|e| SavedModelError::Load(e.to_string()))?;
    info!("模型加载完成");

    Ok(Self {
      bundle,
      graph,
      signature_name: crate::model::DEFAULT_SIGNATURE.to_string(),
    })
  }

  fn signature(&self, name: &str) -> Result<Signature, Self::Error> {
    let signature = self
      .bundle
      .meta_graph_def()
      .get_signature(name)
      .map_err(|_| SavedModelError::SignatureNotFound(name.to_string()))?;

    Ok(Signature {
      name: name.to_string(),
      inputs: tensor_specs(signature.inputs()),
      outputs: tensor_specs(signature.outputs()),
    })
  }

  fn run(
    &mut self,
    input_name: &str,
    input: RgbNhwcFrame,
    output_names: &[&str],
  ) -> Result<Vec<OutputTensor>, Self::Error> {
    let (input_op, input_index) = self.lookup(input_name, true)?;
    let dims: Vec<u64> = input.shape().iter().map(|&d| d as u64).collect();
    let tensor = Tensor::<u8>::new(&dims)
      .with_values(input.as_ref())
      .map_err(|e| SavedModelError::Input(e.to_string()))?;

    let mut args = SessionRunArgs::new();
    args.add_feed(&input_op, input_index, &tensor);
    debug!("设置模型输入 {}: {:?}", input_name, dims);

    let mut fetches = Vec::with_capacity(output_names.len());
    for &name in output_names {
      let (op, index) = self.lookup(name, false)?;
      let dtype = op.output_type(index as usize);
      let token = args.request_fetch(&op, index);
      fetches.push((name, dtype, token));
    }

    self
      .bundle
      .session
      .run(&mut args)
      .map_err(|e| SavedModelError::Run(e.to_string()))?;

    let mut tensors = Vec::with_capacity(fetches.len());
    for (name, dtype, token) in fetches {
      let extract_error = |e: tensorflow::Status| SavedModelError::Extract {
        name: name.to_string(),
        message: e.to_string(),
      };

      let (shape, values) = match dtype {
        DataType::Float => {
          let tensor = args.fetch::<f32>(token).map_err(extract_error)?;
          (tensor.dims().to_vec(), TensorValues::Float(tensor[..].into()))
        }
        DataType::UInt8 => {
          let tensor = args.fetch::<u8>(token).map_err(extract_error)?;
          (tensor.dims().to_vec(), TensorValues::UInt8(tensor[..].into()))
        }
        _ => (Vec::new(), TensorValues::Unsupported),
      };

      tensors.push(OutputTensor {
        name: name.to_string(),
        dtype: element_type(dtype),
        shape: shape.iter().map(|&d| d as usize).collect(),
        values,
      });
    }

    Ok(tensors)
  }
}
