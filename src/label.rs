// 该文件是 Kanjian （看见） 项目的一部分。
// src/label.rs - 类别标签表
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

use std::collections::BTreeMap;
use std::path::Path;

use thiserror::Error;
use tracing::{debug, info};

pub mod pbtxt;

/// 花卉示例模型使用的占位标签
pub const PLACEHOLDER_LABELS: [&str; 5] = ["daisy", "dandelion", "roses", "sunflowers", "tulips"];

/// 标签映射中允许的最大类别编号
pub const MAX_LABEL_ID: usize = 65_535;

#[derive(Error, Debug)]
pub enum LabelError {
  #[error("无法读取标签文件 {path}: {source}")]
  Io {
    path: String,
    source: std::io::Error,
  },
  #[error("标签文件 {path} 第 {line} 行格式错误: {message}")]
  Parse {
    path: String,
    line: usize,
    message: String,
  },
  #[error("标签文件 {path} 格式错误: {message}")]
  Invalid { path: String, message: String },
  #[error("标签文件 {path} 中类别 {id} 重复定义")]
  DuplicateId { path: String, id: usize },
  #[error("标签文件 {0} 中没有任何标签")]
  Empty(String),
  #[error("类别编号 {class} 超出标签表范围 (共 {len} 个标签)")]
  ClassOutOfRange { class: f32, len: usize },
  #[error("类别编号 {0} 在标签表中没有名称")]
  UnnamedClass(usize),
}

/// 按类别编号索引的标签表，下标 `i` 对应模型输出的类别 `i`
#[derive(Debug, Clone, PartialEq)]
pub struct LabelTable {
  names: Vec<Option<String>>,
}

impl LabelTable {
  pub fn new<I, S>(names: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    Self {
      names: names.into_iter().map(|name| Some(name.into())).collect(),
    }
  }

  /// 忽略标签文件，直接使用固定的五个花卉名称
  pub fn placeholder() -> Self {
    Self::new(PLACEHOLDER_LABELS)
  }

  /// 根据扩展名与内容选择解析方式：
  /// `.pbtxt` 或以 `item` 开头的文件按目标检测标签映射解析，
  /// `.json` 按数组或 `{"id": "name"}` 对象解析，其余按每行一个标签解析。
  pub fn load(path: impl AsRef<Path>) -> Result<Self, LabelError> {
    let path = path.as_ref();
    let shown = path.display().to_string();
    info!("加载标签文件: {}", shown);

    let text = std::fs::read_to_string(path).map_err(|source| LabelError::Io {
      path: shown.clone(),
      source,
    })?;

    let extension = path
      .extension()
      .and_then(|ext| ext.to_str())
      .map(str::to_ascii_lowercase);

    let table = match extension.as_deref() {
      Some("pbtxt") => Self::from_pbtxt(&shown, &text)?,
      Some("json") => Self::from_json(&shown, &text)?,
      _ if text.trim_start().starts_with("item") => Self::from_pbtxt(&shown, &text)?,
      _ => Self::from_lines(&text),
    };

    if table.names.iter().all(Option::is_none) {
      return Err(LabelError::Empty(shown));
    }

    debug!("标签表大小: {}", table.len());
    Ok(table)
  }

  fn from_pbtxt(path: &str, text: &str) -> Result<Self, LabelError> {
    let items = pbtxt::parse(text).map_err(|e| LabelError::Parse {
      path: path.to_string(),
      line: e.line,
      message: e.message,
    })?;

    let mut pairs = Vec::with_capacity(items.len());
    for item in items {
      let parse_error = |message: String| LabelError::Parse {
        path: path.to_string(),
        line: item.line,
        message,
      };
      let id = usize::try_from(item.id)
        .map_err(|_| parse_error(format!("类别编号不能为负数: {}", item.id)))?;
      if id > MAX_LABEL_ID {
        return Err(parse_error(format!(
          "类别编号 {} 超过上限 {}",
          id, MAX_LABEL_ID
        )));
      }
      pairs.push((id, item.label().map(str::to_string)));
    }
    Self::from_pairs(path, pairs)
  }

  fn from_json(path: &str, text: &str) -> Result<Self, LabelError> {
    let invalid = |message: String| LabelError::Invalid {
      path: path.to_string(),
      message,
    };

    let value: serde_json::Value = serde_json::from_str(text).map_err(|e| LabelError::Parse {
      path: path.to_string(),
      line: e.line(),
      message: e.to_string(),
    })?;

    match value {
      serde_json::Value::Array(values) => values
        .into_iter()
        .enumerate()
        .map(|(id, value)| match value {
          serde_json::Value::String(name) => Ok(Some(name)),
          serde_json::Value::Null => Ok(None),
          other => Err(invalid(format!("类别 {} 的名称不是字符串: {}", id, other))),
        })
        .collect::<Result<Vec<_>, _>>()
        .map(|names| Self { names }),
      serde_json::Value::Object(map) => {
        let mut pairs = Vec::with_capacity(map.len());
        for (key, value) in map {
          let id = key
            .trim()
            .parse::<usize>()
            .map_err(|_| invalid(format!("类别编号不是非负整数: {}", key)))?;
          if id > MAX_LABEL_ID {
            return Err(invalid(format!(
              "类别编号 {} 超过上限 {}",
              id, MAX_LABEL_ID
            )));
          }
          let name = match value {
            serde_json::Value::String(name) => Some(name),
            serde_json::Value::Null => None,
            _ => return Err(invalid(format!("类别 {} 的名称不是字符串", key))),
          };
          pairs.push((id, name));
        }
        Self::from_pairs(path, pairs)
      }
      _ => Err(invalid("需要数组或对象".to_string())),
    }
  }

  fn from_lines(text: &str) -> Self {
    Self {
      names: text
        .lines()
        .map(str::trim)
        .map(|line| (!line.is_empty()).then(|| line.to_string()))
        .collect(),
    }
  }

  /// 编号须已检查不超过 [`MAX_LABEL_ID`]
  fn from_pairs(path: &str, pairs: Vec<(usize, Option<String>)>) -> Result<Self, LabelError> {
    let mut by_id = BTreeMap::new();
    for (id, name) in pairs {
      if by_id.insert(id, name).is_some() {
        return Err(LabelError::DuplicateId {
          path: path.to_string(),
          id,
        });
      }
    }

    let len = by_id.last_key_value().map_or(0, |(&id, _)| id + 1);
    let mut names = vec![None; len];
    for (id, name) in by_id {
      names[id] = name;
    }
    Ok(Self { names })
  }

  pub fn len(&self) -> usize {
    self.names.len()
  }

  pub fn is_empty(&self) -> bool {
    self.names.is_empty()
  }

  /// 将模型输出的浮点类别截断为整数后查表
  pub fn get(&self, class: f32) -> Result<&str, LabelError> {
    let out_of_range = || LabelError::ClassOutOfRange {
      class,
      len: self.names.len(),
    };

    if !class.is_finite() || class < 0.0 {
      return Err(out_of_range());
    }

    let id = class.trunc() as usize;
    match self.names.get(id) {
      None => Err(out_of_range()),
      Some(None) => Err(LabelError::UnnamedClass(id)),
      Some(Some(name)) => Ok(name.as_str()),
    }
  }
}
