// 该文件是 Shouyin （手音） 项目的一部分。
// src/label.rs - 类别标签集
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

use std::io::{BufRead, BufReader, Read};
use std::path::Path;

use thiserror::Error;
use tracing::info;

/// 越界类别索引对应的占位名称
pub const UNKNOWN_LABEL: &str = "Unknown";

/// 加载后不可变的有序类别标签集，按 class_id 索引
#[derive(Debug, Clone)]
pub struct LabelSet {
  names: Box<[String]>,
}

#[derive(Error, Debug)]
pub enum LabelError {
  #[error("无法读取标签文件: {0}")]
  Io(#[from] std::io::Error),
  #[error("标签文件为空")]
  Empty,
}

impl LabelSet {
  /// 从换行分隔的标签列表加载，遇到第一个空行即停止
  pub fn from_reader<R: Read>(reader: R) -> Result<Self, LabelError> {
    let mut names = Vec::new();
    for line in BufReader::new(reader).lines() {
      let line = line?;
      if line.is_empty() {
        break;
      }
      names.push(line);
    }
    if names.is_empty() {
      return Err(LabelError::Empty);
    }
    Ok(Self {
      names: names.into_boxed_slice(),
    })
  }

  pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, LabelError> {
    let file = std::fs::File::open(path.as_ref())?;
    let set = Self::from_reader(file)?;
    info!("加载 {} 个标签: {}", set.len(), path.as_ref().display());
    Ok(set)
  }

  pub fn get(&self, class_id: usize) -> Option<&str> {
    self.names.get(class_id).map(String::as_str)
  }

  /// 类别名称，越界时返回占位名称
  pub fn name_or_unknown(&self, class_id: usize) -> &str {
    self.get(class_id).unwrap_or(UNKNOWN_LABEL)
  }

  pub fn len(&self) -> usize {
    self.names.len()
  }

  pub fn is_empty(&self) -> bool {
    self.names.is_empty()
  }
}
