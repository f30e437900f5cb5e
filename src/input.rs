// 该文件是 Shouyin （手音） 项目的一部分。
// src/input.rs - 录制张量输入与最新帧槽
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

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::sync::{Arc, Condvar, Mutex};

use serde::Deserialize;
use thiserror::Error;
use tracing::info;

use crate::model::RawOutput;
use crate::{FromUrl, FromUrlWithScheme};

/// JSON 行格式的单条记录: 输出形状、缓冲数据与可选时间戳
#[derive(Debug, Deserialize)]
struct TensorRecord {
  shape: Vec<usize>,
  data: Vec<f32>,
  #[serde(default)]
  timestamp_ms: Option<u64>,
}

/// 一帧回放数据
#[derive(Debug, Clone)]
pub struct RecordFrame {
  pub raw: RawOutput,
  pub timestamp_ms: Option<u64>,
}

#[derive(Error, Debug)]
pub enum RecordInputError {
  #[error("无法读取记录文件: {0}")]
  Io(#[from] std::io::Error),
  #[error("记录解析失败 (第 {line} 行): {source}")]
  Parse {
    line: usize,
    source: serde_json::Error,
  },
  #[error("记录文件没有任何帧")]
  Empty,
  #[error("记录路径必须使用 {0} 方案")]
  SchemeMismatch(&'static str),
  #[error("记录路径解码失败: {0}")]
  PathDecode(#[from] std::string::FromUtf8Error),
}

/// 录制推理输出的回放输入源。
///
/// 打开时立即读取第一条记录以确定输出形状，
/// 之后按 JSON 行逐帧迭代。
pub struct RecordInput<R: BufRead = BufReader<File>> {
  reader: R,
  pending: Option<RecordFrame>,
  shape: Box<[usize]>,
  line: usize,
}

impl RecordInput<BufReader<File>> {
  pub fn open(path: &str) -> Result<Self, RecordInputError> {
    let file = File::open(path)?;
    let input = Self::from_reader(BufReader::new(file))?;
    info!("打开记录输入: {}, 输出形状 {:?}", path, input.shape);
    Ok(input)
  }
}

impl<R: BufRead> RecordInput<R> {
  pub fn from_reader(reader: R) -> Result<Self, RecordInputError> {
    let mut input = Self {
      reader,
      pending: None,
      shape: Box::new([]),
      line: 0,
    };
    match input.read_record()? {
      Some(frame) => {
        input.shape = frame.raw.shape.clone();
        input.pending = Some(frame);
        Ok(input)
      }
      None => Err(RecordInputError::Empty),
    }
  }

  /// 第一条记录声明的输出形状
  pub fn output_shape(&self) -> &[usize] {
    &self.shape
  }

  fn read_record(&mut self) -> Result<Option<RecordFrame>, RecordInputError> {
    loop {
      let mut buf = String::new();
      if self.reader.read_line(&mut buf)? == 0 {
        return Ok(None);
      }
      self.line += 1;
      let trimmed = buf.trim();
      if trimmed.is_empty() {
        continue;
      }
      let record: TensorRecord =
        serde_json::from_str(trimmed).map_err(|source| RecordInputError::Parse {
          line: self.line,
          source,
        })?;
      return Ok(Some(RecordFrame {
        raw: RawOutput::new(record.data, record.shape),
        timestamp_ms: record.timestamp_ms,
      }));
    }
  }
}

impl<R: BufRead> Iterator for RecordInput<R> {
  type Item = Result<RecordFrame, RecordInputError>;

  fn next(&mut self) -> Option<Self::Item> {
    if let Some(frame) = self.pending.take() {
      return Some(Ok(frame));
    }
    self.read_record().transpose()
  }
}

const RECORD_SCHEME: &str = "record";

impl FromUrl for RecordInput<BufReader<File>> {
  type Error = RecordInputError;

  fn from_url(url: &url::Url) -> Result<Self, Self::Error> {
    if url.scheme() != RECORD_SCHEME {
      return Err(RecordInputError::SchemeMismatch(RECORD_SCHEME));
    }
    let path = urlencoding::decode(url.path())?;
    Self::open(&path)
  }
}

impl FromUrlWithScheme for RecordInput<BufReader<File>> {
  const SCHEME: &'static str = RECORD_SCHEME;
}

struct SlotState<T> {
  value: Option<T>,
  closed: bool,
}

/// 单生产者的“只保留最新”帧槽。
///
/// 生产者发布新帧时直接替换未被消费的旧帧，永不排队；
/// 消费者取走最新帧，槽关闭后返回 None。
pub struct LatestSlot<T> {
  inner: Arc<(Mutex<SlotState<T>>, Condvar)>,
}

impl<T> Clone for LatestSlot<T> {
  fn clone(&self) -> Self {
    Self {
      inner: Arc::clone(&self.inner),
    }
  }
}

impl<T> Default for LatestSlot<T> {
  fn default() -> Self {
    Self::new()
  }
}

impl<T> LatestSlot<T> {
  pub fn new() -> Self {
    Self {
      inner: Arc::new((
        Mutex::new(SlotState {
          value: None,
          closed: false,
        }),
        Condvar::new(),
      )),
    }
  }

  /// 发布一帧，替换尚未被取走的旧帧
  pub fn publish(&self, value: T) {
    let (lock, condvar) = &*self.inner;
    if let Ok(mut state) = lock.lock() {
      state.value = Some(value);
      condvar.notify_one();
    }
  }

  /// 关闭槽，唤醒等待中的消费者
  pub fn close(&self) {
    let (lock, condvar) = &*self.inner;
    if let Ok(mut state) = lock.lock() {
      state.closed = true;
      condvar.notify_all();
    }
  }

  /// 阻塞等待最新帧；槽已关闭且无帧时返回 None
  pub fn take_wait(&self) -> Option<T> {
    let (lock, condvar) = &*self.inner;
    let mut state = lock.lock().ok()?;
    loop {
      if let Some(value) = state.value.take() {
        return Some(value);
      }
      if state.closed {
        return None;
      }
      state = condvar.wait(state).ok()?;
    }
  }
}
