// 该文件是 Shouyin （手音） 项目的一部分。
// src/output.rs - 检测与文本的呈现输出
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
use std::io::{BufWriter, Write};
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tracing::info;
use url::Url;

use crate::model::Detection;
use crate::{FromUrl, FromUrlWithScheme};

/// 呈现端接口: 每帧接收检测框，聚合状态变化时接收展示文本
pub trait Present {
  type Error;

  fn on_detections(
    &mut self,
    detections: &[Detection],
    inference_time_ms: u64,
  ) -> Result<(), Self::Error>;

  fn on_display_text(&mut self, text: &str) -> Result<(), Self::Error>;
}

/// 控制台呈现，通过 tracing 输出
#[derive(Debug, Default)]
pub struct ConsolePresent;

impl Present for ConsolePresent {
  type Error = std::convert::Infallible;

  fn on_detections(
    &mut self,
    detections: &[Detection],
    inference_time_ms: u64,
  ) -> Result<(), Self::Error> {
    for det in detections {
      info!(
        "检测: {} {:.1}% @ ({:.2}, {:.2}, {:.2}x{:.2}), 推理耗时 {} ms",
        det.class_name,
        det.confidence * 100.0,
        det.x1,
        det.y1,
        det.w,
        det.h,
        inference_time_ms
      );
    }
    Ok(())
  }

  fn on_display_text(&mut self, text: &str) -> Result<(), Self::Error> {
    info!("展示文本: {:?}", text);
    Ok(())
  }
}

const CONSOLE_SCHEME: &str = "console";

impl FromUrl for ConsolePresent {
  type Error = OutputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != CONSOLE_SCHEME {
      return Err(OutputError::SchemeMismatch);
    }
    Ok(ConsolePresent)
  }
}

impl FromUrlWithScheme for ConsolePresent {
  const SCHEME: &'static str = CONSOLE_SCHEME;
}

#[derive(Error, Debug)]
pub enum JsonLinesError {
  #[error("无法写入输出文件: {0}")]
  Io(#[from] std::io::Error),
  #[error("结果序列化失败: {0}")]
  Json(#[from] serde_json::Error),
}

/// JSON 行文件呈现，供下游工具消费
pub struct JsonLinesPresent {
  writer: BufWriter<File>,
}

impl JsonLinesPresent {
  pub fn create(path: &str) -> Result<Self, JsonLinesError> {
    let file = File::create(path)?;
    Ok(Self {
      writer: BufWriter::new(file),
    })
  }

  fn write_line(&mut self, value: serde_json::Value) -> Result<(), JsonLinesError> {
    serde_json::to_writer(&mut self.writer, &value)?;
    self.writer.write_all(b"\n")?;
    self.writer.flush()?;
    Ok(())
  }
}

impl Present for JsonLinesPresent {
  type Error = JsonLinesError;

  fn on_detections(
    &mut self,
    detections: &[Detection],
    inference_time_ms: u64,
  ) -> Result<(), Self::Error> {
    self.write_line(serde_json::json!({
      "event": "detections",
      "inference_time_ms": inference_time_ms,
      "boxes": detections,
    }))
  }

  fn on_display_text(&mut self, text: &str) -> Result<(), Self::Error> {
    self.write_line(serde_json::json!({
      "event": "display_text",
      "text": text,
    }))
  }
}

const JSONL_SCHEME: &str = "jsonl";

impl FromUrl for JsonLinesPresent {
  type Error = OutputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != JSONL_SCHEME {
      return Err(OutputError::SchemeMismatch);
    }
    let path = urlencoding::decode(url.path())?;
    Ok(Self::create(&path)?)
  }
}

impl FromUrlWithScheme for JsonLinesPresent {
  const SCHEME: &'static str = JSONL_SCHEME;
}

#[derive(Error, Debug)]
pub enum OutputError {
  #[error("JSON 行输出错误: {0}")]
  JsonLines(#[from] JsonLinesError),
  #[error("输出路径解码失败: {0}")]
  PathDecode(#[from] std::string::FromUtf8Error),
  #[error("URI 方案不匹配")]
  SchemeMismatch,
}

pub enum OutputWrapper {
  Console(ConsolePresent),
  JsonLines(JsonLinesPresent),
}

impl FromUrl for OutputWrapper {
  type Error = OutputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    match url.scheme() {
      CONSOLE_SCHEME => Ok(OutputWrapper::Console(ConsolePresent::from_url(url)?)),
      JSONL_SCHEME => Ok(OutputWrapper::JsonLines(JsonLinesPresent::from_url(url)?)),
      _ => Err(OutputError::SchemeMismatch),
    }
  }
}

impl Present for OutputWrapper {
  type Error = OutputError;

  fn on_detections(
    &mut self,
    detections: &[Detection],
    inference_time_ms: u64,
  ) -> Result<(), Self::Error> {
    match self {
      OutputWrapper::Console(output) => output
        .on_detections(detections, inference_time_ms)
        .map_err(|e| match e {}),
      OutputWrapper::JsonLines(output) => output
        .on_detections(detections, inference_time_ms)
        .map_err(OutputError::from),
    }
  }

  fn on_display_text(&mut self, text: &str) -> Result<(), Self::Error> {
    match self {
      OutputWrapper::Console(output) => output.on_display_text(text).map_err(|e| match e {}),
      OutputWrapper::JsonLines(output) => {
        output.on_display_text(text).map_err(OutputError::from)
      }
    }
  }
}

/// 可跨线程共享的呈现端。
/// 检测框来自任务线程，展示文本来自会话线程，两者共用一个底层输出。
pub struct SharedPresent<P> {
  inner: Arc<Mutex<P>>,
}

impl<P> Clone for SharedPresent<P> {
  fn clone(&self) -> Self {
    Self {
      inner: Arc::clone(&self.inner),
    }
  }
}

impl<P: Present> SharedPresent<P> {
  pub fn new(present: P) -> Self {
    Self {
      inner: Arc::new(Mutex::new(present)),
    }
  }
}

impl<P: Present> Present for SharedPresent<P> {
  type Error = P::Error;

  fn on_detections(
    &mut self,
    detections: &[Detection],
    inference_time_ms: u64,
  ) -> Result<(), Self::Error> {
    match self.inner.lock() {
      Ok(mut present) => present.on_detections(detections, inference_time_ms),
      Err(_) => Ok(()),
    }
  }

  fn on_display_text(&mut self, text: &str) -> Result<(), Self::Error> {
    match self.inner.lock() {
      Ok(mut present) => present.on_display_text(text),
      Err(_) => Ok(()),
    }
  }
}
