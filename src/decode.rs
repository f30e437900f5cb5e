// 该文件是 Shouyin （手音） 项目的一部分。
// src/decode.rs - 输出张量解码
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

use crate::label::LabelSet;
use crate::model::{Detection, GEOMETRY_CHANNELS, OutputLayout, RawOutput};

/// 默认置信度阈值
pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.5;

#[derive(Error, Debug)]
pub enum DecodeError {
  #[error("输出缓冲区长度与布局不一致: 期望 {expected}, 实际 {actual}")]
  BufferMismatch { expected: usize, actual: usize },
}

/// 将原始输出张量解码为未排序的候选检测。
///
/// 无检测返回空序列，属于正常结果；缓冲区长度与声明布局不符
/// 则是该帧的硬错误，由调用方丢帧并记录。
pub fn decode(
  raw: &RawOutput,
  layout: &OutputLayout,
  labels: &LabelSet,
  confidence_threshold: f32,
) -> Result<Vec<Detection>, DecodeError> {
  let expected = layout.expected_len();
  if raw.data.len() != expected {
    return Err(DecodeError::BufferMismatch {
      expected,
      actual: raw.data.len(),
    });
  }

  let detections = match *layout {
    OutputLayout::Classification { num_classes } => {
      decode_classification(&raw.data, num_classes, labels, confidence_threshold)
    }
    OutputLayout::Grid {
      num_channels,
      num_elements,
    } => decode_grid(
      &raw.data,
      num_channels,
      num_elements,
      labels,
      confidence_threshold,
    ),
  };

  debug!("解码得到 {} 个候选", detections.len());
  Ok(detections)
}

/// 分类模型按检测约定输出: 取最大分数类别，
/// 边界框为固定的居中区域，便于下游复用同一接口
fn decode_classification(
  data: &[f32],
  num_classes: usize,
  labels: &LabelSet,
  confidence_threshold: f32,
) -> Vec<Detection> {
  let mut max_idx = 0usize;
  let mut max_conf = f32::MIN;
  for class_id in 0..num_classes {
    if data[class_id] > max_conf {
      max_conf = data[class_id];
      max_idx = class_id;
    }
  }

  if max_conf <= confidence_threshold {
    return Vec::new();
  }

  vec![Detection {
    x1: 0.1,
    y1: 0.1,
    x2: 0.9,
    y2: 0.9,
    cx: 0.5,
    cy: 0.5,
    w: 0.8,
    h: 0.8,
    confidence: max_conf,
    class_id: max_idx,
    class_name: labels.name_or_unknown(max_idx).to_string(),
  }]
}

/// 网格输出按通道主序存放: data[ch * num_elements + c]。
/// 每列先在类别通道上取最大分数，再从前 4 个通道读取几何信息。
fn decode_grid(
  data: &[f32],
  num_channels: usize,
  num_elements: usize,
  labels: &LabelSet,
  confidence_threshold: f32,
) -> Vec<Detection> {
  let mut detections = Vec::new();

  for c in 0..num_elements {
    let mut max_conf = f32::MIN;
    let mut max_idx = 0usize;
    for ch in GEOMETRY_CHANNELS..num_channels {
      let score = data[ch * num_elements + c];
      if score > max_conf {
        max_conf = score;
        max_idx = ch - GEOMETRY_CHANNELS;
      }
    }

    if max_conf <= confidence_threshold {
      continue;
    }

    let cx = data[c];
    let cy = data[num_elements + c];
    let w = data[2 * num_elements + c];
    let h = data[3 * num_elements + c];
    let x1 = cx - w / 2.0;
    let y1 = cy - h / 2.0;
    let x2 = cx + w / 2.0;
    let y2 = cy + h / 2.0;

    // 图像边缘的畸形几何信息，丢弃该候选并继续
    if !(0.0..=1.0).contains(&x1)
      || !(0.0..=1.0).contains(&y1)
      || !(0.0..=1.0).contains(&x2)
      || !(0.0..=1.0).contains(&y2)
    {
      continue;
    }

    detections.push(Detection {
      x1,
      y1,
      x2,
      y2,
      cx,
      cy,
      w,
      h,
      confidence: max_conf,
      class_id: max_idx,
      class_name: labels.name_or_unknown(max_idx).to_string(),
    });
  }

  detections
}
