// 该文件是 Shouyin （手音） 项目的一部分。
// src/model.rs - 模型接口与输出张量布局
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

use serde::Serialize;
use thiserror::Error;

use crate::input::RecordFrame;

/// 几何通道数量: cx, cy, w, h
pub const GEOMETRY_CHANNELS: usize = 4;

/// 推理后端接口。
///
/// 推理引擎（NPU、TFLite 等）是外部协作者，本库只要求它对一帧输入
/// 返回原始输出张量，并在加载时给出固定的输出布局。
pub trait Model {
  type Input;
  type Error;

  fn output_layout(&self) -> OutputLayout;
  fn infer(&self, input: &Self::Input) -> Result<RawOutput, Self::Error>;
}

/// 推理原始输出: 连续的浮点缓冲区及其声明形状
#[derive(Debug, Clone)]
pub struct RawOutput {
  pub data: Box<[f32]>,
  pub shape: Box<[usize]>,
}

impl RawOutput {
  pub fn new(data: Vec<f32>, shape: Vec<usize>) -> Self {
    Self {
      data: data.into_boxed_slice(),
      shape: shape.into_boxed_slice(),
    }
  }
}

/// 输出张量布局，在模型加载时由输出形状的秩确定一次，
/// 在模型生命周期内保持不变。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputLayout {
  /// 单分类向量: [1, num_classes]
  Classification { num_classes: usize },
  /// 网格检测输出: [1, num_channels, num_elements]，
  /// 前 4 个通道为几何信息，其余通道为各类别分数
  Grid {
    num_channels: usize,
    num_elements: usize,
  },
}

#[derive(Error, Debug)]
pub enum LayoutError {
  #[error("输出形状秩无效: {0:?}")]
  InvalidRank(Box<[usize]>),
  #[error("网格布局通道数不足: {0}, 几何通道之外至少需要一个类别通道")]
  TooFewChannels(usize),
  #[error("网格布局尺寸溢出: {0} 通道 x {1} 元素")]
  Oversized(usize, usize),
}

impl OutputLayout {
  /// 根据输出形状确定布局: 秩 2 为分类，秩 >=3 为网格
  pub fn from_shape(shape: &[usize]) -> Result<Self, LayoutError> {
    match shape.len() {
      0 | 1 => Err(LayoutError::InvalidRank(shape.into())),
      2 => Ok(OutputLayout::Classification {
        num_classes: shape[1],
      }),
      _ => {
        let num_channels = shape[1];
        if num_channels <= GEOMETRY_CHANNELS {
          return Err(LayoutError::TooFewChannels(num_channels));
        }
        let num_elements = shape[2];
        // 形状来自外部文件，通道与元素数的乘积必须可表示
        if num_channels.checked_mul(num_elements).is_none() {
          return Err(LayoutError::Oversized(num_channels, num_elements));
        }
        Ok(OutputLayout::Grid {
          num_channels,
          num_elements,
        })
      }
    }
  }

  /// 布局声明的缓冲区长度
  pub fn expected_len(&self) -> usize {
    match self {
      OutputLayout::Classification { num_classes } => *num_classes,
      OutputLayout::Grid {
        num_channels,
        num_elements,
      } => num_channels * num_elements,
    }
  }
}

/// 检测结果
#[derive(Clone, Debug, Serialize)]
pub struct Detection {
  /// 边界框左上角 x 坐标（归一化）
  pub x1: f32,
  /// 边界框左上角 y 坐标（归一化）
  pub y1: f32,
  /// 边界框右下角 x 坐标（归一化）
  pub x2: f32,
  /// 边界框右下角 y 坐标（归一化）
  pub y2: f32,
  /// 边界框中心 x 坐标
  pub cx: f32,
  /// 边界框中心 y 坐标
  pub cy: f32,
  /// 边界框宽度
  pub w: f32,
  /// 边界框高度
  pub h: f32,
  /// 置信度
  pub confidence: f32,
  /// 类别索引
  pub class_id: usize,
  /// 类别名称
  pub class_name: String,
}

/// 回放推理后端。
///
/// 原始应用在设备上运行 TFLite 推理；本后端直接回放录制好的
/// 输出张量，使整条流水线无需推理硬件即可端到端运行。
pub struct ReplayModel {
  layout: OutputLayout,
}

#[derive(Error, Debug)]
pub enum ReplayError {
  #[error("回放帧形状与模型布局不一致: 期望 {expected:?}, 实际 {actual:?}")]
  ShapeMismatch {
    expected: Box<[usize]>,
    actual: Box<[usize]>,
  },
}

impl ReplayModel {
  pub fn new(output_shape: &[usize]) -> Result<Self, LayoutError> {
    let layout = OutputLayout::from_shape(output_shape)?;
    Ok(Self { layout })
  }

  fn expected_shape(&self) -> Box<[usize]> {
    match self.layout {
      OutputLayout::Classification { num_classes } => vec![1, num_classes].into(),
      OutputLayout::Grid {
        num_channels,
        num_elements,
      } => vec![1, num_channels, num_elements].into(),
    }
  }
}

impl Model for ReplayModel {
  type Input = RecordFrame;
  type Error = ReplayError;

  fn output_layout(&self) -> OutputLayout {
    self.layout
  }

  fn infer(&self, input: &Self::Input) -> Result<RawOutput, Self::Error> {
    match OutputLayout::from_shape(&input.raw.shape) {
      Ok(layout) if layout == self.layout => Ok(input.raw.clone()),
      _ => Err(ReplayError::ShapeMismatch {
        expected: self.expected_shape(),
        actual: input.raw.shape.clone(),
      }),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn layout_from_rank_two_is_classification() {
    let layout = OutputLayout::from_shape(&[1, 26]).unwrap();
    assert_eq!(layout, OutputLayout::Classification { num_classes: 26 });
    assert_eq!(layout.expected_len(), 26);
  }

  #[test]
  fn layout_from_rank_three_is_grid() {
    let layout = OutputLayout::from_shape(&[1, 6, 2]).unwrap();
    assert_eq!(
      layout,
      OutputLayout::Grid {
        num_channels: 6,
        num_elements: 2
      }
    );
    assert_eq!(layout.expected_len(), 12);
  }

  #[test]
  fn layout_rejects_low_rank_and_thin_grid() {
    assert!(matches!(
      OutputLayout::from_shape(&[8]),
      Err(LayoutError::InvalidRank(_))
    ));
    assert!(matches!(
      OutputLayout::from_shape(&[1, 4, 10]),
      Err(LayoutError::TooFewChannels(4))
    ));
  }

  #[test]
  fn layout_rejects_overflowing_grid_dimensions() {
    assert!(matches!(
      OutputLayout::from_shape(&[1, usize::MAX, 2]),
      Err(LayoutError::Oversized(_, _))
    ));
  }
}
