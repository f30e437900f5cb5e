// 该文件是 Shouyin （手音） 项目的一部分。
// src/args.rs - 项目参数配置
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

use clap::{Parser, ValueEnum};
use url::Url;

use shouyin::aggregate::{AggregateConfig, Mode, Policy};

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ModeArg {
  /// 只显示最近一次检测到的标签
  Single,
  /// 标签随时间累积成词句
  Continuous,
}

impl From<ModeArg> for Mode {
  fn from(value: ModeArg) -> Self {
    match value {
      ModeArg::Single => Mode::SingleLabel,
      ModeArg::Continuous => Mode::Continuous,
    }
  }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum PolicyArg {
  /// 单个增长的词缓冲
  WordBuffer,
  /// 最近标签的滚动队列
  RollingQueue,
}

impl From<PolicyArg> for Policy {
  fn from(value: PolicyArg) -> Self {
    match value {
      PolicyArg::WordBuffer => Policy::WordBuffer,
      PolicyArg::RollingQueue => Policy::RollingQueue,
    }
  }
}

/// Shouyin 项目参数配置
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 录制推理输出来源 (record:///path/to/frames.jsonl)
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,

  /// 标签文件路径（换行分隔，按 class_id 排序）
  #[arg(long, value_name = "FILE")]
  pub labels: String,

  /// 输出 (console:// 或 jsonl:///path/to/result.jsonl)
  #[arg(long, default_value = "console://", value_name = "OUTPUT")]
  pub output: Url,

  /// 置信度阈值 (0.0 - 1.0)
  #[arg(long, default_value = "0.5", value_name = "THRESHOLD")]
  pub confidence: f32,

  /// NMS IOU 阈值 (0.0 - 1.0)
  #[arg(long, default_value = "0.5", value_name = "THRESHOLD")]
  pub iou_threshold: f32,

  /// 识别模式
  #[arg(long, value_enum, default_value = "continuous")]
  pub mode: ModeArg,

  /// 连续模式下的聚合策略
  #[arg(long, value_enum, default_value = "word-buffer")]
  pub policy: PolicyArg,

  /// 同一标签的去抖窗口（毫秒）
  #[arg(long, default_value = "2000", value_name = "MS")]
  pub debounce_ms: u64,

  /// 字母间插入空格的间隔阈值（毫秒）
  #[arg(long, default_value = "2000", value_name = "MS")]
  pub letter_gap_ms: u64,

  /// 无检测后清空展示文本的延迟（毫秒）
  #[arg(long, default_value = "6000", value_name = "MS")]
  pub clear_delay_ms: u64,

  /// 滚动队列中单个标签的展示时长（毫秒）
  #[arg(long, default_value = "15000", value_name = "MS")]
  pub display_duration_ms: u64,

  /// 最大处理帧数（0 表示无限制）
  #[arg(long, default_value = "0", value_name = "COUNT")]
  pub max_frames: usize,

  /// 按记录时间戳还原帧间节奏
  #[arg(long)]
  pub paced: bool,
}

impl Args {
  pub fn aggregate_config(&self) -> AggregateConfig {
    AggregateConfig {
      mode: self.mode.into(),
      policy: self.policy.into(),
      debounce_window_ms: self.debounce_ms,
      inter_letter_gap_ms: self.letter_gap_ms,
      clear_delay_ms: self.clear_delay_ms,
      display_duration_ms: self.display_duration_ms,
      ..AggregateConfig::default()
    }
  }
}
