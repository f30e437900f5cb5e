// 该文件是 Shouyin （手音） 项目的一部分。
// src/aggregate.rs - 检测结果的时间聚合
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

use std::collections::VecDeque;

use tracing::debug;

/// 默认去抖窗口
pub const DEFAULT_DEBOUNCE_WINDOW_MS: u64 = 2000;
/// 默认字母间隔阈值，超过则在字母前插入空格
pub const DEFAULT_INTER_LETTER_GAP_MS: u64 = 2000;
/// 默认清空延迟
pub const DEFAULT_CLEAR_DELAY_MS: u64 = 6000;
/// 滚动队列中单个标签的默认展示时长
pub const DEFAULT_DISPLAY_DURATION_MS: u64 = 15000;
/// 每行最大字符数
pub const DEFAULT_MAX_LINE_CHARS: usize = 20;
/// 最多展示行数
pub const DEFAULT_MAX_LINES: usize = 2;

/// 识别模式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
  /// 只显示最近一次检测到的标签
  SingleLabel,
  /// 连续模式: 标签随时间累积成词句
  Continuous,
}

/// 连续模式下的聚合策略
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Policy {
  /// 单个增长的词缓冲，空闲一段时间后整体清空
  WordBuffer,
  /// 最近标签的滚动队列，每个标签到期后单独移除
  RollingQueue,
}

#[derive(Debug, Clone)]
pub struct AggregateConfig {
  pub mode: Mode,
  pub policy: Policy,
  pub debounce_window_ms: u64,
  pub inter_letter_gap_ms: u64,
  pub clear_delay_ms: u64,
  pub display_duration_ms: u64,
  pub max_line_chars: usize,
  pub max_lines: usize,
}

impl Default for AggregateConfig {
  fn default() -> Self {
    Self {
      mode: Mode::Continuous,
      policy: Policy::WordBuffer,
      debounce_window_ms: DEFAULT_DEBOUNCE_WINDOW_MS,
      inter_letter_gap_ms: DEFAULT_INTER_LETTER_GAP_MS,
      clear_delay_ms: DEFAULT_CLEAR_DELAY_MS,
      display_duration_ms: DEFAULT_DISPLAY_DURATION_MS,
      max_line_chars: DEFAULT_MAX_LINE_CHARS,
      max_lines: DEFAULT_MAX_LINES,
    }
  }
}

/// 可在会话运行中热更新的时间窗口
#[derive(Debug, Clone, Copy)]
pub struct TimingConfig {
  pub debounce_window_ms: u64,
  pub inter_letter_gap_ms: u64,
  pub clear_delay_ms: u64,
  pub display_duration_ms: u64,
}

impl From<&AggregateConfig> for TimingConfig {
  fn from(config: &AggregateConfig) -> Self {
    Self {
      debounce_window_ms: config.debounce_window_ms,
      inter_letter_gap_ms: config.inter_letter_gap_ms,
      clear_delay_ms: config.clear_delay_ms,
      display_duration_ms: config.display_duration_ms,
    }
  }
}

/// 每帧事件: 检测到标签，或该帧没有检测
#[derive(Debug, Clone)]
pub enum FrameEvent {
  Detected {
    label: String,
    confidence: f32,
    timestamp_ms: u64,
  },
  Empty { timestamp_ms: u64 },
}

/// 每会话的聚合状态机。
///
/// 本类型不做线程同步，所有事件与定时器触发必须在同一条
/// 逻辑时间线上串行送入（见 session 模块）。
pub struct Aggregator {
  config: AggregateConfig,
  word_buffer: String,
  last_label: Option<String>,
  last_event_ms: u64,
  clear_deadline_ms: Option<u64>,
  queue: VecDeque<(String, u64)>,
  display: String,
}

impl Aggregator {
  pub fn new(config: AggregateConfig) -> Self {
    Self {
      config,
      word_buffer: String::new(),
      last_label: None,
      last_event_ms: 0,
      clear_deadline_ms: None,
      queue: VecDeque::new(),
      display: String::new(),
    }
  }

  pub fn config(&self) -> &AggregateConfig {
    &self.config
  }

  pub fn display_text(&self) -> &str {
    &self.display
  }

  /// 清空全部聚合状态，展示文本变化时返回新文本
  pub fn reset(&mut self) -> Option<String> {
    self.word_buffer.clear();
    self.last_label = None;
    self.last_event_ms = 0;
    self.clear_deadline_ms = None;
    self.queue.clear();
    self.refresh_display(String::new())
  }

  /// 切换识别模式，丢弃全部状态
  pub fn set_mode(&mut self, mode: Mode) -> Option<String> {
    self.config.mode = mode;
    self.reset()
  }

  /// 切换聚合策略，丢弃全部状态
  pub fn set_policy(&mut self, policy: Policy) -> Option<String> {
    self.config.policy = policy;
    self.reset()
  }

  /// 热更新时间窗口，保留已聚合的文本。
  /// 已武装的清空截止点按新延迟相对最后一次事件重新计算；
  /// 滚动队列中已有标签保留入队时的到期点。
  pub fn set_timing(&mut self, timing: TimingConfig) -> Option<String> {
    self.config.debounce_window_ms = timing.debounce_window_ms;
    self.config.inter_letter_gap_ms = timing.inter_letter_gap_ms;
    self.config.clear_delay_ms = timing.clear_delay_ms;
    self.config.display_duration_ms = timing.display_duration_ms;
    if self.clear_deadline_ms.is_some() {
      self.clear_deadline_ms = Some(self.last_event_ms + timing.clear_delay_ms);
    }
    None
  }

  /// 下一次需要触发定时器的时间点
  pub fn next_deadline_ms(&self) -> Option<u64> {
    match (self.config.mode, self.config.policy) {
      (Mode::SingleLabel, _) => None,
      (Mode::Continuous, Policy::WordBuffer) => self.clear_deadline_ms,
      (Mode::Continuous, Policy::RollingQueue) => {
        self.queue.iter().map(|(_, expiry)| *expiry).min()
      }
    }
  }

  /// 送入一帧事件，展示文本变化时返回新文本
  pub fn on_event(&mut self, event: &FrameEvent) -> Option<String> {
    match event {
      FrameEvent::Empty { .. } => None,
      FrameEvent::Detected {
        label,
        timestamp_ms,
        ..
      } => {
        if label.is_empty() {
          return None;
        }
        match self.config.mode {
          Mode::SingleLabel => {
            let text = label.clone();
            self.refresh_display(text)
          }
          Mode::Continuous => self.on_continuous(label, *timestamp_ms),
        }
      }
    }
  }

  /// 触发到期的定时器，展示文本变化时返回新文本
  pub fn on_tick(&mut self, now_ms: u64) -> Option<String> {
    match (self.config.mode, self.config.policy) {
      (Mode::SingleLabel, _) => None,
      (Mode::Continuous, Policy::WordBuffer) => {
        if self.clear_deadline_ms.is_some_and(|d| d <= now_ms) {
          debug!("清空定时器触发，丢弃词缓冲");
          self.clear_deadline_ms = None;
          self.word_buffer.clear();
          self.refresh_display(String::new())
        } else {
          None
        }
      }
      (Mode::Continuous, Policy::RollingQueue) => {
        let before = self.queue.len();
        self.queue.retain(|(_, expiry)| *expiry > now_ms);
        if self.queue.len() == before {
          return None;
        }
        let text = self.joined_queue();
        self.refresh_display(text)
      }
    }
  }

  fn on_continuous(&mut self, label: &str, timestamp_ms: u64) -> Option<String> {
    let gap = timestamp_ms.saturating_sub(self.last_event_ms);

    // 去抖: 同一标签在窗口内重复出现，整个事件忽略
    if self.last_label.as_deref() == Some(label) && gap < self.config.debounce_window_ms {
      return None;
    }

    match self.config.policy {
      Policy::WordBuffer => {
        self.append_to_buffer(label, gap);
        self.last_label = Some(label.to_string());
        self.last_event_ms = timestamp_ms;
        // 每个被接受的事件都重新武装清空定时器
        self.clear_deadline_ms = Some(timestamp_ms + self.config.clear_delay_ms);
        let text = self.wrapped_buffer();
        self.refresh_display(text)
      }
      Policy::RollingQueue => {
        self
          .queue
          .push_back((label.to_string(), timestamp_ms + self.config.display_duration_ms));
        self.last_label = Some(label.to_string());
        self.last_event_ms = timestamp_ms;
        let text = self.joined_queue();
        self.refresh_display(text)
      }
    }
  }

  /// 单字符标签按字母累积，多字符标签按词句用空格包围
  fn append_to_buffer(&mut self, label: &str, gap: u64) {
    let is_letter = label.chars().count() == 1;
    if is_letter {
      if gap > self.config.inter_letter_gap_ms
        && !self.word_buffer.is_empty()
        && !self.word_buffer.ends_with(' ')
      {
        self.word_buffer.push(' ');
      }
      self.word_buffer.push_str(label);
    } else {
      if !self.word_buffer.is_empty() && !self.word_buffer.ends_with(' ') {
        self.word_buffer.push(' ');
      }
      self.word_buffer.push_str(label);
      self.word_buffer.push(' ');
    }
  }

  /// 将词缓冲按固定行宽折行，只保留最后几行
  fn wrapped_buffer(&self) -> String {
    let width = self.config.max_line_chars.max(1);
    let chars: Vec<char> = self.word_buffer.trim().chars().collect();
    let lines: Vec<String> = chars.chunks(width).map(|c| c.iter().collect()).collect();
    let start = lines.len().saturating_sub(self.config.max_lines.max(1));
    lines[start..].join("\n")
  }

  fn joined_queue(&self) -> String {
    self
      .queue
      .iter()
      .map(|(label, _)| label.as_str())
      .collect::<Vec<_>>()
      .join(" ")
  }

  fn refresh_display(&mut self, text: String) -> Option<String> {
    if text == self.display {
      None
    } else {
      self.display = text;
      Some(self.display.clone())
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn detected(label: &str, timestamp_ms: u64) -> FrameEvent {
    FrameEvent::Detected {
      label: label.to_string(),
      confidence: 0.9,
      timestamp_ms,
    }
  }

  fn aggregator() -> Aggregator {
    Aggregator::new(AggregateConfig::default())
  }

  #[test]
  fn single_label_mode_shows_latest_label_verbatim() {
    let mut agg = Aggregator::new(AggregateConfig {
      mode: Mode::SingleLabel,
      ..AggregateConfig::default()
    });
    assert_eq!(agg.on_event(&detected("Hello", 0)), Some("Hello".into()));
    // 空帧不影响已有文本
    assert_eq!(agg.on_event(&FrameEvent::Empty { timestamp_ms: 100 }), None);
    assert_eq!(agg.display_text(), "Hello");
    assert_eq!(agg.on_event(&detected("Thanks", 200)), Some("Thanks".into()));
    assert_eq!(agg.next_deadline_ms(), None);
  }

  #[test]
  fn debounce_drops_repeat_within_window() {
    let mut agg = aggregator();
    assert_eq!(agg.on_event(&detected("A", 0)), Some("A".into()));
    // 窗口内的重复: 整个事件被忽略，定时器也不重置
    assert_eq!(agg.on_event(&detected("A", 500)), None);
    assert_eq!(agg.next_deadline_ms(), Some(DEFAULT_CLEAR_DELAY_MS));
    // 超过窗口后同一标签重新接受
    assert_eq!(agg.on_event(&detected("A", 2500)), Some("A A".into()));
  }

  #[test]
  fn small_gap_letters_accrete_into_a_word() {
    let mut agg = aggregator();
    agg.on_event(&detected("A", 0));
    assert_eq!(agg.on_event(&detected("B", 500)), Some("AB".into()));
  }

  #[test]
  fn large_gap_inserts_word_break() {
    let mut agg = aggregator();
    agg.on_event(&detected("A", 0));
    assert_eq!(agg.on_event(&detected("B", 2500)), Some("A B".into()));
  }

  #[test]
  fn multi_char_labels_are_whole_words() {
    let mut agg = aggregator();
    agg.on_event(&detected("A", 0));
    assert_eq!(agg.on_event(&detected("Hello", 300)), Some("A Hello".into()));
    assert_eq!(agg.on_event(&detected("B", 600)), Some("A Hello B".into()));
  }

  #[test]
  fn empty_label_is_ignored() {
    let mut agg = aggregator();
    assert_eq!(agg.on_event(&detected("", 0)), None);
    assert_eq!(agg.display_text(), "");
    assert_eq!(agg.next_deadline_ms(), None);
  }

  #[test]
  fn clear_timer_empties_buffer_after_idle() {
    let mut agg = aggregator();
    agg.on_event(&detected("A", 1000));
    assert_eq!(agg.next_deadline_ms(), Some(1000 + DEFAULT_CLEAR_DELAY_MS));
    // 截止前不触发
    assert_eq!(agg.on_tick(1000 + DEFAULT_CLEAR_DELAY_MS - 1), None);
    assert_eq!(
      agg.on_tick(1000 + DEFAULT_CLEAR_DELAY_MS),
      Some(String::new())
    );
    assert_eq!(agg.next_deadline_ms(), None);
  }

  #[test]
  fn new_detection_rearms_clear_timer() {
    let mut agg = aggregator();
    agg.on_event(&detected("A", 0));
    agg.on_event(&detected("B", 3000));
    assert_eq!(agg.next_deadline_ms(), Some(3000 + DEFAULT_CLEAR_DELAY_MS));
    // 旧截止点不再生效
    assert_eq!(agg.on_tick(DEFAULT_CLEAR_DELAY_MS), None);
    assert_eq!(agg.display_text(), "A B");
  }

  #[test]
  fn empty_frames_do_not_touch_continuous_state() {
    let mut agg = aggregator();
    agg.on_event(&detected("A", 0));
    assert_eq!(agg.on_event(&FrameEvent::Empty { timestamp_ms: 5000 }), None);
    assert_eq!(agg.display_text(), "A");
    assert_eq!(agg.next_deadline_ms(), Some(DEFAULT_CLEAR_DELAY_MS));
  }

  #[test]
  fn display_keeps_only_last_lines_of_wrapped_buffer() {
    let mut agg = Aggregator::new(AggregateConfig {
      max_line_chars: 4,
      max_lines: 2,
      ..AggregateConfig::default()
    });
    let mut t = 0;
    let mut last = None;
    for label in ["A", "B", "C", "D", "E", "F", "G", "H", "I", "J"] {
      last = agg.on_event(&detected(label, t)).or(last);
      t += 100;
    }
    // 缓冲为 ABCDEFGHIJ，折行为 ABCD/EFGH/IJ，仅保留后两行
    assert_eq!(last, Some("EFGH\nIJ".into()));
  }

  #[test]
  fn rolling_queue_joins_labels_and_expires_each_once() {
    let mut agg = Aggregator::new(AggregateConfig {
      policy: Policy::RollingQueue,
      ..AggregateConfig::default()
    });
    assert_eq!(agg.on_event(&detected("Hello", 0)), Some("Hello".into()));
    assert_eq!(
      agg.on_event(&detected("World", 3000)),
      Some("Hello World".into())
    );
    assert_eq!(agg.next_deadline_ms(), Some(DEFAULT_DISPLAY_DURATION_MS));
    // 第一个标签到期
    assert_eq!(
      agg.on_tick(DEFAULT_DISPLAY_DURATION_MS),
      Some("World".into())
    );
    // 第二个标签到期
    assert_eq!(
      agg.on_tick(3000 + DEFAULT_DISPLAY_DURATION_MS),
      Some(String::new())
    );
    assert_eq!(agg.next_deadline_ms(), None);
  }

  #[test]
  fn rolling_queue_debounces_repeats() {
    let mut agg = Aggregator::new(AggregateConfig {
      policy: Policy::RollingQueue,
      ..AggregateConfig::default()
    });
    agg.on_event(&detected("Hi", 0));
    assert_eq!(agg.on_event(&detected("Hi", 1000)), None);
    assert_eq!(agg.on_event(&detected("Hi", 2500)), Some("Hi Hi".into()));
  }

  #[test]
  fn timing_update_keeps_text_and_rearms_clear_deadline() {
    let mut agg = aggregator();
    agg.on_event(&detected("A", 1000));
    assert_eq!(
      agg.set_timing(TimingConfig {
        debounce_window_ms: 100,
        inter_letter_gap_ms: 100,
        clear_delay_ms: 500,
        display_duration_ms: DEFAULT_DISPLAY_DURATION_MS,
      }),
      None
    );
    // 文本保留，截止点按新延迟相对最后一次事件重算
    assert_eq!(agg.display_text(), "A");
    assert_eq!(agg.next_deadline_ms(), Some(1500));
    // 新去抖窗口立即生效: 同一标签 300 ms 后即被接受
    assert_eq!(agg.on_event(&detected("A", 1300)), Some("A A".into()));
  }

  #[test]
  fn switching_mode_discards_state() {
    let mut agg = aggregator();
    agg.on_event(&detected("A", 0));
    assert_eq!(agg.set_mode(Mode::SingleLabel), Some(String::new()));
    assert_eq!(agg.display_text(), "");
    assert_eq!(agg.next_deadline_ms(), None);
  }

  #[test]
  fn switching_policy_discards_state() {
    let mut agg = aggregator();
    agg.on_event(&detected("A", 0));
    assert_eq!(agg.set_policy(Policy::RollingQueue), Some(String::new()));
    agg.on_event(&detected("B", 10_000));
    assert_eq!(agg.display_text(), "B");
  }
}
