// 该文件是 Shouyin （手音） 项目的一部分。
// src/session.rs - 聚合会话与定时器线程
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

use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::debug;

use crate::aggregate::{AggregateConfig, Aggregator, FrameEvent, Mode, Policy, TimingConfig};

/// 会话内部的单调时钟，事件时间戳与定时器截止点共用同一时间线
#[derive(Debug, Clone, Copy)]
pub struct SessionClock {
  epoch: Instant,
}

impl SessionClock {
  fn new() -> Self {
    Self {
      epoch: Instant::now(),
    }
  }

  pub fn now_ms(&self) -> u64 {
    self.epoch.elapsed().as_millis() as u64
  }
}

enum SessionCommand {
  Event(FrameEvent),
  SetMode(Mode),
  SetPolicy(Policy),
  SetTiming(TimingConfig),
  Reset,
  Shutdown,
}

#[derive(Error, Debug)]
pub enum SessionError {
  #[error("无法启动聚合线程: {0}")]
  Spawn(#[from] std::io::Error),
  #[error("聚合线程已退出")]
  Closed,
}

/// 一条展示会话。
///
/// 聚合器不做线程同步，因此所有事件与定时器触发都被投递到
/// 本会话独占的消费线程上，在同一条时间线上串行处理；
/// 清空定时器是可取消的延迟截止点，而非阻塞等待。
/// 会话销毁时同步停止消费线程并丢弃在途状态。
pub struct Session {
  tx: Sender<SessionCommand>,
  clock: SessionClock,
  handle: Option<JoinHandle<()>>,
}

impl Session {
  /// 启动会话消费线程。线程无法创建属于致命配置错误。
  pub fn spawn<F>(config: AggregateConfig, mut on_display_text: F) -> Result<Self, SessionError>
  where
    F: FnMut(&str) + Send + 'static,
  {
    let (tx, rx) = mpsc::channel::<SessionCommand>();
    let clock = SessionClock::new();

    let handle = std::thread::Builder::new()
      .name("shouyin-aggregate".to_string())
      .spawn(move || {
        let mut aggregator = Aggregator::new(config);
        loop {
          // 先于任何新事件重新计算截止点，避免旧定时器误清空
          let command = match aggregator.next_deadline_ms() {
            Some(deadline) => {
              let wait = Duration::from_millis(deadline.saturating_sub(clock.now_ms()));
              match rx.recv_timeout(wait) {
                Ok(command) => Some(command),
                Err(RecvTimeoutError::Timeout) => None,
                Err(RecvTimeoutError::Disconnected) => break,
              }
            }
            None => match rx.recv() {
              Ok(command) => Some(command),
              Err(_) => break,
            },
          };

          let changed = match command {
            None => aggregator.on_tick(clock.now_ms()),
            Some(SessionCommand::Event(event)) => aggregator.on_event(&event),
            Some(SessionCommand::SetMode(mode)) => aggregator.set_mode(mode),
            Some(SessionCommand::SetPolicy(policy)) => aggregator.set_policy(policy),
            Some(SessionCommand::SetTiming(timing)) => aggregator.set_timing(timing),
            Some(SessionCommand::Reset) => aggregator.reset(),
            Some(SessionCommand::Shutdown) => break,
          };

          if let Some(text) = changed {
            on_display_text(&text);
          }
        }
        debug!("聚合线程退出");
      })?;

    Ok(Self {
      tx,
      clock,
      handle: Some(handle),
    })
  }

  pub fn clock(&self) -> SessionClock {
    self.clock
  }

  /// 投递一帧事件
  pub fn submit(&self, event: FrameEvent) -> Result<(), SessionError> {
    self
      .tx
      .send(SessionCommand::Event(event))
      .map_err(|_| SessionError::Closed)
  }

  pub fn set_mode(&self, mode: Mode) -> Result<(), SessionError> {
    self
      .tx
      .send(SessionCommand::SetMode(mode))
      .map_err(|_| SessionError::Closed)
  }

  pub fn set_policy(&self, policy: Policy) -> Result<(), SessionError> {
    self
      .tx
      .send(SessionCommand::SetPolicy(policy))
      .map_err(|_| SessionError::Closed)
  }

  /// 热更新时间窗口，已聚合的文本保持不变
  pub fn set_timing(&self, timing: TimingConfig) -> Result<(), SessionError> {
    self
      .tx
      .send(SessionCommand::SetTiming(timing))
      .map_err(|_| SessionError::Closed)
  }

  pub fn reset(&self) -> Result<(), SessionError> {
    self
      .tx
      .send(SessionCommand::Reset)
      .map_err(|_| SessionError::Closed)
  }
}

impl Drop for Session {
  fn drop(&mut self) {
    let _ = self.tx.send(SessionCommand::Shutdown);
    if let Some(handle) = self.handle.take() {
      let _ = handle.join();
    }
  }
}
