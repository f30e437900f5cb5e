// 该文件是 Shouyin （手音） 项目的一部分。
// src/task.rs - 识别任务
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

use std::time::Duration;

use tracing::{error, info, warn};

use crate::aggregate::FrameEvent;
use crate::decode::{DEFAULT_CONFIDENCE_THRESHOLD, DecodeError, decode};
use crate::input::{LatestSlot, RecordFrame};
use crate::label::LabelSet;
use crate::model::{Detection, Model, OutputLayout, RawOutput};
use crate::output::Present;
use crate::session::Session;
use crate::suppress::{DEFAULT_IOU_THRESHOLD, suppress};

/// 每帧的纯处理管线: 解码后做非极大值抑制。
/// 无内部状态，可在任意线程重入调用；两个阈值可在帧间热更新。
pub struct Pipeline {
  pub layout: OutputLayout,
  pub labels: LabelSet,
  pub confidence_threshold: f32,
  pub iou_threshold: f32,
}

impl Pipeline {
  pub fn new(layout: OutputLayout, labels: LabelSet) -> Self {
    Self {
      layout,
      labels,
      confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
      iou_threshold: DEFAULT_IOU_THRESHOLD,
    }
  }

  pub fn process(&self, raw: &RawOutput) -> Result<Vec<Detection>, DecodeError> {
    let candidates = decode(raw, &self.layout, &self.labels, self.confidence_threshold)?;
    Ok(suppress(candidates, self.iou_threshold))
  }
}

/// 带时间戳的帧，回放时用于还原帧间节奏
pub trait FrameMeta {
  fn timestamp_ms(&self) -> Option<u64>;
}

impl FrameMeta for RecordFrame {
  fn timestamp_ms(&self) -> Option<u64> {
    self.timestamp_ms
  }
}

pub trait Task<I, M, O>: Sized {
  type Error;
  fn run_task(self, input: I, model: M, output: O) -> Result<(), Self::Error>;
}

/// 单帧任务: 取一帧，推理并呈现检测结果
pub struct OneShotTask {
  pub pipeline: Pipeline,
}

impl<
  F,
  ME: std::error::Error + Sync + Send + 'static,
  RE: std::error::Error + Sync + Send + 'static,
  I: Iterator<Item = F>,
  M: Model<Input = F, Error = ME>,
  O: Present<Error = RE>,
> Task<I, M, O> for OneShotTask
{
  type Error = anyhow::Error;

  fn run_task(self, mut input: I, model: M, mut output: O) -> Result<(), Self::Error> {
    info!("开始任务...");
    let frame = input.next().ok_or_else(|| anyhow::anyhow!("没有输入帧"))?;
    let now = std::time::Instant::now();
    let raw = model.infer(&frame)?;
    let elapsed = now.elapsed();
    info!("推理完成，耗时: {:.2?}", elapsed);
    let detections = self.pipeline.process(&raw)?;
    info!("检测到 {} 个目标", detections.len());
    output.on_detections(&detections, elapsed.as_millis() as u64)?;
    Ok(())
  }
}

/// 连续识别任务。
///
/// 生产线程把帧发布到“只保留最新”的帧槽，消费循环对每帧
/// 推理、解码、抑制，再把结果作为事件投递给聚合会话。
pub struct ContinuousTask {
  pipeline: Pipeline,
  session: Session,
  frame_number: Option<usize>,
  paced: bool,
}

impl ContinuousTask {
  pub fn new(pipeline: Pipeline, session: Session) -> Self {
    Self {
      pipeline,
      session,
      frame_number: None,
      paced: false,
    }
  }

  pub fn with_frame_number(mut self, frame_number: Option<usize>) -> Self {
    self.frame_number = frame_number;
    self
  }

  /// 按记录的时间戳差值还原帧间节奏
  pub fn with_pacing(mut self, paced: bool) -> Self {
    self.paced = paced;
    self
  }
}

impl<
  F: FrameMeta + Send + 'static,
  ME: std::error::Error + Sync + Send + 'static,
  RE: std::error::Error + Sync + Send + 'static,
  I: Iterator<Item = F> + Send + 'static,
  M: Model<Input = F, Error = ME>,
  O: Present<Error = RE>,
> Task<I, M, O> for ContinuousTask
{
  type Error = anyhow::Error;

  fn run_task(self, input: I, model: M, mut output: O) -> Result<(), Self::Error> {
    info!("开始连续识别任务...");
    let (tx, rx) = std::sync::mpsc::channel();

    ctrlc::set_handler(move || {
      info!("收到中断信号，准备退出...");
      let _ = tx.send(());
    })
    .expect("Error setting Ctrl-C handler");

    let slot = LatestSlot::new();
    let paced = self.paced;
    {
      let slot = slot.clone();
      std::thread::spawn(move || {
        let mut last_ts: Option<u64> = None;
        for frame in input {
          if paced {
            if let (Some(prev), Some(cur)) = (last_ts, frame.timestamp_ms()) {
              if cur > prev {
                std::thread::sleep(Duration::from_millis(cur - prev));
              }
            }
            last_ts = frame.timestamp_ms().or(last_ts);
          }
          // 新帧直接替换未消费的旧帧，永不排队
          slot.publish(frame);
        }
        slot.close();
      });
    }

    let mut frame_index = 0usize;
    while let Some(frame) = slot.take_wait() {
      frame_index += 1;
      let now = std::time::Instant::now();
      // 推理失败与解码失败一样只丢弃该帧，不中断任务
      let raw = match model.infer(&frame) {
        Ok(raw) => raw,
        Err(e) => {
          error!("第 {} 帧推理失败，丢帧: {}", frame_index, e);
          continue;
        }
      };
      let inference_time_ms = now.elapsed().as_millis() as u64;

      // 解码失败只丢弃该帧，不中断任务
      let detections = match self.pipeline.process(&raw) {
        Ok(detections) => detections,
        Err(e) => {
          error!("第 {} 帧解码失败，丢帧: {}", frame_index, e);
          continue;
        }
      };

      output.on_detections(&detections, inference_time_ms)?;

      let timestamp_ms = self.session.clock().now_ms();
      let event = match detections.first() {
        Some(best) => FrameEvent::Detected {
          label: best.class_name.clone(),
          confidence: best.confidence,
          timestamp_ms,
        },
        None => FrameEvent::Empty { timestamp_ms },
      };
      self.session.submit(event)?;

      if self.frame_number.map(|n| frame_index >= n).unwrap_or(false) {
        info!("达到指定帧数 {}, 退出任务循环", frame_index);
        break;
      }
      if rx.try_recv().is_ok() {
        warn!("中断信号接收，退出任务循环");
        break;
      }
    }

    info!("处理 {} 帧，任务完成", frame_index);
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::ReplayModel;
  use std::convert::Infallible;
  use std::sync::{Arc, Mutex};

  #[derive(Default, Clone)]
  struct CapturePresent {
    frames: Arc<Mutex<Vec<(usize, u64)>>>,
  }

  impl Present for CapturePresent {
    type Error = Infallible;

    fn on_detections(
      &mut self,
      detections: &[Detection],
      inference_time_ms: u64,
    ) -> Result<(), Self::Error> {
      if let Ok(mut frames) = self.frames.lock() {
        frames.push((detections.len(), inference_time_ms));
      }
      Ok(())
    }

    fn on_display_text(&mut self, _text: &str) -> Result<(), Self::Error> {
      Ok(())
    }
  }

  fn labels(names: &[&str]) -> LabelSet {
    LabelSet::from_reader(names.join("\n").into_bytes().as_slice()).unwrap()
  }

  #[test]
  fn pipeline_keeps_best_of_overlapping_grid_columns() {
    #[rustfmt::skip]
    let data = vec![
      0.50, 0.52,
      0.50, 0.52,
      0.20, 0.20,
      0.20, 0.20,
      0.90, 0.20,
      0.10, 0.95,
    ];
    let raw = RawOutput::new(data, vec![1, 6, 2]);
    let pipeline = Pipeline::new(
      OutputLayout::from_shape(&raw.shape).unwrap(),
      labels(&["A", "B"]),
    );
    let out = pipeline.process(&raw).unwrap();
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].class_name, "B");
    assert!((out[0].confidence - 0.95).abs() < 1e-6);
  }

  #[test]
  fn continuous_task_drops_bad_frame_and_keeps_going() {
    use crate::aggregate::AggregateConfig;

    let good = RawOutput::new(vec![0.2, 0.91, 0.05], vec![1, 3]);
    let bad = RawOutput::new(vec![0.1, 0.2, 0.3, 0.4], vec![1, 4]);
    let frames: Vec<RecordFrame> = [(good.clone(), 0), (bad, 100), (good, 200)]
      .into_iter()
      .map(|(raw, ts)| RecordFrame {
        raw,
        timestamp_ms: Some(ts),
      })
      .collect();
    let model = ReplayModel::new(&[1, 3]).unwrap();
    let pipeline = Pipeline::new(model.output_layout(), labels(&["Hello", "A", "B"]));
    let session = Session::spawn(AggregateConfig::default(), |_| {}).unwrap();
    let present = CapturePresent::default();
    // 中间一帧形状与布局不符，任务应丢弃该帧后继续处理后续帧
    ContinuousTask::new(pipeline, session)
      .with_pacing(true)
      .run_task(frames.into_iter(), model, present.clone())
      .unwrap();
    let presented = present.frames.lock().unwrap();
    assert_eq!(presented.len(), 2);
    assert!(presented.iter().all(|(count, _)| *count == 1));
  }

  #[test]
  fn one_shot_task_presents_single_frame() {
    let raw = RawOutput::new(vec![0.2, 0.91, 0.05], vec![1, 3]);
    let frame = RecordFrame {
      raw: raw.clone(),
      timestamp_ms: None,
    };
    let model = ReplayModel::new(&[1, 3]).unwrap();
    let pipeline = Pipeline::new(model.output_layout(), labels(&["Hello", "A", "B"]));
    let present = CapturePresent::default();
    OneShotTask { pipeline }
      .run_task(std::iter::once(frame), model, present.clone())
      .unwrap();
    let frames = present.frames.lock().unwrap();
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].0, 1);
  }
}
