// 该文件是 Shouyin （手音） 项目的一部分。
// src/main.rs - 项目主程序
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

mod args;

use anyhow::Result;
use clap::Parser;
use tracing::{error, info};

use shouyin::{
  FromUrl,
  input::RecordInput,
  label::LabelSet,
  model::{Model, ReplayModel},
  output::{OutputWrapper, Present, SharedPresent},
  session::Session,
  task::{ContinuousTask, Pipeline, Task},
};

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = args::Args::parse();

  info!("输入来源: {}", args.input);
  info!("标签文件: {}", args.labels);
  info!("输出: {}", args.output);
  info!("置信度阈值: {}", args.confidence);
  info!("IOU 阈值: {}", args.iou_threshold);

  let labels = LabelSet::from_path(&args.labels)?;
  let input = RecordInput::from_url(&args.input)?;

  // 输出布局在加载时确定一次，模型生命周期内不变
  let model = ReplayModel::new(input.output_shape())?;
  info!("输出布局: {:?}", model.output_layout());

  let present = SharedPresent::new(OutputWrapper::from_url(&args.output)?);

  let mut text_present = present.clone();
  let session = Session::spawn(args.aggregate_config(), move |text| {
    if let Err(e) = text_present.on_display_text(text) {
      error!("写出展示文本失败: {}", e);
    }
  })?;

  let mut pipeline = Pipeline::new(model.output_layout(), labels);
  pipeline.confidence_threshold = args.confidence;
  pipeline.iou_threshold = args.iou_threshold;

  // 坏帧只记录日志并跳过
  let frames = input.filter_map(|frame| match frame {
    Ok(frame) => Some(frame),
    Err(e) => {
      error!("读取记录帧失败: {}", e);
      None
    }
  });

  let frame_number = (args.max_frames > 0).then_some(args.max_frames);
  ContinuousTask::new(pipeline, session)
    .with_frame_number(frame_number)
    .with_pacing(args.paced)
    .run_task(frames, model, present)?;

  Ok(())
}
