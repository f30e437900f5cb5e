// 该文件是 Shouyin （手音） 项目的一部分。
// tests/pipeline.rs - 解码、抑制与聚合的端到端测试
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

use shouyin::aggregate::{AggregateConfig, Aggregator, FrameEvent, Mode};
use shouyin::input::RecordInput;
use shouyin::label::LabelSet;
use shouyin::model::{Model, ReplayModel};
use shouyin::task::Pipeline;

fn labels(names: &[&str]) -> LabelSet {
  LabelSet::from_reader(names.join("\n").into_bytes().as_slice()).unwrap()
}

fn detected(label: &str, timestamp_ms: u64) -> FrameEvent {
  FrameEvent::Detected {
    label: label.to_string(),
    confidence: 0.9,
    timestamp_ms,
  }
}

/// 两个几乎重叠的网格列，抑制后只保留置信度更高的那个
#[test]
fn grid_record_keeps_single_best_box() {
  let record = concat!(
    "{\"shape\": [1, 6, 2], \"data\": [",
    "0.50, 0.52, ",
    "0.50, 0.52, ",
    "0.20, 0.20, ",
    "0.20, 0.20, ",
    "0.90, 0.20, ",
    "0.10, 0.95]}\n",
  );
  let mut input = RecordInput::from_reader(record.as_bytes()).unwrap();
  let model = ReplayModel::new(input.output_shape()).unwrap();
  let pipeline = Pipeline::new(model.output_layout(), labels(&["A", "B"]));

  let frame = input.next().unwrap().unwrap();
  let raw = model.infer(&frame).unwrap();
  let detections = pipeline.process(&raw).unwrap();

  assert_eq!(detections.len(), 1);
  assert_eq!(detections[0].class_name, "B");
  assert_eq!(detections[0].class_id, 1);
  assert!((detections[0].confidence - 0.95).abs() < 1e-6);
}

/// 分类向量走同一条检测接口，产出固定居中框
#[test]
fn classification_record_flows_into_aggregation() {
  let record = "{\"shape\": [1, 3], \"data\": [0.2, 0.91, 0.05]}\n";
  let mut input = RecordInput::from_reader(record.as_bytes()).unwrap();
  let model = ReplayModel::new(input.output_shape()).unwrap();
  let pipeline = Pipeline::new(model.output_layout(), labels(&["Hello", "A", "B"]));

  let frame = input.next().unwrap().unwrap();
  let raw = model.infer(&frame).unwrap();
  let detections = pipeline.process(&raw).unwrap();

  assert_eq!(detections.len(), 1);
  let best = &detections[0];
  assert_eq!(best.class_name, "A");
  assert_eq!((best.x1, best.y1, best.x2, best.y2), (0.1, 0.1, 0.9, 0.9));

  let mut agg = Aggregator::new(AggregateConfig::default());
  let text = agg.on_event(&detected(&best.class_name, 0));
  assert_eq!(text, Some("A".to_string()));
}

/// 字母流在聚合器中累积成词，空闲后被清空
#[test]
fn letters_accrete_then_clear_after_idle() {
  let mut agg = Aggregator::new(AggregateConfig::default());

  agg.on_event(&detected("H", 0));
  agg.on_event(&detected("I", 400));
  assert_eq!(agg.display_text(), "HI");

  // 间隔超过字母阈值，插入词间空格
  assert_eq!(agg.on_event(&detected("A", 3000)), Some("HI A".into()));

  // 空帧不打断累积
  agg.on_event(&FrameEvent::Empty { timestamp_ms: 4000 });
  assert_eq!(agg.display_text(), "HI A");

  // 最后一次事件之后 clear_delay_ms 内无活动，文本清空
  let deadline = agg.next_deadline_ms().unwrap();
  assert_eq!(agg.on_tick(deadline), Some(String::new()));
}

/// 模式切换丢弃聚合状态
#[test]
fn switching_to_single_label_starts_fresh() {
  let mut agg = Aggregator::new(AggregateConfig::default());
  agg.on_event(&detected("H", 0));
  agg.on_event(&detected("I", 400));

  assert_eq!(agg.set_mode(Mode::SingleLabel), Some(String::new()));
  assert_eq!(agg.on_event(&detected("Hello", 1000)), Some("Hello".into()));
  assert_eq!(agg.on_event(&FrameEvent::Empty { timestamp_ms: 2000 }), None);
  assert_eq!(agg.display_text(), "Hello");
}
