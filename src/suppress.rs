// 该文件是 Shouyin （手音） 项目的一部分。
// src/suppress.rs - 非极大值抑制
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

use crate::model::Detection;

/// 默认 NMS IoU 阈值
pub const DEFAULT_IOU_THRESHOLD: f32 = 0.5;

/// 计算两个边界框的 IoU。
/// 面积使用 w*h 字段，调用方需保证 w,h 与 x1..y2 一致。
pub fn iou(a: &Detection, b: &Detection) -> f32 {
  let x1 = a.x1.max(b.x1);
  let y1 = a.y1.max(b.y1);
  let x2 = a.x2.min(b.x2);
  let y2 = a.y2.min(b.y2);

  let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
  let union = a.w * a.h + b.w * b.h - intersection;

  if union > 0.0 { intersection / union } else { 0.0 }
}

/// 顺序稳定的贪心非极大值抑制。
///
/// 按置信度降序稳定排序（同分保持扫描顺序），反复取出最高置信度
/// 候选加入结果，并删除与其 IoU >= 阈值的剩余候选。
pub fn suppress(mut candidates: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
  candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

  let mut selected = Vec::new();
  while !candidates.is_empty() {
    let best = candidates.remove(0);
    candidates.retain(|det| iou(&best, det) < iou_threshold);
    selected.push(best);
  }

  selected
}
