// 该文件是 Kanjian （看见） 项目的一部分。
// src/output/report.rs - 结构化检测报告
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

use std::path::Path;

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::model::Detection;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionReport {
  /// 是否检测到至少一个关注类别
  pub detected: bool,
  pub width: u32,
  pub height: u32,
  pub detections: Vec<Detection>,
  pub processed_at: String,
}

impl DetectionReport {
  pub fn new(width: u32, height: u32, detections: Vec<Detection>) -> Self {
    Self {
      detected: !detections.is_empty(),
      width,
      height,
      detections,
      processed_at: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
    }
  }

  /// 每个检测一行: `名称或编号, 置信度, x1, y1, x2, y2`
  pub fn records(&self, label_with_name: bool) -> String {
    self
      .detections
      .iter()
      .map(|item| {
        let name = if label_with_name {
          item.label.clone()
        } else {
          item.class_id.to_string()
        };
        format!(
          "{}, {:.4}, {:.4}, {:.4}, {:.4}, {:.4}",
          name, item.confidence, item.bbox[0], item.bbox[1], item.bbox[2], item.bbox[3]
        )
      })
      .collect::<Vec<_>>()
      .join("\n")
  }

  /// 写到与 `path` 同名的 .txt 文件
  pub fn write_records(&self, path: &Path, label_with_name: bool) -> std::io::Result<()> {
    std::fs::write(path.with_extension("txt"), self.records(label_with_name))
  }
}
