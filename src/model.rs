// 该文件是 Kanjian （看见） 项目的一部分。
// src/model.rs - 检测引擎
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

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, frame::RgbFrame};

pub mod coco;
mod replay;
pub use self::replay::{ReplayEngine, ReplayEngineBuilder, ReplayError};

/// 引擎原始输出
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectItem {
  pub class_id: u32,
  pub score: f32,
  pub bbox: [f32; 4], // [x_min, y_min, x_max, y_max]，源图像像素坐标
}

/// 带标签的检测结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
  pub class_id: u32,
  pub label: String,
  pub confidence: f32,
  /// (x1, y1, x2, y2)，引擎不保证 x1 < x2、y1 < y2
  pub bbox: [f32; 4],
}

impl Detection {
  pub fn from_item(item: DetectItem, engine: &dyn DetectionEngine) -> Self {
    let label = engine
      .label_for(item.class_id)
      .map(str::to_string)
      .unwrap_or_else(|| format!("class-{}", item.class_id));
    Self {
      class_id: item.class_id,
      label,
      confidence: item.score,
      bbox: item.bbox,
    }
  }

  /// 交换坐标使 x1 <= x2、y1 <= y2
  pub fn normalized_bbox(&self) -> [f32; 4] {
    let [x1, y1, x2, y2] = self.bbox;
    [x1.min(x2), y1.min(y2), x1.max(x2), y1.max(y2)]
  }
}

#[derive(Error, Debug)]
pub enum EngineError {
  #[error("推理失败: {0}")]
  Inference(String),
  /// 引擎上下文已失效，调用它的工作线程需要重建
  #[error("推理引擎不可恢复错误: {0}")]
  Fatal(String),
}

impl EngineError {
  pub fn is_fatal(&self) -> bool {
    matches!(self, EngineError::Fatal(_))
  }
}

/// 目标检测引擎
///
/// 实现者不必是线程安全的推理后端本身，但必须能以 `&self` 被多个工作线程调用；
/// 并发度由调度器限制。
pub trait DetectionEngine: Send + Sync {
  fn predict(&self, frame: &RgbFrame, class_ids: &[u32]) -> Result<Vec<DetectItem>, EngineError>;

  fn label_for(&self, class_id: u32) -> Option<&str>;

  fn class_count(&self) -> u32;

  fn class_id_for(&self, label: &str) -> Option<u32> {
    (0..self.class_count()).find(|&id| {
      self
        .label_for(id)
        .is_some_and(|name| name.eq_ignore_ascii_case(label))
    })
  }

  fn name(&self) -> &str {
    "engine"
  }
}

#[derive(Error, Debug)]
pub enum EngineLoadError {
  #[error("回放引擎错误: {0}")]
  Replay(#[from] ReplayError),
  #[error("不支持的模型方案: {0}")]
  SchemeMismatch(String),
}

/// 按 URL 方案加载检测引擎，进程启动时调用一次
pub fn load_engine(
  url: &Url,
  device: Option<&str>,
) -> Result<Arc<dyn DetectionEngine>, EngineLoadError> {
  info!("加载检测引擎: {}", url);
  match url.scheme() {
    ReplayEngineBuilder::SCHEME => {
      let engine = ReplayEngineBuilder::from_url(url)?.device(device).build()?;
      Ok(Arc::new(engine))
    }
    other => Err(EngineLoadError::SchemeMismatch(other.to_string())),
  }
}
