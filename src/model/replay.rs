// 该文件是 Kanjian （看见） 项目的一部分。
// src/model/replay.rs - 回放检测引擎
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

use std::path::PathBuf;

use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::RgbFrame,
  model::{DetectItem, DetectionEngine, EngineError, coco::COCO_CLASSES},
};

const REPLAY_DEVICES: [&str; 1] = ["cpu"];

#[derive(Error, Debug)]
pub enum ReplayError {
  #[error("脚本加载错误: {0}")]
  ScriptLoadError(#[from] std::io::Error),
  #[error("脚本格式错误: {0}")]
  ScriptInvalid(#[from] serde_json::Error),
  #[error("模型路径错误: {0}")]
  ModelPathError(String),
  #[error("不支持的设备: {0}")]
  UnsupportedDevice(String),
  #[error("类别 {class_id} 超出标签表范围 ({count})")]
  ClassOutOfRange { class_id: u32, count: usize },
}

/// 回放脚本：每次推理都返回同一组检测结果
#[derive(Debug, Deserialize)]
struct ReplayScript {
  #[serde(default)]
  labels: Option<Vec<String>>,
  #[serde(default)]
  detections: Vec<DetectItem>,
}

/// 从 JSON 脚本回放检测结果的引擎，用于无加速硬件的环境与联调
#[derive(Debug)]
pub struct ReplayEngine {
  labels: Vec<String>,
  detections: Vec<DetectItem>,
}

pub struct ReplayEngineBuilder {
  script_path: PathBuf,
  device: Option<String>,
}

impl FromUrlWithScheme for ReplayEngineBuilder {
  const SCHEME: &'static str = "replay";
}

impl FromUrl for ReplayEngineBuilder {
  type Error = ReplayError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(ReplayError::ModelPathError(format!(
        "模型路径必须使用 {} 方案",
        Self::SCHEME
      )));
    }
    if url.path().is_empty() {
      return Err(ReplayError::ModelPathError("脚本路径为空".to_string()));
    }

    let device = url
      .query_pairs()
      .find(|(k, _)| k == "device")
      .map(|(_, v)| v.into_owned());

    Ok(ReplayEngineBuilder {
      script_path: PathBuf::from(url.path()),
      device,
    })
  }
}

impl ReplayEngineBuilder {
  pub fn new(script_path: impl Into<PathBuf>) -> Self {
    Self {
      script_path: script_path.into(),
      device: None,
    }
  }

  /// 命令行指定的设备优先于 URL 中的 device 参数
  pub fn device(mut self, device: Option<&str>) -> Self {
    if let Some(device) = device {
      self.device = Some(device.to_string());
    }
    self
  }

  pub fn build(self) -> Result<ReplayEngine, ReplayError> {
    if let Some(device) = &self.device
      && !REPLAY_DEVICES.contains(&device.to_ascii_lowercase().as_str())
    {
      return Err(ReplayError::UnsupportedDevice(device.clone()));
    }

    info!("加载回放脚本: {}", self.script_path.display());
    let data = std::fs::read(&self.script_path)?;
    ReplayEngine::from_json(&data)
  }
}

impl ReplayEngine {
  pub fn from_json(data: &[u8]) -> Result<Self, ReplayError> {
    let script: ReplayScript = serde_json::from_slice(data)?;
    let labels = script
      .labels
      .unwrap_or_else(|| COCO_CLASSES.iter().map(|s| s.to_string()).collect());

    if let Some(item) = script
      .detections
      .iter()
      .find(|item| item.class_id as usize >= labels.len())
    {
      return Err(ReplayError::ClassOutOfRange {
        class_id: item.class_id,
        count: labels.len(),
      });
    }

    debug!(
      "回放脚本: {} 个类别, {} 个检测结果",
      labels.len(),
      script.detections.len()
    );

    Ok(ReplayEngine {
      labels,
      detections: script.detections,
    })
  }
}

impl DetectionEngine for ReplayEngine {
  fn predict(&self, frame: &RgbFrame, class_ids: &[u32]) -> Result<Vec<DetectItem>, EngineError> {
    debug!("回放推理: {}x{}", frame.width(), frame.height());
    Ok(
      self
        .detections
        .iter()
        .filter(|item| class_ids.is_empty() || class_ids.contains(&item.class_id))
        .cloned()
        .collect(),
    )
  }

  fn label_for(&self, class_id: u32) -> Option<&str> {
    self.labels.get(class_id as usize).map(String::as_str)
  }

  fn class_count(&self) -> u32 {
    self.labels.len() as u32
  }

  fn name(&self) -> &str {
    "replay"
  }
}
