// 该文件是 Kanjian （看见） 项目的一部分。
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

use std::{net::SocketAddr, time::Duration};

use clap::{Parser, builder::RangedU64ValueParser};
use url::Url;

use crate::{
  codec::{DEFAULT_JPEG_QUALITY, DEFAULT_MAX_BYTES, ImageCodec},
  filter::{ClassEntry, ClassFilter, FilterError},
  pipeline::PipelineConfig,
  scheduler::{DEFAULT_QUEUE_DEPTH, DEFAULT_WORKERS, SchedulerConfig},
};

/// Kanjian 目标检测服务参数配置
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 监听地址
  #[arg(
    long,
    env = "KANJIAN_LISTEN",
    default_value = "0.0.0.0:8000",
    value_name = "ADDR"
  )]
  pub listen: SocketAddr,

  /// 检测引擎地址
  /// 支持格式:
  /// - 回放脚本: replay:///path/to/script.json
  #[arg(long, env = "KANJIAN_MODEL", value_name = "MODEL")]
  pub model: Url,

  /// 推理设备，覆盖模型地址中的 device 参数
  #[arg(long, env = "KANJIAN_DEVICE", value_name = "DEVICE")]
  pub device: Option<String>,

  /// 推理工作线程数
  #[arg(
    long,
    env = "KANJIAN_WORKERS",
    default_value_t = DEFAULT_WORKERS,
    value_parser = RangedU64ValueParser::<usize>::new().range(1..),
    value_name = "COUNT"
  )]
  pub workers: usize,

  /// 推理队列深度，队列满时请求立即失败
  #[arg(
    long,
    env = "KANJIAN_QUEUE_DEPTH",
    default_value_t = DEFAULT_QUEUE_DEPTH,
    value_parser = RangedU64ValueParser::<usize>::new().range(1..),
    value_name = "COUNT"
  )]
  pub queue_depth: usize,

  /// 单次推理超时（毫秒），不设置表示不限时
  #[arg(long, env = "KANJIAN_TIMEOUT_MS", value_name = "MS")]
  pub timeout_ms: Option<u64>,

  /// JPEG 质量 (0 - 100)
  #[arg(
    long,
    env = "KANJIAN_QUALITY",
    default_value_t = DEFAULT_JPEG_QUALITY,
    value_parser = clap::value_parser!(u8).range(0..=100),
    value_name = "QUALITY"
  )]
  pub quality: u8,

  /// 最低置信度 (0.0 - 1.0)
  #[arg(
    long,
    env = "KANJIAN_MIN_CONFIDENCE",
    default_value_t = 0.0,
    value_name = "THRESHOLD",
    value_parser = parse_confidence
  )]
  pub min_confidence: f32,

  /// 边框线宽 (1 - 3)
  #[arg(
    long,
    env = "KANJIAN_STROKE_WIDTH",
    default_value_t = 2,
    value_parser = clap::value_parser!(u32).range(1..=3),
    value_name = "PIXELS"
  )]
  pub stroke_width: u32,

  /// 关注类别及其颜色，可重复或以逗号分隔
  /// 颜色支持 green、blue、yellow、orange 等名称或 #rrggbb
  #[arg(
    long = "class",
    env = "KANJIAN_CLASSES",
    value_name = "LABEL=COLOR",
    value_delimiter = ',',
    default_values = ["person=green", "car=blue", "motorcycle=yellow", "bicycle=orange"]
  )]
  pub classes: Vec<ClassEntry>,

  /// 请求体上限（字节）
  #[arg(
    long,
    env = "KANJIAN_MAX_BYTES",
    default_value_t = DEFAULT_MAX_BYTES,
    value_name = "BYTES"
  )]
  pub max_bytes: usize,

  /// 收到退出信号后等待请求完成的时间（秒）
  #[arg(
    long,
    env = "KANJIAN_SHUTDOWN_GRACE",
    default_value_t = 10,
    value_name = "SECONDS"
  )]
  pub shutdown_grace: u64,
}

/// 解析 0.0 - 1.0 之间的置信度
pub fn parse_confidence(value: &str) -> Result<f32, String> {
  let confidence: f32 = value
    .parse()
    .map_err(|err| format!("无法解析置信度 {}: {}", value, err))?;
  if confidence.is_finite() && (0.0..=1.0).contains(&confidence) {
    Ok(confidence)
  } else {
    Err(format!("置信度 {} 不在 0.0 - 1.0 之间", value))
  }
}

impl Args {
  pub fn class_filter(&self) -> Result<ClassFilter, FilterError> {
    ClassFilter::new(self.classes.iter().cloned())
  }

  pub fn scheduler_config(&self) -> SchedulerConfig {
    SchedulerConfig {
      workers: self.workers,
      queue_depth: self.queue_depth,
      timeout: self.timeout_ms.map(Duration::from_millis),
    }
  }

  pub fn pipeline_config(&self) -> PipelineConfig {
    PipelineConfig {
      jpeg_quality: self.quality,
      min_confidence: self.min_confidence,
    }
  }

  pub fn codec(&self) -> ImageCodec {
    ImageCodec::default().with_max_bytes(self.max_bytes)
  }

  pub fn shutdown_grace(&self) -> Duration {
    Duration::from_secs(self.shutdown_grace)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::filter::Color;

  #[test]
  fn defaults_follow_original_deployment() {
    let args = Args::try_parse_from(["kanjian", "--model", "replay:///tmp/s.json"]).unwrap();
    assert_eq!(args.workers, 4);
    assert_eq!(args.queue_depth, 256);
    assert_eq!(args.quality, 78);
    assert_eq!(args.timeout_ms, None);
    assert_eq!(args.class_filter().unwrap(), ClassFilter::default());
    assert_eq!(args.scheduler_config(), SchedulerConfig::default());
  }

  #[test]
  fn classes_are_repeatable_and_comma_separated() {
    let args = Args::try_parse_from([
      "kanjian",
      "--model",
      "replay:///tmp/s.json",
      "--class",
      "dog=#ff0000,cat=blue",
      "--class",
      "person=white",
      "--timeout-ms",
      "1500",
    ])
    .unwrap();
    let filter = args.class_filter().unwrap();
    assert_eq!(filter.entries().len(), 3);
    assert_eq!(filter.color_for("dog"), Some(Color::RED));
    assert_eq!(filter.color_for("person"), Some(Color::WHITE));
    assert_eq!(filter.color_for("car"), None);
    assert_eq!(
      args.scheduler_config().timeout,
      Some(Duration::from_millis(1500))
    );
  }

  #[test]
  fn rejects_out_of_range_values() {
    for bad in [
      ["--workers", "0"],
      ["--quality", "101"],
      ["--stroke-width", "4"],
      ["--class", "person"],
      ["--min-confidence", "NaN"],
      ["--min-confidence", "5.0"],
      ["--min-confidence", "-0.1"],
      ["--min-confidence", "inf"],
    ] {
      let mut argv = vec!["kanjian", "--model", "replay:///tmp/s.json"];
      argv.extend(bad);
      assert!(Args::try_parse_from(argv).is_err(), "{:?}", bad);
    }
  }

  #[test]
  fn confidence_accepts_closed_unit_range() {
    assert_eq!(parse_confidence("0"), Ok(0.0));
    assert_eq!(parse_confidence("0.45"), Ok(0.45));
    assert_eq!(parse_confidence("1.0"), Ok(1.0));
    assert!(parse_confidence("1.0001").is_err());
    assert!(parse_confidence("high").is_err());

    let args = Args::try_parse_from([
      "kanjian",
      "--model",
      "replay:///tmp/s.json",
      "--min-confidence",
      "0.25",
    ])
    .unwrap();
    assert_eq!(args.pipeline_config().min_confidence, 0.25);
  }
}
