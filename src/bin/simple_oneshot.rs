// 该文件是 Kanjian （看见） 项目的一部分。
// src/bin/simple_oneshot.rs - 单张图像推理
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

use anyhow::Result;
use clap::Parser;
use tracing::info;
use url::Url;

use kanjian::{
  FromUrl,
  args::parse_confidence,
  codec::DEFAULT_JPEG_QUALITY,
  filter::{ClassEntry, ClassFilter},
  input::ImageFileInput,
  model::load_engine,
  output::SaveImageFileOutput,
  pipeline::{PipelineConfig, RequestPipeline},
  scheduler::{InferenceScheduler, SchedulerConfig},
};

/// Kanjian 单张图像推理
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 检测引擎地址
  #[arg(long, value_name = "MODEL")]
  pub model: Url,
  /// 推理设备
  #[arg(long, value_name = "DEVICE")]
  pub device: Option<String>,
  /// 输入来源，如 image:///path/in.jpg
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,
  /// 输出路径，如 image:///path/out.jpg?record=name
  #[arg(long, value_name = "OUTPUT")]
  pub output: Url,
  /// 关注类别及其颜色
  #[arg(
    long = "class",
    value_name = "LABEL=COLOR",
    value_delimiter = ',',
    default_values = ["person=green", "car=blue", "motorcycle=yellow", "bicycle=orange"]
  )]
  pub classes: Vec<ClassEntry>,
  /// 最低置信度
  #[arg(
    long,
    default_value_t = 0.0,
    value_name = "THRESHOLD",
    value_parser = parse_confidence
  )]
  pub min_confidence: f32,
  /// JPEG 质量
  #[arg(
    long,
    default_value_t = DEFAULT_JPEG_QUALITY,
    value_parser = clap::value_parser!(u8).range(0..=100),
    value_name = "QUALITY"
  )]
  pub quality: u8,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("模型地址: {}", args.model);
  info!("输入来源: {}", args.input);
  info!("输出路径: {}", args.output);

  let input = ImageFileInput::from_url(&args.input)?;
  let output = SaveImageFileOutput::from_url(&args.output)?;
  let engine = load_engine(&args.model, args.device.as_deref())?;
  let filter = ClassFilter::new(args.classes)?.resolve(engine.as_ref())?;

  let scheduler = Arc::new(InferenceScheduler::new(
    engine,
    SchedulerConfig {
      workers: 1,
      ..SchedulerConfig::default()
    },
  )?);
  let pipeline = RequestPipeline::new(Arc::clone(&scheduler), Arc::new(filter)).with_config(
    PipelineConfig {
      jpeg_quality: args.quality,
      min_confidence: args.min_confidence,
    },
  );

  info!("开始推理...");
  let now = std::time::Instant::now();
  let annotated = pipeline.annotate(&input.read()?).await?;
  info!("推理完成，耗时: {:.2?}", now.elapsed());

  for detection in annotated.report.detections.iter() {
    info!(
      "  - {}: {:.2}% at {:?}",
      detection.label,
      detection.confidence * 100.0,
      detection.bbox
    );
  }
  output.save(&annotated.jpeg, &annotated.report)?;

  scheduler.shutdown();
  Ok(())
}
