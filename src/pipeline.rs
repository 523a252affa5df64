// 该文件是 Kanjian （看见） 项目的一部分。
// src/pipeline.rs - 请求处理流水线
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

use std::{sync::Arc, time::Instant};

use thiserror::Error;
use tokio::task::{self, JoinError};
use tracing::{debug, info};

use crate::{
  codec::{CodecError, DEFAULT_JPEG_QUALITY, ImageCodec},
  filter::ClassFilter,
  frame::RgbFrame,
  model::Detection,
  output::{draw::Draw, report::DetectionReport},
  scheduler::{InferenceJob, InferenceScheduler, SchedulerError},
};

#[derive(Error, Debug)]
pub enum PipelineError {
  #[error("图像解码失败: {0}")]
  Decode(#[source] CodecError),
  #[error(transparent)]
  Schedule(#[from] SchedulerError),
  #[error("图像编码失败: {0}")]
  Encode(#[source] CodecError),
  #[error("图像处理任务异常终止: {0}")]
  Task(#[from] JoinError),
}

impl PipelineError {
  /// 对外错误码
  pub fn code(&self) -> &'static str {
    match self {
      PipelineError::Decode(_) => "decode_error",
      PipelineError::Schedule(err) => err.code(),
      PipelineError::Encode(_) => "encode_error",
      PipelineError::Task(_) => "internal_error",
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PipelineConfig {
  pub jpeg_quality: u8,
  /// 低于该置信度的检测不绘制、不上报
  pub min_confidence: f32,
}

impl Default for PipelineConfig {
  fn default() -> Self {
    Self {
      jpeg_quality: DEFAULT_JPEG_QUALITY,
      min_confidence: 0.0,
    }
  }
}

/// 标注后的 JPEG 与对应的检测报告
#[derive(Debug)]
pub struct Annotated {
  pub jpeg: Vec<u8>,
  pub report: DetectionReport,
}

/// 解码、推理、过滤、绘制、编码。任何一步失败即终止该请求。
pub struct RequestPipeline {
  codec: ImageCodec,
  scheduler: Arc<InferenceScheduler>,
  filter: Arc<ClassFilter>,
  draw: Draw,
  config: PipelineConfig,
}

impl RequestPipeline {
  pub fn new(scheduler: Arc<InferenceScheduler>, filter: Arc<ClassFilter>) -> Self {
    Self {
      codec: ImageCodec::default(),
      scheduler,
      draw: Draw::new(Arc::clone(&filter)),
      filter,
      config: PipelineConfig::default(),
    }
  }

  pub fn with_codec(mut self, codec: ImageCodec) -> Self {
    self.codec = codec;
    self
  }

  pub fn with_config(mut self, config: PipelineConfig) -> Self {
    self.config = config;
    self
  }

  pub fn with_stroke_width(mut self, stroke_width: u32) -> Self {
    self.draw = self.draw.with_stroke_width(stroke_width);
    self
  }

  pub fn codec(&self) -> &ImageCodec {
    &self.codec
  }

  pub fn scheduler(&self) -> &Arc<InferenceScheduler> {
    &self.scheduler
  }

  /// 返回绘制了关注类别的 JPEG
  ///
  /// 绘制与编码在阻塞线程池中进行，不占用异步运行时线程。
  pub async fn annotate(&self, bytes: &[u8]) -> Result<Annotated, PipelineError> {
    let started = Instant::now();
    let (mut frame, detections) = self.detect(bytes).await?;
    let (width, height) = (frame.width(), frame.height());

    let draw = self.draw.clone();
    let codec = self.codec;
    let quality = self.config.jpeg_quality;
    let (jpeg, drawn, detections) = task::spawn_blocking(move || {
      let drawn = draw.draw_boxes(&mut frame, &detections);
      codec
        .encode(&frame, quality)
        .map(|jpeg| (jpeg, drawn, detections))
    })
    .await?
    .map_err(PipelineError::Encode)?;

    info!(
      "标注完成: {} 个目标, 绘制 {} 个框, 耗时 {:.2?}",
      detections.len(),
      drawn,
      started.elapsed()
    );
    Ok(Annotated {
      jpeg,
      report: DetectionReport::new(width, height, detections),
    })
  }

  /// 只返回检测结果，不绘制也不编码
  pub async fn report(&self, bytes: &[u8]) -> Result<DetectionReport, PipelineError> {
    let (frame, detections) = self.detect(bytes).await?;
    Ok(DetectionReport::new(
      frame.width(),
      frame.height(),
      detections,
    ))
  }

  async fn detect(&self, bytes: &[u8]) -> Result<(RgbFrame, Vec<Detection>), PipelineError> {
    let codec = self.codec;
    let bytes = bytes.to_vec();
    let frame = task::spawn_blocking(move || codec.decode(&bytes))
      .await?
      .map_err(PipelineError::Decode)?;
    let job = InferenceJob::new(frame, Arc::clone(&self.filter));
    let result = self.scheduler.submit(job).await?;

    let total = result.detections.len();
    let detections: Vec<Detection> = result
      .detections
      .into_iter()
      .filter(|d| self.filter.contains(&d.label) && d.confidence >= self.config.min_confidence)
      .collect();
    debug!("检测结果: {} 个, 关注类别 {} 个", total, detections.len());

    Ok((result.frame, detections))
  }
}
