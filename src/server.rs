// 该文件是 Kanjian （看见） 项目的一部分。
// src/server.rs - HTTP 服务
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

use std::{future::Future, sync::Arc};

use axum::{
  Json, Router,
  body::Bytes,
  extract::{DefaultBodyLimit, State},
  http::{HeaderMap, HeaderName, StatusCode, header},
  response::{IntoResponse, Response},
  routing::{get, post},
};
use serde::Serialize;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{Instrument, error, info, info_span, warn};

use crate::{
  output::report::DetectionReport,
  pipeline::{PipelineError, RequestPipeline},
  scheduler::{SchedulerError, SchedulerStats},
};

pub const X_CAMERA_ID: HeaderName = HeaderName::from_static("x-camera-id");
pub const X_DETECTED: HeaderName = HeaderName::from_static("x-detected");
pub const X_ERROR_CODE: HeaderName = HeaderName::from_static("x-error-code");

#[derive(Clone)]
pub struct AppState {
  pub pipeline: Arc<RequestPipeline>,
}

impl AppState {
  pub fn new(pipeline: Arc<RequestPipeline>) -> Self {
    Self { pipeline }
  }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
  error: String,
  code: &'static str,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
  status: &'static str,
  version: &'static str,
  engine: String,
  scheduler: SchedulerStats,
}

impl IntoResponse for PipelineError {
  fn into_response(self) -> Response {
    let status = match &self {
      PipelineError::Decode(_) | PipelineError::Encode(_) | PipelineError::Task(_) => {
        StatusCode::INTERNAL_SERVER_ERROR
      }
      PipelineError::Schedule(SchedulerError::Inference(_)) => StatusCode::INTERNAL_SERVER_ERROR,
      PipelineError::Schedule(SchedulerError::Overloaded(_))
      | PipelineError::Schedule(SchedulerError::ShutDown) => StatusCode::SERVICE_UNAVAILABLE,
      PipelineError::Schedule(SchedulerError::Timeout(_)) => StatusCode::GATEWAY_TIMEOUT,
    };
    let code = self.code();
    if status == StatusCode::INTERNAL_SERVER_ERROR {
      error!("请求失败 ({}): {}", code, self);
    } else {
      warn!("请求失败 ({}): {}", code, self);
    }

    (
      status,
      [(X_ERROR_CODE, code)],
      Json(ErrorBody {
        error: self.to_string(),
        code,
      }),
    )
      .into_response()
  }
}

fn camera_id(headers: &HeaderMap) -> &str {
  headers
    .get(&X_CAMERA_ID)
    .and_then(|v| v.to_str().ok())
    .unwrap_or("-")
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
  let scheduler = state.pipeline.scheduler();
  Json(HealthResponse {
    status: "ok",
    version: env!("CARGO_PKG_VERSION"),
    engine: scheduler.engine().name().to_string(),
    scheduler: scheduler.stats(),
  })
}

/// 返回标注后的 JPEG
async fn detect_objects(
  State(state): State<AppState>,
  headers: HeaderMap,
  body: Bytes,
) -> Result<Response, PipelineError> {
  let span = info_span!("detect", camera = camera_id(&headers), bytes = body.len());
  let annotated = state.pipeline.annotate(&body).instrument(span).await?;

  let detected = if annotated.report.detected {
    "true"
  } else {
    "false"
  };
  Ok(
    (
      [
        (header::CONTENT_TYPE, "application/octet-stream"),
        (X_DETECTED, detected),
      ],
      annotated.jpeg,
    )
      .into_response(),
  )
}

/// 只返回检测结果
async fn detect_objects_report(
  State(state): State<AppState>,
  headers: HeaderMap,
  body: Bytes,
) -> Result<Json<DetectionReport>, PipelineError> {
  let span = info_span!("detect", camera = camera_id(&headers), bytes = body.len());
  let report = state.pipeline.report(&body).instrument(span).await?;
  Ok(Json(report))
}

pub fn build_router(state: AppState) -> Router {
  let body_limit = state.pipeline.codec().max_bytes();
  Router::new()
    .route("/health", get(health))
    .route("/detect-objects/", post(detect_objects))
    .route("/detect-objects/report", post(detect_objects_report))
    .layer(DefaultBodyLimit::max(body_limit))
    .layer(TraceLayer::new_for_http())
    .with_state(state)
}

/// 在给定监听器上提供服务，直到 `shutdown` 完成
pub async fn serve<F>(listener: TcpListener, state: AppState, shutdown: F) -> std::io::Result<()>
where
  F: Future<Output = ()> + Send + 'static,
{
  info!("HTTP 服务监听: {}", listener.local_addr()?);
  axum::serve(listener, build_router(state))
    .with_graceful_shutdown(shutdown)
    .await
}
