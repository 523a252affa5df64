// 该文件是 Kanjian （看见） 项目的一部分。
// tests/server.rs - HTTP 服务测试
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

#![cfg(feature = "http_server")]

mod common;

use std::{net::SocketAddr, sync::Arc, time::Duration};

use axum::{http::StatusCode, response::IntoResponse};
use common::{DOG, PERSON, StubEngine, black_png, item, scheduler};
use kanjian::{
  codec::{CodecError, ImageCodec},
  pipeline::{PipelineError, RequestPipeline},
  scheduler::{SchedulerConfig, SchedulerError},
  server::{self, AppState},
};
use tokio::{net::TcpListener, sync::oneshot, task::JoinHandle};

struct TestServer {
  addr: SocketAddr,
  stop: oneshot::Sender<()>,
  handle: JoinHandle<std::io::Result<()>>,
}

impl TestServer {
  async fn start(engine: StubEngine, codec: ImageCodec) -> Self {
    let engine = Arc::new(engine);
    let (scheduler, filter) = scheduler(
      &engine,
      SchedulerConfig {
        workers: 2,
        ..SchedulerConfig::default()
      },
    );
    let pipeline = RequestPipeline::new(scheduler, filter).with_codec(codec);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (stop, stopped) = oneshot::channel::<()>();
    let handle = tokio::spawn(server::serve(
      listener,
      AppState::new(Arc::new(pipeline)),
      async move {
        let _ = stopped.await;
      },
    ));
    Self { addr, stop, handle }
  }

  fn url(&self, path: &str) -> String {
    format!("http://{}{}", self.addr, path)
  }

  async fn stop(self) {
    self.stop.send(()).unwrap();
    self.handle.await.unwrap().unwrap();
  }
}

fn person_engine() -> StubEngine {
  StubEngine::new(vec![
    item(PERSON, 0.9, [10.0, 10.0, 50.0, 50.0]),
    item(DOG, 0.8, [60.0, 60.0, 90.0, 90.0]),
  ])
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn health_reports_scheduler_state() {
  let server = TestServer::start(person_engine(), ImageCodec::default()).await;

  let response = reqwest::Client::new()
    .get(server.url("/health"))
    .send()
    .await
    .unwrap();
  assert_eq!(response.status(), 200);
  let json: serde_json::Value = response.json().await.unwrap();
  assert_eq!(json["status"], "ok");
  assert_eq!(json["engine"], "stub");
  assert_eq!(json["scheduler"]["workers"], 2);

  server.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn detect_objects_returns_annotated_jpeg() {
  let server = TestServer::start(person_engine(), ImageCodec::default()).await;

  let response = reqwest::Client::new()
    .post(server.url("/detect-objects/"))
    .header("x-camera-id", "gate-3")
    .body(black_png(100, 100))
    .send()
    .await
    .unwrap();
  assert_eq!(response.status(), 200);
  assert_eq!(
    response.headers()["content-type"],
    "application/octet-stream"
  );
  assert_eq!(response.headers()["x-detected"], "true");
  let body = response.bytes().await.unwrap();
  assert_eq!(&body[..2], &[0xFF, 0xD8]);
  let frame = ImageCodec::default().decode(&body).unwrap();
  assert_eq!((frame.width(), frame.height()), (100, 100));

  server.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn report_mode_returns_filtered_detections() {
  let server = TestServer::start(person_engine(), ImageCodec::default()).await;

  let response = reqwest::Client::new()
    .post(server.url("/detect-objects/report"))
    .body(black_png(100, 100))
    .send()
    .await
    .unwrap();
  assert_eq!(response.status(), 200);
  let json: serde_json::Value = response.json().await.unwrap();
  assert_eq!(json["detected"], true);
  assert_eq!(json["width"], 100);
  assert_eq!(json["detections"].as_array().unwrap().len(), 1);
  assert_eq!(json["detections"][0]["label"], "person");

  server.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn undecodable_body_maps_to_decode_error() {
  let server = TestServer::start(person_engine(), ImageCodec::default()).await;

  let response = reqwest::Client::new()
    .post(server.url("/detect-objects/"))
    .body(b"not an image".to_vec())
    .send()
    .await
    .unwrap();
  assert_eq!(response.status(), 500);
  assert_eq!(response.headers()["x-error-code"], "decode_error");
  let json: serde_json::Value = response.json().await.unwrap();
  assert_eq!(json["code"], "decode_error");
  assert!(json["error"].is_string());

  server.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn engine_failure_maps_to_inference_error() {
  let server = TestServer::start(
    StubEngine::new(Vec::new()).always_failing(),
    ImageCodec::default(),
  )
  .await;

  let response = reqwest::Client::new()
    .post(server.url("/detect-objects/"))
    .body(black_png(8, 8))
    .send()
    .await
    .unwrap();
  assert_eq!(response.status(), 500);
  assert_eq!(response.headers()["x-error-code"], "inference_error");

  server.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn oversized_body_is_rejected() {
  let server = TestServer::start(person_engine(), ImageCodec::default().with_max_bytes(64)).await;

  let response = reqwest::Client::new()
    .post(server.url("/detect-objects/"))
    .body(vec![0u8; 4096])
    .send()
    .await
    .unwrap();
  assert_eq!(response.status(), 413);

  server.stop().await;
}

#[test]
fn scheduler_errors_map_to_status_codes() {
  let cases = [
    (
      PipelineError::Schedule(SchedulerError::Overloaded(256)),
      StatusCode::SERVICE_UNAVAILABLE,
      "overloaded",
    ),
    (
      PipelineError::Schedule(SchedulerError::Timeout(Duration::from_secs(1))),
      StatusCode::GATEWAY_TIMEOUT,
      "timeout",
    ),
    (
      PipelineError::Schedule(SchedulerError::ShutDown),
      StatusCode::SERVICE_UNAVAILABLE,
      "unavailable",
    ),
    (
      PipelineError::Encode(CodecError::Empty),
      StatusCode::INTERNAL_SERVER_ERROR,
      "encode_error",
    ),
  ];

  for (err, status, code) in cases {
    let response = err.into_response();
    assert_eq!(response.status(), status);
    assert_eq!(response.headers()["x-error-code"], code);
  }
}
