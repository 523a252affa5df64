// 该文件是 Kanjian （看见） 项目的一部分。
// src/main.rs - 目标检测服务主程序
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

use std::{sync::Arc, thread};

use anyhow::Result;
use clap::Parser;
use tokio::{net::TcpListener, sync::mpsc};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use kanjian::{
  args::Args,
  model::load_engine,
  pipeline::RequestPipeline,
  scheduler::InferenceScheduler,
  server::{self, AppState},
};

#[tokio::main]
async fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .init();

  let args = Args::parse();

  info!("监听地址: {}", args.listen);
  info!("模型地址: {}", args.model);
  info!(
    "工作线程: {}, 队列深度: {}, 超时: {:?} ms",
    args.workers, args.queue_depth, args.timeout_ms
  );

  let engine = load_engine(&args.model, args.device.as_deref())?;
  let filter = args.class_filter()?.resolve(engine.as_ref())?;
  for entry in filter.entries() {
    info!("关注类别: {}", entry);
  }

  let scheduler = Arc::new(InferenceScheduler::new(engine, args.scheduler_config())?);
  let pipeline = RequestPipeline::new(Arc::clone(&scheduler), Arc::new(filter))
    .with_codec(args.codec())
    .with_config(args.pipeline_config())
    .with_stroke_width(args.stroke_width);

  let (tx, mut rx) = mpsc::unbounded_channel();
  let grace = args.shutdown_grace();
  ctrlc::set_handler(move || {
    info!("收到中断信号，准备退出...");
    let _ = tx.send(());
    thread::spawn(move || {
      thread::sleep(grace);
      warn!("强制退出程序");
      std::process::exit(1);
    });
  })?;

  let listener = TcpListener::bind(args.listen).await?;
  server::serve(listener, AppState::new(Arc::new(pipeline)), async move {
    rx.recv().await;
  })
  .await?;

  info!("HTTP 服务已停止，等待推理任务完成");
  scheduler.shutdown();
  info!("退出");
  Ok(())
}
