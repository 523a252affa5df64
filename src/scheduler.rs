// 该文件是 Kanjian （看见） 项目的一部分。
// src/scheduler.rs - 推理调度器
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

//! 推理调度器
//!
//! 固定数量的工作线程共享同一个检测引擎，从有界 FIFO 队列中取任务，
//! 通过一次性通道把结果交还给异步调用方。引擎同一时刻最多被
//! `workers` 个线程调用。
//!
//! 引擎返回 [`EngineError::Fatal`](crate::model::EngineError::Fatal) 或在推理中 panic 时，当前任务以
//! [`SchedulerError::Inference`] 失败，该工作线程退出并由新线程替换。
//! 替换线程无法启动时原线程继续服务；没有存活线程时拒绝新任务。

use std::{
  any::Any,
  panic::{self, AssertUnwindSafe},
  sync::{
    Arc, Mutex, MutexGuard, PoisonError,
    atomic::{AtomicU64, AtomicUsize, Ordering},
  },
  thread::{self, JoinHandle},
  time::{Duration, Instant},
};

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{debug, error, info, info_span, warn};

use crate::{
  filter::ClassFilter,
  frame::RgbFrame,
  model::{Detection, DetectionEngine},
};

pub const DEFAULT_WORKERS: usize = 4;
pub const DEFAULT_QUEUE_DEPTH: usize = 256;

#[derive(Error, Debug)]
pub enum SchedulerError {
  #[error("推理失败: {0}")]
  Inference(String),
  #[error("推理队列已满 (深度 {0})")]
  Overloaded(usize),
  #[error("推理超时 ({0:?})")]
  Timeout(Duration),
  #[error("推理调度器已关闭")]
  ShutDown,
}

impl SchedulerError {
  pub fn code(&self) -> &'static str {
    match self {
      SchedulerError::Inference(_) => "inference_error",
      SchedulerError::Overloaded(_) => "overloaded",
      SchedulerError::Timeout(_) => "timeout",
      SchedulerError::ShutDown => "unavailable",
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
  pub workers: usize,
  pub queue_depth: usize,
  /// None 表示不限时
  pub timeout: Option<Duration>,
}

impl Default for SchedulerConfig {
  fn default() -> Self {
    Self {
      workers: DEFAULT_WORKERS,
      queue_depth: DEFAULT_QUEUE_DEPTH,
      timeout: None,
    }
  }
}

/// 一次推理任务，独占一帧图像
pub struct InferenceJob {
  frame: RgbFrame,
  filter: Arc<ClassFilter>,
}

impl InferenceJob {
  pub fn new(frame: RgbFrame, filter: Arc<ClassFilter>) -> Self {
    Self { frame, filter }
  }
}

/// 推理结果，帧的所有权随结果归还
#[derive(Debug)]
pub struct JobResult {
  pub frame: RgbFrame,
  pub detections: Vec<Detection>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SchedulerStats {
  pub queued: usize,
  pub workers: usize,
  pub restarts: u64,
  pub completed: u64,
  pub failed: u64,
}

type Reply = oneshot::Sender<Result<JobResult, SchedulerError>>;

struct Task {
  job: InferenceJob,
  reply: Reply,
  enqueued: Instant,
}

struct Shared {
  engine: Arc<dyn DetectionEngine>,
  receiver: Receiver<Task>,
  workers: Mutex<Vec<JoinHandle<()>>>,
  live: AtomicUsize,
  restarts: AtomicU64,
  completed: AtomicU64,
  failed: AtomicU64,
}

pub struct InferenceScheduler {
  shared: Arc<Shared>,
  sender: Mutex<Option<Sender<Task>>>,
  config: SchedulerConfig,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
  mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
  if let Some(s) = payload.downcast_ref::<&str>() {
    s.to_string()
  } else if let Some(s) = payload.downcast_ref::<String>() {
    s.clone()
  } else {
    "未知 panic".to_string()
  }
}

impl InferenceScheduler {
  /// 创建调度器并启动全部工作线程
  pub fn new(engine: Arc<dyn DetectionEngine>, config: SchedulerConfig) -> std::io::Result<Self> {
    let config = SchedulerConfig {
      workers: config.workers.max(1),
      queue_depth: config.queue_depth.max(1),
      timeout: config.timeout,
    };
    let (sender, receiver) = bounded(config.queue_depth);
    let shared = Arc::new(Shared {
      engine,
      receiver,
      workers: Mutex::new(Vec::with_capacity(config.workers)),
      live: AtomicUsize::new(0),
      restarts: AtomicU64::new(0),
      completed: AtomicU64::new(0),
      failed: AtomicU64::new(0),
    });

    for id in 0..config.workers {
      Shared::spawn_worker(&shared, id, 0)?;
    }
    info!(
      "推理调度器启动: 引擎 {}, {} 个工作线程, 队列深度 {}, 超时 {:?}",
      shared.engine.name(),
      config.workers,
      config.queue_depth,
      config.timeout
    );

    Ok(Self {
      shared,
      sender: Mutex::new(Some(sender)),
      config,
    })
  }

  pub fn config(&self) -> &SchedulerConfig {
    &self.config
  }

  pub fn engine(&self) -> &Arc<dyn DetectionEngine> {
    &self.shared.engine
  }

  /// 提交任务并等待结果。队列满时立即失败，不排队等待。
  pub async fn submit(&self, job: InferenceJob) -> Result<JobResult, SchedulerError> {
    let sender = lock(&self.sender)
      .as_ref()
      .cloned()
      .ok_or(SchedulerError::ShutDown)?;
    if self.shared.live.load(Ordering::SeqCst) == 0 {
      error!("没有存活的推理工作线程, 拒绝请求");
      return Err(SchedulerError::ShutDown);
    }

    let (reply, result) = oneshot::channel();
    let task = Task {
      job,
      reply,
      enqueued: Instant::now(),
    };
    match sender.try_send(task) {
      Ok(()) => {}
      Err(TrySendError::Full(_)) => {
        warn!("推理队列已满, 拒绝请求");
        return Err(SchedulerError::Overloaded(self.config.queue_depth));
      }
      Err(TrySendError::Disconnected(_)) => return Err(SchedulerError::ShutDown),
    }
    drop(sender);

    let received = match self.config.timeout {
      Some(limit) => tokio::time::timeout(limit, result)
        .await
        .map_err(|_| SchedulerError::Timeout(limit))?,
      None => result.await,
    };
    // 工作线程在回复前全部退出
    received.map_err(|_| SchedulerError::ShutDown)?
  }

  pub fn stats(&self) -> SchedulerStats {
    SchedulerStats {
      queued: self.shared.receiver.len(),
      workers: self.shared.live.load(Ordering::SeqCst),
      restarts: self.shared.restarts.load(Ordering::SeqCst),
      completed: self.shared.completed.load(Ordering::SeqCst),
      failed: self.shared.failed.load(Ordering::SeqCst),
    }
  }

  /// 关闭队列，等待工作线程处理完剩余任务后退出。可重复调用。
  pub fn shutdown(&self) {
    if lock(&self.sender).take().is_some() {
      info!("关闭推理调度器, 剩余 {} 个任务", self.shared.receiver.len());
    }
    // 替换线程可能在等待期间加入
    loop {
      let handles = std::mem::take(&mut *lock(&self.shared.workers));
      if handles.is_empty() {
        break;
      }
      for handle in handles {
        if handle.join().is_err() {
          error!("推理工作线程异常退出");
        }
      }
    }
  }
}

impl Drop for InferenceScheduler {
  fn drop(&mut self) {
    self.shutdown();
  }
}

impl Shared {
  fn spawn_worker(shared: &Arc<Shared>, id: usize, generation: u64) -> std::io::Result<()> {
    let worker = Arc::clone(shared);
    shared.live.fetch_add(1, Ordering::SeqCst);
    let spawned = thread::Builder::new()
      .name(format!("kanjian-infer-{}", id))
      .spawn(move || {
        worker.run(id, generation);
        worker.live.fetch_sub(1, Ordering::SeqCst);
      });
    match spawned {
      Ok(handle) => {
        lock(&shared.workers).push(handle);
        Ok(())
      }
      Err(err) => {
        shared.live.fetch_sub(1, Ordering::SeqCst);
        Err(err)
      }
    }
  }

  fn run(self: &Arc<Self>, id: usize, generation: u64) {
    let span = info_span!("inference.worker", worker = id, generation);
    let _guard = span.enter();
    debug!("推理工作线程启动");

    for task in self.receiver.iter() {
      let Task {
        job,
        reply,
        enqueued,
      } = task;
      if reply.is_closed() {
        debug!("请求方已取消, 跳过任务");
        continue;
      }

      let started = Instant::now();
      let (result, fatal) = self.infer(job);
      debug!(
        "推理完成: 排队 {:.2?}, 推理 {:.2?}",
        started.duration_since(enqueued),
        started.elapsed()
      );

      if result.is_ok() {
        self.completed.fetch_add(1, Ordering::SeqCst);
      } else {
        self.failed.fetch_add(1, Ordering::SeqCst);
      }

      let mut replaced = false;
      if fatal {
        warn!("推理引擎不可恢复, 替换工作线程 {}", id);
        match Shared::spawn_worker(self, id, generation + 1) {
          Ok(()) => {
            self.restarts.fetch_add(1, Ordering::SeqCst);
            replaced = true;
          }
          Err(err) => error!("无法启动替换工作线程, 当前线程继续服务: {}", err),
        }
      }

      if reply.send(result).is_err() {
        debug!("请求方已离开, 丢弃结果");
      }

      if replaced {
        break;
      }
    }
    debug!("推理工作线程退出");
  }

  fn infer(&self, job: InferenceJob) -> (Result<JobResult, SchedulerError>, bool) {
    let InferenceJob { frame, filter } = job;
    let class_ids = filter.class_ids();
    let engine = self.engine.as_ref();

    // 标签查询同样调用引擎，一并放在 panic 保护内
    let guarded = panic::catch_unwind(AssertUnwindSafe(|| {
      engine.predict(&frame, &class_ids).map(|items| {
        items
          .into_iter()
          .map(|item| Detection::from_item(item, engine))
          .collect::<Vec<_>>()
      })
    }));
    match guarded {
      Ok(Ok(detections)) => (Ok(JobResult { frame, detections }), false),
      Ok(Err(err)) => {
        error!("推理失败: {}", err);
        let fatal = err.is_fatal();
        (Err(SchedulerError::Inference(err.to_string())), fatal)
      }
      Err(payload) => {
        let message = panic_message(payload.as_ref());
        error!("推理引擎 panic: {}", message);
        (
          Err(SchedulerError::Inference(format!("推理引擎 panic: {}", message))),
          true,
        )
      }
    }
  }
}
