// 该文件是 Kanjian （看见） 项目的一部分。
// tests/common/mod.rs - 测试用检测引擎
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

#![allow(dead_code)]

use std::{
  io::Cursor,
  sync::{
    Arc, Condvar, Mutex,
    atomic::{AtomicUsize, Ordering},
  },
  thread,
  time::{Duration, Instant},
};

use image::{ImageFormat, RgbImage};
use kanjian::{
  filter::ClassFilter,
  frame::RgbFrame,
  model::{DetectItem, DetectionEngine, EngineError, coco},
  scheduler::{InferenceJob, InferenceScheduler, SchedulerConfig},
};

pub const PERSON: u32 = 0;
pub const BICYCLE: u32 = 1;
pub const CAR: u32 = 2;
pub const DOG: u32 = 16;

/// 手动打开的闸门，用来让引擎调用停在推理中
#[derive(Default)]
pub struct Gate {
  open: Mutex<bool>,
  cond: Condvar,
}

impl Gate {
  pub fn open(&self) {
    *self.open.lock().unwrap() = true;
    self.cond.notify_all();
  }

  fn wait(&self) {
    let mut open = self.open.lock().unwrap();
    while !*open {
      open = self.cond.wait(open).unwrap();
    }
  }
}

/// 记录调用情况的检测引擎
///
/// 按帧宽度触发失败、不可恢复错误或 panic，其余情况返回预设结果
/// （不按类别裁剪，便于检查流水线自身的过滤）。
#[derive(Default)]
pub struct StubEngine {
  detections: Vec<DetectItem>,
  delay: Duration,
  gate: Option<Arc<Gate>>,
  always_fail: bool,
  fail_on_width: Option<u32>,
  fatal_on_width: Option<u32>,
  panic_on_width: Option<u32>,
  panic_on_label: Option<u32>,
  pub calls: AtomicUsize,
  pub active: AtomicUsize,
  pub peak: AtomicUsize,
  pub last_class_ids: Mutex<Vec<u32>>,
}

struct Active<'a>(&'a AtomicUsize);

impl Drop for Active<'_> {
  fn drop(&mut self) {
    self.0.fetch_sub(1, Ordering::SeqCst);
  }
}

impl StubEngine {
  pub fn new(detections: Vec<DetectItem>) -> Self {
    Self {
      detections,
      ..Self::default()
    }
  }

  pub fn with_delay(mut self, delay: Duration) -> Self {
    self.delay = delay;
    self
  }

  pub fn with_gate(mut self, gate: Arc<Gate>) -> Self {
    self.gate = Some(gate);
    self
  }

  pub fn always_failing(mut self) -> Self {
    self.always_fail = true;
    self
  }

  pub fn failing_on_width(mut self, width: u32) -> Self {
    self.fail_on_width = Some(width);
    self
  }

  pub fn fatal_on_width(mut self, width: u32) -> Self {
    self.fatal_on_width = Some(width);
    self
  }

  pub fn panicking_on_width(mut self, width: u32) -> Self {
    self.panic_on_width = Some(width);
    self
  }

  /// 查询该类别的标签时 panic
  pub fn panicking_on_label(mut self, class_id: u32) -> Self {
    self.panic_on_label = Some(class_id);
    self
  }

  pub fn calls(&self) -> usize {
    self.calls.load(Ordering::SeqCst)
  }

  pub fn active(&self) -> usize {
    self.active.load(Ordering::SeqCst)
  }

  pub fn peak(&self) -> usize {
    self.peak.load(Ordering::SeqCst)
  }
}

impl DetectionEngine for StubEngine {
  fn predict(&self, frame: &RgbFrame, class_ids: &[u32]) -> Result<Vec<DetectItem>, EngineError> {
    self.calls.fetch_add(1, Ordering::SeqCst);
    let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
    self.peak.fetch_max(now, Ordering::SeqCst);
    let _active = Active(&self.active);
    *self.last_class_ids.lock().unwrap() = class_ids.to_vec();

    if let Some(gate) = &self.gate {
      gate.wait();
    }
    if !self.delay.is_zero() {
      thread::sleep(self.delay);
    }

    let width = Some(frame.width());
    if self.always_fail || width == self.fail_on_width {
      return Err(EngineError::Inference("stub failure".to_string()));
    }
    if width == self.fatal_on_width {
      return Err(EngineError::Fatal("stub context lost".to_string()));
    }
    if width == self.panic_on_width {
      panic!("stub panic");
    }
    Ok(self.detections.clone())
  }

  fn label_for(&self, class_id: u32) -> Option<&str> {
    if self.panic_on_label == Some(class_id) {
      panic!("stub label panic");
    }
    coco::label(class_id)
  }

  fn class_count(&self) -> u32 {
    coco::COCO_CLASSES.len() as u32
  }

  fn name(&self) -> &str {
    "stub"
  }
}

pub fn item(class_id: u32, score: f32, bbox: [f32; 4]) -> DetectItem {
  DetectItem {
    class_id,
    score,
    bbox,
  }
}

/// 编码一张全黑 PNG
pub fn black_png(width: u32, height: u32) -> Vec<u8> {
  let mut buffer = Cursor::new(Vec::new());
  RgbImage::new(width, height)
    .write_to(&mut buffer, ImageFormat::Png)
    .unwrap();
  buffer.into_inner()
}

pub fn scheduler(
  engine: &Arc<StubEngine>,
  config: SchedulerConfig,
) -> (Arc<InferenceScheduler>, Arc<ClassFilter>) {
  let filter = ClassFilter::default().resolve(&**engine).unwrap();
  let scheduler = InferenceScheduler::new(engine.clone(), config).unwrap();
  (Arc::new(scheduler), Arc::new(filter))
}

pub fn job(width: u32, filter: &Arc<ClassFilter>) -> InferenceJob {
  InferenceJob::new(RgbFrame::with_shape(width, 8), Arc::clone(filter))
}

/// 轮询直到条件成立，超过 5 秒视为失败
pub async fn wait_until(what: &str, cond: impl Fn() -> bool) {
  let deadline = Instant::now() + Duration::from_secs(5);
  while !cond() {
    assert!(Instant::now() < deadline, "等待超时: {}", what);
    tokio::time::sleep(Duration::from_millis(5)).await;
  }
}
