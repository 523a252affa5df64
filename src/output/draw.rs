// 该文件是 Kanjian （看见） 项目的一部分。
// src/output/draw.rs - 目标检测结果可视化
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

use image::{Rgb, RgbImage};
use imageproc::{drawing::draw_filled_rect_mut, rect::Rect};
use tracing::debug;

use crate::{
  filter::{ClassFilter, Color},
  frame::RgbFrame,
  model::Detection,
};

pub const DEFAULT_STROKE_WIDTH: u32 = 2;
pub const MAX_STROKE_WIDTH: u32 = 3;

/// 在帧上绘制关注类别的空心矩形框
///
/// 边框由框的边缘向内加粗，框 `(10, 10, 50, 50)` 覆盖两个方向上的 10..=50 像素。
#[derive(Clone)]
pub struct Draw {
  filter: Arc<ClassFilter>,
  stroke_width: u32,
}

impl Draw {
  pub fn new(filter: Arc<ClassFilter>) -> Self {
    Self {
      filter,
      stroke_width: DEFAULT_STROKE_WIDTH,
    }
  }

  pub fn with_stroke_width(mut self, stroke_width: u32) -> Self {
    self.stroke_width = stroke_width.clamp(1, MAX_STROKE_WIDTH);
    self
  }

  pub fn stroke_width(&self) -> u32 {
    self.stroke_width
  }

  pub fn color_for(&self, label: &str) -> Option<Color> {
    self.filter.color_for(label)
  }

  /// 按检测顺序绘制，后绘制的框覆盖先绘制的。返回实际绘制的框数。
  pub fn draw_boxes(&self, frame: &mut RgbFrame, detections: &[Detection]) -> usize {
    let image = frame.as_image_mut();
    let mut drawn = 0;
    for detection in detections {
      let Some(color) = self.color_for(&detection.label) else {
        continue;
      };
      if self.draw_bbox(image, &detection.normalized_bbox(), color) {
        drawn += 1;
      } else {
        debug!(
          "跳过框: {} {:?} 不在图像内",
          detection.label, detection.bbox
        );
      }
    }
    drawn
  }

  // bbox 为源图像像素坐标 [x_min, y_min, x_max, y_max]，已保证 min <= max
  fn draw_bbox(&self, image: &mut RgbImage, bbox: &[f32; 4], color: Color) -> bool {
    if !bbox.iter().all(|v| v.is_finite()) {
      return false;
    }
    let (w, h) = (image.width() as i64, image.height() as i64);
    let stroke = self.stroke_width as i64;

    let x_min = bbox[0].floor() as i64;
    let y_min = bbox[1].floor() as i64;
    let x_max = bbox[2].ceil() as i64;
    let y_max = bbox[3].ceil() as i64;

    if x_max < 0 || y_max < 0 || x_min >= w || y_min >= h {
      return false;
    }

    // 画布外的边落在画布外，由矩形与画布求交完成像素级裁剪
    let x_min = x_min.clamp(-stroke - 1, w + stroke);
    let y_min = y_min.clamp(-stroke - 1, h + stroke);
    let x_max = x_max.clamp(-stroke - 1, w + stroke);
    let y_max = y_max.clamp(-stroke - 1, h + stroke);

    let box_w = x_max - x_min + 1;
    let box_h = y_max - y_min + 1;
    let s = stroke.min(box_w).min(box_h);

    let strips = [
      (x_min, y_min, box_w, s),
      (x_min, y_max - s + 1, box_w, s),
      (x_min, y_min, s, box_h),
      (x_max - s + 1, y_min, s, box_h),
    ];
    for (x, y, sw, sh) in strips {
      let rect = Rect::at(x as i32, y as i32).of_size(sw as u32, sh as u32);
      draw_filled_rect_mut(image, rect, Rgb(color.0));
    }
    true
  }
}
