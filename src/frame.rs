// 该文件是 Kanjian （看见） 项目的一部分。
// src/frame.rs - RGB 帧定义
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

use image::{Rgb, RgbImage};
use thiserror::Error;

pub const RGB_CHANNELS: usize = 3;

#[derive(Error, Debug)]
pub enum FrameError {
  #[error("数据长度不匹配: 期望长度 {expected}, 实际长度 {actual}")]
  ShapeMismatch { expected: usize, actual: usize },
}

/// 解码后的图像帧，按行主序存放 RGB 三通道数据（即 NHWC，N = 1）。
///
/// 每个帧只属于一个请求：解码后移交给推理任务，推理结束随结果一同归还，
/// 再由绘制模块原地修改。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RgbFrame {
  image: RgbImage,
}

impl RgbFrame {
  /// 创建全黑帧
  pub fn with_shape(width: u32, height: u32) -> Self {
    Self {
      image: RgbImage::new(width, height),
    }
  }

  pub fn from_raw(width: u32, height: u32, data: Vec<u8>) -> Result<Self, FrameError> {
    let expected = RGB_CHANNELS * width as usize * height as usize;
    let actual = data.len();
    RgbImage::from_raw(width, height, data)
      .map(|image| Self { image })
      .ok_or(FrameError::ShapeMismatch { expected, actual })
  }

  pub fn width(&self) -> u32 {
    self.image.width()
  }

  pub fn height(&self) -> u32 {
    self.image.height()
  }

  pub fn channels(&self) -> usize {
    RGB_CHANNELS
  }

  pub fn as_nhwc(&self) -> &[u8] {
    self.image.as_raw()
  }

  /// 越界时返回 None
  pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 3]> {
    if x < self.width() && y < self.height() {
      Some(self.image.get_pixel(x, y).0)
    } else {
      None
    }
  }

  pub fn fill(&mut self, color: [u8; 3]) {
    for pixel in self.image.pixels_mut() {
      *pixel = Rgb(color);
    }
  }

  pub fn as_image(&self) -> &RgbImage {
    &self.image
  }

  pub fn as_image_mut(&mut self) -> &mut RgbImage {
    &mut self.image
  }

  pub fn into_image(self) -> RgbImage {
    self.image
  }
}

impl AsMut<[u8]> for RgbFrame {
  fn as_mut(&mut self) -> &mut [u8] {
    &mut self.image
  }
}

impl From<RgbImage> for RgbFrame {
  fn from(image: RgbImage) -> Self {
    Self { image }
  }
}
