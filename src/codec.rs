// 该文件是 Kanjian （看见） 项目的一部分。
// src/codec.rs - 图像编解码
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

use std::io::Cursor;

use image::{ImageError, ImageReader, codecs::jpeg::JpegEncoder};
use thiserror::Error;
use tracing::debug;

use crate::frame::RgbFrame;

/// 默认 JPEG 质量，兼顾延迟与传输大小
pub const DEFAULT_JPEG_QUALITY: u8 = 78;
/// 压缩数据上限（20 MiB）
pub const DEFAULT_MAX_BYTES: usize = 20 * 1024 * 1024;
/// 解码后像素数上限，防止解压炸弹
pub const DEFAULT_MAX_PIXELS: u64 = 100_000_000;

#[derive(Error, Debug)]
pub enum CodecError {
  #[error("图像数据为空")]
  Empty,
  #[error("压缩图像过大: {size} 字节 (上限 {limit})")]
  TooLarge { size: usize, limit: usize },
  #[error("图像像素过多: {width}x{height}")]
  TooManyPixels { width: u32, height: u32 },
  #[error("无效的图像尺寸: {width}x{height}")]
  InvalidDimensions { width: u32, height: u32 },
  #[error("图像解码错误: {0}")]
  Decode(#[source] ImageError),
  #[error("图像编码错误: {0}")]
  Encode(#[source] ImageError),
}

#[derive(Debug, Clone, Copy)]
pub struct ImageCodec {
  max_bytes: usize,
  max_pixels: u64,
}

impl Default for ImageCodec {
  fn default() -> Self {
    Self {
      max_bytes: DEFAULT_MAX_BYTES,
      max_pixels: DEFAULT_MAX_PIXELS,
    }
  }
}

impl ImageCodec {
  pub fn with_max_bytes(mut self, max_bytes: usize) -> Self {
    self.max_bytes = max_bytes;
    self
  }

  pub fn with_max_pixels(mut self, max_pixels: u64) -> Self {
    self.max_pixels = max_pixels;
    self
  }

  pub fn max_bytes(&self) -> usize {
    self.max_bytes
  }

  /// 将压缩图像解码为 RGB 帧
  ///
  /// 格式由文件头推断，解码前先读取尺寸并检查像素上限。
  pub fn decode(&self, bytes: &[u8]) -> Result<RgbFrame, CodecError> {
    if bytes.is_empty() {
      return Err(CodecError::Empty);
    }
    if bytes.len() > self.max_bytes {
      return Err(CodecError::TooLarge {
        size: bytes.len(),
        limit: self.max_bytes,
      });
    }

    let (width, height) = Self::reader(bytes)?
      .into_dimensions()
      .map_err(CodecError::Decode)?;
    if width == 0 || height == 0 {
      return Err(CodecError::InvalidDimensions { width, height });
    }
    if (width as u64).saturating_mul(height as u64) > self.max_pixels {
      return Err(CodecError::TooManyPixels { width, height });
    }

    let image = Self::reader(bytes)?
      .decode()
      .map_err(CodecError::Decode)?
      .into_rgb8();
    debug!("解码图像: {}x{}, {} 字节", width, height, bytes.len());

    Ok(RgbFrame::from(image))
  }

  /// 以给定质量编码为 JPEG，质量 0 按 1 处理
  pub fn encode(&self, frame: &RgbFrame, quality: u8) -> Result<Vec<u8>, CodecError> {
    let quality = quality.clamp(1, 100);
    let mut buffer = Vec::new();
    JpegEncoder::new_with_quality(&mut buffer, quality)
      .encode_image(frame.as_image())
      .map_err(CodecError::Encode)?;
    debug!(
      "编码图像: {}x{}, 质量 {}, {} 字节",
      frame.width(),
      frame.height(),
      quality,
      buffer.len()
    );
    Ok(buffer)
  }

  fn reader(bytes: &[u8]) -> Result<ImageReader<Cursor<&[u8]>>, CodecError> {
    ImageReader::new(Cursor::new(bytes))
      .with_guessed_format()
      .map_err(|e| CodecError::Decode(ImageError::IoError(e)))
  }
}
