// 该文件是 Kanjian （看见） 项目的一部分。
// src/output/save_image_file.rs - 保存图像文件
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

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{info, warn};
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, output::report::DetectionReport};

/// 检测记录中类别的写法
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordLabel {
  Name,
  Id,
}

/// 将标注后的 JPEG 写入文件，可选地在旁边写一份 .txt 检测记录
#[derive(Debug)]
pub struct SaveImageFileOutput {
  path: PathBuf,
  record: Option<RecordLabel>,
}

#[derive(Error, Debug)]
pub enum SaveImageFileError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
  #[error("无效的 record 参数: {0} (应为 name 或 id)")]
  InvalidRecord(String),
}

impl FromUrlWithScheme for SaveImageFileOutput {
  const SCHEME: &'static str = "image";
}

impl FromUrl for SaveImageFileOutput {
  type Error = SaveImageFileError;

  fn from_url(uri: &Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(SaveImageFileError::SchemeMismatch(format!(
        "期望保存方式 '{}', 实际保存方式 '{}'",
        Self::SCHEME,
        uri.scheme()
      )));
    }

    let record = match uri.query_pairs().find(|(k, _)| k == "record") {
      None => None,
      Some((_, v)) if v == "name" => Some(RecordLabel::Name),
      Some((_, v)) if v == "id" => Some(RecordLabel::Id),
      Some((_, v)) => return Err(SaveImageFileError::InvalidRecord(v.into_owned())),
    };

    Ok(SaveImageFileOutput {
      path: PathBuf::from(uri.path()),
      record,
    })
  }
}

impl SaveImageFileOutput {
  pub fn path(&self) -> &Path {
    &self.path
  }

  pub fn save(&self, jpeg: &[u8], report: &DetectionReport) -> Result<(), SaveImageFileError> {
    if let Some(parent) = self.path.parent()
      && !parent.as_os_str().is_empty()
    {
      std::fs::create_dir_all(parent)?;
    }

    std::fs::write(&self.path, jpeg)?;
    info!("保存图像到文件: {}", self.path.display());

    if let Some(label) = self.record {
      report.write_records(&self.path, label == RecordLabel::Name)?;
      info!("保存检测记录: {}", self.path.with_extension("txt").display());
    } else if report.detected {
      warn!("未请求检测记录, {} 个检测结果仅保存在图像中", report.detections.len());
    }

    Ok(())
  }
}
