// 该文件是 Kanjian （看见） 项目的一部分。
// src/filter.rs - 关注类别与颜色表
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

use std::{fmt, str::FromStr};

use thiserror::Error;
use tracing::debug;

use crate::model::DetectionEngine;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FilterError {
  #[error("无法识别的颜色: {0}")]
  UnknownColor(String),
  #[error("类别条目格式错误 (应为 LABEL=COLOR): {0}")]
  MalformedEntry(String),
  #[error("检测引擎不认识类别: {0}")]
  UnknownLabel(String),
  #[error("类别重复: {0}")]
  DuplicateLabel(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Color(pub [u8; 3]);

impl Color {
  // 与 PIL 的同名颜色一致
  pub const GREEN: Color = Color([0, 128, 0]);
  pub const BLUE: Color = Color([0, 0, 255]);
  pub const YELLOW: Color = Color([255, 255, 0]);
  pub const ORANGE: Color = Color([255, 165, 0]);
  pub const RED: Color = Color([255, 0, 0]);
  pub const WHITE: Color = Color([255, 255, 255]);
  pub const BLACK: Color = Color([0, 0, 0]);
  pub const CYAN: Color = Color([0, 255, 255]);
  pub const MAGENTA: Color = Color([255, 0, 255]);
  pub const PURPLE: Color = Color([128, 0, 128]);

  const NAMED: [(&'static str, Color); 10] = [
    ("green", Color::GREEN),
    ("blue", Color::BLUE),
    ("yellow", Color::YELLOW),
    ("orange", Color::ORANGE),
    ("red", Color::RED),
    ("white", Color::WHITE),
    ("black", Color::BLACK),
    ("cyan", Color::CYAN),
    ("magenta", Color::MAGENTA),
    ("purple", Color::PURPLE),
  ];
}

impl FromStr for Color {
  type Err = FilterError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let name = s.trim().to_ascii_lowercase();
    if let Some((_, color)) = Color::NAMED.iter().find(|(n, _)| *n == name) {
      return Ok(*color);
    }

    let hex = name
      .strip_prefix('#')
      .filter(|h| h.len() == 6 && h.is_ascii())
      .ok_or_else(|| FilterError::UnknownColor(s.to_string()))?;
    let channel = |i: usize| {
      u8::from_str_radix(&hex[i..i + 2], 16).map_err(|_| FilterError::UnknownColor(s.to_string()))
    };
    Ok(Color([channel(0)?, channel(2)?, channel(4)?]))
  }
}

impl fmt::Display for Color {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let [r, g, b] = self.0;
    write!(f, "#{:02x}{:02x}{:02x}", r, g, b)
  }
}

/// 一条关注类别：标签、显示颜色，以及启动时从引擎标签表解析出的类别编号
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassEntry {
  pub label: String,
  pub color: Color,
  pub class_id: Option<u32>,
}

impl FromStr for ClassEntry {
  type Err = FilterError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let (label, color) = s
      .split_once('=')
      .ok_or_else(|| FilterError::MalformedEntry(s.to_string()))?;
    let label = label.trim().to_ascii_lowercase();
    if label.is_empty() {
      return Err(FilterError::MalformedEntry(s.to_string()));
    }
    Ok(ClassEntry {
      label,
      color: color.parse()?,
      class_id: None,
    })
  }
}

impl fmt::Display for ClassEntry {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}={}", self.label, self.color)
  }
}

/// 部署级的关注类别表。启动后只读，由所有请求共享。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassFilter {
  entries: Vec<ClassEntry>,
}

impl Default for ClassFilter {
  fn default() -> Self {
    Self {
      entries: vec![
        ClassEntry::new("person", Color::GREEN),
        ClassEntry::new("car", Color::BLUE),
        ClassEntry::new("motorcycle", Color::YELLOW),
        ClassEntry::new("bicycle", Color::ORANGE),
      ],
    }
  }
}

impl ClassEntry {
  pub fn new(label: &str, color: Color) -> Self {
    Self {
      label: label.to_ascii_lowercase(),
      color,
      class_id: None,
    }
  }
}

impl ClassFilter {
  pub fn new(entries: impl IntoIterator<Item = ClassEntry>) -> Result<Self, FilterError> {
    let mut checked: Vec<ClassEntry> = Vec::new();
    for entry in entries {
      if checked.iter().any(|e| e.label == entry.label) {
        return Err(FilterError::DuplicateLabel(entry.label));
      }
      checked.push(entry);
    }
    Ok(Self { entries: checked })
  }

  /// 用引擎的标签表填充每个类别的编号
  pub fn resolve(mut self, engine: &dyn DetectionEngine) -> Result<Self, FilterError> {
    for entry in self.entries.iter_mut() {
      let id = engine
        .class_id_for(&entry.label)
        .ok_or_else(|| FilterError::UnknownLabel(entry.label.clone()))?;
      debug!("类别 {} -> {} ({})", entry.label, id, entry.color);
      entry.class_id = Some(id);
    }
    Ok(self)
  }

  /// 标签不在表中时返回 None，表示不绘制
  pub fn color_for(&self, label: &str) -> Option<Color> {
    self
      .entries
      .iter()
      .find(|e| e.label.eq_ignore_ascii_case(label))
      .map(|e| e.color)
  }

  pub fn contains(&self, label: &str) -> bool {
    self.color_for(label).is_some()
  }

  /// 已解析的类别编号，传给引擎用于裁剪输出
  pub fn class_ids(&self) -> Vec<u32> {
    self.entries.iter().filter_map(|e| e.class_id).collect()
  }

  pub fn entries(&self) -> &[ClassEntry] {
    &self.entries
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    frame::RgbFrame,
    model::{DetectItem, EngineError, coco},
  };

  struct Coco;

  impl DetectionEngine for Coco {
    fn predict(&self, _: &RgbFrame, _: &[u32]) -> Result<Vec<DetectItem>, EngineError> {
      Ok(Vec::new())
    }

    fn label_for(&self, class_id: u32) -> Option<&str> {
      coco::label(class_id)
    }

    fn class_count(&self) -> u32 {
      coco::COCO_CLASSES.len() as u32
    }
  }

  #[test]
  fn parses_named_and_hex_colors() {
    assert_eq!("green".parse::<Color>().unwrap(), Color::GREEN);
    assert_eq!(" Orange ".parse::<Color>().unwrap(), Color::ORANGE);
    assert_eq!("#10a0Ff".parse::<Color>().unwrap(), Color([0x10, 0xa0, 0xff]));
    assert!("#12345".parse::<Color>().is_err());
    assert!("#zz0000".parse::<Color>().is_err());
    assert!("chartreuse".parse::<Color>().is_err());
    assert_eq!(Color::BLUE.to_string(), "#0000ff");
  }

  #[test]
  fn parses_class_entries() {
    let entry: ClassEntry = "Person=green".parse().unwrap();
    assert_eq!(entry, ClassEntry::new("person", Color::GREEN));
    assert!(matches!(
      "person".parse::<ClassEntry>(),
      Err(FilterError::MalformedEntry(_))
    ));
    assert!(matches!(
      "=green".parse::<ClassEntry>(),
      Err(FilterError::MalformedEntry(_))
    ));
    assert_eq!(entry.to_string(), "person=#008000");
  }

  #[test]
  fn default_table_matches_original_colors() {
    let filter = ClassFilter::default();
    assert_eq!(filter.color_for("person"), Some(Color::GREEN));
    assert_eq!(filter.color_for("CAR"), Some(Color::BLUE));
    assert_eq!(filter.color_for("motorcycle"), Some(Color::YELLOW));
    assert_eq!(filter.color_for("bicycle"), Some(Color::ORANGE));
    assert_eq!(filter.color_for("dog"), None);
  }

  #[test]
  fn resolves_class_ids_against_engine() {
    let filter = ClassFilter::default().resolve(&Coco).unwrap();
    assert_eq!(filter.class_ids(), vec![0, 2, 3, 1]);

    let unknown = ClassFilter::new([ClassEntry::new("unicorn", Color::RED)])
      .unwrap()
      .resolve(&Coco);
    assert_eq!(unknown, Err(FilterError::UnknownLabel("unicorn".to_string())));
  }

  #[test]
  fn rejects_duplicate_labels() {
    let result = ClassFilter::new([
      ClassEntry::new("person", Color::GREEN),
      ClassEntry::new("Person", Color::RED),
    ]);
    assert_eq!(result, Err(FilterError::DuplicateLabel("person".to_string())));
  }
}
