// 该文件是 Shanan （山南西风） 项目的一部分。
// src/element.rs - 候选元素与规范元素定义
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

use std::{collections::BTreeSet, fmt};

use serde::{Deserialize, Serialize};

use crate::geometry::BBox;

/// 模型能识别的元素种类，用作标签与提示词的元素提示
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementKind {
  Text,
  Icon,
  Chart,
}

impl ElementKind {
  pub const ALL: [ElementKind; 3] = [ElementKind::Text, ElementKind::Icon, ElementKind::Chart];

  pub fn label(&self) -> &'static str {
    match self {
      ElementKind::Text => "text",
      ElementKind::Icon => "icon",
      ElementKind::Chart => "chart",
    }
  }

  pub fn from_label(label: &str) -> Option<Self> {
    ElementKind::ALL
      .into_iter()
      .find(|kind| kind.label().eq_ignore_ascii_case(label.trim()))
  }
}

impl fmt::Display for ElementKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.label())
  }
}

/// 分割模型返回的原始候选，不可信
#[derive(Debug, Clone, PartialEq)]
pub struct RawCandidate {
  pub bbox: BBox,
  pub label: String,
  pub confidence: f32,
  pub source_index: usize,
  /// 文字内容或描述
  pub detail: Option<String>,
}

impl RawCandidate {
  pub fn new(bbox: BBox, label: impl Into<String>, confidence: f32, source_index: usize) -> Self {
    Self {
      bbox,
      label: label.into(),
      confidence,
      source_index,
      detail: None,
    }
  }

  pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
    self.detail = Some(detail.into());
    self
  }
}

/// 经过校验、去重与几何优化的元素
#[derive(Debug, Clone, PartialEq)]
pub struct Element {
  pub id: u32,
  pub bbox: BBox,
  pub label: String,
  pub confidence: f32,
  pub merged_from: BTreeSet<usize>,
  pub detail: Option<String>,
}

impl Element {
  /// 作为候选重新输入处理流程，置信度记为 1.0
  pub fn to_candidate(&self, source_index: usize) -> RawCandidate {
    RawCandidate {
      bbox: self.bbox,
      label: self.label.clone(),
      confidence: 1.0,
      source_index,
      detail: self.detail.clone(),
    }
  }

  pub fn to_record(&self) -> ElementRecord {
    ElementRecord::from(self)
  }
}

/// 对外输出的元素记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElementRecord {
  pub id: u32,
  pub x: u32,
  pub y: u32,
  pub w: u32,
  pub h: u32,
  pub label: String,
  pub confidence: f32,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub detail: Option<String>,
}

impl From<&Element> for ElementRecord {
  fn from(element: &Element) -> Self {
    // 优化阶段已对齐到整数像素
    ElementRecord {
      id: element.id,
      x: element.bbox.x.round() as u32,
      y: element.bbox.y.round() as u32,
      w: element.bbox.w.round() as u32,
      h: element.bbox.h.round() as u32,
      label: element.label.clone(),
      confidence: element.confidence,
      detail: element.detail.clone(),
    }
  }
}
