// 该文件是 Shanan （山南西风） 项目的一部分。
// src/processor.rs - 分割结果后处理：校验、去重与边界框优化
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

use std::{
  cmp::Ordering,
  collections::{BTreeMap, BTreeSet},
};

use image::RgbImage;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::{
  background::BackgroundCategory,
  element::{Element, RawCandidate},
  frame::ImageFrame,
  geometry::{BBox, ImageBounds},
};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProcessError {
  #[error("图像尺寸无效: {width}x{height}")]
  InvalidImageBounds { width: u32, height: u32 },
}

/// 后处理配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessorConfig {
  /// 置信度下限
  pub min_confidence: f32,
  /// IoU 超过该值的候选归为同一簇
  pub dedup_iou_threshold: f32,
  /// 裁剪后面积占原面积的最小比例
  pub min_clip_fraction: f32,
  /// 在纹理或复杂背景下收紧边界框
  pub enable_bbox_tightening: bool,
  /// 各标签的最小面积（像素²）
  pub min_area_by_label: BTreeMap<String, f32>,
  /// 与局部背景色的通道差之和达到该值的像素视为内容
  pub tighten_contrast: u16,
  /// 行/列中内容像素占比达到该值才计入内容范围
  pub tighten_min_fraction: f32,
  /// 估计局部背景色时采样的外圈宽度
  pub tighten_ring: u32,
  /// 局部背景最多保留的主色数
  pub tighten_palette: usize,
  /// 主色在外圈像素中的最小占比
  pub tighten_palette_min_share: f32,
}

impl Default for ProcessorConfig {
  fn default() -> Self {
    Self {
      min_confidence: 0.3,
      dedup_iou_threshold: 0.5,
      min_clip_fraction: 0.5,
      enable_bbox_tightening: true,
      min_area_by_label: BTreeMap::from([
        ("text".to_string(), 100.0),
        ("icon".to_string(), 200.0),
        ("chart".to_string(), 500.0),
      ]),
      tighten_contrast: 48,
      tighten_min_fraction: 0.02,
      tighten_ring: 2,
      tighten_palette: 16,
      tighten_palette_min_share: 0.01,
    }
  }
}

impl ProcessorConfig {
  pub fn min_area(&self, label: &str) -> f32 {
    self.min_area_by_label.get(label).copied().unwrap_or(0.0)
  }
}

/// 各阶段丢弃与合并的计数
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Diagnostics {
  pub received: usize,
  pub invalid_confidence: usize,
  pub low_confidence: usize,
  pub invalid_geometry: usize,
  pub empty_after_clip: usize,
  pub mostly_outside: usize,
  pub too_small: usize,
  pub duplicate_index: usize,
  pub accepted: usize,
  pub merged: usize,
  pub subsumed: usize,
  pub collapsed: usize,
  pub emitted: usize,
}

impl Diagnostics {
  pub fn rejected(&self) -> usize {
    self.invalid_confidence
      + self.low_confidence
      + self.invalid_geometry
      + self.empty_after_clip
      + self.mostly_outside
      + self.too_small
      + self.duplicate_index
  }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Processed {
  pub elements: Vec<Element>,
  pub diagnostics: Diagnostics,
}

// 处理中的元素
#[derive(Debug, Clone)]
struct Draft {
  bbox: BBox,
  label: String,
  confidence: f32,
  members: BTreeSet<usize>,
  detail: Option<String>,
}

impl Draft {
  fn key(&self) -> usize {
    self.members.first().copied().unwrap_or(usize::MAX)
  }
}

// 置信度高者优先，其次面积大者，再次来源索引小者
fn rank(a: &Draft, b: &Draft) -> Ordering {
  b.confidence
    .total_cmp(&a.confidence)
    .then_with(|| b.bbox.area().total_cmp(&a.bbox.area()))
    .then_with(|| a.key().cmp(&b.key()))
}

/// 并查集，按秩合并并压缩路径
struct UnionFind {
  parent: Vec<usize>,
  rank: Vec<usize>,
}

impl UnionFind {
  fn new(len: usize) -> Self {
    Self {
      parent: (0..len).collect(),
      rank: vec![0; len],
    }
  }

  fn find(&mut self, x: usize) -> usize {
    if self.parent[x] != x {
      let root = self.find(self.parent[x]);
      self.parent[x] = root;
    }
    self.parent[x]
  }

  fn union(&mut self, x: usize, y: usize) {
    let root_x = self.find(x);
    let root_y = self.find(y);
    if root_x == root_y {
      return;
    }

    match self.rank[root_x].cmp(&self.rank[root_y]) {
      Ordering::Greater => self.parent[root_y] = root_x,
      Ordering::Less => self.parent[root_x] = root_y,
      Ordering::Equal => {
        self.parent[root_y] = root_x;
        self.rank[root_x] += 1;
      }
    }
  }

  /// 按最小成员排序的分组，组内成员升序
  fn groups(&mut self) -> Vec<Vec<usize>> {
    let mut slots: BTreeMap<usize, usize> = BTreeMap::new();
    let mut groups: Vec<Vec<usize>> = Vec::new();
    for x in 0..self.parent.len() {
      let root = self.find(x);
      let slot = *slots.entry(root).or_insert_with(|| {
        groups.push(Vec::new());
        groups.len() - 1
      });
      groups[slot].push(x);
    }
    groups
  }
}

#[derive(Debug, Clone, Default)]
pub struct ResultProcessor {
  config: ProcessorConfig,
}

impl ResultProcessor {
  pub fn new(config: ProcessorConfig) -> Self {
    Self { config }
  }

  pub fn config(&self) -> &ProcessorConfig {
    &self.config
  }

  /// 只依据图像尺寸处理候选，不做基于像素的收紧
  pub fn process(
    &self,
    candidates: &[RawCandidate],
    bounds: ImageBounds,
  ) -> Result<Processed, ProcessError> {
    self.run(candidates, bounds, None)
  }

  /// 处理候选，纹理或复杂背景下按配置收紧边界框
  pub fn process_frame(
    &self,
    candidates: &[RawCandidate],
    frame: &ImageFrame,
    category: BackgroundCategory,
  ) -> Result<Processed, ProcessError> {
    let pixels = (self.config.enable_bbox_tightening && category.is_decorative()).then(|| frame.rgb());
    self.run(candidates, frame.bounds(), pixels)
  }

  fn run(
    &self,
    candidates: &[RawCandidate],
    bounds: ImageBounds,
    pixels: Option<&RgbImage>,
  ) -> Result<Processed, ProcessError> {
    if bounds.is_degenerate() {
      return Err(ProcessError::InvalidImageBounds {
        width: bounds.width,
        height: bounds.height,
      });
    }

    let mut diagnostics = Diagnostics {
      received: candidates.len(),
      ..Default::default()
    };

    let drafts = self.validate(candidates, bounds, &mut diagnostics);
    let drafts = self.deduplicate(drafts, &mut diagnostics);
    let drafts = self.optimize(drafts, bounds, pixels, &mut diagnostics);
    // 优化可能让相邻框重新超过阈值
    let mut drafts = self.deduplicate(drafts, &mut diagnostics);

    drafts.sort_by_key(|draft| draft.key());
    let mut elements: Vec<Element> = drafts
      .into_iter()
      .enumerate()
      .map(|(id, draft)| Element {
        id: id as u32,
        bbox: draft.bbox,
        label: draft.label,
        confidence: draft.confidence,
        merged_from: draft.members,
        detail: draft.detail,
      })
      .collect();

    elements.sort_by(|a, b| {
      b.bbox
        .area()
        .total_cmp(&a.bbox.area())
        .then_with(|| a.id.cmp(&b.id))
    });

    diagnostics.emitted = elements.len();
    debug!("后处理统计: {:?}", diagnostics);

    Ok(Processed {
      elements,
      diagnostics,
    })
  }

  fn validate(
    &self,
    candidates: &[RawCandidate],
    bounds: ImageBounds,
    diagnostics: &mut Diagnostics,
  ) -> Vec<Draft> {
    let mut ordered: Vec<&RawCandidate> = candidates.iter().collect();
    ordered.sort_by_key(|candidate| candidate.source_index);

    let mut seen = BTreeSet::new();
    let mut accepted = Vec::new();

    for candidate in ordered {
      let confidence = candidate.confidence;
      if !confidence.is_finite() || !(0.0..=1.0).contains(&confidence) {
        diagnostics.invalid_confidence += 1;
        continue;
      }
      if confidence < self.config.min_confidence {
        diagnostics.low_confidence += 1;
        continue;
      }
      if !candidate.bbox.is_finite() {
        diagnostics.invalid_geometry += 1;
        continue;
      }

      let clipped = candidate.bbox.clip(bounds);
      if clipped.area() <= 0.0 {
        diagnostics.empty_after_clip += 1;
        continue;
      }
      if clipped.area() < self.config.min_clip_fraction * candidate.bbox.area() {
        diagnostics.mostly_outside += 1;
        continue;
      }
      if clipped.area() < self.config.min_area(&candidate.label) {
        diagnostics.too_small += 1;
        continue;
      }
      if !seen.insert(candidate.source_index) {
        diagnostics.duplicate_index += 1;
        continue;
      }

      accepted.push(Draft {
        bbox: clipped,
        label: candidate.label.clone(),
        confidence,
        members: BTreeSet::from([candidate.source_index]),
        detail: candidate.detail.clone(),
      });
    }

    diagnostics.accepted = accepted.len();
    accepted
  }

  /// 按 IoU 关系的传递闭包聚类，直到没有超过阈值的框对
  fn deduplicate(&self, mut drafts: Vec<Draft>, diagnostics: &mut Diagnostics) -> Vec<Draft> {
    let threshold = self.config.dedup_iou_threshold;
    loop {
      let len = drafts.len();
      let mut union_find = UnionFind::new(len);
      let mut linked = false;
      for i in 0..len {
        for j in (i + 1)..len {
          if drafts[i].bbox.iou(&drafts[j].bbox) > threshold {
            union_find.union(i, j);
            linked = true;
          }
        }
      }
      if !linked {
        return drafts;
      }

      let mut slots: Vec<Option<Draft>> = drafts.into_iter().map(Some).collect();
      drafts = union_find
        .groups()
        .into_iter()
        .filter_map(|group| {
          let members: Vec<Draft> = group.iter().filter_map(|&i| slots[i].take()).collect();
          resolve_cluster(members, diagnostics)
        })
        .collect();
    }
  }

  fn optimize(
    &self,
    drafts: Vec<Draft>,
    bounds: ImageBounds,
    pixels: Option<&RgbImage>,
    diagnostics: &mut Diagnostics,
  ) -> Vec<Draft> {
    let mut optimized = Vec::with_capacity(drafts.len());
    for mut draft in drafts {
      let mut bbox = draft.bbox.snap(bounds);
      if let Some(image) = pixels {
        bbox = tighten(image, bbox, &self.config);
      }
      if bbox.area() <= 0.0 || bbox.area() < self.config.min_area(&draft.label) {
        diagnostics.collapsed += 1;
        continue;
      }
      draft.bbox = bbox;
      optimized.push(draft);
    }
    optimized
  }
}

fn resolve_cluster(mut members: Vec<Draft>, diagnostics: &mut Diagnostics) -> Option<Draft> {
  members.sort_by(rank);
  let same_label = members.iter().all(|m| m.label == members[0].label);
  let mut iter = members.into_iter();
  let mut best = iter.next()?;

  for other in iter {
    if same_label {
      diagnostics.merged += other.members.len();
      best.bbox = best.bbox.union(&other.bbox);
      best.members.extend(other.members);
    } else {
      diagnostics.subsumed += other.members.len();
    }
  }
  Some(best)
}

/// 以框外一圈的主要颜色作为局部背景，收缩到主要内容所在的最小矩形
///
/// 与所有背景主色都有明显差异的像素才视为内容，条纹、平铺等多色背景不会被计入。
fn tighten(image: &RgbImage, bbox: BBox, config: &ProcessorConfig) -> BBox {
  let (width, height) = image.dimensions();
  let x0 = (bbox.x as u32).min(width);
  let y0 = (bbox.y as u32).min(height);
  let x1 = (bbox.right() as u32).min(width);
  let y1 = (bbox.bottom() as u32).min(height);
  if x1 <= x0 || y1 <= y0 {
    return bbox;
  }

  let palette = ring_palette(image, (x0, y0, x1, y1), config);
  let (w, h) = ((x1 - x0) as usize, (y1 - y0) as usize);
  let mut rows = vec![0usize; h];
  let mut cols = vec![0usize; w];

  for y in y0..y1 {
    for x in x0..x1 {
      let pixel = image.get_pixel(x, y);
      let nearest = palette
        .iter()
        .map(|color| (0..3).map(|c| pixel[c].abs_diff(color[c]) as u16).sum::<u16>())
        .min()
        .unwrap_or(u16::MAX);
      if nearest >= config.tighten_contrast {
        rows[(y - y0) as usize] += 1;
        cols[(x - x0) as usize] += 1;
      }
    }
  }

  let row_min = ((config.tighten_min_fraction * w as f32).ceil() as usize).max(1);
  let col_min = ((config.tighten_min_fraction * h as f32).ceil() as usize).max(1);
  let active_rows = rows.iter().position(|&n| n >= row_min).zip(rows.iter().rposition(|&n| n >= row_min));
  let active_cols = cols.iter().position(|&n| n >= col_min).zip(cols.iter().rposition(|&n| n >= col_min));

  match (active_rows, active_cols) {
    (Some((top, bottom)), Some((left, right))) => BBox::from_corners(
      (x0 as usize + left) as f32,
      (y0 as usize + top) as f32,
      (x0 as usize + right + 1) as f32,
      (y0 as usize + bottom + 1) as f32,
    ),
    // 与局部背景无法区分
    _ => BBox::new(x0 as f32, y0 as f32, 0.0, 0.0),
  }
}

// 每通道量化为 32 级
const PALETTE_SHIFT: u8 = 3;

/// 框外一圈像素按颜色分桶，取占比足够的前若干个桶的均值
fn ring_palette(
  image: &RgbImage,
  (x0, y0, x1, y1): (u32, u32, u32, u32),
  config: &ProcessorConfig,
) -> Vec<[u8; 3]> {
  let (width, height) = image.dimensions();
  let ring = config.tighten_ring.max(1);
  let rx0 = x0.saturating_sub(ring);
  let ry0 = y0.saturating_sub(ring);
  let rx1 = (x1 + ring).min(width);
  let ry1 = (y1 + ring).min(height);

  let mut samples = Vec::new();
  for y in ry0..ry1 {
    for x in rx0..rx1 {
      if x >= x0 && x < x1 && y >= y0 && y < y1 {
        continue;
      }
      samples.push(*image.get_pixel(x, y));
    }
  }

  // 框覆盖整幅图像时退化为框内最外一圈
  if samples.is_empty() {
    for y in y0..y1 {
      for x in x0..x1 {
        if x == x0 || x == x1 - 1 || y == y0 || y == y1 - 1 {
          samples.push(*image.get_pixel(x, y));
        }
      }
    }
  }

  let mut bins: BTreeMap<[u8; 3], (usize, [u32; 3])> = BTreeMap::new();
  for pixel in &samples {
    let key = pixel.0.map(|v| v >> PALETTE_SHIFT);
    let (count, sum) = bins.entry(key).or_insert((0, [0; 3]));
    *count += 1;
    for c in 0..3 {
      sum[c] += pixel[c] as u32;
    }
  }

  let mut ranked: Vec<(usize, [u32; 3])> = bins.into_values().collect();
  ranked.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));
  let min_count = config.tighten_palette_min_share * samples.len() as f32;
  ranked
    .into_iter()
    .enumerate()
    .take_while(|(i, (count, _))| *i == 0 || *count as f32 >= min_count)
    .take(config.tighten_palette.max(1))
    .map(|(_, (count, sum))| sum.map(|v| (v / count as u32) as u8))
    .collect()
}
