// 该文件是 Shanan （山南西风） 项目的一部分。
// src/geometry.rs - 边界框几何运算
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

use serde::{Deserialize, Serialize};

/// 图像尺寸（像素）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageBounds {
  pub width: u32,
  pub height: u32,
}

impl ImageBounds {
  pub fn new(width: u32, height: u32) -> Self {
    Self { width, height }
  }

  pub fn is_degenerate(&self) -> bool {
    self.width == 0 || self.height == 0
  }

  pub fn area(&self) -> f32 {
    self.width as f32 * self.height as f32
  }
}

/// 边界框，格式为 (x, y, w, h)，单位像素，原点在左上角
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BBox {
  pub x: f32,
  pub y: f32,
  pub w: f32,
  pub h: f32,
}

impl BBox {
  pub fn new(x: f32, y: f32, w: f32, h: f32) -> Self {
    Self { x, y, w, h }
  }

  /// 由两个角点构造
  pub fn from_corners(x0: f32, y0: f32, x1: f32, y1: f32) -> Self {
    Self {
      x: x0,
      y: y0,
      w: x1 - x0,
      h: y1 - y0,
    }
  }

  pub fn right(&self) -> f32 {
    self.x + self.w
  }

  pub fn bottom(&self) -> f32 {
    self.y + self.h
  }

  /// 面积，宽或高非正时为 0
  pub fn area(&self) -> f32 {
    if self.w <= 0.0 || self.h <= 0.0 {
      0.0
    } else {
      self.w * self.h
    }
  }

  pub fn is_finite(&self) -> bool {
    self.x.is_finite() && self.y.is_finite() && self.w.is_finite() && self.h.is_finite()
  }

  /// 裁剪到 [0, W] × [0, H]，完全在图像外时宽高为 0
  pub fn clip(&self, bounds: ImageBounds) -> BBox {
    let (bw, bh) = (bounds.width as f32, bounds.height as f32);
    let x0 = self.x.clamp(0.0, bw);
    let y0 = self.y.clamp(0.0, bh);
    let x1 = self.right().clamp(0.0, bw);
    let y1 = self.bottom().clamp(0.0, bh);
    BBox::from_corners(x0, y0, x1.max(x0), y1.max(y0))
  }

  pub fn intersection_area(&self, other: &BBox) -> f32 {
    let x_overlap = (self.right().min(other.right()) - self.x.max(other.x)).max(0.0);
    let y_overlap = (self.bottom().min(other.bottom()) - self.y.max(other.y)).max(0.0);
    x_overlap * y_overlap
  }

  /// 计算两个边界框的 IoU
  pub fn iou(&self, other: &BBox) -> f32 {
    let intersection = self.intersection_area(other);
    let union = self.area() + other.area() - intersection;

    if union > 0.0 {
      intersection / union
    } else {
      0.0
    }
  }

  /// 包围两个边界框的最小边界框
  pub fn union(&self, other: &BBox) -> BBox {
    BBox::from_corners(
      self.x.min(other.x),
      self.y.min(other.y),
      self.right().max(other.right()),
      self.bottom().max(other.bottom()),
    )
  }

  /// 向外对齐到整数像素，并限制在图像范围内
  pub fn snap(&self, bounds: ImageBounds) -> BBox {
    let (bw, bh) = (bounds.width as f32, bounds.height as f32);
    let x0 = self.x.floor().clamp(0.0, bw);
    let y0 = self.y.floor().clamp(0.0, bh);
    let x1 = self.right().ceil().clamp(0.0, bw);
    let y1 = self.bottom().ceil().clamp(0.0, bh);
    BBox::from_corners(x0, y0, x1.max(x0), y1.max(y0))
  }

  pub fn within(&self, bounds: ImageBounds) -> bool {
    self.x >= 0.0
      && self.y >= 0.0
      && self.right() <= bounds.width as f32
      && self.bottom() <= bounds.height as f32
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn iou_of_identical_and_disjoint_boxes() {
    let a = BBox::new(0.0, 0.0, 10.0, 10.0);
    let b = BBox::new(20.0, 20.0, 5.0, 5.0);
    assert!((a.iou(&a) - 1.0).abs() < 1e-6);
    assert_eq!(a.iou(&b), 0.0);
  }

  #[test]
  fn iou_of_shifted_boxes() {
    let a = BBox::new(10.0, 10.0, 50.0, 50.0);
    let b = BBox::new(12.0, 12.0, 50.0, 50.0);
    let expected = 2304.0 / 2696.0;
    assert!((a.iou(&b) - expected).abs() < 1e-5);
  }

  #[test]
  fn clip_keeps_inside_part_only() {
    let bounds = ImageBounds::new(100, 80);
    let clipped = BBox::new(-10.0, 70.0, 30.0, 30.0).clip(bounds);
    assert_eq!(clipped, BBox::new(0.0, 70.0, 20.0, 10.0));
    assert!(clipped.within(bounds));

    let outside = BBox::new(150.0, 10.0, 20.0, 20.0).clip(bounds);
    assert_eq!(outside.area(), 0.0);
  }

  #[test]
  fn snap_rounds_outward_and_clamps() {
    let bounds = ImageBounds::new(50, 50);
    let snapped = BBox::new(1.4, 2.6, 10.2, 47.9).snap(bounds);
    assert_eq!(snapped, BBox::new(1.0, 2.0, 11.0, 48.0));
  }

  #[test]
  fn union_covers_both() {
    let a = BBox::new(10.0, 10.0, 50.0, 50.0);
    let b = BBox::new(12.0, 12.0, 50.0, 50.0);
    assert_eq!(a.union(&b), BBox::new(10.0, 10.0, 52.0, 52.0));
  }
}
