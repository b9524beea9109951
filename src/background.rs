// 该文件是 Shanan （山南西风） 项目的一部分。
// src/background.rs - 背景复杂度分类
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

use image::RgbImage;
use imageproc::gradients::sobel_gradients;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::catalog::PromptError;

/// 背景类别。顺序即特化程度：`Complex` 最保守。
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum BackgroundCategory {
  Simple,
  Gradient,
  Textured,
  Complex,
}

impl BackgroundCategory {
  pub const ALL: [BackgroundCategory; 4] = [
    BackgroundCategory::Simple,
    BackgroundCategory::Gradient,
    BackgroundCategory::Textured,
    BackgroundCategory::Complex,
  ];

  pub fn as_str(&self) -> &'static str {
    match self {
      BackgroundCategory::Simple => "simple",
      BackgroundCategory::Gradient => "gradient",
      BackgroundCategory::Textured => "textured",
      BackgroundCategory::Complex => "complex",
    }
  }

  /// 背景中存在容易被误识别为前景的装饰
  pub fn is_decorative(&self) -> bool {
    matches!(
      self,
      BackgroundCategory::Textured | BackgroundCategory::Complex
    )
  }
}

impl fmt::Display for BackgroundCategory {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for BackgroundCategory {
  type Err = PromptError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    BackgroundCategory::ALL
      .into_iter()
      .find(|category| category.as_str().eq_ignore_ascii_case(s.trim()))
      .ok_or_else(|| PromptError::UnknownCategory(s.to_string()))
  }
}

/// 分类阈值，均可通过配置调整
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackgroundThresholds {
  /// 小于该边长的图像直接视为简单背景
  pub min_window: u32,
  /// 边缘区域颜色方差上限（简单背景）
  pub color_variance: f32,
  /// Sobel 梯度幅值达到该值的像素计为边缘
  pub edge_magnitude: u16,
  /// 边缘密度达到该值视为高频背景
  pub edge_density: f32,
  /// 单元格边缘密度低于该值视为平静区域
  pub quiet_cell_density: f32,
  /// 平静单元格占比不超过该值时，边缘分布视为均匀
  pub max_quiet_cell_fraction: f32,
  /// 平面拟合的决定系数下限（渐变）
  pub gradient_min_r2: f32,
  /// 单元格颜色方差下限（渐变）
  pub gradient_min_variance: f32,
  /// 每个方向的网格单元数
  pub grid_cells: u32,
  /// 边缘区域最多采样像素数
  pub max_border_samples: usize,
  /// 四角颜色方差超过该值时报告存在渐变
  pub corner_gradient_variance: f32,
}

impl Default for BackgroundThresholds {
  fn default() -> Self {
    Self {
      min_window: 16,
      color_variance: 100.0,
      edge_magnitude: 64,
      edge_density: 0.08,
      quiet_cell_density: 0.02,
      max_quiet_cell_fraction: 0.15,
      gradient_min_r2: 0.85,
      gradient_min_variance: 25.0,
      grid_cells: 8,
      max_border_samples: 4096,
      corner_gradient_variance: 500.0,
    }
  }
}

/// 分类所用的三类信号
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct BackgroundSignals {
  pub color_variance: f32,
  pub average_color: [u8; 3],
  pub edge_density: f32,
  pub quiet_cell_fraction: f32,
  pub trend_r2: f32,
  pub trend_variance: f32,
}

/// 常见背景主色
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ColorName {
  White,
  Black,
  Red,
  DarkRed,
  Green,
  DarkGreen,
  Blue,
  DarkBlue,
  Gray,
  DarkGray,
  Other([u8; 3]),
}

impl ColorName {
  pub fn from_rgb([r, g, b]: [u8; 3]) -> Self {
    if r > 200 && g > 200 && b > 200 {
      ColorName::White
    } else if r < 50 && g < 50 && b < 50 {
      ColorName::Black
    } else if r > g && r > b {
      if r > 200 {
        ColorName::Red
      } else {
        ColorName::DarkRed
      }
    } else if g > r && g > b {
      if g > 200 {
        ColorName::Green
      } else {
        ColorName::DarkGreen
      }
    } else if b > r && b > g {
      if b > 200 {
        ColorName::Blue
      } else {
        ColorName::DarkBlue
      }
    } else if r.abs_diff(g) < 30 && g.abs_diff(b) < 30 {
      if r > 150 {
        ColorName::Gray
      } else {
        ColorName::DarkGray
      }
    } else {
      ColorName::Other([r, g, b])
    }
  }
}

impl fmt::Display for ColorName {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      ColorName::White => f.write_str("白色"),
      ColorName::Black => f.write_str("黑色"),
      ColorName::Red => f.write_str("红色"),
      ColorName::DarkRed => f.write_str("深红色"),
      ColorName::Green => f.write_str("绿色"),
      ColorName::DarkGreen => f.write_str("深绿色"),
      ColorName::Blue => f.write_str("蓝色"),
      ColorName::DarkBlue => f.write_str("深蓝色"),
      ColorName::Gray => f.write_str("灰色"),
      ColorName::DarkGray => f.write_str("深灰色"),
      ColorName::Other([r, g, b]) => write!(f, "RGB({},{},{})", r, g, b),
    }
  }
}

/// 背景分析报告
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BackgroundInfo {
  pub category: BackgroundCategory,
  pub main_color: ColorName,
  /// 图像边框采样像素的平均颜色
  pub average_color: [u8; 3],
  pub has_gradient: bool,
  pub has_texture: bool,
  pub signals: BackgroundSignals,
}

#[derive(Debug, Clone, Default)]
pub struct BackgroundClassifier {
  thresholds: BackgroundThresholds,
}

impl BackgroundClassifier {
  pub fn new(thresholds: BackgroundThresholds) -> Self {
    Self { thresholds }
  }

  pub fn thresholds(&self) -> &BackgroundThresholds {
    &self.thresholds
  }

  /// 对图像背景进行分类
  pub fn classify(&self, image: &RgbImage) -> BackgroundCategory {
    let t = &self.thresholds;
    if image.width() < t.min_window || image.height() < t.min_window || is_constant(image) {
      return BackgroundCategory::Simple;
    }

    let signals = self.signals(image);
    let category = self.decide(&signals);
    debug!("背景信号: {:?} => {}", signals, category);
    category
  }

  /// 按特化程度从高到低依次判断，并列时偏向更保守的类别
  pub fn decide(&self, signals: &BackgroundSignals) -> BackgroundCategory {
    let t = &self.thresholds;
    let high_edges = signals.edge_density >= t.edge_density;

    if high_edges {
      if signals.quiet_cell_fraction <= t.max_quiet_cell_fraction {
        return BackgroundCategory::Textured;
      }
      return BackgroundCategory::Complex;
    }

    if signals.trend_r2 >= t.gradient_min_r2 && signals.trend_variance >= t.gradient_min_variance {
      return BackgroundCategory::Gradient;
    }

    if signals.color_variance < t.color_variance {
      return BackgroundCategory::Simple;
    }

    BackgroundCategory::Complex
  }

  /// 分类并给出主色、渐变、纹理等信息
  pub fn analyze(&self, image: &RgbImage) -> BackgroundInfo {
    let t = &self.thresholds;
    let signals = self.signals(image);
    let category =
      if image.width() < t.min_window || image.height() < t.min_window || is_constant(image) {
        BackgroundCategory::Simple
      } else {
        self.decide(&signals)
      };
    BackgroundInfo {
      category,
      main_color: ColorName::from_rgb(signals.average_color),
      average_color: signals.average_color,
      has_gradient: corner_variance(image) > t.corner_gradient_variance,
      has_texture: category.is_decorative(),
      signals,
    }
  }

  /// 计算分类信号，耗时与像素数成正比
  pub fn signals(&self, image: &RgbImage) -> BackgroundSignals {
    if image.width() == 0 || image.height() == 0 {
      return BackgroundSignals::default();
    }

    let (color_variance, average_color) = self.border_statistics(image);
    let (trend_r2, trend_variance) = self.trend(image);
    let (edge_density, quiet_cell_fraction) = self.edge_statistics(image);

    BackgroundSignals {
      color_variance,
      average_color,
      edge_density,
      quiet_cell_fraction,
      trend_r2,
      trend_variance,
    }
  }

  fn grid(&self, image: &RgbImage) -> CellGrid {
    let cells = self
      .thresholds
      .grid_cells
      .max(1)
      .min(image.width())
      .min(image.height());
    CellGrid {
      cells,
      width: image.width(),
      height: image.height(),
    }
  }

  // 边缘区域（四周 1/10 宽的带）的颜色方差与均值
  fn border_statistics(&self, image: &RgbImage) -> (f32, [u8; 3]) {
    let (w, h) = image.dimensions();
    let band = (w.min(h) / 10).max(1);
    let inner = (w.saturating_sub(2 * band) as u64) * (h.saturating_sub(2 * band) as u64);
    let band_pixels = w as u64 * h as u64 - inner;
    let step = (band_pixels / self.thresholds.max_border_samples.max(1) as u64).max(1);

    let mut sum = [0f64; 3];
    let mut sum_sq = [0f64; 3];
    let mut taken = 0u64;
    let mut seen = 0u64;

    for y in 0..h {
      let full_row = y < band || y >= h - band;
      for x in 0..w {
        if !full_row && x >= band && x < w - band {
          continue;
        }
        seen += 1;
        if (seen - 1) % step != 0 {
          continue;
        }
        let pixel = image.get_pixel(x, y);
        for c in 0..3 {
          let v = pixel[c] as f64;
          sum[c] += v;
          sum_sq[c] += v * v;
        }
        taken += 1;
      }
    }

    if taken == 0 {
      return (0.0, [0, 0, 0]);
    }

    let n = taken as f64;
    let mut variance = 0f64;
    let mut mean = [0u8; 3];
    for c in 0..3 {
      let m = sum[c] / n;
      variance += (sum_sq[c] / n - m * m).max(0.0);
      mean[c] = m.round().clamp(0.0, 255.0) as u8;
    }
    ((variance / 3.0) as f32, mean)
  }

  // 对网格单元的平均颜色做平面拟合，返回 (R², 单元方差)
  fn trend(&self, image: &RgbImage) -> (f32, f32) {
    let grid = self.grid(image);
    let n = grid.len();
    let mut sums = vec![[0f64; 3]; n];
    let mut counts = vec![0u64; n];

    for (x, y, pixel) in image.enumerate_pixels() {
      let idx = grid.index(x, y);
      for c in 0..3 {
        sums[idx][c] += pixel[c] as f64;
      }
      counts[idx] += 1;
    }

    let g = grid.cells as usize;
    let center = (g as f64 - 1.0) / 2.0;
    let mut ss_tot = 0f64;
    let mut ss_res = 0f64;

    for c in 0..3 {
      let means: Vec<f64> = sums
        .iter()
        .zip(&counts)
        .map(|(s, &k)| if k > 0 { s[c] / k as f64 } else { 0.0 })
        .collect();
      let mean = means.iter().sum::<f64>() / n as f64;

      let (mut su, mut sv, mut suu, mut svv) = (0f64, 0f64, 0f64, 0f64);
      for (idx, z) in means.iter().enumerate() {
        let u = (idx % g) as f64 - center;
        let v = (idx / g) as f64 - center;
        su += u * (z - mean);
        sv += v * (z - mean);
        suu += u * u;
        svv += v * v;
      }
      let b = if suu > 0.0 { su / suu } else { 0.0 };
      let d = if svv > 0.0 { sv / svv } else { 0.0 };

      for (idx, z) in means.iter().enumerate() {
        let u = (idx % g) as f64 - center;
        let v = (idx / g) as f64 - center;
        let fitted = mean + b * u + d * v;
        ss_res += (z - fitted).powi(2);
        ss_tot += (z - mean).powi(2);
      }
    }

    let r2 = if ss_tot > f64::EPSILON {
      1.0 - ss_res / ss_tot
    } else {
      0.0
    };
    let variance = ss_tot / (n as f64 * 3.0);
    (r2 as f32, variance as f32)
  }

  // 返回 (边缘密度, 平静单元格占比)
  fn edge_statistics(&self, image: &RgbImage) -> (f32, f32) {
    let gray = image::imageops::grayscale(image);
    let gradients = sobel_gradients(&gray);
    let grid = self.grid(image);
    let mut edges = vec![0u64; grid.len()];
    let mut totals = vec![0u64; grid.len()];
    let mut edge_count = 0u64;

    for (x, y, magnitude) in gradients.enumerate_pixels() {
      let idx = grid.index(x, y);
      totals[idx] += 1;
      if magnitude[0] >= self.thresholds.edge_magnitude {
        edges[idx] += 1;
        edge_count += 1;
      }
    }

    let pixels = image.width() as f64 * image.height() as f64;
    let quiet = edges
      .iter()
      .zip(&totals)
      .filter(|&(&e, &t)| t == 0 || (e as f64 / t as f64) < self.thresholds.quiet_cell_density as f64)
      .count();

    (
      (edge_count as f64 / pixels) as f32,
      quiet as f32 / grid.len() as f32,
    )
  }
}

struct CellGrid {
  cells: u32,
  width: u32,
  height: u32,
}

impl CellGrid {
  fn len(&self) -> usize {
    (self.cells * self.cells) as usize
  }

  fn index(&self, x: u32, y: u32) -> usize {
    let cx = (x as u64 * self.cells as u64 / self.width as u64) as usize;
    let cy = (y as u64 * self.cells as u64 / self.height as u64) as usize;
    cy * self.cells as usize + cx
  }
}

fn is_constant(image: &RgbImage) -> bool {
  let mut pixels = image.pixels();
  match pixels.next() {
    Some(first) => pixels.all(|p| p == first),
    None => true,
  }
}

fn corner_variance(image: &RgbImage) -> f32 {
  let (w, h) = image.dimensions();
  if w == 0 || h == 0 {
    return 0.0;
  }
  let corners = [
    image.get_pixel(0, 0),
    image.get_pixel(w - 1, 0),
    image.get_pixel(0, h - 1),
    image.get_pixel(w - 1, h - 1),
  ];

  let mut variance = 0f32;
  for c in 0..3 {
    let mean = corners.iter().map(|p| p[c] as f32).sum::<f32>() / 4.0;
    variance += corners
      .iter()
      .map(|p| (p[c] as f32 - mean).powi(2))
      .sum::<f32>()
      / 4.0;
  }
  variance / 3.0
}
