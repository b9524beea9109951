// 该文件是 Shanan （山南西风） 项目的一部分。
// src/frame.rs - 待分割图像帧定义
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

use image::{DynamicImage, RgbImage};

use crate::geometry::ImageBounds;

/// 一张待分割的图像。流水线内只读。
#[derive(Debug, Clone)]
pub struct ImageFrame {
  name: String,
  rgb: RgbImage,
  has_alpha: bool,
}

impl ImageFrame {
  pub fn new(name: impl Into<String>, rgb: RgbImage) -> Self {
    Self {
      name: name.into(),
      rgb,
      has_alpha: false,
    }
  }

  /// 从任意格式的图像构造，带透明通道的图像会被展平为 RGB
  pub fn from_dynamic(name: impl Into<String>, image: DynamicImage) -> Self {
    let has_alpha = image.color().has_alpha();
    Self {
      name: name.into(),
      rgb: image.to_rgb8(),
      has_alpha,
    }
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn rgb(&self) -> &RgbImage {
    &self.rgb
  }

  pub fn has_alpha(&self) -> bool {
    self.has_alpha
  }

  pub fn width(&self) -> u32 {
    self.rgb.width()
  }

  pub fn height(&self) -> u32 {
    self.rgb.height()
  }

  pub fn bounds(&self) -> ImageBounds {
    ImageBounds::new(self.rgb.width(), self.rgb.height())
  }
}

impl From<RgbImage> for ImageFrame {
  fn from(rgb: RgbImage) -> Self {
    ImageFrame::new("image", rgb)
  }
}
