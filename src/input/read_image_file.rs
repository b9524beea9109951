// 该文件是 Shanan （山南西风） 项目的一部分。
// src/input/read_image_file.rs - 图像文件输入
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
  collections::VecDeque,
  path::{Path, PathBuf},
};

use image::ImageReader;
use thiserror::Error;
use tracing::{debug, error, warn};
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, frame::ImageFrame};

#[derive(Error, Debug)]
pub enum ImageFileInputError {
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("图像加载错误: {0}")]
  ImageLoadError(#[from] image::ImageError),
}

const IMAGE_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];

fn url_path(url: &Url) -> PathBuf {
  let raw = url.path();
  match urlencoding::decode(raw) {
    Ok(path) => PathBuf::from(path.into_owned()),
    Err(_) => PathBuf::from(raw),
  }
}

fn check_scheme(url: &Url, expected: &str) -> Result<(), ImageFileInputError> {
  if url.scheme() != expected {
    error!(
      "URI 方案不匹配: 期望 '{}', 实际 '{}'",
      expected,
      url.scheme()
    );
    return Err(ImageFileInputError::SchemeMismatch(url.scheme().to_string()));
  }
  Ok(())
}

/// 以文件名（不含扩展名）作为图像名
pub fn read_frame(path: &Path) -> Result<ImageFrame, ImageFileInputError> {
  let name = path
    .file_stem()
    .map(|stem| stem.to_string_lossy().into_owned())
    .unwrap_or_else(|| "image".to_string());
  let image = ImageReader::open(path)?.with_guessed_format()?.decode()?;
  debug!("读取图像 {:?}: {}x{}", path, image.width(), image.height());
  Ok(ImageFrame::from_dynamic(name, image))
}

/// 单张图像，`image:///path/to/slide.png`
pub struct ImageFileInput {
  frame: Option<ImageFrame>,
}

impl FromUrlWithScheme for ImageFileInput {
  const SCHEME: &'static str = "image";
}

impl FromUrl for ImageFileInput {
  type Error = ImageFileInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    check_scheme(url, Self::SCHEME)?;
    let frame = read_frame(&url_path(url))?;
    Ok(ImageFileInput { frame: Some(frame) })
  }
}

impl Iterator for ImageFileInput {
  type Item = ImageFrame;

  fn next(&mut self) -> Option<Self::Item> {
    self.frame.take()
  }
}

/// 目录下的全部图像，按文件名排序，`folder:///path/to/slides`
pub struct DirectoryInput {
  pending: VecDeque<PathBuf>,
}

impl FromUrlWithScheme for DirectoryInput {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for DirectoryInput {
  type Error = ImageFileInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    check_scheme(url, Self::SCHEME)?;
    Self::open(url_path(url))
  }
}

impl DirectoryInput {
  pub fn open(directory: impl AsRef<Path>) -> Result<Self, ImageFileInputError> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(directory.as_ref())? {
      let path = entry?.path();
      let is_image = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
          IMAGE_EXTENSIONS
            .iter()
            .any(|known| known.eq_ignore_ascii_case(ext))
        })
        .unwrap_or(false);
      if path.is_file() && is_image {
        files.push(path);
      }
    }
    files.sort();
    debug!("目录 {:?} 中共有 {} 张图像", directory.as_ref(), files.len());
    Ok(DirectoryInput {
      pending: files.into(),
    })
  }

  pub fn remaining(&self) -> usize {
    self.pending.len()
  }
}

impl Iterator for DirectoryInput {
  type Item = ImageFrame;

  fn next(&mut self) -> Option<Self::Item> {
    while let Some(path) = self.pending.pop_front() {
      match read_frame(&path) {
        Ok(frame) => return Some(frame),
        Err(err) => warn!("跳过无法读取的图像 {:?}: {}", path, err),
      }
    }
    None
  }
}

#[cfg(test)]
mod tests {
  use image::{Rgb, RgbImage, Rgba, RgbaImage};

  use super::*;

  #[test]
  fn directory_input_is_sorted_and_skips_broken_files() {
    let dir = tempfile::tempdir().unwrap();
    RgbImage::from_pixel(8, 6, Rgb([1, 2, 3]))
      .save(dir.path().join("b.png"))
      .unwrap();
    RgbaImage::from_pixel(4, 4, Rgba([9, 9, 9, 128]))
      .save(dir.path().join("a.png"))
      .unwrap();
    std::fs::write(dir.path().join("c.png"), b"not a png").unwrap();
    std::fs::write(dir.path().join("notes.txt"), b"ignored").unwrap();

    let input = DirectoryInput::open(dir.path()).unwrap();
    assert_eq!(input.remaining(), 3);
    let frames: Vec<ImageFrame> = input.collect();
    assert_eq!(frames.len(), 2);
    assert_eq!(frames[0].name(), "a");
    assert!(frames[0].has_alpha());
    assert_eq!(frames[1].name(), "b");
    assert_eq!((frames[1].width(), frames[1].height()), (8, 6));
  }

  #[test]
  fn image_file_input_yields_once() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("slide one.png");
    RgbImage::new(5, 5).save(&path).unwrap();

    let url = Url::from_file_path(&path).unwrap();
    let url = Url::parse(&url.as_str().replacen("file", "image", 1)).unwrap();
    let mut input = ImageFileInput::from_url(&url).unwrap();
    assert_eq!(input.next().map(|f| f.name().to_string()), Some("slide one".to_string()));
    assert!(input.next().is_none());
  }
}
