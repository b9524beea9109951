// 该文件是 Shanan （山南西风） 项目的一部分。
// src/output/directory_record.rs - 目录记录输出
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

use std::path::PathBuf;

use chrono::Utc;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::ImageFrame,
  output::{Record, Render},
};

#[derive(Error, Debug)]
pub enum DirectoryRecordOutputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("序列化错误: {0}")]
  SerializeError(#[from] serde_json::Error),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
}

/// 每张图像一个 JSON 文件，`folder:///path/to/records`
///
/// 默认写入 `<dir>/<name>.json`；带 `?dated` 时按日期分子目录。
pub struct DirectoryRecordOutput {
  directory: PathBuf,
  dated: bool,
}

impl FromUrlWithScheme for DirectoryRecordOutput {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn from_url(uri: &url::Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(DirectoryRecordOutputError::SchemeMismatch);
    }

    let raw = uri.path();
    let directory = urlencoding::decode(raw)
      .map(|p| p.into_owned())
      .unwrap_or_else(|_| raw.to_string());
    let dated = uri.query_pairs().any(|(k, _)| k == "dated");

    Ok(DirectoryRecordOutput {
      directory: PathBuf::from(directory),
      dated,
    })
  }
}

impl DirectoryRecordOutput {
  pub fn new(directory: impl Into<PathBuf>) -> Self {
    DirectoryRecordOutput {
      directory: directory.into(),
      dated: false,
    }
  }

  fn record_path(&self, frame: &ImageFrame) -> Result<PathBuf, DirectoryRecordOutputError> {
    let directory = if self.dated {
      let now = Utc::now();
      self
        .directory
        .join(now.format("%Y").to_string())
        .join(now.format("%m").to_string())
        .join(now.format("%d").to_string())
    } else {
      self.directory.clone()
    };
    if !directory.exists() {
      std::fs::create_dir_all(&directory)?;
    }
    Ok(directory.join(format!("{}.json", frame.name())))
  }
}

impl<T: Serialize> Render<ImageFrame, T> for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn render_result(&self, frame: &ImageFrame, result: &T) -> Result<(), Self::Error> {
    let path = self.record_path(frame)?;
    let text = serde_json::to_string_pretty(&Record::new(frame, result))?;
    std::fs::write(&path, text)?;
    debug!("记录写入 {:?}", path);
    Ok(())
  }
}
