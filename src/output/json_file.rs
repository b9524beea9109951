// 该文件是 Shanan （山南西风） 项目的一部分。
// src/output/json_file.rs - JSON 文件输出
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
  path::{Path, PathBuf},
  sync::Mutex,
};

use serde::Serialize;
use thiserror::Error;
use tracing::info;
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::ImageFrame,
  output::{Record, Render},
};

#[derive(Error, Debug)]
pub enum JsonFileOutputError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("序列化错误: {0}")]
  SerializeError(#[from] serde_json::Error),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

/// 所有记录写入同一个 JSON 数组文件，`json:///path/to/result.json`
///
/// 每次渲染后整体重写文件，中途退出时文件仍是完整的 JSON。
pub struct JsonFileOutput {
  path: PathBuf,
  records: Mutex<Vec<serde_json::Value>>,
}

impl FromUrlWithScheme for JsonFileOutput {
  const SCHEME: &'static str = "json";
}

impl FromUrl for JsonFileOutput {
  type Error = JsonFileOutputError;

  fn from_url(uri: &Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(JsonFileOutputError::SchemeMismatch(format!(
        "期望输出方式 '{}', 实际输出方式 '{}'",
        Self::SCHEME,
        uri.scheme()
      )));
    }

    let raw = uri.path();
    let path = urlencoding::decode(raw)
      .map(|p| p.into_owned())
      .unwrap_or_else(|_| raw.to_string());
    Ok(JsonFileOutput::new(path))
  }
}

impl JsonFileOutput {
  pub fn new(path: impl Into<PathBuf>) -> Self {
    JsonFileOutput {
      path: path.into(),
      records: Mutex::new(Vec::new()),
    }
  }

  pub fn path(&self) -> &Path {
    &self.path
  }
}

impl<T: Serialize> Render<ImageFrame, T> for JsonFileOutput {
  type Error = JsonFileOutputError;

  fn render_result(&self, frame: &ImageFrame, result: &T) -> Result<(), Self::Error> {
    let value = serde_json::to_value(Record::new(frame, result))?;
    let mut records = self
      .records
      .lock()
      .unwrap_or_else(|poisoned| poisoned.into_inner());
    records.push(value);

    if let Some(parent) = self.path.parent()
      && !parent.as_os_str().is_empty()
    {
      std::fs::create_dir_all(parent)?;
    }
    let text = serde_json::to_string_pretty(&*records)?;
    std::fs::write(&self.path, text)?;
    info!("写入 {} 条记录到 {:?}", records.len(), self.path);
    Ok(())
  }
}
