// 该文件是 Shanan （山南西风） 项目的一部分。
// src/output.rs - 输出定义
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

use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use thiserror::Error;
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  background::{BackgroundCategory, BackgroundInfo},
  element::ElementRecord,
  frame::ImageFrame,
  processor::Diagnostics,
  service::{Segmentation, Statistics},
};

pub trait Render<Frame, Output>: Sized {
  type Error;
  fn render_result(&self, frame: &Frame, result: &Output) -> Result<(), Self::Error>;
}

impl<F, D, R: Render<F, D>> Render<F, D> for &R {
  type Error = R::Error;

  fn render_result(&self, frame: &F, result: &D) -> Result<(), Self::Error> {
    (**self).render_result(frame, result)
  }
}

mod json_file;
pub use self::json_file::{JsonFileOutput, JsonFileOutputError};

mod stdout;
pub use self::stdout::{StdoutOutput, StdoutOutputError};

#[cfg(feature = "directory_record")]
mod directory_record;
#[cfg(feature = "directory_record")]
pub use self::directory_record::{DirectoryRecordOutput, DirectoryRecordOutputError};

/// 一张图像的输出记录，附带图像名与生成时间
#[derive(Debug, Serialize)]
pub struct Record<'a, T> {
  pub name: &'a str,
  pub generated_at: String,
  #[serde(flatten)]
  pub body: &'a T,
}

impl<'a, T: Serialize> Record<'a, T> {
  pub fn new(frame: &'a ImageFrame, body: &'a T) -> Self {
    Record {
      name: frame.name(),
      generated_at: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
      body,
    }
  }
}

/// 分割结果的对外形式
#[derive(Debug, Clone, Serialize)]
pub struct SegmentationReport {
  pub width: u32,
  pub height: u32,
  pub category: BackgroundCategory,
  pub background: BackgroundInfo,
  pub elements: Vec<ElementRecord>,
  pub statistics: Statistics,
  pub diagnostics: Diagnostics,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub gateway_failure: Option<String>,
}

impl From<&Segmentation> for SegmentationReport {
  fn from(segmentation: &Segmentation) -> Self {
    SegmentationReport {
      width: segmentation.width,
      height: segmentation.height,
      category: segmentation.category,
      background: segmentation.background.clone(),
      elements: segmentation.to_records(),
      statistics: segmentation.statistics(),
      diagnostics: segmentation.diagnostics,
      gateway_failure: segmentation.gateway_failure.clone(),
    }
  }
}

#[derive(Error, Debug)]
pub enum OutputError {
  #[error("JSON 文件输出错误: {0}")]
  JsonFileOutputError(#[from] JsonFileOutputError),
  #[error("标准输出错误: {0}")]
  StdoutOutputError(#[from] StdoutOutputError),
  #[cfg(feature = "directory_record")]
  #[error("目录记录输出错误: {0}")]
  DirectoryRecordOutputError(#[from] DirectoryRecordOutputError),
  #[error("URI 方案不匹配")]
  SchemeMismatch,
}

pub enum OutputWrapper {
  JsonFileOutput(JsonFileOutput),
  StdoutOutput(StdoutOutput),
  #[cfg(feature = "directory_record")]
  DirectoryRecordOutput(DirectoryRecordOutput),
}

impl FromUrl for OutputWrapper {
  type Error = OutputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    match url.scheme() {
      JsonFileOutput::SCHEME => {
        let output = JsonFileOutput::from_url(url)?;
        Ok(OutputWrapper::JsonFileOutput(output))
      }
      StdoutOutput::SCHEME => {
        let output = StdoutOutput::from_url(url)?;
        Ok(OutputWrapper::StdoutOutput(output))
      }
      #[cfg(feature = "directory_record")]
      DirectoryRecordOutput::SCHEME => {
        let output = DirectoryRecordOutput::from_url(url)?;
        Ok(OutputWrapper::DirectoryRecordOutput(output))
      }
      _ => Err(OutputError::SchemeMismatch),
    }
  }
}

impl<T: Serialize> Render<ImageFrame, T> for OutputWrapper {
  type Error = OutputError;

  fn render_result(&self, frame: &ImageFrame, result: &T) -> Result<(), Self::Error> {
    match self {
      OutputWrapper::JsonFileOutput(output) => output
        .render_result(frame, result)
        .map_err(OutputError::from),
      OutputWrapper::StdoutOutput(output) => output
        .render_result(frame, result)
        .map_err(OutputError::from),
      #[cfg(feature = "directory_record")]
      OutputWrapper::DirectoryRecordOutput(output) => output
        .render_result(frame, result)
        .map_err(OutputError::from),
    }
  }
}
