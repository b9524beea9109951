// 该文件是 Shanan （山南西风） 项目的一部分。
// src/gateway.rs - 外部分割模型接口
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

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, error};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme, catalog::InstructionTemplate, element::RawCandidate,
  frame::ImageFrame, response::parse_response,
};

#[derive(Error, Debug)]
pub enum GatewayError {
  #[error("模型请求超时")]
  Timeout,
  #[error("模型请求被限流")]
  RateLimited,
  #[error("模型响应格式错误: {0}")]
  MalformedResponse(String),
  #[error("I/O 错误: {0}")]
  Io(#[from] std::io::Error),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

/// 外部视觉模型。实现方负责网络、重试与响应解析。
pub trait SegmentationGateway {
  type Error: std::error::Error + Send + Sync + 'static;

  fn segment(
    &self,
    frame: &ImageFrame,
    instruction: &InstructionTemplate,
  ) -> Result<Vec<RawCandidate>, Self::Error>;
}

impl<G: SegmentationGateway + ?Sized> SegmentationGateway for &G {
  type Error = G::Error;

  fn segment(
    &self,
    frame: &ImageFrame,
    instruction: &InstructionTemplate,
  ) -> Result<Vec<RawCandidate>, Self::Error> {
    (**self).segment(frame, instruction)
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum ReplaySource {
  File(PathBuf),
  Directory(PathBuf),
}

/// 回放事先录制的模型响应
///
/// `replay:///path/to/response.json` 对所有图像返回同一份响应；
/// `replay:///path/to/dir/` 按图像名读取 `<dir>/<name>.json`。
#[derive(Debug, Clone)]
pub struct ReplayGateway {
  source: ReplaySource,
}

impl FromUrlWithScheme for ReplayGateway {
  const SCHEME: &'static str = "replay";
}

impl FromUrl for ReplayGateway {
  type Error = GatewayError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI 方案不匹配: 期望 '{}', 实际 '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(GatewayError::SchemeMismatch(url.scheme().to_string()));
    }

    let raw = url.path();
    let path = urlencoding::decode(raw)
      .map(|p| p.into_owned())
      .unwrap_or_else(|_| raw.to_string());
    let source = if path.ends_with('/') || Path::new(&path).is_dir() {
      ReplaySource::Directory(PathBuf::from(path))
    } else {
      ReplaySource::File(PathBuf::from(path))
    };
    debug!("回放网关: {:?}", source);
    Ok(ReplayGateway { source })
  }
}

impl ReplayGateway {
  pub fn from_file(path: impl Into<PathBuf>) -> Self {
    Self {
      source: ReplaySource::File(path.into()),
    }
  }

  pub fn from_directory(path: impl Into<PathBuf>) -> Self {
    Self {
      source: ReplaySource::Directory(path.into()),
    }
  }

  fn response_path(&self, frame: &ImageFrame) -> PathBuf {
    match &self.source {
      ReplaySource::File(path) => path.clone(),
      ReplaySource::Directory(dir) => dir.join(format!("{}.json", frame.name())),
    }
  }
}

impl SegmentationGateway for ReplayGateway {
  type Error = GatewayError;

  fn segment(
    &self,
    frame: &ImageFrame,
    instruction: &InstructionTemplate,
  ) -> Result<Vec<RawCandidate>, Self::Error> {
    let path = self.response_path(frame);
    debug!(
      "回放 {} 的模型响应（模板: {}）: {:?}",
      frame.name(),
      instruction.category(),
      path
    );
    let text = std::fs::read_to_string(&path)?;
    parse_response(&text)
  }
}
