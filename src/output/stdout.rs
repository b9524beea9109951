// 该文件是 Shanan （山南西风） 项目的一部分。
// src/output/stdout.rs - 标准输出
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

use std::io::Write;

use serde::Serialize;
use thiserror::Error;
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::ImageFrame,
  output::{Record, Render},
};

#[derive(Error, Debug)]
pub enum StdoutOutputError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("序列化错误: {0}")]
  SerializeError(#[from] serde_json::Error),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

/// 每张图像一行 JSON，`stdout:`，加 `?pretty` 则缩进输出
#[derive(Debug, Default)]
pub struct StdoutOutput {
  pretty: bool,
}

impl FromUrlWithScheme for StdoutOutput {
  const SCHEME: &'static str = "stdout";
}

impl FromUrl for StdoutOutput {
  type Error = StdoutOutputError;

  fn from_url(uri: &Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(StdoutOutputError::SchemeMismatch(uri.scheme().to_string()));
    }
    let pretty = uri.query_pairs().any(|(k, _)| k == "pretty");
    Ok(StdoutOutput { pretty })
  }
}

impl<T: Serialize> Render<ImageFrame, T> for StdoutOutput {
  type Error = StdoutOutputError;

  fn render_result(&self, frame: &ImageFrame, result: &T) -> Result<(), Self::Error> {
    let record = Record::new(frame, result);
    let text = if self.pretty {
      serde_json::to_string_pretty(&record)?
    } else {
      serde_json::to_string(&record)?
    };
    // 锁住标准输出，多线程时整行写入
    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "{}", text)?;
    stdout.flush()?;
    Ok(())
  }
}
