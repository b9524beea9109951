// 该文件是 Shanan （山南西风） 项目的一部分。
// src/bin/classify_background.rs - 背景分类报告
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

use anyhow::Result;
use clap::Parser;
use tracing::info;
use url::Url;

use shanan_segment::{
  BackgroundClassifier, FromUrl, SegmentConfig,
  input::InputWrapper,
  output::OutputWrapper,
  task::{BatchTask, Task},
};

/// 只输出背景分析结果，不调用模型
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 输入来源
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,
  /// 输出位置
  #[arg(long, value_name = "OUTPUT", default_value = "stdout:")]
  pub output: Url,
  /// TOML 配置文件，只使用其中的 [background] 部分
  #[arg(long, value_name = "FILE")]
  pub config: Option<PathBuf>,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("输入来源: {}", args.input);
  info!("输出位置: {}", args.output);

  let config = match &args.config {
    Some(path) => SegmentConfig::load(path)?,
    None => SegmentConfig::default(),
  };
  let input = InputWrapper::from_url(&args.input)?;
  let output = OutputWrapper::from_url(&args.output)?;
  let classifier = BackgroundClassifier::new(config.background);

  BatchTask::default()
    .with_workers(config.service.workers)
    .with_ctrlc(true)
    .run_task(input, classifier, output)?;

  Ok(())
}
