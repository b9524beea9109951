// 该文件是 Shanan （山南西风） 项目的一部分。
// src/bin/segment.rs - 幻灯片元素分割
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

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use url::Url;

use shanan_segment::{
  BackgroundCategory, ElementKind, ElementSegmentationService, FromUrl, ReplayGateway,
  SegmentConfig,
  input::InputWrapper,
  output::OutputWrapper,
  task::{BatchTask, OneShotTask, Task},
};

/// 背景感知的幻灯片元素分割
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 输入来源
  /// - 单张图像: image:///path/to/slide.png
  /// - 图像目录: folder:///path/to/slides
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,
  /// 输出位置
  /// - 标准输出: stdout:
  /// - JSON 文件: json:///path/to/result.json
  /// - 记录目录: folder:///path/to/records
  #[arg(long, value_name = "OUTPUT", default_value = "stdout:")]
  pub output: Url,
  /// 模型响应来源，replay:///path/to/responses/
  #[arg(long, value_name = "GATEWAY")]
  pub gateway: Url,
  /// TOML 配置文件
  #[arg(long, value_name = "FILE")]
  pub config: Option<PathBuf>,
  /// 固定使用的提示词类别（simple、gradient、textured、complex）
  #[arg(long, value_name = "CATEGORY")]
  pub category: Option<BackgroundCategory>,
  /// 只请求指定种类的元素，可重复（text、icon、chart）
  #[arg(long = "hint", value_name = "KIND")]
  pub hints: Vec<String>,
  /// 模型调用失败时报错
  #[arg(long)]
  pub strict: bool,
  /// 只处理第一张图像
  #[arg(long)]
  pub one_shot: bool,
  /// 工作线程数
  #[arg(long, value_name = "COUNT")]
  pub workers: Option<usize>,
  /// 最多处理的图像数
  #[arg(long, value_name = "COUNT")]
  pub limit: Option<usize>,
  /// 置信度阈值 (0.0 - 1.0)
  #[arg(long, value_name = "THRESHOLD")]
  pub min_confidence: Option<f32>,
  /// 去重 IoU 阈值 (0.0 - 1.0)
  #[arg(long, value_name = "THRESHOLD")]
  pub dedup_iou_threshold: Option<f32>,
  /// 裁剪后保留面积比例下限 (0.0 - 1.0)
  #[arg(long, value_name = "FRACTION")]
  pub min_clip_fraction: Option<f32>,
  /// 关闭边界框收紧
  #[arg(long)]
  pub no_tightening: bool,
}

impl Args {
  fn load_config(&self) -> Result<SegmentConfig> {
    let mut config = match &self.config {
      Some(path) => SegmentConfig::load(path)?,
      None => SegmentConfig::default(),
    };

    let processor = &mut config.processor;
    if let Some(value) = self.min_confidence {
      processor.min_confidence = value;
    }
    if let Some(value) = self.dedup_iou_threshold {
      processor.dedup_iou_threshold = value;
    }
    if let Some(value) = self.min_clip_fraction {
      processor.min_clip_fraction = value;
    }
    if self.no_tightening {
      processor.enable_bbox_tightening = false;
    }

    if self.strict {
      config.service.strict_gateway = true;
    }
    if let Some(workers) = self.workers {
      config.service.workers = workers;
    }
    if !self.hints.is_empty() {
      config.service.hints = self
        .hints
        .iter()
        .map(|hint| {
          ElementKind::from_label(hint).with_context(|| format!("未知的元素种类: {}", hint))
        })
        .collect::<Result<_>>()?;
    }

    config.validate()?;
    Ok(config)
  }
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("输入来源: {}", args.input);
  info!("输出位置: {}", args.output);
  info!("模型响应来源: {}", args.gateway);

  let config = args.load_config()?;
  let input = InputWrapper::from_url(&args.input)?;
  let gateway = ReplayGateway::from_url(&args.gateway)?;
  let output = OutputWrapper::from_url(&args.output)?;
  let service = ElementSegmentationService::from_config(&config, gateway)?
    .with_category_override(args.category);

  if args.one_shot {
    OneShotTask.run_task(input, service, output)?;
  } else {
    BatchTask::default()
      .with_workers(config.service.workers)
      .with_limit(args.limit)
      .with_ctrlc(true)
      .run_task(input, service, output)?;
  }

  Ok(())
}
