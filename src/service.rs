// 该文件是 Shanan （山南西风） 项目的一部分。
// src/service.rs - 单张图像的分割流程
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
  collections::BTreeMap,
  convert::Infallible,
  sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
  },
  time::Instant,
};

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
  background::{BackgroundCategory, BackgroundClassifier, BackgroundInfo},
  catalog::{PromptCatalog, PromptError},
  config::SegmentConfig,
  element::{Element, ElementKind, ElementRecord},
  frame::ImageFrame,
  gateway::SegmentationGateway,
  output::SegmentationReport,
  processor::{Diagnostics, ProcessError, ResultProcessor},
};

#[derive(Error, Debug)]
pub enum ServiceError {
  #[error("提示词错误: {0}")]
  Prompt(#[from] PromptError),
  #[error("后处理错误: {0}")]
  Process(#[from] ProcessError),
  #[error("模型调用失败: {0}")]
  Gateway(#[source] Box<dyn std::error::Error + Send + Sync>),
  #[error("任务已取消")]
  Cancelled,
}

/// 跨线程共享的取消标志
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn cancel(&self) {
    self.0.store(true, Ordering::SeqCst);
  }

  pub fn is_cancelled(&self) -> bool {
    self.0.load(Ordering::SeqCst)
  }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Statistics {
  pub total: usize,
  pub by_label: BTreeMap<String, usize>,
  /// 带有文字内容的文本元素数
  pub text_with_content: usize,
  /// 全部文本元素的平均文字长度，按字符计
  pub average_text_length: f32,
}

/// 一张图像的分割结果
#[derive(Debug, Clone)]
pub struct Segmentation {
  pub name: String,
  pub width: u32,
  pub height: u32,
  /// 实际使用的提示词类别
  pub category: BackgroundCategory,
  pub background: BackgroundInfo,
  pub elements: Vec<Element>,
  pub diagnostics: Diagnostics,
  /// 软失败时记录模型调用的错误
  pub gateway_failure: Option<String>,
}

impl Segmentation {
  pub fn to_records(&self) -> Vec<ElementRecord> {
    self.elements.iter().map(ElementRecord::from).collect()
  }

  /// 没有文字内容的文本元素按长度 0 计入平均
  pub fn statistics(&self) -> Statistics {
    let mut by_label = BTreeMap::new();
    let mut texts = 0;
    let mut text_with_content = 0;
    let mut text_chars = 0;
    for element in &self.elements {
      *by_label.entry(element.label.clone()).or_insert(0) += 1;
      if element.label == ElementKind::Text.label() {
        let chars = element.detail.as_deref().map_or(0, |text| text.chars().count());
        texts += 1;
        text_chars += chars;
        if chars > 0 {
          text_with_content += 1;
        }
      }
    }
    let average_text_length = if texts == 0 {
      0.0
    } else {
      text_chars as f32 / texts as f32
    };
    Statistics {
      total: self.elements.len(),
      by_label,
      text_with_content,
      average_text_length,
    }
  }
}

/// 背景分类、提示词选择、模型调用与后处理的编排
pub struct ElementSegmentationService<G> {
  classifier: BackgroundClassifier,
  catalog: Arc<PromptCatalog>,
  gateway: G,
  processor: ResultProcessor,
  strict: bool,
  hints: Vec<ElementKind>,
  category_override: Option<BackgroundCategory>,
}

impl<G: SegmentationGateway> ElementSegmentationService<G> {
  pub fn new(gateway: G) -> Self {
    Self {
      classifier: BackgroundClassifier::default(),
      catalog: PromptCatalog::builtin().into_shared(),
      gateway,
      processor: ResultProcessor::default(),
      strict: false,
      hints: Vec::new(),
      category_override: None,
    }
  }

  pub fn from_config(config: &SegmentConfig, gateway: G) -> Result<Self, PromptError> {
    let catalog = PromptCatalog::from_overrides(&config.prompts)?.into_shared();
    Ok(Self {
      classifier: BackgroundClassifier::new(config.background.clone()),
      catalog,
      gateway,
      processor: ResultProcessor::new(config.processor.clone()),
      strict: config.service.strict_gateway,
      hints: config.service.hints.clone(),
      category_override: None,
    })
  }

  pub fn with_catalog(mut self, catalog: Arc<PromptCatalog>) -> Self {
    self.catalog = catalog;
    self
  }

  pub fn with_classifier(mut self, classifier: BackgroundClassifier) -> Self {
    self.classifier = classifier;
    self
  }

  pub fn with_processor(mut self, processor: ResultProcessor) -> Self {
    self.processor = processor;
    self
  }

  pub fn with_strict(mut self, strict: bool) -> Self {
    self.strict = strict;
    self
  }

  pub fn with_hints(mut self, hints: Vec<ElementKind>) -> Self {
    self.hints = hints;
    self
  }

  /// 跳过分类结果，固定使用指定类别的提示词
  pub fn with_category_override(mut self, category: Option<BackgroundCategory>) -> Self {
    self.category_override = category;
    self
  }

  pub fn catalog(&self) -> &Arc<PromptCatalog> {
    &self.catalog
  }

  pub fn segment(&self, frame: &ImageFrame) -> Result<Segmentation, ServiceError> {
    self.segment_with_cancel(frame, &CancelToken::default())
  }

  /// 在调用模型前后检查取消标志，取消时丢弃中间结果
  pub fn segment_with_cancel(
    &self,
    frame: &ImageFrame,
    cancel: &CancelToken,
  ) -> Result<Segmentation, ServiceError> {
    let bounds = frame.bounds();
    if bounds.is_degenerate() {
      return Err(ProcessError::InvalidImageBounds {
        width: bounds.width,
        height: bounds.height,
      }
      .into());
    }
    if cancel.is_cancelled() {
      return Err(ServiceError::Cancelled);
    }

    let start = Instant::now();
    let background = self.classifier.analyze(frame.rgb());
    let category = self.category_override.unwrap_or(background.category);
    debug!(
      "{}: 背景类别 {}，使用 {} 模板",
      frame.name(),
      background.category,
      category
    );
    let instruction = self.catalog.resolve_with_hints(category, &self.hints)?;

    let (candidates, gateway_failure) = match self.gateway.segment(frame, &instruction) {
      Ok(candidates) => (candidates, None),
      Err(err) if self.strict => return Err(ServiceError::Gateway(Box::new(err))),
      Err(err) => {
        warn!("{}: 模型调用失败，按无候选处理: {}", frame.name(), err);
        (Vec::new(), Some(err.to_string()))
      }
    };

    if cancel.is_cancelled() {
      debug!("{}: 模型返回后收到取消，丢弃结果", frame.name());
      return Err(ServiceError::Cancelled);
    }

    let processed = self
      .processor
      .process_frame(&candidates, frame, category)?;
    info!(
      "{}: {} 个候选 -> {} 个元素，耗时 {:.2?}",
      frame.name(),
      candidates.len(),
      processed.elements.len(),
      start.elapsed()
    );

    Ok(Segmentation {
      name: frame.name().to_string(),
      width: bounds.width,
      height: bounds.height,
      category,
      background,
      elements: processed.elements,
      diagnostics: processed.diagnostics,
      gateway_failure,
    })
  }
}

/// 逐帧分析的统一接口，供任务驱动
pub trait FrameAnalyzer {
  type Output;
  type Error: std::error::Error + Send + Sync + 'static;

  fn analyze_frame(
    &self,
    frame: &ImageFrame,
    cancel: &CancelToken,
  ) -> Result<Self::Output, Self::Error>;
}

impl<G: SegmentationGateway> FrameAnalyzer for ElementSegmentationService<G> {
  type Output = SegmentationReport;
  type Error = ServiceError;

  fn analyze_frame(
    &self,
    frame: &ImageFrame,
    cancel: &CancelToken,
  ) -> Result<Self::Output, Self::Error> {
    let segmentation = self.segment_with_cancel(frame, cancel)?;
    Ok(SegmentationReport::from(&segmentation))
  }
}

impl FrameAnalyzer for BackgroundClassifier {
  type Output = BackgroundInfo;
  type Error = Infallible;

  fn analyze_frame(
    &self,
    frame: &ImageFrame,
    _cancel: &CancelToken,
  ) -> Result<Self::Output, Self::Error> {
    Ok(self.analyze(frame.rgb()))
  }
}

#[cfg(test)]
mod tests {
  use std::sync::Mutex;

  use image::{Rgb, RgbImage};

  use super::*;
  use crate::{
    catalog::InstructionTemplate,
    element::RawCandidate,
    gateway::GatewayError,
    geometry::{BBox, ImageBounds},
  };

  #[derive(Default)]
  struct Recording {
    seen: Mutex<Vec<BackgroundCategory>>,
  }

  impl SegmentationGateway for Recording {
    type Error = GatewayError;

    fn segment(
      &self,
      _frame: &ImageFrame,
      instruction: &InstructionTemplate,
    ) -> Result<Vec<RawCandidate>, Self::Error> {
      self.seen.lock().unwrap().push(instruction.category());
      Ok(vec![
        RawCandidate::new(BBox::new(10.0, 10.0, 20.0, 20.0), "icon", 0.9, 0)
          .with_detail("齿轮"),
        RawCandidate::new(BBox::new(40.0, 10.0, 30.0, 10.0), "text", 0.8, 1),
      ])
    }
  }

  fn gray(width: u32, height: u32) -> ImageFrame {
    ImageFrame::new("gray", RgbImage::from_pixel(width, height, Rgb([128, 128, 128])))
  }

  #[test]
  fn uniform_image_uses_simple_template() {
    let service = ElementSegmentationService::new(Recording::default());
    let result = service.segment(&gray(100, 80)).unwrap();
    assert_eq!(result.category, BackgroundCategory::Simple);
    assert_eq!(result.elements.len(), 2);
    assert!(result.gateway_failure.is_none());
    assert_eq!(
      *service.gateway.seen.lock().unwrap(),
      vec![BackgroundCategory::Simple]
    );

    let stats = result.statistics();
    assert_eq!(stats.total, 2);
    assert_eq!(stats.by_label.get("icon"), Some(&1));
    assert_eq!(stats.text_with_content, 0);
    assert_eq!(stats.average_text_length, 0.0);
  }

  #[test]
  fn text_length_averages_over_all_text_elements() {
    let service = ElementSegmentationService::new(Recording::default());
    let mut result = service.segment(&gray(200, 100)).unwrap();
    let candidates = [
      RawCandidate::new(BBox::new(0.0, 0.0, 50.0, 20.0), "text", 0.9, 0).with_detail("标题文字"),
      RawCandidate::new(BBox::new(0.0, 40.0, 50.0, 20.0), "text", 0.9, 1),
      RawCandidate::new(BBox::new(100.0, 0.0, 30.0, 30.0), "icon", 0.9, 2)
        .with_detail("齿轮图标说明"),
    ];
    result.elements = ResultProcessor::default()
      .process(&candidates, ImageBounds::new(result.width, result.height))
      .unwrap()
      .elements;

    let stats = result.statistics();
    assert_eq!(stats.total, 3);
    assert_eq!(stats.by_label.get("text"), Some(&2));
    assert_eq!(stats.text_with_content, 1);
    assert_eq!(stats.average_text_length, 2.0);
  }

  #[test]
  fn category_override_selects_template() {
    let service = ElementSegmentationService::new(Recording::default())
      .with_category_override(Some(BackgroundCategory::Complex));
    let result = service.segment(&gray(100, 80)).unwrap();
    assert_eq!(result.category, BackgroundCategory::Complex);
    assert_eq!(result.background.category, BackgroundCategory::Simple);
  }

  #[test]
  fn cancelled_token_stops_before_gateway() {
    let service = ElementSegmentationService::new(Recording::default());
    let token = CancelToken::new();
    token.cancel();
    assert!(matches!(
      service.segment_with_cancel(&gray(32, 32), &token),
      Err(ServiceError::Cancelled)
    ));
    assert!(service.gateway.seen.lock().unwrap().is_empty());
  }

  #[test]
  fn degenerate_image_is_rejected() {
    let service = ElementSegmentationService::new(Recording::default());
    let frame = ImageFrame::new("empty", RgbImage::new(0, 10));
    assert!(matches!(
      service.segment(&frame),
      Err(ServiceError::Process(ProcessError::InvalidImageBounds { .. }))
    ));
  }
}
