// 该文件是 Shanan （山南西风） 项目的一部分。
// src/config.rs - 配置文件
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

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::{
  background::BackgroundThresholds, catalog::PromptOverrides, element::ElementKind,
  processor::ProcessorConfig,
};

#[derive(Error, Debug)]
pub enum ConfigError {
  #[error("读取配置文件失败 {path:?}: {source}")]
  Io {
    path: PathBuf,
    source: std::io::Error,
  },
  #[error("配置文件格式错误: {0}")]
  Parse(#[from] toml::de::Error),
  #[error("配置项 {field} 无效: {reason}")]
  Invalid { field: &'static str, reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
  /// 模型调用失败时直接报错，而不是当作没有候选
  pub strict_gateway: bool,
  /// 批量任务的并行线程数
  pub workers: usize,
  /// 只请求这些种类的元素，为空表示全部
  pub hints: Vec<ElementKind>,
}

impl Default for ServiceConfig {
  fn default() -> Self {
    Self {
      strict_gateway: false,
      workers: 4,
      hints: Vec::new(),
    }
  }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmentConfig {
  pub processor: ProcessorConfig,
  pub background: BackgroundThresholds,
  pub prompts: PromptOverrides,
  pub service: ServiceConfig,
}

fn unit_range(field: &'static str, value: f32) -> Result<(), ConfigError> {
  if value.is_finite() && (0.0..=1.0).contains(&value) {
    Ok(())
  } else {
    Err(ConfigError::Invalid {
      field,
      reason: format!("{} 不在 [0, 1] 范围内", value),
    })
  }
}

fn positive(field: &'static str, value: usize) -> Result<(), ConfigError> {
  if value > 0 {
    Ok(())
  } else {
    Err(ConfigError::Invalid {
      field,
      reason: "必须大于 0".to_string(),
    })
  }
}

impl SegmentConfig {
  pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
    let config: SegmentConfig = toml::from_str(text)?;
    config.validate()?;
    Ok(config)
  }

  pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
      path: path.to_path_buf(),
      source,
    })?;
    let config = Self::from_toml_str(&text)?;
    info!("加载配置文件: {:?}", path);
    Ok(config)
  }

  pub fn validate(&self) -> Result<(), ConfigError> {
    let p = &self.processor;
    unit_range("processor.min_confidence", p.min_confidence)?;
    unit_range("processor.dedup_iou_threshold", p.dedup_iou_threshold)?;
    unit_range("processor.min_clip_fraction", p.min_clip_fraction)?;
    unit_range("processor.tighten_min_fraction", p.tighten_min_fraction)?;
    unit_range("processor.tighten_palette_min_share", p.tighten_palette_min_share)?;
    positive("processor.tighten_palette", p.tighten_palette)?;
    if let Some((label, area)) = p
      .min_area_by_label
      .iter()
      .find(|(_, area)| !area.is_finite() || **area < 0.0)
    {
      return Err(ConfigError::Invalid {
        field: "processor.min_area_by_label",
        reason: format!("{} 的最小面积 {} 无效", label, area),
      });
    }

    let b = &self.background;
    unit_range("background.edge_density", b.edge_density)?;
    unit_range("background.quiet_cell_density", b.quiet_cell_density)?;
    unit_range("background.max_quiet_cell_fraction", b.max_quiet_cell_fraction)?;
    unit_range("background.gradient_min_r2", b.gradient_min_r2)?;
    positive("background.grid_cells", b.grid_cells as usize)?;
    positive("background.max_border_samples", b.max_border_samples)?;

    positive("service.workers", self.service.workers)?;
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn empty_file_yields_defaults() {
    let config = SegmentConfig::from_toml_str("").unwrap();
    assert_eq!(config, SegmentConfig::default());
    assert_eq!(config.processor.min_confidence, 0.3);
    assert!(!config.service.strict_gateway);
  }

  #[test]
  fn sections_override_individual_fields() {
    let text = r#"
[processor]
min_confidence = 0.5
enable_bbox_tightening = false

[processor.min_area_by_label]
icon = 64.0

[background]
grid_cells = 4

[prompts]
textured = "prompts/textured.txt"

[service]
strict_gateway = true
hints = ["icon", "chart"]
"#;
    let config = SegmentConfig::from_toml_str(text).unwrap();
    assert_eq!(config.processor.min_confidence, 0.5);
    assert!(!config.processor.enable_bbox_tightening);
    assert_eq!(config.processor.dedup_iou_threshold, 0.5);
    assert_eq!(config.processor.min_area("icon"), 64.0);
    assert_eq!(config.background.grid_cells, 4);
    assert_eq!(
      config.prompts.textured,
      Some(PathBuf::from("prompts/textured.txt"))
    );
    assert!(config.service.strict_gateway);
    assert_eq!(config.service.hints, vec![ElementKind::Icon, ElementKind::Chart]);
  }

  #[test]
  fn out_of_range_values_are_rejected() {
    assert!(matches!(
      SegmentConfig::from_toml_str("[processor]\ndedup_iou_threshold = 1.5\n"),
      Err(ConfigError::Invalid {
        field: "processor.dedup_iou_threshold",
        ..
      })
    ));
    assert!(matches!(
      SegmentConfig::from_toml_str("[processor]\ntighten_palette = 0\n"),
      Err(ConfigError::Invalid {
        field: "processor.tighten_palette",
        ..
      })
    ));
    assert!(matches!(
      SegmentConfig::from_toml_str("[service]\nworkers = 0\n"),
      Err(ConfigError::Invalid { .. })
    ));
    assert!(matches!(
      SegmentConfig::from_toml_str("[processor]\nmin_confidence = \"high\"\n"),
      Err(ConfigError::Parse(_))
    ));
  }

  #[test]
  fn load_reports_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("segment.toml");
    assert!(matches!(
      SegmentConfig::load(&path),
      Err(ConfigError::Io { .. })
    ));
    std::fs::write(&path, "[service]\nworkers = 2\n").unwrap();
    assert_eq!(SegmentConfig::load(&path).unwrap().service.workers, 2);
  }
}
