// 该文件是 Shanan （山南西风） 项目的一部分。
// src/catalog.rs - 按背景类别组织的提示词模板
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

use std::{collections::BTreeMap, path::PathBuf, sync::Arc};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::{background::BackgroundCategory, element::ElementKind};

#[derive(Error, Debug)]
pub enum PromptError {
  #[error("未知的背景类别: {0}")]
  UnknownCategory(String),
  #[error("读取提示词模板失败 {path:?}: {source}")]
  TemplateIo {
    path: PathBuf,
    source: std::io::Error,
  },
}

const TASK_INTRO: &str = "请仔细分析这张幻灯片图片，识别其中所有可编辑的内容元素。\n";

const DECORATIVE_NOTICE: &str = "\
重要提示：
- 这张图片的背景包含纹理、装饰图案或花纹，背景装饰（边框、花纹、底纹、装饰性小图标）不是前景元素
- 只识别真正的内容元素：文字、图标、图表
- 如果某个区域的范围与背景中重复出现的图案单元一致（大小、间距相同），视为背景平铺，不要输出
- 边界框必须紧密包围元素内容，不要包含多余的背景区域
";

const TEXTURED_NOTICE: &str = "- 背景为均匀重复的纹理，纹理的每一个单元都不是元素\n";

const COMPLEX_NOTICE: &str = "- 背景包含结构化的装饰图案，装饰中的文字与图形同样不是元素\n";

const GRADIENT_NOTICE: &str = "提示：背景为渐变色，颜色的平滑过渡本身不是元素。\n";

const REQUIREMENTS: &str = "
要求：
1. 识别所有文字内容：文字的具体内容、位置（bounding box）、识别置信度
2. 识别所有图标和图片元素：位置（bounding box）、简要描述、识别置信度
3. 识别所有图表、图形元素：位置（bounding box）、类型描述（柱状图、饼图、流程图等）、识别置信度
";

const RESPONSE_FORMAT: &str = r#"
请严格按照以下 JSON 格式返回结果，不要添加任何其他文字说明：

{
    "text_elements": [
        {"text": "文字内容", "bbox": [x, y, width, height], "confidence": 0.95}
    ],
    "icons": [
        {"type": "icon", "bbox": [x, y, width, height], "description": "图标描述", "confidence": 0.9}
    ],
    "charts": [
        {"type": "chart", "bbox": [x, y, width, height], "description": "图表描述", "confidence": 0.9}
    ]
}

注意：
- bbox 坐标从图片左上角 (0, 0) 开始，格式为 [x, y, width, height]，单位为像素
- confidence 取值范围为 0 到 1
- 如果某个类别没有元素，返回空数组 []
- 确保所有坐标都在图片范围内
"#;

/// 一个背景类别对应的提示词，不可变
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstructionTemplate {
  category: BackgroundCategory,
  text: Arc<str>,
}

impl InstructionTemplate {
  pub fn new(category: BackgroundCategory, text: impl Into<Arc<str>>) -> Self {
    Self {
      category,
      text: text.into(),
    }
  }

  pub fn category(&self) -> BackgroundCategory {
    self.category
  }

  pub fn text(&self) -> &str {
    &self.text
  }

  /// 附加元素种类提示，只要求模型输出这些种类
  pub fn with_hints(&self, hints: &[ElementKind]) -> InstructionTemplate {
    if hints.is_empty() {
      return self.clone();
    }

    let mut kinds: Vec<ElementKind> = hints.to_vec();
    kinds.sort();
    kinds.dedup();
    let names: Vec<&str> = kinds
      .iter()
      .map(|kind| match kind {
        ElementKind::Text => "文字（text_elements）",
        ElementKind::Icon => "图标（icons）",
        ElementKind::Chart => "图表（charts）",
      })
      .collect();

    let text = format!(
      "{}\n本次只需要识别：{}。其余类别返回空数组 []。\n",
      self.text,
      names.join("、")
    );
    InstructionTemplate::new(self.category, text)
  }
}

/// 内置模板
pub fn builtin_template(category: BackgroundCategory) -> InstructionTemplate {
  let mut text = String::from(TASK_INTRO);
  match category {
    BackgroundCategory::Simple => {}
    BackgroundCategory::Gradient => text.push_str(GRADIENT_NOTICE),
    BackgroundCategory::Textured => {
      text.push_str(DECORATIVE_NOTICE);
      text.push_str(TEXTURED_NOTICE);
    }
    BackgroundCategory::Complex => {
      text.push_str(DECORATIVE_NOTICE);
      text.push_str(COMPLEX_NOTICE);
    }
  }
  text.push_str(REQUIREMENTS);
  text.push_str(RESPONSE_FORMAT);
  InstructionTemplate::new(category, text)
}

/// 配置文件中的模板覆盖，值为模板文件路径
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptOverrides {
  pub simple: Option<PathBuf>,
  pub gradient: Option<PathBuf>,
  pub textured: Option<PathBuf>,
  pub complex: Option<PathBuf>,
}

impl PromptOverrides {
  fn get(&self, category: BackgroundCategory) -> Option<&PathBuf> {
    match category {
      BackgroundCategory::Simple => self.simple.as_ref(),
      BackgroundCategory::Gradient => self.gradient.as_ref(),
      BackgroundCategory::Textured => self.textured.as_ref(),
      BackgroundCategory::Complex => self.complex.as_ref(),
    }
  }
}

/// 提示词目录。进程启动时构造一次，之后只读共享。
#[derive(Debug, Clone)]
pub struct PromptCatalog {
  templates: BTreeMap<BackgroundCategory, InstructionTemplate>,
}

impl Default for PromptCatalog {
  fn default() -> Self {
    Self::builtin()
  }
}

impl PromptCatalog {
  pub fn builtin() -> Self {
    let templates = BackgroundCategory::ALL
      .into_iter()
      .map(|category| (category, builtin_template(category)))
      .collect();
    Self { templates }
  }

  /// 由给定模板构造，允许缺少某些类别
  pub fn from_templates(templates: impl IntoIterator<Item = InstructionTemplate>) -> Self {
    let templates = templates
      .into_iter()
      .map(|template| (template.category(), template))
      .collect();
    Self { templates }
  }

  /// 以内置模板为基础，读取配置中指定的模板文件
  pub fn from_overrides(overrides: &PromptOverrides) -> Result<Self, PromptError> {
    let mut catalog = Self::builtin();
    for category in BackgroundCategory::ALL {
      if let Some(path) = overrides.get(category) {
        let text = std::fs::read_to_string(path).map_err(|source| PromptError::TemplateIo {
          path: path.clone(),
          source,
        })?;
        info!("使用自定义提示词模板: {} <- {:?}", category, path);
        catalog = catalog.with_template(InstructionTemplate::new(category, text));
      }
    }
    Ok(catalog)
  }

  pub fn with_template(mut self, template: InstructionTemplate) -> Self {
    self.templates.insert(template.category(), template);
    self
  }

  pub fn into_shared(self) -> Arc<Self> {
    Arc::new(self)
  }

  pub fn resolve(&self, category: BackgroundCategory) -> Result<&InstructionTemplate, PromptError> {
    debug!("查找提示词模板: {}", category);
    self
      .templates
      .get(&category)
      .ok_or_else(|| PromptError::UnknownCategory(category.to_string()))
  }

  pub fn resolve_name(&self, name: &str) -> Result<&InstructionTemplate, PromptError> {
    let category: BackgroundCategory = name.parse()?;
    self.resolve(category)
  }

  pub fn resolve_with_hints(
    &self,
    category: BackgroundCategory,
    hints: &[ElementKind],
  ) -> Result<InstructionTemplate, PromptError> {
    Ok(self.resolve(category)?.with_hints(hints))
  }
}
