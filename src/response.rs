// 该文件是 Shanan （山南西风） 项目的一部分。
// src/response.rs - 视觉模型响应解析
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

use serde_json::Value;
use tracing::{debug, warn};

use crate::{
  element::{ElementKind, RawCandidate},
  gateway::GatewayError,
  geometry::BBox,
};

const GROUPS: [(&str, ElementKind); 3] = [
  ("text_elements", ElementKind::Text),
  ("icons", ElementKind::Icon),
  ("charts", ElementKind::Chart),
];

const FLAT_GROUP: &str = "elements";

/// 解析模型返回的文本，得到原始候选列表
///
/// 支持 Markdown 代码块包裹、前后夹杂说明文字的 JSON。
/// 单个元素的边界框无法解析时跳过该元素，整体无法解析时返回错误。
pub fn parse_response(text: &str) -> Result<Vec<RawCandidate>, GatewayError> {
  let value = parse_json(text)?;
  candidates_from_value(&value)
}

fn strip_fences(text: &str) -> &str {
  let mut cleaned = text.trim();
  if cleaned.starts_with("```") {
    cleaned = match cleaned.find('\n') {
      Some(pos) => &cleaned[pos + 1..],
      None => cleaned.trim_start_matches('`'),
    };
  }
  if let Some(stripped) = cleaned.trim_end().strip_suffix("```") {
    cleaned = stripped;
  }
  cleaned.trim()
}

fn parse_json(text: &str) -> Result<Value, GatewayError> {
  let cleaned = strip_fences(text);
  match serde_json::from_str(cleaned) {
    Ok(value) => Ok(value),
    Err(err) => {
      // 尝试截取最外层的 JSON 对象
      if let (Some(start), Some(end)) = (cleaned.find('{'), cleaned.rfind('}'))
        && start < end
        && let Ok(value) = serde_json::from_str(&cleaned[start..=end])
      {
        return Ok(value);
      }
      let preview: String = cleaned.chars().take(200).collect();
      warn!("无法解析模型响应: {}", preview);
      Err(GatewayError::MalformedResponse(err.to_string()))
    }
  }
}

pub fn candidates_from_value(value: &Value) -> Result<Vec<RawCandidate>, GatewayError> {
  let object = value
    .as_object()
    .ok_or_else(|| GatewayError::MalformedResponse("响应不是 JSON 对象".to_string()))?;

  let known = GROUPS
    .iter()
    .map(|(key, _)| *key)
    .chain(std::iter::once(FLAT_GROUP))
    .any(|key| object.contains_key(key));
  if !known {
    return Err(GatewayError::MalformedResponse(
      "响应中缺少元素字段".to_string(),
    ));
  }

  let mut candidates = Vec::new();
  let mut index = 0usize;

  for (key, kind) in GROUPS {
    for item in items(object.get(key)) {
      if let Some(candidate) = parse_item(item, Some(kind), index) {
        candidates.push(candidate);
      }
      index += 1;
    }
  }

  for item in items(object.get(FLAT_GROUP)) {
    if let Some(candidate) = parse_item(item, None, index) {
      candidates.push(candidate);
    }
    index += 1;
  }

  debug!("解析得到 {} 个候选（共 {} 项）", candidates.len(), index);
  Ok(candidates)
}

fn items(value: Option<&Value>) -> &[Value] {
  value
    .and_then(Value::as_array)
    .map(Vec::as_slice)
    .unwrap_or(&[])
}

fn number(value: &Value) -> Option<f32> {
  match value {
    Value::Number(n) => n.as_f64().map(|v| v as f32),
    Value::String(s) => s.trim().parse::<f32>().ok(),
    _ => None,
  }
}

fn string<'a>(item: &'a Value, keys: &[&str]) -> Option<&'a str> {
  keys
    .iter()
    .filter_map(|key| item.get(*key).and_then(Value::as_str))
    .map(str::trim)
    .find(|s| !s.is_empty())
}

fn parse_item(item: &Value, kind: Option<ElementKind>, index: usize) -> Option<RawCandidate> {
  let bbox = match item.get("bbox").and_then(Value::as_array) {
    Some(values) if values.len() == 4 => {
      let parsed: Option<Vec<f32>> = values.iter().map(number).collect();
      match parsed {
        Some(v) => BBox::new(v[0], v[1], v[2], v[3]),
        None => {
          debug!("第 {} 项边界框无法解析: {}", index, item);
          return None;
        }
      }
    }
    _ => {
      debug!("第 {} 项缺少边界框: {}", index, item);
      return None;
    }
  };

  // 分组内的标签由分组决定，`type` 只作为补充说明
  let label = match kind {
    Some(kind) => kind.label().to_string(),
    None => match string(item, &["label", "type", "kind"]) {
      Some(label) => label.to_lowercase(),
      None => {
        debug!("第 {} 项缺少标签: {}", index, item);
        return None;
      }
    },
  };

  // 缺省置信度为 1.0；存在但无法解析时交给后处理剔除
  let confidence = match item.get("confidence").or_else(|| item.get("score")) {
    None | Some(Value::Null) => 1.0,
    Some(value) => number(value).unwrap_or(f32::NAN),
  };

  let mut candidate = RawCandidate::new(bbox, label, confidence, index);
  let subtype = kind
    .and(string(item, &["type"]))
    .filter(|subtype| !subtype.eq_ignore_ascii_case(&candidate.label));
  if let Some(detail) = string(item, &["text", "description"]).or(subtype) {
    candidate = candidate.with_detail(detail);
  }
  Some(candidate)
}
