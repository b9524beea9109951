// 该文件是 Shanan （山南西风） 项目的一部分。
// tests/pipeline.rs - 分割流程集成测试
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

use std::{collections::BTreeSet, sync::Mutex};

use image::{Rgb, RgbImage};

use shanan_segment::{
  BBox, BackgroundCategory, ElementSegmentationService, GatewayError, ImageFrame,
  InstructionTemplate, RawCandidate, ReplayGateway, SegmentationGateway, ServiceError,
  input::DirectoryInput,
  output::DirectoryRecordOutput,
  task::BatchTask,
};

const THREE_ICONS: &str = r#"```json
{
  "text_elements": [],
  "icons": [
    {"type": "icon", "bbox": [10, 10, 50, 50], "confidence": 0.9},
    {"type": "icon", "bbox": [12, 12, 50, 50], "confidence": 0.85},
    {"type": "icon", "bbox": [200, 200, 20, 20], "confidence": 0.95}
  ],
  "charts": []
}
```"#;

fn gray_slide(name: &str) -> ImageFrame {
  ImageFrame::new(name, RgbImage::from_pixel(400, 300, Rgb([240, 240, 240])))
}

fn textured_slide(name: &str) -> ImageFrame {
  let mut image = RgbImage::from_fn(128, 128, |x, y| {
    if ((x + y) / 4) % 2 == 0 {
      Rgb([30, 40, 50])
    } else {
      Rgb([220, 210, 200])
    }
  });
  for y in 50..70 {
    for x in 50..70 {
      image.put_pixel(x, y, Rgb([255, 255, 255]));
    }
  }
  ImageFrame::new(name, image)
}

#[test]
fn overlapping_icons_merge_through_replay() {
  let dir = tempfile::tempdir().unwrap();
  let path = dir.path().join("slide.json");
  std::fs::write(&path, THREE_ICONS).unwrap();

  let service = ElementSegmentationService::new(ReplayGateway::from_file(&path));
  let result = service.segment(&gray_slide("slide")).unwrap();

  assert_eq!(result.category, BackgroundCategory::Simple);
  assert_eq!(result.elements.len(), 2);
  let first = &result.elements[0];
  assert_eq!(first.bbox, BBox::new(10.0, 10.0, 52.0, 52.0));
  assert_eq!(first.confidence, 0.9);
  assert_eq!(first.merged_from, BTreeSet::from([0, 1]));
  let second = &result.elements[1];
  assert_eq!(second.bbox, BBox::new(200.0, 200.0, 20.0, 20.0));
  assert_eq!(second.confidence, 0.95);

  let records = result.to_records();
  assert_eq!((records[0].x, records[0].w), (10, 52));
}

#[test]
fn low_confidence_candidate_is_counted_not_emitted() {
  let dir = tempfile::tempdir().unwrap();
  let path = dir.path().join("slide.json");
  std::fs::write(
    &path,
    r#"{"icons": [{"bbox": [10, 10, 40, 40], "confidence": 0.1}]}"#,
  )
  .unwrap();

  let service = ElementSegmentationService::new(ReplayGateway::from_file(&path));
  let result = service.segment(&gray_slide("slide")).unwrap();
  assert!(result.elements.is_empty());
  assert_eq!(result.diagnostics.low_confidence, 1);
  assert_eq!(result.statistics().total, 0);
}

#[test]
fn grouped_subtypes_keep_per_label_minimum_area() {
  let dir = tempfile::tempdir().unwrap();
  let path = dir.path().join("slide.json");
  std::fs::write(
    &path,
    r#"{
      "charts": [{"type": "bar", "bbox": [0, 0, 20, 20]}],
      "icons": [{"type": "logo", "bbox": [100, 100, 10, 10]}]
    }"#,
  )
  .unwrap();

  let service = ElementSegmentationService::new(ReplayGateway::from_file(&path));
  let result = service.segment(&gray_slide("slide")).unwrap();
  assert!(result.elements.is_empty());
  assert_eq!(result.diagnostics.too_small, 2);
}

#[test]
fn gateway_failure_is_soft_unless_strict() {
  let dir = tempfile::tempdir().unwrap();
  let gateway = ReplayGateway::from_directory(dir.path());

  let soft = ElementSegmentationService::new(&gateway);
  let result = soft.segment(&gray_slide("missing")).unwrap();
  assert!(result.elements.is_empty());
  assert!(result.gateway_failure.is_some());

  let strict = ElementSegmentationService::new(&gateway).with_strict(true);
  assert!(matches!(
    strict.segment(&gray_slide("missing")),
    Err(ServiceError::Gateway(_))
  ));
}

#[test]
fn textured_slide_boxes_tighten_to_content() {
  let dir = tempfile::tempdir().unwrap();
  let path = dir.path().join("pattern.json");
  std::fs::write(
    &path,
    r#"{"icons": [{"type": "icon", "bbox": [40, 40, 40, 40], "confidence": 0.9}]}"#,
  )
  .unwrap();

  let service = ElementSegmentationService::new(ReplayGateway::from_file(&path));
  let result = service.segment(&textured_slide("pattern")).unwrap();
  assert_eq!(result.category, BackgroundCategory::Textured);
  assert_eq!(result.elements.len(), 1);
  assert_eq!(result.elements[0].bbox, BBox::new(50.0, 50.0, 20.0, 20.0));
}

#[derive(Default)]
struct CapturePrompt {
  prompts: Mutex<Vec<InstructionTemplate>>,
}

impl SegmentationGateway for CapturePrompt {
  type Error = GatewayError;

  fn segment(
    &self,
    _frame: &ImageFrame,
    instruction: &InstructionTemplate,
  ) -> Result<Vec<RawCandidate>, Self::Error> {
    self.prompts.lock().unwrap().push(instruction.clone());
    Err(GatewayError::RateLimited)
  }
}

#[test]
fn textured_background_selects_decorative_prompt() {
  let gateway = CapturePrompt::default();
  let service = ElementSegmentationService::new(&gateway);

  let textured = service.segment(&textured_slide("pattern")).unwrap();
  assert_eq!(textured.category, BackgroundCategory::Textured);
  assert!(textured.background.has_texture);
  service.segment(&gray_slide("plain")).unwrap();

  let prompts = gateway.prompts.lock().unwrap();
  assert_eq!(prompts[0].category(), BackgroundCategory::Textured);
  assert!(prompts[0].text().contains("背景平铺"));
  assert_eq!(prompts[1].category(), BackgroundCategory::Simple);
  assert!(!prompts[1].text().contains("背景平铺"));
}

#[test]
fn batch_writes_one_record_per_image() {
  let slides = tempfile::tempdir().unwrap();
  let responses = tempfile::tempdir().unwrap();
  let records = tempfile::tempdir().unwrap();

  for name in ["a", "b", "c"] {
    gray_slide(name)
      .rgb()
      .save(slides.path().join(format!("{}.png", name)))
      .unwrap();
  }
  std::fs::write(responses.path().join("a.json"), THREE_ICONS).unwrap();
  std::fs::write(
    responses.path().join("b.json"),
    r#"{"text_elements": [{"text": "标题", "bbox": [20, 20, 200, 30]}]}"#,
  )
  .unwrap();
  // c 没有录制响应，按软失败处理

  let input = DirectoryInput::open(slides.path()).unwrap();
  let service =
    ElementSegmentationService::new(ReplayGateway::from_directory(responses.path()));
  let output = DirectoryRecordOutput::new(records.path());

  let summary = BatchTask::default()
    .with_workers(2)
    .run_batch(input, &service, &output)
    .unwrap();
  assert_eq!(summary.succeeded, 3);
  assert_eq!(summary.failed, 0);

  let read = |name: &str| -> serde_json::Value {
    let text = std::fs::read_to_string(records.path().join(format!("{}.json", name))).unwrap();
    serde_json::from_str(&text).unwrap()
  };

  let a = read("a");
  assert_eq!(a["name"], "a");
  assert!(a["generated_at"].is_string());
  assert_eq!(a["category"], "simple");
  assert_eq!(a["elements"].as_array().unwrap().len(), 2);
  assert_eq!(a["elements"][0]["w"], 52);

  let b = read("b");
  assert_eq!(b["elements"][0]["label"], "text");
  assert_eq!(b["elements"][0]["detail"], "标题");
  assert_eq!(b["statistics"]["text_with_content"], 1);
  assert_eq!(b["statistics"]["average_text_length"], 2.0);

  let c = read("c");
  assert!(c["elements"].as_array().unwrap().is_empty());
  assert!(c["gateway_failure"].is_string());
}
