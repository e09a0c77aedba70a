// 该文件是 Rizhao （日照） 项目的一部分。
// src/detection.rs - 检测适配器与面积计算
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
  any::Any,
  fmt::Display,
  panic::{AssertUnwindSafe, catch_unwind},
};

use image::RgbImage;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::{
  energy::{InvalidParameter, check_meters_per_pixel},
  model::{Model, RawDetection, RawOutput},
  output::draw::Draw,
};

const UNKNOWN_LABEL: &str = "unknown";

/// 单条原始检测无法归一化的原因
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SchemaIssue {
  #[error("缺少边框几何字段")]
  MissingGeometry,
  #[error("缺少置信度字段")]
  MissingConfidence,
  #[error("置信度超出 [0, 1]: {0}")]
  ConfidenceOutOfRange(f64),
  #[error("边框坐标不是有限数值: {0:?}")]
  NonFiniteBox([f64; 4]),
  #[error("边框退化 (需要 xmin<xmax, ymin<ymax): {0:?}")]
  DegenerateBox([f64; 4]),
}

/// 检测阶段的诊断信息，不会中断调用方的流程
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DetectionError {
  #[error("模型推理失败: {0}")]
  Inference(String),
  #[error("模型推理崩溃: {0}")]
  Panicked(String),
  #[error("第 {index} 条检测输出格式不匹配: {issue}")]
  SchemaMismatch { index: usize, issue: SchemaIssue },
}

/// 一个检测到的物体，创建后不可变
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectionRecord {
  label: String,
  confidence: f64,
  bbox: [f64; 4],
}

impl DetectionRecord {
  /// bbox 为像素坐标 [x_min, y_min, x_max, y_max]
  pub fn new(label: impl Into<String>, confidence: f64, bbox: [f64; 4]) -> Result<Self, SchemaIssue> {
    if !(confidence.is_finite() && (0.0..=1.0).contains(&confidence)) {
      return Err(SchemaIssue::ConfidenceOutOfRange(confidence));
    }
    if bbox.iter().any(|v| !v.is_finite()) {
      return Err(SchemaIssue::NonFiniteBox(bbox));
    }
    if bbox[0] >= bbox[2] || bbox[1] >= bbox[3] {
      return Err(SchemaIssue::DegenerateBox(bbox));
    }
    Ok(Self {
      label: label.into(),
      confidence,
      bbox,
    })
  }

  pub fn label(&self) -> &str {
    &self.label
  }

  pub fn confidence(&self) -> f64 {
    self.confidence
  }

  pub fn bbox(&self) -> [f64; 4] {
    self.bbox
  }

  pub fn width(&self) -> f64 {
    self.bbox[2] - self.bbox[0]
  }

  pub fn height(&self) -> f64 {
    self.bbox[3] - self.bbox[1]
  }

  /// 像素面积
  pub fn area_px(&self) -> f64 {
    self.width() * self.height()
  }

  /// 地面面积（平方米）
  pub fn area_m2(&self, meters_per_pixel: f64) -> f64 {
    self.area_px() * meters_per_pixel.powi(2)
  }
}

impl TryFrom<RawDetection> for DetectionRecord {
  type Error = SchemaIssue;

  fn try_from(raw: RawDetection) -> Result<Self, Self::Error> {
    let bbox = match &raw.bbox {
      Some(b) => match (b.x1, b.y1, b.x2, b.y2) {
        (Some(x1), Some(y1), Some(x2), Some(y2)) => [x1, y1, x2, y2],
        _ => return Err(SchemaIssue::MissingGeometry),
      },
      None => match (raw.xmin, raw.ymin, raw.xmax, raw.ymax) {
        (Some(x1), Some(y1), Some(x2), Some(y2)) => [x1, y1, x2, y2],
        _ => return Err(SchemaIssue::MissingGeometry),
      },
    };
    let confidence = raw.confidence.ok_or(SchemaIssue::MissingConfidence)?;
    let label = raw
      .name
      .or_else(|| raw.class.map(|c| format!("class_{}", c)))
      .unwrap_or_else(|| UNKNOWN_LABEL.to_string());

    DetectionRecord::new(label, confidence, bbox)
  }
}

impl SchemaIssue {
  /// 缺少字段说明模型输出格式与预期不同，其余问题只影响单条检测
  pub fn is_missing_field(&self) -> bool {
    matches!(self, SchemaIssue::MissingGeometry | SchemaIssue::MissingConfidence)
  }
}

/// 将模型原始输出归一化为检测记录
///
/// 任意一条缺少字段即视为整体格式不匹配；数值不合法（退化框、非有限坐标、
/// 置信度越界）的单条检测被跳过。全部被跳过时同样返回格式不匹配。
pub fn normalize(raw: RawOutput) -> Result<Vec<DetectionRecord>, DetectionError> {
  let mut records = Vec::with_capacity(raw.len());
  let mut first_skipped = None;
  for (index, item) in raw.into_iter().enumerate() {
    match DetectionRecord::try_from(item) {
      Ok(record) => records.push(record),
      Err(issue) if issue.is_missing_field() => {
        return Err(DetectionError::SchemaMismatch { index, issue });
      }
      Err(issue) => {
        warn!("跳过第 {} 条检测: {}", index, issue);
        first_skipped.get_or_insert(DetectionError::SchemaMismatch { index, issue });
      }
    }
  }
  match first_skipped {
    Some(e) if records.is_empty() => Err(e),
    _ => Ok(records),
  }
}

/// 全部检测框的地面面积之和，重叠部分不做去重
pub fn total_area_m2(
  records: &[DetectionRecord],
  meters_per_pixel: f64,
) -> Result<f64, InvalidParameter> {
  let scale = check_meters_per_pixel(meters_per_pixel)?;
  Ok(records.iter().map(|r| r.area_m2(scale)).sum())
}

/// 单次检测的结果
#[derive(Debug, Clone)]
pub struct DetectionOutcome {
  /// 绘制了检测框的图像；检测失败时为原图
  pub annotated: RgbImage,
  pub records: Vec<DetectionRecord>,
  /// 检测失败或输出格式不匹配时的诊断
  pub diagnostic: Option<DetectionError>,
}

impl DetectionOutcome {
  fn degraded(image: &RgbImage, diagnostic: DetectionError) -> Self {
    Self {
      annotated: image.clone(),
      records: Vec::new(),
      diagnostic: Some(diagnostic),
    }
  }

  pub fn is_empty(&self) -> bool {
    self.records.is_empty()
  }

  pub fn status(&self) -> DetectionStatus {
    match (&self.diagnostic, self.records.is_empty()) {
      (Some(_), _) => DetectionStatus::Failed,
      (None, true) => DetectionStatus::NoDetections,
      (None, false) => DetectionStatus::Detected,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionStatus {
  Detected,
  NoDetections,
  Failed,
}

/// 检测适配器：调用黑盒模型并把输出整理成统一的检测记录
///
/// 每次调用独立执行一次推理，不做缓存。模型返回错误或发生 panic
/// 时返回原图与空列表，并通过 `diagnostic` 告知调用方。
pub struct DetectionAdapter<M> {
  model: M,
  draw: Draw,
}

impl<M> DetectionAdapter<M>
where
  M: Model<Input = RgbImage, Output = RawOutput>,
  M::Error: Display,
{
  pub fn new(model: M) -> Self {
    Self {
      model,
      draw: Draw::default(),
    }
  }

  pub fn with_draw(mut self, draw: Draw) -> Self {
    self.draw = draw;
    self
  }

  pub fn model(&self) -> &M {
    &self.model
  }

  pub fn detect(&self, image: &RgbImage) -> DetectionOutcome {
    info!("开始检测，图像尺寸 {}x{}", image.width(), image.height());
    let now = std::time::Instant::now();

    let raw = match catch_unwind(AssertUnwindSafe(|| self.model.infer(image))) {
      Ok(Ok(raw)) => raw,
      Ok(Err(e)) => {
        error!("模型推理失败: {}", e);
        return DetectionOutcome::degraded(image, DetectionError::Inference(e.to_string()));
      }
      Err(payload) => {
        let reason = panic_message(payload.as_ref());
        error!("模型推理崩溃: {}", reason);
        return DetectionOutcome::degraded(image, DetectionError::Panicked(reason));
      }
    };
    info!("推理完成，耗时: {:.2?}", now.elapsed());
    debug!("原始检测输出: {:?}", raw);

    if raw.is_empty() {
      warn!("图像中未检测到目标");
      return DetectionOutcome {
        annotated: image.clone(),
        records: Vec::new(),
        diagnostic: None,
      };
    }

    match normalize(raw) {
      Ok(records) => {
        info!("检测到 {} 个目标", records.len());
        DetectionOutcome {
          annotated: self.draw.annotate(image, &records),
          records,
          diagnostic: None,
        }
      }
      Err(e) => {
        error!("检测输出格式不匹配，请检查模型输出: {}", e);
        DetectionOutcome::degraded(image, e)
      }
    }
  }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
  if let Some(s) = payload.downcast_ref::<&str>() {
    s.to_string()
  } else if let Some(s) = payload.downcast_ref::<String>() {
    s.clone()
  } else {
    "未知错误".to_string()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::RawBox;

  struct FixedModel(RawOutput);

  impl Model for FixedModel {
    type Input = RgbImage;
    type Output = RawOutput;
    type Error = String;

    fn infer(&self, _input: &Self::Input) -> Result<Self::Output, Self::Error> {
      Ok(self.0.clone())
    }
  }

  fn nested(x1: f64, y1: f64, x2: f64, y2: f64) -> RawDetection {
    RawDetection {
      name: Some("solar_panel".to_string()),
      confidence: Some(0.8),
      bbox: Some(RawBox {
        x1: Some(x1),
        y1: Some(y1),
        x2: Some(x2),
        y2: Some(y2),
      }),
      ..Default::default()
    }
  }

  #[test]
  fn area_of_empty_list_is_zero() {
    assert_eq!(total_area_m2(&[], 0.1).unwrap(), 0.0);
  }

  #[test]
  fn area_of_single_box() {
    let record = DetectionRecord::new("solar_panel", 0.9, [0.0, 0.0, 10.0, 20.0]).unwrap();
    assert_eq!(record.area_px(), 200.0);
    let area = total_area_m2(&[record], 0.1).unwrap();
    assert!((area - 2.0).abs() < 1e-12);
  }

  #[test]
  fn overlapping_boxes_are_not_deduplicated() {
    let a = DetectionRecord::new("solar_panel", 0.9, [0.0, 0.0, 10.0, 10.0]).unwrap();
    let b = a.clone();
    let area = total_area_m2(&[a, b], 1.0).unwrap();
    assert_eq!(area, 200.0);
  }

  #[test]
  fn area_rejects_bad_scale() {
    assert!(total_area_m2(&[], 0.0).is_err());
    assert!(total_area_m2(&[], -0.1).is_err());
  }

  #[test]
  fn record_invariants() {
    assert!(matches!(
      DetectionRecord::new("p", 1.5, [0.0, 0.0, 1.0, 1.0]),
      Err(SchemaIssue::ConfidenceOutOfRange(_))
    ));
    assert!(matches!(
      DetectionRecord::new("p", 0.5, [5.0, 0.0, 5.0, 1.0]),
      Err(SchemaIssue::DegenerateBox(_))
    ));
    assert!(matches!(
      DetectionRecord::new("p", 0.5, [0.0, f64::NAN, 1.0, 1.0]),
      Err(SchemaIssue::NonFiniteBox(_))
    ));
  }

  #[test]
  fn normalize_nested_and_flat_layouts() {
    let records = normalize(vec![
      nested(1.0, 2.0, 3.0, 5.0),
      RawDetection::new("panel", 0.4, [0.0, 0.0, 10.0, 20.0]),
    ])
    .unwrap();
    assert_eq!(records[0].bbox(), [1.0, 2.0, 3.0, 5.0]);
    assert_eq!(records[1].label(), "panel");
    assert_eq!(records[1].area_px(), 200.0);
  }

  #[test]
  fn label_falls_back_to_class_id() {
    let raw = RawDetection {
      name: None,
      class: Some(2),
      ..RawDetection::new("", 0.5, [0.0, 0.0, 1.0, 1.0])
    };
    let record = DetectionRecord::try_from(raw).unwrap();
    assert_eq!(record.label(), "class_2");
  }

  #[test]
  fn missing_geometry_is_schema_mismatch() {
    let mut partial = nested(0.0, 0.0, 1.0, 1.0);
    if let Some(b) = partial.bbox.as_mut() {
      b.y2 = None;
    }
    let adapter = DetectionAdapter::new(FixedModel(vec![nested(0.0, 0.0, 4.0, 4.0), partial]));
    let image = RgbImage::new(8, 8);
    let outcome = adapter.detect(&image);

    assert!(outcome.records.is_empty());
    assert_eq!(outcome.annotated, image);
    assert_eq!(outcome.status(), DetectionStatus::Failed);
    assert_eq!(
      outcome.diagnostic,
      Some(DetectionError::SchemaMismatch {
        index: 1,
        issue: SchemaIssue::MissingGeometry
      })
    );
  }

  #[test]
  fn zero_detections_is_not_an_error() {
    let adapter = DetectionAdapter::new(FixedModel(Vec::new()));
    let image = RgbImage::new(8, 8);
    let outcome = adapter.detect(&image);
    assert!(outcome.is_empty());
    assert!(outcome.diagnostic.is_none());
    assert_eq!(outcome.status(), DetectionStatus::NoDetections);
    assert_eq!(outcome.annotated, image);
  }

  #[test]
  fn detections_are_drawn() {
    let adapter = DetectionAdapter::new(FixedModel(vec![nested(1.0, 1.0, 6.0, 6.0)]));
    let image = RgbImage::new(8, 8);
    let outcome = adapter.detect(&image);
    assert_eq!(outcome.status(), DetectionStatus::Detected);
    assert_eq!(outcome.records.len(), 1);
    assert_ne!(outcome.annotated, image);
  }

  #[test]
  fn invalid_box_is_skipped_without_dropping_the_batch() {
    let adapter = DetectionAdapter::new(FixedModel(vec![
      nested(0.0, 0.0, 10.0, 20.0),
      nested(5.0, 5.0, 5.0, 9.0),
      nested(8.0, 8.0, 2.0, 2.0),
    ]));
    let outcome = adapter.detect(&RgbImage::new(32, 32));

    assert_eq!(outcome.status(), DetectionStatus::Detected);
    assert!(outcome.diagnostic.is_none());
    assert_eq!(outcome.records.len(), 1);
    assert!((total_area_m2(&outcome.records, 0.1).unwrap() - 2.0).abs() < 1e-12);
  }

  #[test]
  fn all_items_invalid_is_schema_mismatch() {
    let mut overconfident = nested(0.0, 0.0, 4.0, 4.0);
    overconfident.confidence = Some(1.7);
    let outcome = DetectionAdapter::new(FixedModel(vec![
      nested(3.0, 0.0, 1.0, 4.0),
      overconfident,
    ]))
    .detect(&RgbImage::new(8, 8));

    assert_eq!(outcome.status(), DetectionStatus::Failed);
    assert!(matches!(
      outcome.diagnostic,
      Some(DetectionError::SchemaMismatch {
        index: 0,
        issue: SchemaIssue::DegenerateBox(_)
      })
    ));
  }
}
