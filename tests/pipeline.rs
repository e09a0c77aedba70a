// 该文件是 Rizhao （日照） 项目的一部分。
// tests/pipeline.rs - 获取并分析流程测试
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

use image::{Rgb, RgbImage};
use url::Url;

use rizhao::{
  FromUrl,
  detection::{DetectionAdapter, DetectionStatus},
  energy::DetectionConfig,
  geo::{Coordinate, meters_per_pixel},
  input::{FetchError, ImageSource, InputError, InputWrapper},
  irradiance::{IrradianceOrigin, IrradianceSource},
  model::{Model, RawDetection, RawOutput},
  output::{JsonReportOutput, OutputWrapper, Render, SaveImageFileOutput},
  task::{AnalysisError, AnalysisRequest, Analyze, ContinuousTask, OneShotTask, Pipeline, Task},
};

const TOLERANCE: f64 = 1e-9;

struct FakeTile {
  size: u32,
  fail: bool,
}

impl FakeTile {
  fn new(size: u32) -> Self {
    Self {
      size,
      fail: false,
    }
  }

  fn failing() -> Self {
    Self {
      fail: true,
      ..Self::new(64)
    }
  }
}

impl ImageSource for FakeTile {
  fn fetch(&self, _coordinate: &Coordinate, _zoom: u8) -> Result<RgbImage, InputError> {
    if self.fail {
      return Err(InputError::Fetch(FetchError::Status {
        status: 401,
        url: "https://api.mapbox.com/styles/v1/mapbox/satellite-v9/static".to_string(),
      }));
    }
    Ok(RgbImage::from_pixel(self.size, self.size, Rgb([40, 60, 80])))
  }

  fn scale_basis(&self) -> Option<u32> {
    Some(512)
  }
}

enum FakeModel {
  Boxes(Vec<[f64; 4]>),
  Fails,
  Panics,
  Malformed,
}

impl Model for FakeModel {
  type Input = RgbImage;
  type Output = RawOutput;
  type Error = String;

  fn infer(&self, _input: &RgbImage) -> Result<RawOutput, String> {
    match self {
      FakeModel::Boxes(boxes) => Ok(
        boxes
          .iter()
          .map(|b| RawDetection::new("solar_panel", 0.9, *b))
          .collect(),
      ),
      FakeModel::Fails => Err("weights corrupted".to_string()),
      FakeModel::Panics => panic!("segfault in backend"),
      FakeModel::Malformed => Ok(vec![RawDetection {
        name: Some("solar_panel".to_string()),
        confidence: Some(0.8),
        ..Default::default()
      }]),
    }
  }
}

struct FixedIrradiance(Result<f64, String>);

impl IrradianceSource for FixedIrradiance {
  type Error = String;

  fn daily_irradiance(&self, _coordinate: &Coordinate) -> Result<f64, String> {
    self.0.clone()
  }
}

fn request() -> AnalysisRequest {
  let config = DetectionConfig::default().with_meters_per_pixel(0.1);
  AnalysisRequest::new(Coordinate::default(), 18, config)
}

fn pipeline(model: FakeModel) -> Pipeline<FakeTile, FakeModel> {
  Pipeline::new(FakeTile::new(64), DetectionAdapter::new(model), "model1")
}

fn scratch_dir(name: &str) -> PathBuf {
  let dir = std::env::temp_dir().join(format!("rizhao-{}-{}", name, std::process::id()));
  std::fs::create_dir_all(&dir).unwrap();
  dir
}

#[test]
fn single_panel_energy() {
  // 10x20 像素, 0.1 m/px -> 2 m²
  let analysis = pipeline(FakeModel::Boxes(vec![[0.0, 0.0, 10.0, 20.0]]))
    .analyze(&request())
    .unwrap();
  let report = analysis.report;

  assert_eq!(report.status, DetectionStatus::Detected);
  assert_eq!(report.detections.len(), 1);
  assert!((report.total_area_m2 - 2.0).abs() < TOLERANCE);
  assert!((report.net_efficiency - 0.1665).abs() < TOLERANCE);
  assert!((report.energy.daily_kwh - 1.8315).abs() < TOLERANCE);
  assert!((report.energy.yearly_kwh - 668.4975).abs() < 1e-6);
  assert_eq!(report.irradiance.origin, IrradianceOrigin::Manual);
  assert_eq!(analysis.annotated.dimensions(), (64, 64));
}

#[test]
fn overlapping_boxes_are_summed() {
  let analysis = pipeline(FakeModel::Boxes(vec![
    [0.0, 0.0, 10.0, 20.0],
    [5.0, 5.0, 15.0, 25.0],
  ]))
  .analyze(&request())
  .unwrap();
  assert!((analysis.report.total_area_m2 - 4.0).abs() < TOLERANCE);
}

#[test]
fn no_detections_is_not_a_failure() {
  let analysis = pipeline(FakeModel::Boxes(Vec::new()))
    .analyze(&request())
    .unwrap();
  let report = analysis.report;
  assert_eq!(report.status, DetectionStatus::NoDetections);
  assert!(report.diagnostic.is_none());
  assert_eq!(report.total_area_m2, 0.0);
  assert_eq!(report.energy.daily_kwh, 0.0);
  assert_eq!(report.energy.yearly_kwh, 0.0);
}

#[test]
fn detector_failures_degrade_to_empty_result() {
  for model in [FakeModel::Fails, FakeModel::Panics, FakeModel::Malformed] {
    let analysis = pipeline(model).analyze(&request()).unwrap();
    let report = analysis.report;
    assert_eq!(report.status, DetectionStatus::Failed);
    assert!(report.diagnostic.is_some());
    assert!(report.detections.is_empty());
    assert_eq!(report.energy.yearly_kwh, 0.0);
    // 失败时返回原图
    assert_eq!(*analysis.annotated.get_pixel(0, 0), Rgb([40, 60, 80]));
  }
}

#[test]
fn fetch_failure_aborts_operation() {
  let pipeline = Pipeline::new(
    FakeTile::failing(),
    DetectionAdapter::new(FakeModel::Boxes(vec![[0.0, 0.0, 1.0, 1.0]])),
    "model1",
  );
  let err = pipeline.analyze(&request()).unwrap_err();
  assert!(matches!(
    err,
    AnalysisError::Input(InputError::Fetch(FetchError::Status { status: 401, .. }))
  ));
}

#[test]
fn invalid_parameters_are_rejected_before_fetch() {
  let source = FakeTile::new(64);
  let pipeline = Pipeline::new(
    source,
    DetectionAdapter::new(FakeModel::Boxes(Vec::new())),
    "model1",
  );
  let mut bad = request();
  bad.config.panel_efficiency = 1.5;
  let err = pipeline.analyze(&bad).unwrap_err();
  assert!(matches!(err, AnalysisError::InvalidParameter(p) if p.name == "panel_efficiency"));
}

#[test]
fn derived_scale_ignores_image_size() {
  let boxes = vec![[0.0, 0.0, 10.0, 10.0]];
  let expected = meters_per_pixel(Coordinate::default().latitude(), 18, 512);

  for size in [64, 256, 512] {
    let analysis = Pipeline::new(
      FakeTile::new(size),
      DetectionAdapter::new(FakeModel::Boxes(boxes.clone())),
      "model1",
    )
    .analyze(&request().with_derived_scale())
    .unwrap();
    assert!((analysis.report.config.meters_per_pixel - expected).abs() < TOLERANCE);
    assert!((analysis.report.total_area_m2 - 100.0 * expected * expected).abs() < TOLERANCE);
  }
}

#[test]
fn derived_scale_needs_a_grid_basis() {
  let dir = scratch_dir("basis");
  let tile_path = dir.join("tile.png");
  RgbImage::new(300, 300).save(&tile_path).unwrap();
  let model = || DetectionAdapter::new(FakeModel::Boxes(vec![[0.0, 0.0, 10.0, 10.0]]));

  let plain =
    InputWrapper::from_url(&Url::parse(&format!("image://{}", tile_path.display())).unwrap())
      .unwrap();
  let err = Pipeline::new(plain, model(), "model1")
    .analyze(&request().with_derived_scale())
    .unwrap_err();
  assert!(matches!(err, AnalysisError::ScaleUnavailable));

  let with_basis = InputWrapper::from_url(
    &Url::parse(&format!("image://{}?basis=512", tile_path.display())).unwrap(),
  )
  .unwrap();
  let report = Pipeline::new(with_basis, model(), "model1")
    .analyze(&request().with_derived_scale())
    .unwrap()
    .report;
  let expected = meters_per_pixel(Coordinate::default().latitude(), 18, 512);
  assert!((report.config.meters_per_pixel - expected).abs() < TOLERANCE);

  std::fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn irradiance_provider_and_fallback() {
  let boxes = vec![[0.0, 0.0, 10.0, 20.0]];

  let provided = pipeline(FakeModel::Boxes(boxes.clone()))
    .with_irradiance_source(Some(FixedIrradiance(Ok(4.0))))
    .analyze(&request())
    .unwrap()
    .report;
  assert_eq!(provided.irradiance.origin, IrradianceOrigin::Provider);
  assert!((provided.energy.daily_kwh - 2.0 * 4.0 * 0.1665).abs() < TOLERANCE);

  let fallback = pipeline(FakeModel::Boxes(boxes))
    .with_irradiance_source(Some(FixedIrradiance(Err("timeout".to_string()))))
    .analyze(&request())
    .unwrap()
    .report;
  assert_eq!(fallback.irradiance.origin, IrradianceOrigin::Manual);
  assert!((fallback.energy.daily_kwh - 1.8315).abs() < TOLERANCE);
}

#[test]
fn repeated_analysis_is_idempotent() {
  let pipeline = pipeline(FakeModel::Boxes(vec![[2.0, 2.0, 12.0, 8.0]]));
  let first = pipeline.analyze(&request()).unwrap().report;
  let second = pipeline.analyze(&request()).unwrap().report;
  assert_eq!(first.detections, second.detections);
  assert_eq!(first.energy, second.energy);
}

#[test]
fn one_shot_writes_json_and_image() {
  let dir = scratch_dir("oneshot");
  let json_path = dir.join("report.json");
  let image_path = dir.join("annotated.png");

  let outputs = vec![
    OutputWrapper::from_url(&Url::parse(&format!("json://{}", json_path.display())).unwrap())
      .unwrap(),
    OutputWrapper::from_url(&Url::parse(&format!("image://{}", image_path.display())).unwrap())
      .unwrap(),
  ];

  OneShotTask
    .run_task(
      std::iter::once(request()),
      pipeline(FakeModel::Boxes(vec![[0.0, 0.0, 10.0, 20.0]])),
      outputs,
    )
    .unwrap();

  let json: serde_json::Value =
    serde_json::from_str(&std::fs::read_to_string(&json_path).unwrap()).unwrap();
  assert_eq!(json["status"], "detected");
  assert_eq!(json["detections"].as_array().unwrap().len(), 1);
  assert!((json["energy"]["daily_kwh"].as_f64().unwrap() - 1.8315).abs() < TOLERANCE);

  let saved = image::open(&image_path).unwrap().to_rgb8();
  assert_eq!(saved.dimensions(), (64, 64));

  std::fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn continuous_task_survives_failed_operations() {
  let dir = scratch_dir("continuous");
  let json_path = dir.join("last.json");
  let json_url = Url::parse(&format!("json://{}", json_path.display())).unwrap();

  let requests = vec![request(), request(), request()];
  let failing = Pipeline::new(
    FakeTile::failing(),
    DetectionAdapter::new(FakeModel::Boxes(Vec::new())),
    "model1",
  );
  ContinuousTask::default()
    .run_task(
      requests.clone().into_iter(),
      failing,
      JsonReportOutput::from_url(&json_url).unwrap(),
    )
    .unwrap();
  assert!(!json_path.exists());

  ContinuousTask::default()
    .with_max_actions(Some(2))
    .run_task(
      requests.into_iter(),
      pipeline(FakeModel::Boxes(vec![[0.0, 0.0, 4.0, 4.0]])),
      JsonReportOutput::from_url(&json_url).unwrap(),
    )
    .unwrap();
  assert!(json_path.exists());

  std::fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn image_file_source_feeds_pipeline() {
  let dir = scratch_dir("image-source");
  let tile_path = dir.join("tile.png");
  RgbImage::from_pixel(32, 32, Rgb([0, 0, 0]))
    .save(&tile_path)
    .unwrap();

  let source =
    InputWrapper::from_url(&Url::parse(&format!("image://{}", tile_path.display())).unwrap())
      .unwrap();
  assert_eq!(source.scale_basis(), None);

  let pipeline = Pipeline::new(
    source,
    DetectionAdapter::new(FakeModel::Boxes(vec![[0.0, 0.0, 10.0, 20.0]])),
    "model2",
  );
  let analysis = pipeline.analyze(&request()).unwrap();
  assert_eq!(analysis.report.model, "model2");
  assert_eq!(analysis.annotated.dimensions(), (32, 32));

  // 标注图像可以直接交给图像输出
  let out = SaveImageFileOutput::new(dir.join("out.png"));
  out.render_result(&analysis.annotated, &analysis.report).unwrap();
  assert!(out.path().exists());

  std::fs::remove_dir_all(&dir).unwrap();
}
