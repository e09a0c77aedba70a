// 该文件是 Rizhao （日照） 项目的一部分。
// src/task.rs - 获取并分析任务
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

use std::{fmt::Display, thread, time::Duration};

use image::RgbImage;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::{
  detection::{DetectionAdapter, total_area_m2},
  energy::{DetectionConfig, InvalidParameter},
  geo::{Coordinate, meters_per_pixel},
  input::{ImageSource, InputError},
  irradiance::{IrradianceSource, PvgisIrradiance, resolve_irradiance},
  model::{Model, RawOutput},
  output::Render,
  report::{AnalysisReport, DetectionRow},
};

/// 一次用户操作的参数，显式传入，不依赖任何全局状态
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisRequest {
  pub coordinate: Coordinate,
  pub zoom: u8,
  pub config: DetectionConfig,
  /// 为 `false` 时按缩放级别与纬度推导 `config.meters_per_pixel`
  pub manual_scale: bool,
}

impl AnalysisRequest {
  pub fn new(coordinate: Coordinate, zoom: u8, config: DetectionConfig) -> Self {
    Self {
      coordinate,
      zoom,
      config,
      manual_scale: true,
    }
  }

  pub fn with_derived_scale(mut self) -> Self {
    self.manual_scale = false;
    self
  }

  pub fn at(&self, coordinate: Coordinate) -> Self {
    Self {
      coordinate,
      ..self.clone()
    }
  }
}

#[derive(Error, Debug)]
pub enum AnalysisError {
  #[error(transparent)]
  Input(#[from] InputError),
  #[error(transparent)]
  InvalidParameter(#[from] InvalidParameter),
  #[error("影像来源无法按缩放级别推导地面分辨率，请手动指定")]
  ScaleUnavailable,
}

/// 分析结果：带检测框的图像与报告
#[derive(Debug, Clone)]
pub struct Analysis {
  pub annotated: RgbImage,
  pub report: AnalysisReport,
}

pub trait Analyze {
  fn analyze(&self, request: &AnalysisRequest) -> Result<Analysis, AnalysisError>;
}

/// 影像获取 -> 检测 -> 面积 -> 发电量
pub struct Pipeline<S, M, P = PvgisIrradiance> {
  source: S,
  adapter: DetectionAdapter<M>,
  irradiance: Option<P>,
  model_name: String,
}

impl<S, M> Pipeline<S, M, PvgisIrradiance> {
  pub fn new(source: S, adapter: DetectionAdapter<M>, model_name: impl Into<String>) -> Self {
    Self {
      source,
      adapter,
      irradiance: None,
      model_name: model_name.into(),
    }
  }
}

impl<S, M, P> Pipeline<S, M, P> {
  pub fn with_irradiance_source<Q>(self, irradiance: Option<Q>) -> Pipeline<S, M, Q> {
    Pipeline {
      source: self.source,
      adapter: self.adapter,
      irradiance,
      model_name: self.model_name,
    }
  }
}

impl<S, M, P> Analyze for Pipeline<S, M, P>
where
  S: ImageSource,
  M: Model<Input = RgbImage, Output = RawOutput>,
  M::Error: Display,
  P: IrradianceSource,
{
  fn analyze(&self, request: &AnalysisRequest) -> Result<Analysis, AnalysisError> {
    let mut config = request.config;
    if !request.manual_scale {
      let basis = self
        .source
        .scale_basis()
        .ok_or(AnalysisError::ScaleUnavailable)?;
      config.meters_per_pixel = meters_per_pixel(request.coordinate.latitude(), request.zoom, basis);
      info!("推导地面分辨率: {:.4} m/px", config.meters_per_pixel);
    }
    config.validate()?;

    let image = self.source.fetch(&request.coordinate, request.zoom)?;
    let outcome = self.adapter.detect(&image);

    let total_area_m2 = total_area_m2(&outcome.records, config.meters_per_pixel)?;
    let irradiance = resolve_irradiance(
      self.irradiance.as_ref(),
      &request.coordinate,
      config.irradiance_kwh_per_m2_day,
    );
    let config = config.with_irradiance(irradiance.kwh_per_m2_day);
    let energy = config.estimate(total_area_m2)?;

    info!(
      "总面积 {:.2} m², 日发电量 {:.2} kWh, 年发电量 {:.2} kWh",
      total_area_m2, energy.daily_kwh, energy.yearly_kwh
    );

    let report = AnalysisReport {
      generated_at: chrono::Utc::now().to_rfc3339(),
      coordinate: request.coordinate,
      zoom: request.zoom,
      model: self.model_name.clone(),
      status: outcome.status(),
      diagnostic: outcome.diagnostic.as_ref().map(|d| d.to_string()),
      detections: outcome
        .records
        .iter()
        .map(|r| DetectionRow::from_record(r, config.meters_per_pixel))
        .collect(),
      total_area_m2,
      net_efficiency: config.net_efficiency()?,
      irradiance,
      config,
      energy,
    };

    Ok(Analysis {
      annotated: outcome.annotated,
      report,
    })
  }
}

pub trait Task<I, A, O>: Sized {
  type Error;
  fn run_task(self, input: I, analyzer: A, output: O) -> Result<(), Self::Error>;
}

/// 只处理第一个请求，失败直接返回
pub struct OneShotTask;

impl<I, A, O, RE> Task<I, A, O> for OneShotTask
where
  I: Iterator<Item = AnalysisRequest>,
  A: Analyze,
  O: Render<RgbImage, AnalysisReport, Error = RE>,
  RE: std::error::Error + Sync + Send + 'static,
{
  type Error = anyhow::Error;

  fn run_task(self, mut input: I, analyzer: A, output: O) -> Result<(), Self::Error> {
    info!("开始任务...");
    let request = input.next().ok_or_else(|| anyhow::anyhow!("没有分析请求"))?;
    let now = std::time::Instant::now();
    let analysis = analyzer.analyze(&request)?;
    info!("分析完成，耗时: {:.2?}", now.elapsed());
    output.render_result(&analysis.annotated, &analysis.report)?;
    Ok(())
  }
}

/// 逐个处理请求，单次失败只终止该次操作
#[derive(Default, Debug)]
pub struct ContinuousTask {
  max_actions: Option<usize>,
}

impl ContinuousTask {
  pub fn with_max_actions(mut self, max_actions: Option<usize>) -> Self {
    self.max_actions = max_actions;
    self
  }
}

impl<I, A, O, RE> Task<I, A, O> for ContinuousTask
where
  I: Iterator<Item = AnalysisRequest>,
  A: Analyze,
  O: Render<RgbImage, AnalysisReport, Error = RE>,
  RE: std::error::Error + Sync + Send + 'static,
{
  type Error = anyhow::Error;

  fn run_task(self, input: I, analyzer: A, output: O) -> Result<(), Self::Error> {
    info!("开始任务...");
    let (tx, rx) = std::sync::mpsc::channel();

    let handler = ctrlc::set_handler(move || {
      info!("收到中断信号，当前操作完成后退出...");
      let _ = tx.send(());
      thread::spawn(|| {
        thread::sleep(Duration::from_secs(30));
        warn!("强制退出程序");
        std::process::exit(1);
      });
    });
    if let Err(e) = handler {
      warn!("无法注册中断信号处理: {}", e);
    }

    let mut succeeded = 0usize;
    let mut failed = 0usize;
    for (index, request) in input.enumerate() {
      info!("第 {} 次分析: {}", index + 1, request.coordinate);
      match analyzer.analyze(&request) {
        Ok(analysis) => {
          output.render_result(&analysis.annotated, &analysis.report)?;
          succeeded += 1;
        }
        Err(e) => {
          error!("获取或分析影像失败: {}", e);
          failed += 1;
        }
      }

      if self.max_actions.map(|n| index + 1 >= n).unwrap_or(false) {
        info!("达到指定次数 {}, 退出任务循环", index + 1);
        break;
      }
      if rx.try_recv().is_ok() {
        warn!("中断信号接收，退出任务循环");
        break;
      }
    }

    info!("任务完成: 成功 {} 次, 失败 {} 次", succeeded, failed);
    Ok(())
  }
}
