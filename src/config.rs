// 该文件是 Rizhao （日照） 项目的一部分。
// src/config.rs - 命令行参数配置
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

use clap::Args;
use url::Url;

use crate::{
  energy::{
    DEFAULT_IRRADIANCE, DEFAULT_METERS_PER_PIXEL, DetectionConfig, InvalidParameter,
  },
  geo::Coordinate,
  model::ModelVariant,
  task::AnalysisRequest,
};

pub const MIN_ZOOM: u8 = 14;
pub const MAX_ZOOM: u8 = 20;
pub const DEFAULT_ZOOM: u8 = 18;

/// 分析参数，两个可执行程序共用
#[derive(Args, Debug, Clone)]
pub struct AnalysisOptions {
  /// 影像来源
  /// 支持格式:
  /// - Mapbox: mapbox://mapbox/satellite-v9?size=512
  /// - 本地图片: image:///path/to/tile.jpg（可加 ?basis=512）
  #[arg(long, value_name = "SOURCE", default_value = "mapbox://mapbox/satellite-v9?size=512")]
  pub source: Url,

  /// Mapbox 访问令牌
  #[arg(long, env = "MAPBOX_TOKEN", hide_env_values = true, value_name = "TOKEN")]
  pub mapbox_token: Option<String>,

  /// 推理后端
  /// 支持格式:
  /// - 外部程序: command:///usr/local/bin/detect-panels
  /// - RKNPU: rknn:///path/to/best1.rknn（需要 model_rknn 特性）
  #[arg(long, value_name = "MODEL")]
  pub model: Url,

  /// 模型变体 (model1, model2, model3)
  #[arg(long, default_value = "model1", value_name = "VARIANT")]
  pub variant: ModelVariant,

  /// 权重文件目录
  #[arg(long, default_value = "models", value_name = "DIR")]
  pub model_dir: PathBuf,

  /// 缩放级别
  #[arg(long, default_value_t = DEFAULT_ZOOM, value_parser = clap::value_parser!(u8).range(MIN_ZOOM as i64..=MAX_ZOOM as i64))]
  pub zoom: u8,

  /// 面板效率（百分比）
  #[arg(long, default_value_t = 18.5, value_name = "PERCENT")]
  pub panel_efficiency: f64,

  /// 系统损耗（百分比）
  #[arg(long, default_value_t = 10.0, value_name = "PERCENT")]
  pub system_loss: f64,

  /// 地面分辨率（米/像素），默认 0.08
  #[arg(long, value_name = "METERS")]
  pub scale: Option<f64>,

  /// 按缩放级别与纬度推导地面分辨率（需要影像来源提供网格瓦片边长）
  #[arg(long, conflicts_with = "scale")]
  pub derive_scale: bool,

  /// 日均辐照量 (kWh/m²/day)，辐照量服务不可用时也使用该值
  #[arg(long, default_value_t = DEFAULT_IRRADIANCE, value_name = "KWH")]
  pub irradiance: f64,

  /// 从 PVGIS 查询辐照量
  #[arg(long)]
  pub pvgis: bool,

  /// 标签字体文件（TTF/OTF），为空时只绘制边框
  #[arg(long, value_name = "FONT")]
  pub font: Option<PathBuf>,

  /// 输出（可重复）
  /// 支持格式:
  /// - 控制台: console:stdout
  /// - 图片: image:///path/to/annotated.png
  /// - JSON 报告: json:///path/to/report.json
  /// - 目录记录: folder:///path/to/dir?always
  #[arg(long, value_name = "OUTPUT", default_value = "console:stdout")]
  pub output: Vec<Url>,
}

impl AnalysisOptions {
  pub fn detection_config(&self) -> DetectionConfig {
    DetectionConfig {
      panel_efficiency: self.panel_efficiency / 100.0,
      system_loss: self.system_loss / 100.0,
      irradiance_kwh_per_m2_day: self.irradiance,
      meters_per_pixel: self.scale.unwrap_or(DEFAULT_METERS_PER_PIXEL),
    }
  }

  /// 构造某个坐标上的分析请求，参数越界时立即报错
  pub fn request(&self, coordinate: Coordinate) -> Result<AnalysisRequest, InvalidParameter> {
    let config = self.detection_config();
    let request = AnalysisRequest::new(coordinate, self.zoom, config);
    let request = if self.derive_scale {
      request.with_derived_scale()
    } else {
      request
    };
    config.validate()?;
    Ok(request)
  }
}
