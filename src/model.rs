// 该文件是 Rizhao （日照） 项目的一部分。
// src/model.rs - 模型
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
  fmt,
  path::{Path, PathBuf},
  str::FromStr,
};

use image::RgbImage;
use serde::Deserialize;
use thiserror::Error;
use tracing::info;
use url::Url;

use crate::{FromUrl, FromUrlWithScheme};

/// 检测模型，视为黑盒：图像 -> 原始检测结果
pub trait Model {
  type Input;
  type Output;
  type Error;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error>;
}

/// 原始检测框，字段名与 `x1/y1/x2/y2` 风格的输出一致
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RawBox {
  pub x1: Option<f64>,
  pub y1: Option<f64>,
  pub x2: Option<f64>,
  pub y2: Option<f64>,
}

/// 模型原始输出中的一条检测
///
/// 不同模型的输出格式略有差异：几何信息可能在嵌套的 `box` 中，
/// 也可能是平铺的 `xmin/ymin/xmax/ymax`。所有字段都是可选的，
/// 由检测适配器负责校验与归一化。
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RawDetection {
  pub name: Option<String>,
  pub class: Option<u32>,
  pub confidence: Option<f64>,
  #[serde(rename = "box")]
  pub bbox: Option<RawBox>,
  pub xmin: Option<f64>,
  pub ymin: Option<f64>,
  pub xmax: Option<f64>,
  pub ymax: Option<f64>,
}

impl RawDetection {
  /// 由类型化的后端构造，bbox 为像素坐标 [x_min, y_min, x_max, y_max]
  pub fn new(name: impl Into<String>, confidence: f64, bbox: [f64; 4]) -> Self {
    Self {
      name: Some(name.into()),
      confidence: Some(confidence),
      xmin: Some(bbox[0]),
      ymin: Some(bbox[1]),
      xmax: Some(bbox[2]),
      ymax: Some(bbox[3]),
      ..Default::default()
    }
  }
}

pub type RawOutput = Vec<RawDetection>;

/// 预训练模型变体，每个变体对应本地的一份权重文件
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ModelVariant {
  #[default]
  Model1,
  Model2,
  Model3,
}

impl ModelVariant {
  pub const ALL: [ModelVariant; 3] = [
    ModelVariant::Model1,
    ModelVariant::Model2,
    ModelVariant::Model3,
  ];

  pub fn index(&self) -> u8 {
    match self {
      ModelVariant::Model1 => 1,
      ModelVariant::Model2 => 2,
      ModelVariant::Model3 => 3,
    }
  }

  pub fn name(&self) -> &'static str {
    match self {
      ModelVariant::Model1 => "model1",
      ModelVariant::Model2 => "model2",
      ModelVariant::Model3 => "model3",
    }
  }

  /// 权重文件路径，例如 `models/best2.pt`
  pub fn weights_path(&self, model_dir: &Path, extension: &str) -> PathBuf {
    model_dir.join(format!("best{}.{}", self.index(), extension))
  }
}

impl fmt::Display for ModelVariant {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.name())
  }
}

impl FromStr for ModelVariant {
  type Err = ModelError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let lower = s.trim().to_ascii_lowercase();
    ModelVariant::ALL
      .into_iter()
      .find(|v| v.name() == lower)
      .ok_or_else(|| ModelError::UnknownVariant(s.to_string()))
  }
}

#[derive(Error, Debug)]
pub enum ModelError {
  #[error("未知的模型变体: {0}，可选值为 model1, model2, model3")]
  UnknownVariant(String),
  #[error("权重文件不存在: {0}")]
  WeightsNotFound(PathBuf),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
  #[error("外部命令模型错误: {0}")]
  Command(#[from] CommandModelError),
  #[cfg(feature = "model_rknn")]
  #[error("RKNN 模型错误: {0}")]
  Rknn(#[from] RknnYoloError),
}

mod command;
pub use self::command::{CommandModel, CommandModelBuilder, CommandModelError};

#[cfg(feature = "model_rknn")]
mod rknn_yolo;
#[cfg(feature = "model_rknn")]
pub use self::rknn_yolo::{RknnYolo, RknnYoloBuilder, RknnYoloError};

/// 根据 URI 方案选择的模型后端
pub enum ModelWrapper {
  Command(CommandModel),
  #[cfg(feature = "model_rknn")]
  Rknn(RknnYolo),
}

impl ModelWrapper {
  /// 打开模型后端，并按变体定位权重文件
  ///
  /// 支持的方案:
  /// - `command:///usr/local/bin/detect?ext=pt`
  /// - `rknn:///opt/models/best1.rknn`（需要 `model_rknn` 特性，路径为空时按变体查找）
  pub fn open(url: &Url, variant: ModelVariant, model_dir: &Path) -> Result<Self, ModelError> {
    info!("打开模型后端 {}，变体 {}", url.scheme(), variant);
    match url.scheme() {
      CommandModelBuilder::SCHEME => {
        let builder = CommandModelBuilder::from_url(url)?;
        let weights = variant.weights_path(model_dir, builder.extension());
        Ok(ModelWrapper::Command(builder.weights(weights).build()?))
      }
      #[cfg(feature = "model_rknn")]
      RknnYoloBuilder::SCHEME => {
        let mut builder = RknnYoloBuilder::from_url(url)?;
        if builder.model_path().as_os_str().is_empty() {
          builder = builder.model_path_from(variant.weights_path(model_dir, "rknn"));
        }
        Ok(ModelWrapper::Rknn(builder.build()?))
      }
      other => Err(ModelError::SchemeMismatch(other.to_string())),
    }
  }
}

impl Model for ModelWrapper {
  type Input = RgbImage;
  type Output = RawOutput;
  type Error = ModelError;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    match self {
      ModelWrapper::Command(model) => model.infer(input).map_err(ModelError::from),
      #[cfg(feature = "model_rknn")]
      ModelWrapper::Rknn(model) => model.infer(input).map_err(ModelError::from),
    }
  }
}
