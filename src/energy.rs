// 该文件是 Rizhao （日照） 项目的一部分。
// src/energy.rs - 发电量估算
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

use serde::Serialize;
use thiserror::Error;

pub const DAYS_PER_YEAR: f64 = 365.0;

pub const DEFAULT_PANEL_EFFICIENCY: f64 = 0.185;
pub const DEFAULT_SYSTEM_LOSS: f64 = 0.10;
pub const DEFAULT_IRRADIANCE: f64 = 5.5;
pub const DEFAULT_METERS_PER_PIXEL: f64 = 0.08;

/// 参数超出约定范围
///
/// 这是调用方的编程错误，不做截断，直接返回给调用方。
#[derive(Error, Debug, Clone, PartialEq)]
#[error("参数 {name} 无效: {value}, 期望范围 {expected}")]
pub struct InvalidParameter {
  pub name: &'static str,
  pub value: f64,
  pub expected: &'static str,
}

impl InvalidParameter {
  pub fn new(name: &'static str, value: f64, expected: &'static str) -> Self {
    Self {
      name,
      value,
      expected,
    }
  }
}

pub(crate) fn check_panel_efficiency(value: f64) -> Result<f64, InvalidParameter> {
  if value.is_finite() && value > 0.0 && value <= 1.0 {
    Ok(value)
  } else {
    Err(InvalidParameter::new("panel_efficiency", value, "(0, 1]"))
  }
}

pub(crate) fn check_system_loss(value: f64) -> Result<f64, InvalidParameter> {
  if value.is_finite() && (0.0..1.0).contains(&value) {
    Ok(value)
  } else {
    Err(InvalidParameter::new("system_loss", value, "[0, 1)"))
  }
}

pub(crate) fn check_irradiance(value: f64) -> Result<f64, InvalidParameter> {
  if value.is_finite() && value > 0.0 {
    Ok(value)
  } else {
    Err(InvalidParameter::new(
      "irradiance_kwh_per_m2_day",
      value,
      "(0, +inf)",
    ))
  }
}

pub(crate) fn check_meters_per_pixel(value: f64) -> Result<f64, InvalidParameter> {
  if value.is_finite() && value > 0.0 {
    Ok(value)
  } else {
    Err(InvalidParameter::new("meters_per_pixel", value, "(0, +inf)"))
  }
}

pub(crate) fn check_area(value: f64) -> Result<f64, InvalidParameter> {
  if value.is_finite() && value >= 0.0 {
    Ok(value)
  } else {
    Err(InvalidParameter::new("total_area_m2", value, "[0, +inf)"))
  }
}

/// 单次分析所需的估算参数，每次调用由调用方传入
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DetectionConfig {
  /// 面板效率 (0, 1]
  pub panel_efficiency: f64,
  /// 系统损耗 [0, 1)
  pub system_loss: f64,
  /// 日均辐照量 kWh/m²/day
  pub irradiance_kwh_per_m2_day: f64,
  /// 地面分辨率 m/px
  pub meters_per_pixel: f64,
}

impl Default for DetectionConfig {
  fn default() -> Self {
    Self {
      panel_efficiency: DEFAULT_PANEL_EFFICIENCY,
      system_loss: DEFAULT_SYSTEM_LOSS,
      irradiance_kwh_per_m2_day: DEFAULT_IRRADIANCE,
      meters_per_pixel: DEFAULT_METERS_PER_PIXEL,
    }
  }
}

impl DetectionConfig {
  pub fn validate(&self) -> Result<(), InvalidParameter> {
    check_panel_efficiency(self.panel_efficiency)?;
    check_system_loss(self.system_loss)?;
    check_irradiance(self.irradiance_kwh_per_m2_day)?;
    check_meters_per_pixel(self.meters_per_pixel)?;
    Ok(())
  }

  pub fn with_irradiance(mut self, irradiance_kwh_per_m2_day: f64) -> Self {
    self.irradiance_kwh_per_m2_day = irradiance_kwh_per_m2_day;
    self
  }

  pub fn with_meters_per_pixel(mut self, meters_per_pixel: f64) -> Self {
    self.meters_per_pixel = meters_per_pixel;
    self
  }

  pub fn net_efficiency(&self) -> Result<f64, InvalidParameter> {
    net_efficiency(self.panel_efficiency, self.system_loss)
  }

  pub fn estimate(&self, total_area_m2: f64) -> Result<EnergyEstimate, InvalidParameter> {
    estimate(
      total_area_m2,
      self.irradiance_kwh_per_m2_day,
      self.panel_efficiency,
      self.system_loss,
    )
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EnergyEstimate {
  pub daily_kwh: f64,
  pub yearly_kwh: f64,
}

/// 扣除系统损耗后的净效率
pub fn net_efficiency(panel_efficiency: f64, system_loss: f64) -> Result<f64, InvalidParameter> {
  let panel_efficiency = check_panel_efficiency(panel_efficiency)?;
  let system_loss = check_system_loss(system_loss)?;
  Ok(panel_efficiency * (1.0 - system_loss))
}

/// 根据面板面积估算日发电量与年发电量
///
/// ```text
/// net_efficiency = panel_efficiency × (1 − system_loss)
/// daily_kwh      = total_area_m2 × irradiance × net_efficiency
/// yearly_kwh     = daily_kwh × 365
/// ```
///
/// 参数越界时返回 [`InvalidParameter`]，不会截断到合法范围。
pub fn estimate(
  total_area_m2: f64,
  irradiance_kwh_per_m2_day: f64,
  panel_efficiency: f64,
  system_loss: f64,
) -> Result<EnergyEstimate, InvalidParameter> {
  let area = check_area(total_area_m2)?;
  let irradiance = check_irradiance(irradiance_kwh_per_m2_day)?;
  let net_efficiency = net_efficiency(panel_efficiency, system_loss)?;

  let daily_kwh = area * irradiance * net_efficiency;
  let yearly_kwh = daily_kwh * DAYS_PER_YEAR;

  Ok(EnergyEstimate {
    daily_kwh,
    yearly_kwh,
  })
}
