// 该文件是 Rizhao （日照） 项目的一部分。
// src/geo.rs - 坐标与地面分辨率
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

use std::{fmt, str::FromStr};

use serde::Serialize;
use thiserror::Error;

use crate::energy::InvalidParameter;

/// WGS84 赤道周长（米）
const EARTH_CIRCUMFERENCE_M: f64 = 40_075_016.686;

pub const DEFAULT_LATITUDE: f64 = 36.45028;
pub const DEFAULT_LONGITUDE: f64 = 10.73389;

/// 经纬度坐标（度）
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Coordinate {
  latitude: f64,
  longitude: f64,
}

impl Coordinate {
  pub fn new(latitude: f64, longitude: f64) -> Result<Self, InvalidParameter> {
    if !(latitude.is_finite() && (-90.0..=90.0).contains(&latitude)) {
      return Err(InvalidParameter::new("latitude", latitude, "[-90, 90]"));
    }
    if !(longitude.is_finite() && (-180.0..=180.0).contains(&longitude)) {
      return Err(InvalidParameter::new("longitude", longitude, "[-180, 180]"));
    }
    Ok(Self {
      latitude,
      longitude,
    })
  }

  pub fn latitude(&self) -> f64 {
    self.latitude
  }

  pub fn longitude(&self) -> f64 {
    self.longitude
  }
}

impl Default for Coordinate {
  fn default() -> Self {
    Self {
      latitude: DEFAULT_LATITUDE,
      longitude: DEFAULT_LONGITUDE,
    }
  }
}

impl fmt::Display for Coordinate {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{:.5}, {:.5}", self.latitude, self.longitude)
  }
}

#[derive(Error, Debug)]
pub enum CoordinateParseError {
  #[error("坐标格式错误，应为 \"纬度,经度\": {0}")]
  Format(String),
  #[error("无法解析数值 {0}: {1}")]
  Number(String, std::num::ParseFloatError),
  #[error(transparent)]
  OutOfRange(#[from] InvalidParameter),
}

impl FromStr for Coordinate {
  type Err = CoordinateParseError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let (lat, lon) = s
      .split_once(',')
      .ok_or_else(|| CoordinateParseError::Format(s.to_string()))?;
    let parse = |v: &str| {
      let v = v.trim();
      v.parse::<f64>()
        .map_err(|e| CoordinateParseError::Number(v.to_string(), e))
    };
    Ok(Coordinate::new(parse(lat)?, parse(lon)?)?)
  }
}

/// Web 墨卡托投影下的地面分辨率（米/像素）
///
/// `grid_tile_size` 为世界网格的瓦片边长，与请求的图像尺寸无关，
/// Mapbox 使用 512。
pub fn meters_per_pixel(latitude: f64, zoom: u8, grid_tile_size: u32) -> f64 {
  EARTH_CIRCUMFERENCE_M * latitude.to_radians().cos()
    / (grid_tile_size as f64 * 2f64.powi(zoom as i32))
}
