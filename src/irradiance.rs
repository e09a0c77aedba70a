// 该文件是 Rizhao （日照） 项目的一部分。
// src/irradiance.rs - 辐照量来源
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

use std::{fmt::Display, time::Duration};

use reqwest::blocking::Client;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

use crate::{energy::DAYS_PER_YEAR, geo::Coordinate, input::FetchError};

const PVGIS_ENDPOINT: &str = "https://re.jrc.ec.europa.eu/api/v5_2/PVcalc";
const PVGIS_ANNUAL_YIELD_POINTER: &str = "/outputs/totals/fixed/E_y";
const PVGIS_PEAK_POWER_KW: f64 = 1.0;
// 系统损耗由 `DetectionConfig::system_loss` 扣除，查询时不计损耗
const PVGIS_SYSTEM_LOSS_PERCENT: f64 = 0.0;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);

/// 按坐标查询日均辐照量 (kWh/m²/day)
pub trait IrradianceSource {
  type Error: Display;

  fn daily_irradiance(&self, coordinate: &Coordinate) -> Result<f64, Self::Error>;
}

#[derive(Error, Debug)]
pub enum IrradianceError {
  #[error(transparent)]
  Fetch(#[from] FetchError),
  #[error("响应不是合法 JSON: {0}")]
  Json(#[from] serde_json::Error),
  #[error("响应缺少字段 {0}")]
  MissingField(&'static str),
  #[error("年发电量不是正数: {0}")]
  NonPositive(f64),
  #[error("无效的地址: {0}")]
  InvalidUrl(#[from] url::ParseError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IrradianceOrigin {
  Manual,
  Provider,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct IrradianceReading {
  pub kwh_per_m2_day: f64,
  pub origin: IrradianceOrigin,
}

impl IrradianceReading {
  pub fn manual(kwh_per_m2_day: f64) -> Self {
    Self {
      kwh_per_m2_day,
      origin: IrradianceOrigin::Manual,
    }
  }
}

/// 优先使用辐照量服务，任何失败都回退到手动值
pub fn resolve_irradiance<S: IrradianceSource>(
  source: Option<&S>,
  coordinate: &Coordinate,
  manual: f64,
) -> IrradianceReading {
  let Some(source) = source else {
    return IrradianceReading::manual(manual);
  };
  match source.daily_irradiance(coordinate) {
    Ok(value) => {
      info!("辐照量服务返回 {:.3} kWh/m²/day", value);
      IrradianceReading {
        kwh_per_m2_day: value,
        origin: IrradianceOrigin::Provider,
      }
    }
    Err(e) => {
      warn!("辐照量查询失败，使用手动值 {}: {}", manual, e);
      IrradianceReading::manual(manual)
    }
  }
}

/// 从 PVGIS PVcalc 响应中取出年发电量并折算为日均值
pub fn parse_pvgis_daily(body: &str) -> Result<f64, IrradianceError> {
  let value: serde_json::Value = serde_json::from_str(body)?;
  let annual = value
    .pointer(PVGIS_ANNUAL_YIELD_POINTER)
    .and_then(|v| v.as_f64())
    .ok_or(IrradianceError::MissingField("outputs.totals.fixed.E_y"))?;
  if !(annual.is_finite() && annual > 0.0) {
    return Err(IrradianceError::NonPositive(annual));
  }
  Ok(annual / DAYS_PER_YEAR)
}

/// 欧盟 JRC PVGIS 服务
pub struct PvgisIrradiance {
  client: Client,
  endpoint: Url,
}

impl PvgisIrradiance {
  pub fn new() -> Result<Self, IrradianceError> {
    Self::with_endpoint(Url::parse(PVGIS_ENDPOINT)?)
  }

  pub fn with_endpoint(endpoint: Url) -> Result<Self, IrradianceError> {
    let client = Client::builder()
      .timeout(REQUEST_TIMEOUT)
      .build()
      .map_err(FetchError::from)?;
    Ok(Self { client, endpoint })
  }

  pub fn request_url(&self, coordinate: &Coordinate) -> Url {
    let mut url = self.endpoint.clone();
    url
      .query_pairs_mut()
      .append_pair("lat", &coordinate.latitude().to_string())
      .append_pair("lon", &coordinate.longitude().to_string())
      .append_pair("peakpower", &PVGIS_PEAK_POWER_KW.to_string())
      .append_pair("loss", &PVGIS_SYSTEM_LOSS_PERCENT.to_string())
      .append_pair("outputformat", "json");
    url
  }
}

impl IrradianceSource for PvgisIrradiance {
  type Error = IrradianceError;

  fn daily_irradiance(&self, coordinate: &Coordinate) -> Result<f64, Self::Error> {
    let url = self.request_url(coordinate);
    debug!("查询辐照量: {}", url);

    let response = self
      .client
      .get(url.clone())
      .send()
      .map_err(FetchError::from)?;
    let status = response.status();
    if !status.is_success() {
      return Err(
        FetchError::Status {
          status: status.as_u16(),
          url: url.to_string(),
        }
        .into(),
      );
    }
    let body = response.text().map_err(FetchError::from)?;
    parse_pvgis_daily(&body)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::utils::testing::serve_once;

  struct Fixed(Result<f64, String>);

  impl IrradianceSource for Fixed {
    type Error = String;

    fn daily_irradiance(&self, _coordinate: &Coordinate) -> Result<f64, Self::Error> {
      self.0.clone()
    }
  }

  #[test]
  fn parse_annual_yield() {
    let body = r#"{"inputs":{},"outputs":{"totals":{"fixed":{"E_d":4.5,"E_y":1825.0}}}}"#;
    assert_eq!(parse_pvgis_daily(body).unwrap(), 5.0);
  }

  #[test]
  fn parse_failures() {
    assert!(matches!(
      parse_pvgis_daily("not json"),
      Err(IrradianceError::Json(_))
    ));
    assert!(matches!(
      parse_pvgis_daily(r#"{"outputs":{"totals":{}}}"#),
      Err(IrradianceError::MissingField(_))
    ));
    assert!(matches!(
      parse_pvgis_daily(r#"{"outputs":{"totals":{"fixed":{"E_y":0}}}}"#),
      Err(IrradianceError::NonPositive(_))
    ));
  }

  #[test]
  fn falls_back_to_manual_value() {
    let coordinate = Coordinate::default();

    let reading = resolve_irradiance(Some(&Fixed(Err("timeout".into()))), &coordinate, 5.5);
    assert_eq!(reading, IrradianceReading::manual(5.5));

    let reading = resolve_irradiance(Some(&Fixed(Ok(4.2))), &coordinate, 5.5);
    assert_eq!(reading.kwh_per_m2_day, 4.2);
    assert_eq!(reading.origin, IrradianceOrigin::Provider);

    let reading = resolve_irradiance::<Fixed>(None, &coordinate, 5.5);
    assert_eq!(reading.origin, IrradianceOrigin::Manual);
  }

  #[test]
  fn pvgis_request_url() {
    let pvgis = PvgisIrradiance::new().unwrap();
    let url = pvgis.request_url(&Coordinate::new(36.5, 10.75).unwrap());
    assert_eq!(
      url.as_str(),
      "https://re.jrc.ec.europa.eu/api/v5_2/PVcalc?lat=36.5&lon=10.75&peakpower=1&loss=0&outputformat=json"
    );
  }

  #[test]
  fn pvgis_server_error_falls_back() {
    let (base, server) = serve_once("500 Internal Server Error", "text/plain", b"busy".to_vec());
    let pvgis = PvgisIrradiance::with_endpoint(base.join("api/v5_2/PVcalc").unwrap()).unwrap();
    let coordinate = Coordinate::default();

    assert!(matches!(
      pvgis.daily_irradiance(&coordinate),
      Err(IrradianceError::Fetch(FetchError::Status { status: 500, .. }))
    ));
    server.join().unwrap();

    let (base, server) = serve_once("500 Internal Server Error", "text/plain", b"busy".to_vec());
    let pvgis = PvgisIrradiance::with_endpoint(base.join("api/v5_2/PVcalc").unwrap()).unwrap();
    let reading = resolve_irradiance(Some(&pvgis), &coordinate, 5.5);
    assert_eq!(reading, IrradianceReading::manual(5.5));
    server.join().unwrap();
  }

  #[test]
  fn pvgis_yield_is_requested_without_loss() {
    let body = br#"{"outputs":{"totals":{"fixed":{"E_y":1825.0}}}}"#.to_vec();
    let (base, server) = serve_once("200 OK", "application/json", body);
    let pvgis = PvgisIrradiance::with_endpoint(base.join("api/v5_2/PVcalc").unwrap()).unwrap();

    let reading = resolve_irradiance(Some(&pvgis), &Coordinate::default(), 5.5);
    assert_eq!(reading.origin, IrradianceOrigin::Provider);
    assert_eq!(reading.kwh_per_m2_day, 5.0);

    let request = server.join().unwrap();
    assert!(request.starts_with("GET /api/v5_2/PVcalc?"));
    assert!(request.contains("loss=0&"));
  }
}
