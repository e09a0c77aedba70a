// 该文件是 Rizhao （日照） 项目的一部分。
// src/report.rs - 分析报告
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

use std::fmt;

use serde::Serialize;

use crate::{
  detection::{DetectionRecord, DetectionStatus},
  energy::{DetectionConfig, EnergyEstimate},
  geo::Coordinate,
  irradiance::{IrradianceOrigin, IrradianceReading},
};

/// 检测表中的一行
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectionRow {
  pub label: String,
  pub confidence: f64,
  pub bbox: [f64; 4],
  pub area_px: f64,
  pub area_m2: f64,
}

impl DetectionRow {
  pub fn from_record(record: &DetectionRecord, meters_per_pixel: f64) -> Self {
    Self {
      label: record.label().to_string(),
      confidence: record.confidence(),
      bbox: record.bbox(),
      area_px: record.area_px(),
      area_m2: record.area_m2(meters_per_pixel),
    }
  }
}

/// 一次“获取并分析”的完整结果，仅用于展示
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisReport {
  pub generated_at: String,
  pub coordinate: Coordinate,
  pub zoom: u8,
  pub model: String,
  pub status: DetectionStatus,
  pub diagnostic: Option<String>,
  pub detections: Vec<DetectionRow>,
  pub total_area_m2: f64,
  pub config: DetectionConfig,
  pub net_efficiency: f64,
  pub irradiance: IrradianceReading,
  pub energy: EnergyEstimate,
}

impl fmt::Display for AnalysisReport {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    writeln!(
      f,
      "坐标: {} (zoom {}, 模型 {})",
      self.coordinate, self.zoom, self.model
    )?;

    match self.status {
      DetectionStatus::Detected => {
        writeln!(
          f,
          "{:>3}  {:<16} {:>8} {:>12} {:>12}",
          "#", "标签", "置信度", "像素面积", "面积(m²)"
        )?;
        for (i, row) in self.detections.iter().enumerate() {
          writeln!(
            f,
            "{:>3}  {:<16} {:>8.3} {:>12.1} {:>12.3}",
            i + 1,
            row.label,
            row.confidence,
            row.area_px,
            row.area_m2
          )?;
        }
      }
      DetectionStatus::NoDetections => writeln!(f, "未检测到光伏板")?,
      DetectionStatus::Failed => writeln!(
        f,
        "检测失败: {}",
        self.diagnostic.as_deref().unwrap_or("未知原因")
      )?,
    }

    let origin = match self.irradiance.origin {
      IrradianceOrigin::Manual => "手动",
      IrradianceOrigin::Provider => "PVGIS",
    };
    writeln!(f, "总面积: {:.2} m²", self.total_area_m2)?;
    writeln!(
      f,
      "净效率: {:.4} (面板效率 {:.1}%, 系统损耗 {:.1}%)",
      self.net_efficiency,
      self.config.panel_efficiency * 100.0,
      self.config.system_loss * 100.0
    )?;
    writeln!(
      f,
      "辐照量: {:.2} kWh/m²/day ({})",
      self.irradiance.kwh_per_m2_day, origin
    )?;
    writeln!(f, "预计日发电量: {:.2} kWh", self.energy.daily_kwh)?;
    write!(f, "预计年发电量: {:.2} kWh", self.energy.yearly_kwh)
  }
}
