// 该文件是 Rizhao （日照） 项目的一部分。
// src/output/directory_record.rs - 目录记录输出
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
  path::PathBuf,
  sync::atomic::{AtomicU16, Ordering},
};

use chrono::{DateTime, Datelike, Utc};
use image::RgbImage;
use thiserror::Error;

use crate::{
  FromUrl, FromUrlWithScheme,
  detection::DetectionStatus,
  output::{
    Render,
    json_report::{JsonReportError, write_report},
    save_image_file::{SaveImageFileError, save_image},
  },
  report::AnalysisReport,
};

#[derive(Error, Debug)]
pub enum DirectoryRecordOutputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("图像错误: {0}")]
  ImageError(#[from] SaveImageFileError),
  #[error("报告错误: {0}")]
  ReportError(#[from] JsonReportError),
}

/// 按日期归档每次分析的标注图像与 JSON 报告
///
/// `folder:///data/rizhao` 只记录检测到光伏板的分析，
/// 加上 `?always` 后记录全部分析。
pub struct DirectoryRecordOutput {
  directory: PathBuf,
  record_counter: AtomicU16,
  always: bool,
}

impl FromUrlWithScheme for DirectoryRecordOutput {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn from_url(uri: &url::Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(DirectoryRecordOutputError::SchemeMismatch);
    }

    let always = uri.query_pairs().any(|(k, _)| k == "always");

    Ok(DirectoryRecordOutput {
      directory: PathBuf::from(uri.path()),
      record_counter: AtomicU16::new(0),
      always,
    })
  }
}

impl DirectoryRecordOutput {
  fn record_id(&self) -> u16 {
    self.record_counter.fetch_add(1, Ordering::Relaxed).wrapping_add(1)
  }

  /// 不含扩展名的记录路径，例如 `2026/10/18/14-03-59-0001`
  fn record_stem(&self, now: DateTime<Utc>) -> PathBuf {
    self
      .directory
      .join(now.year().to_string())
      .join(format!("{:02}", now.month()))
      .join(format!("{:02}", now.day()))
      .join(format!("{}-{:04X}", now.format("%H-%M-%S"), self.record_id()))
  }
}

impl Render<RgbImage, AnalysisReport> for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn render_result(&self, frame: &RgbImage, result: &AnalysisReport) -> Result<(), Self::Error> {
    if !self.always && result.status != DetectionStatus::Detected {
      return Ok(());
    }
    let stem = self.record_stem(Utc::now());
    save_image(&stem.with_extension("png"), frame)?;
    write_report(&stem.with_extension("json"), result)?;
    Ok(())
  }
}
