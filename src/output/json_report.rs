// 该文件是 Rizhao （日照） 项目的一部分。
// src/output/json_report.rs - JSON 报告输出
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
  fs::File,
  io::{BufWriter, Write},
  path::{Path, PathBuf},
};

use image::RgbImage;
use thiserror::Error;
use tracing::info;
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, output::Render, report::AnalysisReport};

#[derive(Error, Debug)]
pub enum JsonReportError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("序列化错误: {0}")]
  SerializeError(#[from] serde_json::Error),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

/// 把报告写成 JSON 文件，`json:///path/report.json`
pub struct JsonReportOutput {
  path: PathBuf,
}

impl FromUrlWithScheme for JsonReportOutput {
  const SCHEME: &'static str = "json";
}

impl FromUrl for JsonReportOutput {
  type Error = JsonReportError;

  fn from_url(uri: &Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(JsonReportError::SchemeMismatch(uri.scheme().to_string()));
    }
    Ok(JsonReportOutput {
      path: PathBuf::from(uri.path()),
    })
  }
}

pub(crate) fn write_report(path: &Path, report: &AnalysisReport) -> Result<(), JsonReportError> {
  if let Some(parent) = path.parent()
    && !parent.as_os_str().is_empty()
  {
    std::fs::create_dir_all(parent)?;
  }
  let mut writer = BufWriter::new(File::create(path)?);
  serde_json::to_writer_pretty(&mut writer, report)?;
  writer.flush()?;
  info!("保存报告到文件: {}", path.display());
  Ok(())
}

impl Render<RgbImage, AnalysisReport> for JsonReportOutput {
  type Error = JsonReportError;

  fn render_result(&self, _frame: &RgbImage, result: &AnalysisReport) -> Result<(), Self::Error> {
    write_report(&self.path, result)
  }
}
