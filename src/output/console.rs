// 该文件是 Rizhao （日照） 项目的一部分。
// src/output/console.rs - 控制台输出
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

use std::io::Write;

use image::RgbImage;
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, output::Render, report::AnalysisReport};

/// 把报告以表格形式打印到标准输出，`console:stdout`
pub struct ConsoleOutput;

impl FromUrlWithScheme for ConsoleOutput {
  const SCHEME: &'static str = "console";
}

impl FromUrl for ConsoleOutput {
  type Error = std::io::Error;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(std::io::Error::new(
        std::io::ErrorKind::InvalidInput,
        format!("期望输出方式 '{}', 实际 '{}'", Self::SCHEME, url.scheme()),
      ));
    }
    Ok(ConsoleOutput)
  }
}

impl Render<RgbImage, AnalysisReport> for ConsoleOutput {
  type Error = std::io::Error;

  fn render_result(&self, _frame: &RgbImage, result: &AnalysisReport) -> Result<(), Self::Error> {
    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "{}", result)?;
    writeln!(stdout)?;
    stdout.flush()
  }
}
