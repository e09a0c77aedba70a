// 该文件是 Rizhao （日照） 项目的一部分。
// src/bin/rizhao_continueshot.rs - 连续分析程序，从标准输入逐行读取坐标
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

use std::io::BufRead;

use anyhow::Result;
use clap::Parser;
use tracing::{info, warn};

use rizhao::{
  FromUrl,
  config::AnalysisOptions,
  detection::DetectionAdapter,
  geo::Coordinate,
  input::InputWrapper,
  irradiance::PvgisIrradiance,
  model::ModelWrapper,
  output::{OutputWrapper, draw::Draw},
  task::{ContinuousTask, Pipeline, Task},
};

/// Rizhao 连续分析：每行一个 "纬度,经度"
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  #[command(flatten)]
  pub options: AnalysisOptions,

  /// 最多处理的坐标数量
  #[arg(long, value_name = "MAX_ACTIONS")]
  pub max_actions: Option<usize>,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();
  let options = &args.options;

  info!("影像来源: {}", options.source);
  info!("推理后端: {} ({})", options.model, options.variant);

  // 先校验一次参数，坐标之后逐行替换
  let template = options.request(Coordinate::default())?;

  let source = InputWrapper::from_url(&options.source)?.with_access_token(options.mapbox_token.clone());
  let model = ModelWrapper::open(&options.model, options.variant, &options.model_dir)?;
  let draw = match &options.font {
    Some(font) => Draw::default().with_font_file(font)?,
    None => Draw::default(),
  };
  let irradiance = if options.pvgis {
    Some(PvgisIrradiance::new()?)
  } else {
    None
  };
  let pipeline = Pipeline::new(
    source,
    DetectionAdapter::new(model).with_draw(draw),
    options.variant.name(),
  )
  .with_irradiance_source(irradiance);

  let outputs = options
    .output
    .iter()
    .map(OutputWrapper::from_url)
    .collect::<Result<Vec<_>, _>>()?;

  let requests = std::io::stdin()
    .lock()
    .lines()
    .map_while(|line| match line {
      Ok(line) => Some(line),
      Err(e) => {
        warn!("读取标准输入失败: {}", e);
        None
      }
    })
    .filter(|line| !line.trim().is_empty())
    .filter_map(|line| match line.parse::<Coordinate>() {
      Ok(coordinate) => Some(template.at(coordinate)),
      Err(e) => {
        warn!("跳过无效坐标 '{}': {}", line.trim(), e);
        None
      }
    });

  ContinuousTask::default()
    .with_max_actions(args.max_actions)
    .run_task(requests, pipeline, outputs)?;

  Ok(())
}
