// 该文件是 Rizhao （日照） 项目的一部分。
// src/model/command.rs - 外部命令推理后端
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
  path::{Path, PathBuf},
  process::Command,
  sync::atomic::{AtomicU32, Ordering},
};

use image::RgbImage;
use thiserror::Error;
use tracing::{debug, error, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  model::{Model, ModelError, RawOutput},
};

const DEFAULT_WEIGHTS_EXTENSION: &str = "pt";

static REQUEST_COUNTER: AtomicU32 = AtomicU32::new(0);

#[derive(Error, Debug)]
pub enum CommandModelError {
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
  #[error("未指定推理程序路径")]
  MissingProgram,
  #[error("未指定权重文件")]
  MissingWeights,
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("临时图像保存失败: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("推理程序退出码 {code:?}: {stderr}")]
  ExitStatus { code: Option<i32>, stderr: String },
  #[error("推理输出无法解析: {0}")]
  OutputError(#[from] serde_json::Error),
}

/// 调用外部推理程序的模型
///
/// 程序以 `<program> [args...] --weights <权重文件> --image <图像文件>` 的形式调用，
/// 并在标准输出上打印 JSON 数组，每个元素为一条原始检测。
#[derive(Debug)]
pub struct CommandModel {
  program: PathBuf,
  args: Vec<String>,
  weights: PathBuf,
}

#[derive(Debug)]
pub struct CommandModelBuilder {
  program: PathBuf,
  args: Vec<String>,
  extension: String,
  weights: Option<PathBuf>,
}

impl FromUrlWithScheme for CommandModelBuilder {
  const SCHEME: &'static str = "command";
}

impl FromUrl for CommandModelBuilder {
  type Error = CommandModelError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(CommandModelError::SchemeMismatch(format!(
        "期望 '{}', 实际 '{}'",
        Self::SCHEME,
        url.scheme()
      )));
    }

    let program = PathBuf::from(url.path());
    if program.as_os_str().is_empty() {
      return Err(CommandModelError::MissingProgram);
    }

    let mut args = Vec::new();
    let mut extension = DEFAULT_WEIGHTS_EXTENSION.to_string();
    let mut weights = None;
    for (k, v) in url.query_pairs() {
      match k.as_ref() {
        "arg" => args.push(v.into_owned()),
        "ext" => extension = v.into_owned(),
        "weights" => weights = Some(PathBuf::from(v.as_ref())),
        _ => debug!("忽略未知参数 {}={}", k, v),
      }
    }

    Ok(CommandModelBuilder {
      program,
      args,
      extension,
      weights,
    })
  }
}

impl CommandModelBuilder {
  pub fn extension(&self) -> &str {
    &self.extension
  }

  /// 设置权重文件，URI 中显式给出的 `weights` 优先
  pub fn weights(mut self, weights: PathBuf) -> Self {
    if self.weights.is_none() {
      self.weights = Some(weights);
    }
    self
  }

  pub fn build(self) -> Result<CommandModel, ModelError> {
    let weights = self
      .weights
      .ok_or(CommandModelError::MissingWeights)?;
    if !weights.exists() {
      error!("权重文件不存在: {}", weights.display());
      return Err(ModelError::WeightsNotFound(weights));
    }

    info!(
      "使用外部推理程序 {}，权重 {}",
      self.program.display(),
      weights.display()
    );

    Ok(CommandModel {
      program: self.program,
      args: self.args,
      weights,
    })
  }
}

impl CommandModel {
  pub fn weights(&self) -> &Path {
    &self.weights
  }

  fn scratch_path() -> PathBuf {
    let id = REQUEST_COUNTER.fetch_add(1, Ordering::Relaxed);
    std::env::temp_dir().join(format!("rizhao-{}-{}.png", std::process::id(), id))
  }

  fn run(&self, image_path: &Path) -> Result<RawOutput, CommandModelError> {
    debug!("执行推理程序 {}", self.program.display());
    let output = Command::new(&self.program)
      .args(&self.args)
      .arg("--weights")
      .arg(&self.weights)
      .arg("--image")
      .arg(image_path)
      .output()?;

    if !output.status.success() {
      return Err(CommandModelError::ExitStatus {
        code: output.status.code(),
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
      });
    }

    let detections: RawOutput = serde_json::from_slice(&output.stdout)?;
    debug!("推理程序返回 {} 条检测", detections.len());
    Ok(detections)
  }
}

impl Model for CommandModel {
  type Input = RgbImage;
  type Output = RawOutput;
  type Error = CommandModelError;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    let image_path = Self::scratch_path();
    input.save(&image_path)?;
    let result = self.run(&image_path);
    if let Err(e) = std::fs::remove_file(&image_path) {
      debug!("删除临时图像失败 {}: {}", image_path.display(), e);
    }
    result
  }
}
