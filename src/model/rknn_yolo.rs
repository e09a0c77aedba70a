// 该文件是 Rizhao （日照） 项目的一部分。
// src/model/rknn_yolo.rs - RKNPU 上的 YOLO 面板检测
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

use std::path::{Path, PathBuf};

use image::{RgbImage, imageops::FilterType};
use rknpu::{Context, InitFlags, TensorType};
use thiserror::Error;
use tracing::{debug, error, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  model::{Model, ModelError, RawDetection, RawOutput},
};

const YOLO_NUM_INPUTS: u32 = 1;
const YOLO_NUM_OUTPUTS: u32 = 6;
const YOLO_INPUT_W: u32 = 640;
const YOLO_INPUT_H: u32 = 640;
const YOLO_HEAD_SIZES: [(usize, usize); 3] = [(80, 80), (40, 40), (20, 20)];
const YOLO_STRIDES: [f32; 3] = [8.0, 16.0, 32.0];
const YOLO_OBJECT_THRESH: f32 = 0.25;
const YOLO_NMS_THRESH: f64 = 0.45;
const DEFAULT_LABEL: &str = "solar_panel";

pub struct RknnYolo {
  context: Context,
  labels: Vec<String>,
  threshold: f32,
}

#[derive(Error, Debug)]
pub enum RknnYoloError {
  #[error("模型加载错误: {0}")]
  ModelLoadError(#[from] std::io::Error),
  #[error("模型无效: {0}, 错误: {1}")]
  ModelInvalid(String, rknpu::Error),
  #[error("RKNN 错误: {0}")]
  RknnError(#[from] rknpu::Error),
  #[error("模型路径错误: {0}")]
  ModelPathError(String),
}

impl RknnYoloError {
  pub fn invalid(msg: &str, e: rknpu::Error) -> Self {
    RknnYoloError::ModelInvalid(msg.to_string(), e)
  }
}

pub struct RknnYoloBuilder {
  model_path: PathBuf,
  labels: Vec<String>,
  threshold: f32,
  flags: InitFlags,
}

impl FromUrlWithScheme for RknnYoloBuilder {
  const SCHEME: &'static str = "rknn";
}

impl FromUrl for RknnYoloBuilder {
  type Error = RknnYoloError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(RknnYoloError::ModelPathError(format!(
        "模型路径必须使用 {} 方案",
        Self::SCHEME
      )));
    }

    let mut labels = Vec::new();
    let mut threshold = YOLO_OBJECT_THRESH;
    for (k, v) in url.query_pairs() {
      match k.as_ref() {
        "label" => labels.push(v.into_owned()),
        "threshold" => {
          threshold = v
            .parse()
            .map_err(|_| RknnYoloError::ModelPathError(format!("阈值无效: {}", v)))?
        }
        _ => debug!("忽略未知参数 {}={}", k, v),
      }
    }
    if labels.is_empty() {
      labels.push(DEFAULT_LABEL.to_string());
    }

    Ok(RknnYoloBuilder {
      model_path: PathBuf::from(url.path()),
      labels,
      threshold,
      flags: InitFlags::default(),
    })
  }
}

impl RknnYoloBuilder {
  pub fn model_path(&self) -> &Path {
    &self.model_path
  }

  pub fn model_path_from(mut self, path: PathBuf) -> Self {
    self.model_path = path;
    self
  }

  pub fn flags(mut self, flags: InitFlags) -> Self {
    self.flags = flags;
    self
  }

  pub fn build(self) -> Result<RknnYolo, ModelError> {
    if !self.model_path.exists() {
      error!("权重文件不存在: {}", self.model_path.display());
      return Err(ModelError::WeightsNotFound(self.model_path));
    }
    Ok(self.load()?)
  }

  fn load(self) -> Result<RknnYolo, RknnYoloError> {
    info!("加载模型文件: {}", self.model_path.display());
    let mode_data = std::fs::read(&self.model_path)?;
    debug!(
      "模型文件大小: {}",
      crate::utils::format_size_readable(mode_data.len() as u64)
    );

    info!("创建 RKNN 推理上下文");
    let context = Context::new(&mode_data, self.flags)?;

    let num_inputs = context
      .num_inputs()
      .map_err(|e| RknnYoloError::invalid("无法获取输入数量", e))?;
    let num_outputs = context
      .num_outputs()
      .map_err(|e| RknnYoloError::invalid("无法获取输出数量", e))?;

    if num_inputs != YOLO_NUM_INPUTS || num_outputs != YOLO_NUM_OUTPUTS {
      error!(
        "预期模型输入/输出数量为 {}/{}, 实际为 {}/{}",
        YOLO_NUM_INPUTS, YOLO_NUM_OUTPUTS, num_inputs, num_outputs
      );
      return Err(RknnYoloError::invalid(
        &format!(
          "预期模型输入/输出数量为 {}/{}, 实际为 {}/{}",
          YOLO_NUM_INPUTS, YOLO_NUM_OUTPUTS, num_inputs, num_outputs
        ),
        rknpu::Error::InvalidModel,
      ));
    }

    info!("模型加载完成，类别 {:?}", self.labels);
    Ok(RknnYolo {
      context,
      labels: self.labels,
      threshold: self.threshold,
    })
  }
}

/// 根据张量大小匹配回归和分类输出
fn match_reg_cls_tensors<'a>(
  tensor1: &'a [f32],
  tensor2: &'a [f32],
  reg_expected: usize,
  cls_expected: usize,
) -> Option<(&'a [f32], &'a [f32])> {
  if tensor1.len() == reg_expected && tensor2.len() == cls_expected {
    Some((tensor1, tensor2))
  } else if tensor1.len() == cls_expected && tensor2.len() == reg_expected {
    Some((tensor2, tensor1))
  } else {
    None
  }
}

impl RknnYolo {
  fn postprocess(&self, output: rknpu::Output, width: u32, height: u32) -> RawOutput {
    let class_num = self.labels.len();
    let scale_x = width as f64 / YOLO_INPUT_W as f64;
    let scale_y = height as f64 / YOLO_INPUT_H as f64;
    let mut items = Vec::new();

    for (head_idx, (&(map_h, map_w), stride)) in
      YOLO_HEAD_SIZES.iter().zip(YOLO_STRIDES).enumerate()
    {
      let spatial = map_h * map_w;
      let reg_expected = 4 * spatial;
      let cls_expected = class_num * spatial;

      // 输出顺序可能不同，按张量大小区分回归与分类
      let (tensor1, tensor2) = match (
        output.get_f32(head_idx * 2),
        output.get_f32(head_idx * 2 + 1),
      ) {
        (Ok(t1), Ok(t2)) => (t1, t2),
        (Err(e), _) | (_, Err(e)) => {
          error!("检测头 {}: 获取输出失败: {}", head_idx, e);
          continue;
        }
      };

      let Some((reg, cls)) = match_reg_cls_tensors(tensor1, tensor2, reg_expected, cls_expected)
      else {
        error!(
          "检测头 {}: 输出大小不匹配 - {} / {}, 期望回归 {}, 期望分类 {}",
          head_idx,
          tensor1.len(),
          tensor2.len(),
          reg_expected,
          cls_expected
        );
        continue;
      };

      for h in 0..map_h {
        for w in 0..map_w {
          let idx = h * map_w + w;

          let (score, class_id) = (0..class_num)
            .map(|c| (cls[c * spatial + idx], c))
            .fold((f32::MIN, 0usize), |best, cur| if cur.0 > best.0 { cur } else { best });
          let score = sigmoid(score);
          if score <= self.threshold {
            continue;
          }

          let grid_x = (w as f32) + 0.5;
          let grid_y = (h as f32) + 0.5;
          let in_w = YOLO_INPUT_W as f32;
          let in_h = YOLO_INPUT_H as f32;

          let xmin = ((grid_x - reg[idx]) * stride).clamp(0.0, in_w);
          let ymin = ((grid_y - reg[spatial + idx]) * stride).clamp(0.0, in_h);
          let xmax = ((grid_x + reg[2 * spatial + idx]) * stride).clamp(0.0, in_w);
          let ymax = ((grid_y + reg[3 * spatial + idx]) * stride).clamp(0.0, in_h);

          items.push(RawDetection::new(
            self.labels[class_id].clone(),
            score as f64,
            [
              xmin as f64 * scale_x,
              ymin as f64 * scale_y,
              xmax as f64 * scale_x,
              ymax as f64 * scale_y,
            ],
          ));
        }
      }
    }

    let kept = non_max_suppression(items, YOLO_NMS_THRESH);
    debug!("NMS 后保留 {} 个物体", kept.len());
    kept
  }
}

fn bbox_of(item: &RawDetection) -> [f64; 4] {
  [
    item.xmin.unwrap_or_default(),
    item.ymin.unwrap_or_default(),
    item.xmax.unwrap_or_default(),
    item.ymax.unwrap_or_default(),
  ]
}

fn iou(a: &[f64; 4], b: &[f64; 4]) -> f64 {
  let w = (a[2].min(b[2]) - a[0].max(b[0])).max(0.0);
  let h = (a[3].min(b[3]) - a[1].max(b[1])).max(0.0);
  let inter = w * h;
  let union = (a[2] - a[0]) * (a[3] - a[1]) + (b[2] - b[0]) * (b[3] - b[1]) - inter;
  if union <= 0.0 { 0.0 } else { inter / union }
}

/// 同类别贪心 NMS
fn non_max_suppression(mut items: RawOutput, threshold: f64) -> RawOutput {
  items.sort_by(|a, b| {
    b.confidence
      .unwrap_or_default()
      .total_cmp(&a.confidence.unwrap_or_default())
  });
  let mut kept: RawOutput = Vec::with_capacity(items.len());
  for item in items {
    let bbox = bbox_of(&item);
    let suppressed = kept
      .iter()
      .any(|k| k.name == item.name && iou(&bbox_of(k), &bbox) > threshold);
    if !suppressed {
      kept.push(item);
    }
  }
  kept
}

impl Model for RknnYolo {
  type Input = RgbImage;
  type Output = RawOutput;
  type Error = RknnYoloError;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    let (width, height) = input.dimensions();
    let resized = image::imageops::resize(input, YOLO_INPUT_W, YOLO_INPUT_H, FilterType::Triangle);

    debug!("设置模型输入");
    self.context.set_input(
      0,
      resized.as_raw(),
      rknpu::TensorFormat::NHWC,
      TensorType::UInt8,
    )?;

    debug!("执行模型推理");
    self.context.run()?;

    let output = self.context.get_outputs()?;
    Ok(self.postprocess(output, width, height))
  }
}

fn sigmoid(x: f32) -> f32 {
  1.0 / (1.0 + (-x).exp())
}
