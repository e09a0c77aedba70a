// 该文件是 Rizhao （日照） 项目的一部分。
// src/output/draw.rs - 检测结果可视化
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

use std::path::Path;

use ab_glyph::{FontArc, PxScale};
use image::{Rgb, RgbImage};
use imageproc::{
  drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut},
  rect::Rect,
};
use thiserror::Error;
use tracing::info;

use crate::detection::DetectionRecord;

// 文本渲染常量
const LABEL_FONT_SIZE: f32 = 16.0;
const LABEL_TEXT_HEIGHT: i32 = 20;
const LABEL_CHAR_WIDTH: f32 = 9.0; // 每字符平均宽度（粗略估计）
const LABEL_TEXT_VERTICAL_PADDING: i32 = 2;
const BOX_COLOR: [u8; 3] = [255, 196, 0]; // 琥珀色
const BOX_THICKNESS: i32 = 2;

#[derive(Error, Debug)]
pub enum DrawError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("字体无效: {0}")]
  FontError(#[from] ab_glyph::InvalidFont),
}

/// 在图像上绘制检测框
///
/// 字体是可选的：未加载字体时只绘制边框。
#[derive(Clone)]
pub struct Draw {
  font: Option<FontArc>,
  font_size: f32,
  label_text_height: i32,
  label_char_width: f32,
  label_text_vertical_padding: i32,
  color: [u8; 3],
}

impl Default for Draw {
  fn default() -> Self {
    Self {
      font: None,
      font_size: LABEL_FONT_SIZE,
      label_text_height: LABEL_TEXT_HEIGHT,
      label_char_width: LABEL_CHAR_WIDTH,
      label_text_vertical_padding: LABEL_TEXT_VERTICAL_PADDING,
      color: BOX_COLOR,
    }
  }
}

impl Draw {
  pub fn with_font_file<P: AsRef<Path>>(mut self, path: P) -> Result<Self, DrawError> {
    let data = std::fs::read(path.as_ref())?;
    self.font = Some(FontArc::try_from_vec(data)?);
    info!("加载标签字体: {}", path.as_ref().display());
    Ok(self)
  }

  pub fn with_color(mut self, color: [u8; 3]) -> Self {
    self.color = color;
    self
  }

  pub fn has_font(&self) -> bool {
    self.font.is_some()
  }

  /// 在原图副本上绘制全部检测框
  pub fn annotate(&self, image: &RgbImage, records: &[DetectionRecord]) -> RgbImage {
    let mut annotated = image.clone();
    self.draw_detections_on_image(&mut annotated, records);
    annotated
  }

  pub fn draw_detections_on_image(&self, image: &mut RgbImage, records: &[DetectionRecord]) {
    for record in records {
      self.draw_bbox_with_label(image, record);
    }
  }

  // bbox 为像素坐标 [x_min, y_min, x_max, y_max]
  fn draw_bbox_with_label(&self, image: &mut RgbImage, record: &DetectionRecord) {
    if image.width() == 0 || image.height() == 0 {
      return;
    }
    let (w, h) = (image.width() as i32, image.height() as i32);
    let [x_min, y_min, x_max, y_max] = record.bbox();

    let x_min = (x_min.floor() as i32).clamp(0, w - 1);
    let y_min = (y_min.floor() as i32).clamp(0, h - 1);
    let x_max = (x_max.ceil() as i32).clamp(0, w - 1);
    let y_max = (y_max.ceil() as i32).clamp(0, h - 1);

    if x_min >= x_max || y_min >= y_max {
      return;
    }

    let color = Rgb(self.color);
    let width = (x_max - x_min + 1) as u32;
    let height = (y_max - y_min + 1) as u32;
    // 由外向内逐圈绘制以加粗边框
    for t in 0..BOX_THICKNESS {
      let inset = 2 * t as u32;
      if width <= inset || height <= inset {
        break;
      }
      let rect = Rect::at(x_min + t, y_min + t).of_size(width - inset, height - inset);
      draw_hollow_rect_mut(image, rect, color);
    }

    let Some(font) = &self.font else {
      return;
    };

    let label = format!("{} {:.2}", record.label(), record.confidence());
    let text_width = (label.chars().count() as f32 * self.label_char_width) as i32;

    // 标签放在边框上方，超出边界时截断
    let label_x = x_min;
    let label_y = (y_min - self.label_text_height).max(0);
    let label_width = text_width.min(w - label_x).max(0) as u32;
    let label_height = self.label_text_height as u32;

    if label_width > 0 {
      let rect = Rect::at(label_x, label_y).of_size(label_width, label_height);
      draw_filled_rect_mut(image, rect, color);
      draw_text_mut(
        image,
        Rgb([0u8, 0u8, 0u8]),
        label_x,
        label_y + self.label_text_vertical_padding,
        PxScale::from(self.font_size),
        font,
        &label,
      );
    }
  }
}
