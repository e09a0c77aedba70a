// 该文件是 Rizhao （日照） 项目的一部分。
// src/input/read_image_file.rs - 本地图像文件输入
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

use std::path::PathBuf;

use image::{ImageReader, RgbImage};
use tracing::{debug, error, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  geo::Coordinate,
  input::{DecodeError, FetchError, ImageSource, InputError},
  utils::{image_dimensions, is_supported_image},
};

/// 离线输入：忽略坐标，每次请求都重新读取同一个文件
///
/// 文件来自 Web 墨卡托瓦片服务时，可通过 `?basis=512` 给出世界网格的瓦片边长，
/// 以便按缩放级别推导地面分辨率；否则需要手动指定分辨率。
pub struct ImageFileInput {
  path: PathBuf,
  basis: Option<u32>,
}

impl FromUrlWithScheme for ImageFileInput {
  const SCHEME: &'static str = "image";
}

impl FromUrl for ImageFileInput {
  type Error = InputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI 方案不匹配: 期望 '{}', 实际 '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(InputError::SchemeMismatch(url.scheme().to_string()));
    }

    let path = PathBuf::from(url.path());
    if !is_supported_image(&path) {
      return Err(InputError::UnsupportedImage(path.display().to_string()));
    }

    let (width, height) = image_dimensions(&path).map_err(|e| match e {
      image::ImageError::IoError(io) => InputError::from(FetchError::from(io)),
      other => InputError::from(DecodeError::from(other)),
    })?;
    info!("本地影像 {} ({}x{})", path.display(), width, height);

    let mut basis = None;
    for (k, v) in url.query_pairs() {
      match k.as_ref() {
        "basis" => {
          let value = v
            .parse::<u32>()
            .ok()
            .filter(|b| *b > 0)
            .ok_or_else(|| InputError::InvalidScaleBasis(v.to_string()))?;
          basis = Some(value);
        }
        _ => debug!("忽略未知参数 {}={}", k, v),
      }
    }

    Ok(ImageFileInput { path, basis })
  }
}

impl ImageSource for ImageFileInput {
  fn fetch(&self, coordinate: &Coordinate, zoom: u8) -> Result<RgbImage, InputError> {
    info!(
      "读取本地影像 {} (坐标 {}, zoom {} 不参与读取)",
      self.path.display(),
      coordinate,
      zoom
    );
    let reader = ImageReader::open(&self.path).map_err(FetchError::from)?;
    let image = reader.decode().map_err(DecodeError::from)?;
    Ok(image.into_rgb8())
  }

  fn scale_basis(&self) -> Option<u32> {
    self.basis
  }
}
