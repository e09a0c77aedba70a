// 该文件是 Rizhao （日照） 项目的一部分。
// src/input.rs - 卫星影像输入
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

use image::RgbImage;
use thiserror::Error;

use crate::{FromUrl, FromUrlWithScheme, geo::Coordinate};

/// 给定坐标与缩放级别，获取一张栅格图像
pub trait ImageSource {
  fn fetch(&self, coordinate: &Coordinate, zoom: u8) -> Result<RgbImage, InputError>;

  /// 世界网格的瓦片边长（像素），用于按缩放级别与纬度推导地面分辨率
  ///
  /// 与返回图像的尺寸无关。无法推导时返回 `None`，需要手动指定分辨率。
  fn scale_basis(&self) -> Option<u32>;
}

/// 网络、HTTP 或文件读取失败
#[derive(Error, Debug)]
pub enum FetchError {
  #[error("网络错误: {0}")]
  Network(#[from] reqwest::Error),
  #[error("HTTP 状态异常 {status}: {url}")]
  Status { status: u16, url: String },
  #[error("I/O 错误: {0}")]
  Io(#[from] std::io::Error),
}

/// 图像数据无法解码
#[derive(Error, Debug)]
#[error("图像解码失败: {0}")]
pub struct DecodeError(#[from] pub image::ImageError);

#[derive(Error, Debug)]
pub enum InputError {
  #[error("获取影像失败: {0}")]
  Fetch(#[from] FetchError),
  #[error(transparent)]
  Decode(#[from] DecodeError),
  #[error("缩放级别 {0} 超出范围 [{1}, {2}]")]
  InvalidZoom(u8, u8, u8),
  #[error("图像尺寸 {0} 超出范围 [1, {1}]")]
  InvalidImageSize(u32, u32),
  #[error("无效的网格瓦片边长: {0}")]
  InvalidScaleBasis(String),
  #[error("无效的地址: {0}")]
  InvalidUrl(#[from] url::ParseError),
  #[error("未配置 Mapbox 访问令牌")]
  MissingToken,
  #[error("不支持的图像文件: {0}")]
  UnsupportedImage(String),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

mod mapbox;
pub use self::mapbox::MapboxStaticInput;

mod read_image_file;
pub use self::read_image_file::ImageFileInput;

pub enum InputWrapper {
  Mapbox(MapboxStaticInput),
  ImageFile(ImageFileInput),
}

impl FromUrl for InputWrapper {
  type Error = InputError;

  fn from_url(url: &url::Url) -> Result<Self, Self::Error> {
    match url.scheme() {
      MapboxStaticInput::SCHEME => Ok(InputWrapper::Mapbox(MapboxStaticInput::from_url(url)?)),
      ImageFileInput::SCHEME => Ok(InputWrapper::ImageFile(ImageFileInput::from_url(url)?)),
      other => Err(InputError::SchemeMismatch(other.to_string())),
    }
  }
}

impl InputWrapper {
  /// 仅对 Mapbox 输入生效
  pub fn with_access_token(self, token: Option<String>) -> Self {
    match (self, token) {
      (InputWrapper::Mapbox(input), Some(token)) => {
        InputWrapper::Mapbox(input.with_access_token(token))
      }
      (input, _) => input,
    }
  }
}

impl ImageSource for InputWrapper {
  fn fetch(&self, coordinate: &Coordinate, zoom: u8) -> Result<RgbImage, InputError> {
    match self {
      InputWrapper::Mapbox(input) => input.fetch(coordinate, zoom),
      InputWrapper::ImageFile(input) => input.fetch(coordinate, zoom),
    }
  }

  fn scale_basis(&self) -> Option<u32> {
    match self {
      InputWrapper::Mapbox(input) => input.scale_basis(),
      InputWrapper::ImageFile(input) => input.scale_basis(),
    }
  }
}
