// 该文件是 Rizhao （日照） 项目的一部分。
// src/input/mapbox.rs - Mapbox 静态卫星影像
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

use std::time::Duration;

use image::RgbImage;
use reqwest::blocking::Client;
use tracing::{debug, error, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  geo::Coordinate,
  input::{DecodeError, FetchError, ImageSource, InputError},
  utils::format_size_readable,
};

const MAPBOX_ENDPOINT: &str = "https://api.mapbox.com";
const DEFAULT_OWNER: &str = "mapbox";
const DEFAULT_STYLE: &str = "satellite-v9";
pub const DEFAULT_IMAGE_SIZE: u32 = 512;
const MAX_IMAGE_SIZE: u32 = 1280;
/// 静态图按 512 像素瓦片的世界网格渲染，`size` 只改变画幅
pub const MAPBOX_GRID_TILE_SIZE: u32 = 512;
const MAX_ZOOM: u8 = 22;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Mapbox Static Images API
///
/// URI 形如 `mapbox://mapbox/satellite-v9?size=512`，主机部分为样式所有者，
/// 路径为样式名。访问令牌可以放在 `token` 参数中，也可以通过
/// [`MapboxStaticInput::with_access_token`] 设置。
pub struct MapboxStaticInput {
  client: Client,
  endpoint: Url,
  owner: String,
  style: String,
  image_size: u32,
  access_token: Option<String>,
}

impl FromUrlWithScheme for MapboxStaticInput {
  const SCHEME: &'static str = "mapbox";
}

impl FromUrl for MapboxStaticInput {
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

    let owner = url
      .host_str()
      .filter(|h| !h.is_empty())
      .unwrap_or(DEFAULT_OWNER)
      .to_string();
    let style = match url.path().trim_matches('/') {
      "" => DEFAULT_STYLE.to_string(),
      path => path.to_string(),
    };

    let mut endpoint = Url::parse(MAPBOX_ENDPOINT)?;
    let mut image_size = DEFAULT_IMAGE_SIZE;
    let mut access_token = None;
    for (k, v) in url.query_pairs() {
      match k.as_ref() {
        "size" => {
          image_size = v
            .parse()
            .map_err(|_| InputError::InvalidImageSize(0, MAX_IMAGE_SIZE))?
        }
        "endpoint" => endpoint = Url::parse(&v)?,
        "token" => access_token = Some(v.into_owned()),
        _ => debug!("忽略未知参数 {}={}", k, v),
      }
    }
    if image_size == 0 || image_size > MAX_IMAGE_SIZE {
      return Err(InputError::InvalidImageSize(image_size, MAX_IMAGE_SIZE));
    }

    let client = Client::builder()
      .timeout(REQUEST_TIMEOUT)
      .build()
      .map_err(FetchError::from)?;

    Ok(MapboxStaticInput {
      client,
      endpoint,
      owner,
      style,
      image_size,
      access_token,
    })
  }
}

impl MapboxStaticInput {
  /// 返回图像的边长（像素）
  pub fn image_size(&self) -> u32 {
    self.image_size
  }

  pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
    self.access_token = Some(token.into());
    self
  }

  /// 构造请求地址
  ///
  /// `{endpoint}/styles/v1/{owner}/{style}/static/{lon},{lat},{zoom},0/{size}x{size}?access_token=...`
  pub fn request_url(&self, coordinate: &Coordinate, zoom: u8) -> Result<Url, InputError> {
    if zoom > MAX_ZOOM {
      return Err(InputError::InvalidZoom(zoom, 0, MAX_ZOOM));
    }
    let token = self
      .access_token
      .as_deref()
      .filter(|t| !t.is_empty())
      .ok_or(InputError::MissingToken)?;

    let path = format!(
      "styles/v1/{}/{}/static/{},{},{},0/{}x{}",
      self.owner,
      self.style,
      coordinate.longitude(),
      coordinate.latitude(),
      zoom,
      self.image_size,
      self.image_size
    );
    let mut url = self.endpoint.join(&path)?;
    url.query_pairs_mut().append_pair("access_token", token);
    Ok(url)
  }
}

/// 去掉查询参数，避免访问令牌出现在日志与错误信息中
fn redact(url: &Url) -> String {
  let mut url = url.clone();
  url.set_query(None);
  url.to_string()
}

impl ImageSource for MapboxStaticInput {
  fn fetch(&self, coordinate: &Coordinate, zoom: u8) -> Result<RgbImage, InputError> {
    let url = self.request_url(coordinate, zoom)?;
    info!("请求卫星影像: {} (zoom {})", coordinate, zoom);
    debug!("请求地址: {}", redact(&url));

    let response = self.client.get(url.clone()).send().map_err(|e| {
      let e = e.without_url();
      error!("卫星影像请求失败: {}", e);
      FetchError::from(e)
    })?;

    let status = response.status();
    if !status.is_success() {
      error!("卫星影像服务返回 {}", status);
      return Err(
        FetchError::Status {
          status: status.as_u16(),
          url: redact(&url),
        }
        .into(),
      );
    }

    let bytes = response
      .bytes()
      .map_err(|e| FetchError::from(e.without_url()))?;
    debug!("影像数据大小: {}", format_size_readable(bytes.len() as u64));

    let image = image::load_from_memory(&bytes).map_err(DecodeError::from)?;
    Ok(image.to_rgb8())
  }

  fn scale_basis(&self) -> Option<u32> {
    Some(MAPBOX_GRID_TILE_SIZE)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{geo::meters_per_pixel, utils::testing::serve_once};

  fn coordinate() -> Coordinate {
    Coordinate::new(36.45028, 10.73389).unwrap()
  }

  #[test]
  fn request_url_layout() {
    let url = Url::parse("mapbox://mapbox/satellite-v9?size=512").unwrap();
    let input = MapboxStaticInput::from_url(&url)
      .unwrap()
      .with_access_token("pk.test");
    let request = input.request_url(&coordinate(), 18).unwrap();
    assert_eq!(
      request.as_str(),
      "https://api.mapbox.com/styles/v1/mapbox/satellite-v9/static/10.73389,36.45028,18,0/512x512?access_token=pk.test"
    );
    assert_eq!(
      redact(&request),
      "https://api.mapbox.com/styles/v1/mapbox/satellite-v9/static/10.73389,36.45028,18,0/512x512"
    );
  }

  #[test]
  fn defaults_and_custom_endpoint() {
    let url = Url::parse("mapbox:?endpoint=http://127.0.0.1:8080/&size=256&token=t").unwrap();
    let input = MapboxStaticInput::from_url(&url).unwrap();
    assert_eq!(input.image_size(), 256);
    let request = input.request_url(&coordinate(), 15).unwrap();
    assert!(request.as_str().starts_with(
      "http://127.0.0.1:8080/styles/v1/mapbox/satellite-v9/static/10.73389,36.45028,15,0/256x256"
    ));
  }

  #[test]
  fn missing_token_and_bad_zoom() {
    let url = Url::parse("mapbox://mapbox/satellite-v9").unwrap();
    let input = MapboxStaticInput::from_url(&url).unwrap();
    assert!(matches!(
      input.request_url(&coordinate(), 18),
      Err(InputError::MissingToken)
    ));
    let input = input.with_access_token("t");
    assert!(matches!(
      input.request_url(&coordinate(), 23),
      Err(InputError::InvalidZoom(23, 0, 22))
    ));
  }

  #[test]
  fn rejects_oversized_tiles() {
    let url = Url::parse("mapbox://mapbox/satellite-v9?size=4096").unwrap();
    assert!(matches!(
      MapboxStaticInput::from_url(&url),
      Err(InputError::InvalidImageSize(4096, _))
    ));
  }

  fn local_input(base: &Url, size: u32) -> MapboxStaticInput {
    let url = Url::parse(&format!(
      "mapbox://mapbox/satellite-v9?size={}&token=pk.local&endpoint={}",
      size, base
    ))
    .unwrap();
    MapboxStaticInput::from_url(&url).unwrap()
  }

  #[test]
  fn scale_basis_ignores_image_size() {
    let small = MapboxStaticInput::from_url(&Url::parse("mapbox://mapbox/satellite-v9?size=256").unwrap()).unwrap();
    let large = MapboxStaticInput::from_url(&Url::parse("mapbox://mapbox/satellite-v9?size=512").unwrap()).unwrap();
    assert_eq!(small.scale_basis(), Some(512));
    assert_eq!(small.scale_basis(), large.scale_basis());

    let lat = coordinate().latitude();
    let scale = |input: &MapboxStaticInput| meters_per_pixel(lat, 18, input.scale_basis().unwrap());
    assert_eq!(scale(&small), scale(&large));
    assert!((scale(&large) - 0.24017).abs() < 1e-4);
  }

  #[test]
  fn http_error_status_is_fetch_error() {
    let (base, server) = serve_once("403 Forbidden", "application/json", br#"{"message":"Forbidden"}"#.to_vec());
    let err = local_input(&base, 16).fetch(&coordinate(), 18).unwrap_err();
    server.join().unwrap();

    match err {
      InputError::Fetch(FetchError::Status { status, url }) => {
        assert_eq!(status, 403);
        assert!(!url.contains("pk.local"));
      }
      other => panic!("unexpected error: {other}"),
    }
  }

  #[test]
  fn non_image_payload_is_decode_error() {
    let (base, server) = serve_once("200 OK", "image/png", b"<html>oops</html>".to_vec());
    let err = local_input(&base, 16).fetch(&coordinate(), 18).unwrap_err();
    server.join().unwrap();
    assert!(matches!(err, InputError::Decode(_)));
  }

  #[test]
  fn png_payload_is_decoded() {
    let mut png = Vec::new();
    RgbImage::from_pixel(16, 16, image::Rgb([10, 20, 30]))
      .write_to(&mut std::io::Cursor::new(&mut png), image::ImageFormat::Png)
      .unwrap();
    let (base, server) = serve_once("200 OK", "image/png", png);

    let image = local_input(&base, 16).fetch(&coordinate(), 18).unwrap();
    let request = server.join().unwrap();

    assert_eq!(image.dimensions(), (16, 16));
    assert_eq!(image.get_pixel(3, 3), &image::Rgb([10, 20, 30]));
    assert!(request.starts_with(
      "GET /styles/v1/mapbox/satellite-v9/static/10.73389,36.45028,18,0/16x16?access_token=pk.local "
    ));
  }
}
