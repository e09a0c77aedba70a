// 该文件是 Rizhao （日照） 项目的一部分。
// src/utils.rs - 工具函数
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

const SUPPORTED_IMAGE_EXTENSIONS: [&str; 5] = ["jpg", "jpeg", "png", "tif", "tiff"];

/// 判断文件扩展名是否为支持的图像格式（不区分大小写）
pub fn is_supported_image<P: AsRef<Path>>(path: P) -> bool {
  path
    .as_ref()
    .extension()
    .and_then(|ext| ext.to_str())
    .map(|ext| {
      let ext = ext.to_ascii_lowercase();
      SUPPORTED_IMAGE_EXTENSIONS.contains(&ext.as_str())
    })
    .unwrap_or(false)
}

/// 将字节数转换为可读字符串，例如 `1.50 KB`
pub fn format_size_readable(bytes: u64) -> String {
  let mut size = bytes as f64;
  for unit in ["B", "KB", "MB", "GB"] {
    if size < 1024.0 {
      return format!("{:.2} {}", size, unit);
    }
    size /= 1024.0;
  }
  format!("{:.2} TB", size)
}

/// 读取图像尺寸 (宽, 高)，只解析文件头
pub fn image_dimensions<P: AsRef<Path>>(path: P) -> Result<(u32, u32), image::ImageError> {
  image::image_dimensions(path)
}
