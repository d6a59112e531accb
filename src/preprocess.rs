// 该文件是 Moran （墨染） 项目的一部分。
// src/preprocess.rs - 图像预处理
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

use image::{Rgb, RgbImage, RgbaImage, imageops};
use ndarray::Array4;
use thiserror::Error;
use tracing::debug;

use crate::geometry::div_stride;

/// 模型下采样步长，空间尺寸对齐到它的整数倍
pub const DEFAULT_STRIDE: u32 = 32;

#[derive(Error, Debug)]
pub enum PreprocessError {
  #[error("图像尺寸为零: {width}x{height}")]
  EmptyImage { width: u32, height: u32 },
  #[error("图像过小, 步长对齐后尺寸为零: {width}x{height} (步长 {stride})")]
  BelowStride { width: u32, height: u32, stride: u32 },
}

/// 预处理结果
///
/// 张量为 NCHW 布局的 RGB 数据，取值范围 [0, 1]。
/// 比例把模型输出坐标映射回补边方形坐标空间，而不是原始图像空间。
pub struct Letterboxed {
  pub tensor: Array4<f32>,
  pub x_ratio: f32,
  pub y_ratio: f32,
}

/// 把任意分辨率的 RGBA 图像转换成模型输入张量
///
/// 1. 丢弃透明通道；
/// 2. 宽高就近对齐到步长整数倍并缩放；
/// 3. 在右侧/下侧补黑边成方形，记录两个方向的比例；
/// 4. 缩放到模型输入尺寸并归一化。
pub fn letterbox(
  image: &RgbaImage,
  model_width: u32,
  model_height: u32,
  stride: u32,
) -> Result<Letterboxed, PreprocessError> {
  let (width, height) = image.dimensions();
  if width == 0 || height == 0 {
    return Err(PreprocessError::EmptyImage { width, height });
  }

  let resized_width = div_stride(width, stride);
  let resized_height = div_stride(height, stride);
  if resized_width == 0 || resized_height == 0 {
    return Err(PreprocessError::BelowStride {
      width,
      height,
      stride,
    });
  }

  let rgb = RgbImage::from_fn(width, height, |x, y| {
    let pixel = image.get_pixel(x, y);
    Rgb([pixel[0], pixel[1], pixel[2]])
  });
  let resized = imageops::resize(
    &rgb,
    resized_width,
    resized_height,
    imageops::FilterType::Triangle,
  );

  let max_size = resized_width.max(resized_height);
  let x_ratio = max_size as f32 / resized_width as f32;
  let y_ratio = max_size as f32 / resized_height as f32;
  debug!(
    "步长对齐 {}x{} -> {}x{}, 方形边长 {}, 比例 {:.4}/{:.4}",
    width, height, resized_width, resized_height, max_size, x_ratio, y_ratio
  );

  // 只在下侧和右侧补边，左上角保持原点对齐
  let mut padded = RgbImage::from_pixel(max_size, max_size, Rgb([0, 0, 0]));
  imageops::replace(&mut padded, &resized, 0, 0);

  let scaled = imageops::resize(
    &padded,
    model_width,
    model_height,
    imageops::FilterType::Triangle,
  );

  let mut tensor = Array4::zeros((1, 3, model_height as usize, model_width as usize));
  for (x, y, pixel) in scaled.enumerate_pixels() {
    let Rgb([r, g, b]) = *pixel;
    tensor[[0, 0, y as usize, x as usize]] = r as f32 / 255.0;
    tensor[[0, 1, y as usize, x as usize]] = g as f32 / 255.0;
    tensor[[0, 2, y as usize, x as usize]] = b as f32 / 255.0;
  }

  Ok(Letterboxed {
    tensor,
    x_ratio,
    y_ratio,
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::Rgba;

  #[test]
  fn test_letterbox_square_input() {
    let image = RgbaImage::from_pixel(640, 640, Rgba([0, 0, 0, 255]));
    let result = letterbox(&image, 640, 640, DEFAULT_STRIDE).unwrap();
    assert_eq!(result.tensor.shape(), &[1, 3, 640, 640]);
    assert_eq!(result.x_ratio, 1.0);
    assert_eq!(result.y_ratio, 1.0);
    assert!(result.tensor.iter().all(|&v| v == 0.0));
  }

  #[test]
  fn test_letterbox_normalization() {
    let image = RgbaImage::from_pixel(64, 64, Rgba([255, 255, 255, 255]));
    let result = letterbox(&image, 64, 64, DEFAULT_STRIDE).unwrap();
    assert!(result.tensor.iter().all(|&v| (v - 1.0).abs() < 1e-6));
  }

  #[test]
  fn test_letterbox_ratios_landscape() {
    // 1280x720 对齐到 1280x736, 方形边长 1280
    let image = RgbaImage::from_pixel(1280, 720, Rgba([10, 20, 30, 255]));
    let result = letterbox(&image, 640, 640, DEFAULT_STRIDE).unwrap();
    assert_eq!(result.x_ratio, 1.0);
    assert!((result.y_ratio - 1280.0 / 736.0).abs() < 1e-6);
  }

  #[test]
  fn test_letterbox_padding_is_black() {
    // 横向图像下半部分应为补出来的黑边
    let image = RgbaImage::from_pixel(640, 320, Rgba([255, 255, 255, 255]));
    let result = letterbox(&image, 640, 640, DEFAULT_STRIDE).unwrap();
    // 下侧补边区域（缩放后位于下半部）
    assert_eq!(result.tensor[[0, 0, 639, 0]], 0.0);
    // 原图区域
    assert!((result.tensor[[0, 0, 0, 0]] - 1.0).abs() < 1e-6);
  }

  #[test]
  fn test_letterbox_rejects_empty() {
    let image = RgbaImage::new(0, 0);
    assert!(matches!(
      letterbox(&image, 640, 640, DEFAULT_STRIDE),
      Err(PreprocessError::EmptyImage { .. })
    ));
  }

  #[test]
  fn test_letterbox_rejects_below_stride() {
    let image = RgbaImage::from_pixel(10, 10, Rgba([0, 0, 0, 255]));
    assert!(matches!(
      letterbox(&image, 640, 640, DEFAULT_STRIDE),
      Err(PreprocessError::BelowStride { .. })
    ));
  }
}
