// 该文件是 Moran （墨染） 项目的一部分。
// src/overlay.rs - 分割覆盖层缓冲区
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

use image::RgbaImage;

const RGBA_CHANNELS: usize = 4;

/// 累积分割掩膜的覆盖层
///
/// 行优先 RGBA 缓冲区，尺寸固定为模型输入分辨率。
/// 每次掩膜绘制调用消耗旧的覆盖层并产出新的覆盖层，
/// 因此同一检测流程中任何时刻只有一个活动实例。
#[derive(Debug, Clone)]
pub struct Overlay {
  height: usize,
  width: usize,
  data: Box<[u8]>,
}

impl Overlay {
  /// 创建全零（完全透明）的覆盖层
  pub fn zeros(height: u32, width: u32) -> Self {
    let size = height as usize * width as usize * RGBA_CHANNELS;
    Overlay {
      height: height as usize,
      width: width as usize,
      data: vec![0u8; size].into_boxed_slice(),
    }
  }

  /// 从原始缓冲区构建覆盖层，长度不符时返回 None
  pub fn from_raw(height: usize, width: usize, data: Vec<u8>) -> Option<Self> {
    if data.len() != height * width * RGBA_CHANNELS {
      return None;
    }
    Some(Overlay {
      height,
      width,
      data: data.into_boxed_slice(),
    })
  }

  pub fn height(&self) -> usize {
    self.height
  }

  pub fn width(&self) -> usize {
    self.width
  }

  pub fn as_slice(&self) -> &[u8] {
    &self.data
  }

  /// 拆出 (高, 宽, 缓冲区)，移交给下一个掩膜绘制调用
  pub fn into_raw(self) -> (usize, usize, Vec<u8>) {
    (self.height, self.width, self.data.into_vec())
  }

  /// 读取 (x, y) 处的 RGBA 像素
  pub fn pixel(&self, x: usize, y: usize) -> [u8; 4] {
    let index = (y * self.width + x) * RGBA_CHANNELS;
    [
      self.data[index],
      self.data[index + 1],
      self.data[index + 2],
      self.data[index + 3],
    ]
  }

  /// 写入 (x, y) 处的 RGBA 像素
  pub fn put_pixel(&mut self, x: usize, y: usize, rgba: [u8; 4]) {
    let index = (y * self.width + x) * RGBA_CHANNELS;
    self.data[index..index + RGBA_CHANNELS].copy_from_slice(&rgba);
  }

  /// 转成 RGBA 图像交给渲染端
  pub fn to_image(&self) -> RgbaImage {
    RgbaImage::from_raw(self.width as u32, self.height as u32, self.data.to_vec())
      .expect("覆盖层缓冲区长度与尺寸不符")
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_zeros_is_transparent() {
    let overlay = Overlay::zeros(4, 8);
    assert_eq!(overlay.height(), 4);
    assert_eq!(overlay.width(), 8);
    assert!(overlay.as_slice().iter().all(|&v| v == 0));
  }

  #[test]
  fn test_from_raw_validates_length() {
    assert!(Overlay::from_raw(2, 2, vec![0u8; 16]).is_some());
    assert!(Overlay::from_raw(2, 2, vec![0u8; 15]).is_none());
  }

  #[test]
  fn test_pixel_roundtrip() {
    let mut overlay = Overlay::zeros(4, 4);
    overlay.put_pixel(2, 1, [10, 20, 30, 120]);
    assert_eq!(overlay.pixel(2, 1), [10, 20, 30, 120]);
    assert_eq!(overlay.pixel(1, 2), [0, 0, 0, 0]);
  }

  #[test]
  fn test_to_image_matches_buffer() {
    let mut overlay = Overlay::zeros(3, 5);
    overlay.put_pixel(4, 2, [1, 2, 3, 4]);
    let image = overlay.to_image();
    assert_eq!(image.dimensions(), (5, 3));
    assert_eq!(image.get_pixel(4, 2).0, [1, 2, 3, 4]);
  }
}
