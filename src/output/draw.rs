// 该文件是 Moran （墨染） 项目的一部分。
// src/output/draw.rs - 检测与分割结果可视化
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::path::Path;

use ab_glyph::{FontVec, PxScale};
use image::{Rgba, RgbaImage, imageops};
use imageproc::drawing::{draw_filled_rect_mut, draw_text_mut};
use thiserror::Error;

use crate::palette::hex_to_rgba;
use crate::pipeline::{Detection, SegmentResult};

// 文本渲染常量
const LABEL_FONT_SIZE: f32 = 20.0;
const LABEL_TEXT_HEIGHT: i32 = 24;
const LABEL_CHAR_WIDTH: f32 = 11.0; // 每字符平均宽度（粗略估计）
const LABEL_TEXT_VERTICAL_PADDING: i32 = 2;

#[derive(Error, Debug)]
pub enum DrawError {
  #[error("字体文件读取错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("字体无效")]
  InvalidFont,
}

pub struct Draw {
  font_size: f32,
  label_text_height: i32,
  label_char_width: f32,
  label_text_vertical_padding: i32,
  font: Option<FontVec>,
}

impl Default for Draw {
  fn default() -> Self {
    Self {
      font_size: LABEL_FONT_SIZE,
      label_text_height: LABEL_TEXT_HEIGHT,
      label_char_width: LABEL_CHAR_WIDTH,
      label_text_vertical_padding: LABEL_TEXT_VERTICAL_PADDING,
      font: None,
    }
  }
}

impl Draw {
  /// 从文件加载标签字体，未加载时只画边框不画文字
  pub fn with_font_file(mut self, path: &Path) -> Result<Self, DrawError> {
    let data = std::fs::read(path)?;
    let font = FontVec::try_from_vec(data).map_err(|_| DrawError::InvalidFont)?;
    self.font = Some(font);
    Ok(self)
  }

  /// 把检测结果合成到一张模型分辨率的图像上
  ///
  /// 原图拉伸到模型输入分辨率，使边界框、覆盖层与画布坐标一致，
  /// 再依次叠加半透明覆盖层和彩色边界框。
  pub fn compose(&self, frame: &RgbaImage, result: &SegmentResult) -> RgbaImage {
    let width = result.overlay.width() as u32;
    let height = result.overlay.height() as u32;
    let mut canvas = imageops::resize(frame, width, height, imageops::FilterType::Triangle);

    blend_overlay(&mut canvas, result);

    for detection in result.detections.iter() {
      self.draw_bbox_with_label(&mut canvas, detection);
    }

    canvas
  }

  // 在画布上绘制一个矩形边框和标签，bbox 为模型空间像素坐标
  fn draw_bbox_with_label(&self, image: &mut RgbaImage, detection: &Detection) {
    let (w, h) = (image.width() as i32, image.height() as i32);
    let color = hex_to_rgba(detection.color, 255).unwrap_or([255, 255, 255, 255]);

    let mut x_min = detection.bbox.x.floor() as i32;
    let mut y_min = detection.bbox.y.floor() as i32;
    let mut x_max = (detection.bbox.x + detection.bbox.width).ceil() as i32;
    let mut y_max = (detection.bbox.y + detection.bbox.height).ceil() as i32;

    // Clamp to image bounds
    x_min = x_min.clamp(0, w - 1);
    y_min = y_min.clamp(0, h - 1);
    x_max = x_max.clamp(0, w - 1);
    y_max = y_max.clamp(0, h - 1);

    if x_min >= x_max || y_min >= y_max {
      return;
    }

    // 绘制边框（加粗为2像素）
    for thickness in 0..2 {
      let x_min_t = (x_min + thickness).min(w - 1);
      let y_min_t = (y_min + thickness).min(h - 1);
      let x_max_t = (x_max - thickness).max(0);
      let y_max_t = (y_max - thickness).max(0);

      // Top and bottom edges
      for x in x_min_t..=x_max_t {
        image.put_pixel(x as u32, y_min_t as u32, Rgba(color));
        image.put_pixel(x as u32, y_max_t as u32, Rgba(color));
      }

      // Left and right edges
      for y in y_min_t..=y_max_t {
        image.put_pixel(x_min_t as u32, y as u32, Rgba(color));
        image.put_pixel(x_max_t as u32, y as u32, Rgba(color));
      }
    }

    let Some(font) = &self.font else {
      return;
    };

    // 创建标签文本
    let label = format!("{} {:.2}", detection.label, detection.score);

    let scale = PxScale::from(self.font_size);
    let text_color = Rgba([255u8, 255u8, 255u8, 255u8]); // 白色文本

    // 估算文本大小（粗略估计）
    let text_width = (label.len() as f32 * self.label_char_width) as i32;
    let text_height = self.label_text_height;

    // 确定标签背景位置（在边框上方）
    let label_x = x_min.max(0);
    let label_y = (y_min - text_height).max(0);

    // 确保标签不超出图像边界
    let max_width = (w - label_x).max(0);
    let label_width = text_width.min(max_width) as u32;
    let label_height = text_height as u32;

    // 仅在标签有空间时绘制
    if label_width > 0 && label_height > 0 {
      let rect = imageproc::rect::Rect::at(label_x, label_y).of_size(label_width, label_height);
      draw_filled_rect_mut(image, rect, Rgba(color));

      draw_text_mut(
        image,
        text_color,
        label_x,
        label_y + self.label_text_vertical_padding,
        scale,
        font,
        &label,
      );
    }
  }
}

// 半透明覆盖层按 alpha 叠加到画布上
fn blend_overlay(canvas: &mut RgbaImage, result: &SegmentResult) {
  let width = (canvas.width() as usize).min(result.overlay.width());
  let height = (canvas.height() as usize).min(result.overlay.height());

  for y in 0..height {
    for x in 0..width {
      let [r, g, b, a] = result.overlay.pixel(x, y);
      if a == 0 {
        continue;
      }
      let alpha = a as u32;
      let pixel = canvas.get_pixel_mut(x as u32, y as u32);
      for (channel, value) in [r, g, b].into_iter().enumerate() {
        let base = pixel[channel] as u32;
        pixel[channel] = ((value as u32 * alpha + base * (255 - alpha)) / 255) as u8;
      }
    }
  }
}
