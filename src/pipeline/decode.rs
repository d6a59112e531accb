// 该文件是 Moran （墨染） 项目的一部分。
// src/pipeline/decode.rs - 检测行解码
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use thiserror::Error;

use crate::geometry::clip_box;
use crate::palette::Palette;
use crate::pipeline::{BoundBox, Detection};

#[derive(Error, Debug)]
pub enum DecodeError {
  #[error("行宽 {width} 小于期望的最小宽度 {expected}")]
  RowTooNarrow { width: usize, expected: usize },
}

/// 解码后的行
///
/// `mask_input` 为模型输出空间的裁剪框加掩膜系数，
/// 原样传给掩膜绘制阶段。
pub struct DecodedRow {
  pub detection: Detection,
  pub mask_input: Vec<f32>,
}

/// 解码选择阶段输出的一行
///
/// 行布局为 [cx, cy, w, h, 各类别分数..., 掩膜系数...]。
/// 分数取最大值，类别取首个达到最大值的索引；
/// 边界框由中心点形式转为左上角形式，先在模型输出空间裁剪，
/// 再按比例放大取整并二次裁剪，两次裁剪共用同一边界。
pub fn decode_row(
  row: &[f32],
  labels: &[String],
  palette: &Palette,
  x_ratio: f32,
  y_ratio: f32,
  max_size: f32,
) -> Result<DecodedRow, DecodeError> {
  let num_classes = labels.len();
  let expected = 4 + num_classes;
  if row.len() < expected {
    return Err(DecodeError::RowTooNarrow {
      width: row.len(),
      expected,
    });
  }

  let scores = &row[4..expected];
  let mut class_id = 0usize;
  let mut score = f32::NEG_INFINITY;
  for (index, &value) in scores.iter().enumerate() {
    if value > score {
      class_id = index;
      score = value;
    }
  }

  // 中心点转左上角
  let corner = [
    row[0] - 0.5 * row[2],
    row[1] - 0.5 * row[3],
    row[2],
    row[3],
  ];
  let model_box = clip_box(corner, max_size);
  let scaled = clip_box(
    [
      (model_box[0] * x_ratio).floor(),
      (model_box[1] * y_ratio).floor(),
      (model_box[2] * x_ratio).floor(),
      (model_box[3] * y_ratio).floor(),
    ],
    max_size,
  );

  let label = labels
    .get(class_id)
    .map(String::as_str)
    .unwrap_or("unknown")
    .to_string();
  let color = palette.get(class_id);

  let mut mask_input = Vec::with_capacity(row.len() - num_classes);
  mask_input.extend_from_slice(&model_box);
  mask_input.extend_from_slice(&row[expected..]);

  Ok(DecodedRow {
    detection: Detection {
      class_id,
      label,
      score,
      color,
      bbox: BoundBox {
        x: scaled[0],
        y: scaled[1],
        width: scaled[2],
        height: scaled[3],
      },
    },
    mask_input,
  })
}

#[cfg(test)]
mod tests {
  use super::*;

  fn labels(n: usize) -> Vec<String> {
    (0..n).map(|i| format!("class-{i}")).collect()
  }

  #[test]
  fn test_decode_centered_box() {
    let palette = Palette::new();
    let row = [100.0, 100.0, 50.0, 50.0, 0.9, 0.1, 0.5, -0.5];
    let decoded = decode_row(&row, &labels(2), &palette, 1.0, 1.0, 640.0).unwrap();

    assert_eq!(decoded.detection.class_id, 0);
    assert_eq!(decoded.detection.score, 0.9);
    assert_eq!(decoded.detection.label, "class-0");
    assert_eq!(
      decoded.detection.bbox,
      BoundBox {
        x: 75.0,
        y: 75.0,
        width: 50.0,
        height: 50.0
      }
    );
    // 掩膜输入为模型空间框加系数
    assert_eq!(decoded.mask_input, vec![75.0, 75.0, 50.0, 50.0, 0.5, -0.5]);
  }

  #[test]
  fn test_decode_tie_takes_first_index() {
    let palette = Palette::new();
    let row = [100.0, 100.0, 50.0, 50.0, 0.7, 0.7, 0.3];
    let decoded = decode_row(&row, &labels(3), &palette, 1.0, 1.0, 640.0).unwrap();
    assert_eq!(decoded.detection.class_id, 0);
    assert_eq!(decoded.detection.score, 0.7);
  }

  #[test]
  fn test_decode_upscale_and_clip() {
    let palette = Palette::new();
    // 先在模型空间裁剪，再放大取整并二次裁剪
    let row = [320.0, 600.0, 100.0, 100.0, 0.8];
    let decoded = decode_row(&row, &labels(1), &palette, 1.0, 1.1, 640.0).unwrap();
    let bbox = decoded.detection.bbox;
    // 模型空间: 右下角越界, 高度收缩到 90
    assert_eq!(&decoded.mask_input[..4], &[270.0, 550.0, 100.0, 90.0]);
    // 放大后: y = floor(550 * 1.1) = 605, 高度再次收缩进边界
    assert_eq!(bbox.x, 270.0);
    assert_eq!(bbox.y, 605.0);
    assert_eq!(bbox.height, 35.0);
    assert!(bbox.y + bbox.height <= 640.0);
  }

  #[test]
  fn test_decode_rejects_narrow_row() {
    let palette = Palette::new();
    let row = [100.0, 100.0, 50.0, 50.0, 0.9];
    let result = decode_row(&row, &labels(2), &palette, 1.0, 1.0, 640.0);
    assert!(matches!(
      result,
      Err(DecodeError::RowTooNarrow {
        width: 5,
        expected: 6
      })
    ));
  }

  #[test]
  fn test_decode_colors_follow_class() {
    let palette = Palette::new();
    let row_a = [100.0, 100.0, 50.0, 50.0, 0.9, 0.1];
    let row_b = [100.0, 100.0, 50.0, 50.0, 0.1, 0.9];
    let a = decode_row(&row_a, &labels(2), &palette, 1.0, 1.0, 640.0).unwrap();
    let b = decode_row(&row_b, &labels(2), &palette, 1.0, 1.0, 640.0).unwrap();
    assert_ne!(a.detection.color, b.detection.color);
    assert_eq!(a.detection.color, palette.get(0));
  }
}
