// 该文件是 Moran （墨染） 项目的一部分。
// src/output/record_json.rs - 检测结果 JSON 记录
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::path::{Path, PathBuf};

use chrono::Utc;
use image::RgbaImage;
use serde_json::json;
use thiserror::Error;
use tracing::warn;

use crate::output::Render;
use crate::pipeline::SegmentResult;

#[derive(Error, Debug)]
pub enum RecordJsonError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("序列化错误: {0}")]
  SerializeError(#[from] serde_json::Error),
}

/// 把检测列表写成带时间戳的 JSON 文件
pub struct RecordJsonOutput {
  path: PathBuf,
}

impl RecordJsonOutput {
  pub fn new(path: impl Into<PathBuf>) -> Self {
    RecordJsonOutput { path: path.into() }
  }
}

impl Render<RgbaImage, SegmentResult> for RecordJsonOutput {
  type Error = RecordJsonError;

  fn render_result(&self, frame: &RgbaImage, result: &SegmentResult) -> Result<(), Self::Error> {
    let detections: Vec<_> = result
      .detections
      .iter()
      .map(|detection| {
        json!({
          "label": detection.label,
          "class_id": detection.class_id,
          "score": detection.score,
          "color": detection.color,
          "bbox": {
            "x": detection.bbox.x,
            "y": detection.bbox.y,
            "width": detection.bbox.width,
            "height": detection.bbox.height,
          },
        })
      })
      .collect();

    let record = json!({
      "timestamp": Utc::now().to_rfc3339(),
      "image": {
        "width": frame.width(),
        "height": frame.height(),
      },
      "overlay": {
        "width": result.overlay.width(),
        "height": result.overlay.height(),
      },
      "detections": detections,
    });

    if let Some(parent) = Path::new(&self.path).parent()
      && !parent.as_os_str().is_empty()
    {
      std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&self.path, serde_json::to_string_pretty(&record)?)?;

    warn!("保存检测记录到文件: {}", self.path.display());

    Ok(())
  }
}
