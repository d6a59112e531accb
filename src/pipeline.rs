// 该文件是 Moran （墨染） 项目的一部分。
// src/pipeline.rs - 检测流程协调器
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use image::RgbaImage;
use ndarray::s;
use thiserror::Error;
use tracing::{debug, info};

use crate::overlay::Overlay;
use crate::palette::{Palette, hex_to_rgba};
use crate::preprocess::{self, DEFAULT_STRIDE, PreprocessError};
use crate::stage::{DetectOutput, DetectStage, MaskConfig, MaskStage, SelectConfig, SelectStage};

mod decode;
pub use self::decode::{DecodeError, DecodedRow, decode_row};

pub const DEFAULT_TOPK: usize = 100;
pub const DEFAULT_IOU_THRESHOLD: f32 = 0.45;
pub const DEFAULT_SCORE_THRESHOLD: f32 = 0.25;

/// 掩膜着色的透明度
pub const OVERLAY_ALPHA: u8 = 120;

/// 边界框，左上角坐标加宽高，单位为模型输入空间像素
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundBox {
  pub x: f32,
  pub y: f32,
  pub width: f32,
  pub height: f32,
}

/// 单个检测结果
#[derive(Debug, Clone)]
pub struct Detection {
  /// 类别索引
  pub class_id: usize,
  /// 类别名称
  pub label: String,
  /// 置信度
  pub score: f32,
  /// 类别颜色（十六进制）
  pub color: &'static str,
  /// 放大并裁剪后的边界框
  pub bbox: BoundBox,
}

/// 一次检测流程的完整结果
pub struct SegmentResult {
  /// 按选择阶段输出行序排列的检测列表
  pub detections: Vec<Detection>,
  /// 累积了全部掩膜的覆盖层
  pub overlay: Overlay,
}

/// 流程配置，构建流程时校验
#[derive(Debug, Clone)]
pub struct PipelineConfig {
  /// 模型输入形状 [批量, 通道, 宽, 高]
  pub input_shape: [usize; 4],
  /// 每个类别保留的最大检测数
  pub topk: usize,
  /// NMS IOU 阈值
  pub iou_threshold: f32,
  /// 置信度阈值
  pub score_threshold: f32,
  /// 类别标签，长度即类别数
  pub labels: Vec<String>,
}

impl PipelineConfig {
  pub fn with_labels(labels: Vec<String>) -> Self {
    PipelineConfig {
      input_shape: [1, 3, 640, 640],
      topk: DEFAULT_TOPK,
      iou_threshold: DEFAULT_IOU_THRESHOLD,
      score_threshold: DEFAULT_SCORE_THRESHOLD,
      labels,
    }
  }

  pub fn num_classes(&self) -> usize {
    self.labels.len()
  }

  pub fn model_width(&self) -> u32 {
    self.input_shape[2] as u32
  }

  pub fn model_height(&self) -> u32 {
    self.input_shape[3] as u32
  }

  fn validate(&self) -> Result<(), PipelineError> {
    if self.input_shape[0] != 1 || self.input_shape[1] != 3 {
      return Err(PipelineError::InvalidConfig(format!(
        "输入形状必须为 [1, 3, 宽, 高], 实际为 {:?}",
        self.input_shape
      )));
    }
    if self.input_shape[2] == 0 || self.input_shape[3] == 0 {
      return Err(PipelineError::InvalidConfig(format!(
        "模型输入尺寸不能为零: {:?}",
        self.input_shape
      )));
    }
    if self.topk == 0 {
      return Err(PipelineError::InvalidConfig("topk 必须大于 0".to_string()));
    }
    if !(self.iou_threshold > 0.0 && self.iou_threshold < 1.0) {
      return Err(PipelineError::InvalidConfig(format!(
        "IOU 阈值必须在 (0, 1) 区间内: {}",
        self.iou_threshold
      )));
    }
    if !(self.score_threshold > 0.0 && self.score_threshold < 1.0) {
      return Err(PipelineError::InvalidConfig(format!(
        "置信度阈值必须在 (0, 1) 区间内: {}",
        self.score_threshold
      )));
    }
    if self.labels.is_empty() {
      return Err(PipelineError::InvalidConfig(
        "标签列表不能为空".to_string(),
      ));
    }
    Ok(())
  }
}

/// 取消令牌，在阶段之间和逐检测循环中检查
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
  flag: Arc<AtomicBool>,
}

impl CancelToken {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn cancel(&self) {
    self.flag.store(true, Ordering::SeqCst);
  }

  pub fn is_cancelled(&self) -> bool {
    self.flag.load(Ordering::SeqCst)
  }
}

#[derive(Error, Debug)]
pub enum PipelineError {
  #[error("配置无效: {0}")]
  InvalidConfig(String),
  #[error("预处理失败: {0}")]
  Preprocess(#[from] PreprocessError),
  #[error("推理阶段 {stage} 失败: {source}")]
  Inference {
    stage: &'static str,
    #[source]
    source: Box<dyn std::error::Error + Send + Sync>,
  },
  #[error("选择阶段输出形状不符合预期: {shape:?}")]
  SelectedShape { shape: Vec<usize> },
  #[error("第 {row} 行解码失败: {source}")]
  Decode {
    row: usize,
    #[source]
    source: DecodeError,
  },
  #[error("检测任务已取消")]
  Cancelled,
}

impl PipelineError {
  fn inference<E>(stage: &'static str, source: E) -> Self
  where
    E: std::error::Error + Send + Sync + 'static,
  {
    PipelineError::Inference {
      stage,
      source: Box::new(source),
    }
  }
}

/// 检测流程协调器
///
/// 三个推理阶段严格串行：检测输出是选择的输入，选择输出逐行解码后
/// 驱动掩膜绘制，覆盖层所有权沿循环向前移交。任何一步失败都会中止
/// 整个流程，不产生部分结果。
pub struct Pipeline<D, S, M> {
  detect: D,
  select: S,
  mask: M,
  config: PipelineConfig,
  palette: Arc<Palette>,
}

impl<D, S, M> Pipeline<D, S, M>
where
  D: DetectStage,
  S: SelectStage,
  M: MaskStage,
{
  pub fn new(detect: D, select: S, mask: M, config: PipelineConfig) -> Result<Self, PipelineError> {
    config.validate()?;
    Ok(Pipeline {
      detect,
      select,
      mask,
      config,
      palette: Arc::new(Palette::new()),
    })
  }

  /// 替换调色板，多个流程共享同一个调色板时使用
  pub fn with_palette(mut self, palette: Arc<Palette>) -> Self {
    self.palette = palette;
    self
  }

  pub fn config(&self) -> &PipelineConfig {
    &self.config
  }

  /// 对一张图像执行完整的检测加分割流程
  pub fn process(
    &mut self,
    image: &RgbaImage,
    cancel: &CancelToken,
  ) -> Result<SegmentResult, PipelineError> {
    if cancel.is_cancelled() {
      return Err(PipelineError::Cancelled);
    }

    let model_width = self.config.model_width();
    let model_height = self.config.model_height();
    let letterboxed = preprocess::letterbox(image, model_width, model_height, DEFAULT_STRIDE)?;
    let (x_ratio, y_ratio) = (letterboxed.x_ratio, letterboxed.y_ratio);

    if cancel.is_cancelled() {
      return Err(PipelineError::Cancelled);
    }

    let now = std::time::Instant::now();
    let DetectOutput { raw, mask_basis } = self
      .detect
      .run(letterboxed.tensor)
      .map_err(|e| PipelineError::inference("detect", e))?;
    debug!("检测阶段完成, 耗时: {:.2?}", now.elapsed());

    if cancel.is_cancelled() {
      return Err(PipelineError::Cancelled);
    }

    let select_config = SelectConfig {
      num_classes: self.config.num_classes(),
      topk: self.config.topk,
      iou_threshold: self.config.iou_threshold,
      score_threshold: self.config.score_threshold,
    };
    let selected = self
      .select
      .run(raw, &select_config)
      .map_err(|e| PipelineError::inference("select", e))?;
    if selected.shape()[0] != 1 {
      return Err(PipelineError::SelectedShape {
        shape: selected.shape().to_vec(),
      });
    }

    let row_count = selected.shape()[1];
    let max_size = model_width.max(model_height) as f32;
    let mut overlay = Overlay::zeros(model_height, model_width);
    let mut detections = Vec::with_capacity(row_count);

    // 行序即绘制顺序，后画的掩膜覆盖先画的
    for idx in 0..row_count {
      if cancel.is_cancelled() {
        return Err(PipelineError::Cancelled);
      }

      let row = selected.slice(s![0, idx, ..]).to_vec();
      let decoded = decode_row(&row, &self.config.labels, &self.palette, x_ratio, y_ratio, max_size)
        .map_err(|source| PipelineError::Decode { row: idx, source })?;

      let bbox = decoded.detection.bbox;
      let rgba = hex_to_rgba(decoded.detection.color, OVERLAY_ALPHA)
        .unwrap_or([255, 255, 255, OVERLAY_ALPHA]);
      let mask_config = MaskConfig {
        max_size,
        bbox: [bbox.x, bbox.y, bbox.width, bbox.height],
        rgba,
      };
      overlay = self
        .mask
        .run(&decoded.mask_input, &mask_basis, &mask_config, overlay)
        .map_err(|e| PipelineError::inference("mask", e))?;

      debug!(
        "检测 {}: {} {:.2} at ({:.0}, {:.0}, {:.0}x{:.0})",
        idx,
        decoded.detection.label,
        decoded.detection.score,
        bbox.x,
        bbox.y,
        bbox.width,
        bbox.height
      );
      detections.push(decoded.detection);
    }

    info!("检测到 {} 个物体", detections.len());
    Ok(SegmentResult {
      detections,
      overlay,
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn labels(n: usize) -> Vec<String> {
    (0..n).map(|i| format!("class-{i}")).collect()
  }

  #[test]
  fn test_config_validation() {
    assert!(PipelineConfig::with_labels(labels(2)).validate().is_ok());

    let mut config = PipelineConfig::with_labels(labels(2));
    config.topk = 0;
    assert!(matches!(
      config.validate(),
      Err(PipelineError::InvalidConfig(_))
    ));

    let mut config = PipelineConfig::with_labels(labels(2));
    config.iou_threshold = 1.0;
    assert!(config.validate().is_err());

    let mut config = PipelineConfig::with_labels(labels(2));
    config.score_threshold = 0.0;
    assert!(config.validate().is_err());

    let mut config = PipelineConfig::with_labels(labels(2));
    config.input_shape = [2, 3, 640, 640];
    assert!(config.validate().is_err());

    let config = PipelineConfig::with_labels(Vec::new());
    assert!(config.validate().is_err());
  }

  #[test]
  fn test_cancel_token() {
    let token = CancelToken::new();
    assert!(!token.is_cancelled());
    let shared = token.clone();
    shared.cancel();
    assert!(token.is_cancelled());
  }
}
