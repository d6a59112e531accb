// 该文件是 Moran （墨染） 项目的一部分。
// src/stage.rs - 推理阶段接口
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use ndarray::{Array3, Array4};

use crate::overlay::Overlay;

/// 检测阶段输出
///
/// `raw` 为候选检测张量 [1, 行宽, 候选数]，
/// `mask_basis` 为掩膜基底张量 [1, 系数数, 高, 宽]。
pub struct DetectOutput {
  pub raw: Array3<f32>,
  pub mask_basis: Array4<f32>,
}

/// 检测阶段：输入预处理张量，输出候选检测和掩膜基底
pub trait DetectStage {
  type Error: std::error::Error + Send + Sync + 'static;

  fn run(&mut self, input: Array4<f32>) -> Result<DetectOutput, Self::Error>;
}

/// 选择（NMS）阶段配置
#[derive(Debug, Clone, Copy)]
pub struct SelectConfig {
  pub num_classes: usize,
  pub topk: usize,
  pub iou_threshold: f32,
  pub score_threshold: f32,
}

/// 选择阶段：对候选检测做非极大值抑制
///
/// 输出 [1, 保留数, 行宽]，保留数不超过 topk × 类别数。
pub trait SelectStage {
  type Error: std::error::Error + Send + Sync + 'static;

  fn run(&mut self, raw: Array3<f32>, config: &SelectConfig) -> Result<Array3<f32>, Self::Error>;
}

/// 单个检测的掩膜绘制配置
#[derive(Debug, Clone, Copy)]
pub struct MaskConfig {
  /// 方形边界，两次裁剪共用
  pub max_size: f32,
  /// 放大后的边界框 [x, y, w, h]
  pub bbox: [f32; 4],
  /// 掩膜着色
  pub rgba: [u8; 4],
}

/// 掩膜阶段：把一个检测的分割掩膜绘制进覆盖层
///
/// 覆盖层按值传入传出，保证同一时刻只有一个活动实例。
pub trait MaskStage {
  type Error: std::error::Error + Send + Sync + 'static;

  fn run(
    &mut self,
    detection: &[f32],
    mask_basis: &Array4<f32>,
    config: &MaskConfig,
    overlay: Overlay,
  ) -> Result<Overlay, Self::Error>;
}

mod onnx;
pub use self::onnx::{
  OnnxDetector, OnnxMaskPainter, OnnxSelector, OnnxStageError, StageSet, StageSetBuilder,
};
