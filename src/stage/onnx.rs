// 该文件是 Moran （墨染） 项目的一部分。
// src/stage/onnx.rs - ONNX Runtime 推理阶段实现
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::path::{Path, PathBuf};

use ndarray::{Array3, Array4};
use ort::{inputs, session::Session, value::Tensor};
use thiserror::Error;
use tracing::{debug, error, info};

use crate::overlay::Overlay;
use crate::stage::{DetectOutput, DetectStage, MaskConfig, MaskStage, SelectConfig, SelectStage};

// 三个模型约定的张量名称
const DETECT_INPUT: &str = "images";
const DETECT_RAW_OUTPUT: &str = "output0";
const DETECT_BASIS_OUTPUT: &str = "output1";
const SELECT_DETECTION_INPUT: &str = "detection";
const SELECT_CONFIG_INPUT: &str = "config";
const SELECT_OUTPUT: &str = "selected";
const MASK_DETECTION_INPUT: &str = "detection";
const MASK_BASIS_INPUT: &str = "mask";
const MASK_CONFIG_INPUT: &str = "config";
const MASK_OVERLAY_INPUT: &str = "overlay";
const MASK_OUTPUT: &str = "mask_filter";

#[derive(Error, Debug)]
pub enum OnnxStageError {
  #[error("ONNX Runtime 错误: {0}")]
  Ort(#[from] ort::Error),
  #[error("模型无效: {0}")]
  ModelInvalid(String),
  #[error("缺少输出张量: {name}")]
  MissingOutput { name: &'static str },
  #[error("输出 {name} 形状不符合预期: {shape:?}")]
  BadShape { name: &'static str, shape: Vec<i64> },
}

/// 检测阶段（YOLO 分割模型）
pub struct OnnxDetector {
  session: Session,
}

/// 选择阶段（NMS 模型）
pub struct OnnxSelector {
  session: Session,
}

/// 掩膜阶段（掩膜合成模型）
pub struct OnnxMaskPainter {
  session: Session,
}

impl DetectStage for OnnxDetector {
  type Error = OnnxStageError;

  fn run(&mut self, input: Array4<f32>) -> Result<DetectOutput, Self::Error> {
    let shape = input.shape().to_vec();
    let (data, _offset) = input.into_raw_vec_and_offset();
    let tensor = Tensor::from_array(([shape[0], shape[1], shape[2], shape[3]], data))?;

    debug!("执行检测模型, 输入形状 {:?}", shape);
    let outputs = self.session.run(inputs![DETECT_INPUT => tensor])?;

    let raw_value = outputs
      .get(DETECT_RAW_OUTPUT)
      .ok_or(OnnxStageError::MissingOutput {
        name: DETECT_RAW_OUTPUT,
      })?;
    let (raw_shape, raw_data) = raw_value.try_extract_tensor::<f32>()?;
    if raw_shape.len() != 3 || raw_shape[0] != 1 {
      return Err(OnnxStageError::BadShape {
        name: DETECT_RAW_OUTPUT,
        shape: raw_shape.to_vec(),
      });
    }
    let raw = Array3::from_shape_vec(
      (
        raw_shape[0] as usize,
        raw_shape[1] as usize,
        raw_shape[2] as usize,
      ),
      raw_data.to_vec(),
    )
    .map_err(|_| OnnxStageError::BadShape {
      name: DETECT_RAW_OUTPUT,
      shape: raw_shape.to_vec(),
    })?;

    let basis_value = outputs
      .get(DETECT_BASIS_OUTPUT)
      .ok_or(OnnxStageError::MissingOutput {
        name: DETECT_BASIS_OUTPUT,
      })?;
    let (basis_shape, basis_data) = basis_value.try_extract_tensor::<f32>()?;
    if basis_shape.len() != 4 || basis_shape[0] != 1 {
      return Err(OnnxStageError::BadShape {
        name: DETECT_BASIS_OUTPUT,
        shape: basis_shape.to_vec(),
      });
    }
    let mask_basis = Array4::from_shape_vec(
      (
        basis_shape[0] as usize,
        basis_shape[1] as usize,
        basis_shape[2] as usize,
        basis_shape[3] as usize,
      ),
      basis_data.to_vec(),
    )
    .map_err(|_| OnnxStageError::BadShape {
      name: DETECT_BASIS_OUTPUT,
      shape: basis_shape.to_vec(),
    })?;

    debug!(
      "检测完成, 候选 {:?}, 掩膜基底 {:?}",
      raw.shape(),
      mask_basis.shape()
    );
    Ok(DetectOutput { raw, mask_basis })
  }
}

impl SelectStage for OnnxSelector {
  type Error = OnnxStageError;

  fn run(&mut self, raw: Array3<f32>, config: &SelectConfig) -> Result<Array3<f32>, Self::Error> {
    let raw_shape = raw.shape().to_vec();
    let (raw_data, _offset) = raw.into_raw_vec_and_offset();
    let detection = Tensor::from_array(([raw_shape[0], raw_shape[1], raw_shape[2]], raw_data))?;
    let config_tensor = Tensor::from_array((
      [4usize],
      vec![
        config.num_classes as f32,
        config.topk as f32,
        config.iou_threshold,
        config.score_threshold,
      ],
    ))?;

    debug!(
      "执行选择模型, 类别数 {}, topk {}, IOU {}, 置信度 {}",
      config.num_classes, config.topk, config.iou_threshold, config.score_threshold
    );
    let outputs = self.session.run(inputs![
      SELECT_DETECTION_INPUT => detection,
      SELECT_CONFIG_INPUT => config_tensor
    ])?;

    let selected_value = outputs
      .get(SELECT_OUTPUT)
      .ok_or(OnnxStageError::MissingOutput { name: SELECT_OUTPUT })?;
    let (shape, data) = selected_value.try_extract_tensor::<f32>()?;
    if shape.len() != 3 || shape[0] != 1 {
      return Err(OnnxStageError::BadShape {
        name: SELECT_OUTPUT,
        shape: shape.to_vec(),
      });
    }
    let selected = Array3::from_shape_vec(
      (shape[0] as usize, shape[1] as usize, shape[2] as usize),
      data.to_vec(),
    )
    .map_err(|_| OnnxStageError::BadShape {
      name: SELECT_OUTPUT,
      shape: shape.to_vec(),
    })?;

    debug!("选择完成, 保留 {} 个检测", selected.shape()[1]);
    Ok(selected)
  }
}

impl MaskStage for OnnxMaskPainter {
  type Error = OnnxStageError;

  fn run(
    &mut self,
    detection: &[f32],
    mask_basis: &Array4<f32>,
    config: &MaskConfig,
    overlay: Overlay,
  ) -> Result<Overlay, Self::Error> {
    let detection_tensor = Tensor::from_array(([detection.len()], detection.to_vec()))?;

    let basis_shape = mask_basis.shape().to_vec();
    let basis_data: Vec<f32> = mask_basis.iter().copied().collect();
    let basis_tensor = Tensor::from_array((
      [
        basis_shape[0],
        basis_shape[1],
        basis_shape[2],
        basis_shape[3],
      ],
      basis_data,
    ))?;

    let [x, y, w, h] = config.bbox;
    let config_tensor = Tensor::from_array((
      [9usize],
      vec![
        config.max_size,
        x,
        y,
        w,
        h,
        config.rgba[0] as f32,
        config.rgba[1] as f32,
        config.rgba[2] as f32,
        config.rgba[3] as f32,
      ],
    ))?;

    let (height, width, overlay_data) = overlay.into_raw();
    let overlay_tensor = Tensor::from_array(([height, width, 4], overlay_data))?;

    let outputs = self.session.run(inputs![
      MASK_DETECTION_INPUT => detection_tensor,
      MASK_BASIS_INPUT => basis_tensor,
      MASK_CONFIG_INPUT => config_tensor,
      MASK_OVERLAY_INPUT => overlay_tensor
    ])?;

    let painted_value = outputs
      .get(MASK_OUTPUT)
      .ok_or(OnnxStageError::MissingOutput { name: MASK_OUTPUT })?;
    let (shape, data) = painted_value.try_extract_tensor::<u8>()?;
    if shape.len() != 3 || shape[2] != 4 {
      return Err(OnnxStageError::BadShape {
        name: MASK_OUTPUT,
        shape: shape.to_vec(),
      });
    }
    Overlay::from_raw(shape[0] as usize, shape[1] as usize, data.to_vec()).ok_or(
      OnnxStageError::BadShape {
        name: MASK_OUTPUT,
        shape: shape.to_vec(),
      },
    )
  }
}

/// 三个阶段的会话集合
pub struct StageSet {
  pub detector: OnnxDetector,
  pub selector: OnnxSelector,
  pub mask: OnnxMaskPainter,
}

/// 按模型路径构建三个推理阶段
pub struct StageSetBuilder {
  detector_path: PathBuf,
  selector_path: PathBuf,
  mask_path: PathBuf,
}

impl StageSetBuilder {
  pub fn new(
    detector_path: impl Into<PathBuf>,
    selector_path: impl Into<PathBuf>,
    mask_path: impl Into<PathBuf>,
  ) -> Self {
    StageSetBuilder {
      detector_path: detector_path.into(),
      selector_path: selector_path.into(),
      mask_path: mask_path.into(),
    }
  }

  pub fn build(self) -> Result<StageSet, OnnxStageError> {
    info!("加载检测模型: {}", self.detector_path.display());
    let detector = load_session(&self.detector_path, 1, 2)?;
    info!("加载选择模型: {}", self.selector_path.display());
    let selector = load_session(&self.selector_path, 2, 1)?;
    info!("加载掩膜模型: {}", self.mask_path.display());
    let mask = load_session(&self.mask_path, 4, 1)?;
    info!("模型加载完成");

    Ok(StageSet {
      detector: OnnxDetector { session: detector },
      selector: OnnxSelector { session: selector },
      mask: OnnxMaskPainter { session: mask },
    })
  }
}

fn load_session(
  path: &Path,
  num_inputs: usize,
  num_outputs: usize,
) -> Result<Session, OnnxStageError> {
  let session = Session::builder()?.commit_from_file(path)?;

  if session.inputs.len() != num_inputs {
    error!(
      "预期模型输入数量为 {}, 实际为 {}",
      num_inputs,
      session.inputs.len()
    );
    return Err(OnnxStageError::ModelInvalid(format!(
      "预期模型输入数量为 {}, 实际为 {}",
      num_inputs,
      session.inputs.len()
    )));
  }
  if session.outputs.len() != num_outputs {
    error!(
      "预期模型输出数量为 {}, 实际为 {}",
      num_outputs,
      session.outputs.len()
    );
    return Err(OnnxStageError::ModelInvalid(format!(
      "预期模型输出数量为 {}, 实际为 {}",
      num_outputs,
      session.outputs.len()
    )));
  }

  debug!(
    "模型输入: {:?}",
    session
      .inputs
      .iter()
      .map(|input| input.name.as_str())
      .collect::<Vec<_>>()
  );
  debug!(
    "模型输出: {:?}",
    session
      .outputs
      .iter()
      .map(|output| output.name.as_str())
      .collect::<Vec<_>>()
  );

  Ok(session)
}
