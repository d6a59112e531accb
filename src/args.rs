// 该文件是 Moran （墨染） 项目的一部分。
// src/args.rs - 项目参数配置
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::path::PathBuf;

use clap::Parser;

/// Moran 项目参数配置
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 检测模型（YOLO 分割 ONNX）文件路径
  #[arg(long, value_name = "FILE")]
  pub detector: PathBuf,

  /// 选择（NMS）模型文件路径
  #[arg(long, value_name = "FILE")]
  pub selector: PathBuf,

  /// 掩膜合成模型文件路径
  #[arg(long, value_name = "FILE")]
  pub mask: PathBuf,

  /// 输入图像路径
  /// 支持格式: *.jpg, *.jpeg, *.png
  #[arg(long, value_name = "IMAGE")]
  pub input: PathBuf,

  /// 输出图像路径
  #[arg(long, value_name = "OUTPUT")]
  pub output: PathBuf,

  /// 标签字体文件路径（缺省时只画边框不画文字）
  #[arg(long, value_name = "FONT")]
  pub font: Option<PathBuf>,

  /// 检测结果 JSON 记录路径
  #[arg(long, value_name = "JSON")]
  pub record: Option<PathBuf>,

  /// 模型输入宽度
  #[arg(long, default_value = "640", value_name = "SIZE")]
  pub model_width: usize,

  /// 模型输入高度
  #[arg(long, default_value = "640", value_name = "SIZE")]
  pub model_height: usize,

  /// 每个类别保留的最大检测数
  #[arg(long, default_value = "100", value_name = "COUNT")]
  pub topk: usize,

  /// NMS IOU 阈值 (0.0 - 1.0)
  #[arg(long, default_value = "0.45", value_name = "THRESHOLD")]
  pub iou_threshold: f32,

  /// 置信度阈值 (0.0 - 1.0)
  #[arg(long, default_value = "0.25", value_name = "THRESHOLD")]
  pub score_threshold: f32,
}
