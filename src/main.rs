// 该文件是 Moran （墨染） 项目的一部分。
// src/main.rs - 项目主程序
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

mod args;

use anyhow::{Context, Result};
use clap::Parser;
use image::ImageReader;
use tracing::{info, warn};

use moran::labels::coco_labels;
use moran::output::{Render, SaveImageFileOutput, RecordJsonOutput, draw::Draw};
use moran::pipeline::{CancelToken, Pipeline, PipelineConfig};
use moran::stage::StageSetBuilder;

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = args::Args::parse();

  println!("Moran 实例分割演示");
  println!("==================");
  println!("检测模型: {}", args.detector.display());
  println!("选择模型: {}", args.selector.display());
  println!("掩膜模型: {}", args.mask.display());
  println!("输入图像: {}", args.input.display());
  println!("输出文件: {}", args.output.display());
  println!("置信度阈值: {}", args.score_threshold);
  println!("NMS 阈值: {}", args.iou_threshold);
  println!();

  info!("读取输入图像: {}", args.input.display());
  let image = ImageReader::open(&args.input)
    .with_context(|| format!("无法打开图像: {}", args.input.display()))?
    .decode()
    .with_context(|| format!("无法解码图像: {}", args.input.display()))?
    .to_rgba8();
  info!("图像尺寸: {}x{}", image.width(), image.height());

  let stages = StageSetBuilder::new(&args.detector, &args.selector, &args.mask).build()?;

  let config = PipelineConfig {
    input_shape: [1, 3, args.model_width, args.model_height],
    topk: args.topk,
    iou_threshold: args.iou_threshold,
    score_threshold: args.score_threshold,
    labels: coco_labels(),
  };
  let mut pipeline = Pipeline::new(stages.detector, stages.selector, stages.mask, config)?;

  let cancel = CancelToken::new();
  {
    let cancel = cancel.clone();
    ctrlc::set_handler(move || {
      warn!("收到中断信号, 取消当前检测");
      cancel.cancel();
    })
    .expect("Error setting Ctrl-C handler");
  }

  info!("开始推理...");
  let now = std::time::Instant::now();
  let result = pipeline.process(&image, &cancel)?;
  info!("推理完成，耗时: {:.2?}", now.elapsed());

  println!("检测到 {} 个对象", result.detections.len());
  for detection in &result.detections {
    println!(
      "  - {}: {:.2}% at ({:.0}, {:.0}, {:.0}x{:.0})",
      detection.label,
      detection.score * 100.0,
      detection.bbox.x,
      detection.bbox.y,
      detection.bbox.width,
      detection.bbox.height
    );
  }

  let mut draw = Draw::default();
  if let Some(font) = &args.font {
    draw = draw.with_font_file(font)?;
  }
  let output = SaveImageFileOutput::new(&args.output, draw);
  output.render_result(&image, &result)?;

  if let Some(record) = &args.record {
    RecordJsonOutput::new(record).render_result(&image, &result)?;
  }

  println!();
  println!("处理完成!");
  println!("输出文件: {}", args.output.display());

  Ok(())
}
