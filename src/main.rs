// 该文件是 Qiezhen （切帧） 项目的一部分。
// src/main.rs - 项目主程序
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

mod args;

use std::{thread, time::Duration};

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{Level, error, info, warn};

use qiezhen::{
  FromUrl,
  annotation::AnnotationEncoder,
  input::GStreamerVideoSource,
  model::{Detector, Yolo26Builder},
  output::{DatasetLayout, DatasetWriter, Render},
  task::{ExtractTask, StopSignal, Task, TaskError},
};

fn open_preview(url: &url::Url) -> Option<Box<dyn Render>> {
  #[cfg(feature = "preview")]
  {
    match qiezhen::output::PreviewWrapper::from_url(url) {
      Ok(preview) => return Some(Box::new(preview)),
      Err(e) => warn!("无法打开预览 {}: {}", url, e),
    }
  }
  #[cfg(not(feature = "preview"))]
  warn!("未启用预览功能，忽略 {}", url);
  None
}

fn main() -> Result<()> {
  let args = args::Args::parse();

  tracing_subscriber::fmt()
    .with_max_level(if args.verbose { Level::DEBUG } else { Level::INFO })
    .init();

  info!("模型地址: {}", args.model);
  info!("视频目录: {}", args.input.display());
  info!("输出目录: {}", args.output.display());
  info!("置信度阈值: {}, 采样间隔: {}", args.confidence, args.stride);

  let builder = Yolo26Builder::from_url(&args.model)?;
  let object_thresh = builder.threshold().min(args.confidence);
  let model = builder
    .object_thresh(object_thresh)
    .build()
    .context("模型加载失败")?;
  let detector = Detector::new(model).with_confidence(args.confidence);

  let layout = DatasetLayout::new(&args.output);
  layout.ensure().context("无法创建输出目录")?;
  let encoder = AnnotationEncoder::new().with_clamp(args.clamp);
  let writer = DatasetWriter::new(layout)
    .with_encoder(encoder)
    .with_jpeg_quality(args.jpeg_quality);

  let source = GStreamerVideoSource::new()?;
  let preview = args.preview.as_ref().and_then(open_preview);

  let stop = StopSignal::new();
  let handler_stop = stop.clone();
  ctrlc::set_handler(move || match handler_stop.request() {
    1 => info!("收到中断信号，结束当前视频..."),
    2 => warn!("再次收到中断信号，停止批处理..."),
    _ => {
      thread::spawn(|| {
        thread::sleep(Duration::from_secs(1));
        warn!("强制退出程序");
        std::process::exit(130);
      });
    }
  })
  .context("无法设置 Ctrl-C 处理函数")?;

  let task = ExtractTask::new(&args.input)
    .with_stride(args.stride)
    .with_stop_signal(stop)
    .with_preview(preview);

  match task.run_task(source, detector, writer) {
    Ok(summary) => {
      info!(
        "完成: {} 个视频，保存 {} 帧，{} 个类别",
        summary.videos_processed, summary.frames_saved, summary.classes_written
      );
      Ok(())
    }
    Err(TaskError::NoInput(dir)) => {
      error!("在 {} 中没有找到视频文件", dir.display());
      Ok(())
    }
    Err(e) => Err(e.into()),
  }
}
