// 该文件是 Qiezhen （切帧） 项目的一部分。
// src/args.rs - 命令行参数
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::{num::NonZeroU64, path::PathBuf};

use clap::Parser;
use url::Url;

/// Qiezhen 视频抽帧标注工具
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 视频目录（*.mp4, *.avi, *.mov）
  #[arg(long, default_value = "videos", value_name = "DIR")]
  pub input: PathBuf,

  /// 数据集输出目录
  #[arg(long, default_value = "output", value_name = "DIR")]
  pub output: PathBuf,

  /// 模型地址，例如 yolo26:///path/to/model.rknn?labels=classes.json
  #[arg(long, value_name = "MODEL")]
  pub model: Url,

  /// 置信度阈值 (0.0 - 1.0)
  #[arg(long, default_value = "0.3", value_name = "THRESHOLD")]
  pub confidence: f32,

  /// 采样间隔（每 N 帧取一帧）
  #[arg(long, default_value = "10", value_name = "N")]
  pub stride: NonZeroU64,

  /// 把归一化坐标裁剪到 [0, 1]
  #[arg(long)]
  pub clamp: bool,

  /// JPEG 质量 (1 - 100)
  #[arg(long, default_value = "95", value_name = "QUALITY",
    value_parser = clap::value_parser!(u8).range(1..=100))]
  pub jpeg_quality: u8,

  /// 预览输出，例如 folder:///tmp/preview 或 window://?fps=5
  #[arg(long, value_name = "PREVIEW")]
  pub preview: Option<Url>,

  /// 输出调试日志
  #[arg(long, short)]
  pub verbose: bool,
}
