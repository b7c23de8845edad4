// 该文件是 Qiezhen （切帧） 项目的一部分。
// src/input.rs - 视频输入
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::frame::IntoRgbImage;

mod sampler;
pub use self::sampler::{DEFAULT_STRIDE, FrameSampler};

#[cfg(feature = "gstreamer_input")]
mod gstreamer_input;
#[cfg(feature = "gstreamer_input")]
pub use self::gstreamer_input::{GStreamerFrame, GStreamerFrames, GStreamerVideoSource};

#[derive(Error, Debug)]
pub enum DecodeError {
  #[error("无法打开视频 {path}: {reason}")]
  Open { path: PathBuf, reason: String },
  #[error("视频解码失败: {0}")]
  Stream(String),
  #[error("不支持的像素格式: {0}")]
  UnsupportedFormat(String),
  #[error("缓冲区大小不匹配: 期望 {expected} 字节, 实际 {actual} 字节")]
  BufferSizeMismatch { expected: usize, actual: usize },
}

impl DecodeError {
  pub fn open(path: &Path, reason: impl ToString) -> Self {
    DecodeError::Open {
      path: path.to_path_buf(),
      reason: reason.to_string(),
    }
  }
}

/// 视频解码能力：给定文件路径，按顺序产生视频帧，流结束时迭代结束
pub trait VideoSource {
  type Frame: IntoRgbImage;
  type Frames: Iterator<Item = Result<Self::Frame, DecodeError>>;

  fn open(&self, path: &Path) -> Result<Self::Frames, DecodeError>;
}

impl<S: VideoSource + ?Sized> VideoSource for &S {
  type Frame = S::Frame;
  type Frames = S::Frames;

  fn open(&self, path: &Path) -> Result<Self::Frames, DecodeError> {
    (**self).open(path)
  }
}
