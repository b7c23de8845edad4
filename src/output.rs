// 该文件是 Qiezhen （切帧） 项目的一部分。
// src/output.rs - 输出定义
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use thiserror::Error;
#[cfg(feature = "preview")]
use url::Url;

#[cfg(feature = "preview")]
use crate::{FromUrl, FromUrlWithScheme};
use crate::{
  frame::SampledFrame,
  model::{ClassNames, Detection},
};

mod dataset;
pub use self::dataset::{
  CLASSES_FILE, DEFAULT_JPEG_QUALITY, DatasetLayout, DatasetWriter, FrameOutcome, IMAGES_DIR,
  LABELS_DIR, SkipReason, WriteError,
};

#[cfg(feature = "preview")]
pub mod draw;

#[cfg(feature = "preview")]
mod directory_preview;
#[cfg(feature = "preview")]
pub use self::directory_preview::DirectoryPreview;

#[cfg(feature = "gstreamer_preview")]
mod gstreamer_preview;
#[cfg(feature = "gstreamer_preview")]
pub use self::gstreamer_preview::GStreamerPreview;

#[derive(Error, Debug)]
pub enum PreviewError {
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("字体无效: {0}")]
  FontError(String),
  #[error("预览管道错误: {0}")]
  PipelineError(String),
}

/// 预览输出：只用于调试观察，不影响数据集内容
pub trait Render {
  fn render_result(
    &self,
    frame: &SampledFrame,
    detections: &[Detection],
    class_names: &ClassNames,
  ) -> Result<(), PreviewError>;

  /// 预览端请求停止当前视频（例如窗口被关闭）
  fn stop_requested(&self) -> bool {
    false
  }
}

impl<R: Render + ?Sized> Render for Box<R> {
  fn render_result(
    &self,
    frame: &SampledFrame,
    detections: &[Detection],
    class_names: &ClassNames,
  ) -> Result<(), PreviewError> {
    (**self).render_result(frame, detections, class_names)
  }

  fn stop_requested(&self) -> bool {
    (**self).stop_requested()
  }
}

#[cfg(feature = "preview")]
pub enum PreviewWrapper {
  Directory(DirectoryPreview),
  #[cfg(feature = "gstreamer_preview")]
  Window(GStreamerPreview),
}

#[cfg(feature = "preview")]
impl FromUrl for PreviewWrapper {
  type Error = PreviewError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    match url.scheme() {
      s if s == DirectoryPreview::SCHEME => {
        Ok(PreviewWrapper::Directory(DirectoryPreview::from_url(url)?))
      }
      #[cfg(feature = "gstreamer_preview")]
      s if s == GStreamerPreview::SCHEME => {
        Ok(PreviewWrapper::Window(GStreamerPreview::from_url(url)?))
      }
      other => Err(PreviewError::SchemeMismatch(other.to_string())),
    }
  }
}

#[cfg(feature = "preview")]
impl Render for PreviewWrapper {
  fn render_result(
    &self,
    frame: &SampledFrame,
    detections: &[Detection],
    class_names: &ClassNames,
  ) -> Result<(), PreviewError> {
    match self {
      PreviewWrapper::Directory(output) => output.render_result(frame, detections, class_names),
      #[cfg(feature = "gstreamer_preview")]
      PreviewWrapper::Window(output) => output.render_result(frame, detections, class_names),
    }
  }

  fn stop_requested(&self) -> bool {
    match self {
      PreviewWrapper::Directory(output) => output.stop_requested(),
      #[cfg(feature = "gstreamer_preview")]
      PreviewWrapper::Window(output) => output.stop_requested(),
    }
  }
}
