// 该文件是 Qiezhen （切帧） 项目的一部分。
// src/output/gstreamer_preview.rs - GStreamer 窗口预览
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

//! # GStreamer 窗口预览
//!
//! 把画好检测框的采样帧推送到 `autovideosink` 窗口。
//!
//! ## URL Scheme
//!
//! `window://?font=/path/to/font.ttf&fps=5`
//!
//! 关闭窗口（管道报错或结束）会请求停止当前视频。

use std::cell::Cell;

use gstreamer::{self as gst, prelude::*};
use gstreamer_app as gst_app;
use tracing::{info, warn};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::SampledFrame,
  model::{ClassNames, Detection},
  output::{PreviewError, Render, draw::Draw},
  url_query,
};

const PREVIEW_PIPELINE: &str =
  "appsrc name=src is-live=true format=time ! videoconvert ! autovideosink sync=false";
const DEFAULT_PREVIEW_FPS: u64 = 5;

pub struct GStreamerPreview {
  pipeline: gst::Pipeline,
  appsrc: gst_app::AppSrc,
  draw: Draw,
  fps: u64,
  dimensions: Cell<(u32, u32)>,
  frame_count: Cell<u64>,
  window: WindowState,
}

/// 窗口关闭只上报一次，之后不再推送帧
#[derive(Debug, Default)]
struct WindowState {
  closed: Cell<bool>,
}

impl WindowState {
  fn is_closed(&self) -> bool {
    self.closed.get()
  }

  /// 标记窗口已关闭，只有第一次调用返回 true
  fn close(&self) -> bool {
    !self.closed.replace(true)
  }
}

impl FromUrlWithScheme for GStreamerPreview {
  const SCHEME: &'static str = "window";
}

impl FromUrl for GStreamerPreview {
  type Error = PreviewError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(PreviewError::SchemeMismatch(url.scheme().to_string()));
    }

    let draw = match url_query(url, "font") {
      Some(font) => Draw::with_font_file(std::path::Path::new(&font))?,
      None => Draw::default(),
    };
    let fps = url_query(url, "fps")
      .and_then(|v| v.parse::<u64>().ok())
      .filter(|fps| *fps > 0)
      .unwrap_or(DEFAULT_PREVIEW_FPS);

    gst::init().map_err(|e| PreviewError::PipelineError(e.to_string()))?;

    info!("创建预览管道: {}", PREVIEW_PIPELINE);
    let pipeline = gst::parse::launch(PREVIEW_PIPELINE)
      .map_err(|e| PreviewError::PipelineError(e.to_string()))?
      .downcast::<gst::Pipeline>()
      .map_err(|_| PreviewError::PipelineError("无法创建管道".to_string()))?;

    let appsrc = pipeline
      .by_name("src")
      .ok_or_else(|| PreviewError::PipelineError("找不到 appsrc 元素".to_string()))?
      .downcast::<gst_app::AppSrc>()
      .map_err(|_| PreviewError::PipelineError("无法转换为 appsrc".to_string()))?;

    pipeline
      .set_state(gst::State::Playing)
      .map_err(|e| PreviewError::PipelineError(e.to_string()))?;

    Ok(GStreamerPreview {
      pipeline,
      appsrc,
      draw,
      fps,
      dimensions: Cell::new((0, 0)),
      frame_count: Cell::new(0),
      window: WindowState::default(),
    })
  }
}

impl Drop for GStreamerPreview {
  fn drop(&mut self) {
    let _ = self.appsrc.end_of_stream();
    if let Err(e) = self.pipeline.set_state(gst::State::Null) {
      warn!("停止预览管道失败: {}", e);
    }
    info!("预览结束，共显示 {} 帧", self.frame_count.get());
  }
}

impl GStreamerPreview {
  fn update_caps(&self, width: u32, height: u32) {
    if self.dimensions.get() == (width, height) {
      return;
    }
    let caps = gst::Caps::builder("video/x-raw")
      .field("format", "RGB")
      .field("width", width as i32)
      .field("height", height as i32)
      .field("framerate", gst::Fraction::new(self.fps as i32, 1))
      .build();
    self.appsrc.set_caps(Some(&caps));
    self.dimensions.set((width, height));
  }

  fn push_frame(&self, image: &image::RgbImage) -> Result<(), PreviewError> {
    let (width, height) = image.dimensions();
    self.update_caps(width, height);

    // GStreamer 的 RGB 行按 4 字节对齐
    let row = width as usize * 3;
    let stride = (row + 3) & !3;
    let mut data = vec![0u8; stride * height as usize];
    for (y, line) in image.as_raw().chunks_exact(row).enumerate() {
      data[y * stride..y * stride + row].copy_from_slice(line);
    }

    let index = self.frame_count.get();
    let mut buffer = gst::Buffer::from_mut_slice(data);
    {
      let buffer_ref = buffer
        .get_mut()
        .ok_or_else(|| PreviewError::PipelineError("缓冲区不可写".to_string()))?;
      buffer_ref.set_pts(gst::ClockTime::from_nseconds(index * 1_000_000_000 / self.fps));
      buffer_ref.set_duration(gst::ClockTime::from_nseconds(1_000_000_000 / self.fps));
    }
    self.frame_count.set(index + 1);

    self
      .appsrc
      .push_buffer(buffer)
      .map_err(|e| PreviewError::PipelineError(format!("推送缓冲区失败: {:?}", e)))?;
    Ok(())
  }
}

impl Render for GStreamerPreview {
  fn render_result(
    &self,
    frame: &SampledFrame,
    detections: &[Detection],
    class_names: &ClassNames,
  ) -> Result<(), PreviewError> {
    if self.window.is_closed() || frame.width() == 0 || frame.height() == 0 {
      return Ok(());
    }
    let image = self
      .draw
      .draw_detections(frame.image(), detections, class_names);
    self.push_frame(&image)
  }

  fn stop_requested(&self) -> bool {
    if self.window.is_closed() {
      return false;
    }
    let Some(bus) = self.pipeline.bus() else {
      return false;
    };
    match bus.pop_filtered(&[gst::MessageType::Error, gst::MessageType::Eos]) {
      Some(msg) => {
        warn!("预览窗口已关闭: {:?}，不再显示后续帧", msg.type_());
        self.window.close()
      }
      None => false,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn window_close_is_reported_once() {
    let window = WindowState::default();
    assert!(!window.is_closed());
    assert!(window.close());
    assert!(window.is_closed());
    assert!(!window.close());
  }
}
