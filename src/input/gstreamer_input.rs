// 该文件是 Qiezhen （切帧） 项目的一部分。
// src/input/gstreamer_input.rs - GStreamer 视频文件解码
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

//! # GStreamer 视频文件解码
//!
//! 使用 `decodebin` 解码任意容器/编码的视频文件，逐帧输出 RGB 图像。
//! 管道形如：
//!
//! ```text
//! filesrc location=<path> ! decodebin ! videoconvert ! video/x-raw,format=RGB ! appsink
//! ```
//!
//! appsink 不丢帧，以保证帧序号与视频中的帧一一对应。
//!
//! ## 系统依赖
//!
//! **Ubuntu/Debian:**
//! ```bash
//! sudo apt-get install libgstreamer1.0-dev libgstreamer-plugins-base1.0-dev
//! ```

use std::path::Path;

use gstreamer::{self as gst, prelude::*};
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use image::RgbImage;
use tracing::{debug, info, warn};

use crate::{
  frame::IntoRgbImage,
  input::{DecodeError, VideoSource},
};

const PIPELINE_DESCRIPTION: &str = "filesrc name=src ! decodebin ! videoconvert ! \
  video/x-raw,format=RGB ! appsink name=sink sync=false max-buffers=4 drop=false";

/// 等待管道进入播放状态的最长时间
const OPEN_TIMEOUT_SECS: u64 = 10;

/// GStreamer 视频解码能力
#[derive(Debug, Default, Clone, Copy)]
pub struct GStreamerVideoSource;

impl GStreamerVideoSource {
  pub fn new() -> Result<Self, DecodeError> {
    gst::init().map_err(|e| DecodeError::Stream(format!("GStreamer 初始化失败: {}", e)))?;
    Ok(GStreamerVideoSource)
  }
}

impl VideoSource for GStreamerVideoSource {
  type Frame = GStreamerFrame;
  type Frames = GStreamerFrames;

  fn open(&self, path: &Path) -> Result<Self::Frames, DecodeError> {
    if !path.is_file() {
      return Err(DecodeError::open(path, "文件不存在"));
    }

    let pipeline = gst::parse::launch(PIPELINE_DESCRIPTION)
      .map_err(|e| DecodeError::open(path, e))?
      .downcast::<gst::Pipeline>()
      .map_err(|_| DecodeError::open(path, "无法创建管道"))?;

    let filesrc = pipeline
      .by_name("src")
      .ok_or_else(|| DecodeError::open(path, "找不到 filesrc 元素"))?;
    let location = path.to_string_lossy().into_owned();
    filesrc.set_property("location", location.as_str());

    let appsink = pipeline
      .by_name("sink")
      .ok_or_else(|| DecodeError::open(path, "找不到 appsink 元素"))?
      .downcast::<gst_app::AppSink>()
      .map_err(|_| DecodeError::open(path, "无法转换为 appsink"))?;

    // 从这里开始由 GStreamerFrames 负责在 Drop 时停止管道
    let frames = GStreamerFrames {
      pipeline,
      appsink,
      finished: false,
    };

    frames
      .pipeline
      .set_state(gst::State::Playing)
      .map_err(|_| DecodeError::open(path, frames.bus_error()))?;

    let (state, current, _) = frames
      .pipeline
      .state(gst::ClockTime::from_seconds(OPEN_TIMEOUT_SECS));
    if state.is_err() {
      return Err(DecodeError::open(path, frames.bus_error()));
    }

    info!("视频已打开: {} (状态 {:?})", path.display(), current);
    Ok(frames)
  }
}

/// 解码出的一帧（GStreamer sample），被采样时才转换为 RGB 图像
pub struct GStreamerFrame(gst::Sample);

impl IntoRgbImage for GStreamerFrame {
  fn into_rgb_image(self) -> Result<RgbImage, DecodeError> {
    convert_sample_to_rgb(&self.0)
  }
}

/// 视频帧迭代器
pub struct GStreamerFrames {
  pipeline: gst::Pipeline,
  appsink: gst_app::AppSink,
  finished: bool,
}

impl GStreamerFrames {
  fn bus_error(&self) -> String {
    self
      .pipeline
      .bus()
      .and_then(|bus| bus.pop_filtered(&[gst::MessageType::Error]))
      .and_then(|msg| match msg.view() {
        gst::MessageView::Error(err) => Some(format!(
          "{} ({:?})",
          err.error(),
          err.debug().map(|d| d.to_string())
        )),
        _ => None,
      })
      .unwrap_or_else(|| "未知错误".to_string())
  }
}

impl Drop for GStreamerFrames {
  fn drop(&mut self) {
    if let Err(e) = self.pipeline.set_state(gst::State::Null) {
      warn!("停止 GStreamer 管道失败: {}", e);
    }
  }
}

impl Iterator for GStreamerFrames {
  type Item = Result<GStreamerFrame, DecodeError>;

  fn next(&mut self) -> Option<Self::Item> {
    if self.finished {
      return None;
    }

    match self.appsink.pull_sample() {
      Ok(sample) => Some(Ok(GStreamerFrame(sample))),
      Err(_) => {
        self.finished = true;
        if self.appsink.is_eos() {
          debug!("GStreamer 流结束");
          None
        } else {
          Some(Err(DecodeError::Stream(self.bus_error())))
        }
      }
    }
  }
}

fn convert_sample_to_rgb(sample: &gst::Sample) -> Result<RgbImage, DecodeError> {
  let buffer = sample
    .buffer()
    .ok_or_else(|| DecodeError::Stream("sample 中没有缓冲区".to_string()))?;
  let caps = sample
    .caps()
    .ok_or_else(|| DecodeError::Stream("sample 中没有 caps".to_string()))?;

  let video_info = gst_video::VideoInfo::from_caps(caps)
    .map_err(|_| DecodeError::Stream("无法从 caps 获取视频信息".to_string()))?;

  let width = video_info.width() as usize;
  let height = video_info.height() as usize;
  // RGB 每行可能按 4 字节对齐
  let stride = video_info.stride()[0] as usize;

  let map = buffer
    .map_readable()
    .map_err(|e| DecodeError::Stream(format!("无法映射缓冲区: {}", e)))?;
  let data = map.as_slice();

  let expected = if height == 0 {
    0
  } else {
    stride * (height - 1) + width * 3
  };
  if data.len() < expected {
    return Err(DecodeError::BufferSizeMismatch {
      expected,
      actual: data.len(),
    });
  }

  let swap = match video_info.format() {
    gst_video::VideoFormat::Rgb => false,
    gst_video::VideoFormat::Bgr => true,
    other => return Err(DecodeError::UnsupportedFormat(format!("{:?}", other))),
  };

  let mut pixels = Vec::with_capacity(width * height * 3);
  for row in 0..height {
    let line = &data[row * stride..row * stride + width * 3];
    if swap {
      for px in line.chunks_exact(3) {
        pixels.extend_from_slice(&[px[2], px[1], px[0]]);
      }
    } else {
      pixels.extend_from_slice(line);
    }
  }

  RgbImage::from_raw(width as u32, height as u32, pixels).ok_or(DecodeError::BufferSizeMismatch {
    expected: width * height * 3,
    actual: data.len(),
  })
}
