// 该文件是 Qiezhen （切帧） 项目的一部分。
// src/frame.rs - 采样帧定义
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

use image::RgbImage;

use crate::input::DecodeError;

/// 解码得到的原始帧，只有被采样时才转换为 RGB 图像
pub trait IntoRgbImage {
  fn into_rgb_image(self) -> Result<RgbImage, DecodeError>;
}

impl IntoRgbImage for RgbImage {
  fn into_rgb_image(self) -> Result<RgbImage, DecodeError> {
    Ok(self)
  }
}

/// 被采样的一帧
#[derive(Debug, Clone)]
pub struct SampledFrame {
  video_name: String,
  frame_index: u64,
  image: RgbImage,
}

impl SampledFrame {
  pub fn new(video_name: impl Into<String>, frame_index: u64, image: RgbImage) -> Self {
    Self {
      video_name: video_name.into(),
      frame_index,
      image,
    }
  }

  pub fn video_name(&self) -> &str {
    &self.video_name
  }

  pub fn frame_index(&self) -> u64 {
    self.frame_index
  }

  pub fn image(&self) -> &RgbImage {
    &self.image
  }

  pub fn width(&self) -> u32 {
    self.image.width()
  }

  pub fn height(&self) -> u32 {
    self.image.height()
  }

  /// 输出文件共用的名称：`{video_name}_i{frame_index}`
  pub fn key(&self) -> String {
    frame_key(&self.video_name, self.frame_index)
  }
}

pub fn frame_key(video_name: &str, frame_index: u64) -> String {
  format!("{}_i{}", video_name, frame_index)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn key_combines_video_name_and_index() {
    let frame = SampledFrame::new("clip_01", 120, RgbImage::new(4, 2));
    assert_eq!(frame.key(), "clip_01_i120");
    assert_eq!(frame.width(), 4);
    assert_eq!(frame.height(), 2);
  }

  #[test]
  fn key_is_stable_for_same_pair() {
    assert_eq!(frame_key("a", 0), frame_key("a", 0));
    assert_ne!(frame_key("a", 1), frame_key("a", 10));
  }
}
