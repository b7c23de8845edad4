// 该文件是 Qiezhen （切帧） 项目的一部分。
// src/input/sampler.rs - 固定步长抽帧
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

use std::num::NonZeroU64;

use tracing::debug;

use crate::{
  frame::{IntoRgbImage, SampledFrame},
  input::DecodeError,
};

pub const DEFAULT_STRIDE: NonZeroU64 = NonZeroU64::new(10).unwrap();

/// 对解码帧序列按步长抽样
///
/// 帧序号从 0 开始，每个解码帧加 1（无论是否被采样）；
/// 只有 `frame_index % stride == 0` 的帧会转换为 RGB 图像并产出。
/// 中途解码失败时产出一次错误，随后序列结束。
pub struct FrameSampler<I> {
  video_name: String,
  frames: I,
  stride: u64,
  cursor: u64,
  finished: bool,
}

impl<I> FrameSampler<I> {
  pub fn new(video_name: impl Into<String>, frames: I, stride: NonZeroU64) -> Self {
    FrameSampler {
      video_name: video_name.into(),
      frames,
      stride: stride.get(),
      cursor: 0,
      finished: false,
    }
  }

  /// 已经读取的解码帧数量
  pub fn frames_read(&self) -> u64 {
    self.cursor
  }
}

impl<I, F> Iterator for FrameSampler<I>
where
  I: Iterator<Item = Result<F, DecodeError>>,
  F: IntoRgbImage,
{
  type Item = Result<SampledFrame, DecodeError>;

  fn next(&mut self) -> Option<Self::Item> {
    while !self.finished {
      match self.frames.next() {
        None => {
          debug!("{}: 视频结束，共 {} 帧", self.video_name, self.cursor);
          self.finished = true;
        }
        Some(Err(e)) => {
          self.finished = true;
          return Some(Err(e));
        }
        Some(Ok(frame)) => {
          let frame_index = self.cursor;
          self.cursor += 1;
          if frame_index % self.stride != 0 {
            continue;
          }
          let sampled = frame
            .into_rgb_image()
            .map(|image| SampledFrame::new(self.video_name.as_str(), frame_index, image));
          if sampled.is_err() {
            self.finished = true;
          }
          return Some(sampled);
        }
      }
    }
    None
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::RgbImage;

  fn frames(len: usize) -> impl Iterator<Item = Result<RgbImage, DecodeError>> {
    (0..len).map(|i| Ok(RgbImage::from_pixel(2, 2, image::Rgb([i as u8, 0, 0]))))
  }

  fn stride(n: u64) -> NonZeroU64 {
    NonZeroU64::new(n).unwrap()
  }

  fn indices<I>(sampler: FrameSampler<I>) -> Vec<u64>
  where
    FrameSampler<I>: Iterator<Item = Result<SampledFrame, DecodeError>>,
  {
    sampler.map(|f| f.unwrap().frame_index()).collect()
  }

  #[test]
  fn samples_every_stride_frames() {
    let sampler = FrameSampler::new("v", frames(25), stride(10));
    assert_eq!(indices(sampler), vec![0, 10, 20]);
  }

  #[test]
  fn candidate_set_matches_multiples_below_length() {
    for len in [0usize, 1, 9, 10, 11, 30, 31] {
      for s in [1u64, 3, 10] {
        let expected: Vec<u64> = (0..len as u64).filter(|i| i % s == 0).collect();
        let sampler = FrameSampler::new("v", frames(len), stride(s));
        assert_eq!(indices(sampler), expected, "len={} stride={}", len, s);
      }
    }
  }

  #[test]
  fn sampled_frame_carries_matching_image() {
    let mut sampler = FrameSampler::new("clip", frames(15), stride(7));
    let first = sampler.next().unwrap().unwrap();
    let second = sampler.next().unwrap().unwrap();
    assert_eq!(second.frame_index(), 7);
    assert_eq!(second.image().get_pixel(0, 0)[0], 7);
    assert_eq!(first.key(), "clip_i0");
    assert_eq!(sampler.frames_read(), 8);
  }

  #[test]
  fn decode_error_ends_sequence() {
    let source = frames(3).chain(std::iter::once(Err(DecodeError::Stream("坏帧".into())))).chain(frames(5));
    let mut sampler = FrameSampler::new("v", source, stride(1));
    assert_eq!(sampler.next().unwrap().unwrap().frame_index(), 0);
    assert_eq!(sampler.next().unwrap().unwrap().frame_index(), 1);
    assert_eq!(sampler.next().unwrap().unwrap().frame_index(), 2);
    assert!(matches!(sampler.next(), Some(Err(DecodeError::Stream(_)))));
    assert!(sampler.next().is_none());
  }

  #[test]
  fn default_stride_is_ten() {
    assert_eq!(DEFAULT_STRIDE.get(), 10);
  }
}
