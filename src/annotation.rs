// 该文件是 Qiezhen （切帧） 项目的一部分。
// src/annotation.rs - YOLO 归一化标注
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

//! 把像素坐标的检测框转换为 YOLO 标注行：
//!
//! ```text
//! <class_id> <x_center> <y_center> <width> <height>
//! ```
//!
//! 四个坐标值都相对于图像宽高归一化，固定保留 6 位小数。

use std::{fmt, str::FromStr};

use thiserror::Error;

use crate::model::Detection;

#[derive(Error, Debug, PartialEq)]
pub enum AnnotationError {
  #[error("图像尺寸无效: {width}x{height}")]
  EmptyImage { width: u32, height: u32 },
  #[error("标注行格式错误: {0}")]
  Malformed(String),
}

/// 一条归一化标注（中心点参数化）
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NormalizedAnnotation {
  pub class_id: u32,
  pub x_center: f64,
  pub y_center: f64,
  pub width: f64,
  pub height: f64,
}

impl NormalizedAnnotation {
  /// 还原为像素坐标 `[x1, y1, x2, y2]`
  pub fn to_pixel_box(&self, img_w: u32, img_h: u32) -> [f64; 4] {
    let (w, h) = (img_w as f64, img_h as f64);
    [
      (self.x_center - self.width / 2.0) * w,
      (self.y_center - self.height / 2.0) * h,
      (self.x_center + self.width / 2.0) * w,
      (self.y_center + self.height / 2.0) * h,
    ]
  }

  fn clamp(self) -> Self {
    Self {
      x_center: self.x_center.clamp(0.0, 1.0),
      y_center: self.y_center.clamp(0.0, 1.0),
      width: self.width.clamp(0.0, 1.0),
      height: self.height.clamp(0.0, 1.0),
      ..self
    }
  }
}

impl fmt::Display for NormalizedAnnotation {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(
      f,
      "{} {:.6} {:.6} {:.6} {:.6}",
      self.class_id, self.x_center, self.y_center, self.width, self.height
    )
  }
}

impl FromStr for NormalizedAnnotation {
  type Err = AnnotationError;

  fn from_str(line: &str) -> Result<Self, Self::Err> {
    let malformed = || AnnotationError::Malformed(line.to_string());
    let mut fields = line.split_whitespace();
    let class_id = fields
      .next()
      .and_then(|v| v.parse::<u32>().ok())
      .ok_or_else(malformed)?;
    let mut values = [0f64; 4];
    for value in values.iter_mut() {
      *value = fields
        .next()
        .and_then(|v| v.parse::<f64>().ok())
        .ok_or_else(malformed)?;
    }
    if fields.next().is_some() {
      return Err(malformed());
    }

    let [x_center, y_center, width, height] = values;
    Ok(NormalizedAnnotation {
      class_id,
      x_center,
      y_center,
      width,
      height,
    })
  }
}

/// 标注编码器
///
/// 默认不裁剪：检测框超出图像范围时，归一化值可以落在 `[0, 1]` 之外。
#[derive(Debug, Clone, Copy, Default)]
pub struct AnnotationEncoder {
  clamp: bool,
}

impl AnnotationEncoder {
  pub fn new() -> Self {
    Self::default()
  }

  /// 把归一化结果裁剪到 `[0, 1]`
  pub fn clamped() -> Self {
    Self { clamp: true }
  }

  pub fn with_clamp(mut self, clamp: bool) -> Self {
    self.clamp = clamp;
    self
  }

  pub fn encode(
    &self,
    detections: &[Detection],
    img_w: u32,
    img_h: u32,
  ) -> Result<Vec<NormalizedAnnotation>, AnnotationError> {
    if img_w == 0 || img_h == 0 {
      return Err(AnnotationError::EmptyImage {
        width: img_w,
        height: img_h,
      });
    }

    let (w, h) = (img_w as f64, img_h as f64);
    let annotations = detections
      .iter()
      .map(|det| {
        let [x1, y1, x2, y2] = det.bbox.map(f64::from);
        let annotation = NormalizedAnnotation {
          class_id: det.class_id,
          x_center: ((x1 + x2) / 2.0) / w,
          y_center: ((y1 + y2) / 2.0) / h,
          width: (x2 - x1) / w,
          height: (y2 - y1) / h,
        };
        if self.clamp {
          annotation.clamp()
        } else {
          annotation
        }
      })
      .collect();

    Ok(annotations)
  }

  /// 编码为标注文件内容，每个检测一行
  pub fn encode_lines(
    &self,
    detections: &[Detection],
    img_w: u32,
    img_h: u32,
  ) -> Result<String, AnnotationError> {
    let mut content = String::new();
    for annotation in self.encode(detections, img_w, img_h)? {
      content.push_str(&annotation.to_string());
      content.push('\n');
    }
    Ok(content)
  }
}
