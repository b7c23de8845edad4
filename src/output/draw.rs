// 该文件是 Qiezhen （切帧） 项目的一部分。
// src/output/draw.rs - 目标检测结果可视化
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::path::Path;

use ab_glyph::{FontVec, PxScale};
use image::{Rgb, RgbImage};
use imageproc::{
  drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size},
  rect::Rect,
};

use crate::{
  model::{ClassNames, Detection},
  output::PreviewError,
};

// 文本渲染常量
const LABEL_FONT_SIZE: f32 = 20.0;
const LABEL_TEXT_VERTICAL_PADDING: i32 = 2;
const LABEL_COLOR: [u8; 3] = [0, 255, 0]; // 绿色
const BOX_THICKNESS: i32 = 2;

/// 在图像上绘制检测框；配置了字体时同时绘制类别标签
pub struct Draw {
  font: Option<FontVec>,
  font_size: f32,
  label_color: [u8; 3],
}

impl Default for Draw {
  fn default() -> Self {
    Self {
      font: None,
      font_size: LABEL_FONT_SIZE,
      label_color: LABEL_COLOR,
    }
  }
}

impl Draw {
  pub fn with_font_file(path: &Path) -> Result<Self, PreviewError> {
    let data = std::fs::read(path)?;
    let font = FontVec::try_from_vec(data).map_err(|e| PreviewError::FontError(e.to_string()))?;
    Ok(Self {
      font: Some(font),
      ..Self::default()
    })
  }

  pub fn draw_detections(
    &self,
    frame: &RgbImage,
    detections: &[Detection],
    class_names: &ClassNames,
  ) -> RgbImage {
    let mut image = frame.clone();
    for det in detections {
      self.draw_bbox_with_label(&mut image, det, class_names);
    }
    image
  }

  // bbox 为像素坐标 [x_min, y_min, x_max, y_max]，超出图像的部分被裁掉
  fn draw_bbox_with_label(&self, image: &mut RgbImage, det: &Detection, class_names: &ClassNames) {
    let (w, h) = (image.width() as i32, image.height() as i32);
    if w == 0 || h == 0 {
      return;
    }

    let x_min = (det.bbox[0].floor() as i32).clamp(0, w - 1);
    let y_min = (det.bbox[1].floor() as i32).clamp(0, h - 1);
    let x_max = (det.bbox[2].ceil() as i32).clamp(0, w - 1);
    let y_max = (det.bbox[3].ceil() as i32).clamp(0, h - 1);

    if x_min >= x_max || y_min >= y_max {
      return;
    }

    let color = Rgb(self.label_color);
    for t in 0..BOX_THICKNESS {
      let (bw, bh) = (x_max - x_min - 2 * t, y_max - y_min - 2 * t);
      if bw <= 0 || bh <= 0 {
        break;
      }
      let rect = Rect::at(x_min + t, y_min + t).of_size(bw as u32 + 1, bh as u32 + 1);
      draw_hollow_rect_mut(image, rect, color);
    }

    let Some(font) = &self.font else {
      return;
    };

    let label = format!("{} {:.2}", class_names.name(det.class_id), det.score);
    let scale = PxScale::from(self.font_size);
    let (text_w, text_h) = text_size(scale, font, &label);
    let label_h = text_h as i32 + 2 * LABEL_TEXT_VERTICAL_PADDING;

    // 标签放在边框上方，空间不够时放在框内
    let label_x = x_min;
    let label_y = if y_min >= label_h { y_min - label_h } else { y_min };
    let label_w = (text_w as i32).min(w - label_x);
    if label_w <= 0 {
      return;
    }

    let rect = Rect::at(label_x, label_y).of_size(label_w as u32, label_h as u32);
    draw_filled_rect_mut(image, rect, color);
    draw_text_mut(
      image,
      Rgb([0u8, 0u8, 0u8]),
      label_x,
      label_y + LABEL_TEXT_VERTICAL_PADDING,
      scale,
      font,
      &label,
    );
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn draws_box_outline_without_touching_inside() {
    let frame = RgbImage::new(50, 50);
    let det = Detection {
      class_id: 0,
      score: 0.9,
      bbox: [10.0, 10.0, 30.0, 30.0],
    };
    let image = Draw::default().draw_detections(&frame, &[det], &ClassNames::default());
    assert_eq!(image.get_pixel(10, 20), &Rgb(LABEL_COLOR));
    assert_eq!(image.get_pixel(20, 20), &Rgb([0, 0, 0]));
    // 原图不被修改
    assert_eq!(frame.get_pixel(10, 20), &Rgb([0, 0, 0]));
  }

  #[test]
  fn box_outside_image_is_ignored() {
    let frame = RgbImage::new(20, 20);
    let det = Detection {
      class_id: 0,
      score: 0.9,
      bbox: [40.0, 40.0, 60.0, 60.0],
    };
    let image = Draw::default().draw_detections(&frame, &[det], &ClassNames::default());
    assert!(image.pixels().all(|p| *p == Rgb([0, 0, 0])));
  }

  #[test]
  fn missing_font_file_is_an_error() {
    assert!(Draw::with_font_file(Path::new("/nonexistent/font.ttf")).is_err());
  }
}
