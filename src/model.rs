// 该文件是 Qiezhen （切帧） 项目的一部分。
// src/model.rs - 检测模型与检测适配器
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::borrow::Cow;

use image::RgbImage;
use thiserror::Error;
use tracing::debug;

mod labels;
pub use self::labels::{COCO_CLASSES, LabelFileError, load_class_names};

#[cfg(feature = "model_yolo26")]
mod yolo26;
#[cfg(feature = "model_yolo26")]
pub use self::yolo26::{Yolo26, Yolo26Builder, Yolo26Error};

pub const DEFAULT_CONFIDENCE: f32 = 0.3;

/// 目标检测能力：给定图像，返回检测结果
pub trait Model {
  type Error: std::error::Error + Send + Sync + 'static;

  fn infer(&self, input: &RgbImage) -> Result<DetectResult, Self::Error>;

  /// 类别编号到类别名称的映射
  fn class_names(&self) -> &ClassNames;
}

impl<M: Model + ?Sized> Model for Box<M> {
  type Error = M::Error;

  fn infer(&self, input: &RgbImage) -> Result<DetectResult, Self::Error> {
    (**self).infer(input)
  }

  fn class_names(&self) -> &ClassNames {
    (**self).class_names()
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
  pub class_id: u32,
  pub score: f32,
  pub bbox: [f32; 4], // [x_min, y_min, x_max, y_max]，原图像素坐标
}

#[derive(Debug, Clone, Default)]
pub struct DetectResult {
  pub items: Box<[Detection]>,
}

impl DetectResult {
  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }

  pub fn len(&self) -> usize {
    self.items.len()
  }
}

impl From<Vec<Detection>> for DetectResult {
  fn from(items: Vec<Detection>) -> Self {
    DetectResult {
      items: items.into_boxed_slice(),
    }
  }
}

/// 按类别编号排列的类别名称
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClassNames(Vec<String>);

impl ClassNames {
  pub fn new(names: Vec<String>) -> Self {
    ClassNames(names)
  }

  pub fn coco() -> Self {
    COCO_CLASSES.iter().map(|s| s.to_string()).collect()
  }

  /// 未知编号以数字本身作为名称
  pub fn name(&self, class_id: u32) -> Cow<'_, str> {
    match self.0.get(class_id as usize) {
      Some(name) => Cow::Borrowed(name.as_str()),
      None => Cow::Owned(class_id.to_string()),
    }
  }

  pub fn len(&self) -> usize {
    self.0.len()
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }

  pub fn iter(&self) -> impl Iterator<Item = &str> {
    self.0.iter().map(String::as_str)
  }
}

impl FromIterator<String> for ClassNames {
  fn from_iter<T: IntoIterator<Item = String>>(iter: T) -> Self {
    ClassNames(iter.into_iter().collect())
  }
}

#[derive(Error, Debug)]
#[error("推理失败: {0}")]
pub struct InferenceError(#[source] Box<dyn std::error::Error + Send + Sync>);

/// 检测适配器：调用模型并按置信度阈值过滤，保留模型输出顺序
pub struct Detector<M> {
  model: M,
  confidence: f32,
}

impl<M: Model> Detector<M> {
  pub fn new(model: M) -> Self {
    Detector {
      model,
      confidence: DEFAULT_CONFIDENCE,
    }
  }

  pub fn with_confidence(mut self, confidence: f32) -> Self {
    self.confidence = confidence;
    self
  }

  pub fn confidence(&self) -> f32 {
    self.confidence
  }

  pub fn class_names(&self) -> &ClassNames {
    self.model.class_names()
  }

  pub fn detect(&self, image: &RgbImage) -> Result<Vec<Detection>, InferenceError> {
    let result = self
      .model
      .infer(image)
      .map_err(|e| InferenceError(Box::new(e)))?;
    let total = result.len();
    let detections: Vec<Detection> = result
      .items
      .into_vec()
      .into_iter()
      .filter(|det| det.score >= self.confidence)
      .collect();
    debug!(
      "模型输出 {} 个检测框，置信度 >= {} 的有 {} 个",
      total,
      self.confidence,
      detections.len()
    );
    Ok(detections)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[derive(Error, Debug)]
  #[error("模型故障")]
  struct Broken;

  struct FixedModel {
    items: Vec<Detection>,
    names: ClassNames,
  }

  impl Model for FixedModel {
    type Error = Broken;

    fn infer(&self, _input: &RgbImage) -> Result<DetectResult, Self::Error> {
      if self.items.is_empty() {
        return Err(Broken);
      }
      Ok(DetectResult::from(self.items.clone()))
    }

    fn class_names(&self) -> &ClassNames {
      &self.names
    }
  }

  fn det(class_id: u32, score: f32) -> Detection {
    Detection {
      class_id,
      score,
      bbox: [0.0, 0.0, 1.0, 1.0],
    }
  }

  #[test]
  fn filters_by_threshold_and_keeps_order() {
    let model = FixedModel {
      items: vec![det(3, 0.9), det(1, 0.1), det(7, 0.3), det(0, 0.29)],
      names: ClassNames::default(),
    };
    let detector = Detector::new(model);
    let ids: Vec<u32> = detector
      .detect(&RgbImage::new(8, 8))
      .unwrap()
      .iter()
      .map(|d| d.class_id)
      .collect();
    assert_eq!(ids, vec![3, 7]);
  }

  #[test]
  fn custom_threshold() {
    let model = FixedModel {
      items: vec![det(3, 0.9), det(7, 0.6)],
      names: ClassNames::default(),
    };
    let detector = Detector::new(model).with_confidence(0.75);
    assert_eq!(detector.detect(&RgbImage::new(8, 8)).unwrap().len(), 1);
  }

  #[test]
  fn model_failure_becomes_inference_error() {
    let model = FixedModel {
      items: vec![],
      names: ClassNames::default(),
    };
    let err = Detector::new(model)
      .detect(&RgbImage::new(8, 8))
      .unwrap_err();
    assert!(err.to_string().contains("模型故障"));
  }

  #[test]
  fn class_names_fall_back_to_id() {
    let names = ClassNames::new(vec!["fish".into(), "crab".into()]);
    assert_eq!(names.name(1), "crab");
    assert_eq!(names.name(9), "9");
    assert_eq!(ClassNames::coco().len(), 80);
    assert_eq!(ClassNames::coco().name(0), "person");
  }
}
