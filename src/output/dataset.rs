// 该文件是 Qiezhen （切帧） 项目的一部分。
// src/output/dataset.rs - 数据集目录输出
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

//! 数据集目录布局：
//!
//! ```text
//! <root>/images/<video>_i<frame>.jpg
//! <root>/labels/<video>_i<frame>.txt
//! <root>/classes.txt
//! ```
//!
//! 图像文件是否存在是唯一的“已处理”标记：只删除标注文件不会触发重新生成。

use std::{
  fs::{File, OpenOptions},
  io::{BufWriter, ErrorKind, Write},
  path::{Path, PathBuf},
};

use image::codecs::jpeg::JpegEncoder;
use thiserror::Error;
use tracing::{debug, warn};

use crate::{
  annotation::{AnnotationEncoder, AnnotationError},
  frame::SampledFrame,
  model::{ClassNames, Detection},
};

pub const IMAGES_DIR: &str = "images";
pub const LABELS_DIR: &str = "labels";
pub const CLASSES_FILE: &str = "classes.txt";
pub const DEFAULT_JPEG_QUALITY: u8 = 95;

#[derive(Error, Debug)]
pub enum WriteError {
  #[error("I/O 错误 {path}: {source}")]
  IoError {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
  #[error("图像编码错误 {path}: {source}")]
  ImageError {
    path: PathBuf,
    #[source]
    source: image::ImageError,
  },
  #[error("标注错误: {0}")]
  AnnotationError(#[from] AnnotationError),
}

impl WriteError {
  fn io(path: &Path, source: std::io::Error) -> Self {
    WriteError::IoError {
      path: path.to_path_buf(),
      source,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SkipReason {
  NoDetection,
  AlreadyPresent,
  Error,
}

/// 每个采样帧的处理结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameOutcome {
  Saved { count: usize, labels: Vec<String> },
  Skipped(SkipReason),
}

/// 数据集输出目录
#[derive(Debug, Clone)]
pub struct DatasetLayout {
  root: PathBuf,
}

impl DatasetLayout {
  pub fn new(root: impl Into<PathBuf>) -> Self {
    DatasetLayout { root: root.into() }
  }

  pub fn images_dir(&self) -> PathBuf {
    self.root.join(IMAGES_DIR)
  }

  pub fn labels_dir(&self) -> PathBuf {
    self.root.join(LABELS_DIR)
  }

  pub fn image_path(&self, key: &str) -> PathBuf {
    self.images_dir().join(format!("{}.jpg", key))
  }

  pub fn label_path(&self, key: &str) -> PathBuf {
    self.labels_dir().join(format!("{}.txt", key))
  }

  pub fn classes_path(&self) -> PathBuf {
    self.root.join(CLASSES_FILE)
  }

  /// 创建 images/ 与 labels/ 目录
  pub fn ensure(&self) -> Result<(), WriteError> {
    for dir in [self.images_dir(), self.labels_dir()] {
      std::fs::create_dir_all(&dir).map_err(|e| WriteError::io(&dir, e))?;
    }
    Ok(())
  }
}

/// 数据集写入器
pub struct DatasetWriter {
  layout: DatasetLayout,
  encoder: AnnotationEncoder,
  jpeg_quality: u8,
}

impl DatasetWriter {
  pub fn new(layout: DatasetLayout) -> Self {
    DatasetWriter {
      layout,
      encoder: AnnotationEncoder::default(),
      jpeg_quality: DEFAULT_JPEG_QUALITY,
    }
  }

  pub fn with_encoder(mut self, encoder: AnnotationEncoder) -> Self {
    self.encoder = encoder;
    self
  }

  pub fn with_jpeg_quality(mut self, quality: u8) -> Self {
    self.jpeg_quality = quality.clamp(1, 100);
    self
  }

  pub fn layout(&self) -> &DatasetLayout {
    &self.layout
  }

  /// 图像文件已存在即视为该帧已处理
  pub fn contains(&self, key: &str) -> bool {
    self.layout.image_path(key).exists()
  }

  /// 写入一帧及其标注
  ///
  /// 图像文件以 create_new 方式创建，存在性检查与创建是同一个原子操作；
  /// 任一步失败都会删除本次已写入的文件，不留下孤立的图像或标注。
  pub fn write_frame(
    &self,
    frame: &SampledFrame,
    detections: &[Detection],
    class_names: &ClassNames,
  ) -> Result<FrameOutcome, WriteError> {
    if detections.is_empty() {
      return Ok(FrameOutcome::Skipped(SkipReason::NoDetection));
    }

    let key = frame.key();
    let content = self
      .encoder
      .encode_lines(detections, frame.width(), frame.height())?;

    let image_path = self.layout.image_path(&key);
    let file = match OpenOptions::new()
      .write(true)
      .create_new(true)
      .open(&image_path)
    {
      Ok(file) => file,
      Err(e) if e.kind() == ErrorKind::AlreadyExists => {
        return Ok(FrameOutcome::Skipped(SkipReason::AlreadyPresent));
      }
      Err(e) => return Err(WriteError::io(&image_path, e)),
    };

    if let Err(e) = self.write_jpeg(file, frame, &image_path) {
      remove_quietly(&image_path);
      return Err(e);
    }

    let label_path = self.layout.label_path(&key);
    if let Err(e) = std::fs::write(&label_path, content) {
      remove_quietly(&label_path);
      remove_quietly(&image_path);
      return Err(WriteError::io(&label_path, e));
    }

    debug!("写入 {} 与 {}", image_path.display(), label_path.display());

    Ok(FrameOutcome::Saved {
      count: detections.len(),
      labels: detections
        .iter()
        .map(|det| class_names.name(det.class_id).into_owned())
        .collect(),
    })
  }

  fn write_jpeg(&self, file: File, frame: &SampledFrame, path: &Path) -> Result<(), WriteError> {
    let mut writer = BufWriter::new(file);
    JpegEncoder::new_with_quality(&mut writer, self.jpeg_quality)
      .encode_image(frame.image())
      .map_err(|source| WriteError::ImageError {
        path: path.to_path_buf(),
        source,
      })?;
    writer.flush().map_err(|e| WriteError::io(path, e))?;
    Ok(())
  }

  /// 写入类别清单，每行一个名称，返回类别数量
  pub fn write_class_manifest(&self, class_names: &ClassNames) -> Result<usize, WriteError> {
    let path = self.layout.classes_path();
    let mut content = String::new();
    for name in class_names.iter() {
      content.push_str(name);
      content.push('\n');
    }
    std::fs::write(&path, content).map_err(|e| WriteError::io(&path, e))?;
    Ok(class_names.len())
  }
}

fn remove_quietly(path: &Path) {
  if let Err(e) = std::fs::remove_file(path)
    && e.kind() != ErrorKind::NotFound
  {
    warn!("无法删除不完整的文件 {}: {}", path.display(), e);
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::RgbImage;

  fn writer(dir: &tempfile::TempDir) -> DatasetWriter {
    let layout = DatasetLayout::new(dir.path());
    layout.ensure().unwrap();
    DatasetWriter::new(layout)
  }

  fn frame(index: u64) -> SampledFrame {
    SampledFrame::new("clip", index, RgbImage::from_pixel(100, 100, image::Rgb([10, 20, 30])))
  }

  fn names() -> ClassNames {
    ClassNames::new(vec!["a".into(), "b".into(), "fish".into()])
  }

  fn fish() -> Detection {
    Detection {
      class_id: 2,
      score: 0.8,
      bbox: [10.0, 10.0, 50.0, 50.0],
    }
  }

  #[test]
  fn empty_detections_write_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let writer = writer(&dir);
    let outcome = writer.write_frame(&frame(0), &[], &names()).unwrap();
    assert_eq!(outcome, FrameOutcome::Skipped(SkipReason::NoDetection));
    assert!(!writer.layout().image_path("clip_i0").exists());
    assert!(!writer.layout().label_path("clip_i0").exists());
  }

  #[test]
  fn saves_image_and_label_pair() {
    let dir = tempfile::tempdir().unwrap();
    let writer = writer(&dir);
    let outcome = writer.write_frame(&frame(0), &[fish()], &names()).unwrap();
    assert_eq!(
      outcome,
      FrameOutcome::Saved {
        count: 1,
        labels: vec!["fish".to_string()]
      }
    );

    let label = std::fs::read_to_string(dir.path().join("labels/clip_i0.txt")).unwrap();
    assert_eq!(label, "2 0.300000 0.300000 0.400000 0.400000\n");

    let image = image::open(dir.path().join("images/clip_i0.jpg")).unwrap();
    assert_eq!((image.width(), image.height()), (100, 100));
    assert!(writer.contains("clip_i0"));
  }

  #[test]
  fn existing_image_is_not_overwritten() {
    let dir = tempfile::tempdir().unwrap();
    let writer = writer(&dir);
    let image_path = writer.layout().image_path("clip_i10");
    std::fs::write(&image_path, b"marker").unwrap();

    let outcome = writer.write_frame(&frame(10), &[fish()], &names()).unwrap();
    assert_eq!(outcome, FrameOutcome::Skipped(SkipReason::AlreadyPresent));
    assert_eq!(std::fs::read(&image_path).unwrap(), b"marker");
    assert!(!writer.layout().label_path("clip_i10").exists());
  }

  #[test]
  fn failed_label_write_removes_image() {
    let dir = tempfile::tempdir().unwrap();
    let writer = writer(&dir);
    // 用同名目录占住标注文件路径，使写入失败
    std::fs::create_dir(writer.layout().label_path("clip_i0")).unwrap();

    let err = writer.write_frame(&frame(0), &[fish()], &names());
    assert!(matches!(err, Err(WriteError::IoError { .. })));
    assert!(!writer.layout().image_path("clip_i0").exists());
  }

  #[test]
  fn missing_images_dir_is_an_error_without_label() {
    let dir = tempfile::tempdir().unwrap();
    let writer = DatasetWriter::new(DatasetLayout::new(dir.path().join("absent")));
    let err = writer.write_frame(&frame(0), &[fish()], &names());
    assert!(matches!(err, Err(WriteError::IoError { .. })));
    assert!(!writer.layout().label_path("clip_i0").exists());
  }

  #[test]
  fn zero_sized_frame_is_rejected_before_any_write() {
    let dir = tempfile::tempdir().unwrap();
    let writer = writer(&dir);
    let empty = SampledFrame::new("clip", 0, RgbImage::new(0, 0));
    let err = writer.write_frame(&empty, &[fish()], &names());
    assert!(matches!(err, Err(WriteError::AnnotationError(_))));
    assert!(!writer.contains("clip_i0"));
  }

  #[test]
  fn manifest_lists_names_in_id_order() {
    let dir = tempfile::tempdir().unwrap();
    let writer = writer(&dir);
    let count = writer.write_class_manifest(&names()).unwrap();
    assert_eq!(count, 3);
    let content = std::fs::read_to_string(dir.path().join("classes.txt")).unwrap();
    assert_eq!(content, "a\nb\nfish\n");
  }
}
