// 该文件是 Qiezhen （切帧） 项目的一部分。
// src/output/directory_preview.rs - 目录预览输出
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::path::PathBuf;

use tracing::debug;
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::SampledFrame,
  model::{ClassNames, Detection},
  output::{PreviewError, Render, draw::Draw},
  url_file_path, url_query,
};

/// 把画好检测框的采样帧保存到调试目录
///
/// URL 形式: `folder:///tmp/preview?font=/path/to/font.ttf&always`
/// - `font`: 标签字体，缺省时只画框
/// - `always`: 没有检测结果的帧也保存
pub struct DirectoryPreview {
  directory: PathBuf,
  draw: Draw,
  always: bool,
}

impl FromUrlWithScheme for DirectoryPreview {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for DirectoryPreview {
  type Error = PreviewError;

  fn from_url(uri: &Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(PreviewError::SchemeMismatch(uri.scheme().to_string()));
    }

    let draw = match url_query(uri, "font") {
      Some(font) => Draw::with_font_file(&PathBuf::from(font))?,
      None => Draw::default(),
    };
    let always = uri.query_pairs().any(|(k, _)| k == "always");

    let directory = url_file_path(uri);
    std::fs::create_dir_all(&directory)?;

    Ok(DirectoryPreview {
      directory,
      draw,
      always,
    })
  }
}

impl DirectoryPreview {
  pub fn new(directory: impl Into<PathBuf>, draw: Draw, always: bool) -> Result<Self, PreviewError> {
    let directory = directory.into();
    std::fs::create_dir_all(&directory)?;
    Ok(DirectoryPreview {
      directory,
      draw,
      always,
    })
  }

  fn frame_path(&self, frame: &SampledFrame) -> PathBuf {
    self.directory.join(format!("{}.jpg", frame.key()))
  }
}

impl Render for DirectoryPreview {
  fn render_result(
    &self,
    frame: &SampledFrame,
    detections: &[Detection],
    class_names: &ClassNames,
  ) -> Result<(), PreviewError> {
    if !self.always && detections.is_empty() {
      return Ok(());
    }

    let path = self.frame_path(frame);
    let image = self
      .draw
      .draw_detections(frame.image(), detections, class_names);
    image.save(&path)?;
    debug!("预览已保存: {}", path.display());
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::RgbImage;

  fn frame() -> SampledFrame {
    SampledFrame::new("clip", 30, RgbImage::new(40, 40))
  }

  fn det() -> Detection {
    Detection {
      class_id: 1,
      score: 0.7,
      bbox: [5.0, 5.0, 20.0, 20.0],
    }
  }

  #[test]
  fn saves_annotated_frame_named_by_key() {
    let dir = tempfile::tempdir().unwrap();
    let url = Url::from_directory_path(dir.path().join("preview")).unwrap();
    let url = Url::parse(&url.as_str().replacen("file:", "folder:", 1)).unwrap();
    let preview = DirectoryPreview::from_url(&url).unwrap();

    preview
      .render_result(&frame(), &[det()], &ClassNames::default())
      .unwrap();
    assert!(dir.path().join("preview/clip_i30.jpg").exists());
  }

  #[test]
  fn skips_empty_frames_unless_always() {
    let dir = tempfile::tempdir().unwrap();
    let quiet = DirectoryPreview::new(dir.path().join("quiet"), Draw::default(), false).unwrap();
    quiet
      .render_result(&frame(), &[], &ClassNames::default())
      .unwrap();
    assert!(!dir.path().join("quiet/clip_i30.jpg").exists());

    let always = DirectoryPreview::new(dir.path().join("always"), Draw::default(), true).unwrap();
    always
      .render_result(&frame(), &[], &ClassNames::default())
      .unwrap();
    assert!(dir.path().join("always/clip_i30.jpg").exists());
  }

  #[test]
  fn rejects_other_schemes() {
    let url = Url::parse("window://").unwrap();
    assert!(matches!(
      DirectoryPreview::from_url(&url),
      Err(PreviewError::SchemeMismatch(_))
    ));
  }
}
