// 该文件是 Qiezhen （切帧） 项目的一部分。
// src/task.rs - 批量抽帧任务
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

use std::{
  num::NonZeroU64,
  path::{Path, PathBuf},
  sync::{
    Arc,
    atomic::{AtomicBool, AtomicUsize, Ordering},
  },
};

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::{
  frame::SampledFrame,
  input::{DEFAULT_STRIDE, DecodeError, FrameSampler, VideoSource},
  model::{Detection, Detector, Model},
  output::{DatasetWriter, FrameOutcome, Render, SkipReason, WriteError},
};

/// 参与处理的视频扩展名（不区分大小写）
pub const VIDEO_EXTENSIONS: [&str; 3] = ["mp4", "avi", "mov"];

pub trait Task<S, M, O>: Sized {
  type Output;
  type Error;
  fn run_task(self, source: S, model: M, output: O) -> Result<Self::Output, Self::Error>;
}

#[derive(Error, Debug)]
pub enum TaskError {
  #[error("输入目录 {0} 中没有找到视频")]
  NoInput(PathBuf),
  #[error("无法读取输入目录 {path}: {source}")]
  InputDir {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
  #[error("输出错误: {0}")]
  Output(#[from] WriteError),
}

/// 协作式停止信号，在每个采样帧之前检查
///
/// 第一次请求结束当前视频，批处理继续下一个视频；
/// 第二次请求结束整个批处理（类别清单仍会写出）。
#[derive(Debug, Clone, Default)]
pub struct StopSignal {
  video: Arc<AtomicBool>,
  requests: Arc<AtomicUsize>,
}

impl StopSignal {
  pub fn new() -> Self {
    Self::default()
  }

  /// 发出一次停止请求，返回累计请求次数
  pub fn request(&self) -> usize {
    self.video.store(true, Ordering::SeqCst);
    self.requests.fetch_add(1, Ordering::SeqCst) + 1
  }

  /// 取走“停止当前视频”请求
  pub fn take_video_stop(&self) -> bool {
    self.video.swap(false, Ordering::SeqCst)
  }

  pub fn batch_stopped(&self) -> bool {
    self.requests.load(Ordering::SeqCst) >= 2
  }
}

/// 批处理统计
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchSummary {
  pub videos_found: usize,
  pub videos_processed: usize,
  pub videos_failed: usize,
  pub videos_interrupted: usize,
  pub frames_sampled: u64,
  pub frames_saved: u64,
  pub objects_saved: u64,
  pub skipped_no_detection: u64,
  pub skipped_already_present: u64,
  pub frame_errors: u64,
  pub classes_written: usize,
}

impl BatchSummary {
  fn record(&mut self, outcome: &FrameOutcome) {
    self.frames_sampled += 1;
    match outcome {
      FrameOutcome::Saved { count, .. } => {
        self.frames_saved += 1;
        self.objects_saved += *count as u64;
      }
      FrameOutcome::Skipped(SkipReason::NoDetection) => self.skipped_no_detection += 1,
      FrameOutcome::Skipped(SkipReason::AlreadyPresent) => self.skipped_already_present += 1,
      FrameOutcome::Skipped(SkipReason::Error) => self.frame_errors += 1,
    }
  }
}

enum VideoEnd {
  Completed,
  Interrupted,
}

fn is_video(path: &Path) -> bool {
  path
    .extension()
    .and_then(|ext| ext.to_str())
    .map(|ext| VIDEO_EXTENSIONS.iter().any(|v| ext.eq_ignore_ascii_case(v)))
    .unwrap_or(false)
}

/// 列出目录中的视频文件，顺序为目录遍历顺序
///
/// 目录不存在时返回空列表。
pub fn discover_videos(dir: &Path) -> Result<Vec<PathBuf>, TaskError> {
  let entries = match std::fs::read_dir(dir) {
    Ok(entries) => entries,
    Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
    Err(source) => {
      return Err(TaskError::InputDir {
        path: dir.to_path_buf(),
        source,
      });
    }
  };

  let mut videos = Vec::new();
  for entry in entries {
    let path = entry
      .map_err(|source| TaskError::InputDir {
        path: dir.to_path_buf(),
        source,
      })?
      .path();
    if path.is_file() && is_video(&path) {
      videos.push(path);
    }
  }
  Ok(videos)
}

/// 视频名称：文件名去掉扩展名
pub fn video_name(path: &Path) -> String {
  path
    .file_stem()
    .map(|stem| stem.to_string_lossy().into_owned())
    .unwrap_or_default()
}

/// 批量抽帧任务：发现视频、逐个抽帧检测并写入数据集，最后写出类别清单
pub struct ExtractTask {
  input_dir: PathBuf,
  stride: NonZeroU64,
  stop: StopSignal,
  preview: Option<Box<dyn Render>>,
}

impl ExtractTask {
  pub fn new(input_dir: impl Into<PathBuf>) -> Self {
    ExtractTask {
      input_dir: input_dir.into(),
      stride: DEFAULT_STRIDE,
      stop: StopSignal::default(),
      preview: None,
    }
  }

  pub fn with_stride(mut self, stride: NonZeroU64) -> Self {
    self.stride = stride;
    self
  }

  pub fn with_stop_signal(mut self, stop: StopSignal) -> Self {
    self.stop = stop;
    self
  }

  pub fn with_preview(mut self, preview: Option<Box<dyn Render>>) -> Self {
    self.preview = preview;
    self
  }

  fn stop_requested(&self) -> bool {
    let preview_closed = self
      .preview
      .as_ref()
      .map(|preview| preview.stop_requested())
      .unwrap_or(false);
    self.stop.take_video_stop() || preview_closed
  }

  fn process_video<S: VideoSource, M: Model>(
    &self,
    source: &S,
    detector: &Detector<M>,
    writer: &DatasetWriter,
    path: &Path,
    summary: &mut BatchSummary,
  ) -> Result<VideoEnd, DecodeError> {
    let name = video_name(path);
    info!("处理视频 {}", path.display());

    let frames = source.open(path)?;
    let mut saved = 0u64;
    for sampled in FrameSampler::new(name.as_str(), frames, self.stride) {
      if self.stop_requested() {
        warn!("{}: 收到停止请求，结束当前视频（已保存 {} 帧）", name, saved);
        return Ok(VideoEnd::Interrupted);
      }

      let frame = sampled?;
      let outcome = self.process_frame(detector, writer, &frame);
      if matches!(outcome, FrameOutcome::Saved { .. }) {
        saved += 1;
      }
      summary.record(&outcome);
    }

    info!("{}: 处理完成，保存 {} 帧", name, saved);
    Ok(VideoEnd::Completed)
  }

  fn process_frame<M: Model>(
    &self,
    detector: &Detector<M>,
    writer: &DatasetWriter,
    frame: &SampledFrame,
  ) -> FrameOutcome {
    let key = frame.key();

    // 图像已存在时不再重复检测
    if writer.contains(&key) {
      info!("{}.jpg 已存在，跳过", key);
      self.render(frame, &[], detector);
      return FrameOutcome::Skipped(SkipReason::AlreadyPresent);
    }

    let detections = match detector.detect(frame.image()) {
      Ok(detections) => detections,
      Err(e) => {
        error!("帧 {}: {}", frame.frame_index(), e);
        return FrameOutcome::Skipped(SkipReason::Error);
      }
    };

    let outcome = match writer.write_frame(frame, &detections, detector.class_names()) {
      Ok(outcome) => outcome,
      Err(e) => {
        error!("{}: 保存失败: {}", key, e);
        FrameOutcome::Skipped(SkipReason::Error)
      }
    };

    match &outcome {
      FrameOutcome::Saved { count, labels } => {
        info!("{}.jpg 已保存（{} 个目标）: {}", key, count, labels.join(", "));
      }
      FrameOutcome::Skipped(SkipReason::NoDetection) => {
        info!("帧 {}: 没有检测结果", frame.frame_index());
      }
      FrameOutcome::Skipped(SkipReason::AlreadyPresent) => {
        info!("{}.jpg 已存在，跳过", key);
      }
      FrameOutcome::Skipped(SkipReason::Error) => {}
    }

    self.render(frame, &detections, detector);
    outcome
  }

  fn render<M: Model>(&self, frame: &SampledFrame, detections: &[Detection], detector: &Detector<M>) {
    if let Some(preview) = &self.preview
      && let Err(e) = preview.render_result(frame, detections, detector.class_names())
    {
      warn!("预览失败: {}", e);
    }
  }
}

impl<S, M> Task<S, Detector<M>, DatasetWriter> for ExtractTask
where
  S: VideoSource,
  M: Model,
{
  type Output = BatchSummary;
  type Error = TaskError;

  fn run_task(
    self,
    source: S,
    detector: Detector<M>,
    writer: DatasetWriter,
  ) -> Result<Self::Output, Self::Error> {
    let videos = discover_videos(&self.input_dir)?;
    if videos.is_empty() {
      return Err(TaskError::NoInput(self.input_dir.clone()));
    }
    info!(
      "发现 {} 个视频，置信度阈值 {}",
      videos.len(),
      detector.confidence()
    );

    writer.layout().ensure()?;

    let mut summary = BatchSummary {
      videos_found: videos.len(),
      ..Default::default()
    };

    for path in &videos {
      if self.stop.batch_stopped() {
        warn!("批处理被中断，剩余视频不再处理");
        break;
      }

      match self.process_video(&source, &detector, &writer, path, &mut summary) {
        Ok(VideoEnd::Completed) => summary.videos_processed += 1,
        Ok(VideoEnd::Interrupted) => {
          summary.videos_processed += 1;
          summary.videos_interrupted += 1;
        }
        Err(e) => {
          error!("视频 {} 处理失败: {}", path.display(), e);
          summary.videos_failed += 1;
        }
      }

      // 停止请求只作用于发出时正在处理的视频
      if self.stop.take_video_stop() {
        debug!("{} 已结束，停止请求不再传递给下一个视频", path.display());
      }
    }

    summary.classes_written = writer.write_class_manifest(detector.class_names())?;
    info!(
      "类别清单 {} 已生成，共 {} 个类别",
      writer.layout().classes_path().display(),
      summary.classes_written
    );
    info!(
      "处理完成: 视频 {}/{}（失败 {}），采样 {} 帧，保存 {} 帧 / {} 个目标，无检测 {}，已存在 {}，错误 {}",
      summary.videos_processed,
      summary.videos_found,
      summary.videos_failed,
      summary.frames_sampled,
      summary.frames_saved,
      summary.objects_saved,
      summary.skipped_no_detection,
      summary.skipped_already_present,
      summary.frame_errors
    );

    Ok(summary)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn matches_extensions_case_insensitively() {
    assert!(is_video(Path::new("a.mp4")));
    assert!(is_video(Path::new("a.MP4")));
    assert!(is_video(Path::new("b.Mov")));
    assert!(is_video(Path::new("c.avi")));
    assert!(!is_video(Path::new("d.mkv")));
    assert!(!is_video(Path::new("mp4")));
  }

  #[test]
  fn discovers_only_video_files() {
    let dir = tempfile::tempdir().unwrap();
    for name in ["a.mp4", "a.mov", "b.MP4", "notes.txt", "c.avi"] {
      std::fs::write(dir.path().join(name), b"").unwrap();
    }
    std::fs::create_dir(dir.path().join("folder.mp4")).unwrap();

    let mut names: Vec<String> = discover_videos(dir.path())
      .unwrap()
      .iter()
      .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
      .collect();
    names.sort();
    assert_eq!(names, vec!["a.mov", "a.mp4", "b.MP4", "c.avi"]);
  }

  #[test]
  fn missing_directory_has_no_videos() {
    let dir = tempfile::tempdir().unwrap();
    assert!(discover_videos(&dir.path().join("absent")).unwrap().is_empty());
  }

  #[test]
  fn video_name_is_file_stem() {
    assert_eq!(video_name(Path::new("/data/videos/reef.01.mp4")), "reef.01");
  }

  #[test]
  fn stop_signal_stops_video_then_batch() {
    let stop = StopSignal::new();
    assert!(!stop.take_video_stop());
    assert_eq!(stop.request(), 1);
    assert!(stop.take_video_stop());
    assert!(!stop.take_video_stop());
    assert!(!stop.batch_stopped());
    stop.clone().request();
    assert!(stop.batch_stopped());
  }
}
