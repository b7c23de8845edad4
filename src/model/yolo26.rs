// 该文件是 Qiezhen （切帧） 项目的一部分。
// src/model/yolo26.rs - 基于 RKNPU 的 YOLO26 检测模型
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::path::PathBuf;

use image::{RgbImage, imageops::FilterType};
use rknpu::{Context, InitFlags, TensorType};
use thiserror::Error;
use tracing::{debug, error, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  model::{ClassNames, DetectResult, Detection, LabelFileError, Model, load_class_names},
  url_file_path, url_query,
};

const YOLO26_NUM_INPUTS: u32 = 1;
const YOLO26_NUM_OUTPUTS: u32 = 6;
const YOLO26_INPUT_W: u32 = 640;
const YOLO26_INPUT_H: u32 = 640;
const YOLO26_HEAD_SIZES: [(usize, usize); 3] = [(80, 80), (40, 40), (20, 20)];
const YOLO26_STRIDES: [f32; 3] = [8.0, 16.0, 32.0];
const YOLO26_OBJECT_THRESH: f32 = 0.25;

pub struct Yolo26 {
  context: Context,
  class_names: ClassNames,
  object_thresh: f32,
}

#[derive(Error, Debug)]
pub enum Yolo26Error {
  #[error("模型加载错误: {0}")]
  ModelLoadError(std::io::Error),
  #[error("模型无效: {0}, 错误: {1}")]
  ModelInvalid(String, rknpu::Error),
  #[error("RKNN 错误: {0}")]
  RknnError(rknpu::Error),
  #[error("模型路径错误: {0}")]
  ModelPathError(String),
  #[error("类别文件错误: {0}")]
  LabelError(#[from] LabelFileError),
  #[error("输入图像尺寸无效: {0}x{1}")]
  EmptyInput(u32, u32),
  #[error("检测头 {head} 的输出与类别数量 {labels} 不符: {reason}")]
  ClassCountMismatch {
    head: usize,
    labels: usize,
    reason: String,
  },
}

impl From<std::io::Error> for Yolo26Error {
  fn from(err: std::io::Error) -> Self {
    Yolo26Error::ModelLoadError(err)
  }
}

impl From<rknpu::Error> for Yolo26Error {
  fn from(err: rknpu::Error) -> Self {
    Yolo26Error::RknnError(err)
  }
}

impl Yolo26Error {
  pub fn invalid(msg: &str, e: rknpu::Error) -> Self {
    Yolo26Error::ModelInvalid(msg.to_string(), e)
  }
}

/// YOLO26 模型构建器
///
/// URL 形式: `yolo26:///path/to/model.rknn?labels=/path/to/labels.json&threshold=0.25`
pub struct Yolo26Builder {
  model_path: PathBuf,
  labels_path: Option<PathBuf>,
  object_thresh: f32,
  flags: InitFlags,
}

impl FromUrlWithScheme for Yolo26Builder {
  const SCHEME: &'static str = "yolo26";
}

impl FromUrl for Yolo26Builder {
  type Error = Yolo26Error;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(Yolo26Error::ModelPathError(format!(
        "模型路径必须使用 {} 方案",
        Self::SCHEME
      )));
    }

    let object_thresh = match url_query(url, "threshold") {
      Some(v) => v
        .parse::<f32>()
        .map_err(|_| Yolo26Error::ModelPathError(format!("阈值无效: {}", v)))?,
      None => YOLO26_OBJECT_THRESH,
    };

    Ok(Yolo26Builder {
      model_path: url_file_path(url),
      labels_path: url_query(url, "labels").map(PathBuf::from),
      object_thresh,
      flags: InitFlags::default(),
    })
  }
}

impl Yolo26Builder {
  pub fn flags(mut self, flags: InitFlags) -> Self {
    self.flags = flags;
    self
  }

  pub fn threshold(&self) -> f32 {
    self.object_thresh
  }

  /// 模型内部的预过滤阈值，应不高于检测适配器的置信度阈值
  pub fn object_thresh(mut self, thresh: f32) -> Self {
    self.object_thresh = thresh;
    self
  }

  pub fn build(self) -> Result<Yolo26, Yolo26Error> {
    let class_names = match &self.labels_path {
      Some(path) => {
        info!("加载类别文件: {}", path.display());
        load_class_names(path)?
      }
      None => ClassNames::coco(),
    };

    info!("加载模型文件: {}", self.model_path.display());
    let mode_data = std::fs::read(&self.model_path)?;
    debug!(
      "模型文件大小: {:.2} MB",
      mode_data.len() as f64 / (1024.0 * 1024.0)
    );

    info!("创建 RKNN 推理上下文");
    let context = Context::new(&mode_data, self.flags)?;
    info!("模型加载完成");

    match context.sdk_version() {
      Ok(version) => {
        if let Ok(api_ver) = version.api_version() {
          debug!("模型 API 版本: {}", api_ver);
        }
        if let Ok(drv_ver) = version.driver_version() {
          debug!("模型驱动版本: {}", drv_ver);
        }
      }
      Err(e) => {
        error!("查询 SDK 版本失败: {}", e);
        return Err(Yolo26Error::invalid("无法查询 SDK 版本", e));
      }
    }

    let num_inputs = context
      .num_inputs()
      .map_err(|e| Yolo26Error::invalid("无法获取输入数量", e))?;
    let num_outputs = context
      .num_outputs()
      .map_err(|e| Yolo26Error::invalid("无法获取输出数量", e))?;

    if num_inputs != YOLO26_NUM_INPUTS || num_outputs != YOLO26_NUM_OUTPUTS {
      let msg = format!(
        "预期模型输入/输出数量为 {}/{}, 实际为 {}/{}",
        YOLO26_NUM_INPUTS, YOLO26_NUM_OUTPUTS, num_inputs, num_outputs
      );
      error!("{}", msg);
      return Err(Yolo26Error::invalid(&msg, rknpu::Error::InvalidModel));
    }

    info!("类别数量: {}", class_names.len());

    let model = Yolo26 {
      context,
      class_names,
      object_thresh: self.object_thresh,
    };
    model.check_class_count()?;
    Ok(model)
  }
}

/// 由一个检测头两个输出张量的长度推算类别数量
///
/// 回归张量长度固定为 `4 * spatial`，另一个即为分类张量。
fn head_class_count(len_a: usize, len_b: usize, spatial: usize) -> Option<usize> {
  let reg = 4 * spatial;
  let cls = if len_a == reg {
    len_b
  } else if len_b == reg {
    len_a
  } else {
    return None;
  };
  (spatial > 0 && cls > 0 && cls % spatial == 0).then_some(cls / spatial)
}

/// 根据张量大小匹配回归和分类输出
/// 返回 (reg, cls) 元组，如果大小不匹配则返回 None
fn match_reg_cls_tensors<'a>(
  tensor1: &'a [f32],
  tensor2: &'a [f32],
  reg_expected: usize,
  cls_expected: usize,
  head_idx: usize,
) -> Option<(&'a [f32], &'a [f32])> {
  if tensor1.len() == reg_expected && tensor2.len() == cls_expected {
    Some((tensor1, tensor2))
  } else if tensor1.len() == cls_expected && tensor2.len() == reg_expected {
    debug!("检测头 {}: 输出顺序交换", head_idx);
    Some((tensor2, tensor1))
  } else {
    error!(
      "检测头 {}: 输出大小不匹配 - 张量1: {}, 张量2: {}, 期望回归: {}, 期望分类: {}",
      head_idx,
      tensor1.len(),
      tensor2.len(),
      reg_expected,
      cls_expected
    );
    None
  }
}

impl Yolo26 {
  /// 用一帧空白图像试运行，确认每个检测头的分类输出与类别文件一致
  fn check_class_count(&self) -> Result<(), Yolo26Error> {
    let labels = self.class_names.len();
    let blank = RgbImage::new(YOLO26_INPUT_W, YOLO26_INPUT_H);
    self.context.set_input(
      0,
      blank.as_raw(),
      rknpu::TensorFormat::NHWC,
      TensorType::UInt8,
    )?;
    self.context.run()?;
    let output = self.context.get_outputs()?;

    for (head, &(map_h, map_w)) in YOLO26_HEAD_SIZES.iter().enumerate() {
      let mismatch = |reason: String| Yolo26Error::ClassCountMismatch {
        head,
        labels,
        reason,
      };
      let len_a = output
        .get_f32(head * 2)
        .map_err(|e| mismatch(format!("无法读取输出 {}: {}", head * 2, e)))?
        .len();
      let len_b = output
        .get_f32(head * 2 + 1)
        .map_err(|e| mismatch(format!("无法读取输出 {}: {}", head * 2 + 1, e)))?
        .len();

      match head_class_count(len_a, len_b, map_h * map_w) {
        Some(found) if found == labels => {}
        Some(found) => {
          error!("模型有 {} 个类别，类别文件有 {} 个", found, labels);
          return Err(mismatch(format!("模型输出 {} 个类别", found)));
        }
        None => {
          return Err(mismatch(format!(
            "输出长度 {}/{} 无法对应 {}x{} 特征图",
            len_a, len_b, map_h, map_w
          )));
        }
      }
    }

    debug!("检测头输出与 {} 个类别一致", labels);
    Ok(())
  }

  /// 解码三个检测头，得到模型输入坐标系下归一化的检测框
  fn postprocess(&self, output: rknpu::Output) -> Vec<Detection> {
    let class_num = self.class_names.len();
    let mut items = Vec::new();

    for (head_idx, (&(map_h, map_w), stride)) in
      YOLO26_HEAD_SIZES.iter().zip(YOLO26_STRIDES).enumerate()
    {
      let spatial = map_h * map_w;
      let reg_expected = 4 * spatial;
      let cls_expected = class_num * spatial;

      // RKNN 输出顺序可能不同，按张量大小区分回归和分类
      let tensor1 = match output.get_f32(head_idx * 2) {
        Ok(data) => data,
        Err(e) => {
          error!("获取第 {} 个输出失败: {}", head_idx * 2, e);
          continue;
        }
      };
      let tensor2 = match output.get_f32(head_idx * 2 + 1) {
        Ok(data) => data,
        Err(e) => {
          error!("获取第 {} 个输出失败: {}", head_idx * 2 + 1, e);
          continue;
        }
      };

      let Some((reg, cls)) =
        match_reg_cls_tensors(tensor1, tensor2, reg_expected, cls_expected, head_idx)
      else {
        continue;
      };

      let (input_w, input_h) = (YOLO26_INPUT_W as f32, YOLO26_INPUT_H as f32);
      for h in 0..map_h {
        for w in 0..map_w {
          let idx = h * map_w + w;

          let (score, class_id) = {
            let mut max_logit = f32::MIN;
            let mut cls_idx = 0usize;
            for c in 0..class_num {
              let logit = cls[c * spatial + idx];
              if logit > max_logit {
                max_logit = logit;
                cls_idx = c;
              }
            }
            (sigmoid(max_logit), cls_idx as u32)
          };

          if score < self.object_thresh {
            continue;
          }

          let grid_x = (w as f32) + 0.5;
          let grid_y = (h as f32) + 0.5;

          let xmin = ((grid_x - reg[idx]) * stride).clamp(0.0, input_w);
          let ymin = ((grid_y - reg[spatial + idx]) * stride).clamp(0.0, input_h);
          let xmax = ((grid_x + reg[2 * spatial + idx]) * stride).clamp(0.0, input_w);
          let ymax = ((grid_y + reg[3 * spatial + idx]) * stride).clamp(0.0, input_h);

          if xmin < xmax && ymin < ymax {
            items.push(Detection {
              class_id,
              score,
              bbox: [
                xmin / input_w,
                ymin / input_h,
                xmax / input_w,
                ymax / input_h,
              ],
            });
          }
        }
      }
    }

    debug!("检测到 {} 个物体", items.len());
    items
  }
}

impl Model for Yolo26 {
  type Error = Yolo26Error;

  fn infer(&self, input: &RgbImage) -> Result<DetectResult, Self::Error> {
    let (width, height) = input.dimensions();
    if width == 0 || height == 0 {
      return Err(Yolo26Error::EmptyInput(width, height));
    }

    let resized;
    let tensor = if (width, height) == (YOLO26_INPUT_W, YOLO26_INPUT_H) {
      input
    } else {
      resized = image::imageops::resize(input, YOLO26_INPUT_W, YOLO26_INPUT_H, FilterType::Triangle);
      &resized
    };

    debug!("设置模型输入 {}x{} -> {}x{}", width, height, YOLO26_INPUT_W, YOLO26_INPUT_H);
    self.context.set_input(
      0,
      tensor.as_raw(),
      rknpu::TensorFormat::NHWC,
      TensorType::UInt8,
    )?;

    debug!("执行模型推理");
    self.context.run()?;

    let output = self.context.get_outputs()?;
    let (sx, sy) = (width as f32, height as f32);
    let items = self
      .postprocess(output)
      .into_iter()
      .map(|det| Detection {
        bbox: [
          det.bbox[0] * sx,
          det.bbox[1] * sy,
          det.bbox[2] * sx,
          det.bbox[3] * sy,
        ],
        ..det
      })
      .collect::<Vec<_>>();

    Ok(DetectResult::from(items))
  }

  fn class_names(&self) -> &ClassNames {
    &self.class_names
  }
}

fn sigmoid(x: f32) -> f32 {
  1.0 / (1.0 + (-x).exp())
}
