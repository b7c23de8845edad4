// 该文件是 Qiezhen （切帧） 项目的一部分。
// src/model/labels.rs - 类别名称
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::{collections::BTreeMap, path::Path};

use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::model::ClassNames;

/// COCO 数据集类别名称
pub const COCO_CLASSES: [&str; 80] = [
  "person",
  "bicycle",
  "car",
  "motorcycle",
  "airplane",
  "bus",
  "train",
  "truck",
  "boat",
  "traffic light",
  "fire hydrant",
  "stop sign",
  "parking meter",
  "bench",
  "bird",
  "cat",
  "dog",
  "horse",
  "sheep",
  "cow",
  "elephant",
  "bear",
  "zebra",
  "giraffe",
  "backpack",
  "umbrella",
  "handbag",
  "tie",
  "suitcase",
  "frisbee",
  "skis",
  "snowboard",
  "sports ball",
  "kite",
  "baseball bat",
  "baseball glove",
  "skateboard",
  "surfboard",
  "tennis racket",
  "bottle",
  "wine glass",
  "cup",
  "fork",
  "knife",
  "spoon",
  "bowl",
  "banana",
  "apple",
  "sandwich",
  "orange",
  "broccoli",
  "carrot",
  "hot dog",
  "pizza",
  "donut",
  "cake",
  "chair",
  "couch",
  "potted plant",
  "bed",
  "dining table",
  "toilet",
  "tv",
  "laptop",
  "mouse",
  "remote",
  "keyboard",
  "cell phone",
  "microwave",
  "oven",
  "toaster",
  "sink",
  "refrigerator",
  "book",
  "clock",
  "vase",
  "scissors",
  "teddy bear",
  "hair drier",
  "toothbrush",
];

#[derive(Error, Debug)]
pub enum LabelFileError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("JSON 解析错误: {0}")]
  JsonError(#[from] serde_json::Error),
  #[error("类别文件格式不支持: {0}")]
  UnsupportedLayout(String),
}

/// 读取类别名称文件
///
/// 支持的格式:
/// - `*.json`: 字符串数组 `["person", ...]`，或编号到名称的对象 `{"0": "person", ...}`
/// - 其他: 纯文本，每行一个类别名称（空行忽略）
pub fn load_class_names(path: &Path) -> Result<ClassNames, LabelFileError> {
  let content = std::fs::read_to_string(path)?;
  let is_json = path
    .extension()
    .map(|ext| ext.eq_ignore_ascii_case("json"))
    .unwrap_or(false);

  let names = if is_json {
    parse_json_names(&content)?
  } else {
    content
      .lines()
      .map(str::trim)
      .filter(|line| !line.is_empty())
      .map(String::from)
      .collect()
  };

  debug!("从 {} 读取 {} 个类别名称", path.display(), names.len());
  Ok(names)
}

/// 对象形式的类别文件中允许缺失的编号数量
const MAX_MISSING_CLASS_IDS: usize = 1024;

fn parse_json_names(content: &str) -> Result<ClassNames, LabelFileError> {
  match serde_json::from_str::<Value>(content)? {
    Value::Array(items) => items
      .into_iter()
      .map(|item| match item {
        Value::String(name) => Ok(name),
        other => Err(LabelFileError::UnsupportedLayout(format!(
          "数组元素不是字符串: {}",
          other
        ))),
      })
      .collect(),
    Value::Object(map) => {
      let mut by_id = BTreeMap::new();
      for (key, value) in map {
        let id = key
          .parse::<u32>()
          .map_err(|_| LabelFileError::UnsupportedLayout(format!("类别编号无效: {}", key)))?;
        let name = match value {
          Value::String(name) => name,
          other => {
            return Err(LabelFileError::UnsupportedLayout(format!(
              "类别名称不是字符串: {}",
              other
            )));
          }
        };
        by_id.insert(id, name);
      }

      // 编号不连续时用编号本身补齐，保证下标与类别编号一致
      let count = by_id.keys().next_back().map(|id| *id as usize + 1).unwrap_or(0);
      if count > by_id.len() + MAX_MISSING_CLASS_IDS {
        return Err(LabelFileError::UnsupportedLayout(format!(
          "类别编号 {} 过大，只有 {} 个名称",
          count - 1,
          by_id.len()
        )));
      }
      if count != by_id.len() {
        warn!("类别编号不连续，共 {} 个名称，最大编号 {}", by_id.len(), count - 1);
      }
      Ok(
        (0..count as u32)
          .map(|id| by_id.remove(&id).unwrap_or_else(|| id.to_string()))
          .collect(),
      )
    }
    _ => Err(LabelFileError::UnsupportedLayout(
      "需要数组或对象".to_string(),
    )),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn write(dir: &tempfile::TempDir, name: &str, content: &str) -> std::path::PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, content).unwrap();
    path
  }

  #[test]
  fn reads_plain_text_lines() {
    let dir = tempfile::tempdir().unwrap();
    let path = write(&dir, "classes.txt", "fish\n\n crab \nshrimp\n");
    let names = load_class_names(&path).unwrap();
    assert_eq!(names.iter().collect::<Vec<_>>(), vec!["fish", "crab", "shrimp"]);
  }

  #[test]
  fn reads_json_array() {
    let dir = tempfile::tempdir().unwrap();
    let path = write(&dir, "labels.json", r#"["fish", "crab"]"#);
    let names = load_class_names(&path).unwrap();
    assert_eq!(names.name(1), "crab");
  }

  #[test]
  fn reads_json_object_ordered_by_id() {
    let dir = tempfile::tempdir().unwrap();
    let path = write(&dir, "labels.JSON", r#"{"1": "crab", "0": "fish", "3": "eel"}"#);
    let names = load_class_names(&path).unwrap();
    assert_eq!(
      names.iter().collect::<Vec<_>>(),
      vec!["fish", "crab", "2", "eel"]
    );
  }

  #[test]
  fn rejects_non_string_entries() {
    let dir = tempfile::tempdir().unwrap();
    let path = write(&dir, "labels.json", "[1, 2]");
    assert!(matches!(
      load_class_names(&path),
      Err(LabelFileError::UnsupportedLayout(_))
    ));
  }

  #[test]
  fn coco_has_eighty_classes() {
    assert_eq!(COCO_CLASSES.len(), 80);
  }

  #[test]
  fn rejects_huge_sparse_ids() {
    let dir = tempfile::tempdir().unwrap();
    let path = write(&dir, "names.json", r#"{"0": "fish", "4000000000": "whale"}"#);
    assert!(matches!(
      load_class_names(&path),
      Err(LabelFileError::UnsupportedLayout(_))
    ));
  }
}
