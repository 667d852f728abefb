// 该文件是 Qingxu （情绪） 项目的一部分。
// src/output/json_lines.rs - JSON Lines 事件输出
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
  fs::{File, OpenOptions},
  io::Write,
  path::PathBuf,
  sync::Mutex,
};

use chrono::{DateTime, Local};
use serde_json::{Map, Value, json};
use thiserror::Error;
use tracing::info;
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, analysis::TickEvent, frame::RgbFrame, output::Render};

#[derive(Error, Debug)]
pub enum JsonLinesOutputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("JSON 序列化错误: {0}")]
  JsonError(#[from] serde_json::Error),
  #[error("输出文件锁已损坏")]
  LockPoisoned,
}

/// 每个 `Updated` / `Failed` 事件写一行 JSON
///
/// `jsonl:` 写到标准输出，`jsonl:///path/events.jsonl` 追加到文件。
pub struct JsonLinesOutput {
  file: Option<Mutex<File>>,
}

impl FromUrlWithScheme for JsonLinesOutput {
  const SCHEME: &'static str = "jsonl";
}

impl FromUrl for JsonLinesOutput {
  type Error = JsonLinesOutputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(JsonLinesOutputError::SchemeMismatch);
    }

    let path = crate::decode_url_path(url);
    if path.is_empty() || path == "/" || path == "-" {
      return Ok(JsonLinesOutput { file: None });
    }

    let path = PathBuf::from(path);
    if let Some(parent) = path.parent()
      && !parent.as_os_str().is_empty()
    {
      std::fs::create_dir_all(parent)?;
    }
    let file = OpenOptions::new().create(true).append(true).open(&path)?;
    info!("情绪事件写入文件: {}", path.display());

    Ok(JsonLinesOutput {
      file: Some(Mutex::new(file)),
    })
  }
}

impl Render for JsonLinesOutput {
  type Error = JsonLinesOutputError;

  fn render_result(&self, _frame: &RgbFrame, event: &TickEvent) -> Result<(), Self::Error> {
    let Some(value) = event_to_json(event, Local::now()) else {
      return Ok(());
    };
    let line = serde_json::to_string(&value)?;

    match &self.file {
      Some(file) => {
        let mut file = file
          .lock()
          .map_err(|_| JsonLinesOutputError::LockPoisoned)?;
        writeln!(file, "{}", line)?;
      }
      None => {
        let mut stdout = std::io::stdout().lock();
        writeln!(stdout, "{}", line)?;
        stdout.flush()?;
      }
    }
    Ok(())
  }
}

/// 把事件转换为 JSON 对象，`NoUpdate` 不产生记录
pub fn event_to_json(event: &TickEvent, time: DateTime<Local>) -> Option<Value> {
  let time = time.to_rfc3339();
  match event {
    TickEvent::NoUpdate => None,
    TickEvent::Updated {
      distribution,
      dominant,
    } => {
      let emotions: Map<String, Value> = distribution
        .iter()
        .map(|(emotion, p)| (emotion.label().to_string(), json!(p)))
        .collect();
      Some(json!({
        "time": time,
        "event": "updated",
        "emotions": emotions,
        "dominant": {
          "label": dominant.emotion.label(),
          "emoji": dominant.emotion.emoji(),
          "probability": dominant.probability,
        },
      }))
    }
    TickEvent::Failed { message } => Some(json!({
      "time": time,
      "event": "failed",
      "message": message,
    })),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::emotion::EmotionDistribution;

  fn updated() -> TickEvent {
    let distribution =
      EmotionDistribution::from_probabilities([2.0, 1.0, 1.5, 87.5, 5.0, 1.0, 2.0]).unwrap();
    let dominant = distribution.dominant();
    TickEvent::Updated {
      distribution,
      dominant,
    }
  }

  #[test]
  fn test_updated_event_json() {
    let value = event_to_json(&updated(), Local::now()).unwrap();
    assert_eq!(value["event"], "updated");
    assert_eq!(value["emotions"].as_object().unwrap().len(), 7);
    assert_eq!(value["emotions"]["happy"], 87.5);
    assert_eq!(value["dominant"]["label"], "happy");
    assert_eq!(value["dominant"]["emoji"], "😄");
    assert!(value["time"].as_str().is_some());
  }

  #[test]
  fn test_no_update_produces_nothing() {
    assert!(event_to_json(&TickEvent::NoUpdate, Local::now()).is_none());
  }

  #[test]
  fn test_file_output_appends_lines() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("events").join("session.jsonl");
    let url = Url::parse(&format!("jsonl://{}", path.display())).unwrap();
    let output = JsonLinesOutput::from_url(&url).unwrap();
    let frame = RgbFrame::with_shape(1, 1);

    output.render_result(&frame, &updated()).unwrap();
    output.render_result(&frame, &TickEvent::NoUpdate).unwrap();
    output
      .render_result(
        &frame,
        &TickEvent::Failed {
          message: "no face".to_string(),
        },
      )
      .unwrap();

    let text = std::fs::read_to_string(&path).unwrap();
    let lines: Vec<Value> = text
      .lines()
      .map(|l| serde_json::from_str(l).unwrap())
      .collect();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[1]["message"], "no face");
  }
}
