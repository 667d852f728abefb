// 该文件是 Qingxu （情绪） 项目的一部分。
// src/model/command.rs - 外部命令情绪识别桥接
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

//! # 外部命令模型
//!
//! 通过子进程调用现成的预训练情绪识别库。每次识别都会启动一次外部程序：
//!
//! - 标准输入：PNG 编码的当前帧
//! - 环境变量 `QINGXU_ENFORCE_DETECTION`：`true` 或 `false`
//! - 标准输出：JSON 格式的情绪概率
//!
//! 接受以下三种 JSON 结构（多张人脸时只取第一张）：
//!
//! ```json
//! {"angry": 2.0, "disgust": 1.0, "fear": 1.5, "happy": 87.5, "sad": 5.0, "surprise": 1.0, "neutral": 2.0}
//! {"emotion": {"angry": 2.0, "...": 0.0}}
//! [{"emotion": {"angry": 2.0, "...": 0.0}}]
//! ```
//!
//! URL 格式：`exec:///path/to/program?arg=--flag&arg=value&enforce_detection=false`

use std::{
  io::{Cursor, Write},
  process::{Command, Stdio},
  thread,
};

use image::ImageFormat;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, error};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  emotion::{DistributionError, EmotionDistribution},
  frame::RgbFrame,
  model::{ClassificationError, DetectionOptions, EmotionModel},
};

pub const ENFORCE_DETECTION_ENV: &str = "QINGXU_ENFORCE_DETECTION";

#[derive(Error, Debug)]
pub enum CommandModelError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("未指定外部程序路径")]
  MissingProgram,
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("图像编码错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("外部程序退出码 {code:?}: {stderr}")]
  ProcessFailed { code: Option<i32>, stderr: String },
  #[error("JSON 解析错误: {0}")]
  JsonError(#[from] serde_json::Error),
  #[error("无法识别的输出结构: {0}")]
  UnexpectedOutput(String),
  #[error("情绪分布无效: {0}")]
  InvalidDistribution(#[from] DistributionError),
}

impl From<CommandModelError> for ClassificationError {
  fn from(err: CommandModelError) -> Self {
    ClassificationError::new(err.to_string())
  }
}

#[derive(Debug, Clone)]
pub struct CommandModel {
  program: String,
  args: Vec<String>,
  options: DetectionOptions,
}

impl FromUrlWithScheme for CommandModel {
  const SCHEME: &'static str = "exec";
}

impl FromUrl for CommandModel {
  type Error = CommandModelError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(CommandModelError::SchemeMismatch);
    }

    let program = crate::decode_url_path(url);
    if program.is_empty() || program == "/" {
      return Err(CommandModelError::MissingProgram);
    }

    let args = url
      .query_pairs()
      .filter(|(k, _)| k == "arg")
      .map(|(_, v)| v.into_owned())
      .collect();

    Ok(CommandModel {
      program,
      args,
      options: DetectionOptions::from_query(url),
    })
  }
}

impl CommandModel {
  pub fn new(program: impl Into<String>, options: DetectionOptions) -> Self {
    Self {
      program: program.into(),
      args: Vec::new(),
      options,
    }
  }

  pub fn with_args<I, S>(mut self, args: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    self.args = args.into_iter().map(Into::into).collect();
    self
  }

  fn run(&self, frame: &RgbFrame) -> Result<EmotionDistribution, CommandModelError> {
    let mut png = Vec::new();
    frame
      .to_rgb_image()
      .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)?;
    debug!("调用外部程序 {}，输入 {} 字节", self.program, png.len());

    let mut child = Command::new(&self.program)
      .args(&self.args)
      .env(
        ENFORCE_DETECTION_ENV,
        self.options.enforce_detection.to_string(),
      )
      .stdin(Stdio::piped())
      .stdout(Stdio::piped())
      .stderr(Stdio::piped())
      .spawn()?;

    // 标准输入由单独线程写入，与读取 stdout/stderr 并行
    let stdin = child.stdin.take();
    let output = thread::scope(|scope| {
      if let Some(mut stdin) = stdin {
        let png = &png;
        scope.spawn(move || {
          // 外部程序可能不读取输入就退出，写入失败时以退出状态为准
          if let Err(e) = stdin.write_all(png) {
            debug!("写入外部程序标准输入失败: {}", e);
          }
        });
      }
      child.wait_with_output()
    })?;

    if !output.status.success() {
      return Err(CommandModelError::ProcessFailed {
        code: output.status.code(),
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
      });
    }

    parse_emotion_json(&String::from_utf8_lossy(&output.stdout))
  }
}

impl EmotionModel for CommandModel {
  fn infer(&self, input: &RgbFrame) -> Result<EmotionDistribution, ClassificationError> {
    Ok(self.run(input)?)
  }
}

/// 解析外部程序输出的情绪概率
pub fn parse_emotion_json(text: &str) -> Result<EmotionDistribution, CommandModelError> {
  let value: Value = serde_json::from_str(text.trim())?;

  let face = match &value {
    Value::Array(faces) => faces
      .first()
      .ok_or_else(|| CommandModelError::UnexpectedOutput("人脸列表为空".to_string()))?,
    other => other,
  };

  let scores = match face.get("emotion") {
    Some(inner) => inner,
    None => face,
  };

  let map = scores
    .as_object()
    .ok_or_else(|| CommandModelError::UnexpectedOutput(scores.to_string()))?;

  let mut pairs = Vec::with_capacity(map.len());
  for (label, v) in map {
    let p = v.as_f64().ok_or_else(|| {
      CommandModelError::UnexpectedOutput(format!("标签 {} 的值不是数字: {}", label, v))
    })?;
    pairs.push((label.as_str(), p as f32));
  }

  Ok(EmotionDistribution::from_pairs(pairs)?)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::emotion::Emotion;
  use approx::assert_relative_eq;
  use rstest::rstest;

  const SCORES: &str = r#"{"angry": 2.0, "disgust": 1.0, "fear": 1.5, "happy": 87.5, "sad": 5.0, "surprise": 1.0, "neutral": 2.0}"#;

  #[rstest]
  #[case::bare_map(SCORES.to_string())]
  #[case::wrapped(format!(r#"{{"emotion": {}, "dominant_emotion": "happy"}}"#, SCORES))]
  #[case::face_list(format!(r#"[{{"emotion": {}}}, {{"emotion": {{}}}}]"#, SCORES))]
  fn test_parse_accepted_shapes(#[case] text: String) {
    let dist = parse_emotion_json(&text).unwrap();
    assert_eq!(dist.dominant().emotion, Emotion::Happy);
    assert_relative_eq!(dist.probability(Emotion::Fear), 1.5);
  }

  #[rstest]
  #[case::empty_list("[]")]
  #[case::not_object("42")]
  #[case::string_value(r#"{"angry": "high"}"#)]
  fn test_parse_rejects_unexpected_output(#[case] text: &str) {
    assert!(matches!(
      parse_emotion_json(text),
      Err(CommandModelError::UnexpectedOutput(_))
    ));
  }

  #[test]
  fn test_parse_rejects_incomplete_distribution() {
    let err = parse_emotion_json(r#"{"happy": 100.0}"#).unwrap_err();
    assert!(matches!(err, CommandModelError::InvalidDistribution(_)));
  }

  #[test]
  fn test_from_url_collects_args_and_options() {
    let url =
      Url::parse("exec:///opt/fer/bin/analyze?arg=--backend&arg=opencv&enforce_detection=true")
        .unwrap();
    let model = CommandModel::from_url(&url).unwrap();
    assert_eq!(model.program, "/opt/fer/bin/analyze");
    assert_eq!(model.args, vec!["--backend", "opencv"]);
    assert!(model.options.enforce_detection);
  }

  #[test]
  fn test_from_url_requires_program() {
    let url = Url::parse("exec:///").unwrap();
    assert!(matches!(
      CommandModel::from_url(&url),
      Err(CommandModelError::MissingProgram)
    ));
  }

  #[cfg(unix)]
  #[test]
  fn test_infer_runs_external_program() {
    let script = format!("cat > /dev/null; echo '{}'", SCORES);
    let model =
      CommandModel::new("sh", DetectionOptions::default()).with_args(["-c", script.as_str()]);
    let frame = RgbFrame::with_shape(4, 4);
    let dist = model.infer(&frame).unwrap();
    assert_relative_eq!(dist.dominant().probability, 87.5);
  }

  #[cfg(unix)]
  #[test]
  fn test_infer_passes_detection_flag() {
    let script = format!(
      "cat > /dev/null; test \"${}\" = true && echo '{}'",
      ENFORCE_DETECTION_ENV, SCORES
    );
    let model = CommandModel::new(
      "sh",
      DetectionOptions {
        enforce_detection: true,
      },
    )
    .with_args(["-c", script.as_str()]);
    assert!(model.infer(&RgbFrame::with_shape(2, 2)).is_ok());
  }

  #[cfg(unix)]
  #[test]
  fn test_infer_survives_chatty_stderr_before_reading_stdin() {
    // 噪声帧的 PNG 远大于管道缓冲区
    let mut seed = 0x2545_f491_u32;
    let mut frame = RgbFrame::with_shape(480, 640);
    for byte in frame.as_mut() {
      seed ^= seed << 13;
      seed ^= seed >> 17;
      seed ^= seed << 5;
      *byte = (seed >> 24) as u8;
    }

    let script = format!(
      "head -c 200000 /dev/zero | tr '\\0' x >&2; cat > /dev/null; echo '{}'",
      SCORES
    );
    let model =
      CommandModel::new("sh", DetectionOptions::default()).with_args(["-c", script.as_str()]);

    let (tx, rx) = std::sync::mpsc::channel();
    std::thread::spawn(move || {
      let _ = tx.send(model.infer(&frame));
    });
    let dist = rx
      .recv_timeout(std::time::Duration::from_secs(30))
      .expect("infer blocked on stdin/stderr pipes")
      .unwrap();
    assert_eq!(dist.dominant().emotion, Emotion::Happy);
  }

  #[cfg(unix)]
  #[test]
  fn test_infer_failure_carries_stderr() {
    let model = CommandModel::new("sh", DetectionOptions::default())
      .with_args(["-c", "cat > /dev/null; echo 'Face could not be detected' >&2; exit 3"]);
    let err = model.infer(&RgbFrame::with_shape(2, 2)).unwrap_err();
    assert!(err.message().contains("Face could not be detected"));
    assert!(err.message().contains("3"));
  }
}
