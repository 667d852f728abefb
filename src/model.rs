// 该文件是 Qingxu （情绪） 项目的一部分。
// src/model.rs - 情绪识别模型
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

use thiserror::Error;
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, emotion::EmotionDistribution, frame::RgbFrame};

/// 外部情绪识别模型的调用约定
///
/// 模型被视为无状态，可以反复调用。人脸检测、特征提取和分类都在模型内部完成。
pub trait EmotionModel {
  fn infer(&self, input: &RgbFrame) -> Result<EmotionDistribution, ClassificationError>;
}

impl<M: EmotionModel + ?Sized> EmotionModel for &M {
  fn infer(&self, input: &RgbFrame) -> Result<EmotionDistribution, ClassificationError> {
    (**self).infer(input)
  }
}

impl<M: EmotionModel + ?Sized> EmotionModel for Box<M> {
  fn infer(&self, input: &RgbFrame) -> Result<EmotionDistribution, ClassificationError> {
    (**self).infer(input)
  }
}

/// 情绪识别失败，携带底层原因
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("情绪识别失败: {message}")]
pub struct ClassificationError {
  message: String,
}

impl ClassificationError {
  pub fn new(message: impl Into<String>) -> Self {
    Self {
      message: message.into(),
    }
  }

  pub fn message(&self) -> &str {
    &self.message
  }
}

/// 人脸检测策略
///
/// 宽松模式下，即使画面中没有检测到人脸，模型也应给出结果而不是报错。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DetectionOptions {
  pub enforce_detection: bool,
}

impl DetectionOptions {
  pub fn from_query(url: &Url) -> Self {
    Self {
      enforce_detection: crate::query_flag(url, "enforce_detection", false),
    }
  }
}

mod command;
pub use self::command::{CommandModel, CommandModelError, ENFORCE_DETECTION_ENV};

#[cfg(feature = "model_rknn")]
mod rknn;
#[cfg(feature = "model_rknn")]
pub use self::rknn::{RknnEmotion, RknnEmotionBuilder, RknnEmotionError};

#[derive(Error, Debug)]
pub enum ModelError {
  #[error("外部命令模型错误: {0}")]
  CommandModelError(#[from] CommandModelError),
  #[cfg(feature = "model_rknn")]
  #[error("RKNN 模型错误: {0}")]
  RknnEmotionError(#[from] RknnEmotionError),
  #[error("URI 方案不匹配")]
  SchemeMismatch,
}

pub enum ModelWrapper {
  Command(CommandModel),
  #[cfg(feature = "model_rknn")]
  Rknn(RknnEmotion),
}

impl FromUrl for ModelWrapper {
  type Error = ModelError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    match url.scheme() {
      CommandModel::SCHEME => Ok(ModelWrapper::Command(CommandModel::from_url(url)?)),
      #[cfg(feature = "model_rknn")]
      RknnEmotionBuilder::SCHEME => {
        let model = RknnEmotionBuilder::from_url(url)?.build()?;
        Ok(ModelWrapper::Rknn(model))
      }
      _ => Err(ModelError::SchemeMismatch),
    }
  }
}

impl EmotionModel for ModelWrapper {
  fn infer(&self, input: &RgbFrame) -> Result<EmotionDistribution, ClassificationError> {
    match self {
      ModelWrapper::Command(model) => model.infer(input),
      #[cfg(feature = "model_rknn")]
      ModelWrapper::Rknn(model) => model.infer(input),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_unknown_model_scheme_rejected() {
    let url = Url::parse("onnx:///models/fer.onnx").unwrap();
    assert!(matches!(
      ModelWrapper::from_url(&url),
      Err(ModelError::SchemeMismatch)
    ));
  }

  #[test]
  fn test_detection_options_default_lenient() {
    let url = Url::parse("exec:///usr/bin/fer").unwrap();
    assert!(!DetectionOptions::from_query(&url).enforce_detection);
    let url = Url::parse("exec:///usr/bin/fer?enforce_detection=true").unwrap();
    assert!(DetectionOptions::from_query(&url).enforce_detection);
  }

  #[test]
  fn test_classification_error_message() {
    let err = ClassificationError::new("no face");
    assert_eq!(err.message(), "no face");
    assert_eq!(err.to_string(), "情绪识别失败: no face");
  }
}
