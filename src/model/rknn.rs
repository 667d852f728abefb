// 该文件是 Qingxu （情绪） 项目的一部分。
// src/model/rknn.rs - RKNN 情绪分类模型
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

use image::imageops::{self, FilterType};
use rknpu::{Context, InitFlags, TensorType};
use thiserror::Error;
use tracing::{debug, error, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  emotion::{DistributionError, EmotionDistribution},
  frame::RgbFrame,
  model::{ClassificationError, DetectionOptions, EmotionModel},
};

const EMOTION_NUM_INPUTS: u32 = 1;
const EMOTION_NUM_OUTPUTS: u32 = 1;
const EMOTION_CLASS_NUM: usize = 7;
const EMOTION_DEFAULT_INPUT_SIZE: u32 = 224;

/// 运行在 RKNPU 上的整帧情绪分类模型
///
/// 模型输入为 `size×size` 的 RGB NHWC 字节，输出七个 logits，顺序与
/// [`crate::emotion::Emotion::ALL`] 一致。
pub struct RknnEmotion {
  context: Context,
  input_size: u32,
}

#[derive(Error, Debug)]
pub enum RknnEmotionError {
  #[error("模型加载错误: {0}")]
  ModelLoadError(std::io::Error),
  #[error("模型无效: {0}, 错误: {1}")]
  ModelInvalid(String, rknpu::Error),
  #[error("RKNN 错误: {0}")]
  RknnError(rknpu::Error),
  #[error("模型路径错误: {0}")]
  ModelPathError(String),
  #[error("RKNN 后端不包含人脸检测，无法强制检测人脸")]
  DetectionUnsupported,
  #[error("模型输出错误: {0}")]
  OutputError(String),
  #[error("情绪分布无效: {0}")]
  InvalidDistribution(#[from] DistributionError),
}

impl From<std::io::Error> for RknnEmotionError {
  fn from(err: std::io::Error) -> Self {
    RknnEmotionError::ModelLoadError(err)
  }
}

impl From<rknpu::Error> for RknnEmotionError {
  fn from(err: rknpu::Error) -> Self {
    RknnEmotionError::RknnError(err)
  }
}

impl From<RknnEmotionError> for ClassificationError {
  fn from(err: RknnEmotionError) -> Self {
    ClassificationError::new(err.to_string())
  }
}

impl RknnEmotionError {
  pub fn invalid(msg: &str, e: rknpu::Error) -> Self {
    RknnEmotionError::ModelInvalid(msg.to_string(), e)
  }
}

pub struct RknnEmotionBuilder {
  model_path: String,
  input_size: u32,
  options: DetectionOptions,
  flags: InitFlags,
}

impl FromUrlWithScheme for RknnEmotionBuilder {
  const SCHEME: &'static str = "rknn";
}

impl FromUrl for RknnEmotionBuilder {
  type Error = RknnEmotionError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(RknnEmotionError::ModelPathError(format!(
        "模型路径必须使用 {} 方案",
        Self::SCHEME
      )));
    }

    let input_size = url
      .query_pairs()
      .find(|(k, _)| k == "size")
      .and_then(|(_, v)| v.parse::<u32>().ok())
      .unwrap_or(EMOTION_DEFAULT_INPUT_SIZE);

    Ok(RknnEmotionBuilder {
      model_path: crate::decode_url_path(url),
      input_size,
      options: DetectionOptions::from_query(url),
      flags: InitFlags::default(),
    })
  }
}

impl RknnEmotionBuilder {
  pub fn flags(mut self, flags: InitFlags) -> Self {
    self.flags = flags;
    self
  }

  pub fn build(self) -> Result<RknnEmotion, RknnEmotionError> {
    if self.options.enforce_detection {
      error!("RKNN 情绪模型只做整帧分类，不支持 enforce_detection");
      return Err(RknnEmotionError::DetectionUnsupported);
    }

    info!("加载模型文件: {}", self.model_path);
    let mode_data = std::fs::read(&self.model_path)?;
    debug!(
      "模型文件大小: {:.2} MB",
      mode_data.len() as f64 / (1024.0 * 1024.0)
    );

    info!("创建 RKNN 推理上下文");
    let context = Context::new(&mode_data, self.flags)?;

    let num_inputs = context
      .num_inputs()
      .map_err(|e| RknnEmotionError::invalid("无法获取输入数量", e))?;
    let num_outputs = context
      .num_outputs()
      .map_err(|e| RknnEmotionError::invalid("无法获取输出数量", e))?;

    if num_inputs != EMOTION_NUM_INPUTS || num_outputs != EMOTION_NUM_OUTPUTS {
      let msg = format!(
        "预期模型输入/输出数量为 {}/{}, 实际为 {}/{}",
        EMOTION_NUM_INPUTS, EMOTION_NUM_OUTPUTS, num_inputs, num_outputs
      );
      error!("{}", msg);
      return Err(RknnEmotionError::invalid(&msg, rknpu::Error::InvalidModel));
    }

    info!("模型加载完成，输入尺寸 {}x{}", self.input_size, self.input_size);
    Ok(RknnEmotion {
      context,
      input_size: self.input_size,
    })
  }
}

impl RknnEmotion {
  fn run(&self, frame: &RgbFrame) -> Result<EmotionDistribution, RknnEmotionError> {
    let resized = imageops::resize(
      &frame.to_rgb_image(),
      self.input_size,
      self.input_size,
      FilterType::Triangle,
    );

    debug!("设置模型输入");
    self.context.set_input(
      0,
      resized.as_raw(),
      rknpu::TensorFormat::NHWC,
      TensorType::UInt8,
    )?;

    debug!("执行模型推理");
    self.context.run()?;

    let output = self.context.get_outputs()?;
    let logits = output
      .get_f32(0)
      .map_err(|e| RknnEmotionError::OutputError(e.to_string()))?;
    if logits.len() != EMOTION_CLASS_NUM {
      return Err(RknnEmotionError::OutputError(format!(
        "期望 {} 个类别，实际 {}",
        EMOTION_CLASS_NUM,
        logits.len()
      )));
    }

    let mut logit_array = [0.0f32; EMOTION_CLASS_NUM];
    logit_array.copy_from_slice(&logits[..EMOTION_CLASS_NUM]);
    Ok(EmotionDistribution::from_probabilities(softmax_percent(
      logit_array,
    ))?)
  }
}

impl EmotionModel for RknnEmotion {
  fn infer(&self, input: &RgbFrame) -> Result<EmotionDistribution, ClassificationError> {
    Ok(self.run(input)?)
  }
}

fn softmax_percent(logits: [f32; EMOTION_CLASS_NUM]) -> [f32; EMOTION_CLASS_NUM] {
  let max = logits.iter().copied().fold(f32::MIN, f32::max);
  let exp = logits.map(|x| (x - max).exp());
  let sum: f32 = exp.iter().sum();
  exp.map(|x| (x / sum * 100.0).clamp(0.0, 100.0))
}
