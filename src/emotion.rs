// 该文件是 Qingxu （情绪） 项目的一部分。
// src/emotion.rs - 情绪标签与概率分布
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

use std::{fmt, str::FromStr};

use thiserror::Error;

const EMOTION_NUM: usize = 7;
const MAX_PROBABILITY: f32 = 100.0;

/// 固定的七种情绪标签，声明顺序即迭代顺序
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Emotion {
  Angry,
  Disgust,
  Fear,
  Happy,
  Sad,
  Surprise,
  Neutral,
}

impl Emotion {
  pub const ALL: [Emotion; EMOTION_NUM] = [
    Emotion::Angry,
    Emotion::Disgust,
    Emotion::Fear,
    Emotion::Happy,
    Emotion::Sad,
    Emotion::Surprise,
    Emotion::Neutral,
  ];

  pub fn label(self) -> &'static str {
    match self {
      Emotion::Angry => "angry",
      Emotion::Disgust => "disgust",
      Emotion::Fear => "fear",
      Emotion::Happy => "happy",
      Emotion::Sad => "sad",
      Emotion::Surprise => "surprise",
      Emotion::Neutral => "neutral",
    }
  }

  pub fn display_name(self) -> &'static str {
    match self {
      Emotion::Angry => "Angry",
      Emotion::Disgust => "Disgust",
      Emotion::Fear => "Fear",
      Emotion::Happy => "Happy",
      Emotion::Sad => "Sad",
      Emotion::Surprise => "Surprise",
      Emotion::Neutral => "Neutral",
    }
  }

  pub fn emoji(self) -> &'static str {
    match self {
      Emotion::Angry => "😠",
      Emotion::Disgust => "🤢",
      Emotion::Fear => "😨",
      Emotion::Happy => "😄",
      Emotion::Sad => "😢",
      Emotion::Surprise => "😲",
      Emotion::Neutral => "😐",
    }
  }

  fn index(self) -> usize {
    self as usize
  }
}

impl fmt::Display for Emotion {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.label())
  }
}

impl FromStr for Emotion {
  type Err = DistributionError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    Emotion::ALL
      .into_iter()
      .find(|e| e.label().eq_ignore_ascii_case(s.trim()))
      .ok_or_else(|| DistributionError::UnknownLabel(s.to_string()))
  }
}

#[derive(Error, Debug, PartialEq)]
pub enum DistributionError {
  #[error("缺少情绪标签: {0}")]
  MissingLabel(Emotion),
  #[error("未知情绪标签: {0}")]
  UnknownLabel(String),
  #[error("情绪标签重复: {0}")]
  DuplicateLabel(Emotion),
  #[error("情绪 {emotion} 的概率无效: {value}")]
  InvalidProbability { emotion: Emotion, value: f32 },
}

/// 单帧的情绪概率分布（百分比）
///
/// 七个标签必须齐全，每个值都在 `[0, 100]` 之间；各项之和不要求恰好为 100。
#[derive(Debug, Clone, PartialEq)]
pub struct EmotionDistribution {
  probabilities: [f32; EMOTION_NUM],
}

/// 分布中概率最高的情绪
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DominantEmotion {
  pub emotion: Emotion,
  pub probability: f32,
}

impl EmotionDistribution {
  /// 按 [`Emotion::ALL`] 的顺序给出概率
  pub fn from_probabilities(probabilities: [f32; EMOTION_NUM]) -> Result<Self, DistributionError> {
    for (emotion, &value) in Emotion::ALL.iter().zip(probabilities.iter()) {
      if !value.is_finite() || !(0.0..=MAX_PROBABILITY).contains(&value) {
        return Err(DistributionError::InvalidProbability {
          emotion: *emotion,
          value,
        });
      }
    }
    Ok(Self { probabilities })
  }

  /// 由 `(标签, 概率)` 对构造，标签不区分大小写，同一标签只能出现一次
  pub fn from_pairs<I, S>(pairs: I) -> Result<Self, DistributionError>
  where
    I: IntoIterator<Item = (S, f32)>,
    S: AsRef<str>,
  {
    let mut slots = [None; EMOTION_NUM];
    for (label, value) in pairs {
      let emotion: Emotion = label.as_ref().parse()?;
      if slots[emotion.index()].replace(value).is_some() {
        return Err(DistributionError::DuplicateLabel(emotion));
      }
    }

    let mut probabilities = [0.0; EMOTION_NUM];
    for (emotion, slot) in Emotion::ALL.iter().zip(slots) {
      probabilities[emotion.index()] = slot.ok_or(DistributionError::MissingLabel(*emotion))?;
    }
    Self::from_probabilities(probabilities)
  }

  pub fn probability(&self, emotion: Emotion) -> f32 {
    self.probabilities[emotion.index()]
  }

  pub fn iter(&self) -> impl Iterator<Item = (Emotion, f32)> + '_ {
    Emotion::ALL
      .into_iter()
      .map(|emotion| (emotion, self.probability(emotion)))
  }

  /// 并列时取迭代顺序中靠前的标签
  pub fn dominant(&self) -> DominantEmotion {
    let mut dominant = DominantEmotion {
      emotion: Emotion::ALL[0],
      probability: self.probabilities[0],
    };
    for (emotion, probability) in self.iter().skip(1) {
      if probability > dominant.probability {
        dominant = DominantEmotion {
          emotion,
          probability,
        };
      }
    }
    dominant
  }
}
