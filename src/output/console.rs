// 该文件是 Qingxu （情绪） 项目的一部分。
// src/output/console.rs - 终端情绪面板
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

use std::io::Write;

use thiserror::Error;
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme, analysis::TickEvent, emotion::EmotionDistribution,
  frame::RgbFrame, output::Render,
};

const BAR_WIDTH: usize = 20;
const BAR_FILLED: char = '█';
const BAR_EMPTY: char = '░';
const NAME_WIDTH: usize = 9;

#[derive(Error, Debug)]
pub enum ConsoleOutputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
}

/// 终端输出：每个标签一行进度条，末尾显示主导情绪
pub struct ConsoleOutput;

impl FromUrlWithScheme for ConsoleOutput {
  const SCHEME: &'static str = "console";
}

impl FromUrl for ConsoleOutput {
  type Error = ConsoleOutputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(ConsoleOutputError::SchemeMismatch);
    }
    Ok(ConsoleOutput)
  }
}

impl Render for ConsoleOutput {
  type Error = ConsoleOutputError;

  fn render_result(&self, _frame: &RgbFrame, event: &TickEvent) -> Result<(), Self::Error> {
    if let Some(panel) = format_panel(event) {
      let mut stdout = std::io::stdout().lock();
      writeln!(stdout, "{}", panel)?;
      stdout.flush()?;
    }
    Ok(())
  }
}

/// 概率 `[0, 100]` 映射到固定宽度的进度条
pub fn progress_bar(probability: f32) -> String {
  let filled = ((probability / 100.0).clamp(0.0, 1.0) * BAR_WIDTH as f32).round() as usize;
  let mut bar = String::with_capacity(BAR_WIDTH * BAR_FILLED.len_utf8());
  bar.extend(std::iter::repeat_n(BAR_FILLED, filled));
  bar.extend(std::iter::repeat_n(BAR_EMPTY, BAR_WIDTH - filled));
  bar
}

fn format_distribution(distribution: &EmotionDistribution) -> String {
  let mut lines = vec!["情绪概率:".to_string()];
  for (emotion, probability) in distribution.iter() {
    lines.push(format!(
      "  {:<width$} {} {:6.2}%",
      emotion.display_name(),
      progress_bar(probability),
      probability,
      width = NAME_WIDTH
    ));
  }
  lines.join("\n")
}

/// `NoUpdate` 返回 `None`，终端上保留上一次的面板
pub fn format_panel(event: &TickEvent) -> Option<String> {
  match event {
    TickEvent::NoUpdate => None,
    TickEvent::Updated {
      distribution,
      dominant,
    } => Some(format!(
      "{}\n主导情绪:\n  {} {} ({:.2}%)",
      format_distribution(distribution),
      dominant.emotion.emoji(),
      dominant.emotion.display_name(),
      dominant.probability
    )),
    TickEvent::Failed { message } => Some(format!("情绪识别出错: {}", message)),
  }
}
