// 该文件是 Qingxu （情绪） 项目的一部分。
// src/output/draw.rs - 情绪面板可视化
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

use ab_glyph::{FontVec, PxScale};
use image::{Rgb, RgbImage};
use imageproc::{
  drawing::{draw_filled_rect_mut, draw_text_mut},
  rect::Rect,
};
use thiserror::Error;

use crate::{analysis::TickEvent, emotion::EmotionDistribution};

// 面板布局常量
const PANEL_PADDING: i32 = 8;
const BAR_WIDTH: u32 = 160;
const BAR_HEIGHT: u32 = 14;
const BAR_GAP: i32 = 6;
const LABEL_FONT_SIZE: f32 = 16.0;
const BANNER_HEIGHT: u32 = 28;

const TRACK_COLOR: [u8; 3] = [48, 48, 48];
const BAR_COLOR: [u8; 3] = [0, 120, 255]; // 蓝色
const DOMINANT_COLOR: [u8; 3] = [255, 170, 0]; // 橙色
const ERROR_COLOR: [u8; 3] = [200, 30, 30]; // 红色
const TEXT_COLOR: [u8; 3] = [255, 255, 255];

#[derive(Error, Debug)]
pub enum DrawError {
  #[error("字体文件读取失败: {0}")]
  FontIoError(#[from] std::io::Error),
  #[error("字体文件无效: {0}")]
  InvalidFont(String),
}

/// 在帧上绘制情绪面板
///
/// 没有字体时只画进度条，不画文字。
#[derive(Default)]
pub struct Draw {
  font: Option<FontVec>,
}

impl Draw {
  pub fn with_font_file(path: &str) -> Result<Self, DrawError> {
    let data = std::fs::read(path)?;
    let font = FontVec::try_from_vec(data).map_err(|e| DrawError::InvalidFont(e.to_string()))?;
    Ok(Self { font: Some(font) })
  }

  pub fn draw_event(&self, image: &mut RgbImage, event: &TickEvent) {
    match event {
      TickEvent::NoUpdate => {}
      TickEvent::Updated { distribution, .. } => self.draw_distribution(image, distribution),
      TickEvent::Failed { message } => self.draw_error(image, message),
    }
  }

  fn draw_distribution(&self, image: &mut RgbImage, distribution: &EmotionDistribution) {
    let dominant = distribution.dominant().emotion;

    for (row, (emotion, probability)) in distribution.iter().enumerate() {
      let y = PANEL_PADDING + row as i32 * (BAR_HEIGHT as i32 + BAR_GAP);

      let track = Rect::at(PANEL_PADDING, y).of_size(BAR_WIDTH, BAR_HEIGHT);
      draw_filled_rect_mut(image, track, Rgb(TRACK_COLOR));

      let filled = ((probability / 100.0).clamp(0.0, 1.0) * BAR_WIDTH as f32).round() as u32;
      if filled > 0 {
        let color = if emotion == dominant {
          DOMINANT_COLOR
        } else {
          BAR_COLOR
        };
        let bar = Rect::at(PANEL_PADDING, y).of_size(filled, BAR_HEIGHT);
        draw_filled_rect_mut(image, bar, Rgb(color));
      }

      let label = format!("{} {:.2}%", emotion.display_name(), probability);
      self.draw_label(image, PANEL_PADDING * 2 + BAR_WIDTH as i32, y - 1, &label);
    }
  }

  fn draw_error(&self, image: &mut RgbImage, message: &str) {
    if image.width() == 0 {
      return;
    }
    let banner = Rect::at(0, 0).of_size(image.width(), BANNER_HEIGHT);
    draw_filled_rect_mut(image, banner, Rgb(ERROR_COLOR));
    self.draw_label(image, PANEL_PADDING, PANEL_PADDING / 2, message);
  }

  fn draw_label(&self, image: &mut RgbImage, x: i32, y: i32, text: &str) {
    if let Some(font) = &self.font {
      draw_text_mut(
        image,
        Rgb(TEXT_COLOR),
        x,
        y,
        PxScale::from(LABEL_FONT_SIZE),
        font,
        text,
      );
    }
  }
}
