// 该文件是 Qingxu （情绪） 项目的一部分。
// src/output/save_image_file.rs - 保存带情绪面板的图像
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

use std::{path::Path, sync::Mutex};

use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  analysis::TickEvent,
  frame::RgbFrame,
  output::{
    Render,
    draw::{Draw, DrawError},
  },
};

/// 每帧覆盖写同一个文件，相当于当前显示画面的快照
///
/// URL 格式：`image:///path/to/snapshot.png?font=/path/to/font.ttf`。
/// 情绪面板在 `NoUpdate` 时保持上一次的内容。
pub struct SaveImageFileOutput {
  path: String,
  draw: Draw,
  retained: Mutex<TickEvent>,
}

#[derive(Error, Debug)]
pub enum SaveImageFileError {
  #[error("I/O 错误: {0}")]
  IoError(std::io::Error),
  #[error("图像错误: {0}")]
  ImageError(image::ImageError),
  #[error("字体错误: {0}")]
  DrawError(#[from] DrawError),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
  #[error("面板状态锁已损坏")]
  LockPoisoned,
}

impl FromUrlWithScheme for SaveImageFileOutput {
  const SCHEME: &'static str = "image";
}

impl FromUrl for SaveImageFileOutput {
  type Error = SaveImageFileError;

  fn from_url(uri: &Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(SaveImageFileError::SchemeMismatch(format!(
        "期望保存方式 '{}', 实际保存方式 '{}'",
        Self::SCHEME,
        uri.scheme()
      )));
    }

    let draw = match uri.query_pairs().find(|(k, _)| k == "font") {
      Some((_, font)) => Draw::with_font_file(&font)?,
      None => Draw::default(),
    };

    Ok(SaveImageFileOutput {
      path: crate::decode_url_path(uri),
      draw,
      retained: Mutex::new(TickEvent::NoUpdate),
    })
  }
}

impl SaveImageFileOutput {
  fn save_image(&self, image: image::RgbImage) -> Result<(), SaveImageFileError> {
    if let Some(parent) = Path::new(&self.path).parent()
      && !parent.as_os_str().is_empty()
    {
      std::fs::create_dir_all(parent).map_err(SaveImageFileError::IoError)?;
    }

    image
      .save(&self.path)
      .map_err(SaveImageFileError::ImageError)?;

    debug!("保存图像到文件: {}", self.path);

    Ok(())
  }
}

impl Render for SaveImageFileOutput {
  type Error = SaveImageFileError;

  fn render_result(&self, frame: &RgbFrame, event: &TickEvent) -> Result<(), Self::Error> {
    let mut retained = self
      .retained
      .lock()
      .map_err(|_| SaveImageFileError::LockPoisoned)?;
    if event.is_update() {
      *retained = event.clone();
    }

    let mut image = frame.to_rgb_image();
    self.draw.draw_event(&mut image, &retained);
    drop(retained);

    self.save_image(image)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::emotion::EmotionDistribution;
  use image::Rgb;

  #[test]
  fn test_panel_retained_across_skipped_frames() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("snap").join("latest.png");
    let url = Url::parse(&format!("image://{}", path.display())).unwrap();
    let output = SaveImageFileOutput::from_url(&url).unwrap();

    let frame = RgbFrame::with_shape(240, 320);
    let distribution =
      EmotionDistribution::from_probabilities([100.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]).unwrap();
    let dominant = distribution.dominant();
    output
      .render_result(
        &frame,
        &TickEvent::Updated {
          distribution,
          dominant,
        },
      )
      .unwrap();
    output.render_result(&frame, &TickEvent::NoUpdate).unwrap();

    let saved = image::open(&path).unwrap().into_rgb8();
    assert_eq!(saved.dimensions(), (320, 240));
    // 第一行 angry 满格，使用主导颜色
    assert_ne!(saved.get_pixel(20, 12), &Rgb([0, 0, 0]));
  }

  #[test]
  fn test_scheme_mismatch() {
    let url = Url::parse("folder:///tmp/out").unwrap();
    assert!(matches!(
      SaveImageFileOutput::from_url(&url),
      Err(SaveImageFileError::SchemeMismatch(_))
    ));
  }
}
