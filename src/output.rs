// 该文件是 Qingxu （情绪） 项目的一部分。
// src/output.rs - 输出定义
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

use crate::{FromUrl, FromUrlWithScheme, analysis::TickEvent, frame::RgbFrame};

/// 显示层：每帧调用一次，`NoUpdate` 时应保持上一次的情绪显示
pub trait Render {
  type Error;
  fn render_result(&self, frame: &RgbFrame, event: &TickEvent) -> Result<(), Self::Error>;
}

mod console;
pub use self::console::{ConsoleOutput, ConsoleOutputError, format_panel, progress_bar};

mod json_lines;
pub use self::json_lines::{JsonLinesOutput, JsonLinesOutputError, event_to_json};

#[cfg(feature = "save_image_file")]
pub mod draw;

#[cfg(feature = "save_image_file")]
mod save_image_file;
#[cfg(feature = "save_image_file")]
pub use self::save_image_file::{SaveImageFileError, SaveImageFileOutput};

#[derive(Error, Debug)]
pub enum OutputError {
  #[error("终端输出错误: {0}")]
  ConsoleOutputError(#[from] ConsoleOutputError),
  #[error("JSON 输出错误: {0}")]
  JsonLinesOutputError(#[from] JsonLinesOutputError),
  #[cfg(feature = "save_image_file")]
  #[error("保存图像文件错误: {0}")]
  SaveImageFileError(#[from] SaveImageFileError),
  #[error("URI 方案不匹配")]
  SchemeMismatch,
}

pub enum OutputWrapper {
  Console(ConsoleOutput),
  JsonLines(JsonLinesOutput),
  #[cfg(feature = "save_image_file")]
  SaveImageFile(SaveImageFileOutput),
}

impl FromUrl for OutputWrapper {
  type Error = OutputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    match url.scheme() {
      ConsoleOutput::SCHEME => Ok(OutputWrapper::Console(ConsoleOutput::from_url(url)?)),
      JsonLinesOutput::SCHEME => Ok(OutputWrapper::JsonLines(JsonLinesOutput::from_url(url)?)),
      #[cfg(feature = "save_image_file")]
      SaveImageFileOutput::SCHEME => Ok(OutputWrapper::SaveImageFile(
        SaveImageFileOutput::from_url(url)?,
      )),
      _ => Err(OutputError::SchemeMismatch),
    }
  }
}

impl Render for OutputWrapper {
  type Error = OutputError;

  fn render_result(&self, frame: &RgbFrame, event: &TickEvent) -> Result<(), Self::Error> {
    match self {
      OutputWrapper::Console(output) => output
        .render_result(frame, event)
        .map_err(OutputError::from),
      OutputWrapper::JsonLines(output) => output
        .render_result(frame, event)
        .map_err(OutputError::from),
      #[cfg(feature = "save_image_file")]
      OutputWrapper::SaveImageFile(output) => output
        .render_result(frame, event)
        .map_err(OutputError::from),
    }
  }
}

/// 依次渲染到多个输出，遇到第一个错误即返回
impl<O: Render> Render for Vec<O> {
  type Error = O::Error;

  fn render_result(&self, frame: &RgbFrame, event: &TickEvent) -> Result<(), Self::Error> {
    for output in self {
      output.render_result(frame, event)?;
    }
    Ok(())
  }
}

impl<O: Render + ?Sized> Render for &O {
  type Error = O::Error;

  fn render_result(&self, frame: &RgbFrame, event: &TickEvent) -> Result<(), Self::Error> {
    (**self).render_result(frame, event)
  }
}
