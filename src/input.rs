// 该文件是 Qingxu （情绪） 项目的一部分。
// src/input.rs - 视频/图像输入
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
use tracing::debug;

use crate::{FromUrl, frame::RgbFrame};

/// 帧来源
///
/// `open` 获取设备句柄，`read_frame` 每次读取一帧，`close` 释放句柄。
/// 句柄按值交给 `close`，因此每个句柄最多只能被释放一次。
pub trait FrameSource {
  type Handle;

  fn open(&mut self) -> Result<Self::Handle, CaptureError>;
  fn read_frame(&mut self, handle: &mut Self::Handle) -> Result<RgbFrame, CaptureError>;
  fn close(&mut self, handle: Self::Handle);
}

/// 帧来源错误，两类都会结束实时会话
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CaptureError {
  #[error("设备不可用: {0}")]
  DeviceUnavailable(String),
  #[error("帧捕获失败: {0}")]
  CaptureFailed(String),
}

/// 已打开的帧来源
///
/// 离开作用域时（正常结束、出错返回或 panic 展开）自动调用 `close`。
pub struct OpenedSource<'a, S: FrameSource> {
  source: &'a mut S,
  handle: Option<S::Handle>,
}

impl<'a, S: FrameSource> OpenedSource<'a, S> {
  pub fn open(source: &'a mut S) -> Result<Self, CaptureError> {
    let handle = source.open()?;
    debug!("帧来源已打开");
    Ok(Self {
      source,
      handle: Some(handle),
    })
  }

  pub fn read_frame(&mut self) -> Result<RgbFrame, CaptureError> {
    match self.handle.as_mut() {
      Some(handle) => self.source.read_frame(handle),
      None => Err(CaptureError::CaptureFailed("设备已关闭".to_string())),
    }
  }

  pub fn close(mut self) {
    self.release();
  }

  fn release(&mut self) {
    if let Some(handle) = self.handle.take() {
      self.source.close(handle);
      debug!("帧来源已关闭");
    }
  }
}

impl<S: FrameSource> Drop for OpenedSource<'_, S> {
  fn drop(&mut self) {
    self.release();
  }
}

#[cfg(feature = "read_image_file")]
mod read_image_file;
#[cfg(feature = "read_image_file")]
pub use self::read_image_file::{ImageFileHandle, ImageFileInput, ImageFileInputError};

#[cfg(feature = "v4l_input")]
mod v4l_input;
#[cfg(feature = "v4l_input")]
pub use self::v4l_input::{V4lHandle, V4lInput, V4lInputError, yuyv_to_rgb};

#[cfg(feature = "gstreamer_input")]
mod gstreamer_input;
#[cfg(feature = "gstreamer_input")]
pub use self::gstreamer_input::{
  GStreamerHandle, GStreamerInput, GStreamerInputError, GStreamerInputPipelineBuilder,
};

#[derive(Error, Debug)]
pub enum InputError {
  #[cfg(feature = "read_image_file")]
  #[error("Image file input error: {0}")]
  ImageFileInputError(#[from] ImageFileInputError),
  #[cfg(feature = "v4l_input")]
  #[error("V4L input error: {0}")]
  V4lInputError(#[from] V4lInputError),
  #[cfg(feature = "gstreamer_input")]
  #[error("GStreamer input error: {0}")]
  GStreamerInputError(#[from] GStreamerInputError),
  #[error("URI scheme mismatch")]
  SchemeMismatch,
}

pub enum InputWrapper {
  #[cfg(feature = "read_image_file")]
  ReadImageFile(ImageFileInput),
  #[cfg(feature = "v4l_input")]
  V4l(V4lInput),
  #[cfg(feature = "gstreamer_input")]
  GStreamer(GStreamerInput),
}

pub enum InputHandle {
  #[cfg(feature = "read_image_file")]
  ReadImageFile(ImageFileHandle),
  #[cfg(feature = "v4l_input")]
  V4l(V4lHandle),
  #[cfg(feature = "gstreamer_input")]
  GStreamer(GStreamerHandle),
}

impl FromUrl for InputWrapper {
  type Error = InputError;

  fn from_url(url: &url::Url) -> Result<Self, Self::Error> {
    #[cfg(feature = "read_image_file")]
    {
      use crate::FromUrlWithScheme;

      if url.scheme() == ImageFileInput::SCHEME {
        let input = ImageFileInput::from_url(url)?;
        return Ok(InputWrapper::ReadImageFile(input));
      }
    }
    #[cfg(feature = "v4l_input")]
    {
      use crate::FromUrlWithScheme;

      if url.scheme() == V4lInput::SCHEME {
        let input = V4lInput::from_url(url)?;
        return Ok(InputWrapper::V4l(input));
      }
    }
    #[cfg(feature = "gstreamer_input")]
    {
      use crate::FromUrlWithScheme;

      if url.scheme() == GStreamerInputPipelineBuilder::SCHEME {
        let input = GStreamerInputPipelineBuilder::from_url(url)?.into_input();
        return Ok(InputWrapper::GStreamer(input));
      }
    }
    Err(InputError::SchemeMismatch)
  }
}

const HANDLE_MISMATCH: &str = "句柄类型与输入源不匹配";
const NO_INPUT_BACKEND: &str = "未启用任何输入后端";

impl FrameSource for InputWrapper {
  type Handle = InputHandle;

  #[allow(unreachable_patterns)]
  fn open(&mut self) -> Result<Self::Handle, CaptureError> {
    match self {
      #[cfg(feature = "read_image_file")]
      InputWrapper::ReadImageFile(input) => input.open().map(InputHandle::ReadImageFile),
      #[cfg(feature = "v4l_input")]
      InputWrapper::V4l(input) => input.open().map(InputHandle::V4l),
      #[cfg(feature = "gstreamer_input")]
      InputWrapper::GStreamer(input) => input.open().map(InputHandle::GStreamer),
      _ => Err(CaptureError::DeviceUnavailable(NO_INPUT_BACKEND.to_string())),
    }
  }

  #[allow(unreachable_patterns)]
  fn read_frame(&mut self, handle: &mut Self::Handle) -> Result<RgbFrame, CaptureError> {
    match (self, handle) {
      #[cfg(feature = "read_image_file")]
      (InputWrapper::ReadImageFile(input), InputHandle::ReadImageFile(handle)) => {
        input.read_frame(handle)
      }
      #[cfg(feature = "v4l_input")]
      (InputWrapper::V4l(input), InputHandle::V4l(handle)) => input.read_frame(handle),
      #[cfg(feature = "gstreamer_input")]
      (InputWrapper::GStreamer(input), InputHandle::GStreamer(handle)) => input.read_frame(handle),
      _ => Err(CaptureError::CaptureFailed(HANDLE_MISMATCH.to_string())),
    }
  }

  #[allow(unreachable_patterns)]
  fn close(&mut self, handle: Self::Handle) {
    match (self, handle) {
      #[cfg(feature = "read_image_file")]
      (InputWrapper::ReadImageFile(input), InputHandle::ReadImageFile(handle)) => {
        input.close(handle)
      }
      #[cfg(feature = "v4l_input")]
      (InputWrapper::V4l(input), InputHandle::V4l(handle)) => input.close(handle),
      #[cfg(feature = "gstreamer_input")]
      (InputWrapper::GStreamer(input), InputHandle::GStreamer(handle)) => input.close(handle),
      _ => tracing::warn!("{}", HANDLE_MISMATCH),
    }
  }
}
