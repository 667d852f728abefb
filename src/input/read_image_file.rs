// 该文件是 Qingxu （情绪） 项目的一部分。
// src/input/read_image_file.rs - 图像文件输入
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

use image::{ImageReader, RgbImage};
use thiserror::Error;
use tracing::{error, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::RgbFrame,
  input::{CaptureError, FrameSource},
};

#[derive(Error, Debug)]
pub enum ImageFileInputError {
  #[error("URI schema mismatch")]
  SchemaMismatch,
  #[error("I/O error: {0}")]
  IoError(std::io::Error),
  #[error("Image loading error: {0}")]
  ImageLoadError(image::ImageError),
}

impl From<std::io::Error> for ImageFileInputError {
  fn from(err: std::io::Error) -> Self {
    ImageFileInputError::IoError(err)
  }
}

impl From<image::ImageError> for ImageFileInputError {
  fn from(err: image::ImageError) -> Self {
    ImageFileInputError::ImageLoadError(err)
  }
}

/// 单张图像输入（上传模式）
///
/// 打开时解码图像，之后只能读出一帧。
pub struct ImageFileInput {
  path: String,
}

pub struct ImageFileHandle {
  image: Option<RgbImage>,
}

impl FromUrlWithScheme for ImageFileInput {
  const SCHEME: &'static str = "image";
}

impl FromUrl for ImageFileInput {
  type Error = ImageFileInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(ImageFileInputError::SchemaMismatch);
    }

    Ok(ImageFileInput {
      path: crate::decode_url_path(url),
    })
  }
}

impl ImageFileInput {
  pub fn new(path: impl Into<String>) -> Self {
    Self { path: path.into() }
  }

  fn load(&self) -> Result<RgbImage, ImageFileInputError> {
    let image = ImageReader::open(&self.path)?
      .with_guessed_format()?
      .decode()?;
    Ok(image.into_rgb8())
  }
}

impl FrameSource for ImageFileInput {
  type Handle = ImageFileHandle;

  fn open(&mut self) -> Result<Self::Handle, CaptureError> {
    let image = self.load().map_err(|e| {
      error!("无法读取图像 {}: {}", self.path, e);
      CaptureError::DeviceUnavailable(format!("{}: {}", self.path, e))
    })?;
    info!(
      "已读取图像 {} ({}x{})",
      self.path,
      image.width(),
      image.height()
    );
    Ok(ImageFileHandle { image: Some(image) })
  }

  fn read_frame(&mut self, handle: &mut Self::Handle) -> Result<RgbFrame, CaptureError> {
    handle
      .image
      .take()
      .map(RgbFrame::from)
      .ok_or_else(|| CaptureError::CaptureFailed(format!("图像 {} 已读取完毕", self.path)))
  }

  fn close(&mut self, _handle: Self::Handle) {}
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::Rgb;

  #[test]
  fn test_single_frame_then_exhausted() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("face.png");
    RgbImage::from_pixel(4, 3, Rgb([9, 8, 7])).save(&path).unwrap();

    let mut input = ImageFileInput::new(path.to_string_lossy());
    let mut handle = input.open().unwrap();
    let frame = input.read_frame(&mut handle).unwrap();
    assert_eq!((frame.width(), frame.height()), (4, 3));
    assert_eq!(&frame.as_nhwc()[..3], &[9, 8, 7]);

    assert!(matches!(
      input.read_frame(&mut handle),
      Err(CaptureError::CaptureFailed(_))
    ));
    input.close(handle);
  }

  #[test]
  fn test_missing_file_is_device_unavailable() {
    let mut input = ImageFileInput::new("/nonexistent/qingxu/face.png");
    assert!(matches!(
      input.open(),
      Err(CaptureError::DeviceUnavailable(_))
    ));
  }

  #[test]
  fn test_from_url_decodes_path() {
    let url = Url::parse("image:///tmp/upload%20dir/a.jpg").unwrap();
    let input = ImageFileInput::from_url(&url).unwrap();
    assert_eq!(input.path, "/tmp/upload dir/a.jpg");
  }
}
