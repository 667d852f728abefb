// 该文件是 Qingxu （情绪） 项目的一部分。
// src/frame.rs - RGB 帧定义
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

use image::{ImageBuffer, Rgb, RgbImage};
use thiserror::Error;

const RGB_CHANNELS: usize = 3;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum FrameError {
  #[error("数据长度不匹配: 期望长度 {expected}, 实际长度 {actual}")]
  SizeMismatch { expected: usize, actual: usize },
}

/// 交错排列（NHWC）的 RGB 帧
///
/// 每一轮分析都会新建一帧，用完即丢弃。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RgbFrame {
  width: usize,
  height: usize,
  data: Box<[u8]>,
}

impl RgbFrame {
  pub fn with_shape(height: usize, width: usize) -> Self {
    let data = vec![0u8; RGB_CHANNELS * width * height].into_boxed_slice();
    Self {
      width,
      height,
      data,
    }
  }

  pub fn from_raw(width: usize, height: usize, data: Vec<u8>) -> Result<Self, FrameError> {
    let expected = RGB_CHANNELS * width * height;
    if data.len() != expected {
      return Err(FrameError::SizeMismatch {
        expected,
        actual: data.len(),
      });
    }

    Ok(Self {
      width,
      height,
      data: data.into_boxed_slice(),
    })
  }

  /// 由 BGR 排列的像素数据构造，多余的尾部字节会被忽略
  pub fn from_bgr(width: usize, height: usize, data: &[u8]) -> Result<Self, FrameError> {
    let expected = RGB_CHANNELS * width * height;
    if data.len() < expected {
      return Err(FrameError::SizeMismatch {
        expected,
        actual: data.len(),
      });
    }

    let mut frame = Self::with_shape(height, width);
    for (dst, src) in frame
      .data
      .chunks_exact_mut(RGB_CHANNELS)
      .zip(data[..expected].chunks_exact(RGB_CHANNELS))
    {
      dst[0] = src[2];
      dst[1] = src[1];
      dst[2] = src[0];
    }
    Ok(frame)
  }

  pub fn height(&self) -> usize {
    self.height
  }

  pub fn width(&self) -> usize {
    self.width
  }

  pub fn channels(&self) -> usize {
    RGB_CHANNELS
  }

  pub fn as_nhwc(&self) -> &[u8] {
    &self.data
  }

  pub fn to_rgb_image(&self) -> RgbImage {
    let width = self.width;
    let data = &self.data;

    ImageBuffer::from_fn(self.width as u32, self.height as u32, |x, y| {
      let idx = (y as usize * width + x as usize) * RGB_CHANNELS;
      Rgb([data[idx], data[idx + 1], data[idx + 2]])
    })
  }
}

impl AsMut<[u8]> for RgbFrame {
  fn as_mut(&mut self) -> &mut [u8] {
    &mut self.data
  }
}

impl From<RgbImage> for RgbFrame {
  fn from(image: RgbImage) -> Self {
    let (width, height) = image.dimensions();
    Self {
      width: width as usize,
      height: height as usize,
      data: image.into_raw().into_boxed_slice(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_from_raw_rejects_wrong_length() {
    let err = RgbFrame::from_raw(2, 2, vec![0; 11]).unwrap_err();
    assert_eq!(
      err,
      FrameError::SizeMismatch {
        expected: 12,
        actual: 11
      }
    );
  }

  #[test]
  fn test_from_bgr_swaps_channels() {
    let frame = RgbFrame::from_bgr(1, 1, &[10, 20, 30, 99]).unwrap();
    assert_eq!(frame.as_nhwc(), &[30, 20, 10]);
  }

  #[test]
  fn test_rgb_image_conversion_keeps_pixels() {
    let mut image = RgbImage::new(3, 2);
    image.put_pixel(2, 1, Rgb([1, 2, 3]));
    let frame = RgbFrame::from(image.clone());

    assert_eq!(frame.width(), 3);
    assert_eq!(frame.height(), 2);
    assert_eq!(&frame.as_nhwc()[15..18], &[1, 2, 3]);
    assert_eq!(frame.to_rgb_image(), image);
  }
}
