// 该文件是 Qingxu （情绪） 项目的一部分。
// src/input/v4l_input.rs - V4L 摄像头输入
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
use tracing::{debug, error, info};
use url::Url;
use v4l::{
  Device, FourCC, Format,
  buffer::Type,
  io::{mmap::Stream, traits::CaptureStream},
  video::Capture,
};

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::RgbFrame,
  input::{CaptureError, FrameSource},
};

#[derive(Error, Debug)]
pub enum V4lInputError {
  #[error("URI schema mismatch")]
  SchemaMismatch,
  #[error("Invalid frame size: {0}")]
  InvalidFrameSize(String),
}

const V4L_DEFAULT_DEVICE: &str = "/dev/video0";
const V4L_DEFAULT_WIDTH: u32 = 640;
const V4L_DEFAULT_HEIGHT: u32 = 480;
const V4L_BUFFER_COUNT: u32 = 4;

const FOURCC_RGB3: &[u8; 4] = b"RGB3";
const FOURCC_YUYV: &[u8; 4] = b"YUYV";
const FOURCC_MJPG: &[u8; 4] = b"MJPG";

/// V4L2 摄像头
///
/// URL 格式：`v4l:///dev/video0?width=640&height=480`。
/// 优先请求 RGB3，驱动若改为 YUYV 或 MJPG 则在读取时转换为 RGB。
pub struct V4lInput {
  device_path: String,
  width: u32,
  height: u32,
}

/// 已打开的摄像头，持有期间独占设备
pub struct V4lHandle {
  stream: Stream<'static>,
  format: Format,
  _device: Device,
}

impl FromUrlWithScheme for V4lInput {
  const SCHEME: &'static str = "v4l";
}

impl FromUrl for V4lInput {
  type Error = V4lInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(V4lInputError::SchemaMismatch);
    }

    // v4l:///dev/video0 或 v4l://localhost/dev/video0
    let device_path = match url.path() {
      "" | "/" => V4L_DEFAULT_DEVICE.to_string(),
      _ => crate::decode_url_path(url),
    };

    let query = |key: &str, default: u32| -> Result<u32, V4lInputError> {
      match url.query_pairs().find(|(k, _)| k == key) {
        Some((_, v)) => v
          .parse::<u32>()
          .ok()
          .filter(|n| *n > 0)
          .ok_or_else(|| V4lInputError::InvalidFrameSize(format!("{}={}", key, v))),
        None => Ok(default),
      }
    };

    Ok(V4lInput {
      device_path,
      width: query("width", V4L_DEFAULT_WIDTH)?,
      height: query("height", V4L_DEFAULT_HEIGHT)?,
    })
  }
}

impl FrameSource for V4lInput {
  type Handle = V4lHandle;

  fn open(&mut self) -> Result<Self::Handle, CaptureError> {
    let unavailable = |e: std::io::Error| {
      error!("无法打开摄像头 {}: {}", self.device_path, e);
      CaptureError::DeviceUnavailable(format!("{}: {}", self.device_path, e))
    };

    let device = Device::with_path(&self.device_path).map_err(unavailable)?;
    let requested = Format::new(self.width, self.height, FourCC::new(FOURCC_RGB3));
    let format = device.set_format(&requested).map_err(unavailable)?;
    if ![FOURCC_RGB3, FOURCC_YUYV, FOURCC_MJPG]
      .iter()
      .any(|f| format.fourcc == FourCC::new(f))
    {
      error!("摄像头像素格式不受支持: {}", format.fourcc);
      return Err(CaptureError::DeviceUnavailable(format!(
        "不支持的像素格式 {}",
        format.fourcc
      )));
    }

    let stream = Stream::with_buffers(&device, Type::VideoCapture, V4L_BUFFER_COUNT)
      .map_err(unavailable)?;

    info!(
      "摄像头已打开: {} {}x{} {}",
      self.device_path, format.width, format.height, format.fourcc
    );
    Ok(V4lHandle {
      stream,
      format,
      _device: device,
    })
  }

  fn read_frame(&mut self, handle: &mut Self::Handle) -> Result<RgbFrame, CaptureError> {
    let (buf, meta) = handle
      .stream
      .next()
      .map_err(|e| CaptureError::CaptureFailed(e.to_string()))?;

    let used = (meta.bytesused as usize).min(buf.len());
    let data = if used == 0 { buf } else { &buf[..used] };
    let width = handle.format.width as usize;
    let height = handle.format.height as usize;

    let fourcc = handle.format.fourcc;
    if fourcc == FourCC::new(FOURCC_RGB3) {
      let size = width * height * 3;
      if data.len() < size {
        return Err(CaptureError::CaptureFailed(format!(
          "缓冲区大小不匹配: 期望 {} 字节，实际 {} 字节",
          size,
          data.len()
        )));
      }
      RgbFrame::from_raw(width, height, data[..size].to_vec())
        .map_err(|e| CaptureError::CaptureFailed(e.to_string()))
    } else if fourcc == FourCC::new(FOURCC_YUYV) {
      let rgb = yuyv_to_rgb(data, width, height)
        .ok_or_else(|| CaptureError::CaptureFailed("YUYV 缓冲区不完整".to_string()))?;
      RgbFrame::from_raw(width, height, rgb).map_err(|e| CaptureError::CaptureFailed(e.to_string()))
    } else {
      let image = image::load_from_memory_with_format(data, image::ImageFormat::Jpeg)
        .map_err(|e| CaptureError::CaptureFailed(format!("MJPG 解码失败: {}", e)))?;
      Ok(RgbFrame::from(image.into_rgb8()))
    }
  }

  fn close(&mut self, handle: Self::Handle) {
    drop(handle);
    debug!("摄像头已释放: {}", self.device_path);
  }
}

/// YUYV (YUV 4:2:2) 转 RGB，使用 BT.601 整数近似
///
/// 缓冲区不足 `width*height*2` 字节时返回 `None`。
pub fn yuyv_to_rgb(data: &[u8], width: usize, height: usize) -> Option<Vec<u8>> {
  let pixels = width * height;
  if pixels % 2 != 0 || data.len() < pixels * 2 {
    return None;
  }

  let mut rgb = Vec::with_capacity(pixels * 3);
  for chunk in data[..pixels * 2].chunks_exact(4) {
    let (y0, u, y1, v) = (chunk[0], chunk[1], chunk[2], chunk[3]);
    rgb.extend_from_slice(&yuv_to_rgb(y0, u, v));
    rgb.extend_from_slice(&yuv_to_rgb(y1, u, v));
  }
  Some(rgb)
}

fn yuv_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
  let c = y as i32 - 16;
  let d = u as i32 - 128;
  let e = v as i32 - 128;

  let r = (298 * c + 409 * e + 128) >> 8;
  let g = (298 * c - 100 * d - 208 * e + 128) >> 8;
  let b = (298 * c + 516 * d + 128) >> 8;

  [
    r.clamp(0, 255) as u8,
    g.clamp(0, 255) as u8,
    b.clamp(0, 255) as u8,
  ]
}

#[cfg(test)]
mod tests {
  use super::*;
  use rstest::rstest;

  #[rstest]
  #[case::black(16, 128, 128, [0, 0, 0])]
  #[case::white(235, 128, 128, [255, 255, 255])]
  fn test_yuv_to_rgb_reference_points(#[case] y: u8, #[case] u: u8, #[case] v: u8, #[case] rgb: [u8; 3]) {
    assert_eq!(yuv_to_rgb(y, u, v), rgb);
  }

  #[test]
  fn test_yuyv_to_rgb_expands_pairs() {
    let data = [16, 128, 235, 128];
    let rgb = yuyv_to_rgb(&data, 2, 1).unwrap();
    assert_eq!(rgb, vec![0, 0, 0, 255, 255, 255]);
  }

  #[test]
  fn test_yuyv_to_rgb_short_buffer() {
    assert!(yuyv_to_rgb(&[0; 6], 2, 2).is_none());
  }

  #[rstest]
  #[case::default_device("v4l:///", "/dev/video0", 640, 480)]
  #[case::explicit("v4l:///dev/video2?width=320&height=240", "/dev/video2", 320, 240)]
  fn test_from_url(#[case] raw: &str, #[case] device: &str, #[case] width: u32, #[case] height: u32) {
    let input = V4lInput::from_url(&Url::parse(raw).unwrap()).unwrap();
    assert_eq!(input.device_path, device);
    assert_eq!((input.width, input.height), (width, height));
  }

  #[test]
  fn test_from_url_rejects_zero_width() {
    let url = Url::parse("v4l:///dev/video0?width=0").unwrap();
    assert!(matches!(
      V4lInput::from_url(&url),
      Err(V4lInputError::InvalidFrameSize(_))
    ));
  }
}
