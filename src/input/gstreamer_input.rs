// 该文件是 Qingxu （情绪） 项目的一部分。
// src/input/gstreamer_input.rs - GStreamer 输入
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

//! # GStreamer 视频输入模块
//!
//! 通过 GStreamer 管道读取摄像头或视频文件，管道末端统一转换为 RGB 并交给 appsink。
//!
//! ## 系统依赖
//!
//! **Ubuntu/Debian:**
//! ```bash
//! sudo apt-get install libgstreamer1.0-dev libgstreamer-plugins-base1.0-dev
//! ```
//!
//! ## URL 格式
//!
//! - 摄像头：`gst://camera/dev/video0?width=640&height=480&fps=15&rotate=90`
//! - 视频文件：`gst://file/path/to/video.mp4?rotate=180`
//!
//! 管道在 `open` 时才启动，`close` 时切换到 `Null` 状态释放设备。

use std::collections::HashMap;

use gstreamer::{self as gst, prelude::*};
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use thiserror::Error;
use tracing::{info, warn};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::RgbFrame,
  input::{CaptureError, FrameSource},
};

/// GStreamer 输入错误类型
#[derive(Error, Debug)]
pub enum GStreamerInputError {
  /// URI scheme 不匹配（期望 "gst://camera" 或 "gst://file"）
  #[error("URI scheme mismatch")]
  SchemeMismatch,
  #[error("GStreamer error: {0}")]
  GStreamerError(#[from] gst::glib::Error),
  #[error("GStreamer boolean error: {0}")]
  GStreamerBoolError(#[from] gst::glib::BoolError),
  #[error("Failed to get appsink element")]
  AppSinkNotFound,
  #[error("Failed to convert element to appsink")]
  AppSinkConversionFailed,
  #[error("Failed to get video info from caps")]
  VideoInfoError,
  #[error("Unsupported video format")]
  UnsupportedFormat,
  #[error("Pipeline error: {0}")]
  PipelineError(String),
  #[error("Buffer size mismatch: expected {expected} bytes, got {actual} bytes")]
  BufferSizeMismatch { expected: usize, actual: usize },
  #[error("State change error: {0}")]
  StateChangeError(#[from] gst::StateChangeError),
}

const GSTREAMER_DEFAULT_WIDTH: u32 = 640;
const GSTREAMER_DEFAULT_HEIGHT: u32 = 480;
const GSTREAMER_DEFAULT_FPS: u32 = 15;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GStreamerInputBuilderItem {
  FileSource(String),
  CameraSource {
    camera: String,
    io_mode: Option<u32>,
    format: Option<String>,
    width: u32,
    height: u32,
    fps: u32,
  },
  TargetFormat {
    format: String,
  },
  VideoFlip {
    method: u32,
  },
}

impl GStreamerInputBuilderItem {
  fn to_pipeline(&self) -> String {
    match self {
      GStreamerInputBuilderItem::FileSource(path) => {
        format!("filesrc location=\"{}\" ! decodebin", path)
      }
      GStreamerInputBuilderItem::CameraSource {
        camera,
        io_mode,
        format,
        width,
        height,
        fps,
      } => {
        let io_mode_str = io_mode
          .map(|mode| format!(" io-mode={}", mode))
          .unwrap_or_default();
        let format_str = format
          .as_ref()
          .map(|f| format!(",format={}", f))
          .unwrap_or_default();
        format!(
          "v4l2src device={}{} ! video/x-raw{},width={},height={},framerate={}/1",
          camera, io_mode_str, format_str, width, height, fps
        )
      }
      GStreamerInputBuilderItem::TargetFormat { format } => {
        format!("videoconvert ! video/x-raw,format={}", format)
      }
      GStreamerInputBuilderItem::VideoFlip { method } => {
        format!("videoflip method={}", method)
      }
    }
  }
}

/// GStreamer 输入管道构建器
pub struct GStreamerInputPipelineBuilder {
  items: Vec<GStreamerInputBuilderItem>,
}

impl GStreamerInputPipelineBuilder {
  fn build_camera_pipeline(path: &str, query: &HashMap<String, String>) -> Self {
    let parse = |key: &str, default: u32| {
      query
        .get(key)
        .and_then(|v| v.parse::<u32>().ok())
        .unwrap_or(default)
    };

    let mut items = vec![GStreamerInputBuilderItem::CameraSource {
      camera: path.to_string(),
      io_mode: query.get("io-mode").and_then(|v| v.parse::<u32>().ok()),
      format: query.get("format").cloned(),
      width: parse("width", GSTREAMER_DEFAULT_WIDTH),
      height: parse("height", GSTREAMER_DEFAULT_HEIGHT),
      fps: parse("fps", GSTREAMER_DEFAULT_FPS),
    }];
    items.extend(Self::video_flip(query.get("rotate").map(String::as_str)));
    GStreamerInputPipelineBuilder { items }
  }

  fn build_file_pipeline(path: &str, query: &HashMap<String, String>) -> Self {
    let mut items = vec![GStreamerInputBuilderItem::FileSource(path.to_string())];
    items.extend(Self::video_flip(query.get("rotate").map(String::as_str)));
    GStreamerInputPipelineBuilder { items }
  }

  fn video_flip(rotate: Option<&str>) -> Option<GStreamerInputBuilderItem> {
    let method = match rotate? {
      "90" => 1,
      "180" => 2,
      "270" => 3,
      _ => return None,
    };
    Some(GStreamerInputBuilderItem::VideoFlip { method })
  }

  pub fn description(&self) -> String {
    let basic_pipeline = self
      .items
      .iter()
      .map(GStreamerInputBuilderItem::to_pipeline)
      .collect::<Vec<String>>()
      .join(" ! ");
    format!(
      "{} ! appsink max-buffers=2 drop=true name=sink",
      basic_pipeline
    )
  }

  pub fn into_input(self) -> GStreamerInput {
    GStreamerInput {
      description: self.description(),
    }
  }
}

impl FromUrlWithScheme for GStreamerInputPipelineBuilder {
  const SCHEME: &'static str = "gst";
}

impl FromUrl for GStreamerInputPipelineBuilder {
  type Error = GStreamerInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(GStreamerInputError::SchemeMismatch);
    }

    let query: HashMap<String, String> = url
      .query_pairs()
      .map(|(k, v)| (String::from(k), String::from(v)))
      .collect();

    let path = crate::decode_url_path(url);
    let mut builder = match url.host_str() {
      Some("camera") => Self::build_camera_pipeline(&path, &query),
      Some("file") => Self::build_file_pipeline(&path, &query),
      _ => {
        return Err(GStreamerInputError::SchemeMismatch);
      }
    };

    builder.items.push(GStreamerInputBuilderItem::TargetFormat {
      format: "RGB".to_string(),
    });

    Ok(builder)
  }
}

/// GStreamer 视频输入，`open` 时按描述创建并启动管道
pub struct GStreamerInput {
  description: String,
}

pub struct GStreamerHandle {
  pipeline: gst::Pipeline,
  appsink: gst_app::AppSink,
}

impl GStreamerInput {
  fn launch(&self) -> Result<GStreamerHandle, GStreamerInputError> {
    gst::init()?;
    info!("GStreamer pipeline description: {}", self.description);

    let pipeline = gst::parse::launch(&self.description)?
      .downcast::<gst::Pipeline>()
      .map_err(|_| GStreamerInputError::PipelineError("Failed to create pipeline".to_string()))?;

    let appsink = pipeline
      .by_name("sink")
      .ok_or(GStreamerInputError::AppSinkNotFound)?
      .downcast::<gst_app::AppSink>()
      .map_err(|_| GStreamerInputError::AppSinkConversionFailed)?;

    if let Err(e) = pipeline.set_state(gst::State::Playing) {
      let _ = pipeline.set_state(gst::State::Null);
      return Err(e.into());
    }

    Ok(GStreamerHandle { pipeline, appsink })
  }
}

impl FrameSource for GStreamerInput {
  type Handle = GStreamerHandle;

  fn open(&mut self) -> Result<Self::Handle, CaptureError> {
    self
      .launch()
      .map_err(|e| CaptureError::DeviceUnavailable(e.to_string()))
  }

  fn read_frame(&mut self, handle: &mut Self::Handle) -> Result<RgbFrame, CaptureError> {
    let sample = handle
      .appsink
      .pull_sample()
      .map_err(|e| CaptureError::CaptureFailed(format!("Failed to pull sample: {}", e)))?;
    convert_sample(sample).map_err(|e| CaptureError::CaptureFailed(e.to_string()))
  }

  fn close(&mut self, handle: Self::Handle) {
    if let Err(e) = handle.pipeline.set_state(gst::State::Null) {
      warn!("Failed to stop GStreamer pipeline: {}", e);
    }
  }
}

fn convert_sample(sample: gst::Sample) -> Result<RgbFrame, GStreamerInputError> {
  let buffer = sample
    .buffer()
    .ok_or_else(|| GStreamerInputError::PipelineError("No buffer in sample".to_string()))?;
  let caps = sample
    .caps()
    .ok_or_else(|| GStreamerInputError::PipelineError("No caps in sample".to_string()))?;

  let video_info =
    gst_video::VideoInfo::from_caps(caps).map_err(|_| GStreamerInputError::VideoInfoError)?;

  let width = video_info.width() as usize;
  let height = video_info.height() as usize;
  let stride = video_info.stride()[0] as usize;

  let map = buffer.map_readable().map_err(|e| {
    GStreamerInputError::PipelineError(format!("Failed to map buffer for reading: {}", e))
  })?;
  let data = map.as_slice();

  let row_size = width * 3;
  let expected_size = stride * (height.saturating_sub(1)) + row_size;
  if data.len() < expected_size {
    return Err(GStreamerInputError::BufferSizeMismatch {
      expected: expected_size,
      actual: data.len(),
    });
  }

  // 去掉行尾对齐填充
  let mut packed = Vec::with_capacity(row_size * height);
  for row in 0..height {
    packed.extend_from_slice(&data[row * stride..row * stride + row_size]);
  }

  let frame = match video_info.format() {
    gst_video::VideoFormat::Rgb => RgbFrame::from_raw(width, height, packed),
    gst_video::VideoFormat::Bgr => RgbFrame::from_bgr(width, height, &packed),
    _ => return Err(GStreamerInputError::UnsupportedFormat),
  };
  frame.map_err(|e| GStreamerInputError::PipelineError(e.to_string()))
}
