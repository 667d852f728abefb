// 该文件是 Qingxu （情绪） 项目的一部分。
// src/bin/live.rs - 摄像头实时情绪识别
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

use std::{thread, time::Duration};

use anyhow::Result;
use clap::Parser;
use tracing::{info, warn};
use url::Url;

use qingxu::{
  FromUrl,
  analysis::{AnalyzerConfig, FailurePolicy, MIN_INTERVAL_SECONDS},
  input::InputWrapper,
  model::ModelWrapper,
  output::OutputWrapper,
  task::{LiveTask, StopReason, Task, stop_channel},
};

/// Qingxu 实时情绪识别参数
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 情绪识别模型，例如 exec:///usr/local/bin/fer 或 rknn:///models/fer.rknn
  #[arg(long, value_name = "MODEL")]
  pub model: Url,
  /// 输入来源，例如 v4l:///dev/video0
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,
  /// 输出，可以重复指定
  #[arg(long, value_name = "OUTPUT", default_value = "console:")]
  pub output: Vec<Url>,

  /// 最大处理帧数，不指定表示一直运行到中断
  #[arg(long, value_name = "FRAME_NUMBER")]
  pub frame_number: Option<usize>,

  /// 两次识别之间的最小间隔（秒）
  #[arg(long, value_name = "SECONDS", default_value_t = MIN_INTERVAL_SECONDS)]
  pub min_interval: f64,

  /// 识别失败同样计入节流间隔
  #[arg(long)]
  pub throttle_failures: bool,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("模型: {}", args.model);
  info!("输入来源: {}", args.input);
  for output in &args.output {
    info!("输出: {}", output);
  }

  let min_interval = Duration::try_from_secs_f64(args.min_interval)
    .map_err(|e| anyhow::anyhow!("无效的识别间隔 {}: {}", args.min_interval, e))?;
  let failure_policy = if args.throttle_failures {
    FailurePolicy::Throttle
  } else {
    FailurePolicy::RetryNextTick
  };
  let config = AnalyzerConfig::default()
    .with_min_interval(min_interval)
    .with_failure_policy(failure_policy);

  let input = InputWrapper::from_url(&args.input)?;
  let model = ModelWrapper::from_url(&args.model)?;
  let output = args
    .output
    .iter()
    .map(OutputWrapper::from_url)
    .collect::<Result<Vec<_>, _>>()?;

  let (stop, signal) = stop_channel();
  ctrlc::set_handler(move || {
    info!("收到中断信号，准备退出...");
    stop.stop();
    thread::spawn(|| {
      thread::sleep(Duration::from_secs(30));
      warn!("强制退出程序");
      std::process::exit(1);
    });
  })
  .expect("Error setting Ctrl-C handler");

  let end = LiveTask::default()
    .with_config(config)
    .with_frame_number(args.frame_number)
    .with_stop_signal(signal)
    .run_task(input, model, output)?;

  match end.reason {
    StopReason::SourceFailed(e) => Err(e.into()),
    _ => {
      info!("任务完成，退出");
      Ok(())
    }
  }
}
