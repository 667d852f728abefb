// 该文件是 Qingxu （情绪） 项目的一部分。
// src/task.rs - 单张识别与实时会话
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

use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::{
  analysis::{Analyzer, AnalyzerConfig, Clock, MonotonicClock, ThrottleState, TickEvent},
  input::{CaptureError, FrameSource, OpenedSource},
  model::EmotionModel,
  output::Render,
};

pub trait Task<S, M, O>: Sized {
  type Output;
  type Error;
  fn run_task(self, source: S, model: M, output: O) -> Result<Self::Output, Self::Error>;
}

#[derive(Error, Debug)]
pub enum TaskError {
  #[error("帧来源错误: {0}")]
  Capture(#[from] CaptureError),
  #[error("渲染失败: {0}")]
  Render(String),
}

/// 停止信号的发送端，可以在其他线程（如 Ctrl-C 处理函数）中触发
#[derive(Clone, Debug)]
pub struct StopHandle(Sender<()>);

impl StopHandle {
  pub fn stop(&self) {
    // 会话已经结束时接收端被丢弃，忽略发送失败
    let _ = self.0.send(());
  }
}

#[derive(Debug)]
pub struct StopSignal(Receiver<()>);

impl StopSignal {
  fn fired(&self) -> bool {
    match self.0.try_recv() {
      Ok(()) => true,
      Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => false,
    }
  }
}

pub fn stop_channel() -> (StopHandle, StopSignal) {
  let (tx, rx) = mpsc::channel();
  (StopHandle(tx), StopSignal(rx))
}

/// 对单帧（通常是上传的图像）直接识别，不经节流
#[derive(Default, Debug)]
pub struct OneShotTask;

impl<S, M, O> Task<S, M, O> for OneShotTask
where
  S: FrameSource,
  M: EmotionModel,
  O: Render,
  O::Error: std::fmt::Display,
{
  type Output = TickEvent;
  type Error = TaskError;

  fn run_task(self, mut source: S, model: M, output: O) -> Result<Self::Output, Self::Error> {
    info!("开始任务...");
    let mut opened = OpenedSource::open(&mut source)?;
    let frame = opened.read_frame()?;
    opened.close();
    info!("输入帧获取成功，开始识别...");

    let analyzer = Analyzer::new(model, AnalyzerConfig::default());
    let event = analyzer.analyze(&frame);
    output
      .render_result(&frame, &event)
      .map_err(|e| TaskError::Render(e.to_string()))?;
    info!("任务完成");

    Ok(event)
  }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SessionState {
  #[default]
  Idle,
  Running,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
  /// 外部停止信号
  Stopped,
  FrameLimit,
  SourceFailed(CaptureError),
}

/// 一次会话的结束原因与统计
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionEnd {
  pub reason: StopReason,
  pub frames: usize,
  /// 实际调用识别模型的次数
  pub invocations: usize,
}

/// 实时会话
///
/// 每一帧依次执行：捕获、（按节流）识别、渲染、检查停止信号。
/// 无论以何种方式退出，帧来源都只会被关闭一次，会话回到 [`SessionState::Idle`]。
#[derive(Debug)]
pub struct LiveTask<C = MonotonicClock> {
  config: AnalyzerConfig,
  frame_number: Option<usize>,
  stop: Option<StopSignal>,
  clock: C,
  state: SessionState,
}

impl Default for LiveTask<MonotonicClock> {
  fn default() -> Self {
    Self {
      config: AnalyzerConfig::default(),
      frame_number: None,
      stop: None,
      clock: MonotonicClock,
      state: SessionState::Idle,
    }
  }
}

impl<C: Clock> LiveTask<C> {
  pub fn with_config(mut self, config: AnalyzerConfig) -> Self {
    self.config = config;
    self
  }

  pub fn with_frame_number(mut self, frame_number: Option<usize>) -> Self {
    self.frame_number = frame_number;
    self
  }

  pub fn with_stop_signal(mut self, stop: StopSignal) -> Self {
    self.stop = Some(stop);
    self
  }

  pub fn with_clock<C2: Clock>(self, clock: C2) -> LiveTask<C2> {
    LiveTask {
      config: self.config,
      frame_number: self.frame_number,
      stop: self.stop,
      clock,
      state: self.state,
    }
  }

  pub fn state(&self) -> SessionState {
    self.state
  }

  pub fn run<S, M, O>(
    &mut self,
    source: &mut S,
    model: M,
    output: &O,
  ) -> Result<SessionEnd, TaskError>
  where
    S: FrameSource,
    M: EmotionModel,
    O: Render + ?Sized,
    O::Error: std::fmt::Display,
  {
    let analyzer = Analyzer::new(model, self.config);
    let mut opened =
      OpenedSource::open(source).inspect_err(|e| error!("无法打开帧来源: {}", e))?;

    self.state = SessionState::Running;
    info!(
      "会话开始，识别间隔: {:.2?}，失败策略: {:?}",
      self.config.min_interval, self.config.failure_policy
    );

    let result = self.run_loop(&mut opened, &analyzer, output);

    opened.close();
    self.state = SessionState::Idle;
    match &result {
      Ok(end) => info!(
        "会话结束: {:?}，共处理 {} 帧，识别 {} 次",
        end.reason, end.frames, end.invocations
      ),
      Err(e) => error!("会话异常结束: {}", e),
    }
    result
  }

  fn run_loop<S, M, O>(
    &self,
    opened: &mut OpenedSource<'_, S>,
    analyzer: &Analyzer<M>,
    output: &O,
  ) -> Result<SessionEnd, TaskError>
  where
    S: FrameSource,
    M: EmotionModel,
    O: Render + ?Sized,
    O::Error: std::fmt::Display,
  {
    let mut throttle = ThrottleState::default();
    let mut frames = 0;
    let mut invocations = 0;

    let end = |reason, frames, invocations| SessionEnd {
      reason,
      frames,
      invocations,
    };

    loop {
      let frame = match opened.read_frame() {
        Ok(frame) => frame,
        Err(e) => {
          error!("帧捕获失败，结束会话: {}", e);
          return Ok(end(StopReason::SourceFailed(e), frames, invocations));
        }
      };
      frames += 1;
      debug!("处理第 {} 帧图像", frames);

      let (next, event) = analyzer.tick(throttle, &frame, self.clock.now());
      throttle = next;
      if event.is_update() {
        invocations += 1;
      }

      output
        .render_result(&frame, &event)
        .map_err(|e| TaskError::Render(e.to_string()))?;

      if self.frame_number.is_some_and(|n| frames >= n) {
        info!("达到指定帧数 {}, 退出任务循环", frames);
        return Ok(end(StopReason::FrameLimit, frames, invocations));
      }
      if self.stop.as_ref().is_some_and(StopSignal::fired) {
        warn!("中断信号接收，退出任务循环");
        return Ok(end(StopReason::Stopped, frames, invocations));
      }
    }
  }
}

impl<S, M, O, C> Task<S, M, O> for LiveTask<C>
where
  S: FrameSource,
  M: EmotionModel,
  O: Render,
  O::Error: std::fmt::Display,
  C: Clock,
{
  type Output = SessionEnd;
  type Error = TaskError;

  fn run_task(mut self, mut source: S, model: M, output: O) -> Result<Self::Output, Self::Error> {
    self.run(&mut source, model, &output)
  }
}
