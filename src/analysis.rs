// 该文件是 Qingxu （情绪） 项目的一部分。
// src/analysis.rs - 节流情绪分析
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

//! # 节流分析
//!
//! 帧会持续到达，但情绪识别开销较大，两次调用之间至少间隔 `min_interval`。
//! 节流状态 [`ThrottleState`] 是显式的值：每次 [`Analyzer::tick`] 传入旧状态，返回新状态。

use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::{
  emotion::{DominantEmotion, EmotionDistribution},
  frame::RgbFrame,
  model::EmotionModel,
};

pub const MIN_INTERVAL_SECONDS: f64 = 2.0;

/// 单调时钟
pub trait Clock {
  fn now(&self) -> Instant;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MonotonicClock;

impl Clock for MonotonicClock {
  fn now(&self) -> Instant {
    Instant::now()
  }
}

/// 识别失败后是否也计入节流
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FailurePolicy {
  /// 失败不更新上次调用时间，下一帧立即重试
  #[default]
  RetryNextTick,
  /// 失败同样更新上次调用时间，等满间隔再重试
  Throttle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnalyzerConfig {
  pub min_interval: Duration,
  pub failure_policy: FailurePolicy,
}

impl Default for AnalyzerConfig {
  fn default() -> Self {
    Self {
      min_interval: Duration::from_secs_f64(MIN_INTERVAL_SECONDS),
      failure_policy: FailurePolicy::default(),
    }
  }
}

impl AnalyzerConfig {
  pub fn with_min_interval(mut self, min_interval: Duration) -> Self {
    self.min_interval = min_interval;
    self
  }

  pub fn with_failure_policy(mut self, failure_policy: FailurePolicy) -> Self {
    self.failure_policy = failure_policy;
    self
  }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ThrottleState {
  last_invocation: Option<Instant>,
}

impl ThrottleState {
  pub fn last_invocation(&self) -> Option<Instant> {
    self.last_invocation
  }

  /// 从未调用过时总是可以调用
  pub fn is_due(&self, now: Instant, min_interval: Duration) -> bool {
    match self.last_invocation {
      Some(last) => now.saturating_duration_since(last) >= min_interval,
      None => true,
    }
  }

  fn invoked_at(now: Instant) -> Self {
    Self {
      last_invocation: Some(now),
    }
  }
}

/// 每一帧的分析结果
#[derive(Debug, Clone, PartialEq)]
pub enum TickEvent {
  /// 未到间隔，显示保持上一次的状态
  NoUpdate,
  Updated {
    distribution: EmotionDistribution,
    dominant: DominantEmotion,
  },
  Failed {
    message: String,
  },
}

impl TickEvent {
  pub fn is_update(&self) -> bool {
    !matches!(self, TickEvent::NoUpdate)
  }
}

pub struct Analyzer<M> {
  model: M,
  config: AnalyzerConfig,
}

impl<M: EmotionModel> Analyzer<M> {
  pub fn new(model: M, config: AnalyzerConfig) -> Self {
    Self { model, config }
  }

  pub fn config(&self) -> &AnalyzerConfig {
    &self.config
  }

  pub fn model(&self) -> &M {
    &self.model
  }

  /// 处理一帧，返回新的节流状态和本帧的结果
  pub fn tick(
    &self,
    state: ThrottleState,
    frame: &RgbFrame,
    now: Instant,
  ) -> (ThrottleState, TickEvent) {
    if !state.is_due(now, self.config.min_interval) {
      debug!("距上次识别不足 {:.2?}，跳过本帧", self.config.min_interval);
      return (state, TickEvent::NoUpdate);
    }

    let event = self.analyze(frame);
    let next = match (&event, self.config.failure_policy) {
      (TickEvent::Updated { .. }, _) | (TickEvent::Failed { .. }, FailurePolicy::Throttle) => {
        ThrottleState::invoked_at(now)
      }
      _ => state,
    };
    (next, event)
  }

  /// 不经节流直接识别（单张图像模式）
  pub fn analyze(&self, frame: &RgbFrame) -> TickEvent {
    let started = Instant::now();
    match self.model.infer(frame) {
      Ok(distribution) => {
        let dominant = distribution.dominant();
        info!(
          "识别完成，耗时: {:.2?}，主导情绪: {} ({:.2}%)",
          started.elapsed(),
          dominant.emotion,
          dominant.probability
        );
        TickEvent::Updated {
          distribution,
          dominant,
        }
      }
      Err(e) => {
        warn!("情绪识别失败: {}", e.message());
        TickEvent::Failed {
          message: e.to_string(),
        }
      }
    }
  }
}

#[cfg(test)]
pub(crate) mod tests {
  use std::cell::{Cell, RefCell};

  use super::*;
  use crate::{emotion::Emotion, model::ClassificationError};
  use approx::assert_relative_eq;
  use rstest::rstest;

  /// 按脚本返回结果并记录调用次数的模型
  pub(crate) struct ScriptedModel {
    pub calls: Cell<usize>,
    script: RefCell<Vec<Result<EmotionDistribution, ClassificationError>>>,
  }

  impl ScriptedModel {
    pub(crate) fn always_happy() -> Self {
      Self {
        calls: Cell::new(0),
        script: RefCell::new(Vec::new()),
      }
    }

    /// 依次返回脚本中的结果，脚本耗尽后返回 happy
    pub(crate) fn scripted(
      mut script: Vec<Result<EmotionDistribution, ClassificationError>>,
    ) -> Self {
      script.reverse();
      Self {
        calls: Cell::new(0),
        script: RefCell::new(script),
      }
    }
  }

  pub(crate) fn happy() -> EmotionDistribution {
    EmotionDistribution::from_probabilities([2.0, 1.0, 1.5, 87.5, 5.0, 1.0, 2.0]).unwrap()
  }

  impl EmotionModel for ScriptedModel {
    fn infer(&self, _input: &RgbFrame) -> Result<EmotionDistribution, ClassificationError> {
      self.calls.set(self.calls.get() + 1);
      self.script.borrow_mut().pop().unwrap_or_else(|| Ok(happy()))
    }
  }

  fn at(base: Instant, secs: f64) -> Instant {
    base + Duration::from_secs_f64(secs)
  }

  fn frame() -> RgbFrame {
    RgbFrame::with_shape(2, 2)
  }

  #[test]
  fn test_skip_within_interval_scenario() {
    let analyzer = Analyzer::new(ScriptedModel::always_happy(), AnalyzerConfig::default());
    let base = Instant::now();
    let mut state = ThrottleState::default();
    let mut events = Vec::new();
    for t in [0.0, 1.0, 2.1] {
      let (next, event) = analyzer.tick(state, &frame(), at(base, t));
      state = next;
      events.push(event);
    }

    assert_eq!(analyzer.model().calls.get(), 2);
    assert!(events[0].is_update());
    assert_eq!(events[1], TickEvent::NoUpdate);
    assert!(events[2].is_update());
    assert_eq!(state.last_invocation(), Some(at(base, 2.1)));
  }

  #[test]
  fn test_updated_event_carries_dominant() {
    let analyzer = Analyzer::new(ScriptedModel::always_happy(), AnalyzerConfig::default());
    let (_, event) = analyzer.tick(ThrottleState::default(), &frame(), Instant::now());
    match event {
      TickEvent::Updated {
        distribution,
        dominant,
      } => {
        assert_eq!(dominant.emotion, Emotion::Happy);
        assert_relative_eq!(dominant.probability, 87.5);
        assert_relative_eq!(distribution.probability(Emotion::Sad), 5.0);
      }
      other => panic!("unexpected event {:?}", other),
    }
  }

  #[test]
  fn test_failure_then_next_eligible_tick_retries() {
    let model = ScriptedModel::scripted(vec![
      Ok(happy()),
      Err(ClassificationError::new("Face could not be detected")),
    ]);
    let analyzer = Analyzer::new(model, AnalyzerConfig::default());
    let base = Instant::now();

    let (state, _) = analyzer.tick(ThrottleState::default(), &frame(), at(base, 0.0));
    let (state, failed) = analyzer.tick(state, &frame(), at(base, 2.0));
    assert!(
      matches!(failed, TickEvent::Failed { ref message } if message.contains("could not be detected"))
    );

    let (_, retried) = analyzer.tick(state, &frame(), at(base, 4.0));
    assert!(matches!(retried, TickEvent::Updated { .. }));
    assert_eq!(analyzer.model().calls.get(), 3);
  }

  #[test]
  fn test_retry_policy_keeps_last_invocation() {
    let model = ScriptedModel::scripted(vec![Ok(happy()), Err(ClassificationError::new("boom"))]);
    let analyzer = Analyzer::new(model, AnalyzerConfig::default());
    let base = Instant::now();

    let (state, _) = analyzer.tick(ThrottleState::default(), &frame(), at(base, 0.0));
    let (state, event) = analyzer.tick(state, &frame(), at(base, 2.0));
    assert!(matches!(event, TickEvent::Failed { .. }));
    assert_eq!(state.last_invocation(), Some(at(base, 0.0)));
  }

  #[test]
  fn test_first_failure_retries_on_next_frame() {
    let model = ScriptedModel::scripted(vec![Err(ClassificationError::new("boom"))]);
    let analyzer = Analyzer::new(model, AnalyzerConfig::default());
    let base = Instant::now();

    let (state, event) = analyzer.tick(ThrottleState::default(), &frame(), at(base, 0.0));
    assert!(matches!(event, TickEvent::Failed { .. }));
    assert_eq!(state.last_invocation(), None);

    let (_, event) = analyzer.tick(state, &frame(), at(base, 0.5));
    assert!(matches!(event, TickEvent::Updated { .. }));
    assert_eq!(analyzer.model().calls.get(), 2);
  }

  #[test]
  fn test_throttle_policy_delays_retry() {
    let model = ScriptedModel::scripted(vec![Err(ClassificationError::new("boom"))]);
    let config = AnalyzerConfig::default().with_failure_policy(FailurePolicy::Throttle);
    let analyzer = Analyzer::new(model, config);
    let base = Instant::now();

    let (state, event) = analyzer.tick(ThrottleState::default(), &frame(), at(base, 0.0));
    assert!(matches!(event, TickEvent::Failed { .. }));
    assert_eq!(state.last_invocation(), Some(at(base, 0.0)));

    let (state, event) = analyzer.tick(state, &frame(), at(base, 1.0));
    assert_eq!(event, TickEvent::NoUpdate);
    let (_, event) = analyzer.tick(state, &frame(), at(base, 2.0));
    assert!(matches!(event, TickEvent::Updated { .. }));
  }

  #[rstest]
  #[case::fast_frames(100, 10_000)]
  #[case::every_interval(2_000, 20_000)]
  #[case::jittery(1_999, 15_000)]
  #[case::slow_frames(3_500, 30_000)]
  fn test_invocation_count_bounded(#[case] step_ms: u64, #[case] total_ms: u64) {
    let analyzer = Analyzer::new(ScriptedModel::always_happy(), AnalyzerConfig::default());
    let base = Instant::now();
    let mut state = ThrottleState::default();
    let mut last_invoked: Option<Instant> = None;

    let mut t = 0;
    while t <= total_ms {
      let now = base + Duration::from_millis(t);
      let before = analyzer.model().calls.get();
      let (next, _) = analyzer.tick(state, &frame(), now);
      if analyzer.model().calls.get() > before {
        if let Some(last) = last_invoked {
          assert!(now.duration_since(last) >= Duration::from_secs(2));
        }
        last_invoked = Some(now);
      }
      state = next;
      t += step_ms;
    }

    let bound = (total_ms as f64 / 2_000.0).ceil() as usize + 1;
    assert!(analyzer.model().calls.get() <= bound);
  }

  #[test]
  fn test_analyze_bypasses_throttle() {
    let analyzer = Analyzer::new(ScriptedModel::always_happy(), AnalyzerConfig::default());
    assert!(analyzer.analyze(&frame()).is_update());
    assert!(analyzer.analyze(&frame()).is_update());
    assert_eq!(analyzer.model().calls.get(), 2);
  }

  #[test]
  fn test_clock_before_last_invocation_is_not_due() {
    let base = Instant::now() + Duration::from_secs(10);
    let state = ThrottleState::invoked_at(base);
    assert!(!state.is_due(base - Duration::from_secs(1), Duration::from_secs(2)));
  }
}
