//! Adaptive concurrency controller: banded multiplicative steps toward a
//! latency target, error correction first, with sign-alternation damping.

#![allow(missing_docs)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]

use std::collections::VecDeque;
use std::time::Instant;

use serde::Serialize;

use crate::core::config::ControllerConfig;
use crate::core::errors::Result;
use crate::monitor::stats::StatSnapshot;

/// Decision taken on one controller call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlAction {
    Grow,
    /// Target metric above the high band.
    ShrinkLatency,
    /// Error rate above the threshold; overrides any latency decision.
    ShrinkErrors,
    Hold,
    /// Adjustment interval not yet elapsed.
    Waiting,
    /// Too few outcomes in the window to act on.
    InsufficientData,
}

impl ControlAction {
    /// +1 for growth, -1 for either shrink, 0 otherwise.
    #[must_use]
    pub const fn sign(self) -> i8 {
        match self {
            Self::Grow => 1,
            Self::ShrinkLatency | Self::ShrinkErrors => -1,
            Self::Hold | Self::Waiting | Self::InsufficientData => 0,
        }
    }

    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Grow => "grow",
            Self::ShrinkLatency => "shrink_latency",
            Self::ShrinkErrors => "shrink_errors",
            Self::Hold => "hold",
            Self::Waiting => "waiting",
            Self::InsufficientData => "insufficient_data",
        }
    }
}

/// The only instruction issued to the load generator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ControlDirective {
    pub target_concurrency: u32,
    /// Users per second to ramp at toward the target.
    pub spawn_rate: f64,
    pub action: ControlAction,
    pub previous_concurrency: u32,
    /// Whether the step factor was halved by the oscillation guard.
    pub damped: bool,
}

impl ControlDirective {
    #[must_use]
    pub const fn changed(&self) -> bool {
        self.target_concurrency != self.previous_concurrency
    }
}

/// One adjustment-tick observation kept for damping and diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Observation {
    /// Concurrency in effect after the decision.
    pub concurrency: u32,
    /// Observed value of the target metric.
    pub observed: f64,
    pub error_rate: f64,
    pub action: ControlAction,
    pub damped: bool,
}

/// Diagnostic view of the controller.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ControlState {
    pub current_concurrency: u32,
    #[serde(skip)]
    pub last_adjustment_at: Option<Instant>,
    pub history: Vec<Observation>,
    pub damped_adjustments: u64,
}

#[derive(Debug, Clone)]
pub struct AdaptiveController {
    config: ControllerConfig,
    current: u32,
    last_adjustment_at: Option<Instant>,
    history: VecDeque<Observation>,
    damped_adjustments: u64,
}

impl AdaptiveController {
    pub fn new(config: ControllerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            current: config.initial_concurrency,
            history: VecDeque::with_capacity(config.history_capacity),
            config,
            last_adjustment_at: None,
            damped_adjustments: 0,
        })
    }

    #[must_use]
    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    #[must_use]
    pub const fn current_concurrency(&self) -> u32 {
        self.current
    }

    /// Decide the next concurrency target. Always returns a directive; the
    /// controller never applies it itself.
    pub fn adjust(&mut self, snapshot: &StatSnapshot, now: Instant) -> ControlDirective {
        let interval = self.config.adjustment_interval();
        if let Some(last) = self.last_adjustment_at
            && now.saturating_duration_since(last) < interval
        {
            return self.directive(self.current, ControlAction::Waiting, false);
        }
        if snapshot.count < self.config.min_samples {
            return self.directive(self.current, ControlAction::InsufficientData, false);
        }

        let cfg = &self.config;
        let observed = cfg.target_metric.value(snapshot);
        let (action, factor) = if snapshot.error_rate > cfg.high_error_threshold {
            (ControlAction::ShrinkErrors, cfg.error_shrink_factor)
        } else if observed > cfg.target_value * cfg.high_band {
            (ControlAction::ShrinkLatency, cfg.latency_shrink_factor)
        } else if observed < cfg.target_value * cfg.low_band {
            (ControlAction::Grow, cfg.growth_factor)
        } else {
            (ControlAction::Hold, 1.0)
        };

        let damped = action.sign() != 0 && self.oscillating();
        let factor = if damped {
            1.0 + (factor - 1.0) / 2.0
        } else {
            factor
        };

        let next = self.step(action, factor);
        let previous = self.current;
        self.current = next;
        self.last_adjustment_at = Some(now);
        if damped {
            self.damped_adjustments += 1;
        }
        self.push_history(Observation {
            concurrency: next,
            observed,
            error_rate: snapshot.error_rate,
            action,
            damped,
        });

        ControlDirective {
            target_concurrency: next,
            spawn_rate: self.config.spawn_rate,
            action,
            previous_concurrency: previous,
            damped,
        }
    }

    /// Multiplicative step of at least one unit, clamped to the bounds.
    fn step(&self, action: ControlAction, factor: f64) -> u32 {
        let current = self.current;
        let scaled = (f64::from(current) * factor).round().max(0.0);
        let scaled = if scaled >= f64::from(u32::MAX) {
            u32::MAX
        } else {
            scaled as u32
        };
        let next = match action.sign() {
            1 => scaled.max(current.saturating_add(1)),
            -1 => scaled.min(current.saturating_sub(1)),
            _ => current,
        };
        next.clamp(self.config.min_concurrency, self.config.max_concurrency)
    }

    /// Whether the last `oscillation_window` non-hold adjustments alternated sign.
    fn oscillating(&self) -> bool {
        let window = self.config.oscillation_window;
        let signs: Vec<i8> = self
            .history
            .iter()
            .rev()
            .map(|o| o.action.sign())
            .filter(|s| *s != 0)
            .take(window)
            .collect();
        signs.len() == window && signs.windows(2).all(|w| w[0] == -w[1])
    }

    fn push_history(&mut self, observation: Observation) {
        if self.history.len() == self.config.history_capacity {
            self.history.pop_front();
        }
        self.history.push_back(observation);
    }

    fn directive(&self, target: u32, action: ControlAction, damped: bool) -> ControlDirective {
        ControlDirective {
            target_concurrency: target,
            spawn_rate: self.config.spawn_rate,
            action,
            previous_concurrency: self.current,
            damped,
        }
    }

    #[must_use]
    pub fn state(&self) -> ControlState {
        ControlState {
            current_concurrency: self.current,
            last_adjustment_at: self.last_adjustment_at,
            history: self.history.iter().copied().collect(),
            damped_adjustments: self.damped_adjustments,
        }
    }
}
