//! Convenience re-exports for library consumers.
//!
//! ```rust,no_run
//! use loadgov::prelude::*;
//! ```

// Core
pub use crate::core::config::Config;
pub use crate::core::errors::{LgError, Result};

// Monitor
pub use crate::monitor::stats::StatSnapshot;
pub use crate::monitor::trend::{Health, SeriesKind, Trend, TrendAdvice, TrendReport};
pub use crate::monitor::window::{MetricWindow, RequestOutcome, SampleDisposition};

// Scoring
pub use crate::scoring::engine::{Grade, ScoreEngine, ScoreResult};

// Alerts
pub use crate::alerts::evaluator::{AlertEvent, RuleEvaluator, TransitionKind};
pub use crate::alerts::rule::{AlertRule, Comparator, Metric, Severity};

// Control
pub use crate::control::adaptive::{AdaptiveController, ControlAction, ControlDirective};

// Runtime
pub use crate::daemon::driver::TickDriver;
pub use crate::daemon::events::{LoopEvent, LoopEventSink};
pub use crate::daemon::orchestrator::{FeedbackLoop, TickResult};
pub use crate::logger::activity::{ActivityLoggerHandle, spawn_logger};
