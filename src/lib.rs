#![forbid(unsafe_code)]

//! loadgov: closed-loop performance governor for load-testing campaigns.
//!
//! Four cooperating parts behind one feedback loop:
//! 1. **Metric window**: bounded, time-ordered request outcomes summarised into percentiles
//! 2. **Score engine**: banded sub-scores combined into a weighted A–D grade
//! 3. **Rule evaluator**: threshold alerts with sustain, cooldown, and fire caps
//! 4. **Adaptive controller**: concurrency directives steering a target metric into its band
//!
//! # Library usage
//!
//! Use the [`prelude`] for convenient access to the most common types:
//!
//! ```rust,no_run
//! use loadgov::prelude::*;
//! ```
//!
//! Individual modules can also be imported directly:
//!
//! ```rust,no_run
//! use loadgov::core::config::Config;
//! use loadgov::daemon::orchestrator::FeedbackLoop;
//! ```

pub mod prelude;

pub mod alerts;
pub mod control;
pub mod core;
pub mod daemon;
pub mod logger;
pub mod monitor;
pub mod scoring;

#[cfg(test)]
mod test_properties;
