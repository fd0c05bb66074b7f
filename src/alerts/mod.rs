//! Threshold alerting with sustain windows, cooldowns, and hourly fire caps.

pub mod evaluator;
pub mod rule;
