//! Request telemetry: sliding sample window, summary statistics, trend analysis.

pub mod stats;
pub mod trend;
pub mod window;
