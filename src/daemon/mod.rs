//! Feedback loop runtime: orchestration, event fan-out, and the periodic tick thread.

pub mod driver;
pub mod events;
pub mod orchestrator;
