//! Adaptive concurrency control.

pub mod adaptive;
