//! Performance grading: banded sub-scores combined into a weighted letter grade.

pub mod bands;
pub mod engine;
