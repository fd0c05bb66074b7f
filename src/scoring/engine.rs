//! Weighted multi-dimension grading: response time, throughput, error rate,
//! stability. Each dimension goes through a band table; the weighted sum maps
//! to a letter grade via configurable cut-points.

#![allow(missing_docs)]

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::config::ScoringConfig;
use crate::core::errors::{LgError, Result};
use crate::monitor::stats::StatSnapshot;

/// Allowed distance of the weight total from 1.0.
pub const WEIGHT_SUM_TOLERANCE: f64 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringWeights {
    pub response_time: f64,
    pub throughput: f64,
    pub error_rate: f64,
    pub stability: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            response_time: 0.4,
            throughput: 0.2,
            error_rate: 0.3,
            stability: 0.1,
        }
    }
}

impl ScoringWeights {
    #[must_use]
    pub fn sum(&self) -> f64 {
        self.response_time + self.throughput + self.error_rate + self.stability
    }

    /// Weights must be finite, non-negative and sum to 1.0. Never renormalized.
    pub fn validate(&self) -> Result<()> {
        for (name, w) in [
            ("response_time", self.response_time),
            ("throughput", self.throughput),
            ("error_rate", self.error_rate),
            ("stability", self.stability),
        ] {
            if !w.is_finite() || w < 0.0 {
                return Err(LgError::invalid(
                    format!("scoring.weights.{name}"),
                    format!("weight must be a non-negative number, got {w}"),
                ));
            }
        }
        let sum = self.sum();
        if (sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            return Err(LgError::invalid(
                "scoring.weights",
                format!("weights must sum to 1.0 (got {sum:.6})"),
            ));
        }
        Ok(())
    }
}

/// Minimum overall score for grades A, B and C. Anything lower is D.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GradeCutoffs {
    pub a: f64,
    pub b: f64,
    pub c: f64,
}

impl Default for GradeCutoffs {
    fn default() -> Self {
        Self {
            a: 90.0,
            b: 75.0,
            c: 60.0,
        }
    }
}

impl GradeCutoffs {
    pub fn validate(&self) -> Result<()> {
        let in_range = [self.a, self.b, self.c]
            .iter()
            .all(|v| (0.0..=100.0).contains(v));
        if !(in_range && self.a > self.b && self.b > self.c) {
            return Err(LgError::invalid(
                "scoring.grades",
                format!(
                    "cut-points must lie in [0, 100] and strictly descend a > b > c, got {} / {} / {}",
                    self.a, self.b, self.c
                ),
            ));
        }
        Ok(())
    }

    #[must_use]
    pub fn grade(&self, overall: f64) -> Grade {
        if overall >= self.a {
            Grade::A
        } else if overall >= self.b {
            Grade::B
        } else if overall >= self.c {
            Grade::C
        } else {
            Grade::D
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Grade {
    A,
    B,
    C,
    D,
}

impl Grade {
    #[must_use]
    pub const fn letter(self) -> char {
        match self {
            Self::A => 'A',
            Self::B => 'B',
            Self::C => 'C',
            Self::D => 'D',
        }
    }
}

impl fmt::Display for Grade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.letter())
    }
}

/// Per-dimension sub-scores, each in [0, 100].
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SubScores {
    pub response_time: f64,
    pub throughput: f64,
    pub error_rate: f64,
    pub stability: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreResult {
    pub sub_scores: SubScores,
    pub overall: f64,
    pub grade: Grade,
}

/// Stateless grader built from a validated [`ScoringConfig`].
#[derive(Debug, Clone)]
pub struct ScoreEngine {
    config: ScoringConfig,
}

impl ScoreEngine {
    /// Fails fast on a bad weight set, band table or cut-point set.
    pub fn new(config: ScoringConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    #[must_use]
    pub fn config(&self) -> &ScoringConfig {
        &self.config
    }

    #[must_use]
    pub fn grade(&self, snapshot: &StatSnapshot) -> ScoreResult {
        let cfg = &self.config;
        let sub_scores = SubScores {
            response_time: cfg
                .response_time
                .score(cfg.response_time_metric.value(snapshot)),
            throughput: cfg.throughput.score(snapshot.throughput),
            error_rate: cfg.error_rate.score(snapshot.error_rate),
            stability: stability_score(snapshot),
        };
        self.combine(sub_scores)
    }

    /// Weighted sum of already-computed sub-scores.
    #[must_use]
    pub fn combine(&self, sub_scores: SubScores) -> ScoreResult {
        let w = &self.config.weights;
        let overall = (w.response_time * sub_scores.response_time
            + w.throughput * sub_scores.throughput
            + w.error_rate * sub_scores.error_rate
            + w.stability * sub_scores.stability)
            .clamp(0.0, 100.0);
        ScoreResult {
            sub_scores,
            overall,
            grade: self.config.grades.grade(overall),
        }
    }
}

/// `max(0, 100 - CoV * 100)`; a zero mean counts as perfectly stable.
#[must_use]
pub fn stability_score(snapshot: &StatSnapshot) -> f64 {
    (100.0 - snapshot.coefficient_of_variation() * 100.0).clamp(0.0, 100.0)
}

#[cfg(test)]
mod tests {
    use super::{Grade, ScoreEngine, ScoringWeights, SubScores, stability_score};
    use crate::core::config::ScoringConfig;
    use crate::monitor::stats::StatSnapshot;

    fn engine() -> ScoreEngine {
        ScoreEngine::new(ScoringConfig::default()).expect("default scoring config is valid")
    }

    #[test]
    fn weights_summing_to_099_or_101_rejected() {
        for total_shift in [-0.01, 0.01] {
            let mut cfg = ScoringConfig::default();
            cfg.weights.stability += total_shift;
            let err = ScoreEngine::new(cfg).expect_err("off by 0.01");
            assert!(err.to_string().contains("scoring.weights"));
        }
    }

    #[test]
    fn weights_within_tolerance_accepted() {
        let mut cfg = ScoringConfig::default();
        cfg.weights = ScoringWeights {
            response_time: 0.25,
            throughput: 0.25,
            error_rate: 0.25,
            stability: 0.250_000_000_1,
        };
        assert!(ScoreEngine::new(cfg).is_ok());
    }

    #[test]
    fn negative_weight_rejected_even_when_sum_is_one() {
        let mut cfg = ScoringConfig::default();
        cfg.weights = ScoringWeights {
            response_time: 1.2,
            throughput: -0.2,
            error_rate: 0.0,
            stability: 0.0,
        };
        let err = ScoreEngine::new(cfg).expect_err("negative weight");
        assert!(err.to_string().contains("scoring.weights.throughput"));
    }

    #[test]
    fn healthy_snapshot_grades_a() {
        let snapshot = StatSnapshot {
            count: 1000,
            mean: 120.0,
            std_dev: 12.0,
            p95: 180.0,
            throughput: 80.0,
            error_rate: 0.2,
            ..StatSnapshot::default()
        };
        let result = engine().grade(&snapshot);
        assert!((result.sub_scores.response_time - 100.0).abs() < 1e-9);
        assert!((result.sub_scores.throughput - 100.0).abs() < 1e-9);
        assert!((result.sub_scores.stability - 90.0).abs() < 1e-9);
        assert!((result.overall - 99.0).abs() < 1e-9);
        assert_eq!(result.grade, Grade::A);
    }

    #[test]
    fn degraded_snapshot_grades_d() {
        let snapshot = StatSnapshot {
            count: 1000,
            mean: 1500.0,
            std_dev: 1500.0,
            p95: 3000.0,
            throughput: 2.0,
            error_rate: 25.0,
            ..StatSnapshot::default()
        };
        let result = engine().grade(&snapshot);
        assert!(result.sub_scores.stability.abs() < 1e-9);
        assert_eq!(result.grade, Grade::D);
    }

    #[test]
    fn grade_cutpoints_are_inclusive() {
        let engine = engine();
        let flat = |v: f64| SubScores {
            response_time: v,
            throughput: v,
            error_rate: v,
            stability: v,
        };
        assert_eq!(engine.combine(flat(90.0)).grade, Grade::A);
        assert_eq!(engine.combine(flat(89.9)).grade, Grade::B);
        assert_eq!(engine.combine(flat(75.0)).grade, Grade::B);
        assert_eq!(engine.combine(flat(60.0)).grade, Grade::C);
        assert_eq!(engine.combine(flat(59.9)).grade, Grade::D);
    }

    #[test]
    fn stability_treats_zero_mean_as_perfect() {
        assert!((stability_score(&StatSnapshot::default()) - 100.0).abs() < 1e-9);
        let noisy = StatSnapshot {
            mean: 100.0,
            std_dev: 250.0,
            ..StatSnapshot::default()
        };
        assert!(stability_score(&noisy).abs() < 1e-9);
    }

    #[test]
    fn response_time_metric_is_configurable() {
        let mut cfg = ScoringConfig::default();
        cfg.response_time_metric = crate::alerts::rule::Metric::P99;
        let engine = ScoreEngine::new(cfg).expect("valid");
        let snapshot = StatSnapshot {
            p95: 100.0,
            p99: 2000.0,
            ..StatSnapshot::default()
        };
        assert!((engine.grade(&snapshot).sub_scores.response_time - 30.0).abs() < 1e-9);
    }
}
