//! Alert rule definitions: watched metric, comparator, threshold, timing and severity.

#![allow(missing_docs)]

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::config::duration_from_secs;
use crate::core::errors::{LgError, Result};
use crate::monitor::stats::StatSnapshot;

/// Default per-rule firing cap within any rolling hour.
pub const DEFAULT_MAX_FIRES_PER_HOUR: u32 = 10;

/// A [`StatSnapshot`] field that rules and the controller can watch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    Count,
    Mean,
    Min,
    Max,
    Median,
    P90,
    P95,
    P99,
    StdDev,
    Throughput,
    ErrorRate,
}

impl Metric {
    pub const ALL: [Self; 11] = [
        Self::Count,
        Self::Mean,
        Self::Min,
        Self::Max,
        Self::Median,
        Self::P90,
        Self::P95,
        Self::P99,
        Self::StdDev,
        Self::Throughput,
        Self::ErrorRate,
    ];

    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn value(self, snapshot: &StatSnapshot) -> f64 {
        match self {
            Self::Count => snapshot.count as f64,
            Self::Mean => snapshot.mean,
            Self::Min => snapshot.min,
            Self::Max => snapshot.max,
            Self::Median => snapshot.median,
            Self::P90 => snapshot.p90,
            Self::P95 => snapshot.p95,
            Self::P99 => snapshot.p99,
            Self::StdDev => snapshot.std_dev,
            Self::Throughput => snapshot.throughput,
            Self::ErrorRate => snapshot.error_rate,
        }
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Count => "count",
            Self::Mean => "mean",
            Self::Min => "min",
            Self::Max => "max",
            Self::Median => "median",
            Self::P90 => "p90",
            Self::P95 => "p95",
            Self::P99 => "p99",
            Self::StdDev => "std_dev",
            Self::Throughput => "throughput",
            Self::ErrorRate => "error_rate",
        }
    }

    /// Whether this metric is a latency measured in milliseconds.
    #[must_use]
    pub const fn is_latency(self) -> bool {
        matches!(
            self,
            Self::Mean | Self::Min | Self::Max | Self::Median | Self::P90 | Self::P95 | Self::P99
        )
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Comparator {
    #[serde(rename = ">", alias = "gt")]
    Gt,
    #[serde(rename = "<", alias = "lt")]
    Lt,
    #[serde(rename = ">=", alias = "gte")]
    Gte,
    #[serde(rename = "<=", alias = "lte")]
    Lte,
}

impl Comparator {
    /// NaN never satisfies any comparator.
    #[must_use]
    pub fn holds(self, value: f64, threshold: f64) -> bool {
        match self {
            Self::Gt => value > threshold,
            Self::Lt => value < threshold,
            Self::Gte => value >= threshold,
            Self::Lte => value <= threshold,
        }
    }

    #[must_use]
    pub const fn symbol(self) -> &'static str {
        match self {
            Self::Gt => ">",
            Self::Lt => "<",
            Self::Gte => ">=",
            Self::Lte => "<=",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub const ALL: [Self; 4] = [Self::Low, Self::Medium, Self::High, Self::Critical];

    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

const fn default_enabled() -> bool {
    true
}

const fn default_max_fires_per_hour() -> u32 {
    DEFAULT_MAX_FIRES_PER_HOUR
}

/// One alert rule as loaded from configuration. Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRule {
    pub name: String,
    pub metric: Metric,
    pub comparator: Comparator,
    pub threshold: f64,
    /// Seconds the condition must hold continuously before firing.
    #[serde(default)]
    pub sustain_secs: f64,
    /// Minimum seconds between consecutive firings.
    #[serde(default)]
    pub cooldown_secs: f64,
    pub severity: Severity,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Firing cap within any rolling hour; 0 disables the cap.
    #[serde(default = "default_max_fires_per_hour")]
    pub max_fires_per_hour: u32,
}

impl AlertRule {
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        metric: Metric,
        comparator: Comparator,
        threshold: f64,
        severity: Severity,
    ) -> Self {
        Self {
            name: name.into(),
            metric,
            comparator,
            threshold,
            sustain_secs: 0.0,
            cooldown_secs: 0.0,
            severity,
            enabled: true,
            max_fires_per_hour: DEFAULT_MAX_FIRES_PER_HOUR,
        }
    }

    #[must_use]
    pub fn sustained_for(mut self, secs: f64) -> Self {
        self.sustain_secs = secs;
        self
    }

    #[must_use]
    pub fn with_cooldown(mut self, secs: f64) -> Self {
        self.cooldown_secs = secs;
        self
    }

    #[must_use]
    pub fn with_max_fires_per_hour(mut self, cap: u32) -> Self {
        self.max_fires_per_hour = cap;
        self
    }

    #[must_use]
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Saturates for out-of-range values; `validate` rejects those.
    #[must_use]
    pub fn sustain(&self) -> Duration {
        Duration::try_from_secs_f64(self.sustain_secs).unwrap_or(Duration::MAX)
    }

    #[must_use]
    pub fn cooldown(&self) -> Duration {
        Duration::try_from_secs_f64(self.cooldown_secs).unwrap_or(Duration::MAX)
    }

    /// Whether the rule's condition holds for this snapshot.
    #[must_use]
    pub fn breached_by(&self, snapshot: &StatSnapshot) -> bool {
        self.comparator
            .holds(self.metric.value(snapshot), self.threshold)
    }

    /// Check one rule; `field` is the config path used in error messages.
    pub fn validate(&self, field: &str) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(LgError::invalid(
                format!("{field}.name"),
                "rule name must not be empty",
            ));
        }
        if !self.threshold.is_finite() {
            return Err(LgError::invalid(
                format!("{field}.threshold"),
                format!("rule '{}' threshold must be finite", self.name),
            ));
        }
        for (key, secs) in [
            ("sustain_secs", self.sustain_secs),
            ("cooldown_secs", self.cooldown_secs),
        ] {
            duration_from_secs(&format!("{field}.{key}"), secs)?;
        }
        Ok(())
    }
}

/// Rules shipped in the default configuration.
#[must_use]
pub fn default_rules() -> Vec<AlertRule> {
    vec![
        AlertRule::new("p95-latency-high", Metric::P95, Comparator::Gt, 1000.0, Severity::High)
            .sustained_for(30.0)
            .with_cooldown(300.0),
        AlertRule::new("error-rate-high", Metric::ErrorRate, Comparator::Gt, 5.0, Severity::Critical)
            .sustained_for(60.0)
            .with_cooldown(300.0),
        AlertRule::new("throughput-low", Metric::Throughput, Comparator::Lt, 10.0, Severity::Medium)
            .sustained_for(120.0)
            .with_cooldown(300.0),
    ]
}

#[cfg(test)]
mod tests {
    use super::{AlertRule, Comparator, Metric, Severity, default_rules};
    use crate::monitor::stats::StatSnapshot;

    #[test]
    fn comparators_follow_symbols() {
        assert!(Comparator::Gt.holds(2.0, 1.0));
        assert!(!Comparator::Gt.holds(1.0, 1.0));
        assert!(Comparator::Gte.holds(1.0, 1.0));
        assert!(Comparator::Lt.holds(0.5, 1.0));
        assert!(!Comparator::Lt.holds(1.0, 1.0));
        assert!(Comparator::Lte.holds(1.0, 1.0));
        assert!(!Comparator::Gt.holds(f64::NAN, 0.0));
    }

    #[test]
    fn metric_reads_matching_snapshot_field() {
        let snapshot = StatSnapshot {
            count: 7,
            p95: 812.0,
            error_rate: 3.5,
            throughput: 42.0,
            ..StatSnapshot::default()
        };
        assert!((Metric::Count.value(&snapshot) - 7.0).abs() < f64::EPSILON);
        assert!((Metric::P95.value(&snapshot) - 812.0).abs() < f64::EPSILON);
        assert!((Metric::ErrorRate.value(&snapshot) - 3.5).abs() < f64::EPSILON);
        assert!((Metric::Throughput.value(&snapshot) - 42.0).abs() < f64::EPSILON);
    }

    #[test]
    fn comparator_parses_symbol_and_word_forms() {
        #[derive(serde::Deserialize)]
        struct Wrapper {
            c: Comparator,
        }
        let symbol: Wrapper = toml::from_str(r#"c = ">=""#).expect("symbol");
        assert_eq!(symbol.c, Comparator::Gte);
        let word: Wrapper = toml::from_str(r#"c = "lt""#).expect("word");
        assert_eq!(word.c, Comparator::Lt);
    }

    #[test]
    fn rule_defaults_fill_optional_fields() {
        let rule: AlertRule = toml::from_str(
            r#"
            name = "p99"
            metric = "p99"
            comparator = ">"
            threshold = 2000.0
            severity = "critical"
            "#,
        )
        .expect("parse rule");
        assert!(rule.enabled);
        assert_eq!(rule.max_fires_per_hour, 10);
        assert!(rule.sustain_secs.abs() < f64::EPSILON);
        assert_eq!(rule.severity, Severity::Critical);
    }

    #[test]
    fn validation_names_offending_field() {
        let rule = AlertRule::new("bad", Metric::P95, Comparator::Gt, 1.0, Severity::Low)
            .sustained_for(-1.0);
        let err = rule.validate("alerts.rules[0]").expect_err("negative sustain");
        assert!(err.to_string().contains("alerts.rules[0].sustain_secs"));

        let rule = AlertRule::new(" ", Metric::P95, Comparator::Gt, 1.0, Severity::Low);
        assert!(rule.validate("alerts.rules[1]").is_err());

        let rule = AlertRule::new("nan", Metric::P95, Comparator::Gt, f64::NAN, Severity::Low);
        assert!(rule.validate("alerts.rules[2]").is_err());
    }

    #[test]
    fn default_rules_are_valid_and_uniquely_named() {
        let rules = default_rules();
        for (i, rule) in rules.iter().enumerate() {
            rule.validate(&format!("alerts.rules[{i}]")).expect("valid");
        }
        let mut names: Vec<&str> = rules.iter().map(|r| r.name.as_str()).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), rules.len());
    }

    #[test]
    fn severity_orders_by_urgency() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::Medium > Severity::Low);
    }
}
