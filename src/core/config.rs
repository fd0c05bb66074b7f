//! Configuration system: TOML file + env var overrides + one explicit validation pass.

#![allow(missing_docs)]

use std::collections::HashSet;
use std::env;
use std::fmt::Display;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::alerts::rule::{AlertRule, Metric, default_rules};
use crate::core::errors::{LgError, Result};
use crate::scoring::bands::BandTable;
use crate::scoring::engine::{GradeCutoffs, ScoringWeights};

/// Default config file looked up when no explicit path is given.
pub const DEFAULT_CONFIG_FILE: &str = "loadgov.toml";

/// Full loadgov configuration model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub window: WindowConfig,
    pub scoring: ScoringConfig,
    pub alerts: AlertsConfig,
    pub controller: ControllerConfig,
    pub runtime: RuntimeConfig,
}

/// Retention bounds of the metric window.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct WindowConfig {
    /// Count bound. Zero keeps only the newest outcome.
    pub max_samples: usize,
    /// Age bound relative to the newest outcome. Zero keeps only the newest
    /// outcome; absent disables age eviction.
    pub max_age_ms: Option<u64>,
    /// Trailing sub-window used for throughput.
    pub throughput_window_ms: u64,
}

/// Band tables, weights and grade cut-points.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ScoringConfig {
    /// Latency statistic scored by the response-time band table.
    pub response_time_metric: Metric,
    pub weights: ScoringWeights,
    pub grades: GradeCutoffs,
    pub response_time: BandTable,
    pub throughput: BandTable,
    pub error_rate: BandTable,
}

/// Alert rules and history retention. Rules are hot-reloadable.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AlertsConfig {
    pub history_capacity: usize,
    pub rules: Vec<AlertRule>,
}

/// Adaptive concurrency controller knobs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ControllerConfig {
    /// Statistic steered toward `target_value`.
    pub target_metric: Metric,
    pub target_value: f64,
    /// Shrink when the target metric exceeds `target_value * high_band`.
    pub high_band: f64,
    /// Grow when the target metric is below `target_value * low_band`.
    pub low_band: f64,
    /// Error-rate percentage above which error correction takes over.
    pub high_error_threshold: f64,
    pub error_shrink_factor: f64,
    pub latency_shrink_factor: f64,
    pub growth_factor: f64,
    pub min_concurrency: u32,
    pub max_concurrency: u32,
    pub initial_concurrency: u32,
    /// Users per second the load generator should ramp at.
    pub spawn_rate: f64,
    pub adjustment_interval_secs: f64,
    /// Hold until the window holds at least this many outcomes.
    pub min_samples: u64,
    /// Number of trailing adjustments inspected for sign alternation.
    pub oscillation_window: usize,
    pub history_capacity: usize,
}

/// Tick cadence, history retention and activity logging.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RuntimeConfig {
    pub tick_interval_ms: u64,
    /// Number of per-tick snapshots kept for `history()`.
    pub history_capacity: usize,
    /// JSONL activity log; absent disables activity logging.
    pub activity_log: Option<PathBuf>,
    /// Secondary JSONL path used when the primary cannot be written.
    pub fallback_log: Option<PathBuf>,
    pub log_max_bytes: u64,
    pub log_max_rotated: usize,
    pub event_channel_capacity: usize,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            max_samples: 10_000,
            max_age_ms: Some(300_000),
            throughput_window_ms: 10_000,
        }
    }
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            response_time_metric: Metric::P95,
            weights: ScoringWeights::default(),
            grades: GradeCutoffs::default(),
            response_time: BandTable::lower_is_better([200.0, 500.0, 1000.0, 2000.0]),
            throughput: BandTable::higher_is_better([50.0, 20.0, 10.0, 5.0]),
            error_rate: BandTable::lower_is_better([1.0, 5.0, 10.0, 20.0]),
        }
    }
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            history_capacity: 256,
            rules: default_rules(),
        }
    }
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            target_metric: Metric::P95,
            target_value: 500.0,
            high_band: 1.2,
            low_band: 0.8,
            high_error_threshold: 5.0,
            error_shrink_factor: 0.8,
            latency_shrink_factor: 0.9,
            growth_factor: 1.1,
            min_concurrency: 1,
            max_concurrency: 200,
            initial_concurrency: 10,
            spawn_rate: 10.0,
            adjustment_interval_secs: 30.0,
            min_samples: 10,
            oscillation_window: 4,
            history_capacity: 64,
        }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 1_000,
            history_capacity: 720,
            activity_log: None,
            fallback_log: None,
            log_max_bytes: 10 * 1024 * 1024,
            log_max_rotated: 3,
            event_channel_capacity: 1_024,
        }
    }
}

impl WindowConfig {
    #[must_use]
    pub fn throughput_window(&self) -> Duration {
        Duration::from_millis(self.throughput_window_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.throughput_window_ms == 0 {
            return Err(LgError::invalid(
                "window.throughput_window_ms",
                "throughput sub-window must be positive",
            ));
        }
        Ok(())
    }
}

impl ScoringConfig {
    pub fn validate(&self) -> Result<()> {
        self.weights.validate()?;
        self.grades.validate()?;
        if !self.response_time_metric.is_latency() {
            return Err(LgError::invalid(
                "scoring.response_time_metric",
                format!("{} is not a latency statistic", self.response_time_metric),
            ));
        }
        self.response_time.validate("scoring.response_time")?;
        self.throughput.validate("scoring.throughput")?;
        self.error_rate.validate("scoring.error_rate")?;
        Ok(())
    }
}

impl AlertsConfig {
    pub fn validate(&self) -> Result<()> {
        validate_rules(&self.rules)
    }
}

/// Validate a rule set: every rule individually plus unique names.
pub fn validate_rules(rules: &[AlertRule]) -> Result<()> {
    let mut seen = HashSet::new();
    for (i, rule) in rules.iter().enumerate() {
        let field = format!("alerts.rules[{i}]");
        rule.validate(&field)?;
        if !seen.insert(rule.name.as_str()) {
            return Err(LgError::invalid(
                format!("{field}.name"),
                format!("duplicate rule name '{}'", rule.name),
            ));
        }
    }
    Ok(())
}

/// Convert a configured seconds value, rejecting negatives, NaN and values
/// too large for [`Duration`]. `field` names the offending key.
pub fn duration_from_secs(field: &str, secs: f64) -> Result<Duration> {
    if secs < 0.0 {
        return Err(LgError::invalid(
            field,
            format!("must be a non-negative number, got {secs}"),
        ));
    }
    Duration::try_from_secs_f64(secs).map_err(|_| {
        LgError::invalid(
            field,
            format!("must be a finite number of seconds that fits a duration, got {secs}"),
        )
    })
}

impl ControllerConfig {
    /// Validated configs always convert exactly; anything else saturates.
    #[must_use]
    pub fn adjustment_interval(&self) -> Duration {
        Duration::try_from_secs_f64(self.adjustment_interval_secs).unwrap_or(Duration::MAX)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.target_value.is_finite() && self.target_value > 0.0) {
            return Err(LgError::invalid(
                "controller.target_value",
                format!("must be a positive number, got {}", self.target_value),
            ));
        }
        if !(self.low_band > 0.0 && self.low_band < 1.0) {
            return Err(LgError::invalid(
                "controller.low_band",
                format!("must be in (0, 1), got {}", self.low_band),
            ));
        }
        if !(self.high_band > 1.0 && self.high_band.is_finite()) {
            return Err(LgError::invalid(
                "controller.high_band",
                format!("must be greater than 1, got {}", self.high_band),
            ));
        }
        if !(0.0..=100.0).contains(&self.high_error_threshold) {
            return Err(LgError::invalid(
                "controller.high_error_threshold",
                format!("must be a percentage in [0, 100], got {}", self.high_error_threshold),
            ));
        }
        for (name, factor) in [
            ("error_shrink_factor", self.error_shrink_factor),
            ("latency_shrink_factor", self.latency_shrink_factor),
        ] {
            if !(factor > 0.0 && factor < 1.0) {
                return Err(LgError::invalid(
                    format!("controller.{name}"),
                    format!("must be in (0, 1), got {factor}"),
                ));
            }
        }
        if !(self.growth_factor > 1.0 && self.growth_factor.is_finite()) {
            return Err(LgError::invalid(
                "controller.growth_factor",
                format!("must be greater than 1, got {}", self.growth_factor),
            ));
        }
        if self.min_concurrency < 1 {
            return Err(LgError::invalid(
                "controller.min_concurrency",
                "must be at least 1",
            ));
        }
        if self.max_concurrency < self.min_concurrency {
            return Err(LgError::invalid(
                "controller.max_concurrency",
                format!(
                    "must be >= min_concurrency ({}), got {}",
                    self.min_concurrency, self.max_concurrency
                ),
            ));
        }
        if !(self.min_concurrency..=self.max_concurrency).contains(&self.initial_concurrency) {
            return Err(LgError::invalid(
                "controller.initial_concurrency",
                format!(
                    "must be within [{}, {}], got {}",
                    self.min_concurrency, self.max_concurrency, self.initial_concurrency
                ),
            ));
        }
        if !(self.spawn_rate.is_finite() && self.spawn_rate > 0.0) {
            return Err(LgError::invalid(
                "controller.spawn_rate",
                format!("must be positive, got {}", self.spawn_rate),
            ));
        }
        let interval = duration_from_secs(
            "controller.adjustment_interval_secs",
            self.adjustment_interval_secs,
        )?;
        if interval.is_zero() {
            return Err(LgError::invalid(
                "controller.adjustment_interval_secs",
                format!("must be positive, got {}", self.adjustment_interval_secs),
            ));
        }
        if self.oscillation_window < 2 {
            return Err(LgError::invalid(
                "controller.oscillation_window",
                format!("must be at least 2, got {}", self.oscillation_window),
            ));
        }
        if self.history_capacity < self.oscillation_window {
            return Err(LgError::invalid(
                "controller.history_capacity",
                format!(
                    "must be >= oscillation_window ({}), got {}",
                    self.oscillation_window, self.history_capacity
                ),
            ));
        }
        Ok(())
    }
}

impl RuntimeConfig {
    #[must_use]
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("tick_interval_ms", self.tick_interval_ms),
            ("history_capacity", self.history_capacity as u64),
            ("event_channel_capacity", self.event_channel_capacity as u64),
            ("log_max_bytes", self.log_max_bytes),
        ] {
            if value == 0 {
                return Err(LgError::invalid(
                    format!("runtime.{name}"),
                    "must be positive",
                ));
            }
        }
        Ok(())
    }
}

impl Config {
    /// Default configuration path.
    #[must_use]
    pub fn default_path() -> PathBuf {
        PathBuf::from(DEFAULT_CONFIG_FILE)
    }

    /// Load config from default or explicit path, apply env overrides, validate.
    ///
    /// Missing config file is not an error when loading from the default path;
    /// defaults are used.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path_buf = path.map_or_else(Self::default_path, Path::to_path_buf);

        let mut cfg = if path_buf.exists() {
            let raw = fs::read_to_string(&path_buf).map_err(|source| LgError::io(&path_buf, source))?;
            toml::from_str(&raw)?
        } else if path.is_some() {
            return Err(LgError::MissingConfig { path: path_buf });
        } else {
            Self::default()
        };

        cfg.apply_env_overrides_from(env_var)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Parse and validate an in-memory TOML document. No env overrides.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let cfg: Self = toml::from_str(raw)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Render the effective configuration as TOML.
    pub fn to_toml_string(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Deterministic hash of the effective config for logging.
    ///
    /// FNV-1a over canonical JSON, stable across processes and toolchains.
    pub fn stable_hash(&self) -> Result<String> {
        let canonical = serde_json::to_string(self)?;
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in canonical.as_bytes() {
            hash ^= u64::from(*byte);
            hash = hash.wrapping_mul(0x0100_0000_01b3);
        }
        Ok(format!("{hash:016x}"))
    }

    /// Single validation pass; the first failure names the offending field.
    pub fn validate(&self) -> Result<()> {
        self.window.validate()?;
        self.scoring.validate()?;
        self.alerts.validate()?;
        self.controller.validate()?;
        self.runtime.validate()?;
        Ok(())
    }

    fn apply_env_overrides_from<F>(&mut self, mut lookup: F) -> Result<()>
    where
        F: FnMut(&str) -> Option<String>,
    {
        let l = &mut lookup;

        // window
        set_from(l, "LOADGOV_WINDOW_MAX_SAMPLES", &mut self.window.max_samples)?;
        if let Some(raw) = l("LOADGOV_WINDOW_MAX_AGE_MS") {
            self.window.max_age_ms = Some(parse_env("LOADGOV_WINDOW_MAX_AGE_MS", &raw)?);
        }
        set_from(
            l,
            "LOADGOV_WINDOW_THROUGHPUT_WINDOW_MS",
            &mut self.window.throughput_window_ms,
        )?;

        // scoring
        let weights = &mut self.scoring.weights;
        set_from(l, "LOADGOV_SCORING_WEIGHT_RESPONSE_TIME", &mut weights.response_time)?;
        set_from(l, "LOADGOV_SCORING_WEIGHT_THROUGHPUT", &mut weights.throughput)?;
        set_from(l, "LOADGOV_SCORING_WEIGHT_ERROR_RATE", &mut weights.error_rate)?;
        set_from(l, "LOADGOV_SCORING_WEIGHT_STABILITY", &mut weights.stability)?;

        // controller
        let ctl = &mut self.controller;
        set_from(l, "LOADGOV_CONTROLLER_TARGET_VALUE", &mut ctl.target_value)?;
        set_from(l, "LOADGOV_CONTROLLER_HIGH_BAND", &mut ctl.high_band)?;
        set_from(l, "LOADGOV_CONTROLLER_LOW_BAND", &mut ctl.low_band)?;
        set_from(
            l,
            "LOADGOV_CONTROLLER_HIGH_ERROR_THRESHOLD",
            &mut ctl.high_error_threshold,
        )?;
        set_from(l, "LOADGOV_CONTROLLER_MIN_CONCURRENCY", &mut ctl.min_concurrency)?;
        set_from(l, "LOADGOV_CONTROLLER_MAX_CONCURRENCY", &mut ctl.max_concurrency)?;
        set_from(
            l,
            "LOADGOV_CONTROLLER_INITIAL_CONCURRENCY",
            &mut ctl.initial_concurrency,
        )?;
        set_from(l, "LOADGOV_CONTROLLER_SPAWN_RATE", &mut ctl.spawn_rate)?;
        set_from(
            l,
            "LOADGOV_CONTROLLER_ADJUSTMENT_INTERVAL_SECS",
            &mut ctl.adjustment_interval_secs,
        )?;

        // runtime
        set_from(
            l,
            "LOADGOV_RUNTIME_TICK_INTERVAL_MS",
            &mut self.runtime.tick_interval_ms,
        )?;
        if let Some(raw) = l("LOADGOV_RUNTIME_ACTIVITY_LOG") {
            self.runtime.activity_log = Some(PathBuf::from(raw));
        }
        if let Some(raw) = l("LOADGOV_RUNTIME_FALLBACK_LOG") {
            self.runtime.fallback_log = Some(PathBuf::from(raw));
        }

        Ok(())
    }
}

fn env_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|raw| !raw.trim().is_empty())
}

fn set_from<F, T>(lookup: &mut F, name: &str, slot: &mut T) -> Result<()>
where
    F: FnMut(&str) -> Option<String>,
    T: FromStr,
    T::Err: Display,
{
    if let Some(raw) = lookup(name) {
        *slot = parse_env(name, &raw)?;
    }
    Ok(())
}

fn parse_env<T>(name: &str, raw: &str) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    raw.trim().parse::<T>().map_err(|error| LgError::ConfigParse {
        context: "env",
        details: format!("{name}={raw:?}: {error}"),
    })
}
