//! Trend classification over the rolling snapshot history.

#![allow(missing_docs)]
#![allow(clippy::cast_precision_loss)]

use serde::{Deserialize, Serialize};

use crate::monitor::stats::StatSnapshot;

/// Slopes smaller than this fraction of the series mean count as flat.
pub const RELATIVE_STABLE_SLOPE: f64 = 0.01;

/// Direction of a metric series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    Stable,
    Increasing,
    Decreasing,
    /// Fewer than two points.
    Unknown,
}

/// Overall run health derived from the three trends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Health {
    Excellent,
    Good,
    Fair,
    NeedsAttention,
    Unknown,
}

impl Health {
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Excellent => "excellent",
            Self::Good => "good",
            Self::Fair => "fair",
            Self::NeedsAttention => "needs attention",
            Self::Unknown => "unknown",
        }
    }
}

/// Trend of one metric series.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SeriesTrend {
    pub trend: Trend,
    /// Least-squares slope per history step.
    pub slope: f64,
    /// Change from first to last point, in percent of the first. Zero when
    /// the first point is zero.
    pub change_rate_pct: f64,
    pub points: usize,
}

impl SeriesTrend {
    #[must_use]
    pub fn of(values: &[f64]) -> Self {
        if values.len() < 2 {
            return Self {
                trend: Trend::Unknown,
                slope: 0.0,
                change_rate_pct: 0.0,
                points: values.len(),
            };
        }
        let slope = least_squares_slope(values);
        let mean = values.iter().sum::<f64>() / values.len() as f64;
        let scale = mean.abs().max(f64::EPSILON);
        let trend = if slope.abs() / scale < RELATIVE_STABLE_SLOPE {
            Trend::Stable
        } else if slope > 0.0 {
            Trend::Increasing
        } else {
            Trend::Decreasing
        };
        Self {
            trend,
            slope,
            change_rate_pct: change_rate(values),
            points: values.len(),
        }
    }
}

/// Which series a [`SeriesTrend`] describes; advice depends on the direction
/// that counts as good for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeriesKind {
    Latency,
    Throughput,
    ErrorRate,
}

impl SeriesTrend {
    /// One-line operator advice for this series.
    #[must_use]
    pub fn advice(&self, kind: SeriesKind) -> &'static str {
        let change = self.change_rate_pct;
        match (kind, self.trend) {
            (_, Trend::Unknown) => "not enough data yet; keep monitoring",

            (SeriesKind::Latency, Trend::Increasing) if change > 20.0 => {
                "latency is rising sharply; look for a bottleneck or add capacity"
            }
            (SeriesKind::Latency, Trend::Increasing) if change > 10.0 => {
                "latency is trending up; watch load and resource usage"
            }
            (SeriesKind::Latency, Trend::Increasing) => "latency is creeping up; keep monitoring",
            (SeriesKind::Latency, Trend::Stable) => "latency is stable",
            (SeriesKind::Latency, Trend::Decreasing) => "latency is improving",

            (SeriesKind::Throughput, Trend::Decreasing) if change < -20.0 => {
                "throughput is dropping sharply; look for a bottleneck or add capacity"
            }
            (SeriesKind::Throughput, Trend::Decreasing) if change < -10.0 => {
                "throughput is trending down; watch resource usage"
            }
            (SeriesKind::Throughput, Trend::Decreasing) => "throughput is easing off; keep monitoring",
            (SeriesKind::Throughput, Trend::Stable) => "throughput is stable",
            (SeriesKind::Throughput, Trend::Increasing) => "throughput is improving",

            (SeriesKind::ErrorRate, Trend::Increasing) if change > 50.0 => {
                "error rate is climbing sharply; check service health and error logs now"
            }
            (SeriesKind::ErrorRate, Trend::Increasing) if change > 20.0 => {
                "error rate is trending up; watch for failures"
            }
            (SeriesKind::ErrorRate, Trend::Increasing) => "error rate is creeping up; keep monitoring",
            (SeriesKind::ErrorRate, Trend::Stable) => "error rate is stable",
            (SeriesKind::ErrorRate, Trend::Decreasing) => "error rate is improving",
        }
    }
}

/// Per-series advice strings for report renderers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TrendAdvice {
    pub p95: &'static str,
    pub throughput: &'static str,
    pub error_rate: &'static str,
}

/// Trend report over a snapshot history.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrendReport {
    pub p95: SeriesTrend,
    pub throughput: SeriesTrend,
    pub error_rate: SeriesTrend,
    pub health: Health,
}

impl TrendReport {
    /// Analyze the history, oldest first. Empty snapshots are skipped so idle
    /// ticks before traffic starts do not drag the slopes.
    #[must_use]
    pub fn analyze(history: &[StatSnapshot]) -> Self {
        let live: Vec<&StatSnapshot> = history.iter().filter(|s| !s.is_empty()).collect();
        let series = |f: fn(&StatSnapshot) -> f64| -> Vec<f64> {
            live.iter().map(|s| f(s)).collect()
        };
        let p95 = SeriesTrend::of(&series(|s| s.p95));
        let throughput = SeriesTrend::of(&series(|s| s.throughput));
        let error_rate = SeriesTrend::of(&series(|s| s.error_rate));
        Self {
            p95,
            throughput,
            error_rate,
            health: health(p95.trend, throughput.trend, error_rate.trend),
        }
    }
}

impl TrendReport {
    #[must_use]
    pub fn advice(&self) -> TrendAdvice {
        TrendAdvice {
            p95: self.p95.advice(SeriesKind::Latency),
            throughput: self.throughput.advice(SeriesKind::Throughput),
            error_rate: self.error_rate.advice(SeriesKind::ErrorRate),
        }
    }
}

fn least_squares_slope(values: &[f64]) -> f64 {
    let n = values.len() as f64;
    let x_mean = (n - 1.0) / 2.0;
    let y_mean = values.iter().sum::<f64>() / n;
    let mut num = 0.0;
    let mut den = 0.0;
    for (i, y) in values.iter().enumerate() {
        let dx = i as f64 - x_mean;
        num += dx * (y - y_mean);
        den += dx * dx;
    }
    if den == 0.0 { 0.0 } else { num / den }
}

fn change_rate(values: &[f64]) -> f64 {
    match (values.first(), values.last()) {
        (Some(&first), Some(&last)) if first != 0.0 => (last - first) / first * 100.0,
        _ => 0.0,
    }
}

/// Latency and errors should fall, throughput should rise.
fn health(p95: Trend, throughput: Trend, error_rate: Trend) -> Health {
    if [p95, throughput, error_rate].contains(&Trend::Unknown) {
        return Health::Unknown;
    }
    let mut score = 0;
    score += match p95 {
        Trend::Decreasing => 2,
        Trend::Stable => 1,
        _ => 0,
    };
    score += match throughput {
        Trend::Increasing => 2,
        Trend::Stable => 1,
        _ => 0,
    };
    score += match error_rate {
        Trend::Decreasing => 2,
        Trend::Stable => 1,
        _ => 0,
    };
    match score {
        5.. => Health::Excellent,
        3..=4 => Health::Good,
        1..=2 => Health::Fair,
        _ => Health::NeedsAttention,
    }
}
