//! Descriptive statistics over a time-ordered sample buffer: nearest-rank
//! percentiles, sample standard deviation, trailing throughput, error rate.

#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// Shortest span used as a throughput denominator, so a window holding a
/// single burst does not report an unbounded rate.
pub const MIN_THROUGHPUT_SPAN: Duration = Duration::from_secs(1);

/// Copyable view of one accepted outcome, used for off-lock computation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    /// Completion time.
    pub at: Instant,
    /// Latency in milliseconds (already sanitized, never negative or NaN).
    pub latency_ms: f64,
    /// Whether the request succeeded.
    pub success: bool,
}

/// Point-in-time statistical summary of a metric window.
///
/// All fields are zero for an empty window.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct StatSnapshot {
    /// Number of outcomes summarized.
    pub count: u64,
    /// Number of failed outcomes.
    pub failures: u64,
    /// Mean latency (ms).
    pub mean: f64,
    /// Minimum latency (ms).
    pub min: f64,
    /// Maximum latency (ms).
    pub max: f64,
    /// Median latency (ms), nearest-rank p50.
    pub median: f64,
    /// 90th percentile latency (ms).
    pub p90: f64,
    /// 95th percentile latency (ms).
    pub p95: f64,
    /// 99th percentile latency (ms).
    pub p99: f64,
    /// Sample standard deviation of latency (ms).
    pub std_dev: f64,
    /// Outcomes per second over the trailing throughput sub-window.
    pub throughput: f64,
    /// Failed outcomes as a percentage of all outcomes, in [0, 100].
    pub error_rate: f64,
}

impl StatSnapshot {
    /// Coefficient of variation (std_dev / mean). Zero when the mean is zero.
    #[must_use]
    pub fn coefficient_of_variation(&self) -> f64 {
        if self.mean <= 0.0 {
            return 0.0;
        }
        self.std_dev / self.mean
    }

    /// Whether this snapshot summarizes no outcomes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}

/// Nearest-rank percentile over ascending-sorted values.
///
/// `index = ceil(pct / 100 * n) - 1`, clamped to `[0, n - 1]`. Returns 0 for
/// an empty slice.
#[must_use]
pub fn nearest_rank(sorted: &[f64], pct: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let n = sorted.len();
    // Multiply before dividing so integral percentiles stay exact.
    let rank = (pct * n as f64 / 100.0).ceil() as i64 - 1;
    let index = rank.clamp(0, n as i64 - 1) as usize;
    sorted[index]
}

/// Summarize time-ordered samples.
///
/// `reference` is the "now" used for the trailing throughput sub-window;
/// `None` means the newest sample's timestamp.
#[must_use]
pub fn summarize(
    samples: &[Sample],
    reference: Option<Instant>,
    throughput_window: Duration,
) -> StatSnapshot {
    let (Some(first), Some(last)) = (samples.first(), samples.last()) else {
        return StatSnapshot::default();
    };
    let reference = reference.unwrap_or(last.at);

    let mut latencies: Vec<f64> = samples.iter().map(|s| s.latency_ms).collect();
    latencies.sort_by(f64::total_cmp);

    let n = latencies.len() as f64;
    let mean = latencies.iter().sum::<f64>() / n;
    let std_dev = if latencies.len() > 1 {
        let sq = latencies
            .iter()
            .map(|v| (v - mean) * (v - mean))
            .sum::<f64>();
        (sq / (n - 1.0)).sqrt()
    } else {
        0.0
    };

    let failures = samples.iter().filter(|s| !s.success).count() as u64;

    StatSnapshot {
        count: samples.len() as u64,
        failures,
        mean,
        min: latencies[0],
        max: latencies[latencies.len() - 1],
        median: nearest_rank(&latencies, 50.0),
        p90: nearest_rank(&latencies, 90.0),
        p95: nearest_rank(&latencies, 95.0),
        p99: nearest_rank(&latencies, 99.0),
        std_dev,
        throughput: trailing_throughput(samples, first.at, reference, throughput_window),
        error_rate: failures as f64 * 100.0 / n,
    }
}

/// Outcomes per second over `(reference - window, ..]`.
///
/// The denominator is the shorter of the sub-window and the observed span,
/// floored at [`MIN_THROUGHPUT_SPAN`], so early-run rates are not diluted.
fn trailing_throughput(
    samples: &[Sample],
    oldest: Instant,
    reference: Instant,
    window: Duration,
) -> f64 {
    let recent = reference.checked_sub(window).map_or(samples.len(), |cutoff| {
        samples.len() - samples.partition_point(|s| s.at <= cutoff)
    });
    let observed = reference.saturating_duration_since(oldest);
    let span = observed.min(window).max(MIN_THROUGHPUT_SPAN);
    recent as f64 / span.as_secs_f64()
}

#[cfg(test)]
mod tests {
    use super::{Sample, StatSnapshot, nearest_rank, summarize};
    use std::time::{Duration, Instant};

    fn samples_at_one_second_spacing(t0: Instant, latencies: &[f64]) -> Vec<Sample> {
        latencies
            .iter()
            .enumerate()
            .map(|(i, &latency_ms)| Sample {
                at: t0 + Duration::from_secs(i as u64),
                latency_ms,
                success: true,
            })
            .collect()
    }

    #[test]
    fn nearest_rank_matches_formula_on_five_values() {
        let sorted = [100.0, 200.0, 300.0, 400.0, 500.0];
        // ceil(0.5 * 5) = 3 -> index 2
        assert!((nearest_rank(&sorted, 50.0) - 300.0).abs() < f64::EPSILON);
        // ceil(0.95 * 5) = 5 -> index 4
        assert!((nearest_rank(&sorted, 95.0) - 500.0).abs() < f64::EPSILON);
        assert!((nearest_rank(&sorted, 99.0) - 500.0).abs() < f64::EPSILON);
        // ceil(0.9 * 5) = 5 -> index 4
        assert!((nearest_rank(&sorted, 90.0) - 500.0).abs() < f64::EPSILON);
    }

    #[test]
    fn nearest_rank_exact_multiples_do_not_round_up() {
        let sorted: Vec<f64> = (1..=100).map(f64::from).collect();
        // ceil(0.9 * 100) = 90 -> index 89 -> value 90
        assert!((nearest_rank(&sorted, 90.0) - 90.0).abs() < f64::EPSILON);
        assert!((nearest_rank(&sorted, 95.0) - 95.0).abs() < f64::EPSILON);
        assert!((nearest_rank(&sorted, 99.0) - 99.0).abs() < f64::EPSILON);
    }

    #[test]
    fn nearest_rank_clamps_extremes() {
        let sorted = [7.0, 9.0];
        assert!((nearest_rank(&sorted, 0.0) - 7.0).abs() < f64::EPSILON);
        assert!((nearest_rank(&sorted, 100.0) - 9.0).abs() < f64::EPSILON);
        assert!(nearest_rank(&[], 50.0).abs() < f64::EPSILON);
    }

    #[test]
    fn empty_input_yields_zeroed_snapshot() {
        let snapshot = summarize(&[], None, Duration::from_secs(10));
        assert_eq!(snapshot, StatSnapshot::default());
        assert!(snapshot.is_empty());
        assert!(snapshot.error_rate.abs() < f64::EPSILON);
    }

    #[test]
    fn summary_fields_are_consistent() {
        let t0 = Instant::now();
        let samples = samples_at_one_second_spacing(t0, &[500.0, 100.0, 300.0, 200.0, 400.0]);
        let snapshot = summarize(&samples, None, Duration::from_secs(10));
        assert_eq!(snapshot.count, 5);
        assert!((snapshot.mean - 300.0).abs() < 1e-9);
        assert!((snapshot.min - 100.0).abs() < f64::EPSILON);
        assert!((snapshot.max - 500.0).abs() < f64::EPSILON);
        assert!((snapshot.median - 300.0).abs() < f64::EPSILON);
        // Sample std dev of 100..500 step 100 = sqrt(25000) ~= 158.11
        assert!((snapshot.std_dev - 25_000f64.sqrt()).abs() < 1e-9);
    }

    #[test]
    fn single_sample_has_zero_std_dev() {
        let t0 = Instant::now();
        let samples = samples_at_one_second_spacing(t0, &[42.0]);
        let snapshot = summarize(&samples, None, Duration::from_secs(10));
        assert!(snapshot.std_dev.abs() < f64::EPSILON);
        assert!(snapshot.coefficient_of_variation().abs() < f64::EPSILON);
    }

    #[test]
    fn error_rate_is_percentage_of_failures() {
        let t0 = Instant::now();
        let mut samples = samples_at_one_second_spacing(t0, &[10.0; 8]);
        samples[2].success = false;
        samples[5].success = false;
        let snapshot = summarize(&samples, None, Duration::from_secs(10));
        assert_eq!(snapshot.failures, 2);
        assert!((snapshot.error_rate - 25.0).abs() < 1e-9);
    }

    #[test]
    fn throughput_counts_only_trailing_sub_window() {
        let t0 = Instant::now();
        // Ten samples at t0+0s..t0+9s; last 5s (t0+4, t0+9] holds five of them.
        let samples = samples_at_one_second_spacing(t0, &[10.0; 10]);
        let snapshot = summarize(&samples, None, Duration::from_secs(5));
        assert!((snapshot.throughput - 1.0).abs() < 1e-9);
    }

    #[test]
    fn throughput_uses_observed_span_early_in_run() {
        let t0 = Instant::now();
        // Three samples over two seconds, sub-window ten seconds: rate 3 / 2s.
        let samples = samples_at_one_second_spacing(t0, &[10.0; 3]);
        let snapshot = summarize(&samples, None, Duration::from_secs(10));
        assert!((snapshot.throughput - 1.5).abs() < 1e-9);
    }

    #[test]
    fn throughput_decays_when_reference_moves_past_traffic() {
        let t0 = Instant::now();
        let samples = samples_at_one_second_spacing(t0, &[10.0; 10]);
        let later = t0 + Duration::from_secs(60);
        let snapshot = summarize(&samples, Some(later), Duration::from_secs(5));
        assert!(snapshot.throughput.abs() < f64::EPSILON);
    }

    #[test]
    fn coefficient_of_variation_is_zero_for_zero_mean() {
        let snapshot = StatSnapshot {
            count: 3,
            std_dev: 5.0,
            ..StatSnapshot::default()
        };
        assert!(snapshot.coefficient_of_variation().abs() < f64::EPSILON);
    }
}
