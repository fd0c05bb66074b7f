//! Bounded, time-ordered buffer of request outcomes with count and age retention.
//!
//! The window is the only structure touched on the ingestion hot path. Appends
//! do pure buffer work (sorted insert + eviction); all O(n log n) statistics
//! are computed either directly on an owned window or on a [`FrozenWindow`]
//! copied out from under the ingestion lock.

#![allow(missing_docs)]
#![allow(clippy::cast_precision_loss)]

use std::collections::{BTreeMap, VecDeque};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::core::config::WindowConfig;
use crate::monitor::stats::{Sample, StatSnapshot, summarize};

/// A single completed request, as reported by the load generator.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestOutcome {
    pub at: Instant,
    pub latency_ms: f64,
    pub success: bool,
    pub endpoint: Option<String>,
}

impl RequestOutcome {
    #[must_use]
    pub fn new(at: Instant, latency_ms: f64, success: bool) -> Self {
        Self {
            at,
            latency_ms,
            success,
            endpoint: None,
        }
    }

    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    fn sample(&self) -> Sample {
        Sample {
            at: self.at,
            latency_ms: self.latency_ms,
            success: self.success,
        }
    }
}

/// What happened to an appended outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleDisposition {
    /// Stored as given.
    Accepted,
    /// Negative latency, stored as 0 ms.
    Clamped,
    /// NaN or infinite latency, dropped.
    Rejected,
}

impl SampleDisposition {
    #[must_use]
    pub fn is_anomalous(self) -> bool {
        !matches!(self, Self::Accepted)
    }
}

/// Per-endpoint request distribution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EndpointStats {
    pub requests: u64,
    pub failures: u64,
}

impl EndpointStats {
    /// Failure percentage for this endpoint.
    #[must_use]
    pub fn error_rate(&self) -> f64 {
        if self.requests == 0 {
            return 0.0;
        }
        self.failures as f64 * 100.0 / self.requests as f64
    }
}

/// Label used for outcomes reported without an endpoint.
pub const UNLABELLED_ENDPOINT: &str = "(unlabelled)";

/// Retention-bounded outcome buffer.
#[derive(Debug, Clone)]
pub struct MetricWindow {
    buf: VecDeque<RequestOutcome>,
    max_samples: usize,
    max_age: Option<Duration>,
    throughput_window: Duration,
    anomalies: u64,
}

impl MetricWindow {
    #[must_use]
    pub fn new(
        max_samples: usize,
        max_age: Option<Duration>,
        throughput_window: Duration,
    ) -> Self {
        Self {
            buf: VecDeque::with_capacity(max_samples.min(4096)),
            max_samples,
            max_age,
            throughput_window,
            anomalies: 0,
        }
    }

    #[must_use]
    pub fn from_config(config: &WindowConfig) -> Self {
        Self::new(
            config.max_samples,
            config.max_age_ms.map(Duration::from_millis),
            Duration::from_millis(config.throughput_window_ms),
        )
    }

    /// Append one outcome, keeping time order and evicting oldest-first.
    ///
    /// Never fails: NaN/infinite latencies are dropped and negative ones
    /// clamped, both counted in [`Self::anomalous_samples`].
    pub fn append(&mut self, mut outcome: RequestOutcome) -> SampleDisposition {
        let disposition = if !outcome.latency_ms.is_finite() {
            SampleDisposition::Rejected
        } else if outcome.latency_ms < 0.0 {
            outcome.latency_ms = 0.0;
            SampleDisposition::Clamped
        } else {
            SampleDisposition::Accepted
        };
        if disposition.is_anomalous() {
            self.anomalies = self.anomalies.saturating_add(1);
        }
        if disposition == SampleDisposition::Rejected {
            return disposition;
        }

        // Completion callbacks race, so arrivals are only nearly ordered.
        // Ties go after existing entries to keep arrival order stable.
        match self.buf.back() {
            Some(last) if outcome.at < last.at => {
                let pos = self.buf.partition_point(|o| o.at <= outcome.at);
                self.buf.insert(pos, outcome);
            }
            _ => self.buf.push_back(outcome),
        }
        self.evict();
        disposition
    }

    fn evict(&mut self) {
        let zero_age = self.max_age.is_some_and(|age| age.is_zero());
        let cap = if zero_age { 1 } else { self.max_samples.max(1) };
        while self.buf.len() > cap {
            self.buf.pop_front();
        }

        let (Some(age), Some(newest)) = (self.max_age, self.buf.back().map(|o| o.at)) else {
            return;
        };
        while let Some(front) = self.buf.front() {
            if newest.saturating_duration_since(front.at) > age {
                self.buf.pop_front();
            } else {
                break;
            }
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Count of dropped or clamped samples since creation.
    #[must_use]
    pub fn anomalous_samples(&self) -> u64 {
        self.anomalies
    }

    /// Timestamp of the newest retained outcome.
    #[must_use]
    pub fn newest(&self) -> Option<Instant> {
        self.buf.back().map(|o| o.at)
    }

    /// Statistics over the current contents, referenced to the newest sample.
    ///
    /// Pure function of the buffer: repeated calls without an intervening
    /// append return identical snapshots.
    #[must_use]
    pub fn snapshot(&self) -> StatSnapshot {
        self.freeze().snapshot()
    }

    /// Statistics as of `now`: samples older than the age horizon are
    /// excluded and throughput is measured back from `now`.
    #[must_use]
    pub fn snapshot_at(&self, now: Instant) -> StatSnapshot {
        self.freeze().snapshot_at(now)
    }

    /// Copy the samples out so statistics can be computed without holding
    /// whatever lock guards this window.
    #[must_use]
    pub fn freeze(&self) -> FrozenWindow {
        FrozenWindow {
            samples: self.buf.iter().map(RequestOutcome::sample).collect(),
            max_age: self.max_age,
            throughput_window: self.throughput_window,
        }
    }

    /// Request and failure counts per endpoint label.
    #[must_use]
    pub fn endpoint_breakdown(&self) -> BTreeMap<String, EndpointStats> {
        let mut out: BTreeMap<String, EndpointStats> = BTreeMap::new();
        for outcome in &self.buf {
            let label = outcome.endpoint.as_deref().unwrap_or(UNLABELLED_ENDPOINT);
            let entry = out.entry(label.to_string()).or_default();
            entry.requests += 1;
            if !outcome.success {
                entry.failures += 1;
            }
        }
        out
    }

    /// Drop all retained outcomes. The anomaly counter is kept.
    pub fn clear(&mut self) {
        self.buf.clear();
    }
}

impl Default for MetricWindow {
    fn default() -> Self {
        Self::from_config(&WindowConfig::default())
    }
}

/// Immutable copy of a window's samples.
#[derive(Debug, Clone)]
pub struct FrozenWindow {
    samples: Vec<Sample>,
    max_age: Option<Duration>,
    throughput_window: Duration,
}

impl FrozenWindow {
    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    #[must_use]
    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    #[must_use]
    pub fn snapshot(&self) -> StatSnapshot {
        summarize(&self.samples, None, self.throughput_window)
    }

    #[must_use]
    pub fn snapshot_at(&self, now: Instant) -> StatSnapshot {
        let live = match self.max_age.and_then(|age| now.checked_sub(age)) {
            Some(cutoff) => &self.samples[self.samples.partition_point(|s| s.at < cutoff)..],
            None => &self.samples[..],
        };
        summarize(live, Some(now), self.throughput_window)
    }
}
