//! Feedback loop: one ingestion entry point, one tick, read-only views.
//!
//! Locking: the metric window sits behind its own mutex and is only held for
//! the append (ingestion) or the copy-out (tick). Percentiles, grading, rule
//! evaluation and control all run on the copy, under a second mutex that only
//! the tick path and the read accessors take.

#![allow(missing_docs)]

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;

use crate::alerts::evaluator::{
    ActiveAlert, AlertEvent, AlertStatistics, RuleEvaluator, TransitionKind,
};
use crate::alerts::rule::AlertRule;
use crate::control::adaptive::{AdaptiveController, ControlDirective, ControlState};
use crate::core::config::Config;
use crate::core::errors::{LgError, Result};
use crate::daemon::events::{LoopEvent, LoopEventSink};
use crate::logger::activity::{ActivityEvent, ActivityLoggerHandle};
use crate::monitor::stats::StatSnapshot;
use crate::monitor::trend::{TrendAdvice, TrendReport};
use crate::monitor::window::{EndpointStats, MetricWindow, RequestOutcome, SampleDisposition};
use crate::scoring::engine::{Grade, ScoreEngine, ScoreResult};

/// Everything one tick produced.
#[derive(Debug, Clone, Serialize)]
pub struct TickResult {
    pub tick: u64,
    /// Time since the loop was created.
    pub elapsed: Duration,
    pub stats: StatSnapshot,
    pub score: ScoreResult,
    /// Transitions this tick, in rule order.
    pub alerts: Vec<AlertEvent>,
    /// Rules firing after this tick.
    pub active_alerts: Vec<ActiveAlert>,
    pub directive: ControlDirective,
    pub anomalous_samples: u64,
    pub events: Vec<LoopEvent>,
}

/// Final analysis handed to report renderers.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub ticks: u64,
    pub run_secs: f64,
    pub stats: StatSnapshot,
    pub score: Option<ScoreResult>,
    pub trend: TrendReport,
    pub advice: TrendAdvice,
    pub alerts: AlertStatistics,
    pub control: ControlState,
    pub endpoints: BTreeMap<String, EndpointStats>,
    pub anomalous_samples: u64,
}

struct TickState {
    evaluator: RuleEvaluator,
    controller: AdaptiveController,
    history: VecDeque<StatSnapshot>,
    history_capacity: usize,
    ticks: u64,
    last_score: Option<ScoreResult>,
}

/// The assembled loop. `Send + Sync`; share it behind an `Arc`.
pub struct FeedbackLoop {
    window: Mutex<MetricWindow>,
    engine: ScoreEngine,
    state: Mutex<TickState>,
    sinks: Vec<Box<dyn LoopEventSink>>,
    logger: Option<ActivityLoggerHandle>,
    anomaly_logged: AtomicBool,
    started_at: Instant,
    config_hash: String,
}

impl FeedbackLoop {
    /// Build every component from a config. All validation happens here,
    /// before any tick can run.
    pub fn new(config: &Config, started_at: Instant) -> Result<Self> {
        config.validate()?;
        let engine = ScoreEngine::new(config.scoring.clone())?;
        let evaluator =
            RuleEvaluator::new(config.alerts.rules.clone(), config.alerts.history_capacity)?;
        let controller = AdaptiveController::new(config.controller.clone())?;
        Ok(Self {
            window: Mutex::new(MetricWindow::from_config(&config.window)),
            engine,
            state: Mutex::new(TickState {
                evaluator,
                controller,
                history: VecDeque::with_capacity(config.runtime.history_capacity.min(4096)),
                history_capacity: config.runtime.history_capacity,
                ticks: 0,
                last_score: None,
            }),
            sinks: Vec::new(),
            logger: None,
            anomaly_logged: AtomicBool::new(false),
            started_at,
            config_hash: config.stable_hash()?,
        })
    }

    /// Register a consumer of tick events.
    #[must_use]
    pub fn with_sink(mut self, sink: Box<dyn LoopEventSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Attach the activity log and record the loop start.
    #[must_use]
    pub fn with_activity_logger(mut self, handle: ActivityLoggerHandle) -> Self {
        handle.send(ActivityEvent::LoopStarted {
            version: env!("CARGO_PKG_VERSION").to_string(),
            config_hash: self.config_hash.clone(),
            rules: self.state.lock().evaluator.rules().len(),
        });
        self.logger = Some(handle);
        self
    }

    #[must_use]
    pub fn config_hash(&self) -> &str {
        &self.config_hash
    }

    #[must_use]
    pub const fn started_at(&self) -> Instant {
        self.started_at
    }

    // ──────────────────── ingestion ────────────────────

    /// Record one completed request. Safe from any number of threads; the
    /// lock covers only the buffer insert and eviction.
    pub fn record_outcome(&self, outcome: RequestOutcome) -> SampleDisposition {
        let latency_ms = outcome.latency_ms;
        let disposition = self.window.lock().append(outcome);
        if disposition.is_anomalous() && !self.anomaly_logged.swap(true, Ordering::Relaxed) {
            let label = match disposition {
                SampleDisposition::Clamped => "clamped to 0",
                _ => "rejected",
            };
            eprintln!("[LG-INGEST] anomalous latency sample {latency_ms} {label}; further anomalies are only counted");
            if let Some(logger) = &self.logger {
                logger.send(ActivityEvent::DataAnomaly {
                    latency_ms,
                    disposition: label.to_string(),
                });
            }
        }
        disposition
    }

    /// Convenience form of [`Self::record_outcome`].
    pub fn record(
        &self,
        at: Instant,
        latency_ms: f64,
        success: bool,
        endpoint: Option<&str>,
    ) -> SampleDisposition {
        let mut outcome = RequestOutcome::new(at, latency_ms, success);
        outcome.endpoint = endpoint.map(str::to_string);
        self.record_outcome(outcome)
    }

    // ──────────────────── tick ────────────────────

    /// Grade, evaluate alerts and decide concurrency as of `now`.
    pub fn tick(&self, now: Instant) -> TickResult {
        let (frozen, anomalous_samples) = {
            let window = self.window.lock();
            (window.freeze(), window.anomalous_samples())
        };
        let stats = frozen.snapshot_at(now);
        let score = self.engine.grade(&stats);
        let run_secs = now.saturating_duration_since(self.started_at).as_secs_f64();

        let mut state = self.state.lock();
        state.ticks += 1;
        let tick = state.ticks;
        let alerts = state.evaluator.evaluate(&stats, now);
        let directive = state.controller.adjust(&stats, now);
        let active_alerts = state.evaluator.active_alerts();
        if state.history.len() == state.history_capacity {
            state.history.pop_front();
        }
        state.history.push_back(stats);
        let previous_grade = state.last_score.map(|s| s.grade);
        state.last_score = Some(score);
        drop(state);

        let events = collect_events(&alerts, &directive, previous_grade, score, run_secs);
        self.publish(&events);

        TickResult {
            tick,
            elapsed: now.saturating_duration_since(self.started_at),
            stats,
            score,
            alerts,
            active_alerts,
            directive,
            anomalous_samples,
            events,
        }
    }

    fn publish(&self, events: &[LoopEvent]) {
        for event in events {
            if let Some(logger) = &self.logger {
                logger.publish(event);
            }
            for sink in &self.sinks {
                sink.publish(event);
            }
        }
    }

    // ──────────────────── hot reload ────────────────────

    /// Replace the alert rules. An invalid set is rejected and the current
    /// rules stay in force. Returns the resolutions caused by the swap.
    pub fn reload_rules(&self, rules: Vec<AlertRule>, now: Instant) -> Result<Vec<AlertEvent>> {
        let count = rules.len();
        let resolved = self.state.lock().evaluator.replace_rules(rules, now)?;
        if let Some(logger) = &self.logger {
            logger.send(ActivityEvent::RulesReloaded {
                rules: count,
                resolved: resolved.len(),
            });
        }
        let run_secs = now.saturating_duration_since(self.started_at).as_secs_f64();
        let events: Vec<LoopEvent> = resolved
            .iter()
            .map(|alert| LoopEvent::AlertResolved {
                alert: alert.clone(),
                run_secs,
            })
            .collect();
        self.publish(&events);
        Ok(resolved)
    }

    /// Record the loop stop in the activity log.
    pub fn finish(&self, reason: &str, now: Instant) {
        if let Some(logger) = &self.logger {
            logger.send(ActivityEvent::LoopStopped {
                reason: reason.to_string(),
                ticks: self.state.lock().ticks,
                run_secs: now.saturating_duration_since(self.started_at).as_secs_f64(),
            });
        }
    }

    /// Surface a non-fatal component failure: stderr plus the activity log.
    /// The loop keeps running.
    pub fn report_error(&self, err: &LgError) {
        let retry = if err.is_retryable() { "retryable" } else { "not retryable" };
        eprintln!("[LG-LOOP] {err} ({retry})");
        if let Some(logger) = &self.logger {
            logger.send(ActivityEvent::Error {
                code: err.code().to_string(),
                message: err.to_string(),
            });
        }
    }

    // ──────────────────── read side ────────────────────

    /// Statistics over the current window contents. Idempotent without appends.
    #[must_use]
    pub fn snapshot(&self) -> StatSnapshot {
        let frozen = self.window.lock().freeze();
        frozen.snapshot()
    }

    /// Statistics as of `now`, excluding aged samples.
    #[must_use]
    pub fn snapshot_at(&self, now: Instant) -> StatSnapshot {
        let frozen = self.window.lock().freeze();
        frozen.snapshot_at(now)
    }

    /// Per-tick snapshots, oldest first.
    #[must_use]
    pub fn history(&self) -> Vec<StatSnapshot> {
        self.state.lock().history.iter().copied().collect()
    }

    #[must_use]
    pub fn last_score(&self) -> Option<ScoreResult> {
        self.state.lock().last_score
    }

    #[must_use]
    pub fn trend(&self) -> TrendReport {
        TrendReport::analyze(&self.history())
    }

    #[must_use]
    pub fn active_alerts(&self) -> Vec<ActiveAlert> {
        self.state.lock().evaluator.active_alerts()
    }

    #[must_use]
    pub fn alert_history(&self) -> Vec<AlertEvent> {
        self.state.lock().evaluator.history()
    }

    #[must_use]
    pub fn alert_statistics(&self) -> AlertStatistics {
        self.state.lock().evaluator.statistics()
    }

    #[must_use]
    pub fn control_state(&self) -> ControlState {
        self.state.lock().controller.state()
    }

    #[must_use]
    pub fn endpoint_breakdown(&self) -> BTreeMap<String, EndpointStats> {
        self.window.lock().endpoint_breakdown()
    }

    #[must_use]
    pub fn anomalous_samples(&self) -> u64 {
        self.window.lock().anomalous_samples()
    }

    #[must_use]
    pub fn ticks(&self) -> u64 {
        self.state.lock().ticks
    }

    /// Run analysis as of `now`.
    #[must_use]
    pub fn summary(&self, now: Instant) -> RunSummary {
        let history = self.history();
        let (ticks, score, alerts, control) = {
            let state = self.state.lock();
            (
                state.ticks,
                state.last_score,
                state.evaluator.statistics(),
                state.controller.state(),
            )
        };
        let trend = TrendReport::analyze(&history);
        RunSummary {
            ticks,
            run_secs: now.saturating_duration_since(self.started_at).as_secs_f64(),
            stats: self.snapshot_at(now),
            score,
            trend,
            advice: trend.advice(),
            alerts,
            control,
            endpoints: self.endpoint_breakdown(),
            anomalous_samples: self.anomalous_samples(),
        }
    }
}

fn collect_events(
    alerts: &[AlertEvent],
    directive: &ControlDirective,
    previous_grade: Option<Grade>,
    score: ScoreResult,
    run_secs: f64,
) -> Vec<LoopEvent> {
    let mut events: Vec<LoopEvent> = alerts
        .iter()
        .map(|alert| match alert.kind {
            TransitionKind::Raised => LoopEvent::AlertRaised {
                alert: alert.clone(),
                run_secs,
            },
            TransitionKind::Resolved => LoopEvent::AlertResolved {
                alert: alert.clone(),
                run_secs,
            },
        })
        .collect();
    if directive.changed() {
        events.push(LoopEvent::ConcurrencyChanged {
            directive: *directive,
            run_secs,
        });
    }
    if previous_grade != Some(score.grade) {
        events.push(LoopEvent::GradeChanged {
            from: previous_grade,
            score,
            run_secs,
        });
    }
    events
}
