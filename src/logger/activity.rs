//! Activity logger thread.
//!
//! A dedicated thread owns the [`JsonlWriter`]. Everything else sends
//! [`ActivityEvent`]s over a bounded crossbeam channel with `try_send`, so
//! neither ingestion nor the tick thread ever waits on disk.

#![allow(missing_docs)]

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};

use crate::alerts::evaluator::{AlertEvent, TransitionKind};
use crate::alerts::rule::Severity;
use crate::control::adaptive::ControlDirective;
use crate::core::errors::{LgError, Result};
use crate::logger::jsonl::{EventType, JsonlConfig, JsonlWriter, LogEntry, LogLevel};
use crate::scoring::engine::{Grade, ScoreResult};

/// Default bounded channel capacity.
pub const CHANNEL_CAPACITY: usize = 1024;

// ──────────────────── public event type ────────────────────

#[derive(Debug, Clone)]
pub enum ActivityEvent {
    LoopStarted {
        version: String,
        config_hash: String,
        rules: usize,
    },
    LoopStopped {
        reason: String,
        ticks: u64,
        run_secs: f64,
    },
    Alert {
        event: AlertEvent,
        run_secs: f64,
    },
    ConcurrencyChanged {
        directive: ControlDirective,
        run_secs: f64,
    },
    GradeChanged {
        from: Option<Grade>,
        score: ScoreResult,
        run_secs: f64,
    },
    RulesReloaded {
        rules: usize,
        resolved: usize,
    },
    /// First malformed latency sample of the run; later ones are only counted.
    DataAnomaly {
        latency_ms: f64,
        disposition: String,
    },
    Error {
        code: String,
        message: String,
    },
    /// Sentinel asking the logger thread to flush and exit.
    Shutdown,
}

// ──────────────────── public handle ────────────────────

/// Cheaply cloneable, non-blocking sender for activity events.
#[derive(Debug, Clone)]
pub struct ActivityLoggerHandle {
    tx: Sender<ActivityEvent>,
    dropped_events: Arc<AtomicU64>,
}

impl ActivityLoggerHandle {
    /// Queue an event. Drops it and bumps the counter when the channel is full.
    pub fn send(&self, event: ActivityEvent) {
        if let Err(TrySendError::Full(_)) = self.tx.try_send(event) {
            self.dropped_events.fetch_add(1, Ordering::Relaxed);
        }
        // Disconnected is fine during shutdown.
    }

    #[must_use]
    pub fn dropped_events(&self) -> u64 {
        self.dropped_events.load(Ordering::Relaxed)
    }

    /// Ask the logger thread to flush and exit. Blocks only if the channel is full.
    pub fn shutdown(&self) {
        let _ = self.tx.send(ActivityEvent::Shutdown);
    }
}

// ──────────────────── spawn ────────────────────

/// Spawn the logger thread. It runs until `shutdown()` or until every handle
/// is dropped.
pub fn spawn_logger(
    jsonl: JsonlConfig,
    channel_capacity: usize,
) -> Result<(ActivityLoggerHandle, thread::JoinHandle<()>)> {
    let (tx, rx) = bounded::<ActivityEvent>(channel_capacity.max(1));
    let dropped = Arc::new(AtomicU64::new(0));
    let dropped_clone = Arc::clone(&dropped);

    let join = thread::Builder::new()
        .name("loadgov-logger".to_string())
        .spawn(move || logger_thread_main(&rx, jsonl, &dropped_clone))
        .map_err(|e| LgError::Runtime {
            details: format!("failed to spawn logger thread: {e}"),
        })?;

    Ok((
        ActivityLoggerHandle {
            tx,
            dropped_events: dropped,
        },
        join,
    ))
}

// ──────────────────── logger thread ────────────────────

fn logger_thread_main(rx: &Receiver<ActivityEvent>, config: JsonlConfig, dropped: &AtomicU64) {
    let mut jsonl = JsonlWriter::open(config);

    while let Ok(event) = rx.recv() {
        let d = dropped.swap(0, Ordering::Relaxed);
        if d > 0 {
            let mut warn = LogEntry::new(EventType::Error, LogLevel::Warning);
            warn.details = Some(format!("{d} activity events dropped due to back-pressure"));
            jsonl.write_entry(&warn);
        }
        if matches!(event, ActivityEvent::Shutdown) {
            break;
        }
        if let Some(entry) = event_to_log_entry(&event) {
            jsonl.write_entry(&entry);
        }
    }

    jsonl.flush();
    jsonl.fsync();
}

// ──────────────────── event conversion ────────────────────

const fn alert_level(severity: Severity) -> LogLevel {
    match severity {
        Severity::Low | Severity::Medium => LogLevel::Info,
        Severity::High => LogLevel::Warning,
        Severity::Critical => LogLevel::Critical,
    }
}

fn event_to_log_entry(event: &ActivityEvent) -> Option<LogEntry> {
    let entry = match event {
        ActivityEvent::LoopStarted {
            version,
            config_hash,
            rules,
        } => {
            let mut e = LogEntry::new(EventType::LoopStart, LogLevel::Info);
            e.details = Some(format!(
                "version={version} config_hash={config_hash} rules={rules}"
            ));
            e
        }
        ActivityEvent::LoopStopped {
            reason,
            ticks,
            run_secs,
        } => {
            let mut e = LogEntry::new(EventType::LoopStop, LogLevel::Info);
            e.run_secs = Some(*run_secs);
            e.details = Some(format!("reason={reason} ticks={ticks}"));
            e
        }
        ActivityEvent::Alert { event, run_secs } => {
            let (kind, level) = match event.kind {
                TransitionKind::Raised => (EventType::AlertRaised, alert_level(event.severity)),
                TransitionKind::Resolved => (EventType::AlertResolved, LogLevel::Info),
            };
            let mut e = LogEntry::new(kind, level);
            e.run_secs = Some(*run_secs);
            e.rule = Some(event.rule.clone());
            e.alert_severity = Some(event.severity.label().to_string());
            e.metric = Some(event.metric.name().to_string());
            e.value = Some(event.value);
            e.threshold = Some(event.threshold);
            e.details = Some(event.message());
            e
        }
        ActivityEvent::ConcurrencyChanged {
            directive,
            run_secs,
        } => {
            let mut e = LogEntry::new(EventType::ConcurrencyChange, LogLevel::Info);
            e.run_secs = Some(*run_secs);
            e.concurrency_from = Some(directive.previous_concurrency);
            e.concurrency_to = Some(directive.target_concurrency);
            e.action = Some(directive.action.label().to_string());
            if directive.damped {
                e.details = Some("step damped by oscillation guard".to_string());
            }
            e
        }
        ActivityEvent::GradeChanged {
            from,
            score,
            run_secs,
        } => {
            let level = if score.grade == Grade::D {
                LogLevel::Warning
            } else {
                LogLevel::Info
            };
            let mut e = LogEntry::new(EventType::GradeChange, level);
            e.run_secs = Some(*run_secs);
            e.grade = Some(score.grade.to_string());
            e.score = Some(score.overall);
            e.details = Some(match from {
                Some(prev) => format!("{prev}->{}", score.grade),
                None => format!("initial grade {}", score.grade),
            });
            e
        }
        ActivityEvent::RulesReloaded { rules, resolved } => {
            let mut e = LogEntry::new(EventType::RulesReload, LogLevel::Info);
            e.details = Some(format!("rules={rules} resolved_on_reload={resolved}"));
            e
        }
        ActivityEvent::DataAnomaly {
            latency_ms,
            disposition,
        } => {
            let mut e = LogEntry::new(EventType::DataAnomaly, LogLevel::Warning);
            e.value = Some(*latency_ms).filter(|v| v.is_finite());
            e.details = Some(format!(
                "latency sample {latency_ms} {disposition}; further anomalies are counted, not logged"
            ));
            e
        }
        ActivityEvent::Error { code, message } => {
            let mut e = LogEntry::new(EventType::Error, LogLevel::Warning);
            e.error_code = Some(code.clone());
            e.details = Some(message.clone());
            e
        }
        ActivityEvent::Shutdown => return None,
    };
    Some(entry)
}

// ──────────────────── tests ────────────────────
