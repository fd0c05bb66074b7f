//! Closed set of feedback-loop events and the sink interface that consumes them.

#![allow(missing_docs)]

use crossbeam_channel::{Sender, TrySendError};
use parking_lot::Mutex;
use serde::Serialize;

use crate::alerts::evaluator::AlertEvent;
use crate::control::adaptive::ControlDirective;
use crate::logger::activity::{ActivityEvent, ActivityLoggerHandle};
use crate::scoring::engine::{Grade, ScoreResult};

/// Everything a tick can announce. Consumers match exhaustively.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LoopEvent {
    AlertRaised {
        alert: AlertEvent,
        run_secs: f64,
    },
    AlertResolved {
        alert: AlertEvent,
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
}

impl LoopEvent {
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::AlertRaised { .. } => "alert_raised",
            Self::AlertResolved { .. } => "alert_resolved",
            Self::ConcurrencyChanged { .. } => "concurrency_changed",
            Self::GradeChanged { .. } => "grade_changed",
        }
    }
}

/// Receives tick events. Implementations must not block the tick thread.
pub trait LoopEventSink: Send + Sync {
    fn publish(&self, event: &LoopEvent);
}

impl LoopEventSink for ActivityLoggerHandle {
    fn publish(&self, event: &LoopEvent) {
        let activity = match event {
            LoopEvent::AlertRaised { alert, run_secs }
            | LoopEvent::AlertResolved { alert, run_secs } => ActivityEvent::Alert {
                event: alert.clone(),
                run_secs: *run_secs,
            },
            LoopEvent::ConcurrencyChanged {
                directive,
                run_secs,
            } => ActivityEvent::ConcurrencyChanged {
                directive: *directive,
                run_secs: *run_secs,
            },
            LoopEvent::GradeChanged {
                from,
                score,
                run_secs,
            } => ActivityEvent::GradeChanged {
                from: *from,
                score: *score,
                run_secs: *run_secs,
            },
        };
        self.send(activity);
    }
}

/// Forwards events to a bounded channel; a full channel drops the event.
impl LoopEventSink for Sender<LoopEvent> {
    fn publish(&self, event: &LoopEvent) {
        match self.try_send(event.clone()) {
            Ok(()) | Err(TrySendError::Disconnected(_)) => {}
            Err(TrySendError::Full(_)) => {
                eprintln!("[LG-EVENTS] event channel full, dropped {}", event.kind());
            }
        }
    }
}

/// In-memory sink, handy for embedding and tests.
#[derive(Debug, Default)]
pub struct CollectingSink {
    events: Mutex<Vec<LoopEvent>>,
}

impl CollectingSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Take everything collected so far.
    pub fn drain(&self) -> Vec<LoopEvent> {
        std::mem::take(&mut *self.events.lock())
    }
}

impl LoopEventSink for CollectingSink {
    fn publish(&self, event: &LoopEvent) {
        self.events.lock().push(event.clone());
    }
}

impl<T: LoopEventSink + ?Sized> LoopEventSink for std::sync::Arc<T> {
    fn publish(&self, event: &LoopEvent) {
        (**self).publish(event);
    }
}
