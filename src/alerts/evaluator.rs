//! Per-rule alert state machine: sustained breach detection, cooldown, hourly
//! firing cap, bounded event history and aggregate statistics.
//!
//! ```text
//! Idle --condition holds--> Breaching --held >= sustain, cooldown elapsed--> Firing
//!   ^                           |                                             |
//!   +-----condition clears------+---------------condition clears--------------+
//! ```
//!
//! Leaving `Firing` emits a `Resolved` event; entering it emits `Raised`.
//! Rules never share state, so evaluation order cannot change outcomes.

#![allow(missing_docs)]

use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::alerts::rule::{AlertRule, Comparator, Metric, Severity};
use crate::core::config::validate_rules;
use crate::core::errors::Result;
use crate::monitor::stats::StatSnapshot;

/// Rolling horizon of the per-rule firing cap.
pub const FIRE_CAP_HORIZON: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionKind {
    Raised,
    Resolved,
}

impl TransitionKind {
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Raised => "raised",
            Self::Resolved => "resolved",
        }
    }
}

/// One alert lifecycle transition, handed verbatim to notification sinks.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertEvent {
    pub rule: String,
    pub severity: Severity,
    pub metric: Metric,
    pub comparator: Comparator,
    pub kind: TransitionKind,
    /// Metric value that triggered the transition.
    pub value: f64,
    pub threshold: f64,
    #[serde(skip)]
    pub at: Instant,
}

impl AlertEvent {
    fn from_rule(rule: &AlertRule, kind: TransitionKind, value: f64, at: Instant) -> Self {
        Self {
            rule: rule.name.clone(),
            severity: rule.severity,
            metric: rule.metric,
            comparator: rule.comparator,
            kind,
            value,
            threshold: rule.threshold,
            at,
        }
    }

    /// Operator-facing one-line description.
    #[must_use]
    pub fn message(&self) -> String {
        match self.kind {
            TransitionKind::Raised => format!(
                "[{}] alert '{}' raised: {} = {:.2} {} {}",
                self.severity,
                self.rule,
                self.metric,
                self.value,
                self.comparator.symbol(),
                self.threshold
            ),
            TransitionKind::Resolved => format!(
                "[{}] alert '{}' resolved: {} = {:.2} no longer {} {}",
                self.severity,
                self.rule,
                self.metric,
                self.value,
                self.comparator.symbol(),
                self.threshold
            ),
        }
    }
}

impl fmt::Display for AlertEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message())
    }
}

/// Where a rule currently sits in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RulePhase {
    Idle,
    Breaching,
    Firing,
}

/// Mutable runtime state of one rule. Only the evaluator mutates it.
#[derive(Debug, Clone, Default)]
pub struct AlertState {
    pub breach_started_at: Option<Instant>,
    pub last_fired_at: Option<Instant>,
    pub active: bool,
    last_value: f64,
    recent_fires: VecDeque<Instant>,
    suppression_noted: bool,
}

impl AlertState {
    #[must_use]
    pub fn phase(&self) -> RulePhase {
        if self.active {
            RulePhase::Firing
        } else if self.breach_started_at.is_some() {
            RulePhase::Breaching
        } else {
            RulePhase::Idle
        }
    }

    fn cooldown_elapsed(&self, now: Instant, cooldown: Duration) -> bool {
        self.last_fired_at
            .is_none_or(|fired| now.saturating_duration_since(fired) >= cooldown)
    }

    fn fire_cap_reached(&mut self, now: Instant, cap: u32) -> bool {
        while let Some(&oldest) = self.recent_fires.front() {
            if now.saturating_duration_since(oldest) >= FIRE_CAP_HORIZON {
                self.recent_fires.pop_front();
            } else {
                break;
            }
        }
        cap > 0 && self.recent_fires.len() >= cap as usize
    }
}

/// Currently firing alert.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActiveAlert {
    pub rule: String,
    pub severity: Severity,
    pub metric: Metric,
    pub value: f64,
    #[serde(skip)]
    pub since: Instant,
}

/// Aggregate counters since the evaluator was created.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AlertStatistics {
    pub raised: u64,
    pub resolved: u64,
    /// Firings withheld by the hourly cap, counted once per breach.
    pub suppressed: u64,
    pub raised_by_severity: BTreeMap<Severity, u64>,
    pub raised_by_metric: BTreeMap<Metric, u64>,
}

impl AlertStatistics {
    fn record(&mut self, event: &AlertEvent) {
        match event.kind {
            TransitionKind::Raised => {
                self.raised += 1;
                *self.raised_by_severity.entry(event.severity).or_default() += 1;
                *self.raised_by_metric.entry(event.metric).or_default() += 1;
            }
            TransitionKind::Resolved => self.resolved += 1,
        }
    }
}

#[derive(Debug, Clone)]
struct RuleSlot {
    rule: AlertRule,
    state: AlertState,
}

/// Holds the rule set and its per-rule state.
#[derive(Debug, Clone)]
pub struct RuleEvaluator {
    slots: Vec<RuleSlot>,
    history: VecDeque<AlertEvent>,
    history_capacity: usize,
    stats: AlertStatistics,
}

impl RuleEvaluator {
    pub fn new(rules: Vec<AlertRule>, history_capacity: usize) -> Result<Self> {
        validate_rules(&rules)?;
        Ok(Self {
            slots: rules
                .into_iter()
                .map(|rule| RuleSlot {
                    rule,
                    state: AlertState::default(),
                })
                .collect(),
            history: VecDeque::with_capacity(history_capacity.min(1024)),
            history_capacity,
            stats: AlertStatistics::default(),
        })
    }

    /// Evaluate every enabled rule against `snapshot`.
    ///
    /// Events come back in rule-configuration order.
    pub fn evaluate(&mut self, snapshot: &StatSnapshot, now: Instant) -> Vec<AlertEvent> {
        let mut events = Vec::new();
        for slot in &mut self.slots {
            if let Some(event) = step(&slot.rule, &mut slot.state, snapshot, now, &mut self.stats) {
                events.push(event);
            }
        }
        for event in &events {
            self.record(event.clone());
        }
        events
    }

    /// Swap in a new rule set.
    ///
    /// Rules whose definition is unchanged keep their state. Removed or
    /// redefined rules that were firing resolve, and those events are returned.
    pub fn replace_rules(&mut self, rules: Vec<AlertRule>, now: Instant) -> Result<Vec<AlertEvent>> {
        validate_rules(&rules)?;
        let mut old: Vec<Option<RuleSlot>> = self.slots.drain(..).map(Some).collect();

        let mut slots = Vec::with_capacity(rules.len());
        for rule in rules {
            let kept = old
                .iter_mut()
                .find(|s| s.as_ref().is_some_and(|s| s.rule == rule))
                .and_then(Option::take);
            slots.push(kept.unwrap_or(RuleSlot {
                rule,
                state: AlertState::default(),
            }));
        }

        let events: Vec<AlertEvent> = old
            .into_iter()
            .flatten()
            .filter(|slot| slot.state.active)
            .map(|slot| {
                AlertEvent::from_rule(
                    &slot.rule,
                    TransitionKind::Resolved,
                    slot.state.last_value,
                    now,
                )
            })
            .collect();
        self.slots = slots;
        for event in &events {
            self.record(event.clone());
        }
        Ok(events)
    }

    fn record(&mut self, event: AlertEvent) {
        self.stats.record(&event);
        if self.history_capacity == 0 {
            return;
        }
        if self.history.len() == self.history_capacity {
            self.history.pop_front();
        }
        self.history.push_back(event);
    }

    #[must_use]
    pub fn rules(&self) -> Vec<&AlertRule> {
        self.slots.iter().map(|s| &s.rule).collect()
    }

    #[must_use]
    pub fn state(&self, rule_name: &str) -> Option<&AlertState> {
        self.slots
            .iter()
            .find(|s| s.rule.name == rule_name)
            .map(|s| &s.state)
    }

    #[must_use]
    pub fn phase(&self, rule_name: &str) -> Option<RulePhase> {
        self.state(rule_name).map(AlertState::phase)
    }

    #[must_use]
    pub fn active_alerts(&self) -> Vec<ActiveAlert> {
        self.slots
            .iter()
            .filter(|s| s.state.active)
            .filter_map(|s| {
                s.state.last_fired_at.map(|since| ActiveAlert {
                    rule: s.rule.name.clone(),
                    severity: s.rule.severity,
                    metric: s.rule.metric,
                    value: s.state.last_value,
                    since,
                })
            })
            .collect()
    }

    /// Recent transitions, oldest first.
    #[must_use]
    pub fn history(&self) -> Vec<AlertEvent> {
        self.history.iter().cloned().collect()
    }

    #[must_use]
    pub fn statistics(&self) -> AlertStatistics {
        self.stats.clone()
    }
}

fn step(
    rule: &AlertRule,
    state: &mut AlertState,
    snapshot: &StatSnapshot,
    now: Instant,
    stats: &mut AlertStatistics,
) -> Option<AlertEvent> {
    if !rule.enabled {
        return None;
    }
    let value = rule.metric.value(snapshot);

    if !rule.breached_by(snapshot) {
        let event = state
            .active
            .then(|| AlertEvent::from_rule(rule, TransitionKind::Resolved, value, now));
        state.active = false;
        state.breach_started_at = None;
        state.suppression_noted = false;
        state.last_value = value;
        return event;
    }

    state.last_value = value;
    let started = *state.breach_started_at.get_or_insert(now);
    if state.active
        || now.saturating_duration_since(started) < rule.sustain()
        || !state.cooldown_elapsed(now, rule.cooldown())
    {
        return None;
    }
    if state.fire_cap_reached(now, rule.max_fires_per_hour) {
        if !state.suppression_noted {
            state.suppression_noted = true;
            stats.suppressed += 1;
        }
        return None;
    }

    state.active = true;
    state.last_fired_at = Some(now);
    state.suppression_noted = false;
    state.recent_fires.push_back(now);
    Some(AlertEvent::from_rule(rule, TransitionKind::Raised, value, now))
}
