//! Property-based tests for the statistical and decision invariants.
//!
//! Covers percentile selection, window bounds and ordering, snapshot
//! idempotence, grade monotonicity, order-independent rule evaluation, and
//! controller bounds.

use std::collections::BTreeSet;
use std::time::{Duration, Instant};

use proptest::prelude::*;

use crate::alerts::evaluator::RuleEvaluator;
use crate::alerts::rule::{AlertRule, Comparator, Metric, Severity};
use crate::control::adaptive::AdaptiveController;
use crate::core::config::{ControllerConfig, ScoringConfig};
use crate::monitor::stats::{StatSnapshot, nearest_rank};
use crate::monitor::window::{MetricWindow, RequestOutcome};
use crate::scoring::bands::BandTable;
use crate::scoring::engine::{GradeCutoffs, ScoreEngine, SubScores};

// ──────────────────── strategies ────────────────────

fn arb_latencies() -> impl Strategy<Value = Vec<f64>> {
    prop::collection::vec(0.0f64..5_000.0, 1..200)
}

/// (offset ms, latency ms, success)
fn arb_outcomes() -> impl Strategy<Value = Vec<(u64, f64, bool)>> {
    prop::collection::vec((0u64..60_000, 0.0f64..3_000.0, any::<bool>()), 0..300)
}

fn arb_snapshot() -> impl Strategy<Value = StatSnapshot> {
    (1u64..10_000, 0.0f64..3_000.0, 0.0f64..500.0, 0.0f64..40.0).prop_map(
        |(count, p95, throughput, error_rate)| StatSnapshot {
            count,
            mean: p95 / 2.0,
            median: p95 / 2.0,
            p90: p95 * 0.9,
            p95,
            p99: p95 * 1.1,
            max: p95 * 1.2,
            throughput,
            error_rate,
            ..StatSnapshot::default()
        },
    )
}

fn rule_set() -> Vec<AlertRule> {
    vec![
        AlertRule::new("p95", Metric::P95, Comparator::Gt, 800.0, Severity::High)
            .sustained_for(2.0),
        AlertRule::new("errors", Metric::ErrorRate, Comparator::Gte, 5.0, Severity::Critical)
            .with_cooldown(3.0),
        AlertRule::new("slow", Metric::Throughput, Comparator::Lt, 50.0, Severity::Low),
        AlertRule::new("mean", Metric::Mean, Comparator::Gt, 400.0, Severity::Medium)
            .sustained_for(1.0)
            .with_max_fires_per_hour(2),
    ]
}

// ──────────────────── properties ────────────────────

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// Nearest rank picks sorted[ceil(p/100 * n) - 1] and is monotone in p.
    #[test]
    fn percentile_matches_nearest_rank_formula(mut values in arb_latencies(), pct in 1.0f64..=100.0) {
        values.sort_by(f64::total_cmp);
        let n = values.len();
        let rank = ((pct * n as f64 / 100.0).ceil() as usize).clamp(1, n);
        prop_assert_eq!(nearest_rank(&values, pct), values[rank - 1]);
        prop_assert!(nearest_rank(&values, 50.0) <= nearest_rank(&values, 90.0));
        prop_assert!(nearest_rank(&values, 90.0) <= nearest_rank(&values, 95.0));
        prop_assert!(nearest_rank(&values, 95.0) <= nearest_rank(&values, 99.0));
    }

    /// The window never exceeds its bound and stays time-ordered, whatever
    /// order outcomes arrive in.
    #[test]
    fn window_is_bounded_and_ordered(outcomes in arb_outcomes(), cap in 1usize..64) {
        let t0 = Instant::now();
        let mut window = MetricWindow::new(cap, None, Duration::from_secs(10));
        for (offset, latency, success) in outcomes {
            window.append(RequestOutcome::new(t0 + Duration::from_millis(offset), latency, success));
            prop_assert!(window.len() <= cap);
        }
        let frozen = window.freeze();
        prop_assert!(frozen.samples().windows(2).all(|w| w[0].at <= w[1].at));
    }

    /// Without appends in between, snapshots are identical.
    #[test]
    fn snapshot_is_idempotent(outcomes in arb_outcomes()) {
        let t0 = Instant::now();
        let mut window = MetricWindow::default();
        for (offset, latency, success) in outcomes {
            window.append(RequestOutcome::new(t0 + Duration::from_millis(offset), latency, success));
        }
        let first = window.snapshot();
        let second = window.snapshot();
        prop_assert_eq!(first, second);
        prop_assert!(first.min <= first.median && first.median <= first.max);
        prop_assert!(first.error_rate >= 0.0 && first.error_rate <= 100.0);
    }

    /// Banded scores never improve as a lower-is-better value worsens.
    #[test]
    fn band_score_is_monotone(a in 0.0f64..5_000.0, b in 0.0f64..5_000.0) {
        let table = BandTable::lower_is_better([200.0, 500.0, 1000.0, 2000.0]);
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        prop_assert!(table.score(lo) >= table.score(hi));
        prop_assert!((0.0..=100.0).contains(&table.score(hi)));
    }

    /// A higher overall score never yields a worse letter.
    #[test]
    fn grade_is_monotone_in_overall(a in 0.0f64..=100.0, b in 0.0f64..=100.0) {
        let cutoffs = GradeCutoffs::default();
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        prop_assert!(cutoffs.grade(hi) <= cutoffs.grade(lo));
    }

    /// Raising one sub-score never lowers the overall score.
    #[test]
    fn overall_is_monotone_in_sub_scores(
        rt in 0.0f64..=100.0,
        tp in 0.0f64..=100.0,
        er in 0.0f64..=100.0,
        st in 0.0f64..=100.0,
        bump in 0.0f64..=50.0,
        dimension in 0usize..4,
    ) {
        let engine = ScoreEngine::new(ScoringConfig::default()).unwrap();
        let base = SubScores { response_time: rt, throughput: tp, error_rate: er, stability: st };
        let mut better = base;
        let raised = match dimension {
            0 => &mut better.response_time,
            1 => &mut better.throughput,
            2 => &mut better.error_rate,
            _ => &mut better.stability,
        };
        *raised = (*raised + bump).min(100.0);
        let base_score = engine.combine(base);
        let better_score = engine.combine(better);
        prop_assert!(better_score.overall >= base_score.overall);
        prop_assert!(better_score.grade <= base_score.grade);
    }

    /// Rule outcomes do not depend on the order rules are configured in.
    #[test]
    fn rule_evaluation_is_order_independent(
        snapshots in prop::collection::vec(arb_snapshot(), 1..40),
        rotation in 0usize..4,
    ) {
        let rules = rule_set();
        let mut rotated = rules.clone();
        rotated.rotate_left(rotation);

        let mut forward = RuleEvaluator::new(rules, 512).unwrap();
        let mut shuffled = RuleEvaluator::new(rotated, 512).unwrap();
        let t0 = Instant::now();
        for (i, snapshot) in snapshots.iter().enumerate() {
            let now = t0 + Duration::from_millis(500 * i as u64);
            let collect = |events: Vec<crate::alerts::evaluator::AlertEvent>| {
                events
                    .into_iter()
                    .map(|e| (e.rule, e.kind.label()))
                    .collect::<BTreeSet<_>>()
            };
            let a = collect(forward.evaluate(snapshot, now));
            let b = collect(shuffled.evaluate(snapshot, now));
            prop_assert_eq!(a, b);
        }
        prop_assert_eq!(forward.statistics(), shuffled.statistics());
    }

    /// The controller never leaves [min, max], whatever it observes.
    #[test]
    fn controller_respects_bounds(snapshots in prop::collection::vec(arb_snapshot(), 1..60)) {
        let config = ControllerConfig {
            min_concurrency: 2,
            max_concurrency: 40,
            initial_concurrency: 10,
            ..ControllerConfig::default()
        };
        let interval = config.adjustment_interval();
        let mut controller = AdaptiveController::new(config).unwrap();
        let t0 = Instant::now();
        for (i, snapshot) in snapshots.iter().enumerate() {
            let directive = controller.adjust(snapshot, t0 + interval * i as u32);
            prop_assert!((2..=40).contains(&directive.target_concurrency));
        }
    }
}
