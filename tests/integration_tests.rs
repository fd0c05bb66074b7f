//! Integration tests: CLI smoke tests, config validation, replay and
//! simulation through the real binary.

mod common;

use std::fmt::Write as _;
use std::fs;

use loadgov::core::config::Config;
use serde_json::Value;

const HUMAN: (&str, &str) = ("LOADGOV_OUTPUT_FORMAT", "human");

fn write_replay(dir: &std::path::Path, name: &str, count: u64, step_ms: u64) -> std::path::PathBuf {
    let mut body = String::new();
    for i in 0..count {
        let latency = 40.0 + (i % 10) as f64 * 5.0;
        let success = i % 25 != 0;
        let endpoint = if i % 2 == 0 { "/search" } else { "/checkout" };
        writeln!(
            body,
            "{{\"offset_ms\": {}, \"latency_ms\": {latency}, \"success\": {success}, \"endpoint\": \"{endpoint}\"}}",
            i * step_ms
        )
        .unwrap();
    }
    let path = dir.join(name);
    fs::write(&path, body).unwrap();
    path
}

#[test]
fn help_command_prints_usage() {
    let result = common::run_cli_case("help_command_prints_usage", &["--help"]);
    assert!(
        result.status.success(),
        "expected success; log: {}",
        result.log_path.display()
    );
    assert!(
        result.stdout.contains("Usage: loadgov [OPTIONS] <COMMAND>"),
        "missing help banner; log: {}",
        result.log_path.display()
    );
}

#[test]
fn version_command_prints_version() {
    let result = common::run_cli_case("version_command_prints_version", &["--version"]);
    assert!(result.status.success(), "log: {}", result.log_path.display());
    assert!(
        result.stdout.contains(env!("CARGO_PKG_VERSION")),
        "log: {}",
        result.log_path.display()
    );
}

#[test]
fn defaults_round_trip_through_toml() {
    let result =
        common::run_cli_case_with_env("defaults_round_trip_through_toml", &["defaults"], &[HUMAN]);
    assert!(result.status.success(), "log: {}", result.log_path.display());
    let parsed = Config::from_toml_str(&result.stdout).expect("defaults output is valid config");
    assert_eq!(parsed, Config::default());
}

#[test]
fn defaults_json_carries_default_rules() {
    let result = common::run_cli_case("defaults_json_carries_default_rules", &["--json", "defaults"]);
    assert!(result.status.success(), "log: {}", result.log_path.display());
    let lines = common::json_lines(&result.stdout);
    assert_eq!(lines[0]["command"], "defaults");
    assert_eq!(lines[0]["config"]["window"]["max_samples"], 10_000);
    let rules = lines[0]["config"]["alerts"]["rules"].as_array().unwrap();
    assert_eq!(rules.len(), 3);
}

#[test]
fn validate_reports_hash_of_loaded_config() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("loadgov.toml");
    fs::write(
        &path,
        "[controller]\ntarget_value = 250.0\nmax_concurrency = 64\n",
    )
    .unwrap();
    let path_str = path.to_str().unwrap();

    let result = common::run_cli_case(
        "validate_reports_hash_of_loaded_config",
        &["--json", "--config", path_str, "validate"],
    );
    assert!(result.status.success(), "log: {}", result.log_path.display());
    let lines = common::json_lines(&result.stdout);
    let expected = Config::load(Some(&path)).unwrap().stable_hash().unwrap();
    assert_eq!(lines[0]["valid"], true);
    assert_eq!(lines[0]["hash"], Value::String(expected));
}

#[test]
fn validate_rejects_bad_weights_with_field_name() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bad.toml");
    fs::write(&path, "[scoring.weights]\nresponse_time = 0.9\n").unwrap();

    let result = common::run_cli_case(
        "validate_rejects_bad_weights_with_field_name",
        &["--json", "--config", path.to_str().unwrap(), "validate"],
    );
    assert_eq!(result.status.code(), Some(1), "log: {}", result.log_path.display());
    let lines = common::json_lines(&result.stdout);
    assert_eq!(lines[0]["valid"], false);
    assert_eq!(lines[0]["code"], "LG-1001");
    assert!(lines[0]["error"].as_str().unwrap().contains("scoring.weights"));
}

#[test]
fn explicit_missing_config_is_a_user_error() {
    let result = common::run_cli_case(
        "explicit_missing_config_is_a_user_error",
        &["--config", "/nonexistent/loadgov.toml", "validate"],
    );
    assert_eq!(result.status.code(), Some(1), "log: {}", result.log_path.display());
}

#[test]
fn env_override_is_validated() {
    let result = common::run_cli_case_with_env(
        "env_override_is_validated",
        &["validate"],
        &[("LOADGOV_CONTROLLER_MIN_CONCURRENCY", "500")],
    );
    assert_eq!(result.status.code(), Some(1), "log: {}", result.log_path.display());
    assert!(result.stderr.contains("controller."), "log: {}", result.log_path.display());
}

#[test]
fn replay_emits_ticks_and_summary() {
    let dir = tempfile::tempdir().unwrap();
    let file = write_replay(dir.path(), "run.jsonl", 100, 30);

    let result = common::run_cli_case(
        "replay_emits_ticks_and_summary",
        &["--json", "replay", file.to_str().unwrap(), "--tick-ms", "1000"],
    );
    assert!(result.status.success(), "log: {}", result.log_path.display());
    let lines = common::json_lines(&result.stdout);
    // Ticks at 1s, 2s and 3s, then the summary.
    assert_eq!(lines.len(), 4, "log: {}", result.log_path.display());
    assert_eq!(lines[0]["tick"], 1);
    assert_eq!(lines[2]["tick"], 3);

    let summary = &lines[3]["summary"];
    assert_eq!(lines[3]["command"], "replay");
    assert_eq!(summary["ticks"], 3);
    assert_eq!(summary["stats"]["count"], 100);
    assert_eq!(summary["stats"]["failures"], 4);
    assert_eq!(summary["endpoints"]["/search"]["requests"], 50);
    assert_eq!(summary["endpoints"]["/checkout"]["requests"], 50);
}

#[test]
fn replay_names_malformed_line() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("broken.jsonl");
    fs::write(&path, "{\"offset_ms\": 0, \"latency_ms\": 10}\n{oops}\n").unwrap();

    let result = common::run_cli_case(
        "replay_names_malformed_line",
        &["replay", path.to_str().unwrap()],
    );
    assert_eq!(result.status.code(), Some(1), "log: {}", result.log_path.display());
    assert!(result.stderr.contains("broken.jsonl:2"), "log: {}", result.log_path.display());
}

#[test]
fn replay_writes_activity_log() {
    let dir = tempfile::tempdir().unwrap();
    let file = write_replay(dir.path(), "run.jsonl", 60, 50);
    let log = dir.path().join("activity.jsonl");

    let result = common::run_cli_case_with_env(
        "replay_writes_activity_log",
        &["--json", "replay", file.to_str().unwrap()],
        &[("LOADGOV_RUNTIME_ACTIVITY_LOG", log.to_str().unwrap())],
    );
    assert!(result.status.success(), "log: {}", result.log_path.display());

    let entries: Vec<Value> = fs::read_to_string(&log)
        .unwrap()
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert_eq!(entries.first().unwrap()["event"], "loop_start");
    assert_eq!(entries.last().unwrap()["event"], "loop_stop");
    assert!(entries.iter().any(|e| e["event"] == "grade_change"));
}

#[test]
fn simulate_is_reproducible_for_a_seed() {
    let args = [
        "--json", "simulate", "--seconds", "180", "--capacity", "40", "--seed", "11",
    ];
    let first = common::run_cli_case("simulate_is_reproducible_for_a_seed_a", &args);
    let second = common::run_cli_case("simulate_is_reproducible_for_a_seed_b", &args);
    assert!(first.status.success(), "log: {}", first.log_path.display());
    assert!(second.status.success(), "log: {}", second.log_path.display());

    let a = common::json_lines(&first.stdout);
    let b = common::json_lines(&second.stdout);
    assert_eq!(a.last().unwrap()["summary"], b.last().unwrap()["summary"]);
    assert_eq!(a.last().unwrap()["command"], "simulate");
}

#[test]
fn simulate_rejects_zero_capacity() {
    let result = common::run_cli_case(
        "simulate_rejects_zero_capacity",
        &["simulate", "--capacity", "0"],
    );
    assert_eq!(result.status.code(), Some(1), "log: {}", result.log_path.display());
}
