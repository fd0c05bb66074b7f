//! Top-level CLI definition and dispatch.

#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]

use std::fs;
use std::io::{self, IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use clap::{Args, Parser, Subcommand};
use colored::{ColoredString, Colorize, control};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Deserialize;
use serde_json::{Value, json};
use thiserror::Error;

use loadgov::alerts::evaluator::TransitionKind;
use loadgov::alerts::rule::Severity;
use loadgov::core::config::Config;
use loadgov::daemon::orchestrator::{FeedbackLoop, RunSummary, TickResult};
use loadgov::logger::activity::{ActivityLoggerHandle, spawn_logger};
use loadgov::logger::jsonl::JsonlConfig;
use loadgov::monitor::window::RequestOutcome;
use loadgov::scoring::engine::Grade;

/// loadgov: closed-loop performance governor for load tests.
#[derive(Debug, Parser)]
#[command(
    name = "loadgov",
    author,
    version,
    about = "Closed-loop performance governor for load tests",
    long_about = None,
    arg_required_else_help = true
)]
pub struct Cli {
    /// Override config file path.
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Force JSON output mode.
    #[arg(long, global = true)]
    json: bool,
    /// Disable colored output.
    #[arg(long, global = true)]
    no_color: bool,
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Print the default configuration as TOML.
    Defaults,
    /// Load and validate the configuration.
    Validate,
    /// Feed recorded outcomes through the loop on a simulated clock.
    Replay(ReplayArgs),
    /// Close the loop against a synthetic service.
    Simulate(SimulateArgs),
}

#[derive(Debug, Clone, Args)]
struct ReplayArgs {
    /// JSONL file of outcomes: {"offset_ms", "latency_ms", "success", "endpoint"}.
    #[arg(value_name = "FILE")]
    file: PathBuf,
    /// Simulated tick interval; defaults to runtime.tick_interval_ms.
    #[arg(long, value_name = "MS")]
    tick_ms: Option<u64>,
}

#[derive(Debug, Clone, Args)]
struct SimulateArgs {
    /// Simulated run length.
    #[arg(long, default_value_t = 600, value_name = "SECONDS")]
    seconds: u64,
    /// Concurrency at which the synthetic service saturates.
    #[arg(long, default_value_t = 100, value_name = "N")]
    capacity: u32,
    /// RNG seed; the same seed reproduces the same trace.
    #[arg(long, default_value_t = 42)]
    seed: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputMode {
    Human,
    Json,
}

/// CLI error type with explicit exit-code mapping.
#[derive(Debug, Error)]
pub enum CliError {
    /// Invalid user input at runtime.
    #[error("{0}")]
    User(String),
    /// Environment/runtime failure.
    #[error("{0}")]
    Runtime(String),
    /// Internal bug or invariant violation.
    #[error("{0}")]
    Internal(String),
    /// JSON serialization failed.
    #[error("failed to serialize output: {0}")]
    Json(#[from] serde_json::Error),
    /// Output write failed.
    #[error("failed to write output: {0}")]
    Io(#[from] io::Error),
}

impl CliError {
    /// Process exit code contract for the CLI.
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::User(_) => 1,
            Self::Runtime(_) | Self::Io(_) => 2,
            Self::Internal(_) | Self::Json(_) => 3,
        }
    }
}

/// Dispatch CLI commands.
pub fn run(cli: &Cli) -> Result<(), CliError> {
    if cli.no_color {
        control::set_override(false);
    }

    match &cli.command {
        Command::Defaults => emit_defaults(cli),
        Command::Validate => run_validate(cli),
        Command::Replay(args) => run_replay(cli, args),
        Command::Simulate(args) => run_simulate(cli, args),
    }
}

fn load_config(cli: &Cli) -> Result<Config, CliError> {
    Config::load(cli.config.as_deref()).map_err(|e| CliError::User(format!("invalid config: {e}")))
}

// ──────────────────── defaults / validate ────────────────────

fn emit_defaults(cli: &Cli) -> Result<(), CliError> {
    let config = Config::default();
    match output_mode(cli) {
        OutputMode::Human => {
            let rendered = config
                .to_toml_string()
                .map_err(|e| CliError::Internal(e.to_string()))?;
            print!("{rendered}");
        }
        OutputMode::Json => {
            let payload = json!({
                "command": "defaults",
                "config": serde_json::to_value(&config)?,
            });
            write_json_line(&payload)?;
        }
    }
    Ok(())
}

fn run_validate(cli: &Cli) -> Result<(), CliError> {
    let source = cli.config.clone().unwrap_or_else(Config::default_path);
    match Config::load(cli.config.as_deref()) {
        Ok(config) => {
            let hash = config
                .stable_hash()
                .map_err(|e| CliError::Internal(e.to_string()))?;
            match output_mode(cli) {
                OutputMode::Human => {
                    println!("{}", "Configuration is valid.".green());
                    if source.exists() {
                        println!("  Source: {}", source.display());
                    } else {
                        println!("  Source: built-in defaults");
                    }
                    println!("  Rules:  {}", config.alerts.rules.len());
                    println!("  Hash:   {hash}");
                }
                OutputMode::Json => {
                    let payload = json!({
                        "command": "validate",
                        "valid": true,
                        "path": source.to_string_lossy(),
                        "rules": config.alerts.rules.len(),
                        "hash": hash,
                    });
                    write_json_line(&payload)?;
                }
            }
            Ok(())
        }
        Err(e) => {
            match output_mode(cli) {
                OutputMode::Human => eprintln!("{} {e}", "Configuration is INVALID:".red()),
                OutputMode::Json => {
                    let payload = json!({
                        "command": "validate",
                        "valid": false,
                        "code": e.code(),
                        "error": e.to_string(),
                    });
                    write_json_line(&payload)?;
                }
            }
            Err(CliError::User(format!("invalid config: {e}")))
        }
    }
}

// ──────────────────── activity log ────────────────────

struct ActivityLog {
    handle: ActivityLoggerHandle,
    join: JoinHandle<()>,
}

impl ActivityLog {
    fn start(config: &Config) -> Result<Option<Self>, CliError> {
        let Some(jsonl) = JsonlConfig::from_runtime(&config.runtime) else {
            return Ok(None);
        };
        let (handle, join) = spawn_logger(jsonl, config.runtime.event_channel_capacity)
            .map_err(|e| CliError::Runtime(e.to_string()))?;
        Ok(Some(Self { handle, join }))
    }

    fn finish(self) -> Result<(), CliError> {
        self.handle.shutdown();
        self.join
            .join()
            .map_err(|_| CliError::Internal("activity logger thread panicked".to_string()))
    }
}

fn build_loop(
    config: &Config,
    t0: Instant,
    log: Option<&ActivityLog>,
) -> Result<FeedbackLoop, CliError> {
    let feedback =
        FeedbackLoop::new(config, t0).map_err(|e| CliError::User(format!("invalid config: {e}")))?;
    Ok(match log {
        Some(log) => feedback.with_activity_logger(log.handle.clone()),
        None => feedback,
    })
}

// ──────────────────── replay ────────────────────

#[derive(Debug, Clone, PartialEq, Deserialize)]
struct ReplayRecord {
    offset_ms: u64,
    latency_ms: f64,
    #[serde(default = "default_success")]
    success: bool,
    #[serde(default)]
    endpoint: Option<String>,
}

const fn default_success() -> bool {
    true
}

fn parse_replay(raw: &str, path: &Path) -> Result<Vec<ReplayRecord>, CliError> {
    raw.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(idx, line)| {
            serde_json::from_str::<ReplayRecord>(line).map_err(|e| {
                CliError::User(format!("{}:{}: malformed outcome: {e}", path.display(), idx + 1))
            })
        })
        .collect()
}

fn run_replay(cli: &Cli, args: &ReplayArgs) -> Result<(), CliError> {
    let config = load_config(cli)?;
    let raw = fs::read_to_string(&args.file).map_err(|e| {
        CliError::User(format!("cannot read replay file {}: {e}", args.file.display()))
    })?;
    let records = parse_replay(&raw, &args.file)?;
    let tick_ms = args.tick_ms.unwrap_or(config.runtime.tick_interval_ms);
    if tick_ms == 0 {
        return Err(CliError::User("--tick-ms must be positive".to_string()));
    }

    let mode = output_mode(cli);
    let log = ActivityLog::start(&config)?;
    let t0 = Instant::now();
    let feedback = build_loop(&config, t0, log.as_ref())?;

    let mut next_tick = tick_ms;
    let last_offset = records.iter().map(|r| r.offset_ms).max().unwrap_or(0);
    for record in records {
        while record.offset_ms >= next_tick {
            emit_tick(mode, &feedback.tick(t0 + Duration::from_millis(next_tick)))?;
            next_tick += tick_ms;
        }
        let mut outcome = RequestOutcome::new(
            t0 + Duration::from_millis(record.offset_ms),
            record.latency_ms,
            record.success,
        );
        outcome.endpoint = record.endpoint;
        feedback.record_outcome(outcome);
    }
    // One closing tick covering the tail of the recording.
    while next_tick <= last_offset + tick_ms {
        emit_tick(mode, &feedback.tick(t0 + Duration::from_millis(next_tick)))?;
        next_tick += tick_ms;
    }

    let end = t0 + Duration::from_millis(next_tick - tick_ms);
    feedback.finish("replay complete", end);
    emit_summary(mode, "replay", &feedback.summary(end))?;
    if let Some(log) = log {
        log.finish()?;
    }
    Ok(())
}

// ──────────────────── simulate ────────────────────

/// Queueing-style synthetic service: latency climbs steeply as concurrency
/// approaches capacity and errors appear past it.
#[derive(Debug)]
struct ServiceModel {
    capacity: f64,
    base_latency_ms: f64,
    rng: StdRng,
}

impl ServiceModel {
    const MAX_REQUESTS_PER_SECOND: usize = 2_000;

    fn new(capacity: u32, seed: u64) -> Self {
        Self {
            capacity: f64::from(capacity.max(1)),
            base_latency_ms: 40.0,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    fn mean_latency_ms(&self, concurrency: u32) -> f64 {
        let utilization = f64::from(concurrency) / self.capacity;
        self.base_latency_ms / (1.0 - utilization).max(0.05)
    }

    fn error_probability(&self, concurrency: u32) -> f64 {
        let utilization = f64::from(concurrency) / self.capacity;
        if utilization > 1.0 {
            ((utilization - 1.0) * 0.2).min(0.5)
        } else {
            0.001
        }
    }

    /// Outcomes completed during one simulated second: (offset within the
    /// second in ms, latency ms, success).
    fn second(&mut self, concurrency: u32) -> Vec<(u64, f64, bool)> {
        let mean = self.mean_latency_ms(concurrency);
        let errors = self.error_probability(concurrency);
        let n = ((f64::from(concurrency) * 1000.0 / mean).round() as usize)
            .clamp(1, Self::MAX_REQUESTS_PER_SECOND);
        (0..n)
            .map(|i| {
                let jitter = self.rng.random_range(0.8..1.2);
                let success = self.rng.random::<f64>() >= errors;
                ((i * 1000 / n) as u64, mean * jitter, success)
            })
            .collect()
    }
}

fn run_simulate(cli: &Cli, args: &SimulateArgs) -> Result<(), CliError> {
    if args.seconds == 0 || args.capacity == 0 {
        return Err(CliError::User(
            "--seconds and --capacity must be positive".to_string(),
        ));
    }
    let config = load_config(cli)?;
    let mode = output_mode(cli);
    let log = ActivityLog::start(&config)?;
    let t0 = Instant::now();
    let feedback = build_loop(&config, t0, log.as_ref())?;
    let mut model = ServiceModel::new(args.capacity, args.seed);
    let mut concurrency = config.controller.initial_concurrency;

    for sec in 0..args.seconds {
        let base = Duration::from_secs(sec);
        for (offset, latency, success) in model.second(concurrency) {
            feedback.record(t0 + base + Duration::from_millis(offset), latency, success, None);
        }
        let result = feedback.tick(t0 + base + Duration::from_secs(1));
        if result.directive.changed() || !result.alerts.is_empty() {
            emit_tick(mode, &result)?;
        }
        concurrency = result.directive.target_concurrency;
    }

    let end = t0 + Duration::from_secs(args.seconds);
    feedback.finish("simulation complete", end);
    emit_summary(mode, "simulate", &feedback.summary(end))?;
    if let Some(log) = log {
        log.finish()?;
    }
    Ok(())
}

// ──────────────────── rendering ────────────────────

fn grade_colored(grade: Grade) -> ColoredString {
    let text = grade.to_string();
    let text = text.as_str();
    match grade {
        Grade::A => text.green().bold(),
        Grade::B => text.green(),
        Grade::C => text.yellow(),
        Grade::D => text.red().bold(),
    }
}

fn severity_colored(severity: Severity) -> ColoredString {
    match severity {
        Severity::Low => severity.label().normal(),
        Severity::Medium => severity.label().yellow(),
        Severity::High => severity.label().red(),
        Severity::Critical => severity.label().red().bold(),
    }
}

fn emit_tick(mode: OutputMode, result: &TickResult) -> Result<(), CliError> {
    match mode {
        OutputMode::Human => {
            let s = &result.stats;
            println!(
                "[{:>6.1}s] n={:<6} p95={:>8.1}ms tput={:>7.1}/s err={:>5.2}% grade={} ({:.1}) conc {}->{} {}",
                result.elapsed.as_secs_f64(),
                s.count,
                s.p95,
                s.throughput,
                s.error_rate,
                grade_colored(result.score.grade),
                result.score.overall,
                result.directive.previous_concurrency,
                result.directive.target_concurrency,
                result.directive.action.label().dimmed(),
            );
            for alert in &result.alerts {
                let marker = match alert.kind {
                    TransitionKind::Raised => "RAISED".red().bold(),
                    TransitionKind::Resolved => "RESOLVED".green(),
                };
                println!(
                    "          {marker} [{}] {}",
                    severity_colored(alert.severity),
                    alert.message()
                );
            }
        }
        OutputMode::Json => {
            let payload = json!({
                "tick": result.tick,
                "elapsed_secs": result.elapsed.as_secs_f64(),
                "stats": result.stats,
                "score": result.score,
                "alerts": result.alerts,
                "directive": result.directive,
                "anomalous_samples": result.anomalous_samples,
            });
            write_json_line(&payload)?;
        }
    }
    Ok(())
}

fn emit_summary(mode: OutputMode, command: &str, summary: &RunSummary) -> Result<(), CliError> {
    match mode {
        OutputMode::Human => {
            let s = &summary.stats;
            println!();
            println!("{}", format!("{command} summary").as_str().bold());
            println!("  ticks:        {} over {:.1}s", summary.ticks, summary.run_secs);
            println!(
                "  requests:     {} ({} failed, {:.2}%)",
                s.count, s.failures, s.error_rate
            );
            println!(
                "  latency ms:   mean {:.1}  p50 {:.1}  p90 {:.1}  p95 {:.1}  p99 {:.1}",
                s.mean, s.median, s.p90, s.p95, s.p99
            );
            println!("  throughput:   {:.1}/s", s.throughput);
            match summary.score {
                Some(score) => println!(
                    "  grade:        {} ({:.1})",
                    grade_colored(score.grade),
                    score.overall
                ),
                None => println!("  grade:        n/a"),
            }
            println!(
                "  trend:        p95 {:?}, throughput {:?}, errors {:?} => {}",
                summary.trend.p95.trend,
                summary.trend.throughput.trend,
                summary.trend.error_rate.trend,
                summary.trend.health.label()
            );
            for line in [summary.advice.p95, summary.advice.throughput, summary.advice.error_rate] {
                println!("                {line}");
            }
            println!(
                "  alerts:       {} raised, {} resolved, {} suppressed",
                summary.alerts.raised, summary.alerts.resolved, summary.alerts.suppressed
            );
            println!(
                "  concurrency:  {} ({} damped adjustments)",
                summary.control.current_concurrency, summary.control.damped_adjustments
            );
            if summary.anomalous_samples > 0 {
                println!(
                    "  {} {} anomalous latency samples",
                    "warning:".yellow(),
                    summary.anomalous_samples
                );
            }
            if summary.endpoints.len() > 1 {
                println!("  endpoints:");
                for (name, ep) in &summary.endpoints {
                    println!(
                        "    {name:<24} {:>8} req  {:>6.2}% err",
                        ep.requests,
                        ep.error_rate()
                    );
                }
            }
        }
        OutputMode::Json => {
            let payload = json!({
                "command": command,
                "summary": serde_json::to_value(summary)?,
            });
            write_json_line(&payload)?;
        }
    }
    Ok(())
}

fn write_json_line(payload: &Value) -> Result<(), CliError> {
    let mut stdout = io::stdout().lock();
    serde_json::to_writer(&mut stdout, payload)?;
    writeln!(stdout)?;
    Ok(())
}

fn output_mode(cli: &Cli) -> OutputMode {
    let env_mode = std::env::var("LOADGOV_OUTPUT_FORMAT").ok();
    resolve_output_mode(cli.json, env_mode.as_deref(), io::stdout().is_terminal())
}

fn resolve_output_mode(json_flag: bool, env_mode: Option<&str>, stdout_is_tty: bool) -> OutputMode {
    if json_flag {
        return OutputMode::Json;
    }

    let fallback = if stdout_is_tty {
        OutputMode::Human
    } else {
        OutputMode::Json
    };

    match env_mode
        .map(str::trim)
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("json") => OutputMode::Json,
        Some("human") => OutputMode::Human,
        _ => fallback,
    }
}
