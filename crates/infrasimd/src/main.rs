//! infrasimd — the infrasim host daemon.
//!
//! Loads a topology file into an emulation engine and drives it:
//! - `validate` builds every engine once and prints the resulting diff
//! - `run` executes a command script and prints each result as JSON
//! - `watch` advances simulated time on a wall-clock interval until Ctrl-C
//!
//! # Usage
//!
//! ```text
//! infrasimd run --topology stack.toml --script smoke.txt
//! infrasimd --log-format json watch --topology stack.json --interval-ms 500 --step-ms 5000
//! ```
//!
//! Results go to stdout, logs to stderr.

mod script;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use anyhow::{Context, bail};
use clap::{Parser, Subcommand, ValueEnum};
use infrasim_core::Topology;
use infrasim_emulator::{EmulationEngine, TopologyDiff};
use tokio::sync::{Mutex, watch};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "info,infrasim=debug";

#[derive(Parser)]
#[command(name = "infrasimd", about = "infrasim host daemon", version)]
struct Cli {
    /// Log output format.
    #[arg(long, value_enum, global = true, default_value = "text")]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Build every engine for a topology and print what was created.
    Validate {
        /// Topology file (.json or .toml).
        #[arg(long)]
        topology: PathBuf,
    },
    /// Execute a command script against a topology.
    Run {
        /// Topology file (.json or .toml).
        #[arg(long)]
        topology: PathBuf,

        /// Script file, one step per line.
        #[arg(long)]
        script: PathBuf,

        /// Exit with an error if any command failed.
        #[arg(long)]
        strict: bool,
    },
    /// Advance simulated time continuously and log metrics.
    Watch {
        /// Topology file (.json or .toml). Reloaded when it changes.
        #[arg(long)]
        topology: PathBuf,

        /// Wall-clock milliseconds between steps.
        #[arg(long, default_value = "1000")]
        interval_ms: u64,

        /// Simulated milliseconds per step.
        #[arg(long, default_value = "1000")]
        step_ms: u64,

        /// Log metrics every N steps (0 disables).
        #[arg(long, default_value = "10")]
        metrics_every: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    match cli.command {
        Command::Validate { topology } => validate(&topology),
        Command::Run {
            topology,
            script: script_path,
            strict,
        } => run(&topology, &script_path, strict),
        Command::Watch {
            topology,
            interval_ms,
            step_ms,
            metrics_every,
        } => run_watch(topology, interval_ms, step_ms, metrics_every).await,
    }
}

fn init_tracing(format: LogFormat) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    match format {
        LogFormat::Text => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init(),
    }
}

fn load(path: &Path) -> anyhow::Result<(EmulationEngine, TopologyDiff)> {
    let topology = Topology::from_path(path)
        .with_context(|| format!("failed to load topology {}", path.display()))?;
    let mut engine = EmulationEngine::new();
    let diff = engine.upsert_topology(topology)?;
    for failed in &diff.failed {
        warn!(component = %failed.id, reason = %failed.reason, "node rejected");
    }
    info!(path = %path.display(), engines = engine.len(), "topology loaded");
    Ok((engine, diff))
}

fn validate(topology: &Path) -> anyhow::Result<()> {
    let (_, diff) = load(topology)?;
    println!("{}", serde_json::to_string_pretty(&diff)?);
    if !diff.failed.is_empty() {
        bail!("{} node(s) rejected", diff.failed.len());
    }
    Ok(())
}

fn run(topology: &Path, script_path: &Path, strict: bool) -> anyhow::Result<()> {
    let source = std::fs::read_to_string(script_path)
        .with_context(|| format!("failed to read script {}", script_path.display()))?;
    let lines = script::parse_script(&source)?;
    let (mut engine, _) = load(topology)?;

    let summary = script::run_script(&mut engine, &lines, |output| {
        println!("{}", serde_json::to_string(output)?);
        Ok(())
    })?;
    info!(
        commands = summary.commands,
        failures = summary.failures,
        now_ms = engine.clock().now_ms(),
        "script finished"
    );

    if strict && summary.failures > 0 {
        bail!("{} of {} commands failed", summary.failures, summary.commands);
    }
    Ok(())
}

async fn run_watch(
    topology: PathBuf,
    interval_ms: u64,
    step_ms: u64,
    metrics_every: u64,
) -> anyhow::Result<()> {
    let (engine, _) = load(&topology)?;
    let engine = Arc::new(Mutex::new(engine));
    info!(interval_ms, step_ms, "watch started");

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

    // ── Clock driver ───────────────────────────────────────────

    let driver = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_millis(interval_ms.max(1)));
            let mut last_modified = modified_at(&topology);
            let mut steps: u64 = 0;
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let mut engine = engine.lock().await;

                        let modified = modified_at(&topology);
                        if modified != last_modified {
                            last_modified = modified;
                            reload(&mut engine, &topology);
                        }

                        engine.advance_ms(step_ms);
                        steps += 1;
                        if metrics_every > 0 && steps % metrics_every == 0 {
                            log_metrics(&engine);
                        }
                    }
                    _ = shutdown_rx.changed() => break,
                }
            }
            steps
        })
    };

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    let _ = shutdown_tx.send(true);

    let steps = driver.await?;
    let engine = engine.lock().await;
    log_metrics(&engine);
    info!(steps, now_ms = engine.clock().now_ms(), "watch stopped");
    Ok(())
}

fn modified_at(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

/// Re-apply the topology file. A file that no longer loads leaves the
/// running engines untouched.
fn reload(engine: &mut EmulationEngine, path: &Path) {
    let topology = match Topology::from_path(path) {
        Ok(topology) => topology,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "topology reload skipped");
            return;
        }
    };
    match engine.upsert_topology(topology) {
        Ok(diff) => {
            for failed in &diff.failed {
                warn!(component = %failed.id, reason = %failed.reason, "node rejected");
            }
        }
        Err(e) => warn!(path = %path.display(), error = %e, "topology reload rejected"),
    }
}

fn log_metrics(engine: &EmulationEngine) {
    for component in engine.aggregate_metrics() {
        let s = &component.snapshot;
        info!(
            component = %component.component_id,
            kind = %component.kind,
            ops = s.total_ops,
            throughput = s.throughput,
            p99_ms = s.latency_p99_ms,
            error_rate = s.error_rate,
            "metrics"
        );
    }
}
