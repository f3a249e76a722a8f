//! Run-loop demo daemon.
//!
//! Wires one run loop to a blocking queue and a message bus:
//!
//! - a sampler entry publishes a counter and its wake delta to the bus as one
//!   transaction, and pushes the counter onto the queue
//! - a bus reader entry drains the bus at a quarter of the sampler rate
//! - a consumer thread blocks on the queue
//!
//! Runs until SIGINT/SIGTERM or `--duration`, then prints a report.

mod diagnostics;
mod signals;

use anyhow::{Context, Result};
use clap::Parser;
use rl_common::config::CoreConfig;
use rl_common::message::Message;
use rl_runtime::bus::Bus;
use rl_runtime::queue::SyncQueue;
use rl_runtime::run_loop::RunLoop;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::diagnostics::DiagnosticsState;
use crate::signals::{wait_for_shutdown, SignalHandler};

/// Bus label for the sample counter.
const LABEL_SAMPLE: u32 = 1;
/// Bus label for the sampler's wake delta in seconds.
const LABEL_DELTA: u32 = 2;

/// Daemon command-line arguments.
#[derive(Parser, Debug)]
#[command(
    name = "rl-daemon",
    about = "Run-loop demo daemon - periodic producers feeding a queue and a bus",
    version,
    long_about = None
)]
struct Args {
    /// Path to a configuration file (TOML).
    #[arg(long, short = 'c', value_name = "FILE")]
    config: Option<PathBuf>,

    /// Stop after this long (e.g. "5s"); runs until signalled if omitted.
    #[arg(long, short = 'd', value_parser = humantime::parse_duration)]
    duration: Option<Duration>,

    /// Sampler frequency in Hz.
    #[arg(long, default_value = "100")]
    rate: f64,

    /// Print the final report as JSON on stdout.
    #[arg(long)]
    json: bool,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, short = 'l', default_value = "info")]
    log_level: String,
}

fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args.log_level);

    info!(version = env!("CARGO_PKG_VERSION"), "Starting run-loop daemon");

    let config = load_config(&args)?;
    config.validate().context("Invalid configuration")?;
    if !(args.rate.is_finite() && args.rate > 0.0) {
        anyhow::bail!("--rate must be a positive number, got {}", args.rate);
    }

    info!(
        run_loop = %config.run_loop.name,
        max_wait = ?config.run_loop.max_wait,
        catch_up = ?config.run_loop.catch_up,
        "Configuration loaded"
    );

    let signal_handler = SignalHandler::new();
    run_daemon(&config, &args, &signal_handler)
}

/// Initialize logging with the specified log level.
fn init_logging(level: &str) {
    let filter = format!("rl_daemon={level},rl_runtime={level},rl_common={level}");

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&filter)),
        )
        .with_target(true)
        .with_thread_ids(true)
        .init();
}

/// Load configuration from file or use defaults.
///
/// Resolution priority (first existing file wins):
/// 1. Command-line `--config` argument
/// 2. `RL_CONFIG_PATH` environment variable
/// 3. `config/default.toml` (local development)
/// 4. Built-in defaults
fn load_config(args: &Args) -> Result<CoreConfig> {
    if let Some(config_path) = &args.config {
        info!(?config_path, "Loading config from command-line argument");
        return CoreConfig::from_file(config_path)
            .with_context(|| format!("Failed to load config from {config_path:?}"));
    }

    if let Ok(env_path) = std::env::var("RL_CONFIG_PATH") {
        let config_path = PathBuf::from(&env_path);
        if config_path.exists() {
            info!(?config_path, "Loading config from RL_CONFIG_PATH");
            return CoreConfig::from_file(&config_path).with_context(|| {
                format!("Failed to load config from RL_CONFIG_PATH={env_path:?}")
            });
        }
        warn!(
            path = %env_path,
            "RL_CONFIG_PATH set but file does not exist, checking other locations"
        );
    }

    let local_path = PathBuf::from("config/default.toml");
    if local_path.exists() {
        info!(?local_path, "Loading config from local path");
        return CoreConfig::from_file(&local_path)
            .with_context(|| format!("Failed to load config from {local_path:?}"));
    }

    info!("No config file found, using built-in defaults");
    Ok(CoreConfig::default())
}

/// Build the pipeline, run until shutdown, and report.
fn run_daemon(config: &CoreConfig, args: &Args, signal_handler: &SignalHandler) -> Result<()> {
    let diag = Arc::new(DiagnosticsState::new());
    let queue = Arc::new(SyncQueue::<Message>::with_capacity(
        config.messaging.queue_capacity,
    ));
    let bus = Arc::new(Bus::with_capacity(config.messaging.bus_capacity));

    let run_loop = RunLoop::from_config(config).context("Failed to start run loop")?;

    let sampler = {
        let queue = Arc::clone(&queue);
        let bus = Arc::clone(&bus);
        let diag = Arc::clone(&diag);
        let mut sequence = 0u64;
        run_loop.register(args.rate, move |dt| {
            let queued = queue.push(Message::u64(LABEL_SAMPLE, sequence));
            diag.record_sample(queued);

            let mut tx = bus.lock();
            tx.send(Message::u64(LABEL_SAMPLE, sequence));
            tx.send(Message::f64(LABEL_DELTA, dt));
            sequence += 1;
        })
    };

    let reader = {
        let bus = Arc::clone(&bus);
        let diag = Arc::clone(&diag);
        run_loop.register(args.rate / 4.0, move |_| {
            let mut tx = bus.lock();
            let mut received = 0;
            for msg in tx.drain() {
                if msg.label == LABEL_DELTA {
                    if let Some(dt) = msg.as_f64() {
                        debug!(delta_ms = dt * 1e3, "Sampler delta");
                    }
                }
                received += 1;
            }
            diag.record_bus_received(received);
        })
    };

    let consumer = {
        let queue = Arc::clone(&queue);
        let diag = Arc::clone(&diag);
        let handler = signal_handler.clone();
        thread::Builder::new()
            .name("rl-consumer".into())
            .spawn(move || {
                while !handler.shutdown_requested() {
                    if queue.wait_timeout(Duration::from_millis(100)).is_some() {
                        diag.record_consumed();
                    }
                }
            })
            .context("Failed to spawn consumer thread")?
    };

    info!(rate_hz = args.rate, "Pipeline running");

    if !wait_for_shutdown(signal_handler, args.duration) {
        info!("Run duration elapsed");
        signal_handler.request_shutdown();
    }

    info!("Shutting down...");

    run_loop.unregister(sampler);
    run_loop.unregister(reader);
    if let Err(e) = run_loop.stop() {
        warn!("Run loop stop failed: {e}");
    }
    if consumer.join().is_err() {
        warn!("Consumer thread panicked");
    }

    let snapshot = diag.snapshot(run_loop.state(), bus.dropped(), run_loop.metrics());
    if args.json {
        println!("{}", snapshot.to_json().context("Failed to render report")?);
    }
    info!(
        samples = snapshot.samples,
        consumed = snapshot.consumed,
        queue_rejected = snapshot.queue_rejected,
        bus_received = snapshot.bus_received,
        bus_dropped = snapshot.bus_dropped,
        wakes = snapshot.tick.total_wakes,
        late_wakes = snapshot.tick.late_wakes,
        tick_p99_us = ?snapshot.tick.p99_us,
        signals = signal_handler.state().signal_count(),
        uptime_ms = snapshot.uptime_ms,
        final_state = %snapshot.state,
        "Daemon shutdown complete"
    );

    Ok(())
}
