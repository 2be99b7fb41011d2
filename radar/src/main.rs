//! # radar - Main Entry Point
//!
//! Parses arguments, runs pre-flight checks, starts the sensor and consumes
//! events until SIGINT or SIGTERM.

use std::io;

use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info, warn};
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;

use radar::cli::Args;
use radar::domain::SensorError;
use radar::preflight::run_preflight_checks;
use radar::sensor::{AyaProbeLoader, Consumer, JsonLinesSink, MemlockLimiter, Pipeline, Sensor};

// Exit codes
const EXIT_SUCCESS: i32 = 0;
const EXIT_ERROR: i32 = 1;
const EXIT_NOPERM: i32 = 77;

fn main() {
    std::process::exit(match run() {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => {
            let code = exit_code_for(&e);
            eprintln!("error: {e:#}");
            code
        }
    });
}

fn exit_code_for(err: &anyhow::Error) -> i32 {
    match err.downcast_ref::<SensorError>() {
        Some(e) if e.is_permission_denied() => EXIT_NOPERM,
        _ => EXIT_ERROR,
    }
}

fn init_logging(level: &str) {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}

/// Resolve once SIGINT or SIGTERM arrives.
async fn shutdown_signal() -> io::Result<()> {
    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result,
        _ = terminate.recv() => Ok(()),
    }
}

#[tokio::main]
async fn run() -> Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level);

    let config = args.sensor_config()?;
    info!("radar v{}", env!("CARGO_PKG_VERSION"));
    info!("probe: {}", config.object_path.display());

    if args.skip_preflight {
        warn!("Skipping pre-flight checks");
    } else {
        run_preflight_checks(&config)?;
    }

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if let Err(e) = shutdown_signal().await {
            error!("Failed to listen for shutdown signals: {e}");
        }
        signal_cancel.cancel();
    });

    let sensor = Sensor::new(config, MemlockLimiter, AyaProbeLoader);
    let Pipeline { mut events, tasks, .. } = sensor.start(cancel)?;

    let mut consumer = Consumer::new();
    if args.json {
        consumer = consumer.with_sink(Box::new(JsonLinesSink::new(io::stdout())));
    }
    let handled = consumer.run(&mut events).await;

    let summary = tasks.join().await.context("Pipeline did not shut down cleanly")?;
    info!(
        "stopped: {handled} events handled ({} records read, {} decode errors, {} read errors)",
        summary.read_loop.records, summary.read_loop.decode_errors, summary.read_loop.read_errors
    );
    if !summary.shutdown.is_clean() {
        warn!("Some resources reported errors while being released; see log above");
    }

    Ok(())
}
