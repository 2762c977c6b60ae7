mod clock;
mod config;
mod data;
mod monitor;
mod poller;
mod sink;

use crate::clock::LocalClock;
use crate::config::{Cli, Config};
use crate::monitor::{GpuMonitor, NvmlMonitor};
use crate::poller::{Poller, RunSummary};
use crate::sink::TelemetryLog;
use anyhow::{Context, Result};
use clap::Parser;
use crossbeam_channel::{Receiver, Sender, bounded};
use log::{info, warn};
use std::future::Future;
use tokio::signal;

// Conventional status for termination by SIGINT
const FORCED_EXIT_CODE: i32 = 130;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Config::resolve(Cli::parse()).context("invalid configuration")?;
    info!(
        "logging GPU memory to {} every {:?} (on query error: {:?})",
        config.output.display(),
        config.interval,
        config.on_query_error
    );

    let (shutdown_tx, shutdown_rx) = bounded(1);
    tokio::spawn(async move {
        forward_shutdown(shutdown_tx, wait_for_shutdown).await;
        std::process::exit(FORCED_EXIT_CODE);
    });

    let summary = tokio::task::spawn_blocking(move || poll(&config, &shutdown_rx))
        .await
        .context("poller thread panicked")??;

    info!(
        "stopped after {} tick(s): {} row(s) written, {} tick(s) skipped",
        summary.ticks, summary.rows, summary.skipped
    );
    Ok(())
}

/// Runs the poller on the current (blocking) thread. NVML lives for exactly
/// the duration of this call.
fn poll(config: &Config, shutdown: &Receiver<()>) -> Result<RunSummary> {
    let monitor = NvmlMonitor::new().context("device query failed")?;
    match monitor.list_devices() {
        Ok(devices) => info!(
            "NVML initialized (driver {}), {} device(s) visible",
            monitor.driver_version().as_deref().unwrap_or("N/A"),
            devices.len()
        ),
        Err(err) => warn!("NVML initialized but device enumeration failed: {err}"),
    }

    let mut log = if config.resume {
        TelemetryLog::resume(&config.output)
    } else {
        TelemetryLog::create(&config.output)
    }
    .with_context(|| {
        format!(
            "failed to initialize telemetry log {}",
            config.output.display()
        )
    })?;

    let poller = Poller::new(monitor, LocalClock).with_policy(config.on_query_error);
    let summary = poller.run(&mut log, config.interval, shutdown, config.max_ticks)?;
    Ok(summary)
}

/// Passes the first signal to the poller, which stops after its current
/// tick. Returns on the second signal so the caller can exit even when a
/// tick is stuck in the driver.
async fn forward_shutdown<F, Fut>(shutdown: Sender<()>, mut next_signal: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::io::Result<()>>,
{
    if let Err(err) = next_signal().await {
        // Keep the sender alive; dropping it would stop the poller.
        warn!("failed to install signal handlers: {err}");
        std::future::pending::<()>().await;
    }
    info!("received shutdown signal, finishing current tick (signal again to exit now)");
    let _ = shutdown.send(());

    if let Err(err) = next_signal().await {
        warn!("failed to install signal handlers: {err}");
        std::future::pending::<()>().await;
    }
    warn!("received second shutdown signal, exiting");
}

async fn wait_for_shutdown() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;
        let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;
        tokio::select! {
            _ = sigterm.recv() => {},
            _ = sigint.recv() => {},
        }
        Ok(())
    }
    #[cfg(not(unix))]
    {
        signal::ctrl_c().await
    }
}
