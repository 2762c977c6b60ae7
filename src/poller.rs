use crate::clock::Clock;
use crate::data::Sample;
use crate::monitor::{GpuMonitor, MonitorError};
use crate::sink::TelemetryLog;
use crossbeam_channel::{Receiver, RecvTimeoutError};
use log::{debug, info, warn};
use serde::Deserialize;
use std::io::{self, Write};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PollError {
    #[error("device query failed: {0}")]
    Query(#[from] MonitorError),
    #[error("failed to write telemetry log {target}: {source}")]
    Write {
        target: String,
        #[source]
        source: io::Error,
    },
}

/// What to do with a tick whose device query failed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum QueryErrorPolicy {
    /// Log the failure, drop the tick, poll again after the interval.
    #[default]
    Skip,
    /// Stop polling and report the failure.
    Fail,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub ticks: u64,
    pub rows: u64,
    pub skipped: u64,
}

pub struct Poller<M, C> {
    monitor: M,
    clock: C,
    policy: QueryErrorPolicy,
}

impl<M: GpuMonitor, C: Clock> Poller<M, C> {
    pub fn new(monitor: M, clock: C) -> Self {
        Self {
            monitor,
            clock,
            policy: QueryErrorPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: QueryErrorPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Samples every visible device once. All samples share one timestamp.
    /// A failure on any device discards the whole tick.
    pub fn tick(&self) -> Result<Vec<Sample>, MonitorError> {
        let timestamp = self.clock.now();
        self.monitor
            .list_devices()?
            .into_iter()
            .map(|index| {
                self.monitor
                    .device_memory(index)
                    .map(|memory| Sample::new(timestamp, index, memory))
            })
            .collect()
    }

    /// Polls until `shutdown` fires (or its sender is dropped) or `max_ticks`
    /// ticks have run. The header is already in `log`.
    ///
    /// The wait between ticks is a plain `interval`; tick duration is not
    /// subtracted, so the schedule drifts.
    pub fn run<W: Write>(
        &self,
        log: &mut TelemetryLog<W>,
        interval: Duration,
        shutdown: &Receiver<()>,
        max_ticks: Option<u64>,
    ) -> Result<RunSummary, PollError> {
        let mut summary = RunSummary::default();

        loop {
            match self.tick() {
                Ok(samples) => {
                    for sample in samples.iter().filter(|s| s.is_anomalous()) {
                        debug!(
                            "device {} reports {:.2} MB used of {:.2} MB",
                            sample.device_id, sample.memory_used, sample.memory_total
                        );
                    }
                    log.append(&samples).map_err(|source| PollError::Write {
                        target: log.target().to_string(),
                        source,
                    })?;
                    debug!("tick {}: {} row(s)", summary.ticks + 1, samples.len());
                    summary.rows += samples.len() as u64;
                }
                Err(err) => match self.policy {
                    QueryErrorPolicy::Skip => {
                        warn!("skipping tick {}: {err}", summary.ticks + 1);
                        summary.skipped += 1;
                    }
                    QueryErrorPolicy::Fail => return Err(err.into()),
                },
            }
            summary.ticks += 1;

            if max_ticks.is_some_and(|max| summary.ticks >= max) {
                break;
            }
            match shutdown.recv_timeout(interval) {
                Err(RecvTimeoutError::Timeout) => {}
                Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                    info!("shutdown requested, stopping after {} tick(s)", summary.ticks);
                    break;
                }
            }
        }

        Ok(summary)
    }
}
