//! Scheduler daemon
//!
//! Runs scheduling passes on a fixed interval until shut down. Transient pass
//! failures are logged and the next tick tries again with a fresh topology;
//! fatal ones (bad configuration, unknown endpoints) stop the loop.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use crate::error::Result;
use crate::report::PassReport;
use crate::scheduler::{CancelToken, Scheduler};

/// Callback receiving every completed pass report
pub type ReportSink = Arc<dyn Fn(&PassReport) + Send + Sync>;

pub struct Daemon {
    scheduler: Scheduler,
    interval: Duration,
    shutdown: CancelToken,
    sink: Option<ReportSink>,
}

impl Daemon {
    pub fn new(scheduler: Scheduler, interval: Duration) -> Self {
        Self {
            scheduler,
            interval,
            shutdown: CancelToken::new(),
            sink: None,
        }
    }

    pub fn with_report_sink(mut self, sink: ReportSink) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Token that stops the loop; also cancels the pass in flight
    pub fn shutdown_token(&self) -> CancelToken {
        self.shutdown.clone()
    }

    /// Main loop; returns the number of completed passes
    pub async fn run(self) -> Result<u64> {
        info!(
            "🛰️  Scheduler active | RSEs: {} | Interval: {}s",
            self.scheduler
                .rses()
                .iter()
                .map(|rse| rse.as_str())
                .collect::<Vec<_>>()
                .join(", "),
            self.interval.as_secs_f64()
        );

        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut passes = 0u64;

        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = self.shutdown.cancelled() => break,
            }

            match self.scheduler.run_pass(&self.shutdown).await {
                Ok(report) => {
                    passes += 1;
                    if let Some(sink) = &self.sink {
                        sink(&report);
                    }
                }
                Err(err) if err.is_fatal() => {
                    error!(category = %err.category(), "🚨 Scheduler stopping: {}", err);
                    return Err(err);
                }
                Err(err) => {
                    warn!(category = %err.category(), "⚠️  Scheduling pass failed: {}", err);
                }
            }

            if self.shutdown.is_cancelled() {
                break;
            }
        }

        info!("🛑 Scheduler stopped after {} pass(es)", passes);
        Ok(passes)
    }
}
