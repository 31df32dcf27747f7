//! Scheduling pass reports
//!
//! One [`RequestOutcome`] per claimed request plus aggregate [`PassStats`].
//! Reports serialize to JSON for the CLI and for log shipping.

use chrono::{DateTime, Utc};
use conveyor_core_jobparams::JobParams;
use conveyor_core_pathfinder::NoRouteReason;
use conveyor_core_requests::RequestId;
use serde::Serialize;
use std::time::Instant;

/// What happened to one claimed request during a pass
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum OutcomeKind {
    /// A path was built; one job per hop
    Scheduled { jobs: Vec<JobParams> },
    NoRoute { reason: NoRouteReason },
    /// A hop's metadata could not be attached
    MetadataError { error: String },
    /// Skipped because the pass was cancelled
    Released,
}

/// Request state after the pass applied its retry policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    /// Left claimed for the submitter
    Submitted,
    /// Returned to the queue with an attempt counted
    Requeued,
    /// Out of attempts
    Failed,
    /// Returned to the queue without counting an attempt
    Released,
}

#[derive(Debug, Clone, Serialize)]
pub struct RequestOutcome {
    pub request_id: RequestId,
    pub disposition: Disposition,
    #[serde(flatten)]
    pub result: OutcomeKind,
}

impl RequestOutcome {
    pub fn is_scheduled(&self) -> bool {
        matches!(self.result, OutcomeKind::Scheduled { .. })
    }
}

/// Aggregate counters for one pass
#[derive(Debug, Clone, Serialize)]
pub struct PassStats {
    pub started_at: DateTime<Utc>,
    pub claimed: usize,
    pub scheduled: usize,
    /// Jobs across all scheduled requests (one per hop)
    pub jobs: usize,
    pub multihop: usize,
    pub no_route: usize,
    pub metadata_errors: usize,
    pub requeued: usize,
    pub failed: usize,
    pub released: usize,
    pub duration_ms: u64,
}

impl PassStats {
    /// Requests that could not be scheduled this pass
    pub fn unscheduled(&self) -> usize {
        self.no_route + self.metadata_errors
    }

    /// Format a human-readable summary
    pub fn summary(&self) -> String {
        format!(
            "Pass: {} claimed | {} scheduled ({} jobs, {} multi-hop) | {} no-route | {} metadata errors | {} requeued | {} failed | {} released | {}ms",
            self.claimed,
            self.scheduled,
            self.jobs,
            self.multihop,
            self.no_route,
            self.metadata_errors,
            self.requeued,
            self.failed,
            self.released,
            self.duration_ms
        )
    }
}

/// Accumulates counters while outcomes are applied
#[derive(Debug, Clone)]
pub struct PassStatsBuilder {
    stats: PassStats,
    start_time: Instant,
}

impl PassStatsBuilder {
    pub fn new() -> Self {
        Self {
            stats: PassStats {
                started_at: Utc::now(),
                claimed: 0,
                scheduled: 0,
                jobs: 0,
                multihop: 0,
                no_route: 0,
                metadata_errors: 0,
                requeued: 0,
                failed: 0,
                released: 0,
                duration_ms: 0,
            },
            start_time: Instant::now(),
        }
    }

    pub fn record_claimed(&mut self, count: usize) {
        self.stats.claimed += count;
    }

    pub fn record(&mut self, outcome: &RequestOutcome) {
        match &outcome.result {
            OutcomeKind::Scheduled { jobs } => {
                self.stats.scheduled += 1;
                self.stats.jobs += jobs.len();
                if jobs.len() > 1 {
                    self.stats.multihop += 1;
                }
            }
            OutcomeKind::NoRoute { .. } => self.stats.no_route += 1,
            OutcomeKind::MetadataError { .. } => self.stats.metadata_errors += 1,
            OutcomeKind::Released => {}
        }

        match outcome.disposition {
            Disposition::Submitted => {}
            Disposition::Requeued => self.stats.requeued += 1,
            Disposition::Failed => self.stats.failed += 1,
            Disposition::Released => self.stats.released += 1,
        }
    }

    pub fn finish(mut self) -> PassStats {
        self.stats.duration_ms = self.start_time.elapsed().as_millis() as u64;
        self.stats
    }
}

impl Default for PassStatsBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Result of one scheduling pass
#[derive(Debug, Clone, Serialize)]
pub struct PassReport {
    pub stats: PassStats,
    /// In claim order
    pub outcomes: Vec<RequestOutcome>,
}

impl PassReport {
    pub fn empty() -> Self {
        Self {
            stats: PassStatsBuilder::new().finish(),
            outcomes: Vec::new(),
        }
    }

    pub fn outcome(&self, request_id: RequestId) -> Option<&RequestOutcome> {
        self.outcomes.iter().find(|o| o.request_id == request_id)
    }
}
