//! Scheduling pass orchestration
//!
//! A pass loads a topology snapshot of every catalog endpoint, claims a batch
//! of queued requests destined for the worker's endpoint set, builds paths
//! and job parameters for the batch on the blocking pool and finally applies
//! the retry policy to every request that could not be scheduled.
//!
//! The worker's endpoint set only shards claims. Sources and staging buffers
//! may live on any endpoint in the snapshot.
//!
//! Catalog round-trips (topology load, claim) are retried here with backoff;
//! path building and metadata assembly never touch the catalog.

use conveyor_core_jobparams::{JobParamsBuilder, MetadataPipeline, PluginRegistry};
use conveyor_core_pathfinder::{PathBuilder, PathConfig};
use conveyor_core_requests::{
    claim_and_match, Catalog, MatchError, MatchedRequest, Request, RequestId,
};
use conveyor_core_topology::{RseId, Topology, TopologyError};
use rayon::prelude::*;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use crate::config::ConveyorConfig;
use crate::error::{ConveyorError, Result};
use crate::executor::offload_compute;
use crate::report::{Disposition, OutcomeKind, PassReport, PassStatsBuilder, RequestOutcome};
use crate::retry::{with_backoff, BackoffPolicy};

/// Cooperative cancellation shared between a pass, the daemon and signal handlers
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Resolves once [`cancel`](Self::cancel) has been called
    pub async fn cancelled(&self) {
        loop {
            let notified = self.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

/// Runs scheduling passes for one endpoint set
pub struct Scheduler {
    catalog: Arc<dyn Catalog>,
    rses: Vec<RseId>,
    path_config: PathConfig,
    jobs: Arc<JobParamsBuilder>,
    claim_batch_size: usize,
    max_attempts: u32,
    backoff: BackoffPolicy,
}

impl Scheduler {
    /// Build a scheduler from configuration
    ///
    /// Every configured plugin name is resolved here, so an unknown plugin
    /// fails at startup rather than mid-pass.
    pub fn from_config(
        catalog: Arc<dyn Catalog>,
        config: &ConveyorConfig,
        registry: &PluginRegistry,
    ) -> Result<Self> {
        config.validate()?;
        if config.scheduler.rses.is_empty() {
            return Err(ConveyorError::Config(
                "No RSEs configured for this scheduler".to_string(),
            ));
        }

        let pipeline = MetadataPipeline::new(
            registry,
            &config.transfers.plugin_names,
            &config.plugin_settings(),
            config.transfers.metadata_byte_limit,
        )?;

        Ok(Self {
            catalog,
            rses: config.scheduler.rses.clone(),
            path_config: config.paths.clone(),
            jobs: Arc::new(JobParamsBuilder::new(pipeline, config.job_defaults())),
            claim_batch_size: config.transfers.claim_batch_size,
            max_attempts: config.retry.max_attempts,
            backoff: BackoffPolicy::from_config(&config.retry),
        })
    }

    pub fn rses(&self) -> &[RseId] {
        &self.rses
    }

    /// Run one scheduling pass
    ///
    /// Topology and claim failures abort the pass. Everything after the
    /// claim is reported per request; a claimed request always ends the pass
    /// either scheduled (still submitted), requeued, failed or released.
    pub async fn run_pass(&self, cancel: &CancelToken) -> Result<PassReport> {
        let mut stats = PassStatsBuilder::new();
        let source = self.catalog.topology_source();
        let store = self.catalog.request_store();
        let rses = self.rses.as_slice();

        let topology = with_backoff(
            &self.backoff,
            "topology_load",
            |err: &TopologyError| matches!(err, TopologyError::Source(_)),
            || Topology::load_all(source, rses),
        )
        .await?;

        let limit = self.claim_batch_size;
        let snapshot = &topology;
        let matched = with_backoff(
            &self.backoff,
            "claim",
            |_: &MatchError| true,
            || claim_and_match(store, snapshot, rses, limit),
        )
        .await?;

        stats.record_claimed(matched.len());
        if matched.is_empty() {
            debug!(rses = ?self.rses, "No queued requests");
            return Ok(PassReport {
                stats: stats.finish(),
                outcomes: Vec::new(),
            });
        }
        info!("🚚 Claimed {} request(s) for {} RSE(s)", matched.len(), rses.len());

        let claimed: Vec<RequestId> = matched.iter().map(|entry| entry.request.id).collect();
        let config = self.path_config.clone();
        let jobs = self.jobs.clone();
        let token = cancel.clone();
        let planned = offload_compute(move || {
            let builder = PathBuilder::new(&topology, config);
            matched
                .into_par_iter()
                .map(|entry| {
                    let result = if token.is_cancelled() {
                        OutcomeKind::Released
                    } else {
                        plan(&builder, &jobs, &entry)
                    };
                    (entry, result)
                })
                .collect::<Vec<_>>()
        })
        .await;

        // Nothing may stay claimed if the compute task died
        let planned = match planned {
            Ok(planned) => planned,
            Err(err) => {
                error!("❌ Path building failed: {}", err);
                for id in claimed {
                    if let Err(release_err) = store.release(id, None).await {
                        warn!(request_id = id, error = %release_err, "Failed to release request");
                    }
                }
                return Err(err);
            }
        };

        let mut outcomes = Vec::with_capacity(planned.len());
        for (entry, result) in planned {
            let disposition = self.settle(&entry.request, &result).await;
            let outcome = RequestOutcome {
                request_id: entry.request.id,
                disposition,
                result,
            };
            stats.record(&outcome);
            outcomes.push(outcome);
        }

        let stats = stats.finish();
        info!("📊 {}", stats.summary());
        Ok(PassReport { stats, outcomes })
    }

    /// Apply the retry policy to one processed request
    async fn settle(&self, request: &Request, result: &OutcomeKind) -> Disposition {
        let store = self.catalog.request_store();

        let error = match result {
            OutcomeKind::Scheduled { .. } => return Disposition::Submitted,
            OutcomeKind::Released => {
                let applied = store.release(request.id, None).await;
                return transition_outcome(request, "release", applied, Disposition::Released);
            }
            OutcomeKind::NoRoute { reason } => reason.to_string(),
            OutcomeKind::MetadataError { error } => error.clone(),
        };

        if request.attempts + 1 < self.max_attempts {
            debug!(
                request_id = request.id,
                attempt = request.attempts + 1,
                max_attempts = self.max_attempts,
                error = %error,
                "Requeueing request"
            );
            let applied = store.release(request.id, Some(error)).await;
            transition_outcome(request, "requeue", applied, Disposition::Requeued)
        } else {
            warn!(
                request_id = request.id,
                attempts = request.attempts + 1,
                error = %error,
                "Request failed after final attempt"
            );
            let applied = store.mark_failed(request.id, error).await;
            transition_outcome(request, "fail", applied, Disposition::Failed)
        }
    }
}

/// Path and job parameters for one matched request
fn plan(builder: &PathBuilder<'_>, jobs: &JobParamsBuilder, entry: &MatchedRequest) -> OutcomeKind {
    match builder.build(entry) {
        Ok(path) => match jobs.build_path(&path) {
            Ok(jobs) => OutcomeKind::Scheduled { jobs },
            Err(err) => OutcomeKind::MetadataError {
                error: err.to_string(),
            },
        },
        Err(no_route) => {
            debug!(request_id = entry.request.id, reason = %no_route.reason, "No route");
            OutcomeKind::NoRoute {
                reason: no_route.reason,
            }
        }
    }
}

fn transition_outcome(
    request: &Request,
    action: &str,
    applied: anyhow::Result<bool>,
    disposition: Disposition,
) -> Disposition {
    match applied {
        Ok(true) => disposition,
        Ok(false) => {
            warn!(
                request_id = request.id,
                action,
                "Request was no longer submitted; state changed concurrently"
            );
            disposition
        }
        Err(err) => {
            error!(
                request_id = request.id,
                action,
                error = %err,
                "Failed to update request; it remains submitted"
            );
            Disposition::Submitted
        }
    }
}
