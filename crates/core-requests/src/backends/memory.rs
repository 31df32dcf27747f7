//! In-memory catalog
//!
//! Keeps everything behind a single mutex so that a claim is one
//! compare-and-swap over the request map. Used for tests and dry runs.

use crate::{
    Catalog, Did, NewRequest, ReplicaRecord, Request, RequestId, RequestState, RequestStats,
    RequestStore,
};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use conveyor_core_topology::{Distance, Rse, RseId, TopologySource};
use std::collections::{BTreeMap, HashSet};
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Default)]
struct State {
    rses: BTreeMap<RseId, Rse>,
    distances: BTreeMap<(RseId, RseId), u32>,
    replicas: BTreeMap<(Did, RseId), ReplicaRecord>,
    requests: BTreeMap<RequestId, Request>,
    next_id: RequestId,
}

/// Process-local catalog
#[derive(Debug, Default)]
pub struct MemoryCatalog {
    state: Mutex<State>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|_| anyhow!("memory catalog lock poisoned"))
    }

    /// Apply `f` to a submitted request; returns false if it is not submitted
    fn transition(&self, id: RequestId, f: impl FnOnce(&mut Request)) -> Result<bool> {
        let mut state = self.lock()?;
        match state.requests.get_mut(&id) {
            Some(request) if request.state == RequestState::Submitted => {
                f(request);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[async_trait]
impl TopologySource for MemoryCatalog {
    async fn list_rse_ids(&self) -> Result<Vec<RseId>> {
        Ok(self.lock()?.rses.keys().cloned().collect())
    }

    async fn fetch_rses(&self, ids: &[RseId]) -> Result<Vec<Rse>> {
        let state = self.lock()?;
        Ok(ids
            .iter()
            .collect::<std::collections::BTreeSet<_>>()
            .into_iter()
            .filter_map(|id| state.rses.get(id).cloned())
            .collect())
    }

    async fn fetch_distances(&self, ids: &[RseId]) -> Result<Vec<Distance>> {
        let wanted: HashSet<&RseId> = ids.iter().collect();
        let state = self.lock()?;
        Ok(state
            .distances
            .iter()
            .filter(|((src, dst), _)| wanted.contains(src) && wanted.contains(dst))
            .map(|((src, dst), cost)| Distance::new(src.clone(), dst.clone(), *cost))
            .collect())
    }
}

#[async_trait]
impl RequestStore for MemoryCatalog {
    async fn claim_queued(&self, dest_rses: &[RseId], limit: usize) -> Result<Vec<Request>> {
        let wanted: HashSet<&RseId> = dest_rses.iter().collect();
        let mut state = self.lock()?;

        let mut claimed = Vec::new();
        for request in state.requests.values_mut() {
            if claimed.len() >= limit {
                break;
            }
            if request.state == RequestState::Queued && wanted.contains(&request.dest_rse) {
                request.state = RequestState::Submitted;
                claimed.push(request.clone());
            }
        }

        Ok(claimed)
    }

    async fn list_replicas(&self, dids: &[Did]) -> Result<Vec<ReplicaRecord>> {
        let wanted: HashSet<&Did> = dids.iter().collect();
        let state = self.lock()?;

        let mut replicas: Vec<ReplicaRecord> = state
            .replicas
            .values()
            .filter(|replica| wanted.contains(&replica.did))
            .cloned()
            .collect();
        replicas.sort_by(|a, b| a.rse.cmp(&b.rse).then_with(|| a.did.cmp(&b.did)));
        Ok(replicas)
    }

    async fn release(&self, id: RequestId, error: Option<String>) -> Result<bool> {
        self.transition(id, |request| {
            request.state = RequestState::Queued;
            if let Some(error) = error {
                request.attempts += 1;
                request.last_error = Some(error);
            }
        })
    }

    async fn mark_done(&self, id: RequestId) -> Result<bool> {
        self.transition(id, |request| request.state = RequestState::Done)
    }

    async fn mark_failed(&self, id: RequestId, error: String) -> Result<bool> {
        self.transition(id, |request| {
            request.state = RequestState::Failed;
            request.last_error = Some(error);
        })
    }

    async fn get_request(&self, id: RequestId) -> Result<Option<Request>> {
        Ok(self.lock()?.requests.get(&id).cloned())
    }

    async fn stats(&self) -> Result<RequestStats> {
        let state = self.lock()?;
        let mut stats = RequestStats::default();
        for request in state.requests.values() {
            stats.total += 1;
            match request.state {
                RequestState::Queued => stats.queued += 1,
                RequestState::Submitted => stats.submitted += 1,
                RequestState::Done => stats.done += 1,
                RequestState::Failed => stats.failed += 1,
            }
        }
        Ok(stats)
    }
}

#[async_trait]
impl Catalog for MemoryCatalog {
    fn topology_source(&self) -> &dyn TopologySource {
        self
    }

    fn request_store(&self) -> &dyn RequestStore {
        self
    }

    async fn register_rse(&self, rse: &Rse) -> Result<()> {
        self.lock()?.rses.insert(rse.id.clone(), rse.clone());
        Ok(())
    }

    async fn set_distance(&self, distance: &Distance) -> Result<()> {
        self.lock()?
            .distances
            .insert((distance.src.clone(), distance.dst.clone()), distance.cost);
        Ok(())
    }

    async fn add_replica(&self, replica: &ReplicaRecord) -> Result<()> {
        self.lock()?
            .replicas
            .insert((replica.did.clone(), replica.rse.clone()), replica.clone());
        Ok(())
    }

    async fn queue_request(&self, request: &NewRequest) -> Result<RequestId> {
        let mut state = self.lock()?;
        state.next_id += 1;
        let id = state.next_id;
        state.requests.insert(
            id,
            Request {
                id,
                did: request.did.clone(),
                dest_rse: request.dest_rse.clone(),
                bytes: request.bytes,
                activity: request.activity.clone(),
                state: RequestState::Queued,
                attempts: 0,
                last_error: None,
            },
        );
        Ok(id)
    }
}
