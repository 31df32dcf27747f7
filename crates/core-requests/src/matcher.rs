//! Request-source matching
//!
//! Claims a batch of queued requests and pairs each one with the replicas
//! that could serve it, ranked by the direct cost to the request's
//! destination in the caller's topology snapshot.

use crate::{Did, ReplicaRecord, Request, RequestStore, SourceReplica};
use conveyor_core_topology::{RseId, Topology};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

/// Errors raised while claiming or matching
#[derive(Debug, Error)]
pub enum MatchError {
    /// The claim round-trip failed; nothing was claimed
    #[error("Failed to claim queued requests: {0}")]
    Claim(#[source] anyhow::Error),

    /// Replica lookup failed; the claimed requests were released
    #[error("Failed to list source replicas: {0}")]
    Replicas(#[source] anyhow::Error),
}

/// One claimed request with its ranked candidate sources
///
/// An empty `sources` list means no viable source exists right now.
#[derive(Debug, Clone)]
pub struct MatchedRequest {
    pub request: Arc<Request>,
    pub sources: Vec<SourceReplica>,
}

/// Claim up to `limit` queued requests for `rse_ids` and attach their sources
///
/// The claim is delegated to [`RequestStore::claim_queued`], which performs
/// the only cross-worker coordination of a scheduling pass. Results keep the
/// claim order (ascending request id). Sources are ordered by ascending cost;
/// equal costs keep the order returned by the store.
pub async fn claim_and_match(
    store: &dyn RequestStore,
    topology: &Topology,
    rse_ids: &[RseId],
    limit: usize,
) -> Result<Vec<MatchedRequest>, MatchError> {
    if limit == 0 || rse_ids.is_empty() {
        return Ok(Vec::new());
    }

    let claimed = store
        .claim_queued(rse_ids, limit)
        .await
        .map_err(MatchError::Claim)?;
    if claimed.is_empty() {
        return Ok(Vec::new());
    }

    let dids: Vec<Did> = claimed.iter().map(|request| request.did.clone()).collect();
    let replicas = match store.list_replicas(&dids).await {
        Ok(replicas) => replicas,
        Err(err) => {
            // Never leave requests claimed with nobody working on them
            for request in &claimed {
                if let Err(release_err) = store.release(request.id, None).await {
                    warn!(
                        request_id = request.id,
                        error = %release_err,
                        "Failed to release request after replica lookup failure"
                    );
                }
            }
            return Err(MatchError::Replicas(err));
        }
    };

    let mut by_did: HashMap<&Did, Vec<&ReplicaRecord>> = HashMap::new();
    for replica in &replicas {
        by_did.entry(&replica.did).or_default().push(replica);
    }

    let matched: Vec<MatchedRequest> = claimed
        .into_iter()
        .map(|request| {
            let mut sources: Vec<SourceReplica> = by_did
                .get(&request.did)
                .map(|candidates| {
                    candidates
                        .iter()
                        .filter(|replica| replica.available && replica.rse != request.dest_rse)
                        .filter(|replica| {
                            topology
                                .rse(&replica.rse)
                                .is_some_and(|rse| rse.availability_read)
                        })
                        .map(|replica| SourceReplica {
                            request_id: request.id,
                            rse: replica.rse.clone(),
                            available: replica.available,
                            cost: topology.cost(&replica.rse, &request.dest_rse),
                        })
                        .collect()
                })
                .unwrap_or_default();

            // Stable: equal costs keep store order
            sources.sort_by_key(|source| source.cost);

            debug!(
                request_id = request.id,
                did = %request.did,
                sources = sources.len(),
                "Matched request"
            );

            MatchedRequest {
                request: Arc::new(request),
                sources,
            }
        })
        .collect();

    Ok(matched)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Catalog, MemoryCatalog, NewRequest, RequestState, RequestStats};
    use async_trait::async_trait;
    use conveyor_core_topology::{Cost, Distance, Rse, RseKind};

    fn topology() -> Topology {
        Topology::from_parts(
            vec![
                Rse::new("DST", RseKind::Disk),
                Rse::new("NEAR", RseKind::Disk),
                Rse::new("FAR", RseKind::Disk),
                Rse::new("ISLAND", RseKind::Disk),
                Rse::new("OFFLINE", RseKind::Disk).with_availability(false, true),
            ],
            vec![
                Distance::new("NEAR", "DST", 1),
                Distance::new("FAR", "DST", 5),
                Distance::new("OFFLINE", "DST", 1),
            ],
        )
    }

    async fn seeded() -> (MemoryCatalog, i64) {
        let catalog = MemoryCatalog::new();
        let did = Did::new("data13", "f");
        let id = catalog
            .queue_request(&NewRequest::new(did.clone(), "DST", 10, "default"))
            .await
            .unwrap();
        for rse in ["FAR", "ISLAND", "NEAR", "OFFLINE", "DST"] {
            catalog
                .add_replica(&ReplicaRecord::new(did.clone(), rse, 10))
                .await
                .unwrap();
        }
        catalog
            .add_replica(&ReplicaRecord::new(did, "GONE", 10).unavailable())
            .await
            .unwrap();
        (catalog, id)
    }

    #[tokio::test]
    async fn test_sources_ranked_by_cost() {
        let (catalog, id) = seeded().await;
        let matched = claim_and_match(&catalog, &topology(), &["DST".into()], 10)
            .await
            .unwrap();

        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].request.id, id);
        assert_eq!(matched[0].request.state, RequestState::Submitted);

        let ranked: Vec<(String, Cost)> = matched[0]
            .sources
            .iter()
            .map(|s| (s.rse.to_string(), s.cost))
            .collect();
        // DST itself, unavailable and read-disabled replicas are excluded
        assert_eq!(
            ranked,
            vec![
                ("NEAR".to_string(), Cost::Reachable(1)),
                ("FAR".to_string(), Cost::Reachable(5)),
                ("ISLAND".to_string(), Cost::Unreachable),
            ]
        );
    }

    #[tokio::test]
    async fn test_no_replicas_gives_empty_sources() {
        let catalog = MemoryCatalog::new();
        catalog
            .queue_request(&NewRequest::new(Did::new("s", "lonely"), "DST", 1, "default"))
            .await
            .unwrap();

        let matched = claim_and_match(&catalog, &topology(), &["DST".into()], 10)
            .await
            .unwrap();
        assert_eq!(matched.len(), 1);
        assert!(matched[0].sources.is_empty());
    }

    #[tokio::test]
    async fn test_second_claim_finds_nothing() {
        let (catalog, _) = seeded().await;
        let topology = topology();

        let first = claim_and_match(&catalog, &topology, &["DST".into()], 10)
            .await
            .unwrap();
        let second = claim_and_match(&catalog, &topology, &["DST".into()], 10)
            .await
            .unwrap();
        assert_eq!(first.len(), 1);
        assert!(second.is_empty());
    }

    #[tokio::test]
    async fn test_zero_limit_claims_nothing() {
        let (catalog, id) = seeded().await;
        let matched = claim_and_match(&catalog, &topology(), &["DST".into()], 0)
            .await
            .unwrap();
        assert!(matched.is_empty());
        assert_eq!(
            catalog.get_request(id).await.unwrap().unwrap().state,
            RequestState::Queued
        );
    }

    /// Store whose replica lookup always fails
    struct FlakyReplicas(MemoryCatalog);

    #[async_trait]
    impl RequestStore for FlakyReplicas {
        async fn claim_queued(&self, d: &[RseId], l: usize) -> anyhow::Result<Vec<Request>> {
            self.0.claim_queued(d, l).await
        }
        async fn list_replicas(&self, _dids: &[Did]) -> anyhow::Result<Vec<ReplicaRecord>> {
            Err(anyhow::anyhow!("connection reset"))
        }
        async fn release(&self, id: i64, e: Option<String>) -> anyhow::Result<bool> {
            self.0.release(id, e).await
        }
        async fn mark_done(&self, id: i64) -> anyhow::Result<bool> {
            self.0.mark_done(id).await
        }
        async fn mark_failed(&self, id: i64, e: String) -> anyhow::Result<bool> {
            self.0.mark_failed(id, e).await
        }
        async fn get_request(&self, id: i64) -> anyhow::Result<Option<Request>> {
            self.0.get_request(id).await
        }
        async fn stats(&self) -> anyhow::Result<RequestStats> {
            self.0.stats().await
        }
    }

    #[tokio::test]
    async fn test_replica_failure_releases_claims() {
        let (catalog, id) = seeded().await;
        let store = FlakyReplicas(catalog);

        let err = claim_and_match(&store, &topology(), &["DST".into()], 10)
            .await
            .unwrap_err();
        assert!(matches!(err, MatchError::Replicas(_)));

        let request = store.get_request(id).await.unwrap().unwrap();
        assert_eq!(request.state, RequestState::Queued);
        assert_eq!(request.attempts, 0);
    }
}
