//! Integration tests for conveyor-core-requests
//!
//! Exercises the SQLite and in-memory catalogs end to end: seeding,
//! concurrent claiming and source matching against a loaded topology.

use anyhow::Result;
use conveyor_core_requests::{
    claim_and_match, seed, Catalog, CatalogManifest, MemoryCatalog, RequestState, RequestStore,
};
use conveyor_core_topology::{Cost, RseId, Topology};
use std::collections::HashSet;
use tempfile::NamedTempFile;

const GRID: &str = r#"
[[rses]]
id = "CERN-DISK"
type = "DISK"
protocols = [{ scheme = "root", hostname = "eos.cern.ch", port = 1094, prefix = "/eos" }]

[[rses]]
id = "FZK-DISK"
type = "DISK"

[[rses]]
id = "BNL-TAPE"
type = "TAPE"

[[distances]]
src = "CERN-DISK"
dst = "BNL-TAPE"
cost = 4

[[distances]]
src = "FZK-DISK"
dst = "BNL-TAPE"
cost = 1

[[replicas]]
did = { scope = "data13", name = "raw.0001" }
rse = "CERN-DISK"
bytes = 2048

[[replicas]]
did = { scope = "data13", name = "raw.0001" }
rse = "FZK-DISK"
bytes = 2048

[[requests]]
did = { scope = "data13", name = "raw.0001" }
dest_rse = "BNL-TAPE"
bytes = 2048
activity = "T0 Tape"
"#;

fn grid_ids() -> Vec<RseId> {
    vec!["CERN-DISK".into(), "FZK-DISK".into(), "BNL-TAPE".into()]
}

#[cfg(feature = "sqlite")]
mod sqlite_tests {
    use super::*;
    use conveyor_core_requests::{Did, NewRequest, SqliteCatalog};

    #[tokio::test]
    async fn test_sqlite_seed_and_match() -> Result<()> {
        let tmp = NamedTempFile::new()?;
        let catalog = SqliteCatalog::open(tmp.path().to_str().unwrap()).await?;

        let manifest = CatalogManifest::from_toml_str(GRID)?;
        let ids = seed(&catalog, &manifest).await?;
        assert_eq!(ids.len(), 1);

        let topology = Topology::load(&catalog, &grid_ids()).await?;
        assert_eq!(topology.edge_count(), 2);

        let matched = claim_and_match(&catalog, &topology, &["BNL-TAPE".into()], 10).await?;
        assert_eq!(matched.len(), 1);

        let ranked: Vec<(&str, Cost)> = matched[0]
            .sources
            .iter()
            .map(|s| (s.rse.as_str(), s.cost))
            .collect();
        assert_eq!(
            ranked,
            vec![("FZK-DISK", Cost::Reachable(1)), ("CERN-DISK", Cost::Reachable(4))]
        );

        let stored = catalog.get_request(ids[0]).await?.unwrap();
        assert_eq!(stored.state, RequestState::Submitted);

        Ok(())
    }

    #[tokio::test]
    async fn test_sqlite_concurrent_claims_from_two_handles() -> Result<()> {
        let tmp = NamedTempFile::new()?;
        let path = tmp.path().to_str().unwrap().to_string();

        let first = SqliteCatalog::open(&path).await?;
        for i in 0..40 {
            first
                .queue_request(&NewRequest::new(
                    Did::new("user.jdoe", format!("file.{i:04}")),
                    "DST",
                    100,
                    "User Subscriptions",
                ))
                .await?;
        }
        let second = SqliteCatalog::open(&path).await?;

        let dest: Vec<RseId> = vec!["DST".into()];
        let mut claimed = HashSet::new();
        loop {
            let (a, b) = tokio::join!(first.claim_queued(&dest, 3), second.claim_queued(&dest, 3));
            let (a, b) = (a?, b?);
            if a.is_empty() && b.is_empty() {
                break;
            }
            for request in a.into_iter().chain(b) {
                assert!(claimed.insert(request.id), "request {} claimed twice", request.id);
            }
        }

        assert_eq!(claimed.len(), 40);
        assert_eq!(first.stats().await?.submitted, 40);

        Ok(())
    }

    #[tokio::test]
    async fn test_sqlite_release_then_reclaim() -> Result<()> {
        let tmp = NamedTempFile::new()?;
        let catalog = SqliteCatalog::open(tmp.path().to_str().unwrap()).await?;
        seed(&catalog, &CatalogManifest::from_toml_str(GRID)?).await?;

        let dest: Vec<RseId> = vec!["BNL-TAPE".into()];
        let request = catalog.claim_queued(&dest, 1).await?.remove(0);

        assert!(catalog.release(request.id, Some("no route".into())).await?);
        // Second release is a no-op: the request is no longer submitted
        assert!(!catalog.release(request.id, Some("no route".into())).await?);

        let again = catalog.claim_queued(&dest, 1).await?;
        assert_eq!(again.len(), 1);
        assert_eq!(again[0].attempts, 1);

        Ok(())
    }

    #[tokio::test]
    async fn test_open_dispatches_to_sqlite() -> Result<()> {
        let tmp = NamedTempFile::new()?;
        let catalog = conveyor_core_requests::open(tmp.path().to_str().unwrap()).await?;
        seed(catalog.as_ref(), &CatalogManifest::from_toml_str(GRID)?).await?;
        assert_eq!(catalog.request_store().stats().await?.queued, 1);
        Ok(())
    }
}

#[tokio::test]
async fn test_memory_unknown_rse_in_topology() -> Result<()> {
    let catalog = MemoryCatalog::new();
    seed(&catalog, &CatalogManifest::from_toml_str(GRID)?).await?;

    let err = Topology::load(&catalog, &["CERN-DISK".into(), "NOWHERE".into()])
        .await
        .unwrap_err();
    assert!(err.to_string().contains("NOWHERE"));

    Ok(())
}

#[tokio::test]
async fn test_memory_matching_excludes_sources_outside_snapshot() -> Result<()> {
    let catalog = MemoryCatalog::new();
    seed(&catalog, &CatalogManifest::from_toml_str(GRID)?).await?;

    // FZK-DISK is left out of this worker's snapshot
    let ids: Vec<RseId> = vec!["CERN-DISK".into(), "BNL-TAPE".into()];
    let topology = Topology::load(&catalog, &ids).await?;

    let matched = claim_and_match(&catalog, &topology, &["BNL-TAPE".into()], 10).await?;
    let sources: Vec<&str> = matched[0].sources.iter().map(|s| s.rse.as_str()).collect();
    assert_eq!(sources, vec!["CERN-DISK"]);

    Ok(())
}
