//! Core-Requests: Transfer Request Catalog with Idempotent Claims
//!
//! # Overview
//!
//! This crate owns the request side of a scheduling pass: pending data
//! movements between storage endpoints, the replicas that could serve them,
//! and the atomic claim that hands each request to exactly one scheduler.
//!
//! # Features
//!
//! - **Idempotent Claims**: a single conditional "queued → submitted"
//!   transition per request, safe across concurrent scheduler instances
//! - **Source Matching**: claimed requests are paired with available
//!   replicas ranked by topology cost ([`matcher::claim_and_match`])
//! - **Multiple Backends**: SQLite (default) and an in-memory catalog
//! - **Manifest Seeding**: TOML catalog manifests → backend bulk load
//!
//! # Example
//!
//! ```no_run
//! use conveyor_core_requests::{matcher, Catalog};
//! use conveyor_core_topology::Topology;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let catalog = conveyor_core_requests::open("catalog.db").await?;
//!     let ids = vec!["CERN-DISK".into(), "CERN-TAPE".into()];
//!
//!     let topology = Topology::load(catalog.topology_source(), &ids).await?;
//!     let matched =
//!         matcher::claim_and_match(catalog.request_store(), &topology, &ids, 100).await?;
//!
//!     for entry in matched {
//!         println!("{} has {} candidate sources", entry.request.id, entry.sources.len());
//!     }
//!     Ok(())
//! }
//! ```

use async_trait::async_trait;
use conveyor_core_topology::{Cost, Distance, Rse, RseId, TopologySource};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

pub mod backends;
pub mod manifest;
pub mod matcher;

pub use backends::memory::MemoryCatalog;

#[cfg(feature = "sqlite")]
pub use backends::sqlite::SqliteCatalog;

pub use manifest::{seed, CatalogManifest};
pub use matcher::{claim_and_match, MatchError, MatchedRequest};

/// Request identifier assigned by the catalog
pub type RequestId = i64;

/// Lifecycle state of a transfer request
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum RequestState {
    /// Waiting to be claimed by a scheduler
    Queued,
    /// Claimed by a scheduler; in flight
    Submitted,
    /// Transfer completed
    Done,
    /// Transfer abandoned
    Failed,
}

impl fmt::Display for RequestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestState::Queued => write!(f, "queued"),
            RequestState::Submitted => write!(f, "submitted"),
            RequestState::Done => write!(f, "done"),
            RequestState::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for RequestState {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "queued" => Ok(RequestState::Queued),
            "submitted" => Ok(RequestState::Submitted),
            "done" => Ok(RequestState::Done),
            "failed" => Ok(RequestState::Failed),
            _ => Err(anyhow::anyhow!("Invalid request state: {}", s)),
        }
    }
}

/// Data identifier: the identity of a file within a scope
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Did {
    pub scope: String,
    pub name: String,
}

impl Did {
    pub fn new(scope: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            scope: scope.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for Did {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.scope, self.name)
    }
}

/// A pending or in-flight data movement
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Request {
    pub id: RequestId,
    pub did: Did,
    pub dest_rse: RseId,
    pub bytes: u64,
    pub activity: String,
    pub state: RequestState,
    /// Failed scheduling attempts so far
    pub attempts: u32,
    pub last_error: Option<String>,
}

/// Input for queueing a new request
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewRequest {
    pub did: Did,
    pub dest_rse: RseId,
    #[serde(default)]
    pub bytes: u64,
    #[serde(default = "default_activity")]
    pub activity: String,
}

fn default_activity() -> String {
    "default".to_string()
}

impl NewRequest {
    pub fn new(did: Did, dest_rse: impl Into<RseId>, bytes: u64, activity: impl Into<String>) -> Self {
        Self {
            did,
            dest_rse: dest_rse.into(),
            bytes,
            activity: activity.into(),
        }
    }
}

/// A known file copy on an endpoint
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReplicaRecord {
    pub did: Did,
    pub rse: RseId,
    #[serde(default)]
    pub bytes: u64,
    #[serde(default = "default_available")]
    pub available: bool,
}

fn default_available() -> bool {
    true
}

impl ReplicaRecord {
    pub fn new(did: Did, rse: impl Into<RseId>, bytes: u64) -> Self {
        Self {
            did,
            rse: rse.into(),
            bytes,
            available: true,
        }
    }

    pub fn unavailable(mut self) -> Self {
        self.available = false;
        self
    }
}

/// Candidate source for one claimed request, ranked by cost to destination
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SourceReplica {
    pub request_id: RequestId,
    pub rse: RseId,
    pub available: bool,
    pub cost: Cost,
}

/// Request counts per state
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RequestStats {
    pub total: u64,
    pub queued: u64,
    pub submitted: u64,
    pub done: u64,
    pub failed: u64,
}

impl RequestStats {
    /// Requests not yet finished either way
    pub fn outstanding(&self) -> u64 {
        self.queued + self.submitted
    }
}

/// Persistence seam for transfer requests
///
/// Every state transition is conditional on the current state, so two
/// schedulers racing on the same request can never both win. Transition
/// methods report whether they applied.
#[async_trait]
pub trait RequestStore: Send + Sync {
    /// Atomically claim up to `limit` queued requests headed to `dest_rses`
    ///
    /// Returned requests are in `Submitted` state and ordered by id.
    async fn claim_queued(&self, dest_rses: &[RseId], limit: usize) -> anyhow::Result<Vec<Request>>;

    /// List every known replica of the given files, ordered by endpoint id
    async fn list_replicas(&self, dids: &[Did]) -> anyhow::Result<Vec<ReplicaRecord>>;

    /// Return a submitted request to the queue
    ///
    /// Passing an error records a failed attempt and increments `attempts`;
    /// passing `None` releases without counting (e.g. on cancellation).
    async fn release(&self, id: RequestId, error: Option<String>) -> anyhow::Result<bool>;

    /// Mark a submitted request as done
    async fn mark_done(&self, id: RequestId) -> anyhow::Result<bool>;

    /// Mark a submitted request as failed
    async fn mark_failed(&self, id: RequestId, error: String) -> anyhow::Result<bool>;

    /// Get a single request
    async fn get_request(&self, id: RequestId) -> anyhow::Result<Option<Request>>;

    /// Counts per state across the whole catalog
    async fn stats(&self) -> anyhow::Result<RequestStats>;
}

/// Full persistence collaborator: topology reads, request state, and seeding
#[async_trait]
pub trait Catalog: TopologySource + RequestStore {
    /// View as the topology persistence seam
    fn topology_source(&self) -> &dyn TopologySource;

    /// View as the request persistence seam
    fn request_store(&self) -> &dyn RequestStore;

    /// Insert or replace an endpoint with its attributes and protocols
    async fn register_rse(&self, rse: &Rse) -> anyhow::Result<()>;

    /// Insert or replace a directed distance
    async fn set_distance(&self, distance: &Distance) -> anyhow::Result<()>;

    /// Insert or replace a replica
    async fn add_replica(&self, replica: &ReplicaRecord) -> anyhow::Result<()>;

    /// Queue a new request and return its id
    async fn queue_request(&self, request: &NewRequest) -> anyhow::Result<RequestId>;
}

/// Open a catalog at the specified path
///
/// `:memory:` selects the in-memory catalog; anything else is a SQLite
/// database (created if missing).
#[allow(clippy::needless_return)]
pub async fn open(path: &str) -> anyhow::Result<Arc<dyn Catalog>> {
    if path == ":memory:" {
        return Ok(Arc::new(MemoryCatalog::new()));
    }

    #[cfg(feature = "sqlite")]
    {
        let catalog = SqliteCatalog::open(path).await?;
        return Ok(Arc::new(catalog));
    }

    #[cfg(not(feature = "sqlite"))]
    Err(anyhow::anyhow!(
        "No backend available for path: {}. Enable the 'sqlite' feature.",
        path
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_request_state_display() {
        assert_eq!(RequestState::Queued.to_string(), "queued");
        assert_eq!(RequestState::Submitted.to_string(), "submitted");
        assert_eq!(RequestState::Done.to_string(), "done");
        assert_eq!(RequestState::Failed.to_string(), "failed");
    }

    #[test]
    fn test_request_state_parse() {
        assert_eq!(RequestState::from_str("queued").unwrap(), RequestState::Queued);
        assert_eq!(RequestState::from_str("SUBMITTED").unwrap(), RequestState::Submitted);
        assert!(RequestState::from_str("lost").is_err());
    }

    #[test]
    fn test_did_display() {
        assert_eq!(Did::new("data13", "file.root").to_string(), "data13:file.root");
    }

    #[test]
    fn test_request_stats() {
        let stats = RequestStats {
            total: 10,
            queued: 3,
            submitted: 2,
            done: 4,
            failed: 1,
        };
        assert_eq!(stats.outstanding(), 5);
    }

    #[tokio::test]
    async fn test_open_memory_catalog() {
        let catalog = open(":memory:").await.unwrap();
        assert_eq!(catalog.request_store().stats().await.unwrap().total, 0);
    }
}
