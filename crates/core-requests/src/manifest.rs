//! TOML catalog manifests
//!
//! A manifest describes a whole grid in one file and is used to seed a
//! catalog for tests, demos and dry runs:
//!
//! ```toml
//! [[rses]]
//! id = "CERN-DISK"
//! type = "DISK"
//! attributes = { qos = "fast" }
//! protocols = [{ scheme = "root", hostname = "eos.cern.ch", port = 1094, prefix = "/eos" }]
//!
//! [[distances]]
//! src = "CERN-DISK"
//! dst = "BNL-TAPE"
//! cost = 2
//!
//! [[replicas]]
//! did = { scope = "data13", name = "file.root" }
//! rse = "CERN-DISK"
//! bytes = 1024
//!
//! [[requests]]
//! did = { scope = "data13", name = "file.root" }
//! dest_rse = "BNL-TAPE"
//! bytes = 1024
//! activity = "T0 Export"
//! ```

use crate::{Catalog, NewRequest, ReplicaRecord, RequestId};
use anyhow::{Context, Result};
use conveyor_core_topology::{Distance, Rse};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

/// Grid description loaded from TOML
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CatalogManifest {
    #[serde(default)]
    pub rses: Vec<Rse>,
    #[serde(default)]
    pub distances: Vec<Distance>,
    #[serde(default)]
    pub replicas: Vec<ReplicaRecord>,
    #[serde(default)]
    pub requests: Vec<NewRequest>,
}

impl CatalogManifest {
    /// Parse a manifest from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse catalog manifest")
    }

    /// Load a manifest from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read manifest {}", path.display()))?;
        Self::from_toml_str(&content)
    }
}

/// Write every record of `manifest` into `catalog`
///
/// Endpoints go first so distances and replicas refer to known ids.
/// Returns the ids of the queued requests in manifest order.
pub async fn seed(catalog: &dyn Catalog, manifest: &CatalogManifest) -> Result<Vec<RequestId>> {
    for rse in &manifest.rses {
        catalog
            .register_rse(rse)
            .await
            .with_context(|| format!("Failed to register RSE {}", rse.id))?;
    }

    for distance in &manifest.distances {
        catalog.set_distance(distance).await?;
    }

    for replica in &manifest.replicas {
        catalog.add_replica(replica).await?;
    }

    let mut ids = Vec::with_capacity(manifest.requests.len());
    for request in &manifest.requests {
        ids.push(catalog.queue_request(request).await?);
    }

    info!(
        rses = manifest.rses.len(),
        distances = manifest.distances.len(),
        replicas = manifest.replicas.len(),
        requests = ids.len(),
        "Catalog seeded"
    );

    Ok(ids)
}
