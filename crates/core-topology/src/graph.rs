//! Topology snapshot: endpoints plus directed distances

use crate::error::{Result, TopologyError};
use crate::rse::{Distance, Rse, RseId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Persistence seam supplying endpoint records and distances
///
/// Implementations must answer each call from a consistent snapshot.
#[async_trait]
pub trait TopologySource: Send + Sync {
    /// Ids of every known endpoint
    async fn list_rse_ids(&self) -> anyhow::Result<Vec<RseId>>;

    /// Fetch the records of the given endpoints; unknown ids are omitted
    async fn fetch_rses(&self, ids: &[RseId]) -> anyhow::Result<Vec<Rse>>;

    /// Fetch distances whose both ends are among the given endpoints
    async fn fetch_distances(&self, ids: &[RseId]) -> anyhow::Result<Vec<Distance>>;
}

/// Direct edge cost between two endpoints
///
/// `Reachable` orders before `Unreachable`, so sorting by cost naturally
/// pushes endpoints without a direct edge to the end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Cost {
    Reachable(u32),
    Unreachable,
}

impl Cost {
    pub fn is_reachable(&self) -> bool {
        matches!(self, Cost::Reachable(_))
    }

    pub fn value(&self) -> Option<u32> {
        match self {
            Cost::Reachable(cost) => Some(*cost),
            Cost::Unreachable => None,
        }
    }
}

impl fmt::Display for Cost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cost::Reachable(cost) => write!(f, "{}", cost),
            Cost::Unreachable => write!(f, "unreachable"),
        }
    }
}

/// Immutable endpoint graph for one scheduling pass
#[derive(Debug, Clone, Default)]
pub struct Topology {
    rses: HashMap<RseId, Arc<Rse>>,
    edges: HashMap<RseId, BTreeMap<RseId, u32>>,
}

impl Topology {
    /// Load a snapshot restricted to `ids` from the persistence collaborator
    ///
    /// Fails with [`TopologyError::UnknownRse`] if any id has no record.
    pub async fn load(source: &dyn TopologySource, ids: &[RseId]) -> Result<Self> {
        let wanted: BTreeSet<RseId> = ids.iter().cloned().collect();
        let wanted: Vec<RseId> = wanted.into_iter().collect();

        let rses = source
            .fetch_rses(&wanted)
            .await
            .map_err(TopologyError::Source)?;

        let found: BTreeSet<&RseId> = rses.iter().map(|rse| &rse.id).collect();
        let missing: Vec<RseId> = wanted
            .iter()
            .filter(|id| !found.contains(id))
            .cloned()
            .collect();
        if !missing.is_empty() {
            return Err(TopologyError::UnknownRse { missing });
        }

        let distances = source
            .fetch_distances(&wanted)
            .await
            .map_err(TopologyError::Source)?;

        let topology = Self::from_parts(rses, distances);
        debug!(
            rses = topology.len(),
            edges = topology.edge_count(),
            "Topology snapshot loaded"
        );
        Ok(topology)
    }

    /// Load a snapshot of every known endpoint
    ///
    /// `required` must all be known, otherwise the load fails with
    /// [`TopologyError::UnknownRse`] just like [`Topology::load`].
    pub async fn load_all(source: &dyn TopologySource, required: &[RseId]) -> Result<Self> {
        let mut ids = source.list_rse_ids().await.map_err(TopologyError::Source)?;
        ids.extend(required.iter().cloned());
        Self::load(source, &ids).await
    }

    /// Build a snapshot from in-memory records
    ///
    /// Distances touching endpoints outside `rses` and self-loops are
    /// dropped. When the same pair appears twice the last cost wins.
    pub fn from_parts(rses: Vec<Rse>, distances: Vec<Distance>) -> Self {
        let rses: HashMap<RseId, Arc<Rse>> = rses
            .into_iter()
            .map(|rse| (rse.id.clone(), Arc::new(rse)))
            .collect();

        let mut edges: HashMap<RseId, BTreeMap<RseId, u32>> = HashMap::new();
        for distance in distances {
            if distance.src == distance.dst
                || !rses.contains_key(&distance.src)
                || !rses.contains_key(&distance.dst)
            {
                continue;
            }
            edges
                .entry(distance.src)
                .or_default()
                .insert(distance.dst, distance.cost);
        }

        Self { rses, edges }
    }

    pub fn rse(&self, id: &RseId) -> Option<&Arc<Rse>> {
        self.rses.get(id)
    }

    pub fn contains(&self, id: &RseId) -> bool {
        self.rses.contains_key(id)
    }

    /// Endpoint ids in the snapshot, sorted
    pub fn rse_ids(&self) -> Vec<RseId> {
        let mut ids: Vec<RseId> = self.rses.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.rses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rses.is_empty()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.values().map(BTreeMap::len).sum()
    }

    /// Directly reachable endpoints with their edge cost
    ///
    /// Ordered by ascending cost, then id. An isolated endpoint yields an
    /// empty list.
    pub fn neighbors(&self, id: &RseId) -> Vec<(&Arc<Rse>, u32)> {
        let Some(out) = self.edges.get(id) else {
            return Vec::new();
        };

        let mut neighbors: Vec<(&Arc<Rse>, u32)> = out
            .iter()
            .filter_map(|(dst, cost)| self.rses.get(dst).map(|rse| (rse, *cost)))
            .collect();
        neighbors.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.id.cmp(&b.0.id)));
        neighbors
    }

    /// Cost of the direct edge `src → dst`; never searches further
    pub fn cost(&self, src: &RseId, dst: &RseId) -> Cost {
        self.edges
            .get(src)
            .and_then(|out| out.get(dst))
            .map(|cost| Cost::Reachable(*cost))
            .unwrap_or(Cost::Unreachable)
    }
}
