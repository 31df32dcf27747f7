//! Hops and transfer paths

use crate::negotiate::ProtocolMatch;
use crate::pfn::physical_url;
use conveyor_core_requests::Request;
use conveyor_core_topology::Rse;
use std::sync::Arc;

/// One leg of a transfer path
///
/// Hops are rebuilt on every pass and never mutated afterwards.
#[derive(Debug, Clone)]
pub struct Hop {
    pub source: Arc<Rse>,
    pub destination: Arc<Rse>,
    pub protocol: ProtocolMatch,
    pub activity: String,
    pub request: Arc<Request>,
    /// Edge cost of this leg in the topology snapshot
    pub cost: u32,
}

impl Hop {
    pub fn source_url(&self) -> String {
        physical_url(&self.protocol.source, &self.request.did)
    }

    pub fn dest_url(&self) -> String {
        physical_url(&self.protocol.destination, &self.request.did)
    }

    pub fn is_archive_leg(&self) -> bool {
        self.destination.is_tape()
    }

    pub fn is_stage_out_leg(&self) -> bool {
        self.source.is_tape()
    }
}

/// Ordered hops moving one request's file to its destination
#[derive(Debug, Clone)]
pub struct TransferPath {
    pub request: Arc<Request>,
    pub hops: Vec<Hop>,
}

impl TransferPath {
    pub fn is_multihop(&self) -> bool {
        self.hops.len() > 1
    }

    pub fn total_cost(&self) -> u64 {
        self.hops.iter().map(|hop| u64::from(hop.cost)).sum()
    }

    /// Every hop starts where the previous one ended, and the last hop ends
    /// at the request's destination
    pub fn is_contiguous(&self) -> bool {
        let linked = self
            .hops
            .windows(2)
            .all(|pair| pair[0].destination.id == pair[1].source.id);

        linked
            && self
                .hops
                .last()
                .is_some_and(|hop| hop.destination.id == self.request.dest_rse)
            && self
                .hops
                .iter()
                .filter(|hop| hop.destination.id == self.request.dest_rse)
                .count()
                == 1
    }
}
