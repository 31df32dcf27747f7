//! Core-Topology: Storage Endpoint Graph for Conveyor
//!
//! This crate holds the weighted, directed graph of storage endpoints (RSEs)
//! that every scheduling pass routes transfers over.
//!
//! # Design
//!
//! - **Snapshots**: a [`Topology`] is loaded once per pass and never mutated
//!   afterwards, so it can be shared across worker threads without locking.
//! - **Direct costs only**: [`Topology::cost`] answers single-edge queries.
//!   Multi-hop search lives in the path builder, keeping graph storage and
//!   path search separately testable.
//! - **Persistence seam**: endpoint records and distances come from a
//!   [`TopologySource`], implemented by the catalog backends.
//!
//! # Example
//!
//! ```
//! use conveyor_core_topology::{Cost, Distance, Rse, RseKind, Topology};
//!
//! let topology = Topology::from_parts(
//!     vec![Rse::new("CERN-DISK", RseKind::Disk), Rse::new("CERN-TAPE", RseKind::Tape)],
//!     vec![Distance::new("CERN-DISK", "CERN-TAPE", 1)],
//! );
//!
//! assert_eq!(topology.cost(&"CERN-DISK".into(), &"CERN-TAPE".into()), Cost::Reachable(1));
//! assert_eq!(topology.cost(&"CERN-TAPE".into(), &"CERN-DISK".into()), Cost::Unreachable);
//! ```

pub mod error;
pub mod graph;
pub mod rse;

pub use error::{Result, TopologyError};
pub use graph::{Cost, Topology, TopologySource};
pub use rse::{Distance, Protocol, Rse, RseId, RseKind};
