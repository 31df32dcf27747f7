//! Core-Pathfinder: Transfer Path Construction
//!
//! Turns matched requests (a claimed request plus its ranked candidate
//! sources) into concrete transfer paths over a [`Topology`] snapshot.
//!
//! # Routing rules
//!
//! 1. Sources are tried in the order the matcher ranked them.
//! 2. A source yields a single hop when a direct edge exists, the two
//!    endpoints negotiate a protocol, and the pair is not a tape source
//!    writing to a tape or staging-required destination.
//! 3. Otherwise a DISK neighbour of the source is inserted as a staging
//!    endpoint, giving `source → staging → destination`.
//! 4. If no source works, the request is reported with [`NoRoute`].
//!
//! # Example
//!
//! ```
//! use conveyor_core_pathfinder::{PathBuilder, PathConfig};
//! use conveyor_core_topology::{Distance, Protocol, Rse, RseKind, Topology};
//!
//! let root = Protocol::new("root", "eos.example.org", 1094);
//! let topology = Topology::from_parts(
//!     vec![
//!         Rse::new("SRC", RseKind::Disk).with_protocol(root.clone()),
//!         Rse::new("DST", RseKind::Tape).with_protocol(root),
//!     ],
//!     vec![Distance::new("SRC", "DST", 1)],
//! );
//!
//! let builder = PathBuilder::new(&topology, PathConfig::default());
//! assert!(builder.negotiate_direct(&"SRC".into(), &"DST".into()).is_some());
//! ```
//!
//! [`Topology`]: conveyor_core_topology::Topology

pub mod builder;
pub mod error;
pub mod negotiate;
pub mod path;
pub mod pfn;

pub use builder::{PathBuilder, PathConfig};
pub use error::{NoRoute, NoRouteReason};
pub use negotiate::{negotiate, ProtocolMatch, SchemeMap};
pub use path::{Hop, TransferPath};
pub use pfn::physical_url;
