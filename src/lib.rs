/*!
 * Conveyor - transfer scheduling core
 *
 * Turns queued replication requests into submittable transfer jobs:
 * - Topology snapshots of storage endpoints and their distances
 * - Atomic request claiming with ranked source replicas
 * - Direct and tape-staged multi-hop path building
 * - Job parameters with size-bounded tape metadata hints from plugins
 * - Scheduling passes with retry policy, backoff and a daemon loop
 */

pub mod config;
pub mod daemon;
pub mod error;
pub mod executor;
pub mod logging;
pub mod report;
pub mod retry;
pub mod scheduler;

// Re-export commonly used types
pub use config::{ConveyorConfig, LogLevel};
pub use daemon::Daemon;
pub use error::{ConveyorError, Result};
pub use report::{Disposition, OutcomeKind, PassReport, PassStats, RequestOutcome};
pub use scheduler::{CancelToken, Scheduler};

pub use conveyor_core_jobparams as jobparams;
pub use conveyor_core_pathfinder as pathfinder;
pub use conveyor_core_requests as requests;
pub use conveyor_core_topology as topology;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
