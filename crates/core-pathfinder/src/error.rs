//! Per-request routing failures

use conveyor_core_requests::RequestId;
use conveyor_core_topology::RseId;
use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Why no path could be built
///
/// All reasons are the same outcome for the caller: the request stays
/// submitted and must be released or failed. They are kept apart so that
/// reports and retry policies can tell them apart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NoRouteReason {
    /// The destination endpoint is not in the topology snapshot
    DestinationUnknown { rse: RseId },
    /// The matcher found no usable replica
    NoSources,
    /// Sources exist but none has a direct or staged route
    NoCompatibleRoute { tried: usize },
}

impl fmt::Display for NoRouteReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NoRouteReason::DestinationUnknown { rse } => {
                write!(f, "destination {} is not in the topology", rse)
            }
            NoRouteReason::NoSources => write!(f, "no available source replica"),
            NoRouteReason::NoCompatibleRoute { tried } => {
                write!(f, "no compatible route from {} source(s)", tried)
            }
        }
    }
}

/// A request for which no transfer path exists
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[error("No route for request {request_id}: {reason}")]
pub struct NoRoute {
    pub request_id: RequestId,
    pub reason: NoRouteReason,
}

impl NoRoute {
    pub fn new(request_id: RequestId, reason: NoRouteReason) -> Self {
        Self { request_id, reason }
    }
}
