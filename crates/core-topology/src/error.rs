//! Error types for topology loading

use crate::rse::RseId;
use thiserror::Error;

/// Errors raised while building a topology snapshot
///
/// Both variants are fatal to the scheduling pass that triggered the load.
/// The next pass loads again with refreshed input.
#[derive(Debug, Error)]
pub enum TopologyError {
    /// One or more requested endpoints are unknown to the persistence layer
    #[error("Unknown RSE(s) in topology request: {}", format_ids(.missing))]
    UnknownRse { missing: Vec<RseId> },

    /// The persistence collaborator failed to answer
    #[error("Topology source error: {0}")]
    Source(#[source] anyhow::Error),
}

fn format_ids(ids: &[RseId]) -> String {
    ids.iter()
        .map(|id| id.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

pub type Result<T> = std::result::Result<T, TopologyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_rse_message_lists_ids() {
        let err = TopologyError::UnknownRse {
            missing: vec!["A".into(), "B".into()],
        };
        assert_eq!(err.to_string(), "Unknown RSE(s) in topology request: A, B");
    }
}
