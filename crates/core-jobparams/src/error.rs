//! Error types for metadata assembly

use thiserror::Error;

/// Pipeline construction errors; surfaced at startup
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PipelineError {
    #[error("Unknown metadata plugin '{name}' (registered: {})", .available.join(", "))]
    UnknownPlugin { name: String, available: Vec<String> },
}

/// Global registry errors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Metadata plugin registry is already installed")]
    AlreadyInstalled,
}

/// Per-hop job parameter build errors
#[derive(Debug, Error)]
pub enum JobParamsError {
    /// Serialized metadata block exceeds the configured byte limit
    #[error("{block} is {size} bytes, exceeding the limit of {limit} bytes")]
    MetadataTooLarge {
        block: &'static str,
        size: usize,
        limit: usize,
    },

    #[error("Failed to serialize {block}: {source}")]
    Serialize {
        block: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_plugin_lists_available() {
        let err = PipelineError::UnknownPlugin {
            name: "colocation".to_string(),
            available: vec!["activity".to_string(), "def".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "Unknown metadata plugin 'colocation' (registered: activity, def)"
        );
    }

    #[test]
    fn test_too_large_message() {
        let err = JobParamsError::MetadataTooLarge {
            block: "archive_metadata",
            size: 37,
            limit: 4,
        };
        assert!(err.to_string().contains("37 bytes"));
    }
}
