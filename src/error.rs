/*!
 * Error types for Conveyor
 */

use conveyor_core_jobparams::{PipelineError, RegistryError};
use conveyor_core_requests::MatchError;
use conveyor_core_topology::TopologyError;
use std::fmt;
use std::io;

pub type Result<T> = std::result::Result<T, ConveyorError>;

/// Exit code constants for structured process exit
pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_PARTIAL: i32 = 1;
pub const EXIT_FATAL: i32 = 2;

#[derive(Debug)]
pub enum ConveyorError {
    /// Configuration error
    Config(String),

    /// I/O error
    Io(io::Error),

    /// Catalog (persistence collaborator) failure
    Catalog(anyhow::Error),

    /// Topology snapshot could not be loaded
    Topology(TopologyError),

    /// Claim or replica lookup failed
    Match(MatchError),

    /// Metadata pipeline could not be built
    Pipeline(PipelineError),

    /// Plugin registry misuse
    Registry(RegistryError),

    /// Background task died
    Task(String),
}

impl ConveyorError {
    /// Get the process exit code for this error
    pub fn exit_code(&self) -> i32 {
        if self.is_fatal() {
            EXIT_FATAL
        } else {
            EXIT_PARTIAL
        }
    }

    /// Check if this error should stop the process rather than the pass
    pub fn is_fatal(&self) -> bool {
        match self {
            ConveyorError::Config(_) => true,
            ConveyorError::Pipeline(_) => true,
            ConveyorError::Registry(_) => true,
            ConveyorError::Topology(TopologyError::UnknownRse { .. }) => true,

            ConveyorError::Io(_) => false,
            ConveyorError::Catalog(_) => false,
            ConveyorError::Topology(TopologyError::Source(_)) => false,
            ConveyorError::Match(_) => false,
            ConveyorError::Task(_) => false,
        }
    }

    /// Check if this error is transient (temporary, worth retrying)
    pub fn is_transient(&self) -> bool {
        match self {
            ConveyorError::Io(err) => matches!(
                err.kind(),
                io::ErrorKind::TimedOut
                    | io::ErrorKind::Interrupted
                    | io::ErrorKind::WouldBlock
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
            ),
            ConveyorError::Catalog(_) => true,
            ConveyorError::Topology(TopologyError::Source(_)) => true,
            ConveyorError::Match(_) => true,
            _ => false,
        }
    }

    /// Get error category for logging
    pub fn category(&self) -> ErrorCategory {
        match self {
            ConveyorError::Config(_) => ErrorCategory::Configuration,
            ConveyorError::Io(_) => ErrorCategory::IoError,
            ConveyorError::Catalog(_) => ErrorCategory::Persistence,
            ConveyorError::Topology(_) => ErrorCategory::Topology,
            ConveyorError::Match(_) => ErrorCategory::Persistence,
            ConveyorError::Pipeline(_) | ConveyorError::Registry(_) => ErrorCategory::Plugins,
            ConveyorError::Task(_) => ErrorCategory::Concurrency,
        }
    }
}

/// Error category for classification and reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Configuration errors
    Configuration,
    /// I/O operation errors
    IoError,
    /// Catalog reads, writes and claims
    Persistence,
    /// Endpoint set problems
    Topology,
    /// Metadata plugin setup
    Plugins,
    /// Task scheduling errors
    Concurrency,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::Configuration => write!(f, "configuration"),
            ErrorCategory::IoError => write!(f, "io"),
            ErrorCategory::Persistence => write!(f, "persistence"),
            ErrorCategory::Topology => write!(f, "topology"),
            ErrorCategory::Plugins => write!(f, "plugins"),
            ErrorCategory::Concurrency => write!(f, "concurrency"),
        }
    }
}

impl fmt::Display for ConveyorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConveyorError::Config(msg) => write!(f, "Configuration error: {}", msg),
            ConveyorError::Io(err) => write!(f, "I/O error: {}", err),
            ConveyorError::Catalog(err) => write!(f, "Catalog error: {:#}", err),
            ConveyorError::Topology(err) => write!(f, "Topology load failed: {}", err),
            ConveyorError::Match(err) => write!(f, "{}", err),
            ConveyorError::Pipeline(err) => write!(f, "{}", err),
            ConveyorError::Registry(err) => write!(f, "{}", err),
            ConveyorError::Task(msg) => write!(f, "Task failed: {}", msg),
        }
    }
}

impl std::error::Error for ConveyorError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConveyorError::Io(err) => Some(err),
            ConveyorError::Catalog(err) => Some(&**err),
            ConveyorError::Topology(err) => Some(err),
            ConveyorError::Match(err) => Some(err),
            ConveyorError::Pipeline(err) => Some(err),
            ConveyorError::Registry(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for ConveyorError {
    fn from(err: io::Error) -> Self {
        ConveyorError::Io(err)
    }
}

impl From<anyhow::Error> for ConveyorError {
    fn from(err: anyhow::Error) -> Self {
        ConveyorError::Catalog(err)
    }
}

impl From<TopologyError> for ConveyorError {
    fn from(err: TopologyError) -> Self {
        ConveyorError::Topology(err)
    }
}

impl From<MatchError> for ConveyorError {
    fn from(err: MatchError) -> Self {
        ConveyorError::Match(err)
    }
}

impl From<PipelineError> for ConveyorError {
    fn from(err: PipelineError) -> Self {
        ConveyorError::Pipeline(err)
    }
}

impl From<RegistryError> for ConveyorError {
    fn from(err: RegistryError) -> Self {
        ConveyorError::Registry(err)
    }
}

impl From<toml::de::Error> for ConveyorError {
    fn from(err: toml::de::Error) -> Self {
        ConveyorError::Config(format!("TOML parse error: {}", err))
    }
}

impl From<serde_json::Error> for ConveyorError {
    fn from(err: serde_json::Error) -> Self {
        ConveyorError::Config(format!("JSON error: {}", err))
    }
}
