/*!
 * Configuration types for Conveyor
 */

use conveyor_core_jobparams::{JobDefaults, MetadataPipeline, PluginSettings};
use conveyor_core_pathfinder::PathConfig;
use conveyor_core_topology::RseId;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::{ConveyorError, Result};

/// Main configuration for a scheduler process
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConveyorConfig {
    /// Log level for diagnostic output
    #[serde(default)]
    pub log_level: LogLevel,

    /// Log file path (None = stdout)
    #[serde(default)]
    pub log_file: Option<PathBuf>,

    /// Enable verbose logging (shorthand for log_level = debug)
    #[serde(default)]
    pub verbose: bool,

    /// Submission and metadata settings
    #[serde(default)]
    pub transfers: TransferSettings,

    /// Activity → archive priority
    #[serde(default)]
    pub tape_priority: BTreeMap<String, i64>,

    /// Routing options
    #[serde(default)]
    pub paths: PathConfig,

    /// Request retry and backoff policy
    #[serde(default)]
    pub retry: RetryConfig,

    /// Worker scope and cadence
    #[serde(default)]
    pub scheduler: SchedulerSettings,
}

/// `[transfers]` section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TransferSettings {
    /// Ordered metadata plugin names; a comma-separated string is accepted
    #[serde(default, deserialize_with = "deserialize_name_list")]
    pub plugin_names: Vec<String>,

    /// Cap on each serialized metadata block, in bytes
    #[serde(default = "default_metadata_byte_limit")]
    pub metadata_byte_limit: usize,

    /// Maximum requests claimed per pass
    #[serde(default = "default_claim_batch_size")]
    pub claim_batch_size: usize,

    /// Priority for activities missing from `[tape_priority]`
    #[serde(default = "default_tape_priority")]
    pub default_tape_priority: i64,

    /// Seconds allowed for staging from tape
    #[serde(default)]
    pub bring_online: Option<u64>,

    #[serde(default)]
    pub default_lifetime: Option<u64>,

    #[serde(default)]
    pub archive_timeout_override: Option<u64>,

    /// Activity → hours in the transfer service queue
    #[serde(default)]
    pub max_time_in_queue: BTreeMap<String, u64>,

    #[serde(default = "default_true")]
    pub overwrite: bool,

    #[serde(default = "default_true")]
    pub verify_checksum: bool,
}

impl Default for TransferSettings {
    fn default() -> Self {
        Self {
            plugin_names: Vec::new(),
            metadata_byte_limit: default_metadata_byte_limit(),
            claim_batch_size: default_claim_batch_size(),
            default_tape_priority: default_tape_priority(),
            bring_online: None,
            default_lifetime: None,
            archive_timeout_override: None,
            max_time_in_queue: BTreeMap::new(),
            overwrite: true,
            verify_checksum: true,
        }
    }
}

/// `[retry]` section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryConfig {
    /// Scheduling attempts before a request is marked failed
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// First backoff delay for topology load and claim retries
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,

    /// Tries for each topology load or claim round-trip
    #[serde(default = "default_load_attempts")]
    pub load_attempts: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            load_attempts: default_load_attempts(),
        }
    }
}

/// `[scheduler]` section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SchedulerSettings {
    /// Endpoint set this worker schedules for
    #[serde(default)]
    pub rses: Vec<RseId>,

    /// Seconds between passes in daemon mode
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            rses: Vec::new(),
            interval_secs: default_interval_secs(),
        }
    }
}

/// Log level for diagnostic output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Only errors
    Error,

    /// Warnings and errors
    Warn,

    /// Info, warnings, and errors
    #[default]
    Info,

    /// Debug and above
    Debug,

    /// All messages including traces
    Trace,
}

impl LogLevel {
    /// Convert to tracing::Level
    pub fn to_tracing_level(&self) -> tracing::Level {
        match self {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum NameList {
    Joined(String),
    List(Vec<String>),
}

fn deserialize_name_list<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let names = match NameList::deserialize(deserializer)? {
        NameList::Joined(joined) => joined.split(',').map(str::to_string).collect(),
        NameList::List(list) => list,
    };

    Ok(names
        .into_iter()
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .collect())
}

// Default value functions for serde
fn default_true() -> bool {
    true
}

fn default_metadata_byte_limit() -> usize {
    MetadataPipeline::DEFAULT_BYTE_LIMIT
}

fn default_claim_batch_size() -> usize {
    100
}

fn default_tape_priority() -> i64 {
    PluginSettings::DEFAULT_PRIORITY
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_base_ms() -> u64 {
    200
}

fn default_backoff_max_ms() -> u64 {
    10_000
}

fn default_load_attempts() -> u32 {
    3
}

fn default_interval_secs() -> u64 {
    60
}

impl ConveyorConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            ConveyorError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&contents)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: ConveyorConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values no scheduler can run with
    pub fn validate(&self) -> Result<()> {
        if self.transfers.metadata_byte_limit == 0 {
            return Err(ConveyorError::Config(
                "transfers.metadata_byte_limit must be greater than 0".to_string(),
            ));
        }
        if self.transfers.claim_batch_size == 0 {
            return Err(ConveyorError::Config(
                "transfers.claim_batch_size must be greater than 0".to_string(),
            ));
        }
        if self.retry.max_attempts == 0 || self.retry.load_attempts == 0 {
            return Err(ConveyorError::Config(
                "retry.max_attempts and retry.load_attempts must be at least 1".to_string(),
            ));
        }
        if self.retry.backoff_base_ms > self.retry.backoff_max_ms {
            return Err(ConveyorError::Config(format!(
                "retry.backoff_base_ms ({}) exceeds retry.backoff_max_ms ({})",
                self.retry.backoff_base_ms, self.retry.backoff_max_ms
            )));
        }
        if self.scheduler.interval_secs == 0 {
            return Err(ConveyorError::Config(
                "scheduler.interval_secs must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Settings handed to metadata plugin factories
    pub fn plugin_settings(&self) -> PluginSettings {
        PluginSettings {
            priority_map: self.tape_priority.clone(),
            default_priority: self.transfers.default_tape_priority,
        }
    }

    /// Base parameters applied to every job
    pub fn job_defaults(&self) -> JobDefaults {
        JobDefaults {
            bring_online: self.transfers.bring_online,
            default_lifetime: self.transfers.default_lifetime,
            archive_timeout_override: self.transfers.archive_timeout_override,
            max_time_in_queue: self.transfers.max_time_in_queue.clone(),
            overwrite: self.transfers.overwrite,
            verify_checksum: self.transfers.verify_checksum,
        }
    }
}
