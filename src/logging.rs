/*!
 * Logging and tracing initialization
 */

use std::fs::File;
use std::path::Path;
use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

use crate::config::ConveyorConfig;
use crate::error::{ConveyorError, Result};

/// Crates whose events pass the default filter
const LOG_TARGETS: &[&str] = &[
    "conveyor",
    "conveyor_core_topology",
    "conveyor_core_requests",
    "conveyor_core_pathfinder",
    "conveyor_core_jobparams",
];

/// Initialize structured logging based on configuration
///
/// `RUST_LOG` takes precedence over the configured level.
pub fn init_logging(config: &ConveyorConfig) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_directives(effective_level(config))))
        .map_err(|e| ConveyorError::Config(format!("Failed to create log filter: {}", e)))?;

    match log_output(config) {
        LogOutput::JsonFile(log_path) => init_file_logging(log_path, env_filter),
        LogOutput::Stderr => init_stdout_logging(env_filter),
    }
}

/// Where log events are written
#[derive(Debug, PartialEq, Eq)]
enum LogOutput<'a> {
    /// Compact human-readable lines
    Stderr,
    /// One JSON object per event
    JsonFile(&'a Path),
}

fn log_output(config: &ConveyorConfig) -> LogOutput<'_> {
    match config.log_file.as_deref() {
        Some(path) => LogOutput::JsonFile(path),
        None => LogOutput::Stderr,
    }
}

/// `verbose` forces debug regardless of the configured level
fn effective_level(config: &ConveyorConfig) -> Level {
    if config.verbose {
        Level::DEBUG
    } else {
        config.log_level.to_tracing_level()
    }
}

fn default_directives(level: Level) -> String {
    LOG_TARGETS
        .iter()
        .map(|target| format!("{}={}", target, level))
        .collect::<Vec<_>>()
        .join(",")
}

/// Initialize logging to stderr
fn init_stdout_logging(env_filter: EnvFilter) -> Result<()> {
    // stdout is reserved for pass reports
    let fmt_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_file(false)
        .with_line_number(false)
        .with_span_events(FmtSpan::NONE)
        .compact();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()
        .map_err(|e| ConveyorError::Config(format!("Logging already initialized: {}", e)))
}

/// Initialize JSON logging to a file
fn init_file_logging(log_path: &Path, env_filter: EnvFilter) -> Result<()> {
    let file = File::create(log_path)
        .map_err(|e| ConveyorError::Config(format!("Failed to create log file: {}", e)))?;

    let fmt_layer = fmt::layer()
        .with_writer(file)
        .with_target(true)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(false)
        .json();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()
        .map_err(|e| ConveyorError::Config(format!("Logging already initialized: {}", e)))
}

/// Initialize logging with custom format for testing
#[cfg(test)]
pub fn init_test_logging() {
    use std::sync::Once;
    static INIT: Once = Once::new();

    INIT.call_once(|| {
        let env_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(default_directives(Level::DEBUG)));

        let fmt_layer = fmt::layer().with_test_writer().with_target(false).compact();

        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()
            .ok();
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LogLevel;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_directives_cover_workspace() {
        let directives = default_directives(Level::WARN);
        assert!(directives.starts_with("conveyor=WARN"));
        assert!(directives.contains("conveyor_core_jobparams=WARN"));
        assert!(EnvFilter::try_new(directives).is_ok());
    }

    #[test]
    fn test_verbose_overrides_log_level() {
        let mut config = ConveyorConfig {
            log_level: LogLevel::Warn,
            ..Default::default()
        };
        assert_eq!(effective_level(&config), Level::WARN);
        assert!(default_directives(effective_level(&config)).contains("conveyor=WARN"));

        config.verbose = true;
        assert_eq!(effective_level(&config), Level::DEBUG);
        assert!(default_directives(effective_level(&config)).contains("conveyor=DEBUG"));
    }

    #[test]
    fn test_log_file_selects_json_output() {
        let temp_file = NamedTempFile::new().unwrap();
        let config = ConveyorConfig {
            log_file: Some(temp_file.path().to_path_buf()),
            ..Default::default()
        };
        assert_eq!(log_output(&config), LogOutput::JsonFile(temp_file.path()));
        assert_eq!(log_output(&ConveyorConfig::default()), LogOutput::Stderr);
    }

    #[test]
    fn test_unwritable_log_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = ConveyorConfig {
            log_file: Some(dir.path().join("missing").join("conveyor.log")),
            ..Default::default()
        };
        let err = init_logging(&config).unwrap_err();
        assert!(matches!(err, ConveyorError::Config(ref msg) if msg.contains("log file")));
    }

    #[test]
    fn test_test_logging_is_idempotent() {
        init_test_logging();
        init_test_logging();
        tracing::debug!("test logging ready");
    }
}
