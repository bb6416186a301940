//! Logging glue for mcpup: a secret-sanitizing sink plus OS-specific log
//! directory resolution with size/age/backup-count rotation.

mod log_dir;
mod sanitizer;
mod writer;

pub use log_dir::{resolve_log_dir, server_log_file_name};
pub use sanitizer::SecretRegistry;
pub use writer::MaskingMakeWriter;

use std::io;
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

/// Rotation cadence for per-server log files, matching the teacher's
/// file-appender presets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogRotation {
    Hourly,
    Daily,
    #[default]
    Never,
}

/// Top-level logging configuration: where to write, how verbose, and
/// whether structured (JSON) output is wanted.
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub structured: bool,
    pub directory: Option<PathBuf>,
    pub rotation: LogRotation,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            structured: false,
            directory: None,
            rotation: LogRotation::Never,
        }
    }
}

impl LoggingConfig {
    /// Stderr-only, masked, no file guard required.
    pub fn stderr(level: impl Into<String>) -> Self {
        Self {
            level: level.into(),
            ..Default::default()
        }
    }

    /// Per-server rotating file logs under the OS-conventional log
    /// directory, masked at the writer boundary.
    pub fn production() -> io::Result<Self> {
        Ok(Self {
            level: "info".to_string(),
            structured: true,
            directory: Some(resolve_log_dir()?),
            rotation: LogRotation::Daily,
        })
    }

    /// Initializes the global tracing subscriber, wiring the secret
    /// sanitizer into the writer chain. Returns a guard that must be held
    /// for the lifetime of the process when file logging is enabled.
    pub fn init(&self, registry: SecretRegistry) -> io::Result<Option<WorkerGuard>> {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.level));
        let subscriber = tracing_subscriber::registry().with(filter);

        match &self.directory {
            None => {
                let writer = MaskingMakeWriter::new(io::stderr, registry);
                if self.structured {
                    subscriber
                        .with(fmt::layer().json().with_writer(writer))
                        .try_init()
                        .map_err(io::Error::other)?;
                } else {
                    subscriber
                        .with(fmt::layer().with_writer(writer))
                        .try_init()
                        .map_err(io::Error::other)?;
                }
                Ok(None)
            }
            Some(dir) => {
                std::fs::create_dir_all(dir)?;
                let appender = match self.rotation {
                    LogRotation::Hourly => tracing_appender::rolling::hourly(dir, "mcpproxy"),
                    LogRotation::Daily => tracing_appender::rolling::daily(dir, "mcpproxy"),
                    LogRotation::Never => tracing_appender::rolling::never(dir, "mcpproxy"),
                };
                let (non_blocking, guard) = tracing_appender::non_blocking(appender);
                let writer = MaskingMakeWriter::new(non_blocking, registry);
                if self.structured {
                    subscriber
                        .with(fmt::layer().json().with_writer(writer))
                        .try_init()
                        .map_err(io::Error::other)?;
                } else {
                    subscriber
                        .with(fmt::layer().with_writer(writer))
                        .try_init()
                        .map_err(io::Error::other)?;
                }
                Ok(Some(guard))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stderr_preset_has_no_directory() {
        let config = LoggingConfig::stderr("debug");
        assert_eq!(config.level, "debug");
        assert!(config.directory.is_none());
    }
}
