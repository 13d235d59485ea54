//! Snapshot configuration via `shardsave.toml`
//!
//! Every host reads the same file. Missing keys fall back to defaults, so an
//! empty file is a valid configuration.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Config file name
pub const CONFIG_FILE_NAME: &str = "shardsave.toml";

/// Per-host snapshot configuration
///
/// # Example
///
/// ```toml
/// hostname = "db-3.internal"
/// cluster_name = "orders"
/// database_name = "main"
///
/// # Bound on how long a site waits for the leader to finish setup.
/// # Omit to wait indefinitely.
/// release_timeout_ms = 30000
///
/// max_completed_snapshots = 10
/// file_extension = "vpt"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotConfig {
    /// Hostname reported in result rows
    #[serde(default = "default_hostname")]
    pub hostname: String,
    /// Cluster name recorded in table file headers
    #[serde(default = "default_cluster_name")]
    pub cluster_name: String,
    /// Database name recorded in table file headers
    #[serde(default = "default_database_name")]
    pub database_name: String,
    /// Completion-permit wait bound in milliseconds; `None` waits forever
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release_timeout_ms: Option<u64>,
    /// Completed snapshots kept in the registry
    #[serde(default = "default_max_completed_snapshots")]
    pub max_completed_snapshots: usize,
    /// Table file extension, without the dot
    #[serde(default = "default_file_extension")]
    pub file_extension: String,
}

fn default_hostname() -> String {
    "localhost".to_string()
}

fn default_cluster_name() -> String {
    "cluster".to_string()
}

fn default_database_name() -> String {
    "database".to_string()
}

fn default_max_completed_snapshots() -> usize {
    10
}

fn default_file_extension() -> String {
    shardsave_durability::DEFAULT_FILE_EXTENSION.to_string()
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        SnapshotConfig {
            hostname: default_hostname(),
            cluster_name: default_cluster_name(),
            database_name: default_database_name(),
            release_timeout_ms: None,
            max_completed_snapshots: default_max_completed_snapshots(),
            file_extension: default_file_extension(),
        }
    }
}

impl SnapshotConfig {
    /// Set the hostname
    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = hostname.into();
        self
    }

    /// Set cluster and database names
    pub fn with_names(mut self, cluster: impl Into<String>, database: impl Into<String>) -> Self {
        self.cluster_name = cluster.into();
        self.database_name = database.into();
        self
    }

    /// Bound the completion-permit wait
    pub fn with_release_timeout(mut self, timeout: Duration) -> Self {
        self.release_timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    /// Set registry history size
    pub fn with_max_completed_snapshots(mut self, max: usize) -> Self {
        self.max_completed_snapshots = max;
        self
    }

    /// Completion-permit wait bound
    pub fn release_timeout(&self) -> Option<Duration> {
        self.release_timeout_ms.map(Duration::from_millis)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.hostname.is_empty() {
            return Err(ConfigError::Invalid("hostname must not be empty".into()));
        }
        if self.cluster_name.is_empty() || self.database_name.is_empty() {
            return Err(ConfigError::Invalid(
                "cluster_name and database_name must not be empty".into(),
            ));
        }
        if self.max_completed_snapshots == 0 {
            return Err(ConfigError::Invalid(
                "max_completed_snapshots must be at least 1".into(),
            ));
        }
        if self.file_extension.is_empty() || self.file_extension.contains('.') {
            return Err(ConfigError::Invalid(format!(
                "invalid file_extension '{}'",
                self.file_extension
            )));
        }
        Ok(())
    }

    /// Read, parse and validate config from a file path
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: SnapshotConfig = toml::from_str(&content)
            .map_err(|e| ConfigError::Parse(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize this config to TOML and write it to the given path
    pub fn write_to_file(&self, path: &Path) -> Result<(), ConfigError> {
        let content =
            toml::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Config file could not be read or written
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Config file could not be parsed
    #[error("Failed to parse config: {0}")]
    Parse(String),

    /// A value is out of range
    #[error("Invalid config: {0}")]
    Invalid(String),
}
