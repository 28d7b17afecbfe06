/// Configuration management for shardctl

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main shardctl configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Coordination store configuration
    pub coordinator: CoordinatorConfig,
    /// Cluster layout
    pub cluster: ClusterConfig,
    /// Migration engine tuning
    pub migration: MigrationConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Which coordination store backs the cluster metadata
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CoordinatorKind {
    /// Metadata directory on a shared filesystem
    File,
    /// In-process only; metadata is lost on exit
    Memory,
}

/// Coordination store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    pub kind: CoordinatorKind,
    /// Metadata directory for the file store
    pub path: PathBuf,
    /// Product (cluster) name stamped on slots and groups
    pub product: String,
    /// Identity used when taking the cluster lock; generated when absent
    pub lock_holder: Option<String>,
}

/// Cluster layout
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Total number of slots
    pub slot_num: u32,
}

/// How data is moved off the source master
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MigrationMode {
    /// One MIGRATEDB call per batch, cycling through data-type partitions
    Partition,
    /// SCAN for keys and MIGRATE them one at a time
    Keywise,
}

/// Migration engine tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationConfig {
    pub mode: MigrationMode,
    /// Items requested per migration verb call
    pub batch_size: u64,
    /// Timeout passed to the backend with every migration verb, in milliseconds
    pub migrate_timeout_ms: u64,
    /// Overall bound on master resolution, in seconds
    pub master_wait_sec: u64,
    /// First retry delay while waiting for a master, in milliseconds
    pub master_retry_initial_ms: u64,
    /// Retry delay ceiling while waiting for a master, in milliseconds
    pub master_retry_max_ms: u64,
    /// Emit a progress notice every this many steps
    pub progress_every: u64,
    /// Connect timeout for backend nodes, in milliseconds
    pub connect_timeout_ms: u64,
    /// Per-reply timeout on backend connections in milliseconds; 0 disables it
    pub io_timeout_ms: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (error, warn, info, debug, trace)
    pub level: String,
    /// Log format (text, compact)
    pub format: String,
    /// Log file path (optional, stderr otherwise)
    pub file: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            coordinator: CoordinatorConfig {
                kind: CoordinatorKind::File,
                path: PathBuf::from("./cluster-meta"),
                product: "test".to_string(),
                lock_holder: None,
            },
            cluster: ClusterConfig { slot_num: 128 },
            migration: MigrationConfig::default(),
            logging: LoggingConfig {
                level: "info".to_string(),
                format: "text".to_string(),
                file: None,
            },
        }
    }
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            mode: MigrationMode::Partition,
            batch_size: 10,
            migrate_timeout_ms: 30_000,
            master_wait_sec: 100,
            master_retry_initial_ms: 50,
            master_retry_max_ms: 2_000,
            progress_every: 500,
            connect_timeout_ms: 5_000,
            io_timeout_ms: 0,
        }
    }
}

impl MigrationConfig {
    pub fn master_wait(&self) -> Duration {
        Duration::from_secs(self.master_wait_sec)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn io_timeout(&self) -> Option<Duration> {
        (self.io_timeout_ms > 0).then(|| Duration::from_millis(self.io_timeout_ms))
    }
}

impl Config {
    /// Load configuration from TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;

        let config: Config =
            toml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content =
            toml::to_string_pretty(self).map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        fs::write(path, content).map_err(|e| ConfigError::IoError(e.to_string()))?;

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.coordinator.product.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "coordinator product cannot be empty".to_string(),
            ));
        }

        if self.coordinator.kind == CoordinatorKind::File
            && self.coordinator.path.as_os_str().is_empty()
        {
            return Err(ConfigError::ValidationError(
                "coordinator path is required for the file store".to_string(),
            ));
        }

        if self.cluster.slot_num == 0 || self.cluster.slot_num > 16384 {
            return Err(ConfigError::ValidationError(format!(
                "slot_num must be between 1 and 16384, got {}",
                self.cluster.slot_num
            )));
        }

        let migration = &self.migration;
        if migration.batch_size == 0 {
            return Err(ConfigError::ValidationError(
                "batch_size must be greater than 0".to_string(),
            ));
        }

        if migration.master_wait_sec == 0 {
            return Err(ConfigError::ValidationError(
                "master_wait_sec must be greater than 0".to_string(),
            ));
        }

        if migration.master_retry_initial_ms == 0
            || migration.master_retry_initial_ms > migration.master_retry_max_ms
        {
            return Err(ConfigError::ValidationError(
                "master_retry_initial_ms must be in 1..=master_retry_max_ms".to_string(),
            ));
        }

        if migration.progress_every == 0 {
            return Err(ConfigError::ValidationError(
                "progress_every must be greater than 0".to_string(),
            ));
        }

        if migration.connect_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "connect_timeout_ms must be greater than 0".to_string(),
            ));
        }

        match self.logging.level.as_str() {
            "error" | "warn" | "info" | "debug" | "trace" => {}
            _ => {
                return Err(ConfigError::ValidationError(format!(
                    "Invalid log level: {}",
                    self.logging.level
                )))
            }
        }

        match self.logging.format.as_str() {
            "text" | "compact" => {}
            _ => {
                return Err(ConfigError::ValidationError(format!(
                    "Invalid log format: {}",
                    self.logging.format
                )))
            }
        }

        Ok(())
    }

    /// Create example configuration file
    pub fn create_example_config<P: AsRef<Path>>(path: P) -> Result<(), ConfigError> {
        let config = Config {
            coordinator: CoordinatorConfig {
                kind: CoordinatorKind::File,
                path: PathBuf::from("/var/lib/shardctl/meta"),
                product: "prod".to_string(),
                lock_holder: None,
            },
            migration: MigrationConfig {
                io_timeout_ms: 60_000,
                ..Default::default()
            },
            ..Default::default()
        };

        config.save_to_file(path)
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Serialize error: {0}")]
    SerializeError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),
}
