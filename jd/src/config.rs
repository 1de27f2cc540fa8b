//! JobDaemon configuration types and loading

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Sentinel database path for a private in-memory SQLite database
pub const MEMORY_DATABASE: &str = ":memory:";

/// Longest registration lifetime accepted (one week)
pub const MAX_REGISTRY_TTL_SECS: u64 = 7 * 24 * 60 * 60;

/// Main JobDaemon configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Log level (trace, debug, info, warn, error)
    #[serde(rename = "log-level")]
    pub log_level: Option<String>,

    /// Service identity used for registry registration
    pub service: ServiceConfig,

    /// Job database configuration
    pub database: DatabaseConfig,

    /// Service registry configuration
    pub registry: RegistryConfig,

    /// RPC transport configuration
    pub rpc: RpcConfig,

    /// Scheduling loop configuration
    pub scheduler: SchedulerConfig,

    /// Span sink configuration
    pub tracing: TracingConfig,
}

/// Configuration problems detected by [`Config::validate`]
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("service name must not be empty")]
    EmptyServiceName,

    #[error("database pool-size must be at least 1")]
    ZeroPoolSize,

    #[error("registry interval-secs must be greater than zero")]
    ZeroRegistryInterval,

    #[error("registry ttl-secs ({ttl}) must not exceed {max}")]
    RegistryTtlTooLong { ttl: u64, max: u64 },

    #[error("registry interval-secs ({interval}) must be shorter than ttl-secs ({ttl})")]
    RegistryTiming { interval: u64, ttl: u64 },

    #[error("scheduler tick-ms must be greater than zero")]
    ZeroTick,
}

impl Config {
    /// Validate configuration before use
    ///
    /// Called at the start of the service lifecycle so a bad config fails
    /// before any dependency is opened.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.service.name.trim().is_empty() {
            return Err(ConfigError::EmptyServiceName);
        }
        if self.database.pool_size == 0 {
            return Err(ConfigError::ZeroPoolSize);
        }
        if self.registry.interval_secs == 0 {
            return Err(ConfigError::ZeroRegistryInterval);
        }
        if self.registry.ttl_secs > MAX_REGISTRY_TTL_SECS {
            return Err(ConfigError::RegistryTtlTooLong {
                ttl: self.registry.ttl_secs,
                max: MAX_REGISTRY_TTL_SECS,
            });
        }
        if self.registry.interval_secs >= self.registry.ttl_secs {
            return Err(ConfigError::RegistryTiming {
                interval: self.registry.interval_secs,
                ttl: self.registry.ttl_secs,
            });
        }
        if self.scheduler.tick_ms == 0 {
            return Err(ConfigError::ZeroTick);
        }
        Ok(())
    }

    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try project-local config: .jobdaemon.yml
        let local_config = PathBuf::from(".jobdaemon.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        // Try user config: ~/.config/jobdaemon/jobdaemon.yml
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("jobdaemon").join("jobdaemon.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Read just the log level, before logging is initialized
    ///
    /// Errors are ignored here; the full load reports them once logging works.
    pub fn load_log_level(config_path: Option<&PathBuf>) -> Option<String> {
        Self::load(config_path).ok().and_then(|c| c.log_level)
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }
}

/// Base directory for persistent daemon data (~/.local/share/jobdaemon on Linux)
pub fn data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("jobdaemon")
}

/// Base directory for runtime files (sockets, PID file)
pub fn runtime_dir() -> PathBuf {
    dirs::runtime_dir()
        .or_else(dirs::data_local_dir)
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("jobdaemon")
}

/// Service identity
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Name the service registers under
    pub name: String,

    /// Version advertised in the registry
    pub version: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: "jobdaemon.srv.job".to_string(),
            version: "latest".to_string(),
        }
    }
}

/// Job database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite database file, or `:memory:`
    pub path: PathBuf,

    /// Number of pooled connections
    #[serde(rename = "pool-size")]
    pub pool_size: usize,

    /// How long a connection waits on a locked database, in milliseconds
    #[serde(rename = "busy-timeout-ms")]
    pub busy_timeout_ms: u64,
}

impl DatabaseConfig {
    /// Whether this points at a private in-memory database
    pub fn is_memory(&self) -> bool {
        self.path.as_os_str() == MEMORY_DATABASE
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: data_dir().join("jobs.db"),
            pool_size: 4,
            busy_timeout_ms: 5_000,
        }
    }
}

/// Service registry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Directory holding registration records
    pub dir: PathBuf,

    /// Lifetime of a registration without renewal
    #[serde(rename = "ttl-secs")]
    pub ttl_secs: u64,

    /// Renewal interval
    #[serde(rename = "interval-secs")]
    pub interval_secs: u64,
}

impl RegistryConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            dir: data_dir().join("registry"),
            ttl_secs: 30,
            interval_secs: 15,
        }
    }
}

/// RPC transport configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcConfig {
    /// Unix domain socket the job service listens on
    #[serde(rename = "socket-path")]
    pub socket_path: PathBuf,

    /// How long in-flight requests may run after shutdown begins
    #[serde(rename = "drain-timeout-ms")]
    pub drain_timeout_ms: u64,
}

impl RpcConfig {
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            socket_path: runtime_dir().join("jobd.sock"),
            drain_timeout_ms: 5_000,
        }
    }
}

/// Scheduling loop configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Interval between due-job scans, in milliseconds
    #[serde(rename = "tick-ms")]
    pub tick_ms: u64,

    /// Maximum jobs dispatched per tick
    #[serde(rename = "batch-size")]
    pub batch_size: usize,
}

impl SchedulerConfig {
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_ms: 1_000,
            batch_size: 100,
        }
    }
}

/// Span sink configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TracingConfig {
    /// JSONL file receiving finished spans; spans only reach the log when unset
    #[serde(rename = "spans-file")]
    pub spans_file: Option<PathBuf>,
}
