use crate::error::ConfigError;
use crate::import::{DEFAULT_QUEUE_CAPACITY, DEFAULT_WORKERS};
use crate::layer::Pipeline;
use crate::refresh::{DEFAULT_CUTOFF, DEFAULT_REFRESH_INTERVAL};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_PORT: u16 = 2055;
pub const DEFAULT_DATABASE: &str = "~/.config/flowmap/flowmap.db";

/// Top-level configuration, read from a JSON file. Every field has a default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// SQLite database path; `~` is expanded by the caller.
    #[serde(default = "default_database")]
    pub database: String,

    #[serde(default)]
    pub listen: ListenConfig,

    #[serde(default)]
    pub import: ImportConfig,

    #[serde(default)]
    pub refresh: RefreshConfig,

    /// Graph processing layers, run in order.
    #[serde(default)]
    pub layers: Pipeline,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListenConfig {
    #[serde(default = "default_bind")]
    pub bind: IpAddr,

    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportConfig {
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Flows waiting for a worker beyond this are dropped.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    /// Names older than this are looked up again.
    #[serde(default = "default_cutoff_secs")]
    pub cutoff_secs: u64,
}

fn default_database() -> String {
    DEFAULT_DATABASE.to_string()
}

fn default_bind() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_workers() -> usize {
    DEFAULT_WORKERS
}

fn default_queue_capacity() -> usize {
    DEFAULT_QUEUE_CAPACITY
}

fn default_true() -> bool {
    true
}

fn default_interval_secs() -> u64 {
    DEFAULT_REFRESH_INTERVAL.as_secs()
}

fn default_cutoff_secs() -> u64 {
    DEFAULT_CUTOFF.as_secs()
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
        }
    }
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: default_interval_secs(),
            cutoff_secs: default_cutoff_secs(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: default_database(),
            listen: ListenConfig::default(),
            import: ImportConfig::default(),
            refresh: RefreshConfig::default(),
            layers: Pipeline::default(),
        }
    }
}

impl ListenConfig {
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind, self.port)
    }
}

impl RefreshConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn cutoff(&self) -> Duration {
        Duration::from_secs(self.cutoff_secs)
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let data = std::fs::read_to_string(path)?;
        Self::from_json(&data)
    }

    pub fn from_json(data: &str) -> Result<Self, ConfigError> {
        let cfg: Config = serde_json::from_str(data)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database.trim().is_empty() {
            return Err(ConfigError::Invalid("database must not be empty".to_string()));
        }

        if self.import.workers == 0 {
            return Err(ConfigError::Invalid("import.workers must be at least 1".to_string()));
        }

        if self.import.queue_capacity == 0 {
            return Err(ConfigError::Invalid(
                "import.queue_capacity must be at least 1".to_string(),
            ));
        }

        if self.refresh.enabled && self.refresh.interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "refresh.interval_secs must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}
