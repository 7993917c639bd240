//! Configuration for catalog-intake

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default storage directory
pub fn default_storage_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("catalog-intake")
}

/// Configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory holding the SQLite database and config.toml
    #[serde(default = "default_storage_dir")]
    pub storage_dir: PathBuf,

    /// Explicit database file (defaults to `<storage_dir>/catalog.db`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_path: Option<PathBuf>,

    /// HTTP API port
    #[serde(default = "default_http_port")]
    pub http_port: u16,

    /// How long an idempotency key is honoured after its first use
    #[serde(default = "default_idempotency_ttl")]
    pub idempotency_ttl_secs: u64,

    /// Interval between sweeps of expired idempotency keys
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    /// Maximum records accepted by a single bulk request
    #[serde(default = "default_bulk_max_items")]
    pub bulk_max_items: usize,

    /// Maximum raw body size of a bulk request
    #[serde(default = "default_bulk_max_bytes")]
    pub bulk_max_bytes: usize,

    /// Page size used when the client sends no limit
    #[serde(default = "default_page_limit")]
    pub default_page_limit: u32,

    /// Largest page size a client may request
    #[serde(default = "default_max_page_limit")]
    pub max_page_limit: u32,
}

fn default_http_port() -> u16 {
    8080
}

fn default_idempotency_ttl() -> u64 {
    3600
}

fn default_sweep_interval() -> u64 {
    600
}

fn default_bulk_max_items() -> usize {
    1000
}

fn default_bulk_max_bytes() -> usize {
    10 * 1024 * 1024
}

fn default_page_limit() -> u32 {
    20
}

fn default_max_page_limit() -> u32 {
    100
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage_dir: default_storage_dir(),
            database_path: None,
            http_port: default_http_port(),
            idempotency_ttl_secs: default_idempotency_ttl(),
            sweep_interval_secs: default_sweep_interval(),
            bulk_max_items: default_bulk_max_items(),
            bulk_max_bytes: default_bulk_max_bytes(),
            default_page_limit: default_page_limit(),
            max_page_limit: default_max_page_limit(),
        }
    }
}

impl Config {
    /// Load config from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, std::io::Error> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }

    /// Save config to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), std::io::Error> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, content)
    }

    /// Get SQLite database path
    pub fn database_path(&self) -> PathBuf {
        self.database_path
            .clone()
            .unwrap_or_else(|| self.storage_dir.join("catalog.db"))
    }

    /// Get config file path
    pub fn config_path(&self) -> PathBuf {
        self.storage_dir.join("config.toml")
    }

    pub fn idempotency_ttl(&self) -> Duration {
        Duration::from_secs(self.idempotency_ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }

    pub fn bulk_limits(&self) -> BulkLimits {
        BulkLimits {
            max_items: self.bulk_max_items,
            max_bytes: self.bulk_max_bytes,
        }
    }

    pub fn page_limits(&self) -> PageLimits {
        PageLimits {
            default_limit: self.default_page_limit,
            max_limit: self.max_page_limit,
        }
    }
}

/// Anchor limits for bulk ingestion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BulkLimits {
    pub max_items: usize,
    pub max_bytes: usize,
}

impl Default for BulkLimits {
    fn default() -> Self {
        Self {
            max_items: default_bulk_max_items(),
            max_bytes: default_bulk_max_bytes(),
        }
    }
}

/// Page size bounds for list requests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageLimits {
    pub default_limit: u32,
    pub max_limit: u32,
}

impl Default for PageLimits {
    fn default() -> Self {
        Self {
            default_limit: default_page_limit(),
            max_limit: default_max_page_limit(),
        }
    }
}
