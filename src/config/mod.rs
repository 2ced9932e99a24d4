//! Engine configuration.
//!
//! `EngineConfig` holds the knobs shared by every pipeline an application
//! runs: default queue capacity, cache sizes, schema strictness, the
//! rejected-row limit and the names of the fields appended to error rows.
//! It is stored as TOML.
//!
//! # Example
//!
//! ```ignore
//! use rowflow_rs::config::EngineConfig;
//!
//! let config = EngineConfig::load_or_default("rowflow.toml");
//! let _guard = rowflow_rs::logging::init_logging(&config.logging);
//! ```

use crate::error::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default number of rows buffered on each hop
pub const DEFAULT_QUEUE_CAPACITY: usize = 10_000;

/// Default number of entries in each SQL cache
pub const DEFAULT_CACHE_CAPACITY: usize = 64;

/// Default log filter when `RUST_LOG` is not set
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Engine-wide settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Rows buffered per hop before producers block
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Entries kept in the parsed-query and generated-pipeline caches
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,

    /// Check field names, not just field counts, on every queue put
    #[serde(default)]
    pub safe_mode: bool,

    /// Rejected rows a step may route to its error hop before failing (0 = unlimited)
    #[serde(default)]
    pub max_rejected_rows: u64,

    /// Names of the fields appended to rows sent to an error hop
    #[serde(default)]
    pub error_fields: ErrorFieldNames,

    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_queue_capacity() -> usize {
    DEFAULT_QUEUE_CAPACITY
}

fn default_cache_capacity() -> usize {
    DEFAULT_CACHE_CAPACITY
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            safe_mode: false,
            max_rejected_rows: 0,
            error_fields: ErrorFieldNames::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            EngineError::Config(format!("Failed to read config file {:?}: {}", path, e))
        })?;
        Self::from_toml_str(&content)
            .map_err(|e| e.with_context(format!("Failed to parse config file {:?}", path)))
    }

    /// Parse configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| EngineError::Config(e.to_string()))
    }

    /// Load configuration, returning defaults if any error occurs
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                tracing::debug!("Using default engine config: {}", e);
                Self::default()
            }
        }
    }

    /// Save configuration to disk as TOML
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                EngineError::Config(format!("Failed to create config directory: {}", e))
            })?;
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| EngineError::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, content).map_err(|e| {
            EngineError::Config(format!("Failed to write config file {:?}: {}", path, e))
        })
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    pub fn with_safe_mode(mut self, safe_mode: bool) -> Self {
        self.safe_mode = safe_mode;
        self
    }

    pub fn with_max_rejected_rows(mut self, max: u64) -> Self {
        self.max_rejected_rows = max;
        self
    }
}

/// Field names appended to rejected rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ErrorFieldNames {
    pub count: String,
    pub descriptions: String,
    pub fields: String,
    pub codes: String,
}

impl Default for ErrorFieldNames {
    fn default() -> Self {
        Self {
            count: "error_count".to_string(),
            descriptions: "error_descriptions".to_string(),
            fields: "error_fields".to_string(),
            codes: "error_codes".to_string(),
        }
    }
}

/// Logging output settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is unset (e.g. `"info,rowflow_rs=debug"`)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Also write a daily rolling log file into this directory
    #[serde(default)]
    pub directory: Option<PathBuf>,

    /// Include thread names in log lines
    #[serde(default = "default_true")]
    pub thread_names: bool,
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_true() -> bool {
    true
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            directory: None,
            thread_names: true,
        }
    }
}
