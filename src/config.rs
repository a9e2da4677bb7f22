//! Configuration module for the code-intelligence indexer.
//!
//! Provides a layered configuration system that supports:
//! - Default values
//! - A TOML configuration file (`.cmm-index/settings.toml`)
//! - Environment variable overrides
//!
//! # Environment Variables
//!
//! Environment variables must be prefixed with `CMM_` and use double
//! underscores to separate nested levels:
//! - `CMM_INDEXING__PARALLEL_THREADS=8` sets `indexing.parallel_threads`
//! - `CMM_DATABASE__PATH=/tmp/cmm.db` sets `database.path`
//! - `CMM_LANGUAGE_SERVER__PROBE_TIMEOUT_SECS=10` sets `language_server.probe_timeout_secs`

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Settings {
    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub indexing: IndexingConfig,

    #[serde(default)]
    pub language_server: LanguageServerConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct IndexingConfig {
    /// Glob-style patterns excluded from a `scan` walk, owned by the CLI harness.
    #[serde(default = "default_ignore_patterns")]
    pub ignore_patterns: Vec<String>,

    /// Number of threads used for the extractor's file-level parallelism.
    #[serde(default = "default_parallel_threads")]
    pub parallel_threads: usize,

    /// Maximum entity-hierarchy nesting depth before a subtree is skipped.
    #[serde(default = "default_depth_limit")]
    pub depth_limit: u32,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LanguageServerConfig {
    /// Command used to spawn the language server.
    #[serde(default = "default_language_server_command")]
    pub command: String,

    /// Arguments passed to the language server on spawn.
    #[serde(default)]
    pub args: Vec<String>,

    /// Timeout, in seconds, for the availability probe.
    #[serde(default = "default_probe_timeout_secs")]
    pub probe_timeout_secs: u64,

    /// Timeout, in seconds, for an individual request/response round trip.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    /// Default tracing filter level.
    #[serde(default = "default_log_level")]
    pub default: String,

    /// Per-module level overrides (`EnvFilter` directives without the level).
    #[serde(default)]
    pub modules: HashMap<String, String>,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./cmm.db")
}
fn default_ignore_patterns() -> Vec<String> {
    vec![
        ".git/**".to_string(),
        "__pycache__/**".to_string(),
        "*.pyc".to_string(),
        ".venv/**".to_string(),
    ]
}
fn default_parallel_threads() -> usize {
    num_cpus::get()
}
fn default_depth_limit() -> u32 {
    100
}
fn default_language_server_command() -> String {
    "pyright-langserver".to_string()
}
fn default_probe_timeout_secs() -> u64 {
    5
}
fn default_request_timeout_secs() -> u64 {
    10
}
fn default_log_level() -> String {
    "warn".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            indexing: IndexingConfig::default(),
            language_server: LanguageServerConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            ignore_patterns: default_ignore_patterns(),
            parallel_threads: default_parallel_threads(),
            depth_limit: default_depth_limit(),
        }
    }
}

impl Default for LanguageServerConfig {
    fn default() -> Self {
        Self {
            command: default_language_server_command(),
            args: vec!["--stdio".to_string()],
            probe_timeout_secs: default_probe_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            default: default_log_level(),
            modules: HashMap::new(),
        }
    }
}

impl Settings {
    /// Load configuration from all sources: defaults, discovered TOML file, then env.
    pub fn load() -> Result<Self, figment::Error> {
        let config_path = Self::find_workspace_config()
            .unwrap_or_else(|| PathBuf::from(".cmm-index/settings.toml"));
        Self::load_from(config_path)
    }

    /// Load configuration using an explicit TOML file path.
    pub fn load_from(path: impl AsRef<std::path::Path>) -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("CMM_").map(|key| {
                key.as_str().to_lowercase().replace("__", ".").into()
            }))
            .extract()
    }

    /// Find `.cmm-index/settings.toml` by walking ancestors of the current directory.
    fn find_workspace_config() -> Option<PathBuf> {
        let current = std::env::current_dir().ok()?;
        for ancestor in current.ancestors() {
            let config_dir = ancestor.join(".cmm-index");
            if config_dir.is_dir() {
                return Some(config_dir.join("settings.toml"));
            }
        }
        None
    }

    /// Save current configuration to a TOML file, creating parent directories.
    pub fn save(&self, path: impl AsRef<std::path::Path>) -> Result<(), Box<dyn std::error::Error>> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let toml_string = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_string)?;
        Ok(())
    }

    /// Write a default settings file at `.cmm-index/settings.toml`.
    pub fn init_config_file(force: bool) -> Result<PathBuf, Box<dyn std::error::Error>> {
        let config_path = PathBuf::from(".cmm-index/settings.toml");
        if !force && config_path.exists() {
            return Err("Configuration file already exists. Use --force to overwrite".into());
        }
        Settings::default().save(&config_path)?;
        Ok(config_path)
    }
}
