//! Configuration for the moulinette job engine.
//!
//! The engine reads a single JSON file at `~/.moulinette/config.json`.
//!
//! # Configuration Priority
//!
//! 1. Environment variables (MOULINETTE_* prefix)
//! 2. Explicit config file values
//! 3. Default values
//!
//! # Environment Variable Mapping
//!
//! - `MOULINETTE_ROOT_DIRECTORY` → root_directory
//! - `MOULINETTE_CACHE_DIRECTORY` → cache_directory
//! - `MOULINETTE_JOB_TIMEOUT` → job_timeout (seconds)
//! - `MOULINETTE_BASE_IMAGE` → base_image
//! - `MOULINETTE_ALWAYS_PULL` → always_pull
//! - `MOULINETTE_LOG_LEVEL` → logging.level

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Get the configuration directory path.
pub fn config_dir() -> PathBuf {
    directories::UserDirs::new().map_or_else(
        || PathBuf::from(".moulinette"),
        |dirs| dirs.home_dir().join(".moulinette"),
    )
}

/// Get the configuration file path.
pub fn config_path() -> PathBuf {
    config_dir().join("config.json")
}

/// Expand a leading `~` in a configured path.
fn expand_path(path: &Path) -> PathBuf {
    let raw = path.to_string_lossy();
    PathBuf::from(shellexpand::tilde(&raw).into_owned())
}

// ============================================================================
// Secondary Docker daemon
// ============================================================================

/// Settings for the per-job Docker daemon started for blueprints that need
/// Docker access from inside their container.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// CIDR address assigned to the private bridge, e.g. `10.254.0.1/24`
    #[serde(default = "default_network_bridge_mask")]
    pub network_bridge_mask: String,

    /// DNS servers handed to the daemon (empty: daemon default)
    #[serde(default)]
    pub dns: Vec<String>,

    /// How long to wait for the daemon socket to answer
    #[serde(default = "default_max_wait_time", with = "humantime_serde")]
    pub max_wait_time: Duration,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            network_bridge_mask: default_network_bridge_mask(),
            dns: Vec::new(),
            max_wait_time: default_max_wait_time(),
        }
    }
}

fn default_network_bridge_mask() -> String {
    "10.254.0.1/24".into()
}

fn default_max_wait_time() -> Duration {
    Duration::from_secs(30)
}

// ============================================================================
// Logging
// ============================================================================

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Base level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,

    /// "json" for structured output, anything else for human-readable
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".into()
}

fn default_log_format() -> String {
    "pretty".into()
}

// ============================================================================
// Root configuration
// ============================================================================

/// Engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory under which every job gets its own workspace
    #[serde(default = "default_root_directory")]
    pub root_directory: PathBuf,

    /// Directory holding cached fetcher output
    #[serde(default = "default_cache_directory")]
    pub cache_directory: PathBuf,

    /// Wall-clock limit for the inspection container
    #[serde(default = "default_job_timeout", with = "humantime_serde")]
    pub job_timeout: Duration,

    /// Always pull base images when building job environments
    #[serde(default)]
    pub always_pull: bool,

    /// Base image every job environment is built from
    #[serde(default = "default_base_image")]
    pub base_image: String,

    /// Docker client binary
    #[serde(default = "default_docker_binary")]
    pub docker_binary: String,

    /// Docker daemon binary, used for secondary daemons
    #[serde(default = "default_dockerd_binary")]
    pub dockerd_binary: String,

    #[serde(default)]
    pub additional_docker_daemon: DaemonConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            root_directory: default_root_directory(),
            cache_directory: default_cache_directory(),
            job_timeout: default_job_timeout(),
            always_pull: false,
            base_image: default_base_image(),
            docker_binary: default_docker_binary(),
            dockerd_binary: default_dockerd_binary(),
            additional_docker_daemon: DaemonConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

fn default_root_directory() -> PathBuf {
    config_dir().join("jobs")
}

fn default_cache_directory() -> PathBuf {
    config_dir().join("cache")
}

fn default_job_timeout() -> Duration {
    Duration::from_secs(300)
}

fn default_base_image() -> String {
    "python:3.11-slim".into()
}

fn default_docker_binary() -> String {
    "docker".into()
}

fn default_dockerd_binary() -> String {
    "dockerd".into()
}

impl Config {
    /// Load configuration from the default path, falling back to defaults
    /// when the file does not exist.
    pub fn load() -> Result<Self> {
        let path = config_path();
        if !path.exists() {
            tracing::info!("Config file not found, using defaults");
            return Ok(Self::default());
        }
        Self::load_from(&path)
    }

    /// Load configuration from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;

        let mut config: Self = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config from {}", path.display()))?;
        config.expand_paths();
        Ok(config)
    }

    /// Load configuration (from `path` if given) and apply environment overrides.
    pub fn load_with_env(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::load_from(path)?,
            None => Self::load()?,
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(dir) = std::env::var("MOULINETTE_ROOT_DIRECTORY") {
            self.root_directory = PathBuf::from(dir);
        }
        if let Ok(dir) = std::env::var("MOULINETTE_CACHE_DIRECTORY") {
            self.cache_directory = PathBuf::from(dir);
        }
        if let Ok(raw) = std::env::var("MOULINETTE_JOB_TIMEOUT") {
            match parse_duration(&raw) {
                Some(timeout) => self.job_timeout = timeout,
                None => tracing::warn!(
                    value = %raw,
                    "Ignoring MOULINETTE_JOB_TIMEOUT, expected a duration like \"5m\" or seconds"
                ),
            }
        }
        if let Ok(image) = std::env::var("MOULINETTE_BASE_IMAGE") {
            self.base_image = image;
        }
        if let Ok(flag) = std::env::var("MOULINETTE_ALWAYS_PULL") {
            self.always_pull = matches!(flag.as_str(), "1" | "true" | "yes");
        }
        if let Ok(level) = std::env::var("MOULINETTE_LOG_LEVEL") {
            self.logging.level = level;
        }
        self.expand_paths();
    }

    fn expand_paths(&mut self) {
        self.root_directory = expand_path(&self.root_directory);
        self.cache_directory = expand_path(&self.cache_directory);
    }

    /// Save configuration to the given path.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create config directory {}", dir.display()))?;
        }

        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)
            .with_context(|| format!("Failed to write config to {}", path.display()))
    }
}

/// Parse a humantime duration (`"90s"`, `"5m"`); a bare integer is seconds.
fn parse_duration(raw: &str) -> Option<Duration> {
    let raw = raw.trim();
    if let Ok(secs) = raw.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    humantime::parse_duration(raw).ok()
}
