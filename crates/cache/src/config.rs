//! Cache configuration for memory budget, slot floor, and loader threads.
//!
//! Configuration can be loaded from a file, environment variables,
//! or created programmatically.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Default memory budget in megabytes
pub const DEFAULT_MEMORY_BUDGET_MB: usize = 5000;

/// Default minimum number of slots, regardless of the budget
pub const DEFAULT_MIN_SLOTS: usize = 5;

/// Configuration for the image cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// Memory budget for slot buffers in bytes
    pub memory_budget: usize,
    /// Lower bound on the slot count, applied before capping at the view count
    pub min_slots: usize,
    /// Number of threads serving asynchronous loads
    pub worker_threads: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            memory_budget: DEFAULT_MEMORY_BUDGET_MB * 1024 * 1024,
            min_slots: DEFAULT_MIN_SLOTS,
            worker_threads: default_worker_threads(),
        }
    }
}

impl CacheConfig {
    /// Creates a new cache configuration.
    ///
    /// # Arguments
    /// * `budget_mb` - Memory budget in megabytes
    /// * `min_slots` - Minimum slot count
    pub fn new(budget_mb: usize, min_slots: usize) -> Self {
        Self {
            memory_budget: budget_mb.saturating_mul(1024 * 1024),
            min_slots,
            ..Default::default()
        }
    }

    /// Sets the memory budget in megabytes.
    pub fn with_budget_mb(mut self, mb: usize) -> Self {
        self.memory_budget = mb.saturating_mul(1024 * 1024);
        self
    }

    /// Sets the memory budget in bytes.
    pub fn with_budget_bytes(mut self, bytes: usize) -> Self {
        self.memory_budget = bytes;
        self
    }

    /// Sets the minimum slot count.
    pub fn with_min_slots(mut self, min_slots: usize) -> Self {
        self.min_slots = min_slots;
        self
    }

    /// Sets the number of asynchronous loader threads (at least one).
    pub fn with_worker_threads(mut self, threads: usize) -> Self {
        self.worker_threads = threads.max(1);
        self
    }

    /// Returns the default configuration file location for the current platform.
    ///
    /// - macOS: ~/Library/Application Support/mvs-image-cache/cache.toml
    /// - Linux: ~/.config/mvs-image-cache/cache.toml
    /// - Windows: %APPDATA%\mvs-image-cache\cache.toml
    pub fn default_config_path() -> PathBuf {
        if let Some(config_dir) = dirs::config_dir() {
            config_dir.join("mvs-image-cache").join("cache.toml")
        } else {
            PathBuf::from("mvs-image-cache.toml")
        }
    }

    /// Loads configuration from environment variables.
    ///
    /// Environment variables:
    /// - `MVS_IMAGE_CACHE_MB`: memory budget in MB (default: 5000)
    /// - `MVS_IMAGE_CACHE_MIN_SLOTS`: minimum slot count (default: 5)
    /// - `MVS_IMAGE_CACHE_WORKERS`: loader threads (default: logical CPUs)
    ///
    /// # Errors
    /// Returns an error if any environment variable contains an invalid value.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("MVS_IMAGE_CACHE_MB") {
            config.memory_budget = parse_megabytes("MVS_IMAGE_CACHE_MB", &val)?;
        }

        if let Ok(val) = std::env::var("MVS_IMAGE_CACHE_MIN_SLOTS") {
            config.min_slots = parse_usize("MVS_IMAGE_CACHE_MIN_SLOTS", &val)?;
        }

        if let Ok(val) = std::env::var("MVS_IMAGE_CACHE_WORKERS") {
            config.worker_threads = parse_usize("MVS_IMAGE_CACHE_WORKERS", &val)?.max(1);
        }

        Ok(config)
    }

    /// Loads configuration from a TOML file.
    ///
    /// Expected file format:
    /// ```toml
    /// memory_budget_mb = 5000
    /// min_slots = 5
    /// worker_threads = 8
    /// ```
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path.as_ref())?;

        Self::from_toml(&contents)
    }

    /// Parses configuration from a TOML string.
    fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        for line in toml_str.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            if let Some((key, value)) = line.split_once('=') {
                let key = key.trim();
                let value = value.trim().trim_matches('"');

                match key {
                    "memory_budget_mb" => {
                        config.memory_budget = parse_megabytes(key, value)?;
                    }
                    "min_slots" => {
                        config.min_slots = parse_usize(key, value)?;
                    }
                    "worker_threads" => {
                        config.worker_threads = parse_usize(key, value)?.max(1);
                    }
                    _ => {} // Ignore unknown keys
                }
            }
        }

        Ok(config)
    }

    /// Saves configuration to a TOML file, creating parent directories.
    ///
    /// # Errors
    /// Returns an error if the file cannot be written.
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, self.to_toml())?;
        Ok(())
    }

    /// Converts configuration to TOML format.
    fn to_toml(&self) -> String {
        format!(
            "# Image cache configuration\n\
             memory_budget_mb = {}\n\
             min_slots = {}\n\
             worker_threads = {}\n",
            self.memory_budget_mb(),
            self.min_slots,
            self.worker_threads
        )
    }

    /// Returns the memory budget in megabytes.
    pub fn memory_budget_mb(&self) -> usize {
        self.memory_budget / (1024 * 1024)
    }
}

fn parse_usize(key: &str, value: &str) -> Result<usize, ConfigError> {
    value
        .trim()
        .parse::<usize>()
        .map_err(|_| ConfigError::InvalidValue(key.to_string()))
}

/// Parse a budget in megabytes into bytes
fn parse_megabytes(key: &str, value: &str) -> Result<usize, ConfigError> {
    parse_usize(key, value)?
        .checked_mul(1024 * 1024)
        .ok_or_else(|| ConfigError::InvalidValue(key.to_string()))
}

fn default_worker_threads() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Invalid value for a configuration parameter
    #[error("Invalid value for configuration key: {0}")]
    InvalidValue(String),
    /// I/O error reading or writing configuration file
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}
