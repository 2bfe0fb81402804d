//! Tracer configuration.

use crate::error::ConfigError;
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "http://localhost:3000";
const DEFAULT_MAX_DISK_SIZE: u64 = 500 * 1024 * 1024;
const DEFAULT_MAX_MEMORY_SIZE: u64 = 50 * 1024 * 1024;
const DEFAULT_BATCH_INTERVAL_MS: u64 = 1000;
const DEFAULT_MAX_BATCH_SIZE: usize = 50;
const DEFAULT_WORKER_POOL_SIZE: usize = 2;

/// Immutable, process-lifetime configuration for a [`crate::Tracer`].
#[derive(Clone, Debug)]
pub struct Config {
    pub api_key: String,
    pub project_id: String,
    pub enabled: bool,
    pub debug: bool,
    pub base_url: String,
    pub temp_dir: Option<PathBuf>,
    pub max_disk_size: u64,
    pub max_memory_size: u64,
    pub batch_interval: Duration,
    pub max_batch_size: usize,
    pub worker_pool_size: usize,
}

impl Config {
    /// Start building a configuration. `api_key` and `project_id` are the
    /// only required fields; everything else takes sensible defaults.
    pub fn builder(api_key: impl Into<String>, project_id: impl Into<String>) -> ConfigBuilder {
        ConfigBuilder::new(api_key.into(), project_id.into())
    }

    /// The directory a `DiskSpool` should use, falling back to a
    /// dedicated subdirectory of the system temp dir when no explicit
    /// `temp_dir` was set.
    pub fn resolve_temp_dir(&self) -> PathBuf {
        self.temp_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("xray"))
    }
}

/// Builder for [`Config`]: `#[must_use]`, fluent setters, fallible
/// `.build()`.
#[must_use = "builders do nothing unless you call .build()"]
pub struct ConfigBuilder {
    api_key: String,
    project_id: String,
    enabled: bool,
    debug: bool,
    base_url: Option<String>,
    temp_dir: Option<PathBuf>,
    max_disk_size: u64,
    max_memory_size: u64,
    batch_interval: Duration,
    max_batch_size: usize,
    worker_pool_size: usize,
}

impl ConfigBuilder {
    fn new(api_key: String, project_id: String) -> Self {
        Self {
            api_key,
            project_id,
            enabled: true,
            debug: false,
            base_url: None,
            temp_dir: None,
            max_disk_size: DEFAULT_MAX_DISK_SIZE,
            max_memory_size: DEFAULT_MAX_MEMORY_SIZE,
            batch_interval: Duration::from_millis(DEFAULT_BATCH_INTERVAL_MS),
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
            worker_pool_size: DEFAULT_WORKER_POOL_SIZE,
        }
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = Some(dir.into());
        self
    }

    pub fn max_disk_size(mut self, bytes: u64) -> Self {
        self.max_disk_size = bytes;
        self
    }

    pub fn max_memory_size(mut self, bytes: u64) -> Self {
        self.max_memory_size = bytes;
        self
    }

    pub fn batch_interval(mut self, interval: Duration) -> Self {
        self.batch_interval = interval;
        self
    }

    pub fn max_batch_size(mut self, size: usize) -> Self {
        self.max_batch_size = size;
        self
    }

    pub fn worker_pool_size(mut self, size: usize) -> Self {
        self.worker_pool_size = size;
        self
    }

    /// Validate required fields and finish building.
    ///
    /// # Errors
    /// Returns [`ConfigError::MissingApiKey`] / [`ConfigError::MissingProjectId`]
    /// if either required field is empty. This is the one place in the
    /// crate that is allowed to raise: it runs before any user-facing
    /// method call exists.
    pub fn build(self) -> Result<Config, ConfigError> {
        if self.api_key.is_empty() {
            return Err(ConfigError::MissingApiKey);
        }
        if self.project_id.is_empty() {
            return Err(ConfigError::MissingProjectId);
        }

        let base_url = self
            .base_url
            .or_else(|| std::env::var("XRAY_BASE_URL").ok())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());

        Ok(Config {
            api_key: self.api_key,
            project_id: self.project_id,
            enabled: self.enabled,
            debug: self.debug,
            base_url,
            temp_dir: self.temp_dir,
            max_disk_size: self.max_disk_size,
            max_memory_size: self.max_memory_size,
            batch_interval: self.batch_interval,
            max_batch_size: self.max_batch_size,
            worker_pool_size: self.worker_pool_size,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_missing_required_fields() {
        assert!(matches!(
            Config::builder("", "p").build(),
            Err(ConfigError::MissingApiKey)
        ));
        assert!(matches!(
            Config::builder("k", "").build(),
            Err(ConfigError::MissingProjectId)
        ));
    }

    #[test]
    fn applies_default_config_values() {
        let config = Config::builder("k", "p").build().unwrap();
        assert!(config.enabled);
        assert!(!config.debug);
        assert_eq!(config.max_disk_size, DEFAULT_MAX_DISK_SIZE);
        assert_eq!(config.max_memory_size, DEFAULT_MAX_MEMORY_SIZE);
        assert_eq!(config.max_batch_size, DEFAULT_MAX_BATCH_SIZE);
        assert_eq!(config.worker_pool_size, DEFAULT_WORKER_POOL_SIZE);
    }

    #[test]
    fn base_url_falls_back_to_default_when_env_unset() {
        std::env::remove_var("XRAY_BASE_URL");
        let config = Config::builder("k", "p").build().unwrap();
        assert_eq!(config.base_url, DEFAULT_BASE_URL);
    }
}
