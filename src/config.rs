use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::retry::RetryPolicy;
use crate::sync::SyncSettings;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub api: ApiConfig,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub outbox: OutboxConfig,
  #[serde(default)]
  pub retry: RetryConfig,
  #[serde(default)]
  pub network: NetworkConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
  /// Base URL all API paths are resolved against, e.g. https://api.example.com/v1
  pub base_url: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  pub default_ttl_secs: u64,
  /// Overrides the store location (defaults to the platform data dir)
  pub db_path: Option<PathBuf>,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      default_ttl_secs: 300,
      db_path: None,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OutboxConfig {
  /// Queued writes older than this are dropped instead of replayed
  pub max_age_secs: u64,
  pub max_retries: u32,
  pub maintenance_interval_secs: u64,
}

impl Default for OutboxConfig {
  fn default() -> Self {
    Self {
      max_age_secs: 300,
      max_retries: 3,
      maintenance_interval_secs: 60,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
  pub max_attempts: u32,
  pub base_delay_ms: u64,
  pub max_delay_ms: u64,
  pub backoff_factor: f64,
}

impl Default for RetryConfig {
  fn default() -> Self {
    let policy = RetryPolicy::default();
    Self {
      max_attempts: policy.max_attempts,
      base_delay_ms: policy.base_delay.as_millis() as u64,
      max_delay_ms: policy.max_delay.as_millis() as u64,
      backoff_factor: policy.backoff_factor,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
  /// Path probed to decide whether the API is reachable
  pub probe_path: String,
  pub probe_interval_secs: u64,
}

impl Default for NetworkConfig {
  fn default() -> Self {
    Self {
      probe_path: "health".to_string(),
      probe_interval_secs: 15,
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./rentsync.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/rentsync/config.yaml
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Err(eyre!(
        "No configuration file found. Create one at ~/.config/rentsync/config.yaml\n\
         with at least:\n\n  api:\n    base_url: https://api.example.com/v1"
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("rentsync.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("rentsync").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  pub fn parse(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;
    if config.retry.max_attempts == 0 {
      return Err(eyre!("retry.max_attempts must be at least 1"));
    }
    if config.outbox.maintenance_interval_secs == 0 {
      return Err(eyre!("outbox.maintenance_interval_secs must be at least 1"));
    }
    if config.network.probe_interval_secs == 0 {
      return Err(eyre!("network.probe_interval_secs must be at least 1"));
    }
    Ok(config)
  }

  /// Get the API token from the environment, if set.
  ///
  /// Checks RENTSYNC_API_TOKEN.
  pub fn get_api_token() -> Option<String> {
    std::env::var("RENTSYNC_API_TOKEN")
      .ok()
      .filter(|token| !token.is_empty())
  }

  pub fn probe_url(&self) -> String {
    format!(
      "{}/{}",
      self.api.base_url.trim_end_matches('/'),
      self.network.probe_path.trim_start_matches('/')
    )
  }

  pub fn cache_ttl(&self) -> chrono::Duration {
    chrono::Duration::seconds(self.cache.default_ttl_secs as i64)
  }

  pub fn retry_policy(&self) -> RetryPolicy {
    RetryPolicy {
      max_attempts: self.retry.max_attempts,
      base_delay: Duration::from_millis(self.retry.base_delay_ms),
      max_delay: Duration::from_millis(self.retry.max_delay_ms),
      backoff_factor: self.retry.backoff_factor,
    }
  }

  pub fn sync_settings(&self) -> SyncSettings {
    SyncSettings {
      max_age: chrono::Duration::seconds(self.outbox.max_age_secs as i64),
      retry: self.retry_policy(),
      maintenance_interval: Duration::from_secs(self.outbox.maintenance_interval_secs),
    }
  }
}
