use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::enrich::DEFAULT_API_BASE;
use crate::error::{AppError, Result};
use crate::services::DEFAULT_MAX_BODY_BYTES;
use crate::worker::{DEFAULT_BATCH_SIZE, DEFAULT_INTERVAL_SECS};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_db_path")]
    pub db_path: String,

    pub youtube_api_key: Option<String>,
    pub claude_api_key: Option<String>,

    #[serde(default = "default_youtube_api_base")]
    pub youtube_api_base: String,

    #[serde(default = "default_worker_interval")]
    pub worker_interval_secs: u64,

    #[serde(default = "default_worker_batch_size")]
    pub worker_batch_size: usize,

    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_secs: u64,

    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,

    /// Extra CIDR ranges the fetcher refuses, on top of the private ranges.
    #[serde(default)]
    pub blocked_cidrs: Vec<String>,
}

fn default_db_path() -> String {
    let data_dir = dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("learnd");
    std::fs::create_dir_all(&data_dir).ok();
    data_dir.join("learnd.db").to_string_lossy().to_string()
}

fn default_youtube_api_base() -> String {
    DEFAULT_API_BASE.to_string()
}

fn default_worker_interval() -> u64 {
    DEFAULT_INTERVAL_SECS
}

fn default_worker_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

fn default_fetch_timeout() -> u64 {
    15
}

fn default_max_body_bytes() -> usize {
    DEFAULT_MAX_BODY_BYTES
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            youtube_api_key: None,
            claude_api_key: None,
            youtube_api_base: default_youtube_api_base(),
            worker_interval_secs: default_worker_interval(),
            worker_batch_size: default_worker_batch_size(),
            fetch_timeout_secs: default_fetch_timeout(),
            max_body_bytes: default_max_body_bytes(),
            blocked_cidrs: Vec::new(),
        }
    }
}

impl Config {
    /// Load the config file (writing defaults if missing), then apply environment overrides.
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        let mut config = if config_path.exists() {
            Self::load_from(&config_path)?
        } else {
            let config = Config::default();
            config.save_to(&config_path)?;
            config
        };

        config.apply_env(|name| std::env::var(name).ok())?;
        Ok(config)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&content)?;
        config.fill_zero_defaults();
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self).map_err(|e| AppError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("learnd")
            .join("config.toml")
    }

    /// Override keys and the database path from the environment.
    /// `<NAME>_FILE` (trimmed file contents) wins over `<NAME>`.
    fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(key) = env_value(&lookup, "YOUTUBE_API_KEY")? {
            self.youtube_api_key = Some(key);
        }
        if let Some(key) = env_value(&lookup, "ANTHROPIC_API_KEY")? {
            self.claude_api_key = Some(key);
        }
        if let Some(path) = env_value(&lookup, "LEARND_DB_PATH")? {
            self.db_path = path;
        }
        Ok(())
    }

    fn fill_zero_defaults(&mut self) {
        if self.worker_interval_secs == 0 {
            self.worker_interval_secs = default_worker_interval();
        }
        if self.worker_batch_size == 0 {
            self.worker_batch_size = default_worker_batch_size();
        }
    }

    pub fn worker_interval(&self) -> Duration {
        Duration::from_secs(self.worker_interval_secs)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn parsed_blocked_cidrs(&self) -> Result<Vec<IpNet>> {
        self.blocked_cidrs
            .iter()
            .map(|cidr| {
                cidr.trim()
                    .parse::<IpNet>()
                    .map_err(|e| AppError::Config(format!("blocked_cidrs entry {}: {}", cidr, e)))
            })
            .collect()
    }
}

fn env_value<F>(lookup: &F, name: &str) -> Result<Option<String>>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(path) = lookup(&format!("{}_FILE", name)).filter(|p| !p.trim().is_empty()) {
        let content = std::fs::read_to_string(path.trim())
            .map_err(|e| AppError::Config(format!("reading {}_FILE: {}", name, e)))?;
        let value = content.trim();
        if !value.is_empty() {
            return Ok(Some(value.to_string()));
        }
    }
    Ok(lookup(name)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty()))
}
