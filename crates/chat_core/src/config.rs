use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::paths::config_json_path;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("Failed to parse JSON config: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Failed to parse TOML config: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Process configuration for outgoing chat requests.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub api_base: Option<String>,
    #[serde(default)]
    pub http_proxy: String,
    #[serde(default)]
    pub https_proxy: String,
    /// Extra headers sent with every request.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub stream_timeout_ms: Option<u64>,
    #[serde(default)]
    pub retry_interval_ms: Option<u64>,
    #[serde(default)]
    pub retry_times: Option<u32>,
    #[serde(default)]
    pub manual: bool,
}

const CONFIG_FILE_PATH: &str = "config.toml";

fn parse_bool_env(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "y" | "on"
    )
}

fn parse_number_env<T: std::str::FromStr>(name: &str, value: &str) -> Option<T> {
    match value.trim().parse::<T>() {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            log::warn!("Ignoring {name}={value:?}: not a valid number");
            None
        }
    }
}

impl Config {
    /// Load from `~/.xchat/config.json`, falling back to `./config.toml`,
    /// then apply environment overrides.
    pub fn new() -> Self {
        let mut config = Self::load_files(&config_json_path(), Path::new(CONFIG_FILE_PATH));
        config.apply_env_with(|name| std::env::var(name).ok());
        config
    }

    /// The first file that exists and parses wins; errors are logged and skipped.
    pub fn load_files(json_path: &Path, toml_path: &Path) -> Self {
        if json_path.exists() {
            match Self::from_json_file(json_path) {
                Ok(config) => return config,
                Err(err) => log::warn!("{err}"),
            }
        }

        if toml_path.exists() {
            match Self::from_toml_file(toml_path) {
                Ok(config) => return config,
                Err(err) => log::warn!("{err}"),
            }
        }

        Self::default()
    }

    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let content = read(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let content = read(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Override fields from environment variables, looked up through `lookup`.
    pub fn apply_env_with(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(api_base) = lookup("API_BASE") {
            self.api_base = Some(api_base);
        }
        if let Some(http_proxy) = lookup("HTTP_PROXY") {
            self.http_proxy = http_proxy;
        }
        if let Some(https_proxy) = lookup("HTTPS_PROXY") {
            self.https_proxy = https_proxy;
        }
        if let Some(value) = lookup("CHAT_TIMEOUT_MS") {
            if let Some(ms) = parse_number_env("CHAT_TIMEOUT_MS", &value) {
                self.timeout_ms = Some(ms);
            }
        }
        if let Some(value) = lookup("CHAT_STREAM_TIMEOUT_MS") {
            if let Some(ms) = parse_number_env("CHAT_STREAM_TIMEOUT_MS", &value) {
                self.stream_timeout_ms = Some(ms);
            }
        }
        if let Some(value) = lookup("CHAT_RETRY_INTERVAL_MS") {
            if let Some(ms) = parse_number_env("CHAT_RETRY_INTERVAL_MS", &value) {
                self.retry_interval_ms = Some(ms);
            }
        }
        if let Some(value) = lookup("CHAT_RETRY_TIMES") {
            if let Some(times) = parse_number_env("CHAT_RETRY_TIMES", &value) {
                self.retry_times = Some(times);
            }
        }
        if let Some(manual) = lookup("CHAT_MANUAL") {
            self.manual = parse_bool_env(&manual);
        }
    }
}

fn read(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })
}
