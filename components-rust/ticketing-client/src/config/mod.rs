use crate::activity::template::PlaceholderPolicy;
use crate::cache::DEFAULT_FETCH_TIMEOUT;
use serde::Deserialize;
use std::fs;
use std::io;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_API_URL: &str = "http://localhost:8080/api";
pub const DEFAULT_STORAGE_DIR: &str = ".ticketing";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {name}: {value:?}")]
    InvalidValue { name: &'static str, value: String },
    #[error("read {path}: {source}")]
    Read { path: String, source: io::Error },
    #[error("parse {path}: {source}")]
    Parse {
        path: String,
        source: serde_json::Error,
    },
}

/// Client configuration sourced from environment variables.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    pub api_base_url: String,
    pub auth_token: Option<String>,
    pub fetch_timeout: Duration,
    pub storage_dir: PathBuf,
    pub placeholder_policy: PlaceholderPolicy,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ClientConfigOverride {
    api_base_url: Option<String>,
    auth_token: Option<String>,
    fetch_timeout_ms: Option<u64>,
    storage_dir: Option<PathBuf>,
    placeholder_policy: Option<PlaceholderPolicy>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            api_base_url: DEFAULT_API_URL.to_string(),
            auth_token: None,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            storage_dir: PathBuf::from(DEFAULT_STORAGE_DIR),
            placeholder_policy: PlaceholderPolicy::default(),
        }
    }
}

fn parse_flag(name: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Ok(true),
        "0" | "false" | "no" | "" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            name,
            value: value.to_string(),
        }),
    }
}

impl ClientConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`ClientConfig::from_env`] with variables taken from `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = ClientConfig::default();

        if let Some(url) = lookup("TICKETING_API_URL").filter(|url| !url.trim().is_empty()) {
            config.api_base_url = url;
        }
        config.auth_token = lookup("TICKETING_API_TOKEN").filter(|token| !token.is_empty());
        if let Some(value) = lookup("TICKETING_FETCH_TIMEOUT_MS") {
            let millis = value
                .trim()
                .parse::<u64>()
                .ok()
                .filter(|millis| *millis > 0)
                .ok_or_else(|| ConfigError::InvalidValue {
                    name: "TICKETING_FETCH_TIMEOUT_MS",
                    value: value.clone(),
                })?;
            config.fetch_timeout = Duration::from_millis(millis);
        }
        if let Some(dir) = lookup("TICKETING_STORAGE_DIR") {
            config.storage_dir = PathBuf::from(dir);
        }
        if let Some(value) = lookup("TICKETING_STRICT_TEMPLATES") {
            if parse_flag("TICKETING_STRICT_TEMPLATES", &value)? {
                config.placeholder_policy = PlaceholderPolicy::Strict;
            }
        }

        Ok(config)
    }

    /// Environment first, then the JSON file named by `TICKETING_CONFIG` on top.
    pub fn from_env_or_file() -> Result<Self, ConfigError> {
        let mut config = Self::from_env()?;
        if let Ok(path) = std::env::var("TICKETING_CONFIG") {
            let contents = fs::read_to_string(&path).map_err(|source| ConfigError::Read {
                path: path.clone(),
                source,
            })?;
            config.apply_override(&path, &contents)?;
        }
        Ok(config)
    }

    fn apply_override(&mut self, path: &str, contents: &str) -> Result<(), ConfigError> {
        let override_cfg: ClientConfigOverride =
            serde_json::from_str(contents).map_err(|source| ConfigError::Parse {
                path: path.to_string(),
                source,
            })?;

        if let Some(value) = override_cfg.api_base_url {
            self.api_base_url = value;
        }
        if let Some(value) = override_cfg.auth_token {
            self.auth_token = Some(value);
        }
        if let Some(value) = override_cfg.fetch_timeout_ms {
            if value == 0 {
                return Err(ConfigError::InvalidValue {
                    name: "fetch_timeout_ms",
                    value: value.to_string(),
                });
            }
            self.fetch_timeout = Duration::from_millis(value);
        }
        if let Some(value) = override_cfg.storage_dir {
            self.storage_dir = value;
        }
        if let Some(value) = override_cfg.placeholder_policy {
            self.placeholder_policy = value;
        }
        Ok(())
    }
}
