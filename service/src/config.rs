//! Process configuration.
//!
//! Values come from an optional JSON file, then `BYOKGATE_*` environment
//! overrides. Key material is never read from here; see
//! [`crate::middleware::kek`].

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::providers::{AnthropicProvider, OpenAiProvider, ProviderCatalog, anthropic, openai};
use crate::proxy::{DEFAULT_MAX_BODY_BYTES, ProxySettings};

pub const ENV_LISTEN_ADDR: &str = "BYOKGATE_LISTEN_ADDR";
pub const ENV_STORE_PATH: &str = "BYOKGATE_STORE_PATH";
pub const ENV_REQUEST_TIMEOUT_SECS: &str = "BYOKGATE_REQUEST_TIMEOUT_SECS";
pub const ENV_CONNECT_TIMEOUT_SECS: &str = "BYOKGATE_CONNECT_TIMEOUT_SECS";
pub const ENV_MAX_BODY_BYTES: &str = "BYOKGATE_MAX_BODY_BYTES";
pub const ENV_LOG_FORMAT: &str = "BYOKGATE_LOG_FORMAT";
pub const ENV_OPENAI_BASE_URL: &str = "BYOKGATE_OPENAI_BASE_URL";
pub const ENV_ANTHROPIC_BASE_URL: &str = "BYOKGATE_ANTHROPIC_BASE_URL";

const APP_DIR: &str = "byokgate";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid value for {key}: {message}")]
    Invalid { key: &'static str, message: String },
}

fn invalid(key: &'static str, message: impl ToString) -> ConfigError {
    ConfigError::Invalid {
        key,
        message: message.to_string(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(format!("expected \"text\" or \"json\", got {other:?}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderUrls {
    #[serde(default = "default_openai_base_url")]
    pub openai_base_url: String,
    #[serde(default = "default_anthropic_base_url")]
    pub anthropic_base_url: String,
}

impl Default for ProviderUrls {
    fn default() -> Self {
        Self {
            openai_base_url: default_openai_base_url(),
            anthropic_base_url: default_anthropic_base_url(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,
    /// `None` keeps tenants and credentials in memory only.
    #[serde(default = "default_store_path")]
    pub store_path: Option<PathBuf>,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
    #[serde(default)]
    pub log_format: LogFormat,
    #[serde(default)]
    pub providers: ProviderUrls,
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

fn default_store_path() -> Option<PathBuf> {
    dirs::data_dir().map(|d| d.join(APP_DIR).join("store.json"))
}

fn default_request_timeout_secs() -> u64 {
    300
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_max_body_bytes() -> usize {
    DEFAULT_MAX_BODY_BYTES
}

fn default_openai_base_url() -> String {
    openai::DEFAULT_BASE_URL.to_string()
}

fn default_anthropic_base_url() -> String {
    anthropic::DEFAULT_BASE_URL.to_string()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            store_path: default_store_path(),
            request_timeout_secs: default_request_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            max_body_bytes: default_max_body_bytes(),
            log_format: LogFormat::default(),
            providers: ProviderUrls::default(),
        }
    }
}

/// `<config_dir>/byokgate/config.json`, if the platform has a config dir.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join(APP_DIR).join("config.json"))
}

impl GatewayConfig {
    /// Load from `path`, or from [`default_config_path`] when it exists, then
    /// apply environment overrides and validate.
    ///
    /// An explicit `path` must exist; the default location is optional.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let file = match path {
            Some(p) => Some(p.to_path_buf()),
            None => default_config_path().filter(|p| p.exists()),
        };
        let mut config = match file {
            Some(path) => Self::from_file(&path)?,
            None => Self::default(),
        };
        config.apply_env_with(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Apply overrides from `lookup`, which maps a variable name to its value.
    pub fn apply_env_with<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup(ENV_LISTEN_ADDR) {
            self.listen_addr = v.parse().map_err(|e| invalid(ENV_LISTEN_ADDR, e))?;
        }
        if let Some(v) = lookup(ENV_STORE_PATH) {
            self.store_path = if v.is_empty() { None } else { Some(PathBuf::from(v)) };
        }
        if let Some(v) = lookup(ENV_REQUEST_TIMEOUT_SECS) {
            self.request_timeout_secs =
                v.parse().map_err(|e| invalid(ENV_REQUEST_TIMEOUT_SECS, e))?;
        }
        if let Some(v) = lookup(ENV_CONNECT_TIMEOUT_SECS) {
            self.connect_timeout_secs =
                v.parse().map_err(|e| invalid(ENV_CONNECT_TIMEOUT_SECS, e))?;
        }
        if let Some(v) = lookup(ENV_MAX_BODY_BYTES) {
            self.max_body_bytes = v.parse().map_err(|e| invalid(ENV_MAX_BODY_BYTES, e))?;
        }
        if let Some(v) = lookup(ENV_LOG_FORMAT) {
            self.log_format = v.parse().map_err(|e| invalid(ENV_LOG_FORMAT, e))?;
        }
        if let Some(v) = lookup(ENV_OPENAI_BASE_URL) {
            self.providers.openai_base_url = v;
        }
        if let Some(v) = lookup(ENV_ANTHROPIC_BASE_URL) {
            self.providers.anthropic_base_url = v;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.request_timeout_secs == 0 {
            return Err(invalid("request_timeout_secs", "must be greater than zero"));
        }
        if self.connect_timeout_secs == 0 {
            return Err(invalid("connect_timeout_secs", "must be greater than zero"));
        }
        if self.max_body_bytes == 0 {
            return Err(invalid("max_body_bytes", "must be greater than zero"));
        }
        validate_base_url("providers.openai_base_url", &self.providers.openai_base_url)?;
        validate_base_url(
            "providers.anthropic_base_url",
            &self.providers.anthropic_base_url,
        )?;
        Ok(())
    }

    pub fn proxy_settings(&self) -> ProxySettings {
        ProxySettings {
            max_body_bytes: self.max_body_bytes,
            request_timeout: Duration::from_secs(self.request_timeout_secs),
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Built-in providers at the configured base URLs.
    pub fn catalog(&self) -> Result<ProviderCatalog, crate::providers::CatalogError> {
        ProviderCatalog::with_builtin(
            OpenAiProvider::with_base_url(self.providers.openai_base_url.clone()),
            AnthropicProvider::with_base_url(self.providers.anthropic_base_url.clone()),
        )
    }
}

fn validate_base_url(key: &'static str, value: &str) -> Result<(), ConfigError> {
    let parsed = url::Url::parse(value).map_err(|e| invalid(key, e))?;
    match parsed.scheme() {
        "http" | "https" => {}
        other => return Err(invalid(key, format!("unsupported scheme {other:?}"))),
    }
    if parsed.host_str().is_none() {
        return Err(invalid(key, "missing host"));
    }
    Ok(())
}
