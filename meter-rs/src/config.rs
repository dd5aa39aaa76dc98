//! Configuration for meter-rs

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{MeterError, Result};

/// Main meter configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MeterConfig {
    /// Server configuration
    pub server: ServerConfig,
    /// Quota store configuration
    #[serde(default)]
    pub store: StoreConfig,
    /// Quota policy
    #[serde(default)]
    pub quota: QuotaConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Listen address (e.g., "0.0.0.0:8787")
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
}

/// Which quota store implementation to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Command-style REST key-value store
    Rest,
    /// In-process map, lost on restart
    Memory,
}

/// Quota store configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StoreConfig {
    #[serde(default = "default_backend")]
    pub backend: StoreBackend,
    /// REST endpoint of the store (e.g., "https://eu1-example.upstash.io")
    pub rest_url: Option<String>,
    /// Bearer token for the store
    pub rest_token: Option<String>,
    /// Prefix prepended to every identity key
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
    /// Upper bound on a single store round-trip, in milliseconds
    #[serde(default = "default_store_timeout")]
    pub timeout_ms: u64,
}

/// Quota policy configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QuotaConfig {
    /// Uses allowed before access is denied
    #[serde(default = "default_max_free_uses")]
    pub max_free_uses: u64,
    /// Emails never subject to the quota
    #[serde(default)]
    pub exempt_emails: Vec<String>,
}

fn default_listen_addr() -> String {
    "0.0.0.0:8787".to_string()
}

fn default_backend() -> StoreBackend {
    StoreBackend::Rest
}

fn default_key_prefix() -> String {
    "usage:".to_string()
}

fn default_store_timeout() -> u64 {
    5000
}

fn default_max_free_uses() -> u64 {
    3
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            rest_url: None,
            rest_token: None,
            key_prefix: default_key_prefix(),
            timeout_ms: default_store_timeout(),
        }
    }
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            max_free_uses: default_max_free_uses(),
            exempt_emails: Vec::new(),
        }
    }
}

impl MeterConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| MeterError::Config(format!("Failed to read config file: {}", e)))?;

        toml::from_str(&content)
            .map_err(|e| MeterError::Config(format!("Failed to parse config: {}", e)))
    }

    /// Create a default development configuration
    ///
    /// No store credentials, so the meter runs fail-open until
    /// `UPSTASH_REDIS_REST_URL` and `UPSTASH_REDIS_REST_TOKEN` are set.
    pub fn development() -> Self {
        Self {
            server: ServerConfig {
                listen_addr: "127.0.0.1:8787".to_string(),
            },
            store: StoreConfig::default(),
            quota: QuotaConfig::default(),
        }
    }

    /// Apply environment overrides on top of the loaded configuration
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("UPSTASH_REDIS_REST_URL") {
            self.store.rest_url = Some(url);
        }
        if let Some(token) = lookup("UPSTASH_REDIS_REST_TOKEN") {
            self.store.rest_token = Some(token);
        }
        if let Some(addr) = lookup("METER_LISTEN_ADDR") {
            self.server.listen_addr = addr;
        }
        if let Some(max) = lookup("METER_MAX_FREE_USES") {
            self.quota.max_free_uses = max.trim().parse().map_err(|e| {
                MeterError::Config(format!("Invalid METER_MAX_FREE_USES '{}': {}", max, e))
            })?;
        }
        if let Some(list) = lookup("METER_EXEMPT_EMAILS") {
            self.quota.exempt_emails = list
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.server.listen_addr.trim().is_empty() {
            return Err(MeterError::Config("No listen address configured".to_string()));
        }

        if let Some(ref rest_url) = self.store.rest_url {
            if !rest_url.trim().is_empty() {
                url::Url::parse(rest_url).map_err(|e| {
                    MeterError::Config(format!("Invalid store URL '{}': {}", rest_url, e))
                })?;
            }
        }

        if self.store.timeout_ms == 0 {
            return Err(MeterError::Config("Store timeout must be positive".to_string()));
        }

        Ok(())
    }
}

impl Default for MeterConfig {
    fn default() -> Self {
        Self::development()
    }
}
