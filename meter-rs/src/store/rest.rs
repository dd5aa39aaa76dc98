//! Command-style REST quota store
//!
//! Speaks the Upstash-compatible REST protocol: every command is a JSON
//! array `["GET", key]` / `["SET", key, value]` POSTed to the endpoint
//! with a bearer token, and the reply carries the command's result in a
//! `result` field (or a message in `error`).

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

use super::QuotaStore;
use crate::config::StoreConfig;
use crate::error::{MeterError, Result, StoreError};

/// Reply envelope for a single command
#[derive(Debug, Deserialize)]
struct CommandReply {
    #[serde(default)]
    result: serde_json::Value,
    #[serde(default)]
    error: Option<String>,
}

/// Endpoint plus credential, present only when both are configured
#[derive(Debug, Clone)]
struct Endpoint {
    url: String,
    token: String,
}

/// REST client for the quota store
pub struct RestStore {
    endpoint: Option<Endpoint>,
    client: reqwest::Client,
}

impl RestStore {
    /// Create a client; a missing or empty URL or token leaves it unconfigured
    pub fn new(url: Option<String>, token: Option<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| MeterError::Http(format!("Failed to create HTTP client: {}", e)))?;

        let endpoint = match (url, token) {
            (Some(url), Some(token)) if !url.trim().is_empty() && !token.trim().is_empty() => {
                Some(Endpoint {
                    url: url.trim().to_string(),
                    token: token.trim().to_string(),
                })
            }
            _ => None,
        };

        Ok(Self { endpoint, client })
    }

    /// Create from the `[store]` configuration section
    pub fn from_config(config: &StoreConfig) -> Result<Self> {
        Self::new(
            config.rest_url.clone(),
            config.rest_token.clone(),
            Duration::from_millis(config.timeout_ms),
        )
    }

    /// Send one command and return its `result` value
    async fn command(&self, args: &[&str]) -> std::result::Result<serde_json::Value, StoreError> {
        let endpoint = self.endpoint.as_ref().ok_or(StoreError::NotConfigured)?;
        let name = args.first().copied().unwrap_or("?");

        debug!("Quota store command: {}", name);

        let response = self
            .client
            .post(&endpoint.url)
            .bearer_auth(&endpoint.token)
            .json(args)
            .send()
            .await
            .map_err(|e| {
                let reason = if e.is_timeout() {
                    format!("{} timed out", name)
                } else {
                    format!("{} failed: {}", name, e)
                };
                warn!("Quota store error: {}", reason);
                StoreError::Unavailable(reason)
            })?;

        let status = response.status();
        if !status.is_success() {
            warn!("Quota store returned HTTP {} for {}", status, name);
            return Err(StoreError::Unavailable(format!("{} returned HTTP {}", name, status)));
        }

        let reply: CommandReply = response.json().await.map_err(|e| {
            warn!("Quota store sent an unreadable reply to {}: {}", name, e);
            StoreError::Unavailable(format!("{} reply unreadable: {}", name, e))
        })?;

        if let Some(error) = reply.error {
            warn!("Quota store rejected {}: {}", name, error);
            return Err(StoreError::Unavailable(format!("{} rejected: {}", name, error)));
        }

        Ok(reply.result)
    }
}

/// Interpret the result of a `GET`
fn fetched_value(result: serde_json::Value) -> std::result::Result<Option<String>, StoreError> {
    match result {
        serde_json::Value::Null => Ok(None),
        serde_json::Value::String(value) => Ok(Some(value)),
        other => Err(StoreError::Unavailable(format!(
            "GET returned unexpected result: {}",
            other
        ))),
    }
}

/// Interpret the result of a `SET`
fn write_confirmed(result: &serde_json::Value) -> std::result::Result<(), StoreError> {
    match result.as_str() {
        Some("OK") => Ok(()),
        _ => Err(StoreError::WriteRejected(format!("SET returned {}", result))),
    }
}

#[async_trait]
impl QuotaStore for RestStore {
    fn is_configured(&self) -> bool {
        self.endpoint.is_some()
    }

    async fn fetch(&self, key: &str) -> std::result::Result<Option<String>, StoreError> {
        let result = self.command(&["GET", key]).await?;
        fetched_value(result)
    }

    async fn store(&self, key: &str, value: &str) -> std::result::Result<(), StoreError> {
        let result = self.command(&["SET", key, value]).await?;
        write_confirmed(&result)
    }

    fn backend_name(&self) -> &str {
        "rest"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn timeout() -> Duration {
        Duration::from_millis(500)
    }

    #[test]
    fn test_configured_requires_url_and_token() {
        let store = RestStore::new(
            Some("https://store.example.com".to_string()),
            Some("token".to_string()),
            timeout(),
        )
        .unwrap();
        assert!(store.is_configured());

        let no_token =
            RestStore::new(Some("https://store.example.com".to_string()), None, timeout()).unwrap();
        assert!(!no_token.is_configured());

        let blank_url =
            RestStore::new(Some("  ".to_string()), Some("token".to_string()), timeout()).unwrap();
        assert!(!blank_url.is_configured());
    }

    #[tokio::test]
    async fn test_unconfigured_never_reaches_network() {
        let store = RestStore::new(None, None, timeout()).unwrap();
        assert_eq!(store.fetch("usage:a@b.c").await, Err(StoreError::NotConfigured));
        assert_eq!(store.store("usage:a@b.c", "{}").await, Err(StoreError::NotConfigured));
    }

    #[test]
    fn test_fetched_value() {
        assert_eq!(fetched_value(json!(null)), Ok(None));
        assert_eq!(
            fetched_value(json!("{\"count\":1}")),
            Ok(Some("{\"count\":1}".to_string()))
        );
        assert!(matches!(
            fetched_value(json!(42)),
            Err(StoreError::Unavailable(_))
        ));
    }

    #[test]
    fn test_write_confirmed() {
        assert_eq!(write_confirmed(&json!("OK")), Ok(()));
        assert!(matches!(
            write_confirmed(&json!(null)),
            Err(StoreError::WriteRejected(_))
        ));
        assert!(matches!(
            write_confirmed(&json!("QUEUED")),
            Err(StoreError::WriteRejected(_))
        ));
    }

    #[test]
    fn test_reply_envelope() {
        let reply: CommandReply = serde_json::from_str(r#"{"result":"OK"}"#).unwrap();
        assert_eq!(reply.result, json!("OK"));
        assert!(reply.error.is_none());

        let reply: CommandReply =
            serde_json::from_str(r#"{"error":"WRONGPASS invalid password"}"#).unwrap();
        assert!(reply.result.is_null());
        assert_eq!(reply.error.as_deref(), Some("WRONGPASS invalid password"));
    }
}
