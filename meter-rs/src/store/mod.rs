//! Quota store abstraction
//!
//! The meter only needs two commands from its backing store: fetch a
//! serialized record by key, and overwrite it. Implementations report
//! every failure as a [`StoreError`] value and never panic; the meter
//! decides what a failure means for the caller.

use async_trait::async_trait;

use crate::error::StoreError;

pub mod memory;
pub mod rest;

pub use memory::MemoryStore;
pub use rest::RestStore;

/// Key-value store holding serialized usage records
#[async_trait]
pub trait QuotaStore: Send + Sync {
    /// Whether an endpoint and credential are present
    fn is_configured(&self) -> bool;

    /// Fetch the value stored under `key`; `Ok(None)` if never written
    async fn fetch(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Overwrite the value stored under `key`
    async fn store(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Short backend name for logs
    fn backend_name(&self) -> &str;
}
