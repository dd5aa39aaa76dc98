//! meter-rs: per-identity usage meter
//!
//! Gates a paid feature behind a fixed free quota per email identity.
//! Usage records live in a remote key-value store reached over a
//! command-style REST protocol; everything else is stateless.
//!
//! # Features
//!
//! - `check` (read-only) and `record_and_check` (read-increment-write)
//! - Exempt identities that never touch the store
//! - Fail-open when the store is unconfigured or unreachable
//! - Write failures never count a use
//! - HTTP surface with CORS preflight support
//!
//! # Example Configuration
//!
//! ```toml
//! [server]
//! listen_addr = "0.0.0.0:8787"
//!
//! [store]
//! rest_url = "https://eu1-example.upstash.io"
//! rest_token = "..."
//! key_prefix = "usage:"
//! timeout_ms = 5000
//!
//! [quota]
//! max_free_uses = 3
//! exempt_emails = ["owner@example.com"]
//! ```

pub mod clock;
pub mod config;
pub mod error;
pub mod identity;
pub mod meter;
pub mod record;
pub mod server;
pub mod store;

pub use config::MeterConfig;
pub use error::{MeterError, Result, StoreError};
pub use identity::Identity;
pub use meter::{Decision, Outcome, QuotaPolicy, UsageMeter};
pub use record::UsageRecord;
pub use server::MeterServer;
pub use store::{MemoryStore, QuotaStore, RestStore};
