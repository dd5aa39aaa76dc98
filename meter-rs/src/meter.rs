//! Usage meter
//!
//! Decides whether an identity may use the metered feature. Exempt
//! identities never touch the store. When the store cannot be consulted
//! access is granted (fail-open) and nothing is counted. A use is only
//! counted once the store confirms the write.
//!
//! The read-increment-write cycle is not atomic: two overlapping
//! `record_and_check` calls for one identity can both read the same
//! count, and the last write wins.

use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::QuotaConfig;
use crate::error::Result;
use crate::identity::Identity;
use crate::record::UsageRecord;
use crate::store::QuotaStore;

/// Free quota and the identities exempt from it
#[derive(Debug, Clone)]
pub struct QuotaPolicy {
    max_free_uses: u64,
    exempt: HashSet<String>,
}

impl QuotaPolicy {
    /// Exempt entries are normalized; blank entries are dropped
    pub fn new<I, S>(max_free_uses: u64, exempt: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let exempt = exempt
            .into_iter()
            .filter_map(|raw| Identity::parse(raw.as_ref()).ok())
            .map(|id| id.as_str().to_string())
            .collect();
        Self {
            max_free_uses,
            exempt,
        }
    }

    pub fn from_config(config: &QuotaConfig) -> Self {
        Self::new(config.max_free_uses, &config.exempt_emails)
    }

    pub fn max_free_uses(&self) -> u64 {
        self.max_free_uses
    }

    pub fn is_exempt(&self, identity: &Identity) -> bool {
        self.exempt.contains(identity.as_str())
    }

    /// Whether `count` recorded uses still leave access open
    pub fn allows(&self, count: u64) -> bool {
        count < self.max_free_uses
    }
}

impl Default for QuotaPolicy {
    fn default() -> Self {
        Self::new(3, std::iter::empty::<&str>())
    }
}

/// How a decision was reached
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Count read (and possibly written) through the store
    Metered,
    /// Identity is exempt from the quota
    Exempt,
    /// Store unconfigured or unreachable; access granted, nothing counted
    FailOpen,
    /// Store did not confirm the write; decision uses the previous count
    WriteFailed,
}

/// Result of a `check` or `record_and_check`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub identity: Identity,
    pub count: u64,
    pub allowed: bool,
    pub outcome: Outcome,
}

impl Decision {
    fn exempt(identity: Identity) -> Self {
        Self {
            identity,
            count: 0,
            allowed: true,
            outcome: Outcome::Exempt,
        }
    }

    fn fail_open(identity: Identity) -> Self {
        Self {
            identity,
            count: 0,
            allowed: true,
            outcome: Outcome::FailOpen,
        }
    }
}

/// Per-identity usage meter
pub struct UsageMeter {
    store: Arc<dyn QuotaStore>,
    policy: QuotaPolicy,
    key_prefix: String,
    clock: Arc<dyn Clock>,
}

impl UsageMeter {
    pub fn new(store: Arc<dyn QuotaStore>, policy: QuotaPolicy) -> Self {
        Self {
            store,
            policy,
            key_prefix: "usage:".to_string(),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_key_prefix(mut self, key_prefix: impl Into<String>) -> Self {
        self.key_prefix = key_prefix.into();
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn policy(&self) -> &QuotaPolicy {
        &self.policy
    }

    pub fn store(&self) -> &Arc<dyn QuotaStore> {
        &self.store
    }

    /// Read-only decision; never changes the stored count
    pub async fn check(&self, raw_identity: &str) -> Result<Decision> {
        let identity = Identity::parse(raw_identity)?;
        if let Some(decision) = self.short_circuit(&identity) {
            return Ok(decision);
        }

        let key = identity.storage_key(&self.key_prefix);
        let record = match self.store.fetch(&key).await {
            Ok(raw) => raw.as_deref().and_then(UsageRecord::decode),
            Err(e) => {
                warn!("Usage check for {} failing open: {}", identity, e);
                return Ok(Decision::fail_open(identity));
            }
        };

        let count = record.map(|r| r.count).unwrap_or(0);
        debug!("Usage check for {}: {} of {}", identity, count, self.policy.max_free_uses);
        Ok(self.metered(identity, count))
    }

    /// Count one use, then decide
    ///
    /// At most one read and one write per call. If the write is not
    /// confirmed, the use is not counted and the decision is based on
    /// the count before this call.
    pub async fn record_and_check(&self, raw_identity: &str) -> Result<Decision> {
        let identity = Identity::parse(raw_identity)?;
        if let Some(decision) = self.short_circuit(&identity) {
            return Ok(decision);
        }

        let key = identity.storage_key(&self.key_prefix);
        let previous = match self.store.fetch(&key).await {
            Ok(raw) => raw.as_deref().and_then(UsageRecord::decode),
            Err(e) => {
                warn!("Usage record for {} failing open, not counted: {}", identity, e);
                return Ok(Decision::fail_open(identity));
            }
        };

        let prev_count = previous.as_ref().map(|r| r.count).unwrap_or(0);
        let updated = UsageRecord::next(previous.as_ref(), self.clock.now());

        if let Err(e) = self.store.store(&key, &updated.encode()).await {
            error!("Write failed for {}: {}", identity, e);
            return Ok(Decision {
                identity,
                count: prev_count,
                allowed: self.policy.allows(prev_count),
                outcome: Outcome::WriteFailed,
            });
        }

        info!(
            "Usage for {}: {} -> {} (limit: {})",
            identity, prev_count, updated.count, self.policy.max_free_uses
        );
        Ok(self.metered(identity, updated.count))
    }

    /// Exemption first, then store availability; neither reads the store
    fn short_circuit(&self, identity: &Identity) -> Option<Decision> {
        if self.policy.is_exempt(identity) {
            debug!("{} is exempt from the usage quota", identity);
            return Some(Decision::exempt(identity.clone()));
        }

        if !self.store.is_configured() {
            warn!(
                "Quota store ({}) not configured, failing open for {}",
                self.store.backend_name(),
                identity
            );
            return Some(Decision::fail_open(identity.clone()));
        }

        None
    }

    fn metered(&self, identity: Identity, count: u64) -> Decision {
        Decision {
            identity,
            count,
            allowed: self.policy.allows(count),
            outcome: Outcome::Metered,
        }
    }
}
