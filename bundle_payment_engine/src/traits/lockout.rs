use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum LockoutError {
    #[error("We have an internal database engine problem (configuration/uptime etc.): {0}")]
    DatabaseError(String),
}

impl From<sqlx::Error> for LockoutError {
    fn from(e: sqlx::Error) -> Self {
        LockoutError::DatabaseError(e.to_string())
    }
}

/// A shared failure counter with TTL-based eviction, keyed by an opaque string (typically a phone number or
/// owner id). Replaces a per-process in-memory lockout map so that correctness does not depend on a single
/// service instance. The auth collaborator owns the policy (threshold, lockout window); this store only offers
/// atomic increments and eviction, following the same conditional-update discipline as the ledger.
#[allow(async_fn_in_trait)]
pub trait LockoutStore: Clone {
    /// Atomically increments the counter for `key` and extends its expiry to `expires_at`.
    /// Returns the new hit count, which is authoritative: callers enforce their threshold against this value,
    /// not against a separate read that may lag behind a commit on another connection.
    async fn record_attempt(&self, key: &str, expires_at: DateTime<Utc>) -> Result<i64, LockoutError>;

    /// The current hit count for `key`, ignoring counters that have already expired.
    async fn hits_for(&self, key: &str, now: DateTime<Utc>) -> Result<i64, LockoutError>;

    /// Clears the counter for `key` (e.g. after a successful login).
    async fn reset(&self, key: &str) -> Result<(), LockoutError>;

    /// Deletes every counter whose expiry has passed. Idempotent; safe to run from multiple instances.
    async fn evict_expired(&self, now: DateTime<Utc>) -> Result<u64, LockoutError>;
}
