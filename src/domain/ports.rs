//! Domain Ports (Port/Adapter Pattern)
//!
//! The cache-aside layer never talks to a concrete store. Everything goes
//! through the [`KvBackend`] port; infrastructure adapters implement it.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │          KvClient  │  CacheTemplate  │  CacheInterceptor    │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    KvBackend (Port)                          │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │           InMemoryBackend  │  RedisBackend                   │
//! └─────────────────────────────────────────────────────────────┘
//! ```

use std::collections::HashMap;
use std::time::Duration;

use crate::error::{Error, Result};

// =============================================================================
// Value Objects
// =============================================================================

/// Remaining lifetime of a key as reported by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemainingTtl {
    /// Key does not exist
    Missing,
    /// Key exists without an expiry
    Persistent,
    /// Key expires after the given duration
    Expires(Duration),
}

impl RemainingTtl {
    /// Whole seconds in the Redis `TTL` convention: -2 missing, -1 persistent.
    pub fn as_secs(&self) -> i64 {
        match self {
            RemainingTtl::Missing => -2,
            RemainingTtl::Persistent => -1,
            RemainingTtl::Expires(d) => d.as_secs() as i64,
        }
    }
}

/// Time unit for scalar expirations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimeUnit {
    Milliseconds,
    #[default]
    Seconds,
    Minutes,
    Hours,
    Days,
}

impl TimeUnit {
    /// Convert an amount in this unit to a duration.
    pub fn to_duration(self, amount: u64) -> Duration {
        match self {
            TimeUnit::Milliseconds => Duration::from_millis(amount),
            TimeUnit::Seconds => Duration::from_secs(amount),
            TimeUnit::Minutes => Duration::from_secs(amount.saturating_mul(60)),
            TimeUnit::Hours => Duration::from_secs(amount.saturating_mul(3_600)),
            TimeUnit::Days => Duration::from_secs(amount.saturating_mul(86_400)),
        }
    }
}

/// Longest accepted expiration (100 years)
pub const MAX_TTL: Duration = Duration::from_secs(100 * 365 * 86_400);

/// Reject expirations the backend cannot express.
pub fn checked_ttl(ttl: Duration) -> Result<Duration> {
    if ttl.as_millis() == 0 {
        return Err(Error::InvalidTtl(format!(
            "expiration must be at least 1ms, got {:?}",
            ttl
        )));
    }
    if ttl > MAX_TTL {
        return Err(Error::InvalidTtl(format!(
            "expiration must be at most {}s, got {}s",
            MAX_TTL.as_secs(),
            ttl.as_secs()
        )));
    }
    Ok(ttl)
}

/// Backend operation counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackendStats {
    /// Keys currently stored (0 when the backend cannot tell)
    pub key_count: u64,
    /// Read operations
    pub reads: u64,
    /// Write operations
    pub writes: u64,
    /// Delete operations
    pub deletes: u64,
}

// =============================================================================
// Key-Value Backend Port
// =============================================================================

/// Key-value store primitives required by the cache-aside layer.
///
/// Keys and values are strings. List indices follow Redis semantics:
/// negative indices count back from the tail, and range bounds are
/// inclusive.
pub trait KvBackend: Send + Sync {
    /// Check whether a key exists.
    fn exists(&self, key: &str) -> Result<bool>;

    /// Set a key's expiration. Returns false if the key does not exist.
    fn expire(&self, key: &str, ttl: Duration) -> Result<bool>;

    /// Remaining lifetime of a key.
    fn ttl(&self, key: &str) -> Result<RemainingTtl>;

    /// Delete keys, returning how many existed.
    fn delete(&self, keys: &[String]) -> Result<u64>;

    /// Get a scalar value.
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Set a scalar value, replacing any previous value and expiry.
    fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()>;

    /// Atomically add `delta` to an integer value (missing keys start at 0).
    fn incr_by(&self, key: &str, delta: i64) -> Result<i64>;

    /// Set several hash fields.
    fn hset_all(&self, key: &str, fields: &[(String, String)]) -> Result<()>;

    /// Get all hash fields.
    fn hgetall(&self, key: &str) -> Result<HashMap<String, String>>;

    /// Get a single hash field.
    fn hget(&self, key: &str, field: &str) -> Result<Option<String>>;

    /// Delete hash fields, returning how many existed.
    fn hdel(&self, key: &str, fields: &[String]) -> Result<u64>;

    /// Atomically add `delta` to an integer hash field.
    fn hincr_by(&self, key: &str, field: &str, delta: i64) -> Result<i64>;

    /// Append values to a list, returning the new length.
    fn rpush(&self, key: &str, values: &[String]) -> Result<u64>;

    /// Elements between `start` and `stop`, inclusive.
    fn lrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>>;

    /// List length (0 for a missing key).
    fn llen(&self, key: &str) -> Result<u64>;

    /// Element at `index`.
    fn lindex(&self, key: &str, index: i64) -> Result<Option<String>>;

    /// Overwrite the element at `index`.
    fn lset(&self, key: &str, index: i64, value: &str) -> Result<()>;

    /// Remove elements equal to `value`; `count` 0 removes all of them.
    fn lrem(&self, key: &str, count: i64, value: &str) -> Result<u64>;

    /// Operation statistics.
    fn stats(&self) -> BackendStats {
        BackendStats::default()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_time_unit_conversion() {
        assert_eq!(TimeUnit::Milliseconds.to_duration(1500), Duration::from_millis(1500));
        assert_eq!(TimeUnit::Seconds.to_duration(30), Duration::from_secs(30));
        assert_eq!(TimeUnit::Minutes.to_duration(2), Duration::from_secs(120));
        assert_eq!(TimeUnit::Hours.to_duration(1), Duration::from_secs(3_600));
        assert_eq!(TimeUnit::Days.to_duration(1), Duration::from_secs(86_400));
        assert_eq!(TimeUnit::default(), TimeUnit::Seconds);
    }

    #[test]
    fn test_remaining_ttl_secs_convention() {
        assert_eq!(RemainingTtl::Missing.as_secs(), -2);
        assert_eq!(RemainingTtl::Persistent.as_secs(), -1);
        assert_eq!(RemainingTtl::Expires(Duration::from_secs(42)).as_secs(), 42);
    }

    #[test]
    fn test_checked_ttl() {
        assert!(checked_ttl(Duration::from_secs(1)).is_ok());
        assert!(checked_ttl(Duration::from_millis(1)).is_ok());
        assert!(matches!(
            checked_ttl(Duration::ZERO),
            Err(Error::InvalidTtl(_))
        ));
    }

    #[test]
    fn test_checked_ttl_upper_bound() {
        assert!(checked_ttl(MAX_TTL).is_ok());
        assert!(matches!(
            checked_ttl(MAX_TTL + Duration::from_secs(1)),
            Err(Error::InvalidTtl(_))
        ));
        assert!(matches!(
            checked_ttl(TimeUnit::Days.to_duration(u64::MAX)),
            Err(Error::InvalidTtl(_))
        ));
    }
}
