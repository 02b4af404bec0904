//! Cache-Aside Template
//!
//! Generic "load or compute" routine with double-checked population:
//!
//! ```text
//! probe ──hit──▶ return                      (no lock)
//!   │
//!  miss
//!   ▼
//! lock(key) ─▶ probe ──hit──▶ return          (someone else populated)
//!                │
//!               miss
//!                ▼
//!              load() ─▶ write(key, ttl) ─▶ return
//! ```
//!
//! The lock is only taken on a miss, so cache hits never wait behind a
//! population in progress.

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info};

use super::guard::PopulationGuard;
use super::metrics::{CacheMetrics, LatencyTracker};
use crate::client::KvClient;
use crate::config::CacheSettings;
use crate::domain::ports::{checked_ttl, TimeUnit};
use crate::error::{Error, Result};

/// Stored payloads that count as "nothing cached"
pub(crate) fn is_absent_marker(raw: &str) -> bool {
    raw.is_empty() || raw == "null"
}

/// Load-or-compute helper over a [`KvClient`]
pub struct CacheTemplate {
    client: KvClient,
    settings: CacheSettings,
    guard: PopulationGuard,
    metrics: Arc<CacheMetrics>,
}

impl CacheTemplate {
    /// Create a template with its own metrics
    pub fn new(client: KvClient, settings: CacheSettings) -> Self {
        Self::with_metrics(client, settings, Arc::new(CacheMetrics::new()))
    }

    /// Create a template that reports into shared metrics
    pub fn with_metrics(client: KvClient, settings: CacheSettings, metrics: Arc<CacheMetrics>) -> Self {
        let guard = PopulationGuard::new(settings.guard_mode);
        Self {
            client,
            settings,
            guard,
            metrics,
        }
    }

    /// The underlying client
    pub fn client(&self) -> &KvClient {
        &self.client
    }

    /// Metrics recorded by this template
    pub fn metrics(&self) -> &Arc<CacheMetrics> {
        &self.metrics
    }

    /// Active settings
    pub fn settings(&self) -> &CacheSettings {
        &self.settings
    }

    /// Return the cached value for `key`, or run `load` once, cache its
    /// result for `ttl_secs` seconds and return it.
    ///
    /// `key` is namespaced with the configured prefix. Failures from `load`
    /// are returned as [`Error::OperationFailed`] and nothing is written.
    pub fn load_cache<T, F>(&self, key: &str, ttl_secs: u64, load: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> anyhow::Result<T>,
    {
        self.load_cache_for(key, Duration::from_secs(ttl_secs), load)
    }

    /// [`load_cache`](Self::load_cache) with the configured default TTL
    pub fn load_cache_default<T, F>(&self, key: &str, load: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> anyhow::Result<T>,
    {
        self.load_cache_for(key, self.settings.default_ttl(), load)
    }

    /// [`load_cache`](Self::load_cache) with an explicit time unit
    pub fn load_cache_with_unit<T, F>(&self, key: &str, amount: u64, unit: TimeUnit, load: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> anyhow::Result<T>,
    {
        self.load_cache_for(key, unit.to_duration(amount), load)
    }

    fn load_cache_for<T, F>(&self, key: &str, ttl: Duration, load: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> anyhow::Result<T>,
    {
        let ttl = checked_ttl(ttl)?;
        let key = self.settings.namespaced(key);

        if let Some(value) = self.probe(&key)? {
            self.metrics.record_hit();
            debug!(key = %key, "Cache hit");
            return Ok(value);
        }

        self.guard.with_lock(&key, || -> Result<T> {
            if let Some(value) = self.probe(&key)? {
                self.metrics.record_hit();
                debug!(key = %key, "Cache populated while waiting for guard");
                return Ok(value);
            }
            self.metrics.record_miss();

            let tracker = LatencyTracker::start();
            let value = load().map_err(|err| {
                self.metrics.record_load_failure();
                Error::operation(format!("load {}", key), err)
            })?;
            self.metrics.record_load(tracker.elapsed());

            let payload = serde_json::to_string(&value)?;
            if is_absent_marker(&payload) {
                debug!(key = %key, "Loaded value is null, not caching");
                return Ok(value);
            }

            self.client.backend().set(&key, &payload, Some(ttl))?;
            self.metrics.record_write();
            info!(key = %key, ttl_secs = ttl.as_secs(), "Cache populated");
            Ok(value)
        })
    }

    /// Read and decode a cached value, treating empty markers as a miss
    fn probe<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.client.get_raw(key)? {
            Some(raw) if !is_absent_marker(&raw) => Ok(Some(serde_json::from_str(&raw)?)),
            _ => Ok(None),
        }
    }

    /// Drop the cached value for `key` (namespaced like `load_cache`)
    pub fn evict(&self, key: &str) -> Result<bool> {
        let removed = self.client.delete_key(&self.settings.namespaced(key))?;
        self.metrics.record_invalidation();
        Ok(removed)
    }
}

// =============================================================================
// Tests
// =============================================================================
