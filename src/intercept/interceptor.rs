//! Declarative Cache Interception
//!
//! Wraps an operation according to its [`CacheDescriptor`]:
//!
//! - **Read**: resolve key, return the cached value on a hit, otherwise run
//!   the operation and cache a non-null result.
//! - **Invalidate**: resolve key, delete it, run the operation.
//! - **No descriptor**: run the operation unchanged.
//!
//! Failures (key resolution, cache probe, the operation itself) are settled
//! by the configured [`FailurePolicy`]: logged and turned into "no result",
//! or returned to the caller.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use super::args::CallArgs;
use super::descriptor::{CacheDescriptor, CacheMode};
use crate::cache::{is_absent_marker, CacheMetrics, LatencyTracker};
use crate::client::KvClient;
use crate::config::{CacheSettings, FailurePolicy};
use crate::domain::ports::checked_ttl;
use crate::error::{Error, Result};

/// An operation that carries its own cache declaration
pub trait CacheableOperation {
    /// Result produced by the operation; `None` means "no result"
    type Output: Serialize + DeserializeOwned;

    /// Name used in logs and errors
    fn name(&self) -> String {
        std::any::type_name::<Self>().to_string()
    }

    /// Cache behavior for this operation, if any
    fn descriptor(&self) -> Option<CacheDescriptor>;

    /// Argument bindings visible to the key template
    fn arguments(&self) -> Result<CallArgs>;

    /// Run the operation
    fn execute(self) -> anyhow::Result<Option<Self::Output>>;
}

/// Applies cache descriptors around operations
pub struct CacheInterceptor {
    client: KvClient,
    settings: CacheSettings,
    registry: DashMap<String, Arc<CacheDescriptor>>,
    metrics: Arc<CacheMetrics>,
}

impl CacheInterceptor {
    /// Create an interceptor with its own metrics
    pub fn new(client: KvClient, settings: CacheSettings) -> Self {
        Self::with_metrics(client, settings, Arc::new(CacheMetrics::new()))
    }

    /// Create an interceptor that reports into shared metrics
    pub fn with_metrics(client: KvClient, settings: CacheSettings, metrics: Arc<CacheMetrics>) -> Self {
        Self {
            client,
            settings,
            registry: DashMap::new(),
            metrics,
        }
    }

    pub fn client(&self) -> &KvClient {
        &self.client
    }

    pub fn metrics(&self) -> &Arc<CacheMetrics> {
        &self.metrics
    }

    pub fn settings(&self) -> &CacheSettings {
        &self.settings
    }

    // =========================================================================
    // Registry
    // =========================================================================

    /// Attach `descriptor` to `operation`, returning the one it replaces
    pub fn register(
        &self,
        operation: impl Into<String>,
        descriptor: CacheDescriptor,
    ) -> Result<Option<Arc<CacheDescriptor>>> {
        if descriptor.mode() == CacheMode::Read {
            checked_ttl(self.ttl_for(&descriptor))?;
        }
        let operation = operation.into();
        debug!(operation = %operation, template = %descriptor.key_template(), "Registered cache descriptor");
        Ok(self.registry.insert(operation, Arc::new(descriptor)))
    }

    /// Detach the descriptor from `operation`
    pub fn unregister(&self, operation: &str) -> Option<Arc<CacheDescriptor>> {
        self.registry.remove(operation).map(|(_, d)| d)
    }

    /// Descriptor registered for `operation`
    pub fn descriptor(&self, operation: &str) -> Option<Arc<CacheDescriptor>> {
        self.registry.get(operation).map(|d| Arc::clone(d.value()))
    }

    // =========================================================================
    // Interception
    // =========================================================================

    /// Run a registered operation under its descriptor. Operations without
    /// one pass straight through.
    pub fn call<T, F>(&self, operation: &str, args: &CallArgs, op: F) -> Result<Option<T>>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> anyhow::Result<Option<T>>,
    {
        let descriptor = self.descriptor(operation);
        self.intercept_named(operation, descriptor.as_deref(), args, op)
    }

    /// Run `op` under an explicit descriptor
    pub fn intercept<T, F>(&self, descriptor: Option<&CacheDescriptor>, args: &CallArgs, op: F) -> Result<Option<T>>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> anyhow::Result<Option<T>>,
    {
        let name = descriptor
            .map(|d| d.key_template().source().to_string())
            .unwrap_or_else(|| "anonymous".to_string());
        self.intercept_named(&name, descriptor, args, op)
    }

    /// Run a self-describing operation
    pub fn run<O: CacheableOperation>(&self, op: O) -> Result<Option<O::Output>> {
        let name = op.name();
        let Some(descriptor) = op.descriptor() else {
            return op.execute().map_err(|err| Error::operation(name, err));
        };

        let args = match op.arguments() {
            Ok(args) => args,
            Err(err) => return self.settle(&name, err),
        };
        self.intercept_named(&name, Some(&descriptor), &args, move || op.execute())
    }

    fn intercept_named<T, F>(
        &self,
        operation: &str,
        descriptor: Option<&CacheDescriptor>,
        args: &CallArgs,
        op: F,
    ) -> Result<Option<T>>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> anyhow::Result<Option<T>>,
    {
        let Some(descriptor) = descriptor else {
            return op().map_err(|err| Error::operation(operation, err));
        };
        debug!(operation = %operation, mode = ?descriptor.mode(), "Intercepting call");

        let key = match descriptor.resolve_key(args) {
            Ok(key) => self.settings.namespaced(&key),
            Err(err) => return self.settle(operation, err),
        };

        match descriptor.mode() {
            CacheMode::Read => self.read_through(operation, descriptor, &key, op),
            CacheMode::Invalidate => self.invalidate_then_run(operation, &key, op),
        }
    }

    fn read_through<T, F>(&self, operation: &str, descriptor: &CacheDescriptor, key: &str, op: F) -> Result<Option<T>>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> anyhow::Result<Option<T>>,
    {
        match self.probe::<T>(key) {
            Ok(Some(value)) => {
                self.metrics.record_hit();
                info!(operation = %operation, key = %key, "Cache hit");
                return Ok(Some(value));
            }
            Ok(None) => {}
            Err(err) => return self.settle(operation, err),
        }

        self.metrics.record_miss();
        info!(operation = %operation, key = %key, "Cache miss, invoking operation");

        let tracker = LatencyTracker::start();
        let result = match op() {
            Ok(result) => result,
            Err(err) => {
                self.metrics.record_load_failure();
                return self.settle(operation, Error::operation(operation, err));
            }
        };
        self.metrics.record_load(tracker.elapsed());

        if let Some(value) = &result {
            if let Err(err) = self.store(key, value, descriptor) {
                self.metrics.record_write_failure();
                match self.settings.failure_policy {
                    FailurePolicy::Suppress => {
                        warn!(key = %key, error = %err, "Failed to cache operation result");
                    }
                    FailurePolicy::Propagate => return Err(err),
                }
            }
        }

        Ok(result)
    }

    fn invalidate_then_run<T, F>(&self, operation: &str, key: &str, op: F) -> Result<Option<T>>
    where
        F: FnOnce() -> anyhow::Result<Option<T>>,
    {
        match self.client.delete_key(key) {
            Ok(existed) => {
                self.metrics.record_invalidation();
                info!(operation = %operation, key = %key, existed, "Cache entry invalidated");
            }
            Err(err) => {
                warn!(operation = %operation, key = %key, error = %err, "Cache invalidation failed, proceeding");
            }
        }

        match op() {
            Ok(result) => Ok(result),
            Err(err) => self.settle(operation, Error::operation(operation, err)),
        }
    }

    fn probe<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.client.get_raw(key)? {
            Some(raw) if !is_absent_marker(&raw) => Ok(Some(serde_json::from_str(&raw)?)),
            _ => Ok(None),
        }
    }

    fn store<T: Serialize>(&self, key: &str, value: &T, descriptor: &CacheDescriptor) -> Result<()> {
        let payload = serde_json::to_string(value)?;
        if is_absent_marker(&payload) {
            debug!(key = %key, "Operation result serializes to null, not caching");
            return Ok(());
        }

        let ttl = checked_ttl(self.ttl_for(descriptor))?;
        self.client.backend().set(key, &payload, Some(ttl))?;
        self.metrics.record_write();
        debug!(key = %key, ttl_secs = ttl.as_secs(), "Cached operation result");
        Ok(())
    }

    fn ttl_for(&self, descriptor: &CacheDescriptor) -> Duration {
        descriptor.ttl_or(self.settings.default_ttl())
    }

    /// Apply the failure policy to `err`
    fn settle<T>(&self, operation: &str, err: Error) -> Result<Option<T>> {
        let aborted = err.is_key_resolution();
        if aborted {
            // Logged under either policy: the operation never ran
            self.metrics.record_aborted_call();
            error!(operation = %operation, error = %err, "Cache key resolution failed, call aborted");
        }

        match self.settings.failure_policy {
            FailurePolicy::Suppress => {
                self.metrics.record_suppressed_failure();
                if !aborted {
                    error!(operation = %operation, error = %err, "Intercepted call failed, returning no result");
                }
                Ok(None)
            }
            FailurePolicy::Propagate => Err(err),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::InMemoryBackend;
    use crate::domain::ports::{BackendStats, KvBackend, RemainingTtl};
    use assert_matches::assert_matches;
    use serde::Deserialize;
    use serde_json::json;
    use std::cell::Cell;
    use std::collections::HashMap;
    use std::time::Duration;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Child {
        id: u64,
        name: String,
    }

    fn interceptor_with(policy: FailurePolicy) -> CacheInterceptor {
        let settings = CacheSettings {
            failure_policy: policy,
            ..Default::default()
        };
        CacheInterceptor::new(KvClient::new(Arc::new(InMemoryBackend::new())), settings)
    }

    fn interceptor() -> CacheInterceptor {
        interceptor_with(FailurePolicy::Suppress)
    }

    fn id_args(id: u64) -> CallArgs {
        CallArgs::new().with_value("id", json!(id))
    }

    fn find_child(id: u64) -> anyhow::Result<Option<Child>> {
        Ok(Some(Child {
            id,
            name: format!("child-{}", id),
        }))
    }

    #[test]
    fn test_read_miss_then_hit() {
        let interceptor = interceptor();
        let descriptor = CacheDescriptor::read("child:{#id}").unwrap();
        let calls = Cell::new(0);

        let run = || {
            interceptor.intercept(Some(&descriptor), &id_args(42), || {
                calls.set(calls.get() + 1);
                find_child(42)
            })
        };

        let first = run().unwrap();
        let second = run().unwrap();

        assert_eq!(first, second);
        assert_eq!(first.unwrap().name, "child-42");
        assert_eq!(calls.get(), 1);
        assert!(interceptor.client().has_key("CACHE:child:42").unwrap());
        assert_eq!(interceptor.metrics().hits(), 1);
        assert_eq!(interceptor.metrics().misses(), 1);
    }

    #[test]
    fn test_read_writes_with_descriptor_ttl() {
        let interceptor = interceptor();
        let descriptor = CacheDescriptor::read("child:{#id}").unwrap().with_ttl(90);

        interceptor.intercept(Some(&descriptor), &id_args(1), || find_child(1)).unwrap();

        assert_matches!(
            interceptor.client().remaining_ttl("CACHE:child:1").unwrap(),
            RemainingTtl::Expires(d) if d <= Duration::from_secs(90) && d > Duration::from_secs(80)
        );
    }

    #[test]
    fn test_read_without_ttl_uses_settings_default() {
        let settings = CacheSettings {
            default_ttl_secs: 60,
            ..Default::default()
        };
        let interceptor = CacheInterceptor::new(KvClient::new(Arc::new(InMemoryBackend::new())), settings);
        interceptor
            .register("child.find", CacheDescriptor::read("child:{#id}").unwrap())
            .unwrap();

        interceptor.call("child.find", &id_args(1), || find_child(1)).unwrap();

        assert_matches!(
            interceptor.client().remaining_ttl("CACHE:child:1").unwrap(),
            RemainingTtl::Expires(d) if d <= Duration::from_secs(60) && d > Duration::from_secs(50)
        );
    }

    #[test]
    fn test_none_result_not_cached() {
        let interceptor = interceptor();
        let descriptor = CacheDescriptor::read("child:{#id}").unwrap();

        let result: Option<Child> = interceptor
            .intercept(Some(&descriptor), &id_args(9), || Ok(None))
            .unwrap();

        assert_eq!(result, None);
        assert!(!interceptor.client().has_key("CACHE:child:9").unwrap());
    }

    #[test]
    fn test_empty_key_aborts_without_running() {
        let interceptor = interceptor();
        let descriptor = CacheDescriptor::read("{#id}").unwrap();
        let args = CallArgs::new().with_value("id", json!(""));

        let result: Option<Child> = interceptor
            .intercept(Some(&descriptor), &args, || panic!("operation must not run"))
            .unwrap();

        assert_eq!(result, None);
        assert_eq!(interceptor.metrics().aborted_calls(), 1);
    }

    #[test]
    fn test_unbound_parameter_propagates_under_propagate() {
        let interceptor = interceptor_with(FailurePolicy::Propagate);
        let descriptor = CacheDescriptor::read("child:{#missing}").unwrap();

        let result: Result<Option<Child>> =
            interceptor.intercept(Some(&descriptor), &id_args(1), || panic!("operation must not run"));

        assert_matches!(result, Err(Error::UnboundParameter { .. }));
        assert_eq!(interceptor.metrics().aborted_calls(), 1);
        assert_eq!(interceptor.metrics().suppressed_failures(), 0);
    }

    #[test]
    fn test_operation_failure_policy() {
        let descriptor = CacheDescriptor::read("child:{#id}").unwrap();
        let failing = || -> anyhow::Result<Option<Child>> { Err(anyhow::anyhow!("db down")) };

        let suppress = interceptor();
        assert_eq!(suppress.intercept(Some(&descriptor), &id_args(1), failing).unwrap(), None);
        assert_eq!(suppress.metrics().suppressed_failures(), 1);
        assert_eq!(suppress.metrics().aborted_calls(), 0);

        let propagate = interceptor_with(FailurePolicy::Propagate);
        assert_matches!(
            propagate.intercept(Some(&descriptor), &id_args(1), failing),
            Err(Error::OperationFailed { reason, .. }) if reason.contains("db down")
        );
    }

    #[test]
    fn test_invalidate_deletes_then_runs() {
        let interceptor = interceptor();
        let read = CacheDescriptor::read("child:{#id}").unwrap();
        let invalidate = CacheDescriptor::invalidate("child:{#id}").unwrap();

        interceptor.intercept(Some(&read), &id_args(42), || find_child(42)).unwrap();
        assert!(interceptor.client().has_key("CACHE:child:42").unwrap());

        let updated = interceptor
            .intercept(Some(&invalidate), &id_args(42), || Ok(Some(true)))
            .unwrap();

        assert_eq!(updated, Some(true));
        assert!(!interceptor.client().has_key("CACHE:child:42").unwrap());
        assert_eq!(interceptor.metrics().invalidations(), 1);
    }

    #[test]
    fn test_invalidate_result_not_cached() {
        let interceptor = interceptor();
        let invalidate = CacheDescriptor::invalidate("child:{#id}").unwrap();

        interceptor
            .intercept(Some(&invalidate), &id_args(3), || find_child(3))
            .unwrap();

        assert!(!interceptor.client().has_key("CACHE:child:3").unwrap());
    }

    #[test]
    fn test_pass_through_without_descriptor() {
        let interceptor = interceptor();

        let value = interceptor
            .intercept(None, &CallArgs::new(), || Ok(Some(5u32)))
            .unwrap();
        assert_eq!(value, Some(5));

        // No policy applied: the failure is always returned
        let failed: Result<Option<u32>> =
            interceptor.intercept(None, &CallArgs::new(), || Err(anyhow::anyhow!("boom")));
        assert_matches!(failed, Err(Error::OperationFailed { .. }));
        assert_eq!(interceptor.client().backend().stats().writes, 0);
    }

    #[test]
    fn test_registry_call() {
        let interceptor = interceptor();
        interceptor
            .register("child.find", CacheDescriptor::read("child:{#id}").unwrap())
            .unwrap();

        let calls = Cell::new(0);
        for _ in 0..3 {
            let child = interceptor
                .call("child.find", &id_args(5), || {
                    calls.set(calls.get() + 1);
                    find_child(5)
                })
                .unwrap();
            assert_eq!(child.unwrap().id, 5);
        }
        assert_eq!(calls.get(), 1);

        // Unregistered operations run every time
        for _ in 0..2 {
            interceptor
                .call("child.list", &CallArgs::new(), || {
                    calls.set(calls.get() + 1);
                    Ok(Some(Vec::<Child>::new()))
                })
                .unwrap();
        }
        assert_eq!(calls.get(), 3);

        assert!(interceptor.unregister("child.find").is_some());
        assert!(interceptor.descriptor("child.find").is_none());
    }

    #[test]
    fn test_register_rejects_zero_ttl() {
        let interceptor = interceptor();
        let descriptor = CacheDescriptor::read("child:{#id}").unwrap().with_ttl(0);
        assert_matches!(interceptor.register("child.find", descriptor), Err(Error::InvalidTtl(_)));

        let invalidate = CacheDescriptor::invalidate("child:{#id}").unwrap().with_ttl(0);
        assert!(interceptor.register("child.update", invalidate).is_ok());
    }

    struct FindChild {
        id: u64,
    }

    impl CacheableOperation for FindChild {
        type Output = Child;

        fn name(&self) -> String {
            "child.find".to_string()
        }

        fn descriptor(&self) -> Option<CacheDescriptor> {
            CacheDescriptor::read("child:{#id}").ok()
        }

        fn arguments(&self) -> Result<CallArgs> {
            CallArgs::new().bind("id", &self.id)
        }

        fn execute(self) -> anyhow::Result<Option<Child>> {
            find_child(self.id)
        }
    }

    #[test]
    fn test_cacheable_operation() {
        let interceptor = interceptor();

        let child = interceptor.run(FindChild { id: 8 }).unwrap().unwrap();
        assert_eq!(child.name, "child-8");
        assert_eq!(
            interceptor.client().get::<Child>("CACHE:child:8").unwrap(),
            Some(child)
        );
    }

    /// Backend whose writes always fail
    struct ReadOnlyBackend(InMemoryBackend);

    impl KvBackend for ReadOnlyBackend {
        fn exists(&self, key: &str) -> Result<bool> {
            self.0.exists(key)
        }
        fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
            self.0.expire(key, ttl)
        }
        fn ttl(&self, key: &str) -> Result<RemainingTtl> {
            self.0.ttl(key)
        }
        fn delete(&self, _keys: &[String]) -> Result<u64> {
            Err(Error::Backend("read-only".into()))
        }
        fn get(&self, key: &str) -> Result<Option<String>> {
            self.0.get(key)
        }
        fn set(&self, _key: &str, _value: &str, _ttl: Option<Duration>) -> Result<()> {
            Err(Error::Backend("read-only".into()))
        }
        fn incr_by(&self, key: &str, delta: i64) -> Result<i64> {
            self.0.incr_by(key, delta)
        }
        fn hset_all(&self, key: &str, fields: &[(String, String)]) -> Result<()> {
            self.0.hset_all(key, fields)
        }
        fn hgetall(&self, key: &str) -> Result<HashMap<String, String>> {
            self.0.hgetall(key)
        }
        fn hget(&self, key: &str, field: &str) -> Result<Option<String>> {
            self.0.hget(key, field)
        }
        fn hdel(&self, key: &str, fields: &[String]) -> Result<u64> {
            self.0.hdel(key, fields)
        }
        fn hincr_by(&self, key: &str, field: &str, delta: i64) -> Result<i64> {
            self.0.hincr_by(key, field, delta)
        }
        fn rpush(&self, key: &str, values: &[String]) -> Result<u64> {
            self.0.rpush(key, values)
        }
        fn lrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>> {
            self.0.lrange(key, start, stop)
        }
        fn llen(&self, key: &str) -> Result<u64> {
            self.0.llen(key)
        }
        fn lindex(&self, key: &str, index: i64) -> Result<Option<String>> {
            self.0.lindex(key, index)
        }
        fn lset(&self, key: &str, index: i64, value: &str) -> Result<()> {
            self.0.lset(key, index, value)
        }
        fn lrem(&self, key: &str, count: i64, value: &str) -> Result<u64> {
            self.0.lrem(key, count, value)
        }
        fn stats(&self) -> BackendStats {
            self.0.stats()
        }
    }

    fn read_only_interceptor(policy: FailurePolicy) -> CacheInterceptor {
        let settings = CacheSettings {
            failure_policy: policy,
            ..Default::default()
        };
        CacheInterceptor::new(KvClient::new(Arc::new(ReadOnlyBackend(InMemoryBackend::new()))), settings)
    }

    #[test]
    fn test_write_failure_still_returns_result_when_suppressed() {
        let interceptor = read_only_interceptor(FailurePolicy::Suppress);
        let descriptor = CacheDescriptor::read("child:{#id}").unwrap();

        let child = interceptor
            .intercept(Some(&descriptor), &id_args(4), || find_child(4))
            .unwrap();

        assert_eq!(child.unwrap().id, 4);
        assert_eq!(interceptor.metrics().writes(), 0);
    }

    #[test]
    fn test_write_failure_propagates() {
        let interceptor = read_only_interceptor(FailurePolicy::Propagate);
        let descriptor = CacheDescriptor::read("child:{#id}").unwrap();

        let result = interceptor.intercept(Some(&descriptor), &id_args(4), || find_child(4));
        assert_matches!(result, Err(Error::Backend(_)));
    }

    #[test]
    fn test_invalidate_failure_still_runs_operation() {
        let interceptor = read_only_interceptor(FailurePolicy::Propagate);
        let descriptor = CacheDescriptor::invalidate("child:{#id}").unwrap();
        let ran = Cell::new(false);

        let result = interceptor
            .intercept(Some(&descriptor), &id_args(4), || {
                ran.set(true);
                Ok(Some(1u8))
            })
            .unwrap();

        assert!(ran.get());
        assert_eq!(result, Some(1));
    }
}
