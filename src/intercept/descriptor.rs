//! Cache descriptors attached to operations

use std::time::Duration;

use super::args::CallArgs;
use super::key::KeyTemplate;
use crate::error::Result;

/// What the interceptor does around an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheMode {
    /// Serve from cache, otherwise run the operation and cache its result
    Read,
    /// Delete the cached entry, then run the operation
    Invalidate,
}

/// Cache behavior declared for one operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheDescriptor {
    key: KeyTemplate,
    ttl_secs: Option<u64>,
    mode: CacheMode,
}

impl CacheDescriptor {
    /// Read-through caching under `template`, using the configured default TTL
    pub fn read(template: &str) -> Result<Self> {
        Ok(Self {
            key: KeyTemplate::parse(template)?,
            ttl_secs: None,
            mode: CacheMode::Read,
        })
    }

    /// Invalidate the entry under `template` before the operation runs
    pub fn invalidate(template: &str) -> Result<Self> {
        Ok(Self {
            key: KeyTemplate::parse(template)?,
            ttl_secs: None,
            mode: CacheMode::Invalidate,
        })
    }

    /// Override the TTL in seconds. Ignored in invalidate mode.
    pub fn with_ttl(mut self, secs: u64) -> Self {
        self.ttl_secs = Some(secs);
        self
    }

    pub fn key_template(&self) -> &KeyTemplate {
        &self.key
    }

    /// Explicit TTL in seconds, `None` when the settings default applies
    pub fn ttl_secs(&self) -> Option<u64> {
        self.ttl_secs
    }

    /// Explicit TTL, or `default` when none was set
    pub fn ttl_or(&self, default: Duration) -> Duration {
        self.ttl_secs.map_or(default, Duration::from_secs)
    }

    pub fn mode(&self) -> CacheMode {
        self.mode
    }

    /// Render the (un-namespaced) key for one call
    pub fn resolve_key(&self, args: &CallArgs) -> Result<String> {
        self.key.resolve(args)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use assert_matches::assert_matches;
    use serde_json::json;

    #[test]
    fn test_read_defaults() {
        let descriptor = CacheDescriptor::read("child:{#id}").unwrap();
        assert_eq!(descriptor.mode(), CacheMode::Read);
        assert_eq!(descriptor.ttl_secs(), None);
        assert_eq!(descriptor.ttl_or(Duration::from_secs(60)), Duration::from_secs(60));
        assert_eq!(descriptor.key_template().source(), "child:{#id}");
    }

    #[test]
    fn test_invalidate_with_ttl() {
        let descriptor = CacheDescriptor::invalidate("child:{#id}").unwrap().with_ttl(30);
        assert_eq!(descriptor.mode(), CacheMode::Invalidate);
        assert_eq!(descriptor.ttl_secs(), Some(30));
        assert_eq!(descriptor.ttl_or(Duration::from_secs(60)), Duration::from_secs(30));
    }

    #[test]
    fn test_resolve_key() {
        let descriptor = CacheDescriptor::read("child:{#id}").unwrap();
        let args = CallArgs::new().with_value("id", json!(42));
        assert_eq!(descriptor.resolve_key(&args).unwrap(), "child:42");
    }

    #[test]
    fn test_bad_template_rejected_up_front() {
        assert_matches!(CacheDescriptor::read("child:{#id"), Err(Error::KeyTemplateParse { .. }));
    }
}
