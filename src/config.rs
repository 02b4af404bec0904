//! Cache Settings
//!
//! Settings shared by the cache-aside template and the interception layer.
//! Loaded from YAML (`cache-aside.yaml`) or built in code; command-line flags
//! override file values in the binary.
//!
//! ```yaml
//! key_prefix: "CACHE:"
//! default_ttl_secs: 3600
//! failure_policy: suppress   # or: propagate
//! guard_mode: per_key        # or: global
//! redis_url: "redis://127.0.0.1:6379"
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{Error, Result};

/// Namespace tag prepended to every cache key
pub const DEFAULT_KEY_PREFIX: &str = "CACHE:";

/// Default cache entry lifetime (1 hour)
pub const DEFAULT_TTL_SECS: u64 = 60 * 60;

/// Default Redis endpoint
pub const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379";

/// Config file names probed by [`CacheSettings::find_and_load`]
const CONFIG_FILE_NAMES: [&str; 2] = ["cache-aside.yaml", "cache-aside.yml"];

/// What the interception layer does with a failure it encounters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Log the failure and produce no result
    #[default]
    Suppress,
    /// Return the failure to the caller
    Propagate,
}

/// Granularity of the population guard.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuardMode {
    /// One lock shared by every key
    Global,
    /// One lock per resolved cache key
    #[default]
    PerKey,
}

/// Cache-aside settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    /// Prefix applied to every cache key
    pub key_prefix: String,
    /// TTL used when a descriptor does not set one
    pub default_ttl_secs: u64,
    /// Failure handling in the interception layer
    pub failure_policy: FailurePolicy,
    /// Population guard granularity
    pub guard_mode: GuardMode,
    /// Backend endpoint used by the binary
    pub redis_url: String,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            default_ttl_secs: DEFAULT_TTL_SECS,
            failure_policy: FailurePolicy::default(),
            guard_mode: GuardMode::default(),
            redis_url: DEFAULT_REDIS_URL.to_string(),
        }
    }
}

impl CacheSettings {
    /// Load and validate settings from a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse and validate settings from YAML text
    pub fn from_yaml(content: &str) -> Result<Self> {
        let settings: Self = serde_yaml::from_str(content)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load `cache-aside.yaml` or `cache-aside.yml` from the working directory, if present
    pub fn find_and_load() -> Result<Option<Self>> {
        for name in CONFIG_FILE_NAMES {
            if Path::new(name).exists() {
                info!("Loading config from {}", name);
                return Ok(Some(Self::from_file(name)?));
            }
        }
        Ok(None)
    }

    /// Reject settings that would break key namespacing or TTLs
    pub fn validate(&self) -> Result<()> {
        if self.key_prefix.is_empty() {
            return Err(Error::Config("key_prefix must not be empty".to_string()));
        }
        if self.default_ttl_secs == 0 {
            return Err(Error::Config(
                "default_ttl_secs must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Default TTL as a duration
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }

    /// Prefix a key with the cache namespace
    pub fn namespaced(&self, key: &str) -> String {
        format!("{}{}", self.key_prefix, key)
    }
}

// =============================================================================
// Tests
// =============================================================================
