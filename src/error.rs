//! Error types for the cache-aside layer

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the cache-aside layer
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Backend Errors
    // =========================================================================
    /// Generic backend failure
    #[error("Backend error: {0}")]
    Backend(String),

    /// Redis client error
    #[cfg(feature = "redis")]
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Operation against a key holding the wrong kind of value
    #[error("Wrong type for key {key}: expected {expected}")]
    WrongType { key: String, expected: &'static str },

    /// Increment on a value that is not an integer
    #[error("Value at {key} is not an integer or out of range")]
    NotAnInteger { key: String },

    /// List index outside the list bounds
    #[error("Index {index} out of range for list {key}")]
    IndexOutOfRange { key: String, index: i64 },

    /// Zero or otherwise unusable TTL
    #[error("Invalid TTL: {0}")]
    InvalidTtl(String),

    // =========================================================================
    // Serialization Errors
    // =========================================================================
    /// JSON encode/decode failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // =========================================================================
    // Key Template Errors
    // =========================================================================
    /// Malformed key template
    #[error("Invalid key template '{template}': {reason}")]
    KeyTemplateParse { template: String, reason: String },

    /// Placeholder references an argument the call does not bind
    #[error("Key template '{template}' references unbound parameter '{parameter}'")]
    UnboundParameter { template: String, parameter: String },

    /// Template resolved to an empty key
    #[error("Key template '{0}' resolved to an empty key")]
    EmptyKey(String),

    // =========================================================================
    // Operation Errors
    // =========================================================================
    /// Load function or wrapped operation failed
    #[error("Operation '{operation}' failed: {reason}")]
    OperationFailed { operation: String, reason: String },

    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML parse error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl Error {
    /// Wrap a caller-supplied failure, keeping the full cause chain.
    pub fn operation(operation: impl Into<String>, err: anyhow::Error) -> Self {
        Error::OperationFailed {
            operation: operation.into(),
            reason: format!("{:#}", err),
        }
    }

    /// True for failures raised while deriving a cache key.
    pub fn is_key_resolution(&self) -> bool {
        matches!(
            self,
            Error::KeyTemplateParse { .. } | Error::UnboundParameter { .. } | Error::EmptyKey(_)
        )
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_keeps_context_chain() {
        let err = anyhow::anyhow!("connection reset").context("loading child 42");
        let wrapped = Error::operation("child.find", err);

        let msg = wrapped.to_string();
        assert!(msg.contains("child.find"));
        assert!(msg.contains("loading child 42"));
        assert!(msg.contains("connection reset"));
    }

    #[test]
    fn test_key_resolution_classification() {
        assert!(Error::EmptyKey("{id}".into()).is_key_resolution());
        assert!(Error::UnboundParameter {
            template: "child:{id}".into(),
            parameter: "id".into(),
        }
        .is_key_resolution());
        assert!(!Error::Backend("down".into()).is_key_resolution());
    }

    #[test]
    fn test_display_formats() {
        let err = Error::IndexOutOfRange {
            key: "list".into(),
            index: 9,
        };
        assert_eq!(err.to_string(), "Index 9 out of range for list list");

        let err = Error::WrongType {
            key: "k".into(),
            expected: "hash",
        };
        assert_eq!(err.to_string(), "Wrong type for key k: expected hash");
    }
}
