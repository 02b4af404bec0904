//! cache-aside - Cache-Aside Layer over a Key-Value Store
//!
//! Typed access to a Redis-like store, a load-or-compute template that keeps
//! concurrent misses from populating the same key twice, and declarative
//! caching of whole operations from a key template.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────┐   ┌──────────────────────┐
//! │   CacheInterceptor   │   │    CacheTemplate     │
//! │ (descriptor, policy) │   │ (double-checked load)│
//! └──────────┬───────────┘   └──────────┬───────────┘
//!            └────────────┬─────────────┘
//!                         ▼
//!                     KvClient  (JSON values, TTLs, hashes, lists)
//!                         │
//!                  dyn KvBackend
//!              ┌──────────┴──────────┐
//!        InMemoryBackend        RedisBackend
//! ```
//!
//! # Modules
//!
//! - [`adapters`] - Backend implementations of the store port
//! - [`cache`] - Cache-aside template, population guard, metrics
//! - [`client`] - Typed key-value client
//! - [`config`] - Settings, failure policy, guard mode
//! - [`domain`] - Store port and TTL types
//! - [`error`] - Error types
//! - [`intercept`] - Key templates, descriptors, interceptor

pub mod adapters;
pub mod cache;
pub mod client;
pub mod config;
pub mod domain;
pub mod error;
pub mod intercept;

// Re-export commonly used types
pub use adapters::InMemoryBackend;
#[cfg(feature = "redis")]
pub use adapters::RedisBackend;
pub use cache::{CacheMetrics, CacheTemplate, MetricsSnapshot};
pub use client::KvClient;
pub use config::{CacheSettings, FailurePolicy, GuardMode};
pub use domain::{KvBackend, RemainingTtl, TimeUnit};
pub use error::{Error, Result};
pub use intercept::{CacheDescriptor, CacheInterceptor, CacheMode, CacheableOperation, CallArgs, KeyTemplate};
