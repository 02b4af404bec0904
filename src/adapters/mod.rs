//! Infrastructure Adapters
//!
//! Implementations of the [`KvBackend`](crate::domain::KvBackend) port.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     KvBackend (Port)                             │
//! └─────────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  InMemoryBackend (DashMap)  │  RedisBackend (feature "redis")   │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use std::sync::Arc;
//! use cache_aside::adapters::RedisBackend;
//! use cache_aside::KvClient;
//!
//! let backend = Arc::new(RedisBackend::connect("redis://127.0.0.1:6379")?);
//! let client = KvClient::new(backend);
//! ```

mod memory;
#[cfg(feature = "redis")]
mod redis_backend;

pub use memory::InMemoryBackend;
#[cfg(feature = "redis")]
pub use redis_backend::RedisBackend;
