//! Domain Layer
//!
//! Ports and value objects shared by the client wrapper, the cache-aside
//! template and the interception layer.
//!
//! # Usage
//!
//! ```ignore
//! use cache_aside::domain::KvBackend;
//!
//! fn warm<B: KvBackend + ?Sized>(backend: &B) -> cache_aside::Result<()> {
//!     backend.set("CACHE:warm", "true", None)
//! }
//! ```

pub mod ports;

pub use ports::{checked_ttl, BackendStats, KvBackend, RemainingTtl, TimeUnit};
