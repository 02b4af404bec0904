//! Declarative Caching
//!
//! Attach a [`CacheDescriptor`] to an operation and let the
//! [`CacheInterceptor`] decide whether to serve it from the cache, run it
//! and cache the result, or invalidate before running it.
//!
//! ```text
//! caller ─▶ CacheInterceptor ─▶ KeyTemplate::resolve(CallArgs)
//!                 │                     │
//!                 │               "CACHE:child:42"
//!                 ▼                     ▼
//!            operation()  ◀──miss── KvClient
//! ```

mod args;
mod descriptor;
mod interceptor;
mod key;
mod proptest;

pub use args::CallArgs;
pub use descriptor::{CacheDescriptor, CacheMode};
pub use interceptor::{CacheInterceptor, CacheableOperation};
pub use key::KeyTemplate;
