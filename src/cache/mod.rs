//! Cache-Aside Core
//!
//! Load-or-compute over a key-value backend, guarded against duplicate
//! population on concurrent misses.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                       CacheTemplate                           │
//! ├──────────────────────────────────────────────────────────────┤
//! │  probe (lock-free) │ PopulationGuard │ CacheMetrics          │
//! │                    │ Global / PerKey │ hits, loads, writes   │
//! └──────────────────────────────────────────────────────────────┘
//!                              │
//!                           KvClient
//! ```
//!
//! # Guard Granularity
//!
//! - `Global`: one lock per template; concurrent misses on different keys
//!   serialize. Fine for low-throughput population paths.
//! - `PerKey`: one lock per resolved key, removed once idle.

mod guard;
mod metrics;
mod template;

pub use guard::PopulationGuard;
pub use metrics::{CacheMetrics, LatencyTracker, MetricsSnapshot};
pub use template::CacheTemplate;
pub(crate) use template::is_absent_marker;
