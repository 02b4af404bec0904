//! Population Guard
//!
//! Mutual exclusion around "re-check cache, load, write cache". Either one
//! lock for every key, or one lock per resolved cache key so misses on
//! different keys do not queue behind each other.

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;

use crate::config::GuardMode;

/// Guard over cache population
#[derive(Debug)]
pub enum PopulationGuard {
    /// One lock for the whole template instance
    Global(Mutex<()>),
    /// One lock per key, dropped once nobody holds or waits on it
    PerKey(DashMap<String, Arc<Mutex<()>>>),
}

impl PopulationGuard {
    /// Create a guard of the given granularity
    pub fn new(mode: GuardMode) -> Self {
        match mode {
            GuardMode::Global => PopulationGuard::Global(Mutex::new(())),
            GuardMode::PerKey => PopulationGuard::PerKey(DashMap::new()),
        }
    }

    /// Granularity of this guard
    pub fn mode(&self) -> GuardMode {
        match self {
            PopulationGuard::Global(_) => GuardMode::Global,
            PopulationGuard::PerKey(_) => GuardMode::PerKey,
        }
    }

    /// Run `f` while holding the lock for `key`.
    ///
    /// The lock is released on every exit path, including a panic in `f`.
    pub fn with_lock<R>(&self, key: &str, f: impl FnOnce() -> R) -> R {
        match self {
            PopulationGuard::Global(lock) => {
                let _held = lock.lock();
                f()
            }
            PopulationGuard::PerKey(locks) => {
                let entry = KeyLock {
                    locks,
                    key,
                    lock: Some(
                        locks
                            .entry(key.to_string())
                            .or_insert_with(|| Arc::new(Mutex::new(())))
                            .clone(),
                    ),
                };
                let _held = entry.lock.as_ref().map(|lock| lock.lock());
                f()
            }
        }
    }

    /// Number of per-key locks currently tracked (always 0 for a global guard)
    pub fn tracked_keys(&self) -> usize {
        match self {
            PopulationGuard::Global(_) => 0,
            PopulationGuard::PerKey(locks) => locks.len(),
        }
    }
}

/// Reference to one per-key lock, released from the table on drop
struct KeyLock<'a> {
    locks: &'a DashMap<String, Arc<Mutex<()>>>,
    key: &'a str,
    lock: Option<Arc<Mutex<()>>>,
}

impl Drop for KeyLock<'_> {
    fn drop(&mut self) {
        drop(self.lock.take());
        // Only the table's own reference left: nobody holds or waits on it
        self.locks.remove_if(self.key, |_, l| Arc::strong_count(l) == 1);
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Barrier;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_modes() {
        assert_eq!(PopulationGuard::new(GuardMode::Global).mode(), GuardMode::Global);
        assert_eq!(PopulationGuard::new(GuardMode::PerKey).mode(), GuardMode::PerKey);
    }

    #[test]
    fn test_per_key_table_is_cleaned_up() {
        let guard = PopulationGuard::new(GuardMode::PerKey);

        let value = guard.with_lock("a", || 7);
        assert_eq!(value, 7);
        assert_eq!(guard.tracked_keys(), 0);
    }

    #[test]
    fn test_same_key_is_exclusive() {
        for mode in [GuardMode::Global, GuardMode::PerKey] {
            let guard = Arc::new(PopulationGuard::new(mode));
            let inside = Arc::new(AtomicUsize::new(0));
            let max_inside = Arc::new(AtomicUsize::new(0));

            let handles: Vec<_> = (0..8)
                .map(|_| {
                    let guard = Arc::clone(&guard);
                    let inside = Arc::clone(&inside);
                    let max_inside = Arc::clone(&max_inside);
                    thread::spawn(move || {
                        guard.with_lock("same", || {
                            let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                            max_inside.fetch_max(now, Ordering::SeqCst);
                            thread::sleep(Duration::from_millis(2));
                            inside.fetch_sub(1, Ordering::SeqCst);
                        });
                    })
                })
                .collect();

            for handle in handles {
                handle.join().unwrap();
            }

            assert_eq!(max_inside.load(Ordering::SeqCst), 1, "mode {:?}", mode);
            assert_eq!(guard.tracked_keys(), 0);
        }
    }

    #[test]
    fn test_per_key_allows_different_keys_concurrently() {
        let guard = Arc::new(PopulationGuard::new(GuardMode::PerKey));
        let barrier = Arc::new(Barrier::new(2));

        // Both closures must be inside their locks at the same time to pass the barrier
        let handles: Vec<_> = ["a", "b"]
            .into_iter()
            .map(|key| {
                let guard = Arc::clone(&guard);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    guard.with_lock(key, || {
                        barrier.wait();
                    });
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
    }

    #[test]
    fn test_per_key_entry_removed_after_panic() {
        let guard = Arc::new(PopulationGuard::new(GuardMode::PerKey));

        let g = Arc::clone(&guard);
        let result = thread::spawn(move || {
            g.with_lock("k", || panic!("load exploded"));
        })
        .join();
        assert!(result.is_err());

        assert_eq!(guard.tracked_keys(), 0);
        assert_eq!(guard.with_lock("k", || 2), 2);
    }

    #[test]
    fn test_lock_released_after_panic() {
        let guard = Arc::new(PopulationGuard::new(GuardMode::Global));

        let g = Arc::clone(&guard);
        let result = thread::spawn(move || {
            g.with_lock("k", || panic!("load exploded"));
        })
        .join();
        assert!(result.is_err());

        // parking_lot locks are not poisoned; the next caller proceeds
        assert_eq!(guard.with_lock("k", || 1), 1);
    }
}
