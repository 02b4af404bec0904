//! In-Memory Backend
//!
//! Process-local [`KvBackend`] with Redis-like semantics for strings, hashes
//! and lists. Expiry is lazy: an expired key is purged the next time it is
//! touched.
//!
//! # Design
//!
//! - DashMap for sharded concurrent access instead of a single RwLock
//! - Empty hashes and lists are removed, as Redis does
//! - Type mismatches fail like Redis `WRONGTYPE`

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::domain::ports::{checked_ttl, BackendStats, KvBackend, RemainingTtl};
use crate::error::{Error, Result};

/// Stored value kinds
#[derive(Debug, Clone)]
enum StoredValue {
    Str(String),
    Hash(HashMap<String, String>),
    List(Vec<String>),
}

/// A value plus its optional deadline
#[derive(Debug, Clone)]
struct StoredEntry {
    value: StoredValue,
    expires_at: Option<Instant>,
}

impl StoredEntry {
    fn persistent(value: StoredValue) -> Self {
        Self {
            value,
            expires_at: None,
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|deadline| deadline <= now)
    }

    fn is_empty_collection(&self) -> bool {
        match &self.value {
            StoredValue::Str(_) => false,
            StoredValue::Hash(h) => h.is_empty(),
            StoredValue::List(l) => l.is_empty(),
        }
    }

    fn as_str(&self, key: &str) -> Result<&String> {
        match &self.value {
            StoredValue::Str(s) => Ok(s),
            _ => Err(wrong_type(key, "string")),
        }
    }

    fn as_hash(&self, key: &str) -> Result<&HashMap<String, String>> {
        match &self.value {
            StoredValue::Hash(h) => Ok(h),
            _ => Err(wrong_type(key, "hash")),
        }
    }

    fn as_hash_mut(&mut self, key: &str) -> Result<&mut HashMap<String, String>> {
        match &mut self.value {
            StoredValue::Hash(h) => Ok(h),
            _ => Err(wrong_type(key, "hash")),
        }
    }

    fn as_list(&self, key: &str) -> Result<&Vec<String>> {
        match &self.value {
            StoredValue::List(l) => Ok(l),
            _ => Err(wrong_type(key, "list")),
        }
    }

    fn as_list_mut(&mut self, key: &str) -> Result<&mut Vec<String>> {
        match &mut self.value {
            StoredValue::List(l) => Ok(l),
            _ => Err(wrong_type(key, "list")),
        }
    }
}

fn wrong_type(key: &str, expected: &'static str) -> Error {
    Error::WrongType {
        key: key.to_string(),
        expected,
    }
}

fn add_integer(key: &str, current: &str, delta: i64) -> Result<i64> {
    current
        .parse::<i64>()
        .ok()
        .and_then(|n| n.checked_add(delta))
        .ok_or_else(|| Error::NotAnInteger {
            key: key.to_string(),
        })
}

fn deadline(ttl: Duration) -> Result<Instant> {
    Instant::now()
        .checked_add(ttl)
        .ok_or_else(|| Error::InvalidTtl(format!("expiration {}s overflows the clock", ttl.as_secs())))
}

/// Resolve a possibly negative index against a list length.
fn normalize_index(index: i64, len: usize) -> Option<usize> {
    let len = len as i64;
    let idx = if index < 0 { len + index } else { index };
    if idx < 0 || idx >= len {
        None
    } else {
        Some(idx as usize)
    }
}

/// In-memory backend for tests and embedding.
pub struct InMemoryBackend {
    /// Storage (key -> entry), sharded for concurrency
    storage: DashMap<String, StoredEntry>,
    /// Statistics
    reads: AtomicU64,
    writes: AtomicU64,
    deletes: AtomicU64,
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self {
            storage: DashMap::new(),
            reads: AtomicU64::new(0),
            writes: AtomicU64::new(0),
            deletes: AtomicU64::new(0),
        }
    }
}

impl InMemoryBackend {
    /// Create a new, empty backend
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live keys
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.storage.iter().filter(|e| !e.is_expired(now)).count()
    }

    /// Check if the backend holds no live keys
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every key
    pub fn clear(&self) {
        self.storage.clear();
    }

    fn purge_if_expired(&self, key: &str) {
        let now = Instant::now();
        self.storage.remove_if(key, |_, entry| entry.is_expired(now));
    }

    /// Run `f` against a live entry, if any.
    fn read<R>(&self, key: &str, f: impl FnOnce(&StoredEntry) -> Result<R>) -> Result<Option<R>> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        self.purge_if_expired(key);

        match self.storage.get(key) {
            Some(entry) if !entry.is_expired(Instant::now()) => f(&entry).map(Some),
            _ => Ok(None),
        }
    }

    /// Run `f` against a mutable entry. With `init`, a missing key is created
    /// first; without it, a missing key yields `Ok(None)`.
    fn mutate<R>(
        &self,
        key: &str,
        init: Option<fn() -> StoredValue>,
        f: impl FnOnce(&mut StoredEntry) -> Result<R>,
    ) -> Result<Option<R>> {
        self.writes.fetch_add(1, Ordering::Relaxed);
        self.purge_if_expired(key);

        let (result, now_empty) = match init {
            Some(init) => {
                let mut entry = self
                    .storage
                    .entry(key.to_string())
                    .or_insert_with(|| StoredEntry::persistent(init()));
                let result = f(&mut entry);
                (result, entry.is_empty_collection())
            }
            None => match self.storage.get_mut(key) {
                Some(mut entry) => {
                    let result = f(&mut entry);
                    (result, entry.is_empty_collection())
                }
                None => return Ok(None),
            },
        };

        if now_empty {
            self.storage
                .remove_if(key, |_, entry| entry.is_empty_collection());
        }

        result.map(Some)
    }
}

impl KvBackend for InMemoryBackend {
    fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.read(key, |_| Ok(()))?.is_some())
    }

    fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        let ttl = checked_ttl(ttl)?;
        let updated = self.mutate(key, None, |entry| {
            entry.expires_at = Some(deadline(ttl)?);
            Ok(())
        })?;
        Ok(updated.is_some())
    }

    fn ttl(&self, key: &str) -> Result<RemainingTtl> {
        let remaining = self.read(key, |entry| {
            Ok(match entry.expires_at {
                None => RemainingTtl::Persistent,
                Some(deadline) => {
                    RemainingTtl::Expires(deadline.saturating_duration_since(Instant::now()))
                }
            })
        })?;
        Ok(remaining.unwrap_or(RemainingTtl::Missing))
    }

    fn delete(&self, keys: &[String]) -> Result<u64> {
        let now = Instant::now();
        let mut deleted = 0;
        for key in keys {
            self.deletes.fetch_add(1, Ordering::Relaxed);
            if let Some((_, entry)) = self.storage.remove(key) {
                if !entry.is_expired(now) {
                    deleted += 1;
                }
            }
        }
        Ok(deleted)
    }

    fn get(&self, key: &str) -> Result<Option<String>> {
        self.read(key, |entry| entry.as_str(key).cloned())
    }

    fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let expires_at = match ttl {
            Some(ttl) => Some(deadline(checked_ttl(ttl)?)?),
            None => None,
        };
        self.writes.fetch_add(1, Ordering::Relaxed);
        self.storage.insert(
            key.to_string(),
            StoredEntry {
                value: StoredValue::Str(value.to_string()),
                expires_at,
            },
        );
        Ok(())
    }

    fn incr_by(&self, key: &str, delta: i64) -> Result<i64> {
        let value = self.mutate(
            key,
            Some(|| StoredValue::Str("0".to_string())),
            |entry| {
                let next = add_integer(key, entry.as_str(key)?, delta)?;
                entry.value = StoredValue::Str(next.to_string());
                Ok(next)
            },
        )?;
        Ok(value.unwrap_or(delta))
    }

    fn hset_all(&self, key: &str, fields: &[(String, String)]) -> Result<()> {
        if fields.is_empty() {
            return Ok(());
        }
        self.mutate(key, Some(|| StoredValue::Hash(HashMap::new())), |entry| {
            let hash = entry.as_hash_mut(key)?;
            for (field, value) in fields {
                hash.insert(field.clone(), value.clone());
            }
            Ok(())
        })?;
        Ok(())
    }

    fn hgetall(&self, key: &str) -> Result<HashMap<String, String>> {
        let hash = self.read(key, |entry| entry.as_hash(key).cloned())?;
        Ok(hash.unwrap_or_default())
    }

    fn hget(&self, key: &str, field: &str) -> Result<Option<String>> {
        let value = self.read(key, |entry| Ok(entry.as_hash(key)?.get(field).cloned()))?;
        Ok(value.flatten())
    }

    fn hdel(&self, key: &str, fields: &[String]) -> Result<u64> {
        self.deletes.fetch_add(1, Ordering::Relaxed);
        let removed = self.mutate(key, None, |entry| {
            let hash = entry.as_hash_mut(key)?;
            Ok(fields.iter().filter(|f| hash.remove(*f).is_some()).count() as u64)
        })?;
        Ok(removed.unwrap_or(0))
    }

    fn hincr_by(&self, key: &str, field: &str, delta: i64) -> Result<i64> {
        let value = self.mutate(key, Some(|| StoredValue::Hash(HashMap::new())), |entry| {
            let hash = entry.as_hash_mut(key)?;
            let current = hash.get(field).map(String::as_str).unwrap_or("0");
            let next = add_integer(key, current, delta)?;
            hash.insert(field.to_string(), next.to_string());
            Ok(next)
        })?;
        Ok(value.unwrap_or(delta))
    }

    fn rpush(&self, key: &str, values: &[String]) -> Result<u64> {
        if values.is_empty() {
            return self.llen(key);
        }
        let len = self.mutate(key, Some(|| StoredValue::List(Vec::new())), |entry| {
            let list = entry.as_list_mut(key)?;
            list.extend(values.iter().cloned());
            Ok(list.len() as u64)
        })?;
        Ok(len.unwrap_or(0))
    }

    fn lrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>> {
        let range = self.read(key, |entry| {
            let list = entry.as_list(key)?;
            let len = list.len() as i64;
            let start = if start < 0 { (len + start).max(0) } else { start };
            let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };
            if start > stop || start >= len {
                return Ok(Vec::new());
            }
            Ok(list[start as usize..=stop as usize].to_vec())
        })?;
        Ok(range.unwrap_or_default())
    }

    fn llen(&self, key: &str) -> Result<u64> {
        let len = self.read(key, |entry| Ok(entry.as_list(key)?.len() as u64))?;
        Ok(len.unwrap_or(0))
    }

    fn lindex(&self, key: &str, index: i64) -> Result<Option<String>> {
        let value = self.read(key, |entry| {
            let list = entry.as_list(key)?;
            Ok(normalize_index(index, list.len()).map(|i| list[i].clone()))
        })?;
        Ok(value.flatten())
    }

    fn lset(&self, key: &str, index: i64, value: &str) -> Result<()> {
        let updated = self.mutate(key, None, |entry| {
            let list = entry.as_list_mut(key)?;
            let idx = normalize_index(index, list.len()).ok_or_else(|| Error::IndexOutOfRange {
                key: key.to_string(),
                index,
            })?;
            list[idx] = value.to_string();
            Ok(())
        })?;
        updated.ok_or_else(|| Error::Backend(format!("no such key: {}", key)))
    }

    fn lrem(&self, key: &str, count: i64, value: &str) -> Result<u64> {
        self.deletes.fetch_add(1, Ordering::Relaxed);
        let removed = self.mutate(key, None, |entry| {
            let list = entry.as_list_mut(key)?;
            let limit = if count == 0 {
                usize::MAX
            } else {
                count.unsigned_abs() as usize
            };
            let before = list.len();

            if count >= 0 {
                let mut taken = 0;
                list.retain(|item| {
                    if taken < limit && item == value {
                        taken += 1;
                        false
                    } else {
                        true
                    }
                });
            } else {
                let mut taken = 0;
                let mut kept: Vec<String> = Vec::with_capacity(list.len());
                for item in list.drain(..).rev() {
                    if taken < limit && item == value {
                        taken += 1;
                    } else {
                        kept.push(item);
                    }
                }
                kept.reverse();
                *list = kept;
            }

            Ok((before - list.len()) as u64)
        })?;
        Ok(removed.unwrap_or(0))
    }

    fn stats(&self) -> BackendStats {
        BackendStats {
            key_count: self.storage.len() as u64,
            reads: self.reads.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
