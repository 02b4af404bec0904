//! Key-Value Client Wrapper
//!
//! Typed convenience operations over a shared [`KvBackend`]. Every call maps
//! to one (occasionally two) backend primitives and reaches the backend
//! synchronously; nothing is cached locally. Values are stored as JSON text,
//! so anything `Serialize` can be written and read back as its
//! `DeserializeOwned` counterpart.
//!
//! Expirations are given in whole seconds unless a [`TimeUnit`] is passed
//! explicitly.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::domain::ports::{checked_ttl, KvBackend, RemainingTtl, TimeUnit};
use crate::error::{Error, Result};

/// Prefix of the tombstone written over list elements before removal
pub const LIST_TOMBSTONE_PREFIX: &str = "__cache_aside:removed:";

fn encode<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    Ok(serde_json::to_string(value)?)
}

fn decode<T: DeserializeOwned>(raw: &str) -> Result<T> {
    Ok(serde_json::from_str(raw)?)
}

fn seconds(secs: u64) -> Result<Duration> {
    checked_ttl(Duration::from_secs(secs))
}

/// Position of a possibly negative list index, if it is in range
fn resolve_index(index: i64, len: usize) -> Option<usize> {
    let len = i64::try_from(len).ok()?;
    let position = if index < 0 { index.checked_add(len)? } else { index };
    (0..len).contains(&position).then_some(position as usize)
}

/// Typed client over a key-value backend
#[derive(Clone)]
pub struct KvClient {
    backend: Arc<dyn KvBackend>,
    /// Serializes index removals issued through this client
    removal_lock: Arc<Mutex<()>>,
}

impl KvClient {
    /// Create a client over the given backend
    pub fn new(backend: Arc<dyn KvBackend>) -> Self {
        Self {
            backend,
            removal_lock: Arc::new(Mutex::new(())),
        }
    }

    /// The underlying backend
    pub fn backend(&self) -> &Arc<dyn KvBackend> {
        &self.backend
    }

    // =========================================================================
    // Keys
    // =========================================================================

    /// Check whether a key exists
    pub fn has_key(&self, key: &str) -> Result<bool> {
        self.backend.exists(key)
    }

    /// Set a key's expiration in seconds
    pub fn expire(&self, key: &str, secs: u64) -> Result<bool> {
        self.backend.expire(key, seconds(secs)?)
    }

    /// Delete a single key, returning whether it existed
    pub fn delete_key(&self, key: &str) -> Result<bool> {
        Ok(self.backend.delete(&[key.to_string()])? == 1)
    }

    /// Delete several keys.
    ///
    /// Succeeds only when every requested key was deleted; a partial delete
    /// reports `false`. An empty request is `false`.
    pub fn delete_keys(&self, keys: &[&str]) -> Result<bool> {
        if keys.is_empty() {
            return Ok(false);
        }
        let owned: Vec<String> = keys.iter().map(|k| k.to_string()).collect();
        let deleted = self.backend.delete(&owned)?;
        Ok(deleted == keys.len() as u64)
    }

    /// Remaining lifetime of a key
    pub fn remaining_ttl(&self, key: &str) -> Result<RemainingTtl> {
        self.backend.ttl(key)
    }

    // =========================================================================
    // Scalars
    // =========================================================================

    /// Store a value without expiry
    pub fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        self.backend.set(key, &encode(value)?, None)
    }

    /// Store a value expiring after `secs` seconds
    pub fn set_ex<T: Serialize + ?Sized>(&self, key: &str, value: &T, secs: u64) -> Result<()> {
        self.backend.set(key, &encode(value)?, Some(seconds(secs)?))
    }

    /// Store a value expiring after `amount` of `unit`
    pub fn set_with_unit<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        amount: u64,
        unit: TimeUnit,
    ) -> Result<()> {
        let ttl = checked_ttl(unit.to_duration(amount))?;
        self.backend.set(key, &encode(value)?, Some(ttl))
    }

    /// Read and decode a value
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        self.backend.get(key)?.map(|raw| decode(&raw)).transpose()
    }

    /// Read the stored text as-is
    pub fn get_raw(&self, key: &str) -> Result<Option<String>> {
        self.backend.get(key)
    }

    /// Increment an integer value by one
    pub fn incr(&self, key: &str) -> Result<i64> {
        self.backend.incr_by(key, 1)
    }

    /// Increment an integer value by `delta` (may be negative)
    pub fn incr_by(&self, key: &str, delta: i64) -> Result<i64> {
        self.backend.incr_by(key, delta)
    }

    // =========================================================================
    // Hashes
    // =========================================================================

    /// Set several hash fields
    pub fn set_hash<V: Serialize>(&self, key: &str, fields: &HashMap<String, V>) -> Result<()> {
        let encoded = fields
            .iter()
            .map(|(field, value)| Ok((field.clone(), encode(value)?)))
            .collect::<Result<Vec<_>>>()?;
        self.backend.hset_all(key, &encoded)
    }

    /// Set several hash fields, then expire the hash after `secs` seconds
    pub fn set_hash_ex<V: Serialize>(
        &self,
        key: &str,
        fields: &HashMap<String, V>,
        secs: u64,
    ) -> Result<()> {
        let ttl = seconds(secs)?;
        self.set_hash(key, fields)?;
        self.backend.expire(key, ttl)?;
        Ok(())
    }

    /// Read every hash field
    pub fn get_hash<V: DeserializeOwned>(&self, key: &str) -> Result<HashMap<String, V>> {
        self.backend
            .hgetall(key)?
            .into_iter()
            .map(|(field, raw)| Ok((field, decode(&raw)?)))
            .collect()
    }

    /// Read one hash field
    pub fn get_hash_field<V: DeserializeOwned>(&self, key: &str, field: &str) -> Result<Option<V>> {
        self.backend
            .hget(key, field)?
            .map(|raw| decode(&raw))
            .transpose()
    }

    /// Delete hash fields; true only if every field existed
    pub fn delete_hash_fields(&self, key: &str, fields: &[&str]) -> Result<bool> {
        let owned: Vec<String> = fields.iter().map(|f| f.to_string()).collect();
        let deleted = self.backend.hdel(key, &owned)?;
        Ok(deleted == fields.len() as u64)
    }

    /// Increment a hash field by one
    pub fn hash_incr(&self, key: &str, field: &str) -> Result<i64> {
        self.backend.hincr_by(key, field, 1)
    }

    /// Increment a hash field by `delta` (may be negative)
    pub fn hash_incr_by(&self, key: &str, field: &str, delta: i64) -> Result<i64> {
        self.backend.hincr_by(key, field, delta)
    }

    // =========================================================================
    // Lists
    // =========================================================================

    /// Append one element, returning the new length
    pub fn list_push<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<u64> {
        self.backend.rpush(key, &[encode(value)?])
    }

    /// Append one element, then expire the list after `secs` seconds
    pub fn list_push_ex<T: Serialize + ?Sized>(&self, key: &str, value: &T, secs: u64) -> Result<u64> {
        let ttl = seconds(secs)?;
        let len = self.list_push(key, value)?;
        self.backend.expire(key, ttl)?;
        Ok(len)
    }

    /// Append several elements, returning the new length
    pub fn list_push_all<T: Serialize>(&self, key: &str, values: &[T]) -> Result<u64> {
        let encoded = values.iter().map(encode).collect::<Result<Vec<_>>>()?;
        self.backend.rpush(key, &encoded)
    }

    /// Append several elements, then expire the list after `secs` seconds
    pub fn list_push_all_ex<T: Serialize>(&self, key: &str, values: &[T], secs: u64) -> Result<u64> {
        let ttl = seconds(secs)?;
        let len = self.list_push_all(key, values)?;
        self.backend.expire(key, ttl)?;
        Ok(len)
    }

    /// Elements between `start` and `stop`, inclusive (negative counts from the tail)
    pub fn list_range<T: DeserializeOwned>(&self, key: &str, start: i64, stop: i64) -> Result<Vec<T>> {
        self.backend
            .lrange(key, start, stop)?
            .iter()
            .map(|raw| decode(raw))
            .collect()
    }

    /// List length
    pub fn list_len(&self, key: &str) -> Result<u64> {
        self.backend.llen(key)
    }

    /// Element at `index`
    pub fn list_index<T: DeserializeOwned>(&self, key: &str, index: i64) -> Result<Option<T>> {
        self.backend
            .lindex(key, index)?
            .map(|raw| decode(&raw))
            .transpose()
    }

    /// Overwrite the element at `index`
    pub fn list_update_index<T: Serialize + ?Sized>(&self, key: &str, index: i64, value: &T) -> Result<()> {
        self.backend.lset(key, index, &encode(value)?)
    }

    /// Remove the element at `index`.
    ///
    /// The element is overwritten with a tombstone, then every element equal
    /// to that tombstone is removed. Each call uses a fresh tombstone, and
    /// removals through clones of this client are serialized, but writers
    /// elsewhere that shift the list between the two steps can still cause
    /// a different element to be removed.
    pub fn list_remove_index(&self, key: &str, index: i64) -> Result<()> {
        self.list_remove_indexes(key, &[index]).map(|_| ())
    }

    /// Remove the elements at every given index, returning how many were removed.
    ///
    /// All tombstones are written before the single removal pass, so indices
    /// refer to positions in the list as it was before the call. Every index
    /// is checked first; if one is out of range nothing is changed.
    pub fn list_remove_indexes(&self, key: &str, indexes: &[i64]) -> Result<u64> {
        if indexes.is_empty() {
            return Ok(0);
        }
        let tombstone = format!("{}{}", LIST_TOMBSTONE_PREFIX, Uuid::new_v4());

        let _held = self.removal_lock.lock();
        let snapshot = self.backend.lrange(key, 0, -1)?;
        if snapshot.is_empty() {
            return Err(Error::Backend(format!("no such key: {}", key)));
        }
        let positions = indexes
            .iter()
            .map(|&index| {
                resolve_index(index, snapshot.len()).ok_or_else(|| Error::IndexOutOfRange {
                    key: key.to_string(),
                    index,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        for (written, &position) in positions.iter().enumerate() {
            if let Err(err) = self.backend.lset(key, position as i64, &tombstone) {
                self.restore(key, &positions[..written], &snapshot);
                return Err(err);
            }
        }
        let removed = self.backend.lrem(key, 0, &tombstone)?;
        debug!(key = %key, requested = indexes.len(), removed, "Removed list elements by index");
        Ok(removed)
    }

    /// Put back elements already overwritten by a failed removal
    fn restore(&self, key: &str, positions: &[usize], snapshot: &[String]) {
        for &position in positions {
            if let Err(err) = self.backend.lset(key, position as i64, &snapshot[position]) {
                warn!(key = %key, position, error = %err, "Failed to restore list element");
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
