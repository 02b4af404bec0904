//! Redis Backend
//!
//! [`KvBackend`] over a single synchronous Redis connection. The connection
//! is shared behind a mutex so one backend can serve every caller thread;
//! each call is one request/response round trip.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use redis::{Cmd, FromRedisValue};
use tracing::{debug, info};

use crate::domain::ports::{checked_ttl, BackendStats, KvBackend, RemainingTtl};
use crate::error::{Error, Result};

/// Redis-backed key-value store
pub struct RedisBackend {
    conn: Mutex<redis::Connection>,
    reads: AtomicU64,
    writes: AtomicU64,
    deletes: AtomicU64,
}

impl RedisBackend {
    /// Connect to the server at `url` (e.g. `redis://127.0.0.1:6379/0`).
    pub fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let conn = client.get_connection()?;
        info!(url = %url, "Connected to Redis");

        Ok(Self {
            conn: Mutex::new(conn),
            reads: AtomicU64::new(0),
            writes: AtomicU64::new(0),
            deletes: AtomicU64::new(0),
        })
    }

    /// Round-trip a PING.
    pub fn ping(&self) -> Result<()> {
        let reply: String = self.query(&redis::cmd("PING"))?;
        debug!(reply = %reply, "Redis ping");
        Ok(())
    }

    fn query<T: FromRedisValue>(&self, cmd: &Cmd) -> Result<T> {
        let mut conn = self.conn.lock();
        Ok(cmd.query(&mut *conn)?)
    }

    fn read<T: FromRedisValue>(&self, cmd: &Cmd) -> Result<T> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        self.query(cmd)
    }

    fn write<T: FromRedisValue>(&self, cmd: &Cmd) -> Result<T> {
        self.writes.fetch_add(1, Ordering::Relaxed);
        self.query(cmd)
    }
}

fn millis(ttl: Duration) -> Result<u64> {
    Ok(checked_ttl(ttl)?.as_millis() as u64)
}

impl KvBackend for RedisBackend {
    fn exists(&self, key: &str) -> Result<bool> {
        self.read(redis::cmd("EXISTS").arg(key))
    }

    fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        self.write(redis::cmd("PEXPIRE").arg(key).arg(millis(ttl)?))
    }

    fn ttl(&self, key: &str) -> Result<RemainingTtl> {
        let ms: i64 = self.read(redis::cmd("PTTL").arg(key))?;
        Ok(match ms {
            -2 => RemainingTtl::Missing,
            ms if ms < 0 => RemainingTtl::Persistent,
            ms => RemainingTtl::Expires(Duration::from_millis(ms as u64)),
        })
    }

    fn delete(&self, keys: &[String]) -> Result<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        self.deletes.fetch_add(keys.len() as u64, Ordering::Relaxed);
        let mut cmd = redis::cmd("DEL");
        for key in keys {
            cmd.arg(key.as_str());
        }
        self.query(&cmd)
    }

    fn get(&self, key: &str) -> Result<Option<String>> {
        self.read(redis::cmd("GET").arg(key))
    }

    fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        if let Some(ttl) = ttl {
            cmd.arg("PX").arg(millis(ttl)?);
        }
        self.write(&cmd)
    }

    fn incr_by(&self, key: &str, delta: i64) -> Result<i64> {
        self.write(redis::cmd("INCRBY").arg(key).arg(delta))
    }

    fn hset_all(&self, key: &str, fields: &[(String, String)]) -> Result<()> {
        if fields.is_empty() {
            return Ok(());
        }
        let mut cmd = redis::cmd("HSET");
        cmd.arg(key);
        for (field, value) in fields {
            cmd.arg(field.as_str()).arg(value.as_str());
        }
        let _added: u64 = self.write(&cmd)?;
        Ok(())
    }

    fn hgetall(&self, key: &str) -> Result<HashMap<String, String>> {
        self.read(redis::cmd("HGETALL").arg(key))
    }

    fn hget(&self, key: &str, field: &str) -> Result<Option<String>> {
        self.read(redis::cmd("HGET").arg(key).arg(field))
    }

    fn hdel(&self, key: &str, fields: &[String]) -> Result<u64> {
        if fields.is_empty() {
            return Ok(0);
        }
        self.deletes.fetch_add(1, Ordering::Relaxed);
        let mut cmd = redis::cmd("HDEL");
        cmd.arg(key);
        for field in fields {
            cmd.arg(field.as_str());
        }
        self.query(&cmd)
    }

    fn hincr_by(&self, key: &str, field: &str, delta: i64) -> Result<i64> {
        self.write(redis::cmd("HINCRBY").arg(key).arg(field).arg(delta))
    }

    fn rpush(&self, key: &str, values: &[String]) -> Result<u64> {
        if values.is_empty() {
            return self.llen(key);
        }
        let mut cmd = redis::cmd("RPUSH");
        cmd.arg(key);
        for value in values {
            cmd.arg(value.as_str());
        }
        self.write(&cmd)
    }

    fn lrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>> {
        self.read(redis::cmd("LRANGE").arg(key).arg(start).arg(stop))
    }

    fn llen(&self, key: &str) -> Result<u64> {
        self.read(redis::cmd("LLEN").arg(key))
    }

    fn lindex(&self, key: &str, index: i64) -> Result<Option<String>> {
        self.read(redis::cmd("LINDEX").arg(key).arg(index))
    }

    fn lset(&self, key: &str, index: i64, value: &str) -> Result<()> {
        self.write::<()>(redis::cmd("LSET").arg(key).arg(index).arg(value))
            .map_err(|err| match err {
                Error::Redis(e) if e.to_string().contains("index out of range") => {
                    Error::IndexOutOfRange {
                        key: key.to_string(),
                        index,
                    }
                }
                other => other,
            })
    }

    fn lrem(&self, key: &str, count: i64, value: &str) -> Result<u64> {
        self.deletes.fetch_add(1, Ordering::Relaxed);
        self.query(redis::cmd("LREM").arg(key).arg(count).arg(value))
    }

    fn stats(&self) -> BackendStats {
        BackendStats {
            key_count: 0,
            reads: self.reads.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
        }
    }
}
