//! cache-aside CLI
//!
//! Inspect and edit the entries a cache-aside deployment keeps in Redis.
//! Keys are namespaced with the configured prefix unless `--raw` is given,
//! values are read and written as JSON.
//!
//! ```text
//! cache-aside get child:42            # reads CACHE:child:42
//! cache-aside set child:42 '{"id":42}' --ttl 60
//! cache-aside --raw del CACHE:child:42
//! ```

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use tracing::{debug, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cache_aside::{CacheSettings, KvClient, RedisBackend};

// =============================================================================
// CLI Arguments
// =============================================================================

/// cache-aside - Inspect and edit cached entries
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Settings file (defaults to ./cache-aside.yaml when present)
    #[arg(long, env = "CACHE_ASIDE_CONFIG")]
    config: Option<PathBuf>,

    /// Redis URL
    #[arg(long, env = "REDIS_URL")]
    redis_url: Option<String>,

    /// Key namespace prefix
    #[arg(long, env = "CACHE_KEY_PREFIX")]
    key_prefix: Option<String>,

    /// Use keys exactly as given, without the namespace prefix
    #[arg(long)]
    raw: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "warn")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Get a value
    Get { key: String },
    /// Set a value with optional TTL
    Set {
        key: String,
        /// JSON value (plain text is stored as a JSON string)
        value: String,
        /// TTL in seconds
        #[arg(long)]
        ttl: Option<u64>,
    },
    /// Delete keys; true only if every key existed
    Del {
        #[arg(required = true)]
        keys: Vec<String>,
    },
    /// Remaining TTL in seconds (-1 persistent, -2 missing)
    Ttl { key: String },
    /// Check whether a key exists
    Exists { key: String },
    /// Set a TTL in seconds on an existing key
    Expire { key: String, secs: u64 },
    /// Increment an integer value
    Incr {
        key: String,
        #[arg(long, default_value_t = 1, allow_negative_numbers = true)]
        by: i64,
    },
    /// Get one hash field
    Hget { key: String, field: String },
    /// Get every hash field
    Hgetall { key: String },
    /// Set hash fields given as field=value
    Hset {
        key: String,
        #[arg(required = true)]
        fields: Vec<String>,
        /// TTL in seconds
        #[arg(long)]
        ttl: Option<u64>,
    },
    /// Increment an integer hash field
    Hincr {
        key: String,
        field: String,
        #[arg(long, default_value_t = 1, allow_negative_numbers = true)]
        by: i64,
    },
    /// Append values to a list
    Rpush {
        key: String,
        #[arg(required = true)]
        values: Vec<String>,
        /// TTL in seconds
        #[arg(long)]
        ttl: Option<u64>,
    },
    /// Read a list range (inclusive, negative indices count from the tail)
    Lrange {
        key: String,
        #[arg(default_value_t = 0, allow_negative_numbers = true)]
        start: i64,
        #[arg(default_value_t = -1, allow_negative_numbers = true)]
        stop: i64,
    },
    /// List length
    Llen { key: String },
    /// Read one list element
    Lindex {
        key: String,
        #[arg(allow_negative_numbers = true)]
        index: i64,
    },
    /// Overwrite one list element
    Lset {
        key: String,
        #[arg(allow_negative_numbers = true)]
        index: i64,
        value: String,
    },
    /// Remove list elements by position
    LremIndex {
        key: String,
        #[arg(required = true, allow_negative_numbers = true)]
        indexes: Vec<i64>,
    },
}

// =============================================================================
// Main
// =============================================================================

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    init_logging(&args);

    let settings = load_settings(&args)?;
    debug!(
        redis_url = %settings.redis_url,
        key_prefix = %settings.key_prefix,
        "Resolved settings"
    );

    let backend = RedisBackend::connect(&settings.redis_url)
        .with_context(|| format!("connecting to {}", settings.redis_url))?;
    let client = KvClient::new(Arc::new(backend));

    let keys = KeyScope {
        settings: &settings,
        raw: args.raw,
    };
    let output = execute(&client, &keys, args.command)?;

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

/// File settings (explicit path or auto-detected) with CLI overrides applied
fn load_settings(args: &Args) -> anyhow::Result<CacheSettings> {
    let mut settings = match &args.config {
        Some(path) => CacheSettings::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => CacheSettings::find_and_load()?.unwrap_or_default(),
    };

    if let Some(url) = &args.redis_url {
        settings.redis_url = url.clone();
    }
    if let Some(prefix) = &args.key_prefix {
        settings.key_prefix = prefix.clone();
    }
    settings.validate()?;

    Ok(settings)
}

struct KeyScope<'a> {
    settings: &'a CacheSettings,
    raw: bool,
}

impl KeyScope<'_> {
    fn key(&self, key: &str) -> String {
        if self.raw {
            key.to_string()
        } else {
            self.settings.namespaced(key)
        }
    }
}

fn execute(client: &KvClient, keys: &KeyScope<'_>, command: Command) -> anyhow::Result<Value> {
    let output = match command {
        Command::Get { key } => json!(client.get::<Value>(&keys.key(&key))?),
        Command::Set { key, value, ttl } => {
            let key = keys.key(&key);
            let value = parse_value(&value);
            match ttl {
                Some(secs) => client.set_ex(&key, &value, secs)?,
                None => client.set(&key, &value)?,
            }
            info!(key = %key, "Value set");
            json!("OK")
        }
        Command::Del { keys: names } => {
            let names: Vec<String> = names.iter().map(|k| keys.key(k)).collect();
            let refs: Vec<&str> = names.iter().map(String::as_str).collect();
            json!(client.delete_keys(&refs)?)
        }
        Command::Ttl { key } => json!(client.remaining_ttl(&keys.key(&key))?.as_secs()),
        Command::Exists { key } => json!(client.has_key(&keys.key(&key))?),
        Command::Expire { key, secs } => json!(client.expire(&keys.key(&key), secs)?),
        Command::Incr { key, by } => json!(client.incr_by(&keys.key(&key), by)?),
        Command::Hget { key, field } => json!(client.get_hash_field::<Value>(&keys.key(&key), &field)?),
        Command::Hgetall { key } => json!(client.get_hash::<Value>(&keys.key(&key))?),
        Command::Hset { key, fields, ttl } => {
            let key = keys.key(&key);
            let fields = parse_fields(&fields)?;
            match ttl {
                Some(secs) => client.set_hash_ex(&key, &fields, secs)?,
                None => client.set_hash(&key, &fields)?,
            }
            json!("OK")
        }
        Command::Hincr { key, field, by } => json!(client.hash_incr_by(&keys.key(&key), &field, by)?),
        Command::Rpush { key, values, ttl } => {
            let key = keys.key(&key);
            let values: Vec<Value> = values.iter().map(|v| parse_value(v)).collect();
            let len = match ttl {
                Some(secs) => client.list_push_all_ex(&key, &values, secs)?,
                None => client.list_push_all(&key, &values)?,
            };
            json!(len)
        }
        Command::Lrange { key, start, stop } => json!(client.list_range::<Value>(&keys.key(&key), start, stop)?),
        Command::Llen { key } => json!(client.list_len(&keys.key(&key))?),
        Command::Lindex { key, index } => json!(client.list_index::<Value>(&keys.key(&key), index)?),
        Command::Lset { key, index, value } => {
            client.list_update_index(&keys.key(&key), index, &parse_value(&value))?;
            json!("OK")
        }
        Command::LremIndex { key, indexes } => json!(client.list_remove_indexes(&keys.key(&key), &indexes)?),
    };
    Ok(output)
}

/// JSON when it parses, otherwise the text as a JSON string
fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

fn parse_fields(pairs: &[String]) -> anyhow::Result<HashMap<String, Value>> {
    let mut fields = HashMap::with_capacity(pairs.len());
    for pair in pairs {
        let Some((field, value)) = pair.split_once('=') else {
            bail!("expected field=value, got '{}'", pair);
        };
        if field.is_empty() {
            bail!("empty field name in '{}'", pair);
        }
        fields.insert(field.to_string(), parse_value(value));
    }
    Ok(fields)
}

// =============================================================================
// Logging
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::WARN,
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    // stdout carries command output
    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
    }
}

// =============================================================================
// Tests
// =============================================================================
