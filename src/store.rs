use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use redis::{Script, aio::ConnectionManager};
use std::{
    collections::HashMap,
    future::Future,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};
use thiserror::Error;

use crate::{clock::ClockState, keys::StoreKey};

/// StoreError
///
/// Infrastructure failures of the expiring key store. These are never folded
/// into the authentication/quota taxonomy: a caller that sees one must fail
/// closed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("key store unavailable: {0}")]
    Unavailable(String),
    #[error("key store round-trip exceeded {0:?}")]
    Timeout(Duration),
    #[error("unexpected value stored under {key}: {detail}")]
    Corrupt { key: String, detail: String },
}

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        StoreError::Unavailable(err.to_string())
    }
}

/// Counter
///
/// Result of an atomic increment: the value after incrementing and the time
/// left until the key expires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Counter {
    pub value: u64,
    pub ttl: Duration,
}

/// ExpiringKeyStore
///
/// The contract this core consumes from the external cache service. Every
/// operation is atomic for a single key; TTL expiry is handled by the store,
/// so nothing in this crate ever sweeps old entries.
#[async_trait]
pub trait ExpiringKeyStore: Send + Sync {
    async fn set(&self, key: &StoreKey, value: &str, ttl: Duration) -> Result<(), StoreError>;

    /// Writes only if the key is absent. Returns `true` when this call created
    /// the entry.
    async fn set_if_absent(
        &self,
        key: &StoreKey,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError>;

    async fn get(&self, key: &StoreKey) -> Result<Option<String>, StoreError>;

    async fn exists(&self, key: &StoreKey) -> Result<bool, StoreError>;

    /// Atomically increments the counter at `key`. The first increment creates
    /// it with TTL = `window`; later increments leave the TTL untouched.
    async fn increment(&self, key: &StoreKey, window: Duration) -> Result<Counter, StoreError>;

    async fn delete(&self, key: &StoreKey) -> Result<(), StoreError>;
}

pub type KeyStoreState = Arc<dyn ExpiringKeyStore>;

fn millis(ttl: Duration) -> u64 {
    (ttl.as_millis() as u64).max(1)
}

// --- Redis implementation ---

// INCR + PEXPIRE on first use, evaluated server-side so concurrent callers
// cannot interleave between the increment and the expiry.
const INCREMENT_SCRIPT: &str = r#"
local current = redis.call('INCR', KEYS[1])
if current == 1 then
    redis.call('PEXPIRE', KEYS[1], ARGV[1])
end
local ttl = redis.call('PTTL', KEYS[1])
if ttl < 0 then
    redis.call('PEXPIRE', KEYS[1], ARGV[1])
    ttl = tonumber(ARGV[1])
end
return {current, ttl}
"#;

/// RedisKeyStore
///
/// The production store. Each round-trip is bounded by `timeout` so that a
/// stalled cache turns into a prompt `StoreError::Timeout` instead of a hung
/// request. Dropping the returned future (client cancellation) abandons the
/// call.
#[derive(Clone)]
pub struct RedisKeyStore {
    conn: ConnectionManager,
    timeout: Duration,
    increment: Arc<Script>,
}

impl RedisKeyStore {
    pub async fn connect(url: &str, timeout: Duration) -> Result<Self, StoreError> {
        let client = redis::Client::open(url)?;
        let conn = match tokio::time::timeout(timeout * 10, ConnectionManager::new(client)).await {
            Ok(conn) => conn?,
            Err(_) => return Err(StoreError::Timeout(timeout * 10)),
        };

        Ok(Self {
            conn,
            timeout,
            increment: Arc::new(Script::new(INCREMENT_SCRIPT)),
        })
    }

    async fn bounded<T>(
        &self,
        fut: impl Future<Output = redis::RedisResult<T>>,
    ) -> Result<T, StoreError> {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result.map_err(StoreError::from),
            Err(_) => Err(StoreError::Timeout(self.timeout)),
        }
    }
}

#[async_trait]
impl ExpiringKeyStore for RedisKeyStore {
    async fn set(&self, key: &StoreKey, value: &str, ttl: Duration) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let mut cmd = redis::cmd("SET");
        cmd.arg(key.as_str()).arg(value).arg("PX").arg(millis(ttl));
        let _: () = self.bounded(cmd.query_async(&mut conn)).await?;
        Ok(())
    }

    async fn set_if_absent(
        &self,
        key: &StoreKey,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let mut cmd = redis::cmd("SET");
        cmd.arg(key.as_str())
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(millis(ttl));
        let reply: Option<String> = self.bounded(cmd.query_async(&mut conn)).await?;
        Ok(reply.is_some())
    }

    async fn get(&self, key: &StoreKey) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn.clone();
        let mut cmd = redis::cmd("GET");
        cmd.arg(key.as_str());
        self.bounded(cmd.query_async(&mut conn)).await
    }

    async fn exists(&self, key: &StoreKey) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let mut cmd = redis::cmd("EXISTS");
        cmd.arg(key.as_str());
        let count: i64 = self.bounded(cmd.query_async(&mut conn)).await?;
        Ok(count > 0)
    }

    async fn increment(&self, key: &StoreKey, window: Duration) -> Result<Counter, StoreError> {
        let mut conn = self.conn.clone();
        let mut invocation = self.increment.key(key.as_str());
        invocation.arg(millis(window));
        let (value, pttl): (i64, i64) = self.bounded(invocation.invoke_async(&mut conn)).await?;

        if value < 1 {
            return Err(StoreError::Corrupt {
                key: key.to_string(),
                detail: format!("counter went to {value}"),
            });
        }

        Ok(Counter {
            value: value as u64,
            ttl: Duration::from_millis(pttl.max(0) as u64),
        })
    }

    async fn delete(&self, key: &StoreKey) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let mut cmd = redis::cmd("DEL");
        cmd.arg(key.as_str());
        let _: i64 = self.bounded(cmd.query_async(&mut conn)).await?;
        Ok(())
    }
}

// --- In-memory implementation ---

struct Entry {
    value: String,
    expires_at: DateTime<Utc>,
}

/// InMemoryKeyStore
///
/// A single-process store driven by an injected clock. Used by the test-suite
/// (time is advanced with `ManualClock`) and for local runs without Redis.
/// The whole map sits behind one mutex, which makes every operation trivially
/// atomic per key.
pub struct InMemoryKeyStore {
    clock: ClockState,
    entries: Mutex<HashMap<String, Entry>>,
    /// When set, every call fails with `StoreError::Unavailable`.
    offline: AtomicBool,
}

impl InMemoryKeyStore {
    pub fn new(clock: ClockState) -> Self {
        Self {
            clock,
            entries: Mutex::new(HashMap::new()),
            offline: AtomicBool::new(false),
        }
    }

    /// Simulates the cache service going away (or coming back).
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Number of live (unexpired) entries.
    pub fn len(&self) -> usize {
        let now = self.clock.now();
        self.entries
            .lock()
            .values()
            .filter(|entry| entry.expires_at > now)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_online(&self) -> Result<(), StoreError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("in-memory store offline".into()));
        }
        Ok(())
    }

    fn expiry(&self, ttl: Duration) -> DateTime<Utc> {
        let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX);
        self.clock
            .now()
            .checked_add_signed(ttl)
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Runs `f` on the map after dropping the entry at `key` if it has expired.
    fn with_live<R>(&self, key: &StoreKey, f: impl FnOnce(&mut HashMap<String, Entry>) -> R) -> R {
        let now = self.clock.now();
        let mut entries = self.entries.lock();
        if entries
            .get(key.as_str())
            .is_some_and(|entry| entry.expires_at <= now)
        {
            entries.remove(key.as_str());
        }
        f(&mut entries)
    }
}

#[async_trait]
impl ExpiringKeyStore for InMemoryKeyStore {
    async fn set(&self, key: &StoreKey, value: &str, ttl: Duration) -> Result<(), StoreError> {
        self.check_online()?;
        let expires_at = self.expiry(ttl);
        self.with_live(key, |entries| {
            entries.insert(
                key.to_string(),
                Entry {
                    value: value.to_string(),
                    expires_at,
                },
            );
        });
        Ok(())
    }

    async fn set_if_absent(
        &self,
        key: &StoreKey,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        self.check_online()?;
        let expires_at = self.expiry(ttl);
        Ok(self.with_live(key, |entries| {
            if entries.contains_key(key.as_str()) {
                return false;
            }
            entries.insert(
                key.to_string(),
                Entry {
                    value: value.to_string(),
                    expires_at,
                },
            );
            true
        }))
    }

    async fn get(&self, key: &StoreKey) -> Result<Option<String>, StoreError> {
        self.check_online()?;
        Ok(self.with_live(key, |entries| {
            entries.get(key.as_str()).map(|entry| entry.value.clone())
        }))
    }

    async fn exists(&self, key: &StoreKey) -> Result<bool, StoreError> {
        self.check_online()?;
        Ok(self.with_live(key, |entries| entries.contains_key(key.as_str())))
    }

    async fn increment(&self, key: &StoreKey, window: Duration) -> Result<Counter, StoreError> {
        self.check_online()?;
        let now = self.clock.now();
        let fresh_expiry = self.expiry(window);

        self.with_live(key, |entries| {
            let entry = entries.entry(key.to_string()).or_insert_with(|| Entry {
                value: "0".to_string(),
                expires_at: fresh_expiry,
            });

            let current: u64 = entry.value.parse().map_err(|_| StoreError::Corrupt {
                key: key.to_string(),
                detail: format!("not a counter: {:?}", entry.value),
            })?;
            let value = current + 1;
            entry.value = value.to_string();

            let ttl = (entry.expires_at - now).to_std().unwrap_or_default();
            Ok(Counter { value, ttl })
        })
    }

    async fn delete(&self, key: &StoreKey) -> Result<(), StoreError> {
        self.check_online()?;
        self.entries.lock().remove(key.as_str());
        Ok(())
    }
}
