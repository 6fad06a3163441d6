//! Key-value store adapter
//!
//! Sliding rate-limit windows, replay markers, and reputation counters live
//! in a shared store with TTL-based self-cleanup. The trait mirrors the small
//! subset of Redis the service depends on; multi-step window probes go
//! through a single atomic pipeline so concurrent callers never observe a
//! torn read-modify-write. Nothing in here is assumed durable.

use crate::error::{ReliabilityError, ReliabilityResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::info;

/// Minimal key-value contract backing windows, replay markers, and counters.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Fetch a value.
    async fn get(&self, key: &str) -> ReliabilityResult<Option<String>>;

    /// Set a value, with an optional time-to-live.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> ReliabilityResult<()>;

    /// Set a value only if the key does not already exist. Returns true when
    /// the value was written (first occurrence).
    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> ReliabilityResult<bool>;

    /// Atomically increment a counter, returning the new value.
    async fn incr(&self, key: &str) -> ReliabilityResult<i64>;

    /// Set a time-to-live on an existing key. Returns false when the key is
    /// missing.
    async fn expire(&self, key: &str, ttl: Duration) -> ReliabilityResult<bool>;

    /// Add a member with a score to a sorted set.
    async fn zadd(&self, key: &str, member: &str, score: f64) -> ReliabilityResult<()>;

    /// Remove sorted-set members with scores in [min, max], returning how
    /// many were removed.
    async fn zremrangebyscore(&self, key: &str, min: f64, max: f64) -> ReliabilityResult<u64>;

    /// Cardinality of a sorted set.
    async fn zcard(&self, key: &str) -> ReliabilityResult<u64>;

    /// Record one event in a sliding window and return the window count
    /// including the new event. Prunes entries older than `window`, inserts a
    /// unique member scored `now_ms`, and refreshes the key TTL - all in one
    /// atomic step.
    async fn window_count(
        &self,
        key: &str,
        now_ms: u64,
        window: Duration,
    ) -> ReliabilityResult<u64>;
}

struct ValueEntry {
    value: String,
    expires_at: Option<Instant>,
}

impl ValueEntry {
    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }
}

#[derive(Default)]
struct SortedSetEntry {
    /// member -> score
    members: HashMap<String, f64>,
    expires_at: Option<Instant>,
}

impl SortedSetEntry {
    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }
}

/// In-process store for tests and single-node deployments.
///
/// TTLs are honored lazily: expired entries are dropped when touched.
#[derive(Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, ValueEntry>>,
    sorted_sets: Mutex<HashMap<String, SortedSetEntry>>,
    sequence: std::sync::atomic::AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_member(&self, now_ms: u64) -> String {
        let seq = self
            .sequence
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        format!("{}:{}", now_ms, seq)
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> ReliabilityResult<Option<String>> {
        let mut values = self.values.lock();
        match values.get(key) {
            Some(entry) if entry.is_expired() => {
                values.remove(key);
                Ok(None)
            }
            Some(entry) => Ok(Some(entry.value.clone())),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> ReliabilityResult<()> {
        self.values.lock().insert(
            key.to_string(),
            ValueEntry {
                value: value.to_string(),
                expires_at: ttl.map(|t| Instant::now() + t),
            },
        );
        Ok(())
    }

    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> ReliabilityResult<bool> {
        let mut values = self.values.lock();
        let live = values.get(key).map(|e| !e.is_expired()).unwrap_or(false);
        if live {
            return Ok(false);
        }
        values.insert(
            key.to_string(),
            ValueEntry {
                value: value.to_string(),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(true)
    }

    async fn incr(&self, key: &str) -> ReliabilityResult<i64> {
        let mut values = self.values.lock();
        let (current, expires_at) = match values.get(key) {
            Some(entry) if !entry.is_expired() => {
                let parsed = entry.value.parse::<i64>().map_err(|_| {
                    ReliabilityError::store(format!("value at {} is not an integer", key))
                })?;
                (parsed, entry.expires_at)
            }
            _ => (0, None),
        };
        let next = current + 1;
        values.insert(
            key.to_string(),
            ValueEntry {
                value: next.to_string(),
                expires_at,
            },
        );
        Ok(next)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> ReliabilityResult<bool> {
        let deadline = Instant::now() + ttl;
        {
            let mut values = self.values.lock();
            if let Some(entry) = values.get_mut(key) {
                if !entry.is_expired() {
                    entry.expires_at = Some(deadline);
                    return Ok(true);
                }
                values.remove(key);
            }
        }
        let mut sets = self.sorted_sets.lock();
        if let Some(entry) = sets.get_mut(key) {
            if !entry.is_expired() {
                entry.expires_at = Some(deadline);
                return Ok(true);
            }
            sets.remove(key);
        }
        Ok(false)
    }

    async fn zadd(&self, key: &str, member: &str, score: f64) -> ReliabilityResult<()> {
        let mut sets = self.sorted_sets.lock();
        let entry = sets.entry(key.to_string()).or_default();
        if entry.is_expired() {
            entry.members.clear();
            entry.expires_at = None;
        }
        entry.members.insert(member.to_string(), score);
        Ok(())
    }

    async fn zremrangebyscore(&self, key: &str, min: f64, max: f64) -> ReliabilityResult<u64> {
        let mut sets = self.sorted_sets.lock();
        let Some(entry) = sets.get_mut(key) else {
            return Ok(0);
        };
        if entry.is_expired() {
            sets.remove(key);
            return Ok(0);
        }
        let before = entry.members.len();
        entry.members.retain(|_, score| *score < min || *score > max);
        Ok((before - entry.members.len()) as u64)
    }

    async fn zcard(&self, key: &str) -> ReliabilityResult<u64> {
        let mut sets = self.sorted_sets.lock();
        match sets.get(key) {
            Some(entry) if entry.is_expired() => {
                sets.remove(key);
                Ok(0)
            }
            Some(entry) => Ok(entry.members.len() as u64),
            None => Ok(0),
        }
    }

    async fn window_count(
        &self,
        key: &str,
        now_ms: u64,
        window: Duration,
    ) -> ReliabilityResult<u64> {
        let member = self.next_member(now_ms);
        let cutoff = now_ms.saturating_sub(window.as_millis() as u64) as f64;
        let mut sets = self.sorted_sets.lock();
        let entry = sets.entry(key.to_string()).or_default();
        if entry.is_expired() {
            entry.members.clear();
        }
        entry.members.retain(|_, score| *score > cutoff);
        entry.members.insert(member, now_ms as f64);
        entry.expires_at = Some(Instant::now() + window);
        Ok(entry.members.len() as u64)
    }
}

/// Redis-backed store using a deadpool connection pool.
pub struct RedisStore {
    pool: deadpool_redis::Pool,
}

impl RedisStore {
    /// Connect to Redis and verify the connection with a PING.
    pub async fn connect(url: &str) -> ReliabilityResult<Self> {
        let config = deadpool_redis::Config::from_url(url);
        let pool = config
            .create_pool(Some(deadpool_redis::Runtime::Tokio1))
            .map_err(|e| {
                ReliabilityError::configuration(format!("Redis pool creation failed: {}", e))
            })?;

        let mut conn = pool
            .get()
            .await
            .map_err(|e| ReliabilityError::store(format!("Redis connection failed: {}", e)))?;
        redis::cmd("PING")
            .query_async::<_, String>(&mut conn)
            .await?;

        info!("Redis store connected");
        Ok(Self { pool })
    }

    async fn conn(&self) -> ReliabilityResult<deadpool_redis::Connection> {
        self.pool
            .get()
            .await
            .map_err(|e| ReliabilityError::store(format!("Redis pool exhausted: {}", e)))
    }

    fn score_arg(score: f64) -> String {
        if score == f64::NEG_INFINITY {
            "-inf".to_string()
        } else if score == f64::INFINITY {
            "+inf".to_string()
        } else {
            score.to_string()
        }
    }
}

#[async_trait]
impl KeyValueStore for RedisStore {
    async fn get(&self, key: &str) -> ReliabilityResult<Option<String>> {
        let mut conn = self.conn().await?;
        let value: Option<String> = redis::cmd("GET").arg(key).query_async(&mut conn).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> ReliabilityResult<()> {
        let mut conn = self.conn().await?;
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        if let Some(ttl) = ttl {
            cmd.arg("PX").arg(ttl.as_millis() as u64);
        }
        cmd.query_async::<_, ()>(&mut conn).await?;
        Ok(())
    }

    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> ReliabilityResult<bool> {
        let mut conn = self.conn().await?;
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(ttl.as_millis() as u64)
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }

    async fn incr(&self, key: &str) -> ReliabilityResult<i64> {
        let mut conn = self.conn().await?;
        let value: i64 = redis::cmd("INCR").arg(key).query_async(&mut conn).await?;
        Ok(value)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> ReliabilityResult<bool> {
        let mut conn = self.conn().await?;
        let set: i64 = redis::cmd("PEXPIRE")
            .arg(key)
            .arg(ttl.as_millis() as u64)
            .query_async(&mut conn)
            .await?;
        Ok(set == 1)
    }

    async fn zadd(&self, key: &str, member: &str, score: f64) -> ReliabilityResult<()> {
        let mut conn = self.conn().await?;
        redis::cmd("ZADD")
            .arg(key)
            .arg(score)
            .arg(member)
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn zremrangebyscore(&self, key: &str, min: f64, max: f64) -> ReliabilityResult<u64> {
        let mut conn = self.conn().await?;
        let removed: u64 = redis::cmd("ZREMRANGEBYSCORE")
            .arg(key)
            .arg(Self::score_arg(min))
            .arg(Self::score_arg(max))
            .query_async(&mut conn)
            .await?;
        Ok(removed)
    }

    async fn zcard(&self, key: &str) -> ReliabilityResult<u64> {
        let mut conn = self.conn().await?;
        let count: u64 = redis::cmd("ZCARD").arg(key).query_async(&mut conn).await?;
        Ok(count)
    }

    async fn window_count(
        &self,
        key: &str,
        now_ms: u64,
        window: Duration,
    ) -> ReliabilityResult<u64> {
        let mut conn = self.conn().await?;
        let cutoff = now_ms.saturating_sub(window.as_millis() as u64);
        let member = format!("{}:{}", now_ms, uuid::Uuid::new_v4());
        let (count,): (u64,) = redis::pipe()
            .atomic()
            .cmd("ZREMRANGEBYSCORE")
            .arg(key)
            .arg("-inf")
            .arg(cutoff)
            .ignore()
            .cmd("ZADD")
            .arg(key)
            .arg(now_ms)
            .arg(&member)
            .ignore()
            .cmd("ZCARD")
            .arg(key)
            .cmd("PEXPIRE")
            .arg(key)
            .arg(window.as_millis() as u64)
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(count)
    }
}

/// Milliseconds since the Unix epoch, used as sorted-set scores.
pub fn unix_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_get_set_round_trip() {
        let store = MemoryStore::new();
        assert_eq!(store.get("missing").await.unwrap(), None);

        store.set("k", "v", None).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some("v".to_string()));
    }

    #[tokio::test]
    async fn test_ttl_expiry() {
        let store = MemoryStore::new();
        store
            .set("k", "v", Some(Duration::from_millis(20)))
            .await
            .unwrap();
        assert!(store.get("k").await.unwrap().is_some());

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_set_nx_detects_duplicates() {
        let store = MemoryStore::new();
        let first = store
            .set_nx("dedup", "1", Duration::from_secs(60))
            .await
            .unwrap();
        let second = store
            .set_nx("dedup", "1", Duration::from_secs(60))
            .await
            .unwrap();
        assert!(first);
        assert!(!second);
    }

    #[tokio::test]
    async fn test_set_nx_after_expiry() {
        let store = MemoryStore::new();
        assert!(store
            .set_nx("dedup", "1", Duration::from_millis(20))
            .await
            .unwrap());
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(store
            .set_nx("dedup", "1", Duration::from_millis(20))
            .await
            .unwrap());
    }

    #[test]
    fn test_incr() {
        tokio_test::block_on(async {
            let store = MemoryStore::new();
            assert_eq!(store.incr("count").await.unwrap(), 1);
            assert_eq!(store.incr("count").await.unwrap(), 2);
            assert_eq!(store.incr("count").await.unwrap(), 3);
        });
    }

    #[tokio::test]
    async fn test_sorted_set_operations() {
        let store = MemoryStore::new();
        store.zadd("z", "a", 1.0).await.unwrap();
        store.zadd("z", "b", 2.0).await.unwrap();
        store.zadd("z", "c", 3.0).await.unwrap();
        assert_eq!(store.zcard("z").await.unwrap(), 3);

        let removed = store.zremrangebyscore("z", 0.0, 2.0).await.unwrap();
        assert_eq!(removed, 2);
        assert_eq!(store.zcard("z").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_window_count_accumulates_and_prunes() {
        let store = MemoryStore::new();
        let window = Duration::from_millis(100);

        let base = unix_millis();
        assert_eq!(store.window_count("w", base, window).await.unwrap(), 1);
        assert_eq!(store.window_count("w", base + 10, window).await.unwrap(), 2);
        assert_eq!(store.window_count("w", base + 20, window).await.unwrap(), 3);

        // Far enough in the future that the first three fall out of the window.
        let later = base + 500;
        assert_eq!(store.window_count("w", later, window).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_expire_on_missing_key() {
        let store = MemoryStore::new();
        assert!(!store.expire("nope", Duration::from_secs(1)).await.unwrap());
    }
}
