//! In-process cache — a map with per-keyspace locks and lazy expiry
//!
//! Good for a single gateway instance and for tests. Values, sets, and
//! sorted sets each live behind their own readers-writer lock so scalar
//! churn never contends with set enumeration.

use std::collections::{HashMap, HashSet};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use rand::Rng;
use tokio::sync::RwLock;

use super::{normalize_range, Cache};
use crate::error::{GatewayError, Result};

/// A scalar entry; `expires_at == 0` means no expiration.
#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: i64,
}

/// In-process cache implementation
#[derive(Default)]
pub struct MemoryCache {
    values: RwLock<HashMap<String, Entry>>,
    sets: RwLock<HashMap<String, HashSet<String>>>,
    zsets: RwLock<HashMap<String, Vec<(i64, String)>>>,
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

fn not_found(key: &str) -> GatewayError {
    GatewayError::NotFound(format!("key '{}'", key))
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch a live entry, deleting it if its TTL has lapsed. The common
    /// path takes only the read lock; expiry upgrades to the write lock.
    async fn get_unexpired(&self, key: &str, now: i64) -> Result<Entry> {
        {
            let values = self.values.read().await;
            match values.get(key) {
                Some(e) if e.expires_at == 0 || now < e.expires_at => return Ok(e.clone()),
                Some(_) => {}
                None => return Err(not_found(key)),
            }
        }
        // Expired: re-check under the write lock before deleting, another
        // writer may have replaced the entry in the gap.
        let mut values = self.values.write().await;
        if let Some(e) = values.get(key) {
            if e.expires_at == 0 || now < e.expires_at {
                return Ok(e.clone());
            }
            values.remove(key);
        }
        Err(not_found(key))
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut values = self.values.write().await;
        values.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: 0,
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<String> {
        self.get_unexpired(key, unix_now()).await.map(|e| e.value)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut values = self.values.write().await;
        values.remove(key).map(|_| ()).ok_or_else(|| not_found(key))
    }

    async fn expire(&self, key: &str, seconds: u64) -> Result<()> {
        self.expire_at(key, unix_now() + seconds as i64).await
    }

    async fn expire_at(&self, key: &str, unix_secs: i64) -> Result<()> {
        let now = unix_now();
        let mut values = self.values.write().await;
        match values.get_mut(key) {
            Some(e) if e.expires_at == 0 || now < e.expires_at => {
                e.expires_at = unix_secs;
                Ok(())
            }
            Some(_) => {
                values.remove(key);
                Err(not_found(key))
            }
            None => Err(not_found(key)),
        }
    }

    async fn sadd(&self, key: &str, values: &[&str]) -> Result<()> {
        let mut sets = self.sets.write().await;
        let set = sets.entry(key.to_string()).or_default();
        for v in values {
            set.insert(v.to_string());
        }
        Ok(())
    }

    async fn sremove(&self, key: &str, values: &[&str]) -> Result<()> {
        let mut sets = self.sets.write().await;
        let set = sets.get_mut(key).ok_or_else(|| not_found(key))?;
        for v in values {
            set.remove(*v);
        }
        if set.is_empty() {
            sets.remove(key);
        }
        Ok(())
    }

    async fn sget(&self, key: &str) -> Result<Vec<String>> {
        let sets = self.sets.read().await;
        sets.get(key)
            .map(|s| s.iter().cloned().collect())
            .ok_or_else(|| not_found(key))
    }

    async fn scount(&self, key: &str) -> Result<usize> {
        let sets = self.sets.read().await;
        sets.get(key).map(|s| s.len()).ok_or_else(|| not_found(key))
    }

    async fn srand_member(&self, key: &str) -> Result<String> {
        let sets = self.sets.read().await;
        let set = sets.get(key).ok_or_else(|| not_found(key))?;
        let members: Vec<&String> = set.iter().collect();
        if members.is_empty() {
            return Err(not_found(key));
        }
        let idx = rand::thread_rng().gen_range(0..members.len());
        Ok(members[idx].clone())
    }

    async fn zadd(&self, key: &str, score: i64, value: &str) -> Result<()> {
        let mut zsets = self.zsets.write().await;
        let zset = zsets.entry(key.to_string()).or_default();
        zset.retain(|(_, v)| v != value);
        zset.push((score, value.to_string()));
        Ok(())
    }

    async fn zrem(&self, key: &str, value: &str) -> Result<()> {
        let mut zsets = self.zsets.write().await;
        if let Some(zset) = zsets.get_mut(key) {
            zset.retain(|(_, v)| v != value);
            if zset.is_empty() {
                zsets.remove(key);
            }
        }
        Ok(())
    }

    async fn zrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>> {
        let zsets = self.zsets.read().await;
        let zset = zsets.get(key).ok_or_else(|| not_found(key))?;
        let mut sorted: Vec<(i64, String)> = zset.clone();
        sorted.sort();
        let Some((start, stop)) = normalize_range(sorted.len(), start, stop) else {
            return Ok(Vec::new());
        };
        Ok(sorted[start..=stop].iter().map(|(_, v)| v.clone()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_get_roundtrip() {
        let c = MemoryCache::new();
        c.set("k", "v").await.unwrap();
        assert_eq!(c.get("k").await.unwrap(), "v");
    }

    #[tokio::test]
    async fn test_get_missing_is_not_found() {
        let c = MemoryCache::new();
        let err = c.get("nope").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_set_overwrites() {
        let c = MemoryCache::new();
        c.set("k", "one").await.unwrap();
        c.set("k", "two").await.unwrap();
        assert_eq!(c.get("k").await.unwrap(), "two");
    }

    #[tokio::test]
    async fn test_delete() {
        let c = MemoryCache::new();
        c.set("k", "v").await.unwrap();
        c.delete("k").await.unwrap();
        assert!(c.get("k").await.is_err());
        assert!(c.delete("k").await.is_err());
    }

    #[tokio::test]
    async fn test_expire_in_past_removes_key() {
        let c = MemoryCache::new();
        c.set("k", "v").await.unwrap();
        c.expire_at("k", 1).await.unwrap();
        assert!(c.get("k").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_expire_in_future_keeps_key() {
        let c = MemoryCache::new();
        c.set("k", "v").await.unwrap();
        c.expire("k", 3600).await.unwrap();
        assert_eq!(c.get("k").await.unwrap(), "v");
    }

    #[tokio::test]
    async fn test_set_clears_expiration() {
        let c = MemoryCache::new();
        c.set("k", "v").await.unwrap();
        c.expire("k", 3600).await.unwrap();
        c.set("k", "v2").await.unwrap();
        c.expire_at("k", unix_now() + 10).await.unwrap();
        assert_eq!(c.get("k").await.unwrap(), "v2");
    }

    #[tokio::test]
    async fn test_sadd_sget() {
        let c = MemoryCache::new();
        c.sadd("s", &["a", "b"]).await.unwrap();
        c.sadd("s", &["b", "c"]).await.unwrap();
        let mut members = c.sget("s").await.unwrap();
        members.sort();
        assert_eq!(members, vec!["a", "b", "c"]);
        assert_eq!(c.scount("s").await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_sremove_drops_empty_set() {
        let c = MemoryCache::new();
        c.sadd("s", &["a", "b"]).await.unwrap();
        c.sremove("s", &["a"]).await.unwrap();
        assert_eq!(c.scount("s").await.unwrap(), 1);
        c.sremove("s", &["b"]).await.unwrap();
        // the key itself is gone now
        assert!(c.sget("s").await.unwrap_err().is_not_found());
        assert!(c.sremove("s", &["b"]).await.is_err());
    }

    #[tokio::test]
    async fn test_srand_member() {
        let c = MemoryCache::new();
        c.sadd("s", &["only"]).await.unwrap();
        assert_eq!(c.srand_member("s").await.unwrap(), "only");
        assert!(c.srand_member("empty").await.is_err());
    }

    #[tokio::test]
    async fn test_zrange_orders_by_score() {
        let c = MemoryCache::new();
        c.zadd("z", 3, "c").await.unwrap();
        c.zadd("z", 1, "a").await.unwrap();
        c.zadd("z", 2, "b").await.unwrap();
        assert_eq!(c.zrange("z", 0, -1).await.unwrap(), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_zadd_rescores_existing_member() {
        let c = MemoryCache::new();
        c.zadd("z", 1, "a").await.unwrap();
        c.zadd("z", 2, "b").await.unwrap();
        c.zadd("z", 9, "a").await.unwrap();
        assert_eq!(c.zrange("z", 0, -1).await.unwrap(), vec!["b", "a"]);
    }

    #[tokio::test]
    async fn test_zrem() {
        let c = MemoryCache::new();
        c.zadd("z", 1, "a").await.unwrap();
        c.zadd("z", 2, "b").await.unwrap();
        c.zrem("z", "a").await.unwrap();
        assert_eq!(c.zrange("z", 0, -1).await.unwrap(), vec!["b"]);
        // removing from a missing key is a no-op
        c.zrem("missing", "a").await.unwrap();
    }

    #[tokio::test]
    async fn test_zrange_negative_indices() {
        let c = MemoryCache::new();
        for (i, v) in ["a", "b", "c", "d", "e"].iter().enumerate() {
            c.zadd("z", i as i64, v).await.unwrap();
        }
        assert_eq!(c.zrange("z", -2, -1).await.unwrap(), vec!["d", "e"]);
        assert_eq!(c.zrange("z", 0, 2).await.unwrap(), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_zrange_boundary_cases() {
        let c = MemoryCache::new();
        for (i, v) in ["a", "b", "c"].iter().enumerate() {
            c.zadd("z", i as i64, v).await.unwrap();
        }
        assert!(c.zrange("z", 2, 1).await.unwrap().is_empty()); // start > stop
        assert!(c.zrange("z", 3, 5).await.unwrap().is_empty()); // start >= len
        assert!(c.zrange("z", 0, -7).await.unwrap().is_empty()); // stop < 0
        assert_eq!(c.zrange("z", -10, 10).await.unwrap().len(), 3); // clamped
    }
}
