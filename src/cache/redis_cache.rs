//! Redis-backed cache — delegates storage and TTLs to a Redis instance
//!
//! Lets several gateway instances share one registry. The connection is
//! established lazily and multiplexed; Redis owns expiration, so the
//! registry's lazy garbage collection sees exactly the same behavior as
//! with the in-process cache.

use async_trait::async_trait;
use redis::AsyncCommands;
use std::sync::Arc;
use tokio::sync::Mutex;

use super::{Cache, normalize_range};
use crate::error::{GatewayError, Result};

/// Sorted sets get their own key namespace so a scalar and a sorted set
/// with the same name never collide.
fn zkey(key: &str) -> String {
    format!("Z{}", key)
}

fn not_found(key: &str) -> GatewayError {
    GatewayError::NotFound(format!("key '{}'", key))
}

/// Cache implementation over `redis::aio::MultiplexedConnection`
pub struct RedisCache {
    client: redis::Client,
    connection: Arc<Mutex<Option<redis::aio::MultiplexedConnection>>>,
}

impl RedisCache {
    /// Create a cache against the given Redis URL (e.g. `redis://host:6379`).
    /// The connection itself is not opened until first use.
    pub fn new(addr: &str) -> Result<Self> {
        let url = if addr.contains("://") {
            addr.to_string()
        } else {
            format!("redis://{}", addr)
        };
        let client = redis::Client::open(url.as_str())?;
        Ok(Self {
            client,
            connection: Arc::new(Mutex::new(None)),
        })
    }

    /// Round-trip a probe key to fail fast when Redis is unreachable.
    pub async fn ping(&self) -> Result<()> {
        let mut conn = self.conn().await?;
        let _: () = conn.set("BEACON_START", "probe").await?;
        let _: String = conn.get("BEACON_START").await?;
        let _: () = conn.del("BEACON_START").await?;
        Ok(())
    }

    async fn conn(&self) -> Result<redis::aio::MultiplexedConnection> {
        let mut guard = self.connection.lock().await;
        if let Some(ref conn) = *guard {
            return Ok(conn.clone());
        }
        let conn = self.client.get_multiplexed_async_connection().await?;
        *guard = Some(conn.clone());
        Ok(conn)
    }
}

#[async_trait]
impl Cache for RedisCache {
    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut conn = self.conn().await?;
        let _: () = conn.set(key, value).await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<String> {
        let mut conn = self.conn().await?;
        let value: Option<String> = conn.get(key).await?;
        value.ok_or_else(|| not_found(key))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.conn().await?;
        let removed: i64 = conn.del(key).await?;
        if removed == 0 {
            return Err(not_found(key));
        }
        Ok(())
    }

    async fn expire(&self, key: &str, seconds: u64) -> Result<()> {
        let mut conn = self.conn().await?;
        let _: bool = conn.expire(key, seconds as i64).await?;
        Ok(())
    }

    async fn expire_at(&self, key: &str, unix_secs: i64) -> Result<()> {
        let mut conn = self.conn().await?;
        let _: bool = conn.expire_at(key, unix_secs).await?;
        Ok(())
    }

    async fn sadd(&self, key: &str, values: &[&str]) -> Result<()> {
        let mut conn = self.conn().await?;
        let _: i64 = conn.sadd(key, values).await?;
        Ok(())
    }

    async fn sremove(&self, key: &str, values: &[&str]) -> Result<()> {
        let mut conn = self.conn().await?;
        let _: i64 = conn.srem(key, values).await?;
        Ok(())
    }

    async fn sget(&self, key: &str) -> Result<Vec<String>> {
        let mut conn = self.conn().await?;
        let members: Vec<String> = conn.smembers(key).await?;
        if members.is_empty() {
            return Err(not_found(key));
        }
        Ok(members)
    }

    async fn scount(&self, key: &str) -> Result<usize> {
        let mut conn = self.conn().await?;
        let count: i64 = conn.scard(key).await?;
        if count == 0 {
            return Err(not_found(key));
        }
        Ok(count as usize)
    }

    async fn srand_member(&self, key: &str) -> Result<String> {
        let mut conn = self.conn().await?;
        let member: Option<String> = conn.srandmember(key).await?;
        member.ok_or_else(|| not_found(key))
    }

    async fn zadd(&self, key: &str, score: i64, value: &str) -> Result<()> {
        let mut conn = self.conn().await?;
        let _: i64 = conn.zadd(zkey(key), value, score).await?;
        Ok(())
    }

    async fn zrem(&self, key: &str, value: &str) -> Result<()> {
        let mut conn = self.conn().await?;
        let _: i64 = conn.zrem(zkey(key), value).await?;
        Ok(())
    }

    async fn zrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>> {
        let mut conn = self.conn().await?;
        // ZCARD + local normalization keeps the empty-range rules identical
        // to the in-process implementation.
        let len: i64 = conn.zcard(zkey(key)).await?;
        if len == 0 {
            return Err(not_found(key));
        }
        let Some((lo, hi)) = normalize_range(len as usize, start, stop) else {
            return Ok(Vec::new());
        };
        let members: Vec<String> = conn.zrange(zkey(key), lo as isize, hi as isize).await?;
        Ok(members)
    }
}
