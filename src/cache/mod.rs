//! Cache abstraction backing the registration store
//!
//! A string-keyed store with scalar values, sets of strings, sorted sets,
//! and per-key TTL. The shapes mirror Redis so the registry can run against
//! either the in-process implementation or a real Redis instance without
//! caring which.

mod memory;
mod redis_cache;

pub use memory::MemoryCache;
pub use redis_cache::RedisCache;

use async_trait::async_trait;

use crate::error::Result;

/// Storage operations the registration store relies on.
///
/// Missing keys surface as [`crate::GatewayError::NotFound`] from every
/// operation; callers treat that as "no data" rather than a failure.
#[async_trait]
pub trait Cache: Send + Sync {
    async fn set(&self, key: &str, value: &str) -> Result<()>;
    async fn get(&self, key: &str) -> Result<String>;
    async fn delete(&self, key: &str) -> Result<()>;
    /// Expire `key` this many seconds from now.
    async fn expire(&self, key: &str, seconds: u64) -> Result<()>;
    /// Expire `key` at an absolute unix timestamp (seconds).
    async fn expire_at(&self, key: &str, unix_secs: i64) -> Result<()>;

    async fn sadd(&self, key: &str, values: &[&str]) -> Result<()>;
    /// Remove members; the key itself is dropped once the set is empty.
    async fn sremove(&self, key: &str, values: &[&str]) -> Result<()>;
    async fn sget(&self, key: &str) -> Result<Vec<String>>;
    async fn scount(&self, key: &str) -> Result<usize>;
    async fn srand_member(&self, key: &str) -> Result<String>;

    async fn zadd(&self, key: &str, score: i64, value: &str) -> Result<()>;
    async fn zrem(&self, key: &str, value: &str) -> Result<()>;
    /// Score-ascending slice `[start..=stop]` with Redis negative-index
    /// semantics: negative indices count from the end; out-of-range
    /// combinations yield an empty list.
    async fn zrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>>;
}

/// Normalize a Redis-style index pair against a collection length.
///
/// Returns `None` when the range is empty after normalization.
pub(crate) fn normalize_range(len: usize, mut start: i64, mut stop: i64) -> Option<(usize, usize)> {
    let len = len as i64;
    if start < 0 {
        start += len;
    }
    if stop < 0 {
        stop += len;
    }
    if start > stop || start >= len || stop < 0 {
        return None;
    }
    let start = start.max(0) as usize;
    let stop = stop.min(len - 1) as usize;
    Some((start, stop))
}
