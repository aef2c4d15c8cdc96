//! Registration store — keyed records over the cache abstraction
//!
//! Every record lives under its identity hash (`hash → JSON`), and the set
//! `REGISTRY_ITEMS` indexes the live hashes for bulk enumeration. TTLs are
//! enforced by the cache; hashes whose records have expired are garbage
//! collected lazily whenever the store enumerates.

use std::sync::Arc;

use crate::cache::Cache;
use crate::error::Result;
use crate::registry::Registration;

/// The set of live registration hashes.
pub const REGISTRY_ITEMS: &str = "REGISTRY_ITEMS";

/// Extra seconds granted past the configured TTL so clients that key their
/// refresh off our expiration still make it in time.
const TTL_GRACE_SECS: u64 = 2;

/// The registration store
pub struct Registry {
    cache: Arc<dyn Cache>,
    /// Registration TTL in seconds; 0 disables expiration
    ttl_secs: u64,
}

impl Registry {
    pub fn new(cache: Arc<dyn Cache>, ttl_secs: u64) -> Self {
        Self { cache, ttl_secs }
    }

    /// The TTL applied to records, including the refresh grace.
    pub fn ttl_with_grace(&self) -> u64 {
        self.ttl_secs + TTL_GRACE_SECS
    }

    /// Store a validated registration and index its hash. Re-registering
    /// the same (name, address) overwrites the prior record in place.
    pub async fn register(&self, reg: &Registration, expire: bool) -> Result<String> {
        let hash = reg.hash().to_string();
        self.cache.set(&hash, &reg.to_json()?).await?;
        if expire && self.ttl_secs != 0 {
            self.cache.expire(&hash, self.ttl_with_grace()).await?;
        }
        self.cache.sadd(REGISTRY_ITEMS, &[&hash]).await?;
        tracing::info!(hash = %hash, name = %reg.name, address = %reg.address, "registered");
        Ok(hash)
    }

    /// Look up a registration by hash.
    pub async fn find(&self, hash: &str) -> Result<Registration> {
        let json = self.cache.get(hash).await?;
        Registration::from_json(&json)
    }

    /// Reset a registration's TTL.
    pub async fn refresh(&self, reg: &Registration) -> Result<()> {
        if self.ttl_secs != 0 {
            self.cache.expire(reg.hash(), self.ttl_with_grace()).await?;
        }
        Ok(())
    }

    /// Remove a registration and its index entry. Idempotent: removing a
    /// record that is already gone is not an error.
    pub async fn unregister(&self, reg: &Registration) -> Result<()> {
        let hash = reg.hash();
        if let Err(e) = self.cache.sremove(REGISTRY_ITEMS, &[hash]).await {
            if !e.is_not_found() {
                return Err(e);
            }
        }
        if let Err(e) = self.cache.delete(hash).await {
            if !e.is_not_found() {
                return Err(e);
            }
        }
        Ok(())
    }

    /// Rewrite a record in place without touching its TTL. Used by the
    /// health collector to flip the disabled flag.
    pub async fn save(&self, reg: &Registration) -> Result<()> {
        // set() clears any TTL, so re-arm the record's normal expiration
        let hash = reg.hash();
        self.cache.set(hash, &reg.to_json()?).await?;
        if self.ttl_secs != 0 {
            self.cache.expire(hash, self.ttl_with_grace()).await?;
        }
        Ok(())
    }

    /// Shorten (or restore) a record's expiration.
    pub async fn expire_in(&self, reg: &Registration, seconds: u64) -> Result<()> {
        self.cache.expire(reg.hash(), seconds).await
    }

    /// All live, routable registrations: excludes disabled records.
    pub async fn enumerate_active(&self) -> Result<Vec<Registration>> {
        self.enumerate(false).await
    }

    /// All live registrations including disabled ones. The health collector
    /// needs to see disabled records to be able to re-enable them.
    pub async fn enumerate_all(&self) -> Result<Vec<Registration>> {
        self.enumerate(true).await
    }

    async fn enumerate(&self, include_disabled: bool) -> Result<Vec<Registration>> {
        let hashes = match self.cache.sget(REGISTRY_ITEMS).await {
            Ok(h) => h,
            Err(e) if e.is_not_found() => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let mut results = Vec::new();
        let mut stale = Vec::new();
        for hash in &hashes {
            match self.cache.get(hash).await {
                Ok(json) => match Registration::from_json(&json) {
                    Ok(reg) => {
                        if include_disabled || !reg.disabled {
                            results.push(reg);
                        }
                    }
                    Err(e) => {
                        tracing::warn!(hash = %hash, error = %e, "dropping undecodable registration");
                        stale.push(hash.clone());
                    }
                },
                // The record expired out from under its index entry.
                Err(e) if e.is_not_found() => stale.push(hash.clone()),
                Err(e) => return Err(e),
            }
        }

        for hash in &stale {
            let _ = self.cache.delete(hash).await;
            let _ = self.cache.sremove(REGISTRY_ITEMS, &[hash]).await;
            tracing::info!(hash = %hash, "expired registration removed");
        }

        Ok(results)
    }
}
