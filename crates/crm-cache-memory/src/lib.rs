//! In-memory TTL cache.
//!
//! Suitable for:
//! - the standalone cache service (`crm-server serve-cache`)
//! - single-process deployments and tests
//!
//! Expired entries are dropped lazily on access and by [`MemoryCache::purge_expired`].

use async_trait::async_trait;
use crm_cache::{Cache, CacheError, Ttl};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::time::Instant;

struct Slot {
    value: String,
    expires_at: Instant,
}

impl Slot {
    fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

#[derive(Default)]
pub struct MemoryCache {
    entries: DashMap<String, Slot>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every expired entry; returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, slot| slot.is_live(now));
        let removed = before.saturating_sub(self.entries.len());
        if removed > 0 {
            tracing::debug!(removed, "purged expired cache entries");
        }
        removed
    }

    /// Number of stored entries, expired ones included until purged.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let now = Instant::now();
        if let Some(slot) = self.entries.get(key) {
            if slot.is_live(now) {
                return Ok(Some(slot.value.clone()));
            }
        }
        self.entries.remove_if(key, |_, slot| !slot.is_live(now));
        Ok(None)
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Ttl) -> Result<bool, CacheError> {
        let now = Instant::now();
        let fresh = Slot {
            value: value.to_string(),
            expires_at: now + ttl.as_duration(),
        };

        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_live(now) {
                    return Ok(false);
                }
                occupied.insert(fresh);
                Ok(true)
            }
            Entry::Vacant(vacant) => {
                vacant.insert(fresh);
                Ok(true)
            }
        }
    }
}
