//! In-process TTL cache for serialized query results.
//!
//! Keys are ordered so that invalidating a key prefix such as
//! `settlement:v1:date:2023-08-22:` is a range scan rather than a full sweep.
//! Expired entries are dropped lazily on read and in bulk by
//! [`CacheStore::clear_expired`].

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::store::{SettlementCache, StoreFuture};

#[derive(Debug, Clone)]
struct Slot {
    json: String,
    expires_at: Instant,
}

impl Slot {
    fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

#[derive(Debug)]
struct Slots {
    by_key: BTreeMap<String, Slot>,
    default_ttl: Duration,
}

impl Slots {
    /// Keys beginning with `prefix`, in order.
    fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        self.by_key
            .range::<str, _>((Bound::Included(prefix), Bound::Unbounded))
            .map(|(key, _)| key)
            .take_while(|key| key.starts_with(prefix))
            .cloned()
            .collect()
    }
}

/// Shared handle to the query-result cache; clones see the same entries.
#[derive(Debug, Clone)]
pub struct CacheStore {
    slots: Arc<RwLock<Slots>>,
}

impl Default for CacheStore {
    fn default() -> Self {
        Self::with_default_ttl()
    }
}

impl CacheStore {
    /// `default_ttl` applies to [`CacheStore::put`] calls without an override.
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            slots: Arc::new(RwLock::new(Slots {
                by_key: BTreeMap::new(),
                default_ttl,
            })),
        }
    }

    /// Thirty-minute default, the record query TTL.
    pub fn with_default_ttl() -> Self {
        Self::new(Duration::from_secs(30 * 60))
    }

    pub async fn get(&self, key: &str) -> Option<String> {
        let now = Instant::now();
        {
            let slots = self.slots.read().await;
            match slots.by_key.get(key) {
                Some(slot) if slot.is_live(now) => return Some(slot.json.clone()),
                Some(_) => {}
                None => return None,
            }
        }

        // Expired: drop it unless a writer refreshed it in between.
        let mut slots = self.slots.write().await;
        if slots
            .by_key
            .get(key)
            .is_some_and(|slot| !slot.is_live(Instant::now()))
        {
            slots.by_key.remove(key);
        }
        None
    }

    /// Store `json` under `key` for `ttl`, or the default TTL when `None`.
    /// A zero TTL stores nothing.
    pub async fn put(&self, key: String, json: String, ttl: Option<Duration>) {
        let mut slots = self.slots.write().await;
        let ttl = ttl.unwrap_or(slots.default_ttl);
        if ttl.is_zero() {
            slots.by_key.remove(&key);
            return;
        }
        let expires_at = Instant::now() + ttl;
        slots.by_key.insert(key, Slot { json, expires_at });
    }

    /// Remove every entry whose key starts with `prefix`; returns how many.
    pub async fn invalidate_prefix(&self, prefix: &str) -> usize {
        let mut slots = self.slots.write().await;
        let doomed = slots.keys_with_prefix(prefix);
        for key in &doomed {
            slots.by_key.remove(key);
        }
        doomed.len()
    }

    pub async fn clear_expired(&self) -> usize {
        let now = Instant::now();
        let mut slots = self.slots.write().await;
        let before = slots.by_key.len();
        slots.by_key.retain(|_, slot| slot.is_live(now));
        before - slots.by_key.len()
    }

    /// Entries held, expired ones not yet swept included.
    pub async fn len(&self) -> usize {
        self.slots.read().await.by_key.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Keys beginning with `prefix`, in order.
    pub async fn keys(&self, prefix: &str) -> Vec<String> {
        self.slots.read().await.keys_with_prefix(prefix)
    }
}

impl SettlementCache for CacheStore {
    fn get<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Option<String>> {
        Box::pin(async move { Ok(CacheStore::get(self, key).await) })
    }

    fn set<'a>(&'a self, key: String, value: String, ttl: Duration) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            self.put(key, value, Some(ttl)).await;
            Ok(())
        })
    }

    fn invalidate_prefix<'a>(&'a self, prefix: &'a str) -> StoreFuture<'a, usize> {
        Box::pin(async move { Ok(CacheStore::invalidate_prefix(self, prefix).await) })
    }

    fn ping(&self) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            self.clear_expired().await;
            Ok(())
        })
    }
}
