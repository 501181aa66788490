//! Response caching.
//!
//! Two tiers: a bounded in-process LRU (always present) and an optional
//! shared tier behind the `SharedCache` trait. Keys hash the full request
//! identity — repository, branch, prompt class, and prompt body — so two
//! different prompts (or two different backends answering the same class)
//! can never alias.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::debug;

// ============================================================================
// Cache Key
// ============================================================================

/// Cache key over (repo, branch, prompt class, prompt body).
pub fn cache_key(repo_url: &str, branch: &str, prompt_class: &str, prompt_body: &str) -> String {
    let mut hasher = Sha256::new();
    for part in [repo_url, branch, prompt_class, prompt_body] {
        hasher.update(part.as_bytes());
        hasher.update([0u8]);
    }
    hex::encode(hasher.finalize())
}

// ============================================================================
// Shared Cache Trait
// ============================================================================

/// Pluggable external cache tier. Implementations may be an in-process map,
/// a shared service, or absent entirely.
#[async_trait]
pub trait SharedCache: Send + Sync {
    async fn get(&self, key: &str) -> Option<String>;
    async fn set(&self, key: &str, value: String, ttl: Duration);
    async fn invalidate(&self, key: &str);
    /// The run that wrote these keys has delivered its result; the cache
    /// may evict them on its own schedule.
    async fn mark_delivered(&self, keys: &[String]);
}

// ============================================================================
// Statistics
// ============================================================================

/// Hit/miss counters, surfaced in analysis metadata.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub evictions: u64,
    pub entries: usize,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

// ============================================================================
// In-Process LRU
// ============================================================================

struct Entry {
    value: String,
    expires_at: Instant,
    delivered: bool,
}

struct CacheState {
    capacity: usize,
    map: HashMap<String, Entry>,
    /// Least recently used first.
    access_order: Vec<String>,
    stats: CacheStats,
}

impl CacheState {
    fn touch(&mut self, key: &str) {
        self.access_order.retain(|k| k != key);
        self.access_order.push(key.to_string());
    }

    fn remove(&mut self, key: &str) -> bool {
        if self.map.remove(key).is_some() {
            self.access_order.retain(|k| k != key);
            true
        } else {
            false
        }
    }

    fn purge_expired(&mut self) {
        let now = Instant::now();
        let expired: Vec<String> = self
            .map
            .iter()
            .filter(|(_, entry)| entry.expires_at <= now)
            .map(|(k, _)| k.clone())
            .collect();
        for key in expired {
            self.remove(&key);
            self.stats.evictions += 1;
        }
    }

    /// Evict down to capacity: delivered entries first, then strict LRU.
    fn evict_to_capacity(&mut self) {
        while self.map.len() > self.capacity {
            let delivered = self
                .access_order
                .iter()
                .find(|k| self.map.get(*k).map(|e| e.delivered).unwrap_or(false))
                .cloned();
            let victim = delivered.or_else(|| self.access_order.first().cloned());
            match victim {
                Some(key) => {
                    self.remove(&key);
                    self.stats.evictions += 1;
                }
                None => break,
            }
        }
    }
}

/// Bounded process-local response cache. All access goes through one mutex;
/// operations are O(1) expected on the map plus O(n) order maintenance over
/// a small bounded n.
pub struct MemoryCache {
    state: Mutex<CacheState>,
}

impl MemoryCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(CacheState {
                capacity: capacity.max(1),
                map: HashMap::new(),
                access_order: Vec::new(),
                stats: CacheStats::default(),
            }),
        }
    }

    pub async fn get(&self, key: &str) -> Option<String> {
        let mut state = self.state.lock().await;
        let expired = state
            .map
            .get(key)
            .map(|entry| entry.expires_at <= Instant::now());
        match expired {
            Some(false) => {
                state.touch(key);
                state.stats.hits += 1;
                state.map.get(key).map(|entry| entry.value.clone())
            }
            Some(true) => {
                state.remove(key);
                state.stats.evictions += 1;
                state.stats.misses += 1;
                None
            }
            None => {
                state.stats.misses += 1;
                None
            }
        }
    }

    pub async fn set(&self, key: &str, value: String, ttl: Duration) {
        let mut state = self.state.lock().await;
        state.purge_expired();
        let entry = Entry {
            value,
            expires_at: Instant::now() + ttl,
            delivered: false,
        };
        state.map.insert(key.to_string(), entry);
        state.touch(key);
        state.stats.sets += 1;
        state.evict_to_capacity();
    }

    pub async fn invalidate(&self, key: &str) {
        let mut state = self.state.lock().await;
        if state.remove(key) {
            debug!(key, "cache entry invalidated");
        }
    }

    pub async fn mark_delivered(&self, keys: &[String]) {
        let mut state = self.state.lock().await;
        for key in keys {
            if let Some(entry) = state.map.get_mut(key) {
                entry.delivered = true;
            }
        }
    }

    pub async fn stats(&self) -> CacheStats {
        let state = self.state.lock().await;
        let mut stats = state.stats;
        stats.entries = state.map.len();
        stats
    }
}

/// `MemoryCache` doubles as a `SharedCache` implementation for consumers
/// that want an in-process shared tier.
#[async_trait]
impl SharedCache for MemoryCache {
    async fn get(&self, key: &str) -> Option<String> {
        MemoryCache::get(self, key).await
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) {
        MemoryCache::set(self, key, value, ttl).await;
    }

    async fn invalidate(&self, key: &str) {
        MemoryCache::invalidate(self, key).await;
    }

    async fn mark_delivered(&self, keys: &[String]) {
        MemoryCache::mark_delivered(self, keys).await;
    }
}
