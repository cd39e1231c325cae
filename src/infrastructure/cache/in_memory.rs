//! In-memory bounded store using moka

use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use moka::future::Cache as MokaCache;
use moka::policy::EvictionPolicy;
use moka::Expiry;

use crate::domain::cache::CacheStore;
use crate::domain::DomainError;

/// Configuration for in-memory cache
#[derive(Debug, Clone)]
pub struct InMemoryCacheConfig {
    /// Maximum number of entries
    pub max_capacity: u64,
    /// Lifetime of entries stored without an explicit one
    pub default_ttl: Duration,
    /// Re-arm an entry's full lifetime every time it is read
    pub refresh_on_read: bool,
}

impl Default for InMemoryCacheConfig {
    fn default() -> Self {
        Self {
            max_capacity: 500,
            default_ttl: Duration::from_secs(3600), // 1 hour
            refresh_on_read: false,
        }
    }
}

impl InMemoryCacheConfig {
    /// Sets the maximum capacity
    pub fn with_max_capacity(mut self, capacity: u64) -> Self {
        self.max_capacity = capacity;
        self
    }

    /// Sets the default TTL
    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    /// Refreshes entry age on every read
    pub fn with_refresh_on_read(mut self) -> Self {
        self.refresh_on_read = true;
        self
    }
}

/// Entry stored in moka
#[derive(Debug, Clone)]
struct CacheEntry {
    /// Serialized value
    data: String,
    /// Lifetime the entry was written with
    ttl: Duration,
    /// Shared by every clone moka hands out, moved forward on refresh
    expires_at: Arc<Mutex<Instant>>,
}

impl CacheEntry {
    fn new(data: String, ttl: Duration) -> Self {
        Self {
            data,
            ttl,
            expires_at: Arc::new(Mutex::new(Instant::now() + ttl)),
        }
    }

    fn expires_at(&self) -> Instant {
        *self.expires_at.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn rearm(&self, from: Instant) {
        *self.expires_at.lock().unwrap_or_else(PoisonError::into_inner) = from + self.ttl;
    }

    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at()
    }
}

/// Per-entry lifetime, re-armed on every write and optionally on every read
struct EntryExpiry {
    refresh_on_read: bool,
}

impl Expiry<String, CacheEntry> for EntryExpiry {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &CacheEntry,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.ttl)
    }

    fn expire_after_read(
        &self,
        _key: &String,
        value: &CacheEntry,
        read_at: Instant,
        duration_until_expiry: Option<Duration>,
        _last_modified_at: Instant,
    ) -> Option<Duration> {
        if !self.refresh_on_read {
            return duration_until_expiry;
        }

        value.rearm(read_at);
        Some(value.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &CacheEntry,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// Capacity- and time-bounded store with least-recently-used eviction
///
/// Features:
/// - per-entry TTL, falling back to the configured default
/// - LRU eviction once `max_capacity` entries are held
/// - optional refresh of an entry's age on read, applied by moka's expiry
///   policy so a read never writes the entry back
#[derive(Debug)]
pub struct InMemoryCache {
    cache: MokaCache<String, CacheEntry>,
    config: InMemoryCacheConfig,
}

impl InMemoryCache {
    /// Creates a new in-memory cache with default configuration
    pub fn new() -> Self {
        Self::with_config(InMemoryCacheConfig::default())
    }

    /// Creates a new in-memory cache with the given configuration
    pub fn with_config(config: InMemoryCacheConfig) -> Self {
        let cache = MokaCache::builder()
            .max_capacity(config.max_capacity)
            .eviction_policy(EvictionPolicy::lru())
            .expire_after(EntryExpiry {
                refresh_on_read: config.refresh_on_read,
            })
            .build();

        Self { cache, config }
    }

    pub fn config(&self) -> &InMemoryCacheConfig {
        &self.config
    }

    /// Number of live entries after pending maintenance has run
    pub async fn entry_count(&self) -> u64 {
        self.cache.run_pending_tasks().await;
        self.cache.entry_count()
    }

    /// Runs pending eviction and expiration work
    pub async fn sync(&self) {
        self.cache.run_pending_tasks().await;
    }
}

impl Default for InMemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheStore for InMemoryCache {
    fn name(&self) -> &str {
        "memory"
    }

    async fn get(&self, key: &str) -> Result<Option<String>, DomainError> {
        match self.cache.get(key).await {
            Some(entry) if !entry.is_expired() => Ok(Some(entry.data)),
            Some(_) => {
                self.cache.invalidate(key).await;
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), DomainError> {
        let ttl = ttl.unwrap_or(self.config.default_ttl);
        let entry = CacheEntry::new(value.to_string(), ttl);

        self.cache.insert(key.to_string(), entry).await;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, DomainError> {
        Ok(self
            .cache
            .remove(key)
            .await
            .is_some_and(|entry| !entry.is_expired()))
    }

    async fn clear(&self) -> Result<(), DomainError> {
        self.cache.invalidate_all();
        self.cache.run_pending_tasks().await;
        Ok(())
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>, DomainError> {
        match self.cache.get(key).await {
            Some(entry) if !entry.is_expired() => {
                Ok(Some(entry.expires_at().saturating_duration_since(Instant::now())))
            }
            Some(_) => {
                self.cache.invalidate(key).await;
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn has(&self, key: &str) -> Result<bool, DomainError> {
        Ok(self.cache.contains_key(key))
    }
}
