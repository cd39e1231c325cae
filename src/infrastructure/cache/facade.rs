//! Cache facade over one or more bounded stores

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, info, warn};

use crate::domain::cache::{
    codec, hash_any, CacheCounters, CacheEvent, CacheEventKind, CacheListener, CacheStats,
    CacheStore, ListenerId,
};
use crate::domain::DomainError;
use crate::infrastructure::metrics;

/// Outcome of a bulk invalidation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Invalidation {
    /// Tracked keys that matched
    pub matched: usize,
    /// Keys a store confirmed removing
    pub removed: usize,
}

impl Invalidation {
    /// True when nothing matched and no store was touched
    pub fn is_noop(&self) -> bool {
        self.matched == 0
    }
}

struct Subscription {
    id: ListenerId,
    kind: CacheEventKind,
    listener: CacheListener,
}

/// Typed get/set/delete over bounded stores, with counters and events
///
/// Values are serialized with [`codec`] before reaching a store. Stores cannot
/// enumerate their contents, so the facade mirrors the set of keys it wrote;
/// `set`, `del` and `clear` keep the mirror current, and a miss on a mirrored
/// key (natural expiry or eviction) prunes it unless a write landed meanwhile.
pub struct CacheFacade {
    name: String,
    stores: Vec<Arc<dyn CacheStore>>,
    default_ttl: Option<Duration>,
    refresh_threshold: Option<Duration>,
    /// Mirrored keys with the write generation that last stored them
    keys: RwLock<HashMap<String, u64>>,
    generation: AtomicU64,
    refreshing: Mutex<HashSet<String>>,
    counters: CacheCounters,
    subscriptions: RwLock<Vec<Subscription>>,
    next_listener: AtomicU64,
}

impl fmt::Debug for CacheFacade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheFacade")
            .field("name", &self.name)
            .field("stores", &self.stores)
            .field("default_ttl", &self.default_ttl)
            .field("refresh_threshold", &self.refresh_threshold)
            .field("stats", &self.stats())
            .finish()
    }
}

impl CacheFacade {
    /// Creates a facade over a single store
    pub fn new(name: impl Into<String>, store: Arc<dyn CacheStore>) -> Self {
        Self {
            name: name.into(),
            stores: vec![store],
            default_ttl: None,
            refresh_threshold: None,
            keys: RwLock::new(HashMap::new()),
            generation: AtomicU64::new(0),
            refreshing: Mutex::new(HashSet::new()),
            counters: CacheCounters::default(),
            subscriptions: RwLock::new(Vec::new()),
            next_listener: AtomicU64::new(1),
        }
    }

    /// Adds a lower tier; reads fall through tiers in order, writes reach all
    pub fn with_store(mut self, store: Arc<dyn CacheStore>) -> Self {
        self.stores.push(store);
        self
    }

    /// Lifetime used when a write does not specify one
    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = Some(ttl);
        self
    }

    /// Remaining lifetime under which `wrap` refreshes a hit in the background
    pub fn with_refresh_threshold(mut self, threshold: Duration) -> Self {
        self.refresh_threshold = Some(threshold);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn default_ttl(&self) -> Option<Duration> {
        self.default_ttl
    }

    pub fn stats(&self) -> CacheStats {
        self.counters.snapshot()
    }

    /// Stable digest of any serializable value
    pub fn hash_any<T>(value: &T) -> Result<String, DomainError>
    where
        T: Serialize + ?Sized,
    {
        hash_any(value)
    }

    /// Gets a value; `None` is the miss marker
    pub async fn get<T>(&self, key: &str) -> Result<Option<T>, DomainError>
    where
        T: DeserializeOwned,
    {
        let seen = self.generation_of(key);

        match self.get_raw(key).await? {
            Some(raw) => {
                self.counters.hit();
                metrics::record_cache_lookup(&self.name, true);
                debug!(cache = %self.name, key, "Cache hit");

                Ok(Some(codec::decode(&raw)?))
            }
            None => {
                self.counters.miss();
                metrics::record_cache_lookup(&self.name, false);
                debug!(cache = %self.name, key, "Cache miss");

                self.untrack_unless_rewritten(key, seen);
                Ok(None)
            }
        }
    }

    /// Gets several values, preserving order
    pub async fn mget<T>(&self, keys: &[&str]) -> Result<Vec<Option<T>>, DomainError>
    where
        T: DeserializeOwned,
    {
        let mut values = Vec::with_capacity(keys.len());

        for key in keys {
            values.push(self.get(key).await?);
        }

        Ok(values)
    }

    /// Remaining lifetime of a key in the first store holding it
    pub async fn ttl(&self, key: &str) -> Result<Option<Duration>, DomainError> {
        for store in &self.stores {
            if let Some(remaining) = store.ttl(key).await? {
                return Ok(Some(remaining));
            }
        }

        Ok(None)
    }

    /// Stores a value in every tier
    ///
    /// Serialization happens before any store is touched; a value that cannot
    /// be serialized fails here and is never retried.
    pub async fn set<T>(&self, key: &str, value: &T, ttl: Option<Duration>) -> Result<(), DomainError>
    where
        T: Serialize + ?Sized,
    {
        let raw = codec::encode(value)?;
        self.set_raw(key, raw, ttl).await
    }

    /// Stores several values; all are serialized before the first write
    pub async fn mset<T>(
        &self,
        entries: &[(&str, &T)],
        ttl: Option<Duration>,
    ) -> Result<(), DomainError>
    where
        T: Serialize,
    {
        let encoded = entries
            .iter()
            .map(|(key, value)| Ok((*key, codec::encode(value)?)))
            .collect::<Result<Vec<_>, DomainError>>()?;

        for (key, raw) in encoded {
            self.set_raw(key, raw, ttl).await?;
        }

        Ok(())
    }

    /// Removes a key from every tier, returning whether any held it
    pub async fn del(&self, key: &str) -> Result<bool, DomainError> {
        let mut removed = false;

        for store in &self.stores {
            match store.delete(key).await {
                Ok(deleted) => removed |= deleted,
                Err(e) => {
                    warn!(cache = %self.name, store = store.name(), key, error = %e, "Cache delete failed");
                    self.emit(CacheEvent::new(CacheEventKind::Del).with_key(key).with_error(&e));
                    return Err(e);
                }
            }
        }

        self.untrack(key);

        if removed {
            self.counters.deleted(1);
            metrics::record_cache_write(&self.name, "deleted", 1);
        }

        self.emit(CacheEvent::new(CacheEventKind::Del).with_key(key));
        Ok(removed)
    }

    /// Removes several keys, returning how many a store confirmed
    pub async fn mdel<S>(&self, keys: &[S]) -> Result<usize, DomainError>
    where
        S: AsRef<str>,
    {
        let mut removed = 0;

        for key in keys {
            if self.del(key.as_ref()).await? {
                removed += 1;
            }
        }

        Ok(removed)
    }

    /// Empties every tier
    pub async fn clear(&self) -> Result<(), DomainError> {
        for store in &self.stores {
            if let Err(e) = store.clear().await {
                warn!(cache = %self.name, store = store.name(), error = %e, "Cache clear failed");
                self.emit(CacheEvent::new(CacheEventKind::Clear).with_error(&e));
                return Err(e);
            }
        }

        self.keys
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.counters.cleared();
        metrics::record_cache_write(&self.name, "cleared", 1);
        info!(cache = %self.name, "Cache cleared");

        self.emit(CacheEvent::new(CacheEventKind::Clear));
        Ok(())
    }

    /// Returns the cached value or produces, stores and returns it
    ///
    /// With a refresh threshold configured, a hit whose remaining lifetime is
    /// below the threshold is returned immediately while the producer runs in
    /// the background to replace it.
    pub async fn wrap<T, F, Fut>(
        self: &Arc<Self>,
        key: &str,
        ttl: Option<Duration>,
        producer: F,
    ) -> Result<T, DomainError>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, DomainError>> + Send + 'static,
    {
        if let Some(value) = self.get::<T>(key).await? {
            if let Some(threshold) = self.refresh_threshold {
                if let Some(remaining) = self.ttl(key).await? {
                    if remaining < threshold {
                        self.spawn_refresh(key, ttl, producer);
                    }
                }
            }

            return Ok(value);
        }

        let value = producer().await?;
        self.set(key, &value, ttl).await?;
        Ok(value)
    }

    /// Subscribes to one kind of event
    pub fn on<F>(&self, kind: CacheEventKind, listener: F) -> ListenerId
    where
        F: Fn(&CacheEvent) + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_listener.fetch_add(1, Ordering::Relaxed));

        self.subscriptions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Subscription {
                id,
                kind,
                listener: Arc::new(listener),
            });

        id
    }

    /// Removes a subscription, returning whether it existed
    pub fn off(&self, id: ListenerId) -> bool {
        let mut subscriptions = self
            .subscriptions
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let before = subscriptions.len();

        subscriptions.retain(|subscription| subscription.id != id);
        subscriptions.len() != before
    }

    /// Releases store resources and drops all listeners
    pub async fn disconnect(&self) -> Result<(), DomainError> {
        for store in &self.stores {
            store.disconnect().await?;
        }

        self.subscriptions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        info!(cache = %self.name, "Cache disconnected");
        Ok(())
    }

    /// Tracked keys starting with the prefix, sorted
    pub fn keys_by_prefix(&self, prefix: &str) -> Vec<String> {
        self.keys_matching(|key| key.starts_with(prefix))
    }

    /// Removes every tracked key starting with the prefix
    ///
    /// When no key matches, no store is called.
    pub async fn clear_by_prefix(&self, prefix: &str) -> Result<Invalidation, DomainError> {
        self.clear_matching(|key| key.starts_with(prefix)).await
    }

    /// Removes every tracked key accepted by the predicate
    pub async fn clear_matching<P>(&self, predicate: P) -> Result<Invalidation, DomainError>
    where
        P: Fn(&str) -> bool,
    {
        let keys = self.keys_matching(predicate);

        if keys.is_empty() {
            return Ok(Invalidation::default());
        }

        let removed = self.mdel(keys.as_slice()).await?;
        debug!(cache = %self.name, matched = keys.len(), removed, "Invalidated keys");

        Ok(Invalidation {
            matched: keys.len(),
            removed,
        })
    }

    /// Drops mirrored keys that no store holds anymore, returning how many
    pub async fn sweep(&self) -> Result<usize, DomainError> {
        let mut pruned = 0;

        for key in self.keys_matching(|_| true) {
            let seen = self.generation_of(&key);
            let mut present = false;

            for store in &self.stores {
                if store.has(&key).await? {
                    present = true;
                    break;
                }
            }

            if !present && self.untrack_unless_rewritten(&key, seen) {
                pruned += 1;
            }
        }

        Ok(pruned)
    }

    async fn get_raw(&self, key: &str) -> Result<Option<String>, DomainError> {
        for store in &self.stores {
            match store.get(key).await {
                Ok(Some(raw)) => return Ok(Some(raw)),
                Ok(None) => continue,
                Err(e) => {
                    warn!(cache = %self.name, store = store.name(), key, error = %e, "Cache read failed");
                    return Err(e);
                }
            }
        }

        Ok(None)
    }

    async fn set_raw(&self, key: &str, raw: String, ttl: Option<Duration>) -> Result<(), DomainError> {
        if let Err(e) = self.write_stores(key, &raw, ttl).await {
            self.emit(CacheEvent::new(CacheEventKind::Set).with_key(key).with_error(&e));
            return Err(e);
        }

        self.counters.added(1);
        metrics::record_cache_write(&self.name, "added", 1);

        self.emit(CacheEvent::new(CacheEventKind::Set).with_key(key).with_value(raw));
        Ok(())
    }

    async fn write_stores(&self, key: &str, raw: &str, ttl: Option<Duration>) -> Result<(), DomainError> {
        let ttl = ttl.or(self.default_ttl);

        for store in &self.stores {
            if let Err(e) = store.set(key, raw, ttl).await {
                warn!(cache = %self.name, store = store.name(), key, error = %e, "Cache write failed");
                return Err(e);
            }
        }

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.keys
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), generation);
        Ok(())
    }

    fn spawn_refresh<T, F, Fut>(self: &Arc<Self>, key: &str, ttl: Option<Duration>, producer: F)
    where
        T: Serialize + Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, DomainError>> + Send + 'static,
    {
        let started = self
            .refreshing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string());

        if !started {
            return;
        }

        let facade = Arc::clone(self);
        let key = key.to_string();

        tokio::spawn(async move {
            let outcome = match producer().await {
                Ok(value) => match codec::encode(&value) {
                    Ok(raw) => facade
                        .write_stores(&key, &raw, ttl)
                        .await
                        .map(|_| raw),
                    Err(e) => Err(e),
                },
                Err(e) => Err(e),
            };

            facade
                .refreshing
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&key);

            match outcome {
                Ok(raw) => {
                    facade.counters.updated();
                    metrics::record_cache_write(&facade.name, "updated", 1);
                    debug!(cache = %facade.name, key = %key, "Cache entry refreshed");
                    facade.emit(
                        CacheEvent::new(CacheEventKind::Refresh)
                            .with_key(key.as_str())
                            .with_value(raw),
                    );
                }
                Err(e) => {
                    warn!(cache = %facade.name, key = %key, error = %e, "Cache refresh failed");
                    facade.emit(
                        CacheEvent::new(CacheEventKind::Refresh)
                            .with_key(key.as_str())
                            .with_error(&e),
                    );
                }
            }
        });
    }

    fn keys_matching<P>(&self, predicate: P) -> Vec<String>
    where
        P: Fn(&str) -> bool,
    {
        let mut keys: Vec<String> = self
            .keys
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .filter(|key| predicate(key))
            .cloned()
            .collect();

        keys.sort();
        keys
    }

    fn untrack(&self, key: &str) {
        self.keys
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
    }

    fn generation_of(&self, key: &str) -> Option<u64> {
        self.keys
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .copied()
    }

    /// Prunes a key only if no write stored it after `seen` was observed
    fn untrack_unless_rewritten(&self, key: &str, seen: Option<u64>) -> bool {
        let mut keys = self.keys.write().unwrap_or_else(PoisonError::into_inner);

        match keys.get(key) {
            Some(generation) if Some(*generation) == seen => {
                keys.remove(key);
                true
            }
            _ => false,
        }
    }

    fn emit(&self, event: CacheEvent) {
        let listeners: Vec<CacheListener> = self
            .subscriptions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|subscription| subscription.kind == event.kind)
            .map(|subscription| Arc::clone(&subscription.listener))
            .collect();

        for listener in listeners {
            listener(&event);
        }
    }
}
