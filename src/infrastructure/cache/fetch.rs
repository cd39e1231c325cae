//! Read-through cache bound to a fetch function

use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use futures::future::{BoxFuture, FutureExt};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, warn};

use crate::domain::cache::TimingStats;
use crate::domain::{DomainError, FetchPhase};
use crate::infrastructure::metrics;

use super::facade::CacheFacade;
use super::single_flight::KeyedSingleFlight;

/// Function producing the value for a key; `Ok(None)` means nothing to cache
pub type Fetcher<T> =
    Arc<dyn Fn(String) -> BoxFuture<'static, Result<Option<T>, DomainError>> + Send + Sync>;

/// Callbacks around every fetch
///
/// `on_end` fires whatever the outcome. `on_error` observes failures but never
/// suppresses them. A failing `on_success` turns the fetch into an error.
pub trait FetchObserver<T>: Send + Sync {
    fn on_start(&self, _key: &str) {}

    fn on_end(&self, _key: &str, _elapsed: Duration) {}

    fn on_success(&self, _key: &str, _value: &T) -> Result<(), DomainError> {
        Ok(())
    }

    fn on_error(&self, _key: &str, _error: &DomainError) {}
}

struct NoopObserver;

impl<T> FetchObserver<T> for NoopObserver {}

/// Where a value returned by [`FetchCache::get_with_details`] came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum FetchSource {
    Cache,
    NoCache,
}

/// Value plus provenance
#[derive(Debug, Clone, PartialEq)]
pub struct Fetched<T> {
    pub value: Option<T>,
    pub source: FetchSource,
    /// True when the value is now held by the cache
    pub cached: bool,
    /// Remaining lifetime for a cache hit, fetch duration for a fresh value
    pub cached_for: Option<Duration>,
}

/// Fetch counters, updated whether the fetch succeeded or not
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FetchStats {
    pub fetches: u64,
    pub errors: u64,
    pub timing: TimingStats,
}

struct FetchJob<T> {
    cache: Arc<CacheFacade>,
    fetcher: Fetcher<T>,
    observer: Arc<dyn FetchObserver<T>>,
    stats: Arc<Mutex<FetchStats>>,
    ttl: Option<Duration>,
}

impl<T> Clone for FetchJob<T> {
    fn clone(&self) -> Self {
        Self {
            cache: Arc::clone(&self.cache),
            fetcher: Arc::clone(&self.fetcher),
            observer: Arc::clone(&self.observer),
            stats: Arc::clone(&self.stats),
            ttl: self.ttl,
        }
    }
}

impl<T> FetchJob<T>
where
    T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    async fn run(self, key: String) -> Result<(Option<T>, Duration), DomainError> {
        self.observer.on_start(&key);

        let started = Instant::now();
        let outcome = (self.fetcher)(key.clone()).await;
        let elapsed = started.elapsed();

        self.observer.on_end(&key, elapsed);

        let fetched = match outcome {
            Err(e) => Err(DomainError::fetch(&key, FetchPhase::Fetch, e)),
            Ok(None) => Ok(None),
            Ok(Some(value)) => match self.observer.on_success(&key, &value) {
                Err(e) => Err(DomainError::fetch(&key, FetchPhase::Success, e)),
                Ok(()) => Ok(Some(value)),
            },
        };

        let result = match fetched {
            Ok(Some(value)) => self
                .cache
                .set(&key, &value, self.ttl)
                .await
                .map(|()| Some(value)),
            other => other,
        };

        self.record(elapsed, result.is_ok());
        metrics::record_fetch(self.cache.name(), elapsed, result.is_ok());

        match result {
            Ok(Some(value)) => {
                debug!(cache = %self.cache.name(), key = %key, ?elapsed, "Fetched and cached");
                Ok((Some(value), elapsed))
            }
            Ok(None) => Ok((None, elapsed)),
            Err(e) => {
                warn!(cache = %self.cache.name(), key = %key, error = %e, "Fetch failed");
                self.observer.on_error(&key, &e);
                Err(e)
            }
        }
    }

    fn record(&self, elapsed: Duration, succeeded: bool) {
        let mut stats = self.stats.lock().unwrap_or_else(PoisonError::into_inner);

        stats.fetches += 1;
        stats.timing.record(elapsed);

        if !succeeded {
            stats.errors += 1;
        }
    }
}

/// Cache facade with an attached fetch function
///
/// Concurrent misses on the same key share one fetch.
pub struct FetchCache<T> {
    job: FetchJob<T>,
    flights: KeyedSingleFlight<(Option<T>, Duration), DomainError>,
}

impl<T> fmt::Debug for FetchCache<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchCache")
            .field("cache", &self.job.cache.name())
            .field("ttl", &self.job.ttl)
            .field("flights", &self.flights)
            .finish()
    }
}

impl<T> FetchCache<T>
where
    T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    pub fn new<F, Fut>(cache: Arc<CacheFacade>, fetcher: F) -> Self
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Option<T>, DomainError>> + Send + 'static,
    {
        Self {
            job: FetchJob {
                cache,
                fetcher: Arc::new(move |key| fetcher(key).boxed()),
                observer: Arc::new(NoopObserver),
                stats: Arc::new(Mutex::new(FetchStats::default())),
                ttl: None,
            },
            flights: KeyedSingleFlight::new(),
        }
    }

    /// Lifetime of fetched entries; the facade default applies otherwise
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.job.ttl = Some(ttl);
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn FetchObserver<T>>) -> Self {
        self.job.observer = observer;
        self
    }

    pub fn cache(&self) -> &Arc<CacheFacade> {
        &self.job.cache
    }

    pub fn stats(&self) -> FetchStats {
        *self.job.stats.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Cached value, or a freshly fetched one
    pub async fn get(&self, key: &str) -> Result<Option<T>, DomainError> {
        Ok(self.get_with_details(key).await?.value)
    }

    /// Like [`get`](Self::get), reporting where the value came from
    pub async fn get_with_details(&self, key: &str) -> Result<Fetched<T>, DomainError> {
        if let Some(value) = self.job.cache.get::<T>(key).await? {
            let remaining = self.job.cache.ttl(key).await?;

            return Ok(Fetched {
                value: Some(value),
                source: FetchSource::Cache,
                cached: true,
                cached_for: remaining,
            });
        }

        let job = self.job.clone();
        let owned_key = key.to_string();
        let (value, elapsed) = self
            .flights
            .run(key, move || job.run(owned_key))
            .await?;

        Ok(Fetched {
            cached: value.is_some(),
            value,
            source: FetchSource::NoCache,
            cached_for: Some(elapsed),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::cache::MockCacheStore;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn facade() -> (Arc<MockCacheStore>, Arc<CacheFacade>) {
        let store = Arc::new(MockCacheStore::new());
        let facade = Arc::new(CacheFacade::new("fetch", store.clone()));
        (store, facade)
    }

    fn counting_fetcher(
        calls: &Arc<AtomicUsize>,
        value: Option<String>,
    ) -> impl Fn(String) -> BoxFuture<'static, Result<Option<String>, DomainError>> + Send + Sync + 'static
    {
        let calls = calls.clone();

        move |key| {
            calls.fetch_add(1, Ordering::SeqCst);
            let value = value.clone().map(|v| format!("{v}:{key}"));
            async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                Ok(value)
            }
            .boxed()
        }
    }

    #[derive(Default)]
    struct RecordingObserver {
        events: Mutex<Vec<String>>,
        reject: bool,
    }

    impl FetchObserver<String> for RecordingObserver {
        fn on_start(&self, key: &str) {
            self.events.lock().unwrap().push(format!("start {key}"));
        }

        fn on_end(&self, key: &str, _elapsed: Duration) {
            self.events.lock().unwrap().push(format!("end {key}"));
        }

        fn on_success(&self, key: &str, _value: &String) -> Result<(), DomainError> {
            self.events.lock().unwrap().push(format!("success {key}"));
            if self.reject {
                return Err(DomainError::validation("rejected"));
            }
            Ok(())
        }

        fn on_error(&self, key: &str, _error: &DomainError) {
            self.events.lock().unwrap().push(format!("error {key}"));
        }
    }

    #[tokio::test]
    async fn test_miss_fetches_then_hit_serves_cache() {
        let (_, facade) = facade();
        let calls = Arc::new(AtomicUsize::new(0));
        let cache = FetchCache::new(facade, counting_fetcher(&calls, Some("v".into())))
            .with_ttl(Duration::from_secs(60));

        let fresh = cache.get_with_details("k").await.unwrap();
        assert_eq!(fresh.value.as_deref(), Some("v:k"));
        assert_eq!(fresh.source, FetchSource::NoCache);
        assert!(fresh.cached);
        assert!(fresh.cached_for.is_some());

        let hit = cache.get_with_details("k").await.unwrap();
        assert_eq!(hit.source, FetchSource::Cache);
        assert_eq!(hit.cached_for, Some(Duration::from_secs(60)));

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let stats = cache.stats();
        assert_eq!((stats.fetches, stats.errors, stats.timing.runs), (1, 0, 1));
    }

    #[tokio::test]
    async fn test_miss_marker_is_not_stored() {
        let (store, facade) = facade();
        let calls = Arc::new(AtomicUsize::new(0));
        let cache = FetchCache::new(facade, counting_fetcher(&calls, None));

        let first = cache.get_with_details("k").await.unwrap();
        assert!(first.value.is_none());
        assert!(!first.cached);
        assert!(cache.get("k").await.unwrap().is_none());

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(store.len(), 0);
    }

    #[tokio::test]
    async fn test_cached_null_is_served_from_cache() {
        let (_, facade) = facade();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let cache = FetchCache::<Option<String>>::new(facade, move |_key| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Ok(Some(None)) }
        });

        assert_eq!(cache.get("absent").await.unwrap(), Some(None));
        assert_eq!(cache.get("absent").await.unwrap(), Some(None));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_fetch_error_is_relabeled_and_counted() {
        let (_, facade) = facade();
        let observer = Arc::new(RecordingObserver::default());
        let cache = FetchCache::<String>::new(facade, |_key| async {
            Err(DomainError::storage("connection reset"))
        })
        .with_observer(observer.clone());

        let err = cache.get("k").await.unwrap_err();
        match &err {
            DomainError::Fetch { key, phase, source } => {
                assert_eq!(key, "k");
                assert_eq!(*phase, FetchPhase::Fetch);
                assert!(matches!(**source, DomainError::Storage { .. }));
            }
            other => panic!("unexpected error: {other:?}"),
        }

        assert_eq!(
            *observer.events.lock().unwrap(),
            vec!["start k", "end k", "error k"]
        );
        let stats = cache.stats();
        assert_eq!((stats.errors, stats.timing.runs), (1, 1));
    }

    #[tokio::test]
    async fn test_success_callback_failure_is_relabeled_and_not_cached() {
        let (store, facade) = facade();
        let calls = Arc::new(AtomicUsize::new(0));
        let observer = Arc::new(RecordingObserver {
            reject: true,
            ..Default::default()
        });
        let cache = FetchCache::new(facade, counting_fetcher(&calls, Some("v".into())))
            .with_observer(observer.clone());

        let err = cache.get("k").await.unwrap_err();
        assert!(matches!(
            err,
            DomainError::Fetch {
                phase: FetchPhase::Success,
                ..
            }
        ));
        assert_eq!(store.len(), 0);
        assert_eq!(
            *observer.events.lock().unwrap(),
            vec!["start k", "end k", "success k", "error k"]
        );
    }

    #[tokio::test]
    async fn test_cache_write_failure_is_reported_as_failed_fetch() {
        let store = Arc::new(MockCacheStore::new().with_write_error("read-only replica"));
        let facade = Arc::new(CacheFacade::new("fetch", store.clone()));
        let calls = Arc::new(AtomicUsize::new(0));
        let observer = Arc::new(RecordingObserver::default());
        let cache = FetchCache::new(facade, counting_fetcher(&calls, Some("v".into())))
            .with_observer(observer.clone());

        let err = cache.get("k").await.unwrap_err();
        assert!(matches!(err, DomainError::Cache { .. }));

        assert_eq!(
            *observer.events.lock().unwrap(),
            vec!["start k", "end k", "success k", "error k"]
        );
        let stats = cache.stats();
        assert_eq!((stats.fetches, stats.errors), (1, 1));
        assert_eq!(store.len(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_misses_on_same_key_share_one_fetch() {
        let (_, facade) = facade();
        let calls = Arc::new(AtomicUsize::new(0));
        let cache = Arc::new(FetchCache::new(
            facade,
            counting_fetcher(&calls, Some("v".into())),
        ));

        let callers = (0..10).map(|_| {
            let cache = cache.clone();
            tokio::spawn(async move { cache.get("k").await })
        });

        for result in futures::future::join_all(callers).await {
            assert_eq!(result.unwrap().unwrap().as_deref(), Some("v:k"));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
