//! Bounded store adapter contract

use std::fmt::Debug;
use std::time::Duration;

use async_trait::async_trait;

use crate::domain::DomainError;

/// Key-value store backing a cache facade
///
/// Values are already serialized to their transport form, which keeps the
/// trait dyn-compatible. Implementations are expected to bound capacity and to
/// evict least-recently-used entries; they cannot enumerate their keys.
#[async_trait]
pub trait CacheStore: Send + Sync + Debug {
    /// Short name used in logs and metric labels
    fn name(&self) -> &str;

    /// Gets a serialized value, `None` when absent or expired
    async fn get(&self, key: &str) -> Result<Option<String>, DomainError>;

    /// Stores a serialized value; `None` lifetime means the store default
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), DomainError>;

    /// Removes a key, returning whether something was removed
    async fn delete(&self, key: &str) -> Result<bool, DomainError>;

    /// Removes every entry
    async fn clear(&self) -> Result<(), DomainError>;

    /// Remaining lifetime of a key, `None` when absent
    async fn ttl(&self, key: &str) -> Result<Option<Duration>, DomainError>;

    /// Checks if a key is present
    async fn has(&self, key: &str) -> Result<bool, DomainError> {
        Ok(self.get(key).await?.is_some())
    }

    /// Releases any held resources
    async fn disconnect(&self) -> Result<(), DomainError> {
        Ok(())
    }
}

#[cfg(test)]
pub mod mock {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Mock store for testing, counting every call
    #[derive(Debug, Default)]
    pub struct MockCacheStore {
        entries: Mutex<HashMap<String, (String, Option<Duration>)>>,
        error: Mutex<Option<String>>,
        write_error: Mutex<Option<String>>,
        calls: AtomicUsize,
    }

    impl MockCacheStore {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_entry(self, key: &str, raw: &str) -> Self {
            self.entries
                .lock()
                .unwrap()
                .insert(key.to_string(), (raw.to_string(), None));
            self
        }

        pub fn with_error(self, error: impl Into<String>) -> Self {
            *self.error.lock().unwrap() = Some(error.into());
            self
        }

        /// Fails only `set`, leaving reads working
        pub fn with_write_error(self, error: impl Into<String>) -> Self {
            *self.write_error.lock().unwrap() = Some(error.into());
            self
        }

        pub fn set_error(&self, error: Option<&str>) {
            *self.error.lock().unwrap() = error.map(str::to_string);
        }

        /// Drops an entry behind the facade's back, like a natural expiry
        pub fn expire(&self, key: &str) {
            self.entries.lock().unwrap().remove(key);
        }

        pub fn raw(&self, key: &str) -> Option<String> {
            self.entries
                .lock()
                .unwrap()
                .get(key)
                .map(|(raw, _)| raw.clone())
        }

        pub fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        pub fn len(&self) -> usize {
            self.entries.lock().unwrap().len()
        }

        fn check_error(&self) -> Result<(), DomainError> {
            self.calls.fetch_add(1, Ordering::SeqCst);

            if let Some(error) = self.error.lock().unwrap().clone() {
                return Err(DomainError::cache(error));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl CacheStore for MockCacheStore {
        fn name(&self) -> &str {
            "mock"
        }

        async fn get(&self, key: &str) -> Result<Option<String>, DomainError> {
            self.check_error()?;
            Ok(self.raw(key))
        }

        async fn set(
            &self,
            key: &str,
            value: &str,
            ttl: Option<Duration>,
        ) -> Result<(), DomainError> {
            self.check_error()?;
            if let Some(error) = self.write_error.lock().unwrap().clone() {
                return Err(DomainError::cache(error));
            }
            self.entries
                .lock()
                .unwrap()
                .insert(key.to_string(), (value.to_string(), ttl));
            Ok(())
        }

        async fn delete(&self, key: &str) -> Result<bool, DomainError> {
            self.check_error()?;
            Ok(self.entries.lock().unwrap().remove(key).is_some())
        }

        async fn clear(&self) -> Result<(), DomainError> {
            self.check_error()?;
            self.entries.lock().unwrap().clear();
            Ok(())
        }

        async fn ttl(&self, key: &str) -> Result<Option<Duration>, DomainError> {
            self.check_error()?;
            Ok(self.entries.lock().unwrap().get(key).and_then(|(_, ttl)| *ttl))
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[tokio::test]
        async fn test_mock_store_set_get() {
            let store = MockCacheStore::new();
            store.set("k", "\"v\"", None).await.unwrap();

            assert_eq!(store.get("k").await.unwrap(), Some("\"v\"".to_string()));
            assert!(store.has("k").await.unwrap());
            assert_eq!(store.call_count(), 3);
        }

        #[tokio::test]
        async fn test_mock_store_with_error() {
            let store = MockCacheStore::new().with_error("boom");

            assert!(store.get("k").await.is_err());
            store.set_error(None);
            assert!(store.get("k").await.unwrap().is_none());
        }

        #[tokio::test]
        async fn test_mock_store_with_write_error() {
            let store = MockCacheStore::new().with_entry("k", "1").with_write_error("read-only");

            assert_eq!(store.get("k").await.unwrap(), Some("1".to_string()));
            assert!(store.set("k", "2", None).await.is_err());
            assert_eq!(store.raw("k"), Some("1".to_string()));
        }

        #[tokio::test]
        async fn test_mock_store_delete_reports_removal() {
            let store = MockCacheStore::new().with_entry("k", "1");

            assert!(store.delete("k").await.unwrap());
            assert!(!store.delete("k").await.unwrap());
        }
    }
}
