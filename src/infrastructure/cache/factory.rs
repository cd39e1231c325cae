//! Cache factory for the shared facade

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tracing::info;
use validator::Validate;

use crate::domain::DomainError;

use super::facade::CacheFacade;
use super::in_memory::{InMemoryCache, InMemoryCacheConfig};

/// Configuration for the shared cache
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(default)]
pub struct CacheConfig {
    /// Label used in logs and metrics
    #[validate(length(min = 1))]
    pub name: String,
    /// Maximum number of entries across all entities
    #[validate(range(min = 1))]
    pub max_capacity: u64,
    /// Lifetime of entries written without an explicit one
    #[validate(range(min = 1))]
    pub default_ttl_secs: u64,
    /// Re-arm an entry's lifetime on every read
    pub refresh_on_read: bool,
    /// Remaining lifetime under which `wrap` refreshes in the background
    #[validate(range(min = 1))]
    pub refresh_threshold_secs: Option<u64>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            name: "entities".to_string(),
            max_capacity: 500,
            default_ttl_secs: 3600,
            refresh_on_read: false,
            refresh_threshold_secs: None,
        }
    }
}

impl CacheConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_max_capacity(mut self, capacity: u64) -> Self {
        self.max_capacity = capacity;
        self
    }

    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl_secs = ttl.as_secs();
        self
    }

    pub fn with_refresh_on_read(mut self) -> Self {
        self.refresh_on_read = true;
        self
    }

    pub fn with_refresh_threshold(mut self, threshold: Duration) -> Self {
        self.refresh_threshold_secs = Some(threshold.as_secs());
        self
    }

    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }

    fn store_config(&self) -> InMemoryCacheConfig {
        let config = InMemoryCacheConfig::default()
            .with_max_capacity(self.max_capacity)
            .with_default_ttl(self.default_ttl());

        if self.refresh_on_read {
            config.with_refresh_on_read()
        } else {
            config
        }
    }
}

/// Factory for creating cache instances
#[derive(Debug, Default)]
pub struct CacheFactory;

impl CacheFactory {
    /// Creates a new cache factory
    pub fn new() -> Self {
        Self
    }

    /// Creates a facade over one bounded in-memory store
    pub fn create(&self, config: &CacheConfig) -> Result<Arc<CacheFacade>, DomainError> {
        config
            .validate()
            .map_err(|e| DomainError::configuration(format!("Invalid cache config: {}", e)))?;

        let store = InMemoryCache::with_config(config.store_config());
        let mut facade =
            CacheFacade::new(config.name.clone(), Arc::new(store)).with_default_ttl(config.default_ttl());

        if let Some(threshold) = config.refresh_threshold_secs {
            facade = facade.with_refresh_threshold(Duration::from_secs(threshold));
        }

        info!(
            cache = %config.name,
            capacity = config.max_capacity,
            default_ttl_secs = config.default_ttl_secs,
            refresh_on_read = config.refresh_on_read,
            "Cache created"
        );

        Ok(Arc::new(facade))
    }

    /// Creates a facade with default settings
    pub fn create_in_memory(&self) -> Arc<CacheFacade> {
        let config = CacheConfig::default();
        let store = InMemoryCache::with_config(config.store_config());

        Arc::new(
            CacheFacade::new(config.name.clone(), Arc::new(store))
                .with_default_ttl(config.default_ttl()),
        )
    }
}
