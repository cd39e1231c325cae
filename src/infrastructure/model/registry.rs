//! Model factory for building cached models over one shared cache

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use sqlx::PgPool;
use tracing::info;

use crate::domain::model::{ModelEntity, ModelStore};
use crate::domain::DomainError;
use crate::infrastructure::cache::CacheFacade;

use super::cached_model::CachedModel;
use super::in_memory::InMemoryModelStore;
use super::postgres::PostgresModelStore;

/// Backing store selection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    /// Process-local records (for testing/development)
    #[default]
    Memory,
    /// JSONB tables in PostgreSQL
    Postgres,
}

impl std::str::FromStr for StoreKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "memory" | "inmemory" | "in-memory" | "in_memory" => Ok(Self::Memory),
            "postgres" | "postgresql" | "pg" => Ok(Self::Postgres),
            other => Err(DomainError::configuration(format!(
                "Unknown store kind: {}",
                other
            ))),
        }
    }
}

/// Builds [`CachedModel`]s sharing one cache and one caching policy
#[derive(Debug, Clone)]
pub struct ModelFactory {
    cache: Arc<CacheFacade>,
    pool: Option<PgPool>,
    use_cache: bool,
    ttl: Option<Duration>,
}

impl ModelFactory {
    pub fn new(cache: Arc<CacheFacade>) -> Self {
        Self {
            cache,
            pool: None,
            use_cache: true,
            ttl: None,
        }
    }

    /// Backs models with PostgreSQL instead of memory
    pub fn with_pool(mut self, pool: PgPool) -> Self {
        self.pool = Some(pool);
        self
    }

    pub fn with_use_cache(mut self, use_cache: bool) -> Self {
        self.use_cache = use_cache;
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn cache(&self) -> &Arc<CacheFacade> {
        &self.cache
    }

    pub fn store_kind(&self) -> StoreKind {
        match self.pool {
            Some(_) => StoreKind::Postgres,
            None => StoreKind::Memory,
        }
    }

    /// Wraps an existing store
    pub fn model<E>(&self, store: Arc<dyn ModelStore<E>>) -> CachedModel<E>
    where
        E: ModelEntity,
    {
        let model = CachedModel::new(store, self.cache.clone()).with_use_cache(self.use_cache);

        match self.ttl {
            Some(ttl) => model.with_ttl(ttl),
            None => model,
        }
    }

    /// Creates the entity's store on the configured backend and wraps it
    pub async fn create<E>(&self) -> Result<CachedModel<E>, DomainError>
    where
        E: ModelEntity,
    {
        let store: Arc<dyn ModelStore<E>> = match &self.pool {
            Some(pool) => {
                let store = PostgresModelStore::<E>::new(pool.clone())?;
                store.ensure_table().await?;
                Arc::new(store)
            }
            None => Arc::new(InMemoryModelStore::<E>::new()),
        };

        info!(
            model = E::MODEL,
            store = ?self.store_kind(),
            use_cache = self.use_cache,
            "Created cached model"
        );

        Ok(self.model(store))
    }
}

/// Anything exposing a cached model of one entity
pub trait ModelProvider<E>
where
    E: ModelEntity,
{
    fn model(&self) -> &CachedModel<E>;
}

impl<E> ModelProvider<E> for CachedModel<E>
where
    E: ModelEntity,
{
    fn model(&self) -> &CachedModel<E> {
        self
    }
}
