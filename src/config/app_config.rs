use std::time::Duration;

use serde::Deserialize;
use validator::Validate;

use crate::domain::DomainError;
use crate::infrastructure::cache::CacheConfig;
use crate::infrastructure::logging::LoggingConfig;
use crate::infrastructure::metrics::MetricsConfig;
use crate::infrastructure::model::{PostgresConfig, StoreKind};

/// Application configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub cache: CacheConfig,
    pub models: ModelsConfig,
    pub database: PostgresConfig,
    pub logging: LoggingConfig,
    pub metrics: MetricsConfig,
}

/// Caching policy shared by every cached model
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ModelsConfig {
    pub store: StoreKind,
    pub use_cache: bool,
    /// Entry lifetime for model reads; the cache default applies otherwise
    pub ttl_secs: Option<u64>,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            store: StoreKind::default(),
            use_cache: true,
            ttl_secs: None,
        }
    }
}

impl ModelsConfig {
    pub fn ttl(&self) -> Option<Duration> {
        self.ttl_secs.map(Duration::from_secs)
    }
}

impl AppConfig {
    /// Layers `config/default`, `config/local`, `.env` and `APP__*` variables
    pub fn load() -> Result<Self, DomainError> {
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name("config/local").required(false))
            .add_source(
                config::Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .and_then(|config| config.try_deserialize::<Self>())
            .map_err(|e| DomainError::configuration(format!("Failed to load config: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), DomainError> {
        self.cache
            .validate()
            .map_err(|e| DomainError::configuration(format!("Invalid cache config: {}", e)))?;

        if self.models.ttl_secs == Some(0) {
            return Err(DomainError::configuration("Model ttl must be at least one second"));
        }

        Ok(())
    }
}
