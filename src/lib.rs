//! Entity Cache
//!
//! Cache-aside data access for persistent models:
//! - Bounded in-memory store with per-entry lifetimes and refresh on read
//! - Cache facade with events, counters and prefix invalidation
//! - Fetch wrapper and single-flight primitives for expensive loads
//! - Cached model wrapper with per-operation latency tracking

pub mod cli;
pub mod config;
pub mod domain;
pub mod infrastructure;

pub use config::AppConfig;
pub use domain::DomainError;
pub use infrastructure::cache::{CacheConfig, CacheFacade, CacheFactory, FetchCache, SingleFlight};
pub use infrastructure::latency::LatencyTracker;
pub use infrastructure::model::{CachedModel, ModelFactory, ModelProvider, Operation};
