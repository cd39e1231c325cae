//! Cache infrastructure - Bounded store, facade, fetch wrapper and single-flight

mod facade;
mod factory;
mod fetch;
mod in_memory;
mod single_flight;

pub use facade::{CacheFacade, Invalidation};
pub use factory::{CacheConfig, CacheFactory};
pub use fetch::{FetchCache, FetchObserver, FetchSource, FetchStats, Fetched, Fetcher};
pub use in_memory::{InMemoryCache, InMemoryCacheConfig};
pub use single_flight::{KeyedSingleFlight, SingleFlight};
