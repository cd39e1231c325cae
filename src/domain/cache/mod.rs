//! Cache domain - store contract, keys, codec, events and counters

pub mod codec;
mod event;
mod key;
mod stats;
mod store;

pub use event::{CacheEvent, CacheEventKind, CacheListener, ListenerId};
pub use key::{hash_any, BucketKind, EntityKeys};
pub(crate) use stats::CacheCounters;
pub use stats::{CacheStats, TimingStats};
pub use store::CacheStore;

#[cfg(test)]
pub use store::mock::MockCacheStore;
