//! Domain layer - Cache and model contracts

pub mod cache;
pub mod error;
pub mod model;

pub use cache::{
    hash_any, BucketKind, CacheEvent, CacheEventKind, CacheListener, CacheStats, CacheStore,
    EntityKeys, ListenerId, TimingStats,
};
pub use error::{DomainError, FetchPhase};
pub use model::{
    AggregateArgs, AggregateResult, BatchPayload, CreateManyArgs, FindArgs, Filter, GroupByArgs,
    ModelEntity, ModelStore, SortOrder, UpdateArgs, UpsertArgs,
};
