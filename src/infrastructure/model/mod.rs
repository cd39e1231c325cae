//! Model stores and the cache-aside wrapper over them

mod cached_model;
mod in_memory;
#[cfg(test)]
pub(crate) mod mock;
mod postgres;
mod registry;

pub use cached_model::{CachedModel, Operation, OperationHook};
pub use in_memory::InMemoryModelStore;
pub use postgres::{table_name, PostgresConfig, PostgresModelStore};
pub use registry::{ModelFactory, ModelProvider, StoreKind};
