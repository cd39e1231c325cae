//! Model domain - persistent store contract for managed entities

mod entity;
pub mod evaluate;
mod query;
mod store;

pub use entity::ModelEntity;
pub use query::{
    id_filter, AggregateArgs, AggregateResult, BatchPayload, CreateManyArgs, FindArgs, Filter,
    GroupByArgs, OrderBy, SortOrder, UpdateArgs, UpsertArgs,
};
pub use store::ModelStore;
