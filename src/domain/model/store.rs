//! Persistent store contract consumed per entity

use std::fmt::Debug;

use async_trait::async_trait;
use serde_json::Value;

use crate::domain::DomainError;

use super::entity::ModelEntity;
use super::query::{
    AggregateArgs, AggregateResult, BatchPayload, CreateManyArgs, FindArgs, Filter, GroupByArgs,
    UpdateArgs, UpsertArgs,
};

/// CRUD accessor of one entity kind in the persistent store
///
/// The store is authoritative and knows nothing about caching. Single-record
/// writes that find nothing return the store's own [`DomainError::NotFound`].
#[async_trait]
pub trait ModelStore<E>: Send + Sync + Debug
where
    E: ModelEntity,
{
    /// Inserts a record, failing with a conflict if the id exists
    async fn create(&self, data: E) -> Result<E, DomainError>;

    /// Inserts many records, returning how many were written
    async fn create_many(&self, args: CreateManyArgs<E>) -> Result<BatchPayload, DomainError>;

    /// Inserts many records, returning the written rows
    async fn create_many_and_return(&self, args: CreateManyArgs<E>)
        -> Result<Vec<E>, DomainError>;

    /// Deletes the record matching a unique filter and returns it
    async fn delete(&self, args: &FindArgs) -> Result<E, DomainError>;

    /// Deletes every record matching the filter
    async fn delete_many(&self, filter: &Filter) -> Result<BatchPayload, DomainError>;

    async fn find_first(&self, args: &FindArgs) -> Result<Option<E>, DomainError>;

    async fn find_first_or_throw(&self, args: &FindArgs) -> Result<E, DomainError> {
        self.find_first(args).await?.ok_or_else(|| {
            DomainError::not_found(format!("No {} matches the given query", E::MODEL))
        })
    }

    async fn find_many(&self, args: &FindArgs) -> Result<Vec<E>, DomainError>;

    async fn find_unique(&self, args: &FindArgs) -> Result<Option<E>, DomainError>;

    async fn find_unique_or_throw(&self, args: &FindArgs) -> Result<E, DomainError> {
        self.find_unique(args).await?.ok_or_else(|| {
            DomainError::not_found(format!("No {} matches the given unique query", E::MODEL))
        })
    }

    async fn group_by(&self, args: &GroupByArgs) -> Result<Vec<Value>, DomainError>;

    /// Patches the record matching a unique filter and returns it
    async fn update(&self, args: &UpdateArgs) -> Result<E, DomainError>;

    /// Patches every record matching the filter
    async fn update_many(&self, args: &UpdateArgs) -> Result<BatchPayload, DomainError>;

    /// Patches the matching record, or creates `args.create` if none matches
    async fn upsert(&self, args: &UpsertArgs<E>) -> Result<E, DomainError>;

    async fn aggregate(&self, args: &AggregateArgs) -> Result<AggregateResult, DomainError>;

    async fn count(&self, args: &FindArgs) -> Result<u64, DomainError>;
}
