//! Counting model store for tests

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use crate::domain::model::{
    AggregateArgs, AggregateResult, BatchPayload, CreateManyArgs, FindArgs, Filter, GroupByArgs,
    ModelEntity, ModelStore, UpdateArgs, UpsertArgs,
};
use crate::domain::DomainError;

use super::in_memory::InMemoryModelStore;

/// In-memory store that counts calls per operation and can be made to fail
#[derive(Debug)]
pub struct MockModelStore<E>
where
    E: ModelEntity,
{
    inner: InMemoryModelStore<E>,
    calls: Mutex<HashMap<&'static str, usize>>,
    error: Mutex<Option<DomainError>>,
}

impl<E> MockModelStore<E>
where
    E: ModelEntity,
{
    pub fn new() -> Self {
        Self {
            inner: InMemoryModelStore::new(),
            calls: Mutex::new(HashMap::new()),
            error: Mutex::new(None),
        }
    }

    pub fn with_records(records: Vec<E>) -> Self {
        Self {
            inner: InMemoryModelStore::with_records(records).unwrap(),
            ..Self::new()
        }
    }

    pub fn set_error(&self, error: Option<DomainError>) {
        *self.error.lock().unwrap() = error;
    }

    /// Calls made to one operation
    pub fn calls(&self, operation: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .get(operation)
            .copied()
            .unwrap_or(0)
    }

    /// Calls made to every operation
    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().values().sum()
    }

    pub fn reset_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    fn record(&self, operation: &'static str) -> Result<(), DomainError> {
        *self.calls.lock().unwrap().entry(operation).or_insert(0) += 1;

        match self.error.lock().unwrap().clone() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl<E> ModelStore<E> for MockModelStore<E>
where
    E: ModelEntity,
{
    async fn create(&self, data: E) -> Result<E, DomainError> {
        self.record("create")?;
        self.inner.create(data).await
    }

    async fn create_many(&self, args: CreateManyArgs<E>) -> Result<BatchPayload, DomainError> {
        self.record("create_many")?;
        self.inner.create_many(args).await
    }

    async fn create_many_and_return(
        &self,
        args: CreateManyArgs<E>,
    ) -> Result<Vec<E>, DomainError> {
        self.record("create_many_and_return")?;
        self.inner.create_many_and_return(args).await
    }

    async fn delete(&self, args: &FindArgs) -> Result<E, DomainError> {
        self.record("delete")?;
        self.inner.delete(args).await
    }

    async fn delete_many(&self, filter: &Filter) -> Result<BatchPayload, DomainError> {
        self.record("delete_many")?;
        self.inner.delete_many(filter).await
    }

    async fn find_first(&self, args: &FindArgs) -> Result<Option<E>, DomainError> {
        self.record("find_first")?;
        self.inner.find_first(args).await
    }

    async fn find_first_or_throw(&self, args: &FindArgs) -> Result<E, DomainError> {
        self.record("find_first_or_throw")?;
        self.inner.find_first_or_throw(args).await
    }

    async fn find_many(&self, args: &FindArgs) -> Result<Vec<E>, DomainError> {
        self.record("find_many")?;
        self.inner.find_many(args).await
    }

    async fn find_unique(&self, args: &FindArgs) -> Result<Option<E>, DomainError> {
        self.record("find_unique")?;
        self.inner.find_unique(args).await
    }

    async fn find_unique_or_throw(&self, args: &FindArgs) -> Result<E, DomainError> {
        self.record("find_unique_or_throw")?;
        self.inner.find_unique_or_throw(args).await
    }

    async fn group_by(&self, args: &GroupByArgs) -> Result<Vec<Value>, DomainError> {
        self.record("group_by")?;
        self.inner.group_by(args).await
    }

    async fn update(&self, args: &UpdateArgs) -> Result<E, DomainError> {
        self.record("update")?;
        self.inner.update(args).await
    }

    async fn update_many(&self, args: &UpdateArgs) -> Result<BatchPayload, DomainError> {
        self.record("update_many")?;
        self.inner.update_many(args).await
    }

    async fn upsert(&self, args: &UpsertArgs<E>) -> Result<E, DomainError> {
        self.record("upsert")?;
        self.inner.upsert(args).await
    }

    async fn aggregate(&self, args: &AggregateArgs) -> Result<AggregateResult, DomainError> {
        self.record("aggregate")?;
        self.inner.aggregate(args).await
    }

    async fn count(&self, args: &FindArgs) -> Result<u64, DomainError> {
        self.record("count")?;
        self.inner.count(args).await
    }
}
