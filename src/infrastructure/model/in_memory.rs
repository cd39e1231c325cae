//! In-memory model store implementation

use std::marker::PhantomData;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use serde_json::Value;

use crate::domain::model::evaluate;
use crate::domain::model::{
    AggregateArgs, AggregateResult, BatchPayload, CreateManyArgs, FindArgs, Filter, GroupByArgs,
    ModelEntity, ModelStore, UpdateArgs, UpsertArgs,
};
use crate::domain::DomainError;

/// Thread-safe in-memory model store
///
/// Records are kept serialized, in insertion order, and queried through
/// [`evaluate`]. Useful for testing and development. Data is lost when the
/// process terminates.
#[derive(Debug)]
pub struct InMemoryModelStore<E>
where
    E: ModelEntity,
{
    records: RwLock<Vec<Value>>,
    _entity: PhantomData<fn() -> E>,
}

impl<E> Default for InMemoryModelStore<E>
where
    E: ModelEntity,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<E> InMemoryModelStore<E>
where
    E: ModelEntity,
{
    /// Creates a new empty store
    pub fn new() -> Self {
        Self {
            records: RwLock::new(Vec::new()),
            _entity: PhantomData,
        }
    }

    /// Creates a store pre-populated with records
    pub fn with_records(records: Vec<E>) -> Result<Self, DomainError> {
        let store = Self::new();
        {
            let mut stored = store.write()?;

            for record in records {
                stored.push(encode(&record)?);
            }
        }
        Ok(store)
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Vec<Value>>, DomainError> {
        self.records
            .read()
            .map_err(|e| DomainError::storage(format!("Failed to acquire read lock: {}", e)))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Vec<Value>>, DomainError> {
        self.records
            .write()
            .map_err(|e| DomainError::storage(format!("Failed to acquire write lock: {}", e)))
    }

    fn not_found(filter: &Filter) -> DomainError {
        DomainError::not_found(format!(
            "No {} record matches {}",
            E::MODEL,
            Value::Object(filter.clone())
        ))
    }

    fn insert(records: &mut Vec<Value>, record: &E) -> Result<Value, DomainError> {
        if records.iter().any(|stored| record_id(stored) == Some(record.id())) {
            return Err(DomainError::conflict(format!(
                "{} with id '{}' already exists",
                E::MODEL,
                record.id()
            )));
        }

        let value = encode(record)?;
        records.push(value.clone());
        Ok(value)
    }

    fn insert_many(&self, args: CreateManyArgs<E>) -> Result<Vec<E>, DomainError> {
        let mut records = self.write()?;
        let mut staged = records.clone();
        let mut created = Vec::with_capacity(args.data.len());

        for record in args.data {
            let exists = staged
                .iter()
                .any(|stored| record_id(stored) == Some(record.id()));

            if exists && args.skip_duplicates {
                continue;
            }

            Self::insert(&mut staged, &record)?;
            created.push(record);
        }

        *records = staged;
        Ok(created)
    }
}

fn record_id(record: &Value) -> Option<&str> {
    record.get("id").and_then(Value::as_str)
}

fn encode<E: ModelEntity>(record: &E) -> Result<Value, DomainError> {
    serde_json::to_value(record).map_err(|e| {
        DomainError::serialization(format!("Failed to serialize {}: {}", E::MODEL, e))
    })
}

fn decode<E: ModelEntity>(record: Value) -> Result<E, DomainError> {
    serde_json::from_value(record).map_err(|e| {
        DomainError::serialization(format!("Failed to deserialize {}: {}", E::MODEL, e))
    })
}

#[async_trait]
impl<E> ModelStore<E> for InMemoryModelStore<E>
where
    E: ModelEntity,
{
    async fn create(&self, data: E) -> Result<E, DomainError> {
        let mut records = self.write()?;
        Self::insert(&mut records, &data)?;
        Ok(data)
    }

    async fn create_many(&self, args: CreateManyArgs<E>) -> Result<BatchPayload, DomainError> {
        let created = self.insert_many(args)?;

        Ok(BatchPayload {
            count: created.len() as u64,
        })
    }

    async fn create_many_and_return(
        &self,
        args: CreateManyArgs<E>,
    ) -> Result<Vec<E>, DomainError> {
        self.insert_many(args)
    }

    async fn delete(&self, args: &FindArgs) -> Result<E, DomainError> {
        let mut records = self.write()?;
        let position = records
            .iter()
            .position(|record| evaluate::matches(&args.filter, record))
            .ok_or_else(|| Self::not_found(&args.filter))?;

        decode(records.remove(position))
    }

    async fn delete_many(&self, filter: &Filter) -> Result<BatchPayload, DomainError> {
        let mut records = self.write()?;
        let before = records.len();

        records.retain(|record| !evaluate::matches(filter, record));

        Ok(BatchPayload {
            count: (before - records.len()) as u64,
        })
    }

    async fn find_first(&self, args: &FindArgs) -> Result<Option<E>, DomainError> {
        let records = self.read()?;
        let args = args.clone().take(1);

        evaluate::select(records.iter(), &args)
            .into_iter()
            .next()
            .map(decode)
            .transpose()
    }

    async fn find_many(&self, args: &FindArgs) -> Result<Vec<E>, DomainError> {
        let records = self.read()?;

        evaluate::select(records.iter(), args)
            .into_iter()
            .map(decode)
            .collect()
    }

    async fn find_unique(&self, args: &FindArgs) -> Result<Option<E>, DomainError> {
        if args.filter.is_empty() {
            return Err(DomainError::validation(format!(
                "find_unique on {} requires a unique filter",
                E::MODEL
            )));
        }

        self.find_first(&FindArgs::with_filter(args.filter.clone()))
            .await
    }

    async fn group_by(&self, args: &GroupByArgs) -> Result<Vec<Value>, DomainError> {
        let records = self.read()?;
        Ok(evaluate::group_by(records.iter(), args))
    }

    async fn update(&self, args: &UpdateArgs) -> Result<E, DomainError> {
        let mut records = self.write()?;
        let record = records
            .iter_mut()
            .find(|record| evaluate::matches(&args.filter, record))
            .ok_or_else(|| Self::not_found(&args.filter))?;

        let mut patched = record.clone();
        evaluate::apply_patch(&mut patched, &args.data);
        let updated: E = decode(patched.clone())?;

        *record = patched;
        Ok(updated)
    }

    async fn update_many(&self, args: &UpdateArgs) -> Result<BatchPayload, DomainError> {
        let mut records = self.write()?;
        let mut count = 0;

        for record in records
            .iter_mut()
            .filter(|record| evaluate::matches(&args.filter, record))
        {
            evaluate::apply_patch(record, &args.data);
            count += 1;
        }

        Ok(BatchPayload { count })
    }

    async fn upsert(&self, args: &UpsertArgs<E>) -> Result<E, DomainError> {
        let mut records = self.write()?;

        match records
            .iter_mut()
            .find(|record| evaluate::matches(&args.filter, record))
        {
            Some(record) => {
                let mut patched = record.clone();
                evaluate::apply_patch(&mut patched, &args.update);
                let updated: E = decode(patched.clone())?;

                *record = patched;
                Ok(updated)
            }
            None => {
                Self::insert(&mut records, &args.create)?;
                Ok(args.create.clone())
            }
        }
    }

    async fn aggregate(&self, args: &AggregateArgs) -> Result<AggregateResult, DomainError> {
        let records = self.read()?;
        Ok(evaluate::aggregate(records.iter(), args))
    }

    async fn count(&self, args: &FindArgs) -> Result<u64, DomainError> {
        let records = self.read()?;
        Ok(evaluate::select(records.iter(), args).len() as u64)
    }
}
