//! Cache-aside access to one model

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::{BoxFuture, FutureExt};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::domain::cache::{BucketKind, EntityKeys, TimingStats};
use crate::domain::model::{
    id_filter, AggregateArgs, AggregateResult, BatchPayload, CreateManyArgs, FindArgs, Filter,
    GroupByArgs, ModelEntity, ModelStore, UpdateArgs, UpsertArgs,
};
use crate::domain::DomainError;
use crate::infrastructure::cache::{CacheFacade, Invalidation};
use crate::infrastructure::latency::LatencyTracker;
use crate::infrastructure::metrics;

/// Operations of a [`CachedModel`], each with its own latency tracker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Operation {
    FindById,
    FindFirst,
    FindFirstOrThrow,
    FindUnique,
    FindUniqueOrThrow,
    FindMany,
    Create,
    CreateMany,
    CreateManyAndReturn,
    Update,
    UpdateById,
    UpdateMany,
    UpdateManyAndReturn,
    Upsert,
    Delete,
    DeleteMany,
    DeleteManyAndReturn,
    Aggregate,
    Count,
    GroupBy,
}

impl Operation {
    /// Every operation, in declaration order
    pub const ALL: [Operation; 20] = [
        Operation::FindById,
        Operation::FindFirst,
        Operation::FindFirstOrThrow,
        Operation::FindUnique,
        Operation::FindUniqueOrThrow,
        Operation::FindMany,
        Operation::Create,
        Operation::CreateMany,
        Operation::CreateManyAndReturn,
        Operation::Update,
        Operation::UpdateById,
        Operation::UpdateMany,
        Operation::UpdateManyAndReturn,
        Operation::Upsert,
        Operation::Delete,
        Operation::DeleteMany,
        Operation::DeleteManyAndReturn,
        Operation::Aggregate,
        Operation::Count,
        Operation::GroupBy,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::FindById => "find_by_id",
            Operation::FindFirst => "find_first",
            Operation::FindFirstOrThrow => "find_first_or_throw",
            Operation::FindUnique => "find_unique",
            Operation::FindUniqueOrThrow => "find_unique_or_throw",
            Operation::FindMany => "find_many",
            Operation::Create => "create",
            Operation::CreateMany => "create_many",
            Operation::CreateManyAndReturn => "create_many_and_return",
            Operation::Update => "update",
            Operation::UpdateById => "update_by_id",
            Operation::UpdateMany => "update_many",
            Operation::UpdateManyAndReturn => "update_many_and_return",
            Operation::Upsert => "upsert",
            Operation::Delete => "delete",
            Operation::DeleteMany => "delete_many",
            Operation::DeleteManyAndReturn => "delete_many_and_return",
            Operation::Aggregate => "aggregate",
            Operation::Count => "count",
            Operation::GroupBy => "group_by",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Operation::ALL
            .iter()
            .copied()
            .find(|operation| operation.as_str() == s)
            .ok_or_else(|| DomainError::validation(format!("Unknown operation: {}", s)))
    }
}

/// Async hook run around every operation
pub type OperationHook = Arc<dyn Fn(Operation) -> BoxFuture<'static, ()> + Send + Sync>;

/// Cache-aside wrapper around one model store
///
/// Reads populate the shared cache and writes keep it correct:
/// - identity entries (`<prefix>:<id>`) are overwritten or removed per record
/// - bucket entries (`<prefix>:{first,many,unique}:<hash>`) are dropped
///   wholesale on any mutation, since a write may change any filter's result
/// - batch writes that cannot name their rows clear the whole entity
///
/// Single-record updates read the record first without the cache, so a
/// missing record fails with the store's own not-found error.
pub struct CachedModel<E>
where
    E: ModelEntity,
{
    store: Arc<dyn ModelStore<E>>,
    cache: Arc<CacheFacade>,
    keys: EntityKeys,
    use_cache: bool,
    ttl: Option<Duration>,
    before_each: Option<OperationHook>,
    after_each: Option<OperationHook>,
    trackers: Vec<LatencyTracker>,
}

impl<E> fmt::Debug for CachedModel<E>
where
    E: ModelEntity,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachedModel")
            .field("model", &E::MODEL)
            .field("store", &self.store)
            .field("cache", &self.cache.name())
            .field("prefix", &self.keys.prefix())
            .field("use_cache", &self.use_cache)
            .field("ttl", &self.ttl)
            .finish()
    }
}

impl<E> CachedModel<E>
where
    E: ModelEntity,
{
    /// Wraps a store, caching under the model's own prefix
    pub fn new(store: Arc<dyn ModelStore<E>>, cache: Arc<CacheFacade>) -> Self {
        let trackers = Operation::ALL
            .iter()
            .map(|operation| LatencyTracker::new(format!("{}.{}", E::MODEL, operation)))
            .collect();

        Self {
            store,
            cache,
            keys: EntityKeys::new(E::MODEL),
            use_cache: true,
            ttl: None,
            before_each: None,
            after_each: None,
            trackers,
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.keys = EntityKeys::new(prefix);
        self
    }

    /// With `false`, every read goes to the store and the cache is never touched
    pub fn with_use_cache(mut self, use_cache: bool) -> Self {
        self.use_cache = use_cache;
        self
    }

    /// Lifetime of this model's entries; the facade default applies otherwise
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn with_before_each<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(Operation) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.before_each = Some(Arc::new(move |operation| hook(operation).boxed()));
        self
    }

    /// Runs after every operation that succeeded
    pub fn with_after_each<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(Operation) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.after_each = Some(Arc::new(move |operation| hook(operation).boxed()));
        self
    }

    pub fn store(&self) -> &Arc<dyn ModelStore<E>> {
        &self.store
    }

    pub fn cache(&self) -> &Arc<CacheFacade> {
        &self.cache
    }

    pub fn keys(&self) -> &EntityKeys {
        &self.keys
    }

    pub fn uses_cache(&self) -> bool {
        self.use_cache
    }

    /// Field names of the model; never cached
    pub fn fields(&self) -> &'static [&'static str] {
        E::FIELDS
    }

    pub fn latency(&self, operation: Operation) -> TimingStats {
        self.tracker(operation).stats()
    }

    pub fn latency_by_name(&self, operation: &str) -> Result<TimingStats, DomainError> {
        Ok(self.latency(operation.parse()?))
    }

    /// Statistics of every operation that ran at least once
    pub fn latency_report(&self) -> BTreeMap<&'static str, TimingStats> {
        Operation::ALL
            .iter()
            .map(|operation| (operation.as_str(), self.latency(*operation)))
            .filter(|(_, stats)| stats.runs > 0)
            .collect()
    }

    /// Drops every entry of this model
    pub async fn invalidate(&self) -> Result<Invalidation, DomainError> {
        if !self.use_cache {
            return Ok(Invalidation::default());
        }

        let invalidation = self.cache.clear_by_prefix(&self.keys.entity_prefix()).await?;
        debug!(model = E::MODEL, removed = invalidation.removed, "Invalidated model cache");

        Ok(invalidation)
    }

    /// Drops every bucket entry of this model, keeping identity entries
    pub async fn invalidate_buckets(&self) -> Result<Invalidation, DomainError> {
        if !self.use_cache {
            return Ok(Invalidation::default());
        }

        let keys = &self.keys;
        let invalidation = self
            .cache
            .clear_matching(|key| keys.is_bucket_key(key))
            .await?;
        debug!(model = E::MODEL, removed = invalidation.removed, "Invalidated buckets");

        Ok(invalidation)
    }

    pub async fn find_by_id(&self, id: &str) -> Result<Option<E>, DomainError> {
        self.run(Operation::FindById, async {
            let key = self.keys.by_id(id);
            self.nullable(&key, self.store.find_unique(&FindArgs::by_id(id)))
                .await
        })
        .await
    }

    pub async fn find_first(&self, args: &FindArgs) -> Result<Option<E>, DomainError> {
        self.run(Operation::FindFirst, async {
            let key = self.keys.bucket(BucketKind::First, args)?;
            self.nullable(&key, self.store.find_first(args)).await
        })
        .await
    }

    pub async fn find_first_or_throw(&self, args: &FindArgs) -> Result<E, DomainError> {
        self.run(Operation::FindFirstOrThrow, async {
            let key = self.keys.bucket(BucketKind::First, args)?;
            self.required(&key, self.store.find_first_or_throw(args))
                .await
        })
        .await
    }

    pub async fn find_unique(&self, args: &FindArgs) -> Result<Option<E>, DomainError> {
        self.run(Operation::FindUnique, async {
            let key = self.keys.bucket(BucketKind::Unique, args)?;
            self.nullable(&key, self.store.find_unique(args)).await
        })
        .await
    }

    pub async fn find_unique_or_throw(&self, args: &FindArgs) -> Result<E, DomainError> {
        self.run(Operation::FindUniqueOrThrow, async {
            let key = self.keys.bucket(BucketKind::Unique, args)?;
            self.required(&key, self.store.find_unique_or_throw(args))
                .await
        })
        .await
    }

    /// Also caches every returned record under its identity key
    pub async fn find_many(&self, args: &FindArgs) -> Result<Vec<E>, DomainError> {
        self.run(Operation::FindMany, async {
            if !self.use_cache {
                return self.store.find_many(args).await;
            }

            let key = self.keys.bucket(BucketKind::Many, args)?;

            if let Some(Some(records)) = self.cache.get::<Option<Vec<E>>>(&key).await? {
                return Ok(records);
            }

            let records = self.store.find_many(args).await?;
            self.cache.set(&key, &records, self.ttl).await?;
            self.remember_all(&records).await?;

            Ok(records)
        })
        .await
    }

    pub async fn create(&self, data: E) -> Result<E, DomainError> {
        self.run(Operation::Create, async {
            let created = self.store.create(data).await?;

            self.remember(&created).await?;
            self.invalidate_buckets().await?;
            Ok(created)
        })
        .await
    }

    pub async fn create_many(&self, args: CreateManyArgs<E>) -> Result<BatchPayload, DomainError> {
        self.run(Operation::CreateMany, async {
            let payload = self.store.create_many(args).await?;

            self.invalidate_buckets().await?;
            Ok(payload)
        })
        .await
    }

    pub async fn create_many_and_return(
        &self,
        args: CreateManyArgs<E>,
    ) -> Result<Vec<E>, DomainError> {
        self.run(Operation::CreateManyAndReturn, async {
            let created = self.store.create_many_and_return(args).await?;

            self.remember_all(&created).await?;
            self.invalidate_buckets().await?;
            Ok(created)
        })
        .await
    }

    pub async fn update(&self, args: &UpdateArgs) -> Result<E, DomainError> {
        self.run(Operation::Update, self.apply_update(args)).await
    }

    pub async fn update_by_id(
        &self,
        id: &str,
        data: Map<String, Value>,
    ) -> Result<E, DomainError> {
        let args = UpdateArgs {
            filter: id_filter(id),
            data,
        };

        self.run(Operation::UpdateById, self.apply_update(&args))
            .await
    }

    /// Clears the whole model, since the touched rows are unknown
    pub async fn update_many(&self, args: &UpdateArgs) -> Result<BatchPayload, DomainError> {
        self.run(Operation::UpdateMany, async {
            let payload = self.store.update_many(args).await?;

            self.invalidate().await?;
            Ok(payload)
        })
        .await
    }

    /// Updates the matching rows and returns them as stored afterwards
    pub async fn update_many_and_return(&self, args: &UpdateArgs) -> Result<Vec<E>, DomainError> {
        self.run(Operation::UpdateManyAndReturn, async {
            let affected = self.store.find_many(&args.find_args()).await?;
            self.store.update_many(args).await?;

            let mut updated = Vec::with_capacity(affected.len());

            for record in &affected {
                if let Some(row) = self.store.find_unique(&FindArgs::by_id(record.id())).await? {
                    updated.push(row);
                }
            }

            self.remember_all(&updated).await?;
            self.invalidate_buckets().await?;
            Ok(updated)
        })
        .await
    }

    /// With an empty update clause, returns the match untouched or creates it
    pub async fn upsert(&self, args: &UpsertArgs<E>) -> Result<E, DomainError> {
        self.run(Operation::Upsert, async {
            let record = if args.update.is_empty() {
                let find = args.find_args();
                let key = self.keys.bucket(BucketKind::First, &find)?;

                if let Some(existing) = self.nullable(&key, self.store.find_first(&find)).await? {
                    return Ok(existing);
                }

                self.store.create(args.create.clone()).await?
            } else {
                self.store.upsert(args).await?
            };

            self.remember(&record).await?;
            self.invalidate_buckets().await?;
            Ok(record)
        })
        .await
    }

    pub async fn delete(&self, args: &FindArgs) -> Result<E, DomainError> {
        self.run(Operation::Delete, async {
            let deleted = self.store.delete(args).await?;

            self.forget(deleted.id()).await?;
            self.invalidate_buckets().await?;
            Ok(deleted)
        })
        .await
    }

    /// Clears the whole model, since the removed rows are unknown
    pub async fn delete_many(&self, filter: &Filter) -> Result<BatchPayload, DomainError> {
        self.run(Operation::DeleteMany, async {
            let payload = self.store.delete_many(filter).await?;

            self.invalidate().await?;
            Ok(payload)
        })
        .await
    }

    /// Deletes the matching rows and returns them as they were
    pub async fn delete_many_and_return(&self, filter: &Filter) -> Result<Vec<E>, DomainError> {
        self.run(Operation::DeleteManyAndReturn, async {
            let doomed = self
                .store
                .find_many(&FindArgs::with_filter(filter.clone()))
                .await?;
            self.store.delete_many(filter).await?;

            for record in &doomed {
                self.forget(record.id()).await?;
            }

            self.invalidate_buckets().await?;
            Ok(doomed)
        })
        .await
    }

    pub async fn aggregate(&self, args: &AggregateArgs) -> Result<AggregateResult, DomainError> {
        self.run(Operation::Aggregate, self.store.aggregate(args))
            .await
    }

    pub async fn count(&self, args: &FindArgs) -> Result<u64, DomainError> {
        self.run(Operation::Count, self.store.count(args)).await
    }

    pub async fn group_by(&self, args: &GroupByArgs) -> Result<Vec<Value>, DomainError> {
        self.run(Operation::GroupBy, self.store.group_by(args))
            .await
    }

    async fn run<T, Fut>(&self, operation: Operation, call: Fut) -> Result<T, DomainError>
    where
        Fut: Future<Output = Result<T, DomainError>>,
    {
        if let Some(hook) = &self.before_each {
            hook(operation).await;
        }

        let started = Instant::now();
        let result = self
            .tracker(operation)
            .measure(operation.as_str(), call)
            .await;
        metrics::record_operation(E::MODEL, operation.as_str(), started.elapsed(), result.is_ok());

        if result.is_ok() {
            if let Some(hook) = &self.after_each {
                hook(operation).await;
            }
        }

        result
    }

    fn tracker(&self, operation: Operation) -> &LatencyTracker {
        &self.trackers[operation as usize]
    }

    async fn apply_update(&self, args: &UpdateArgs) -> Result<E, DomainError> {
        let existing = self.store.find_first_or_throw(&args.find_args()).await?;
        let updated = self.store.update(args).await?;

        if existing.id() != updated.id() {
            self.forget(existing.id()).await?;
        }

        self.remember(&updated).await?;
        self.invalidate_buckets().await?;
        Ok(updated)
    }

    /// Caches `null` results too, so a repeated miss stays off the store
    async fn nullable<Fut>(&self, key: &str, fetch: Fut) -> Result<Option<E>, DomainError>
    where
        Fut: Future<Output = Result<Option<E>, DomainError>>,
    {
        if !self.use_cache {
            return fetch.await;
        }

        if let Some(cached) = self.cache.get::<Option<E>>(key).await? {
            return Ok(cached);
        }

        let value = fetch.await?;
        self.cache.set(key, &value, self.ttl).await?;
        Ok(value)
    }

    /// Never stores `null`; a cached `null` left by a nullable read is a miss
    async fn required<T, Fut>(&self, key: &str, fetch: Fut) -> Result<T, DomainError>
    where
        T: Serialize + DeserializeOwned,
        Fut: Future<Output = Result<T, DomainError>>,
    {
        if !self.use_cache {
            return fetch.await;
        }

        if let Some(Some(cached)) = self.cache.get::<Option<T>>(key).await? {
            return Ok(cached);
        }

        let value = fetch.await?;
        self.cache.set(key, &value, self.ttl).await?;
        Ok(value)
    }

    async fn remember(&self, record: &E) -> Result<(), DomainError> {
        if self.use_cache {
            self.cache
                .set(&self.keys.by_id(record.id()), record, self.ttl)
                .await?;
        }
        Ok(())
    }

    async fn remember_all(&self, records: &[E]) -> Result<(), DomainError> {
        for record in records {
            self.remember(record).await?;
        }
        Ok(())
    }

    async fn forget(&self, id: &str) -> Result<(), DomainError> {
        if self.use_cache {
            self.cache.del(&self.keys.by_id(id)).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::cache::{CacheConfig, CacheFactory};
    use crate::infrastructure::model::mock::MockModelStore;
    use serde::Deserialize;
    use serde_json::json;
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Group {
        id: String,
        name: String,
        #[serde(default)]
        members: u32,
    }

    impl ModelEntity for Group {
        const MODEL: &'static str = "Group";
        const FIELDS: &'static [&'static str] = &["id", "name", "members"];

        fn id(&self) -> &str {
            &self.id
        }
    }

    fn group(id: &str, name: &str) -> Group {
        Group {
            id: id.to_string(),
            name: name.to_string(),
            members: 0,
        }
    }

    fn filter(value: Value) -> Filter {
        value.as_object().unwrap().clone()
    }

    fn setup(records: Vec<Group>) -> (Arc<MockModelStore<Group>>, CachedModel<Group>) {
        let store = Arc::new(MockModelStore::with_records(records));
        let cache = CacheFactory::new().create(&CacheConfig::default()).unwrap();
        let model = CachedModel::new(store.clone(), cache);
        (store, model)
    }

    #[tokio::test]
    async fn test_worked_scenario() {
        let (store, groups) = setup(vec![]);
        let cache = groups.cache().clone();

        groups.create(group("g1", "Gardening")).await.unwrap();
        assert_eq!(cache.keys_by_prefix("Group:"), vec!["Group:g1".to_string()]);

        let all = FindArgs::new();
        let many_key = groups.keys().bucket(BucketKind::Many, &all).unwrap();

        let listed = groups.find_many(&all).await.unwrap();
        assert_eq!(listed, vec![group("g1", "Gardening")]);
        assert!(cache.keys_by_prefix("Group:many:").contains(&many_key));
        let cached: Option<Vec<Group>> = cache.get(&many_key).await.unwrap();
        assert_eq!(cached, Some(vec![group("g1", "Gardening")]));

        groups
            .update(&UpdateArgs::by_id("g1").set("name", "Gardening Club"))
            .await
            .unwrap();

        let by_id: Option<Group> = cache.get("Group:g1").await.unwrap();
        assert_eq!(by_id.map(|g| g.name), Some("Gardening Club".to_string()));
        assert!(cache.keys_by_prefix("Group:many:").is_empty());

        let relisted = groups.find_many(&all).await.unwrap();
        assert_eq!(relisted[0].name, "Gardening Club");
        assert_eq!(store.calls("find_many"), 2);
    }

    #[tokio::test]
    async fn test_repeated_reads_are_served_from_cache() {
        let (store, groups) = setup(vec![group("g1", "Chess"), group("g2", "Go")]);
        let all = FindArgs::new();

        groups.find_many(&all).await.unwrap();
        groups.find_many(&all).await.unwrap();
        assert_eq!(store.calls("find_many"), 1);

        groups.find_by_id("g2").await.unwrap();
        assert_eq!(store.calls("find_unique"), 0);

        let first = FindArgs::new().filter("name", "Chess");
        groups.find_first(&first).await.unwrap();
        groups.find_first(&first).await.unwrap();
        assert_eq!(store.calls("find_first"), 1);
    }

    #[tokio::test]
    async fn test_every_mutation_invalidates_buckets() {
        let (store, groups) = setup(vec![group("g1", "Chess")]);
        let all = FindArgs::new();

        groups.find_many(&all).await.unwrap();
        groups.create(group("g2", "Go")).await.unwrap();
        assert_eq!(groups.find_many(&all).await.unwrap().len(), 2);

        groups.delete(&FindArgs::by_id("g1")).await.unwrap();
        assert_eq!(groups.find_many(&all).await.unwrap().len(), 1);

        groups
            .create_many(CreateManyArgs::new(vec![group("g3", "Bridge")]))
            .await
            .unwrap();
        assert_eq!(groups.find_many(&all).await.unwrap().len(), 2);

        groups
            .update_by_id("g2", filter(json!({"members": 4})))
            .await
            .unwrap();
        assert_eq!(groups.find_many(&all).await.unwrap()[0].members, 4);

        assert_eq!(store.calls("find_many"), 5);
    }

    #[tokio::test]
    async fn test_update_leaves_other_ids_alone() {
        let (store, groups) = setup(vec![group("a", "Alpha"), group("b", "Beta")]);

        groups.find_by_id("a").await.unwrap();
        groups.find_by_id("b").await.unwrap();
        assert_eq!(store.calls("find_unique"), 2);
        store.reset_calls();

        groups
            .update(&UpdateArgs::by_id("a").set("name", "Alpha Prime"))
            .await
            .unwrap();

        let other: Option<Group> = groups.cache().get("Group:b").await.unwrap();
        assert_eq!(other, Some(group("b", "Beta")));

        assert_eq!(groups.find_by_id("b").await.unwrap(), Some(group("b", "Beta")));
        assert_eq!(
            groups.find_by_id("a").await.unwrap().map(|g| g.name),
            Some("Alpha Prime".to_string())
        );
        assert_eq!(store.calls("find_unique"), 0);
        assert_eq!(store.total_calls(), 2);
    }

    #[tokio::test]
    async fn test_nullable_lookup_caches_null() {
        let (store, groups) = setup(vec![]);
        let args = FindArgs::by_id("ghost");

        assert_eq!(groups.find_unique(&args).await.unwrap(), None);
        assert_eq!(groups.find_unique(&args).await.unwrap(), None);
        assert_eq!(store.calls("find_unique"), 1);

        assert_eq!(groups.find_by_id("ghost").await.unwrap(), None);
        assert_eq!(groups.find_by_id("ghost").await.unwrap(), None);
        assert_eq!(store.calls("find_unique"), 2);
    }

    #[tokio::test]
    async fn test_throwing_lookup_never_caches() {
        let (store, groups) = setup(vec![]);
        let args = FindArgs::by_id("ghost");
        let key = groups.keys().bucket(BucketKind::Unique, &args).unwrap();

        for _ in 0..2 {
            let err = groups.find_unique_or_throw(&args).await.unwrap_err();
            assert!(err.is_not_found());
        }
        assert_eq!(store.calls("find_unique_or_throw"), 2);
        assert!(!groups.cache().keys_by_prefix("Group:").contains(&key));

        groups.find_unique(&args).await.unwrap();
        assert!(groups.find_unique_or_throw(&args).await.is_err());
        assert_eq!(store.calls("find_unique_or_throw"), 3);
    }

    #[tokio::test]
    async fn test_throwing_lookup_caches_found_record() {
        let (store, groups) = setup(vec![group("g1", "Chess")]);
        let args = FindArgs::new().filter("name", "Chess");

        for _ in 0..2 {
            assert_eq!(groups.find_first_or_throw(&args).await.unwrap().id, "g1");
        }
        assert_eq!(store.calls("find_first_or_throw"), 1);
    }

    #[tokio::test]
    async fn test_update_of_missing_record_fails_with_store_error() {
        let (store, groups) = setup(vec![]);

        let err = groups
            .update(&UpdateArgs::by_id("missing").set("name", "x"))
            .await
            .unwrap_err();

        assert!(err.is_not_found());
        assert_eq!(store.calls("update"), 0);
        assert!(groups.cache().keys_by_prefix("Group:").is_empty());
    }

    #[tokio::test]
    async fn test_update_many_clears_only_this_model() {
        let (_, groups) = setup(vec![group("g1", "Chess"), group("g2", "Go")]);
        let cache = groups.cache().clone();
        cache.set("GroupMember:m1", &json!({"id": "m1"}), None).await.unwrap();

        groups.find_by_id("g1").await.unwrap();
        groups.find_many(&FindArgs::new()).await.unwrap();

        let payload = groups
            .update_many(&UpdateArgs::new(Filter::new()).set("members", 1))
            .await
            .unwrap();
        assert_eq!(payload.count, 2);

        assert!(cache.keys_by_prefix("Group:").is_empty());
        assert_eq!(cache.keys_by_prefix("GroupMember:"), vec!["GroupMember:m1".to_string()]);
    }

    #[tokio::test]
    async fn test_batch_returns_refresh_identity_entries() {
        let (_, groups) = setup(vec![group("g1", "Chess"), group("g2", "Go"), group("g3", "Bridge")]);
        let cache = groups.cache().clone();

        let created = groups
            .create_many_and_return(CreateManyArgs::new(vec![group("g4", "Poker")]))
            .await
            .unwrap();
        assert_eq!(created.len(), 1);
        assert!(cache.keys_by_prefix("Group:").contains(&"Group:g4".to_string()));

        let updated = groups
            .update_many_and_return(&UpdateArgs::new(filter(json!({"name": "Go"}))).set("members", 9))
            .await
            .unwrap();
        assert_eq!(updated, vec![Group { members: 9, ..group("g2", "Go") }]);
        let cached: Option<Group> = cache.get("Group:g2").await.unwrap();
        assert_eq!(cached.map(|g| g.members), Some(9));

        groups.find_by_id("g3").await.unwrap();
        let deleted = groups
            .delete_many_and_return(&filter(json!({"name": "Bridge"})))
            .await
            .unwrap();
        assert_eq!(deleted.len(), 1);
        assert!(!cache.keys_by_prefix("Group:").contains(&"Group:g3".to_string()));
        assert_eq!(groups.count(&FindArgs::new()).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_upsert_without_update_is_find_or_create() {
        let (store, groups) = setup(vec![group("g1", "Chess")]);

        let existing = groups
            .upsert(&UpsertArgs::new(id_filter("g1"), group("g1", "Other")))
            .await
            .unwrap();
        assert_eq!(existing.name, "Chess");
        assert_eq!(store.calls("create"), 0);
        assert_eq!(store.calls("upsert"), 0);

        let created = groups
            .upsert(&UpsertArgs::new(id_filter("g2"), group("g2", "Go")))
            .await
            .unwrap();
        assert_eq!(created.name, "Go");
        assert_eq!(store.calls("create"), 1);
        assert!(groups.cache().keys_by_prefix("Group:").contains(&"Group:g2".to_string()));

        let updated = groups
            .upsert(&UpsertArgs::new(id_filter("g1"), group("g1", "x")).set("name", "Chess Club"))
            .await
            .unwrap();
        assert_eq!(updated.name, "Chess Club");
        assert_eq!(store.calls("upsert"), 1);
    }

    #[tokio::test]
    async fn test_disabled_cache_always_hits_store() {
        let store = Arc::new(MockModelStore::with_records(vec![group("g1", "Chess")]));
        let cache = CacheFactory::new().create_in_memory();
        let groups = CachedModel::new(store.clone(), cache.clone()).with_use_cache(false);

        groups.find_by_id("g1").await.unwrap();
        groups.find_by_id("g1").await.unwrap();
        groups.create(group("g2", "Go")).await.unwrap();

        assert_eq!(store.calls("find_unique"), 2);
        assert!(cache.keys_by_prefix("").is_empty());
        assert_eq!(cache.stats().hits + cache.stats().misses, 0);
    }

    #[tokio::test]
    async fn test_aggregates_are_never_cached() {
        let (store, groups) = setup(vec![group("g1", "Chess")]);

        groups.count(&FindArgs::new()).await.unwrap();
        groups.count(&FindArgs::new()).await.unwrap();
        groups.aggregate(&AggregateArgs::default()).await.unwrap();
        groups
            .group_by(&GroupByArgs {
                by: vec!["name".to_string()],
                ..Default::default()
            })
            .await
            .unwrap();

        assert_eq!(store.calls("count"), 2);
        assert_eq!(store.calls("aggregate"), 1);
        assert_eq!(store.calls("group_by"), 1);
        assert_eq!(store.total_calls(), 4);
        assert!(groups.cache().keys_by_prefix("").is_empty());
        assert_eq!(groups.fields(), &["id", "name", "members"]);
    }

    #[tokio::test]
    async fn test_hooks_wrap_operations() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let before = seen.clone();
        let after = seen.clone();

        let (_, groups) = setup(vec![]);
        let groups = groups
            .with_before_each(move |operation| {
                before.lock().unwrap().push(format!("before {operation}"));
                async {}
            })
            .with_after_each(move |operation| {
                after.lock().unwrap().push(format!("after {operation}"));
                async {}
            });

        groups.find_by_id("g1").await.unwrap();
        groups.delete(&FindArgs::by_id("g1")).await.unwrap_err();

        assert_eq!(
            *seen.lock().unwrap(),
            vec!["before find_by_id", "after find_by_id", "before delete"]
        );
    }

    #[tokio::test]
    async fn test_store_failure_propagates_unchanged() {
        let (store, groups) = setup(vec![]);
        store.set_error(Some(DomainError::storage("connection refused")));

        let err = groups.find_by_id("g1").await.unwrap_err();
        assert!(matches!(err, DomainError::Storage { .. }));
        assert!(groups.cache().keys_by_prefix("").is_empty());
        assert_eq!(groups.latency(Operation::FindById).runs, 1);
    }

    #[tokio::test]
    async fn test_latency_per_operation() {
        let (_, groups) = setup(vec![group("g1", "Chess")]);

        groups.find_by_id("g1").await.unwrap();
        groups.find_by_id("g1").await.unwrap();
        groups.count(&FindArgs::new()).await.unwrap();

        assert_eq!(groups.latency(Operation::FindById).runs, 2);
        assert_eq!(groups.latency_by_name("count").unwrap().runs, 1);
        assert!(groups.latency_by_name("teleport").is_err());

        let report = groups.latency_report();
        assert_eq!(report.keys().copied().collect::<Vec<_>>(), vec!["count", "find_by_id"]);
    }

    #[test]
    fn test_operation_names_round_trip() {
        for operation in Operation::ALL {
            assert_eq!(operation.as_str().parse::<Operation>().unwrap(), operation);
        }
    }

    #[tokio::test]
    async fn test_model_ttl_overrides_default() {
        let (_, groups) = setup(vec![group("g1", "Chess")]);
        let groups = groups.with_ttl(Duration::from_secs(30));

        groups.find_by_id("g1").await.unwrap();

        let remaining = groups.cache().ttl("Group:g1").await.unwrap().unwrap();
        assert!(remaining <= Duration::from_secs(30));
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Usage {
        id: String,
        total: u64,
    }

    impl ModelEntity for Usage {
        const MODEL: &'static str = "Usage";
        const FIELDS: &'static [&'static str] = &["id", "total"];

        fn id(&self) -> &str {
            &self.id
        }
    }

    #[tokio::test]
    async fn test_large_integer_fields_read_back_from_cache() {
        let store = Arc::new(MockModelStore::<Usage>::new());
        let cache = CacheFactory::new().create_in_memory();
        let usage = CachedModel::new(store.clone(), cache);

        let created = usage
            .create(Usage {
                id: "u1".to_string(),
                total: 1 << 60,
            })
            .await
            .unwrap();

        let found = usage.find_by_id("u1").await.unwrap();
        assert_eq!(found, Some(created));
        assert_eq!(found.map(|u| u.total), Some(1 << 60));
        assert_eq!(store.calls("find_unique"), 0);
    }
}
