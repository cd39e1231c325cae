//! PostgreSQL model store with connection pooling

use std::fmt::Debug;
use std::marker::PhantomData;
use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Postgres, Row, Transaction};

use crate::domain::model::evaluate;
use crate::domain::model::{
    AggregateArgs, AggregateResult, BatchPayload, CreateManyArgs, FindArgs, Filter, GroupByArgs,
    ModelEntity, ModelStore, OrderBy, SortOrder, UpdateArgs, UpsertArgs,
};
use crate::domain::DomainError;

static TABLE_NAME: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-z_][a-z0-9_]{0,62}$").unwrap());

/// PostgreSQL connection configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PostgresConfig {
    /// Database connection URL
    pub url: String,
    /// Maximum number of connections in the pool
    pub max_connections: u32,
    /// Minimum number of connections to maintain
    pub min_connections: u32,
    /// Connection timeout in seconds
    pub connect_timeout_secs: u64,
    /// Idle timeout in seconds
    pub idle_timeout_secs: u64,
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            url: "postgres://localhost/entity_cache".to_string(),
            max_connections: 10,
            min_connections: 1,
            connect_timeout_secs: 30,
            idle_timeout_secs: 600,
        }
    }
}

impl PostgresConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn with_max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    pub fn with_min_connections(mut self, min: u32) -> Self {
        self.min_connections = min;
        self
    }

    /// Opens a connection pool shared by every model store
    pub async fn connect(&self) -> Result<PgPool, DomainError> {
        PgPoolOptions::new()
            .max_connections(self.max_connections)
            .min_connections(self.min_connections)
            .acquire_timeout(Duration::from_secs(self.connect_timeout_secs))
            .idle_timeout(Duration::from_secs(self.idle_timeout_secs))
            .connect(&self.url)
            .await
            .map_err(|e| DomainError::storage(format!("Failed to connect to PostgreSQL: {}", e)))
    }
}

/// Table holding the records of one model
pub fn table_name<E: ModelEntity>() -> String {
    let mut name = String::with_capacity(E::MODEL.len() + 8);

    for (i, c) in E::MODEL.chars().enumerate() {
        if c.is_ascii_uppercase() && i > 0 {
            name.push('_');
        }
        name.push(c.to_ascii_lowercase());
    }

    name.push_str("_records");
    name
}

/// PostgreSQL model store
///
/// Stores records as JSONB in a `(key, data, created_at, updated_at)` table,
/// one table per model. Equality filters translate to `data @> filter`, so
/// they match exactly what the in-memory store matches. Aggregation and
/// grouping run over the matching rows in process.
pub struct PostgresModelStore<E>
where
    E: ModelEntity,
{
    pool: PgPool,
    table: String,
    _entity: PhantomData<fn() -> E>,
}

impl<E> Debug for PostgresModelStore<E>
where
    E: ModelEntity,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresModelStore")
            .field("table", &self.table)
            .finish()
    }
}

impl<E> PostgresModelStore<E>
where
    E: ModelEntity,
{
    /// Creates a store over the pool, using the model's default table
    pub fn new(pool: PgPool) -> Result<Self, DomainError> {
        Self::with_table(pool, table_name::<E>())
    }

    pub fn with_table(pool: PgPool, table: impl Into<String>) -> Result<Self, DomainError> {
        let table = table.into();

        if !TABLE_NAME.is_match(&table) {
            return Err(DomainError::configuration(format!(
                "Invalid table name '{}'",
                table
            )));
        }

        Ok(Self {
            pool,
            table,
            _entity: PhantomData,
        })
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Ensures the model table exists
    pub async fn ensure_table(&self) -> Result<(), DomainError> {
        let query = format!(
            r#"
            CREATE TABLE IF NOT EXISTS {table} (
                key VARCHAR(255) PRIMARY KEY,
                data JSONB NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            );
            CREATE INDEX IF NOT EXISTS {table}_data_idx ON {table} USING GIN (data);
            "#,
            table = self.table
        );

        sqlx::raw_sql(&query)
            .execute(&self.pool)
            .await
            .map_err(|e| DomainError::storage(format!("Failed to create table: {}", e)))?;

        Ok(())
    }

    fn not_found(filter: &Filter) -> DomainError {
        DomainError::not_found(format!(
            "No {} record matches {}",
            E::MODEL,
            Value::Object(filter.clone())
        ))
    }

    async fn begin(&self) -> Result<Transaction<'static, Postgres>, DomainError> {
        self.pool
            .begin()
            .await
            .map_err(|e| DomainError::storage(format!("Failed to begin transaction: {}", e)))
    }

    async fn select(&self, args: &FindArgs) -> Result<Vec<PgRow>, DomainError> {
        let sql = format!(
            "SELECT data FROM {} WHERE data @> $1 ORDER BY {} OFFSET $2 LIMIT $3",
            self.table,
            order_clause(&args.order_by, 4)
        );

        let mut query = sqlx::query(&sql)
            .bind(Value::Object(args.filter.clone()))
            .bind(args.skip.unwrap_or(0) as i64)
            .bind(args.take.map(|take| take as i64));

        for order in &args.order_by {
            query = query.bind(order.field.as_str());
        }

        query
            .fetch_all(&self.pool)
            .await
            .map_err(|e| DomainError::storage(format!("Failed to query {}: {}", E::MODEL, e)))
    }

    async fn matching(&self, filter: &Filter) -> Result<Vec<Value>, DomainError> {
        let rows = self.select(&FindArgs::with_filter(filter.clone())).await?;
        rows.iter().map(row_data).collect()
    }

    async fn insert_many(&self, args: CreateManyArgs<E>) -> Result<Vec<E>, DomainError> {
        let conflict = if args.skip_duplicates {
            "ON CONFLICT (key) DO NOTHING"
        } else {
            ""
        };
        let sql = format!(
            "INSERT INTO {} (key, data) VALUES ($1, $2) {} RETURNING key",
            self.table, conflict
        );

        let mut tx = self.begin().await?;
        let mut created = Vec::with_capacity(args.data.len());

        for record in args.data {
            let inserted = sqlx::query(&sql)
                .bind(record.id())
                .bind(encode(&record)?)
                .fetch_optional(&mut *tx)
                .await
                .map_err(|e| write_error::<E>(e, record.id()))?;

            if inserted.is_some() {
                created.push(record);
            }
        }

        commit(tx).await?;
        Ok(created)
    }

    async fn patch_first(
        &self,
        tx: &mut Transaction<'static, Postgres>,
        filter: &Filter,
        patch: &serde_json::Map<String, Value>,
    ) -> Result<Option<E>, DomainError> {
        let sql = format!(
            r#"
            UPDATE {table}
            SET data = data || $2, updated_at = NOW()
            WHERE key = (
                SELECT key FROM {table} WHERE data @> $1 ORDER BY created_at LIMIT 1 FOR UPDATE
            )
            RETURNING data
            "#,
            table = self.table
        );

        let row = sqlx::query(&sql)
            .bind(Value::Object(filter.clone()))
            .bind(Value::Object(patch.clone()))
            .fetch_optional(&mut **tx)
            .await
            .map_err(|e| DomainError::storage(format!("Failed to update {}: {}", E::MODEL, e)))?;

        row.as_ref().map(row_data).transpose()?.map(decode).transpose()
    }
}

fn order_clause(order_by: &[OrderBy], first_param: usize) -> String {
    let mut clauses: Vec<String> = order_by
        .iter()
        .enumerate()
        .map(|(i, order)| {
            let nulls = match order.order {
                SortOrder::Asc => "NULLS FIRST",
                SortOrder::Desc => "NULLS LAST",
            };

            format!("data -> ${} {} {}", first_param + i, order.order.as_sql(), nulls)
        })
        .collect();

    clauses.push("created_at".to_string());
    clauses.join(", ")
}

fn row_data(row: &PgRow) -> Result<Value, DomainError> {
    row.try_get("data")
        .map_err(|e| DomainError::storage(format!("Failed to read row: {}", e)))
}

fn encode<E: ModelEntity>(record: &E) -> Result<Value, DomainError> {
    serde_json::to_value(record).map_err(|e| {
        DomainError::serialization(format!("Failed to serialize {}: {}", E::MODEL, e))
    })
}

fn decode<E: ModelEntity>(data: Value) -> Result<E, DomainError> {
    serde_json::from_value(data).map_err(|e| {
        DomainError::serialization(format!("Failed to deserialize {}: {}", E::MODEL, e))
    })
}

fn write_error<E: ModelEntity>(e: sqlx::Error, id: &str) -> DomainError {
    if e.to_string().contains("duplicate key") {
        DomainError::conflict(format!("{} with id '{}' already exists", E::MODEL, id))
    } else {
        DomainError::storage(format!("Failed to write {}: {}", E::MODEL, e))
    }
}

async fn commit(tx: Transaction<'static, Postgres>) -> Result<(), DomainError> {
    tx.commit()
        .await
        .map_err(|e| DomainError::storage(format!("Failed to commit transaction: {}", e)))
}

#[async_trait]
impl<E> ModelStore<E> for PostgresModelStore<E>
where
    E: ModelEntity,
{
    async fn create(&self, data: E) -> Result<E, DomainError> {
        let sql = format!("INSERT INTO {} (key, data) VALUES ($1, $2)", self.table);

        sqlx::query(&sql)
            .bind(data.id())
            .bind(encode(&data)?)
            .execute(&self.pool)
            .await
            .map_err(|e| write_error::<E>(e, data.id()))?;

        Ok(data)
    }

    async fn create_many(&self, args: CreateManyArgs<E>) -> Result<BatchPayload, DomainError> {
        let created = self.insert_many(args).await?;

        Ok(BatchPayload {
            count: created.len() as u64,
        })
    }

    async fn create_many_and_return(
        &self,
        args: CreateManyArgs<E>,
    ) -> Result<Vec<E>, DomainError> {
        self.insert_many(args).await
    }

    async fn delete(&self, args: &FindArgs) -> Result<E, DomainError> {
        let sql = format!(
            r#"
            DELETE FROM {table}
            WHERE key = (SELECT key FROM {table} WHERE data @> $1 ORDER BY created_at LIMIT 1)
            RETURNING data
            "#,
            table = self.table
        );

        let row = sqlx::query(&sql)
            .bind(Value::Object(args.filter.clone()))
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| DomainError::storage(format!("Failed to delete {}: {}", E::MODEL, e)))?
            .ok_or_else(|| Self::not_found(&args.filter))?;

        decode(row_data(&row)?)
    }

    async fn delete_many(&self, filter: &Filter) -> Result<BatchPayload, DomainError> {
        let sql = format!("DELETE FROM {} WHERE data @> $1", self.table);

        let result = sqlx::query(&sql)
            .bind(Value::Object(filter.clone()))
            .execute(&self.pool)
            .await
            .map_err(|e| DomainError::storage(format!("Failed to delete {}: {}", E::MODEL, e)))?;

        Ok(BatchPayload {
            count: result.rows_affected(),
        })
    }

    async fn find_first(&self, args: &FindArgs) -> Result<Option<E>, DomainError> {
        let rows = self.select(&args.clone().take(1)).await?;

        rows.first()
            .map(|row| row_data(row).and_then(decode))
            .transpose()
    }

    async fn find_many(&self, args: &FindArgs) -> Result<Vec<E>, DomainError> {
        let rows = self.select(args).await?;

        rows.iter()
            .map(|row| row_data(row).and_then(decode))
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
        let records = self.matching(&args.filter).await?;
        Ok(evaluate::group_by(records.iter(), args))
    }

    async fn update(&self, args: &UpdateArgs) -> Result<E, DomainError> {
        let mut tx = self.begin().await?;

        let updated = self
            .patch_first(&mut tx, &args.filter, &args.data)
            .await?
            .ok_or_else(|| Self::not_found(&args.filter))?;

        commit(tx).await?;
        Ok(updated)
    }

    async fn update_many(&self, args: &UpdateArgs) -> Result<BatchPayload, DomainError> {
        let sql = format!(
            "UPDATE {} SET data = data || $2, updated_at = NOW() WHERE data @> $1",
            self.table
        );

        let result = sqlx::query(&sql)
            .bind(Value::Object(args.filter.clone()))
            .bind(Value::Object(args.data.clone()))
            .execute(&self.pool)
            .await
            .map_err(|e| DomainError::storage(format!("Failed to update {}: {}", E::MODEL, e)))?;

        Ok(BatchPayload {
            count: result.rows_affected(),
        })
    }

    async fn upsert(&self, args: &UpsertArgs<E>) -> Result<E, DomainError> {
        let mut tx = self.begin().await?;

        let record = match self.patch_first(&mut tx, &args.filter, &args.update).await? {
            Some(updated) => updated,
            None => {
                let sql = format!("INSERT INTO {} (key, data) VALUES ($1, $2)", self.table);

                sqlx::query(&sql)
                    .bind(args.create.id())
                    .bind(encode(&args.create)?)
                    .execute(&mut *tx)
                    .await
                    .map_err(|e| write_error::<E>(e, args.create.id()))?;

                args.create.clone()
            }
        };

        commit(tx).await?;
        Ok(record)
    }

    async fn aggregate(&self, args: &AggregateArgs) -> Result<AggregateResult, DomainError> {
        let records = self.matching(&args.filter).await?;
        Ok(evaluate::aggregate(records.iter(), args))
    }

    async fn count(&self, args: &FindArgs) -> Result<u64, DomainError> {
        let sql = format!(
            "SELECT COUNT(*) AS count FROM (SELECT 1 FROM {} WHERE data @> $1 OFFSET $2 LIMIT $3) matched",
            self.table
        );

        let row = sqlx::query(&sql)
            .bind(Value::Object(args.filter.clone()))
            .bind(args.skip.unwrap_or(0) as i64)
            .bind(args.take.map(|take| take as i64))
            .fetch_one(&self.pool)
            .await
            .map_err(|e| DomainError::storage(format!("Failed to count {}: {}", E::MODEL, e)))?;

        let count: i64 = row.get("count");
        Ok(count as u64)
    }
}
