//! Query objects accepted by model stores

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Equality filter over top-level record fields
pub type Filter = Map<String, Value>;

/// Builds a filter selecting one record by id
pub fn id_filter(id: &str) -> Filter {
    let mut filter = Filter::new();
    filter.insert("id".to_string(), Value::String(id.to_string()));
    filter
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

impl SortOrder {
    pub fn as_sql(&self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderBy {
    pub field: String,
    pub order: SortOrder,
}

/// Arguments of the find family and of `count`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FindArgs {
    #[serde(rename = "where", default)]
    pub filter: Filter,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub order_by: Vec<OrderBy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub take: Option<usize>,
}

impl FindArgs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn by_id(id: &str) -> Self {
        Self {
            filter: id_filter(id),
            ..Default::default()
        }
    }

    pub fn with_filter(filter: Filter) -> Self {
        Self {
            filter,
            ..Default::default()
        }
    }

    pub fn filter(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter.insert(field.into(), value.into());
        self
    }

    pub fn order_by(mut self, field: impl Into<String>, order: SortOrder) -> Self {
        self.order_by.push(OrderBy {
            field: field.into(),
            order,
        });
        self
    }

    pub fn skip(mut self, skip: usize) -> Self {
        self.skip = Some(skip);
        self
    }

    pub fn take(mut self, take: usize) -> Self {
        self.take = Some(take);
        self
    }
}

/// Arguments of `update` / `update_many`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpdateArgs {
    #[serde(rename = "where", default)]
    pub filter: Filter,
    /// Fields to overwrite, shallow-merged into matching records
    pub data: Map<String, Value>,
}

impl UpdateArgs {
    pub fn new(filter: Filter) -> Self {
        Self {
            filter,
            data: Map::new(),
        }
    }

    pub fn by_id(id: &str) -> Self {
        Self::new(id_filter(id))
    }

    pub fn set(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data.insert(field.into(), value.into());
        self
    }

    pub fn find_args(&self) -> FindArgs {
        FindArgs::with_filter(self.filter.clone())
    }
}

/// Arguments of `create_many` / `create_many_and_return`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateManyArgs<E> {
    pub data: Vec<E>,
    #[serde(default)]
    pub skip_duplicates: bool,
}

impl<E> CreateManyArgs<E> {
    pub fn new(data: Vec<E>) -> Self {
        Self {
            data,
            skip_duplicates: false,
        }
    }

    pub fn skip_duplicates(mut self) -> Self {
        self.skip_duplicates = true;
        self
    }
}

/// Arguments of `upsert`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpsertArgs<E> {
    #[serde(rename = "where", default)]
    pub filter: Filter,
    pub create: E,
    #[serde(default)]
    pub update: Map<String, Value>,
}

impl<E> UpsertArgs<E> {
    pub fn new(filter: Filter, create: E) -> Self {
        Self {
            filter,
            create,
            update: Map::new(),
        }
    }

    pub fn set(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.update.insert(field.into(), value.into());
        self
    }

    pub fn find_args(&self) -> FindArgs {
        FindArgs::with_filter(self.filter.clone())
    }
}

/// Result of batch writes that do not return rows
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchPayload {
    pub count: u64,
}

/// Arguments of `aggregate`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregateArgs {
    #[serde(rename = "where", default)]
    pub filter: Filter,
    #[serde(default)]
    pub count: bool,
    #[serde(default)]
    pub sum: Vec<String>,
    #[serde(default)]
    pub avg: Vec<String>,
    #[serde(default)]
    pub min: Vec<String>,
    #[serde(default)]
    pub max: Vec<String>,
}

/// Result of `aggregate`, one map per requested function
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregateResult {
    #[serde(rename = "_count", skip_serializing_if = "Option::is_none")]
    pub count: Option<u64>,
    #[serde(rename = "_sum", default)]
    pub sum: Map<String, Value>,
    #[serde(rename = "_avg", default)]
    pub avg: Map<String, Value>,
    #[serde(rename = "_min", default)]
    pub min: Map<String, Value>,
    #[serde(rename = "_max", default)]
    pub max: Map<String, Value>,
}

/// Arguments of `group_by`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GroupByArgs {
    pub by: Vec<String>,
    #[serde(rename = "where", default)]
    pub filter: Filter,
    #[serde(default)]
    pub count: bool,
    #[serde(default)]
    pub sum: Vec<String>,
}
