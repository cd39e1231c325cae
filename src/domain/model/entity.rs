//! Model entity trait

use std::fmt::Debug;

use serde::{de::DeserializeOwned, Serialize};

/// Trait for records managed by a model store
///
/// `MODEL` is the compile-time entity tag: it names the store table and is the
/// default cache prefix, so no lookup by string is ever needed to reach a model.
pub trait ModelEntity:
    Clone + Debug + Send + Sync + Serialize + DeserializeOwned + 'static
{
    /// Entity kind tag
    const MODEL: &'static str;

    /// Field names of the record
    const FIELDS: &'static [&'static str];

    /// Stable identity of the record
    fn id(&self) -> &str;
}
