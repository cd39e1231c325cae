//! Cache key generation for entity entries

use std::fmt;

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::domain::DomainError;

/// Number of hex characters kept from a query digest
const HASH_LEN: usize = 32;

/// Kind of non-identity query result cached under a bucket key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BucketKind {
    First,
    Many,
    Unique,
}

impl BucketKind {
    pub const ALL: [BucketKind; 3] = [BucketKind::First, BucketKind::Many, BucketKind::Unique];

    pub fn as_str(&self) -> &'static str {
        match self {
            BucketKind::First => "first",
            BucketKind::Many => "many",
            BucketKind::Unique => "unique",
        }
    }
}

impl fmt::Display for BucketKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Builds the keys owned by one entity kind
///
/// Every key starts with `<prefix>:` so invalidation by prefix never reaches
/// another entity's entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityKeys {
    prefix: String,
}

impl EntityKeys {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// `<prefix>:<id>`
    pub fn by_id(&self, id: &str) -> String {
        format!("{}:{}", self.prefix, id)
    }

    /// `<prefix>:<kind>:<hash>` where the hash digests the serialized query
    pub fn bucket<Q>(&self, kind: BucketKind, query: &Q) -> Result<String, DomainError>
    where
        Q: Serialize + ?Sized,
    {
        Ok(format!("{}{}", self.bucket_prefix(kind), hash_any(query)?))
    }

    /// Prefix matching every key of the entity
    pub fn entity_prefix(&self) -> String {
        format!("{}:", self.prefix)
    }

    /// Prefix matching every bucket key of one kind
    pub fn bucket_prefix(&self, kind: BucketKind) -> String {
        format!("{}:{}:", self.prefix, kind)
    }

    /// Returns true if the key is a bucket key of this entity
    pub fn is_bucket_key(&self, key: &str) -> bool {
        BucketKind::ALL
            .iter()
            .any(|kind| key.starts_with(&self.bucket_prefix(*kind)))
    }
}

/// Stable digest of any serializable value
///
/// Object keys are sorted before hashing so that two queries differing only in
/// field order share a digest.
pub fn hash_any<T>(value: &T) -> Result<String, DomainError>
where
    T: Serialize + ?Sized,
{
    let value = serde_json::to_value(value)
        .map_err(|e| DomainError::serialization(format!("Failed to hash value: {}", e)))?;

    let mut canonical = String::new();
    write_canonical(&value, &mut canonical);

    let digest = Sha256::digest(canonical.as_bytes());
    let mut hash = hex::encode(digest);
    hash.truncate(HASH_LEN);
    Ok(hash)
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Array(items) => {
            out.push('[');

            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));

            out.push('{');

            for (i, (key, item)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(item, out);
            }
            out.push('}');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}
