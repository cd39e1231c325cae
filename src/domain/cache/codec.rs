//! Transport-safe serialization of cached values
//!
//! Values are written as JSON, except that integers whose magnitude exceeds
//! [`MAX_SAFE_INTEGER`] become decimal strings so that consumers treating
//! numbers as doubles never lose precision. Strings are written unchanged.
//!
//! [`decode`] reads through [`Lossless`], which accepts a decimal string
//! wherever an integer is expected, so typed fields need no annotation.
//! Strings in the exact `YYYY-MM-DDTHH:MM:SS.mmmZ` shape are revived into
//! `chrono::DateTime<Utc>` by typed reads.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::de::{
    self, DeserializeSeed, Deserializer, EnumAccess, MapAccess, SeqAccess, VariantAccess, Visitor,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{Number, Value};

use crate::domain::DomainError;

/// Largest integer magnitude stored as a JSON number
pub const MAX_SAFE_INTEGER: u64 = (1 << 53) - 1;

static TIMESTAMP: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}\.\d{3}Z$").expect("valid timestamp pattern")
});

/// Serializes a value to its transport string
pub fn encode<T>(value: &T) -> Result<String, DomainError>
where
    T: Serialize + ?Sized,
{
    let value = serde_json::to_value(value).map_err(|e| {
        DomainError::serialization(format!("Failed to serialize cache value: {}", e))
    })?;

    serde_json::to_string(&to_transport(value)).map_err(|e| {
        DomainError::serialization(format!("Failed to serialize cache value: {}", e))
    })
}

/// Deserializes a transport string back into a typed value
pub fn decode<T>(raw: &str) -> Result<T, DomainError>
where
    T: DeserializeOwned,
{
    let value: Value = serde_json::from_str(raw).map_err(|e| {
        DomainError::serialization(format!("Failed to deserialize cache value: {}", e))
    })?;

    T::deserialize(Lossless(value)).map_err(|e| {
        DomainError::serialization(format!("Failed to deserialize cache value: {}", e))
    })
}

/// Returns true if the string has the exact revivable timestamp shape
pub fn is_timestamp(value: &str) -> bool {
    TIMESTAMP.is_match(value)
}

/// Parses a revivable timestamp string
pub fn revive_timestamp(value: &str) -> Option<DateTime<Utc>> {
    if !is_timestamp(value) {
        return None;
    }

    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|parsed| parsed.with_timezone(&Utc))
}

fn to_transport(value: Value) -> Value {
    match value {
        Value::Number(number) => transport_number(number),
        Value::Array(items) => Value::Array(items.into_iter().map(to_transport).collect()),
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(key, value)| (key, to_transport(value)))
                .collect(),
        ),
        other => other,
    }
}

fn transport_number(number: Number) -> Value {
    let unsafe_magnitude = match (number.as_i64(), number.as_u64()) {
        (Some(signed), _) => signed.unsigned_abs() > MAX_SAFE_INTEGER,
        (None, Some(unsigned)) => unsigned > MAX_SAFE_INTEGER,
        _ => false,
    };

    if unsafe_magnitude {
        Value::String(number.to_string())
    } else {
        Value::Number(number)
    }
}

/// Deserializer over a JSON value that reads decimal strings as integers
///
/// Everything else behaves like `serde_json::Value`'s own deserializer;
/// nested arrays, maps and enum payloads are read through `Lossless` too.
pub struct Lossless(pub Value);

macro_rules! lossless_integer {
    ($($method:ident => $ty:ty, $visit:ident;)*) => {
        $(
            fn $method<V>(self, visitor: V) -> Result<V::Value, Self::Error>
            where
                V: Visitor<'de>,
            {
                if let Value::String(text) = &self.0 {
                    if let Ok(parsed) = text.parse::<$ty>() {
                        return visitor.$visit(parsed);
                    }
                }

                self.deserialize_any(visitor)
            }
        )*
    };
}

impl<'de> Deserializer<'de> for Lossless {
    type Error = serde_json::Error;

    fn deserialize_any<V>(self, visitor: V) -> Result<V::Value, Self::Error>
    where
        V: Visitor<'de>,
    {
        match self.0 {
            Value::Array(items) => visitor.visit_seq(LosslessSeq(items.into_iter())),
            Value::Object(map) => visitor.visit_map(LosslessMap {
                entries: map.into_iter(),
                value: None,
            }),
            other => other.deserialize_any(visitor),
        }
    }

    lossless_integer! {
        deserialize_i64 => i64, visit_i64;
        deserialize_u64 => u64, visit_u64;
        deserialize_i128 => i128, visit_i128;
        deserialize_u128 => u128, visit_u128;
    }

    fn deserialize_option<V>(self, visitor: V) -> Result<V::Value, Self::Error>
    where
        V: Visitor<'de>,
    {
        match self.0 {
            Value::Null => visitor.visit_none(),
            other => visitor.visit_some(Lossless(other)),
        }
    }

    fn deserialize_newtype_struct<V>(
        self,
        _name: &'static str,
        visitor: V,
    ) -> Result<V::Value, Self::Error>
    where
        V: Visitor<'de>,
    {
        visitor.visit_newtype_struct(self)
    }

    fn deserialize_enum<V>(
        self,
        name: &'static str,
        variants: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value, Self::Error>
    where
        V: Visitor<'de>,
    {
        match self.0 {
            Value::Object(map) if map.len() == 1 => match map.into_iter().next() {
                Some((variant, value)) => visitor.visit_enum(LosslessEnum { variant, value }),
                None => Err(de::Error::invalid_length(0, &"map with a single key")),
            },
            other => other.deserialize_enum(name, variants, visitor),
        }
    }

    serde::forward_to_deserialize_any! {
        bool i8 i16 i32 u8 u16 u32 f32 f64 char str string bytes byte_buf unit
        unit_struct seq tuple tuple_struct map struct identifier ignored_any
    }
}

struct LosslessSeq(std::vec::IntoIter<Value>);

impl<'de> SeqAccess<'de> for LosslessSeq {
    type Error = serde_json::Error;

    fn next_element_seed<S>(&mut self, seed: S) -> Result<Option<S::Value>, Self::Error>
    where
        S: DeserializeSeed<'de>,
    {
        self.0
            .next()
            .map(|value| seed.deserialize(Lossless(value)))
            .transpose()
    }

    fn size_hint(&self) -> Option<usize> {
        Some(self.0.len())
    }
}

struct LosslessMap {
    entries: serde_json::map::IntoIter,
    value: Option<Value>,
}

impl<'de> MapAccess<'de> for LosslessMap {
    type Error = serde_json::Error;

    fn next_key_seed<S>(&mut self, seed: S) -> Result<Option<S::Value>, Self::Error>
    where
        S: DeserializeSeed<'de>,
    {
        match self.entries.next() {
            Some((key, value)) => {
                self.value = Some(value);
                seed.deserialize(Lossless(Value::String(key))).map(Some)
            }
            None => Ok(None),
        }
    }

    fn next_value_seed<S>(&mut self, seed: S) -> Result<S::Value, Self::Error>
    where
        S: DeserializeSeed<'de>,
    {
        match self.value.take() {
            Some(value) => seed.deserialize(Lossless(value)),
            None => Err(de::Error::custom("map value requested before its key")),
        }
    }

    fn size_hint(&self) -> Option<usize> {
        Some(self.entries.len())
    }
}

struct LosslessEnum {
    variant: String,
    value: Value,
}

impl<'de> EnumAccess<'de> for LosslessEnum {
    type Error = serde_json::Error;
    type Variant = Lossless;

    fn variant_seed<S>(self, seed: S) -> Result<(S::Value, Self::Variant), Self::Error>
    where
        S: DeserializeSeed<'de>,
    {
        let variant = seed.deserialize(Lossless(Value::String(self.variant)))?;
        Ok((variant, Lossless(self.value)))
    }
}

impl<'de> VariantAccess<'de> for Lossless {
    type Error = serde_json::Error;

    fn unit_variant(self) -> Result<(), Self::Error> {
        <()>::deserialize(self)
    }

    fn newtype_variant_seed<S>(self, seed: S) -> Result<S::Value, Self::Error>
    where
        S: DeserializeSeed<'de>,
    {
        seed.deserialize(self)
    }

    fn tuple_variant<V>(self, _len: usize, visitor: V) -> Result<V::Value, Self::Error>
    where
        V: Visitor<'de>,
    {
        self.deserialize_seq(visitor)
    }

    fn struct_variant<V>(
        self,
        _fields: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value, Self::Error>
    where
        V: Visitor<'de>,
    {
        self.deserialize_map(visitor)
    }
}

/// Serde helper for 128-bit integer fields
///
/// `serde_json` values cannot hold integers wider than 64 bits, so such
/// fields are written as decimal strings.
///
/// ```ignore
/// #[serde(with = "entity_cache::domain::cache::codec::lossless_int")]
/// ledger_id: i128,
/// ```
pub mod lossless_int {
    use std::fmt::Display;
    use std::str::FromStr;

    use serde::{Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Signed(i64),
        Unsigned(u64),
        Text(String),
    }

    pub fn serialize<S, N>(value: &N, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
        N: Display,
    {
        let text = value.to_string();

        if let Ok(signed) = text.parse::<i64>() {
            serializer.serialize_i64(signed)
        } else if let Ok(unsigned) = text.parse::<u64>() {
            serializer.serialize_u64(unsigned)
        } else {
            serializer.serialize_str(&text)
        }
    }

    pub fn deserialize<'de, D, N>(deserializer: D) -> Result<N, D::Error>
    where
        D: Deserializer<'de>,
        N: FromStr,
        N::Err: Display,
    {
        let text = match Repr::deserialize(deserializer)? {
            Repr::Signed(value) => value.to_string(),
            Repr::Unsigned(value) => value.to_string(),
            Repr::Text(value) => value,
        };

        text.parse::<N>().map_err(serde::de::Error::custom)
    }
}
