//! Query evaluation over serialized records
//!
//! Used by the in-memory store for everything and by the Postgres store for
//! aggregation and grouping. Filters use containment semantics: every field of
//! the filter must be present in the record with an equal value, nested
//! objects being matched recursively.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde_json::{Map, Number, Value};

use super::query::{AggregateArgs, AggregateResult, FindArgs, Filter, GroupByArgs, OrderBy, SortOrder};

/// Returns true if the record satisfies the filter
pub fn matches(filter: &Filter, record: &Value) -> bool {
    filter
        .iter()
        .all(|(field, expected)| match record.get(field) {
            Some(actual) => contains(actual, expected),
            None => false,
        })
}

fn contains(actual: &Value, expected: &Value) -> bool {
    match (actual, expected) {
        (Value::Object(actual), Value::Object(expected)) => expected
            .iter()
            .all(|(key, value)| actual.get(key).is_some_and(|a| contains(a, value))),
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        _ => actual == expected,
    }
}

/// Shallow-merges the patch into the record
pub fn apply_patch(record: &mut Value, patch: &Map<String, Value>) {
    if let Value::Object(fields) = record {
        for (field, value) in patch {
            fields.insert(field.clone(), value.clone());
        }
    }
}

/// Filters, orders and paginates records according to find arguments
pub fn select<'a, I>(records: I, args: &FindArgs) -> Vec<Value>
where
    I: IntoIterator<Item = &'a Value>,
{
    let mut selected: Vec<Value> = records
        .into_iter()
        .filter(|record| matches(&args.filter, record))
        .cloned()
        .collect();

    sort(&mut selected, &args.order_by);

    selected
        .into_iter()
        .skip(args.skip.unwrap_or(0))
        .take(args.take.unwrap_or(usize::MAX))
        .collect()
}

/// Stable sort by the given keys, nulls first
pub fn sort(records: &mut [Value], order_by: &[OrderBy]) {
    if order_by.is_empty() {
        return;
    }

    records.sort_by(|a, b| {
        for key in order_by {
            let ordering = compare(
                a.get(&key.field).unwrap_or(&Value::Null),
                b.get(&key.field).unwrap_or(&Value::Null),
            );

            let ordering = match key.order {
                SortOrder::Asc => ordering,
                SortOrder::Desc => ordering.reverse(),
            };

            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    });
}

fn compare(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Null, _) => Ordering::Less,
        (_, Value::Null) => Ordering::Greater,
        (Value::Number(a), Value::Number(b)) => a
            .as_f64()
            .partial_cmp(&b.as_f64())
            .unwrap_or(Ordering::Equal),
        (Value::String(a), Value::String(b)) => a.cmp(b),
        (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
        (a, b) => a.to_string().cmp(&b.to_string()),
    }
}

fn numeric(records: &[&Value], field: &str) -> Vec<f64> {
    records
        .iter()
        .filter_map(|record| record.get(field).and_then(Value::as_f64))
        .collect()
}

fn number(value: f64) -> Value {
    if value.fract() == 0.0 && value.abs() < i64::MAX as f64 {
        Value::Number(Number::from(value as i64))
    } else {
        Number::from_f64(value).map(Value::Number).unwrap_or(Value::Null)
    }
}

fn extreme(records: &[&Value], field: &str, wanted: Ordering) -> Value {
    records
        .iter()
        .filter_map(|record| record.get(field))
        .filter(|value| !value.is_null())
        .fold(None::<&Value>, |best, value| match best {
            Some(current) if compare(value, current) != wanted => Some(current),
            _ => Some(value),
        })
        .cloned()
        .unwrap_or(Value::Null)
}

/// Computes count / sum / avg / min / max over the matching records
pub fn aggregate<'a, I>(records: I, args: &AggregateArgs) -> AggregateResult
where
    I: IntoIterator<Item = &'a Value>,
{
    let matching: Vec<&Value> = records
        .into_iter()
        .filter(|record| matches(&args.filter, record))
        .collect();

    let mut result = AggregateResult {
        count: args.count.then_some(matching.len() as u64),
        ..Default::default()
    };

    for field in &args.sum {
        let values = numeric(&matching, field);
        let sum = if values.is_empty() {
            Value::Null
        } else {
            number(values.iter().sum())
        };
        result.sum.insert(field.clone(), sum);
    }

    for field in &args.avg {
        let values = numeric(&matching, field);
        let avg = if values.is_empty() {
            Value::Null
        } else {
            Number::from_f64(values.iter().sum::<f64>() / values.len() as f64)
                .map(Value::Number)
                .unwrap_or(Value::Null)
        };
        result.avg.insert(field.clone(), avg);
    }

    for field in &args.min {
        result
            .min
            .insert(field.clone(), extreme(&matching, field, Ordering::Less));
    }

    for field in &args.max {
        result
            .max
            .insert(field.clone(), extreme(&matching, field, Ordering::Greater));
    }

    result
}

/// Groups matching records by the `by` fields
///
/// Each group is an object holding the grouping fields plus `_count` and
/// `_sum` when requested. Groups are ordered by their grouping values.
pub fn group_by<'a, I>(records: I, args: &GroupByArgs) -> Vec<Value>
where
    I: IntoIterator<Item = &'a Value>,
{
    let mut groups: BTreeMap<String, (Map<String, Value>, Vec<&Value>)> = BTreeMap::new();

    for record in records {
        if !matches(&args.filter, record) {
            continue;
        }

        let mut fields = Map::new();

        for field in &args.by {
            fields.insert(
                field.clone(),
                record.get(field).cloned().unwrap_or(Value::Null),
            );
        }

        let group_key = Value::Object(fields.clone()).to_string();
        groups
            .entry(group_key)
            .or_insert_with(|| (fields, Vec::new()))
            .1
            .push(record);
    }

    groups
        .into_values()
        .map(|(mut fields, members)| {
            if args.count {
                fields.insert("_count".to_string(), Value::from(members.len() as u64));
            }

            if !args.sum.is_empty() {
                let mut sums = Map::new();

                for field in &args.sum {
                    let values = numeric(&members, field);
                    sums.insert(field.clone(), number(values.iter().sum()));
                }
                fields.insert("_sum".to_string(), Value::Object(sums));
            }

            Value::Object(fields)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn records() -> Vec<Value> {
        vec![
            json!({"id": "1", "guild": "a", "uses": 3, "meta": {"lang": "en", "tz": "UTC"}}),
            json!({"id": "2", "guild": "b", "uses": 10, "meta": {"lang": "de"}}),
            json!({"id": "3", "guild": "a", "uses": 5, "meta": {"lang": "en"}}),
        ]
    }

    fn filter(value: Value) -> Filter {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn test_matches_top_level_and_nested() {
        let rows = records();

        assert!(matches(&filter(json!({"guild": "a"})), &rows[0]));
        assert!(!matches(&filter(json!({"guild": "a"})), &rows[1]));
        assert!(matches(&filter(json!({"meta": {"lang": "en"}})), &rows[0]));
        assert!(!matches(&filter(json!({"missing": null})), &rows[0]));
        assert!(matches(&Filter::new(), &rows[2]));
    }

    #[test]
    fn test_select_orders_and_paginates() {
        let rows = records();
        let args = FindArgs::new()
            .order_by("uses", SortOrder::Desc)
            .skip(1)
            .take(1);

        let selected = select(&rows, &args);
        assert_eq!(selected, vec![rows[2].clone()]);
    }

    #[test]
    fn test_apply_patch() {
        let mut record = json!({"id": "1", "name": "old", "uses": 1});
        let patch = filter(json!({"name": "new"}));

        apply_patch(&mut record, &patch);
        assert_eq!(record, json!({"id": "1", "name": "new", "uses": 1}));
    }

    #[test]
    fn test_aggregate() {
        let rows = records();
        let args = AggregateArgs {
            filter: filter(json!({"guild": "a"})),
            count: true,
            sum: vec!["uses".to_string()],
            avg: vec!["uses".to_string()],
            min: vec!["uses".to_string()],
            max: vec!["id".to_string()],
        };

        let result = aggregate(&rows, &args);
        assert_eq!(result.count, Some(2));
        assert_eq!(result.sum["uses"], json!(8));
        assert_eq!(result.avg["uses"], json!(4.0));
        assert_eq!(result.min["uses"], json!(3));
        assert_eq!(result.max["id"], json!("3"));
    }

    #[test]
    fn test_group_by() {
        let rows = records();
        let args = GroupByArgs {
            by: vec!["guild".to_string()],
            count: true,
            sum: vec!["uses".to_string()],
            ..Default::default()
        };

        let groups = group_by(&rows, &args);
        assert_eq!(
            groups,
            vec![
                json!({"guild": "a", "_count": 2, "_sum": {"uses": 8}}),
                json!({"guild": "b", "_count": 1, "_sum": {"uses": 10}}),
            ]
        );
    }
}
