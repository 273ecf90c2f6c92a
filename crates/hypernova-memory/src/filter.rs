//! Filter matching over in-memory documents.
//!
//! Implements the query subset the resolver emits: implicit equality,
//! `$eq`/`$ne`, the ordered comparisons, `$in`/`$nin`, `$exists` and the
//! `$and`/`$or` combinators. Field names may be dotted paths.

use hypernova_core::document::{Document, path_get};
use serde_json::Value;
use std::cmp::Ordering;
use tracing::warn;

/// Does a document satisfy a filter object?
///
/// A non-object or empty filter matches everything, mirroring the store
/// convention of `{}` as the match-all filter.
#[must_use]
pub fn matches(doc: &Document, filter: &Value) -> bool {
    let Some(conditions) = filter.as_object() else {
        return true;
    };
    conditions.iter().all(|(key, condition)| match key.as_str() {
        "$and" => condition
            .as_array()
            .is_some_and(|cs| cs.iter().all(|c| matches(doc, c))),
        "$or" => condition
            .as_array()
            .is_some_and(|cs| cs.iter().any(|c| matches(doc, c))),
        path => field_matches(path_get(doc, path), condition),
    })
}

fn field_matches(actual: Option<&Value>, condition: &Value) -> bool {
    if let Some(operators) = condition.as_object() {
        if operators.keys().any(|k| k.starts_with('$')) {
            return operators
                .iter()
                .all(|(op, operand)| apply_operator(actual, op, operand));
        }
    }
    equals(actual, condition)
}

fn apply_operator(actual: Option<&Value>, op: &str, operand: &Value) -> bool {
    match op {
        "$eq" => equals(actual, operand),
        "$ne" => !equals(actual, operand),
        "$gt" => ordered(actual, operand).is_some_and(|o| o == Ordering::Greater),
        "$gte" => ordered(actual, operand).is_some_and(|o| o != Ordering::Less),
        "$lt" => ordered(actual, operand).is_some_and(|o| o == Ordering::Less),
        "$lte" => ordered(actual, operand).is_some_and(|o| o != Ordering::Greater),
        "$in" => operand
            .as_array()
            .is_some_and(|items| items.iter().any(|item| equals(actual, item))),
        "$nin" => operand
            .as_array()
            .is_some_and(|items| !items.iter().any(|item| equals(actual, item))),
        "$exists" => operand.as_bool().is_some_and(|want| actual.is_some() == want),
        other => {
            warn!(operator = other, "unsupported filter operator");
            false
        }
    }
}

/// Value equality with numeric coercion and array membership.
///
/// A missing field equals `null`; an array field equals a scalar when any
/// element does, so `{tag: "a"}` matches `{"tag": ["a", "b"]}`.
fn equals(actual: Option<&Value>, expected: &Value) -> bool {
    let actual = actual.unwrap_or(&Value::Null);
    if scalar_equals(actual, expected) {
        return true;
    }
    match (actual, expected) {
        (Value::Array(items), expected) if !expected.is_array() => {
            items.iter().any(|item| scalar_equals(item, expected))
        }
        _ => false,
    }
}

fn scalar_equals(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(x), Some(y)) => x == y,
            _ => x == y,
        },
        _ => a == b,
    }
}

/// Total-ish ordering used by range operators and sorting.
///
/// Numbers compare numerically, strings lexically, booleans false-first.
/// Mixed or non-orderable shapes return `None` and fail range matches.
#[must_use]
pub fn ordered(actual: Option<&Value>, other: &Value) -> Option<Ordering> {
    match (actual?, other) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}
