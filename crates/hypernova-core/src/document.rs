//! Document representation and dotted-path access.
//!
//! Hypernova rows are plain JSON objects. Storage fields may be dotted
//! paths (`"profile.payment_id"`), and join-key comparison must use value
//! equality rather than raw JSON equality, so the helpers here are shared
//! by the resolver strategies and the store backends.

use serde_json::{Map, Value};

/// A single document fetched from (or assembled for) a collection.
pub type Document = Map<String, Value>;

/// Read a value at a dotted path.
///
/// Returns `None` when any intermediate segment is missing or is not an
/// object. A path with no dots is a plain key lookup.
///
/// # Examples
///
/// ```
/// use hypernova_core::document::path_get;
/// use serde_json::json;
///
/// let doc = json!({"profile": {"payment_id": 7}});
/// let doc = doc.as_object().unwrap();
/// assert_eq!(path_get(doc, "profile.payment_id"), Some(&json!(7)));
/// assert_eq!(path_get(doc, "profile.missing"), None);
/// ```
pub fn path_get<'a>(doc: &'a Document, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let first = segments.next()?;
    let mut current = doc.get(first)?;
    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

/// Write a value at a dotted path, creating intermediate objects.
///
/// An intermediate segment holding a non-object value is replaced by an
/// object; the previous value is lost. Store backends use this to build
/// projected documents.
pub fn path_set(doc: &mut Document, path: &str, value: Value) {
    let mut segments: Vec<&str> = path.split('.').collect();
    let last = match segments.pop() {
        Some(last) => last,
        None => return,
    };

    let mut current = doc;
    for segment in segments {
        let entry = current
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
        match entry {
            Value::Object(map) => current = map,
            _ => return,
        }
    }
    current.insert(last.to_string(), value);
}

/// Canonical comparison key for a join/identity value.
///
/// Identity types are not guaranteed directly comparable (a store may hand
/// back the same id as a string in one place and a rich type serialized to
/// JSON in another), so grouping and de-duplication go through this string
/// form. `Null` has no identity and returns `None`.
pub fn identity_key(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(i.to_string())
            } else if let Some(u) = n.as_u64() {
                Some(u.to_string())
            } else {
                n.as_f64().map(|f| {
                    if f.fract() == 0.0 && f.is_finite() {
                        format!("{}", f as i64)
                    } else {
                        f.to_string()
                    }
                })
            }
        }
        Value::Array(_) | Value::Object(_) => Some(value.to_string()),
    }
}

/// Flatten a stored join-key value into its scalar members.
///
/// Many-cardinality links store arrays of ids; a missing, null or otherwise
/// corrupted value degrades to the empty slice rather than erroring.
pub fn key_values(value: Option<&Value>) -> Vec<&Value> {
    match value {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items.iter().filter(|v| !v.is_null()).collect(),
        Some(other) => vec![other],
    }
}
