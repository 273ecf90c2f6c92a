//! The in-memory collection.

use crate::filter::{matches, ordered};
use hypernova_core::document::{Document, path_get, path_set};
use hypernova_core::{Collection, Error, QueryRequest};
use asupersync::{Cx, Outcome};
use serde_json::Value;
use std::cmp::Ordering;
use std::future::Future;
use std::pin::Pin;
use std::sync::RwLock;
use tracing::debug;

/// A document collection held in memory.
///
/// Used as the test harness for the resolver and usable as a small
/// embedded store. Documents are stored in insertion order; queries
/// evaluate filter → sort → skip/limit → pipeline → projection.
///
/// # Example
///
/// ```rust,ignore
/// let posts = MemoryCollection::new("posts");
/// posts.insert_value(json!({"_id": 1, "title": "First"}))?;
/// let rows = posts
///     .query(&cx, &QueryRequest::filtered(json!({"title": "First"})))
///     .await?;
/// ```
pub struct MemoryCollection {
    name: String,
    identity: String,
    declared_fields: Vec<String>,
    docs: RwLock<Vec<Document>>,
}

impl MemoryCollection {
    /// Create an empty collection named `name` with identity field `_id`.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            identity: "_id".to_string(),
            declared_fields: Vec::new(),
            docs: RwLock::new(Vec::new()),
        }
    }

    /// Override the identity field name.
    #[must_use]
    pub fn with_identity_field(mut self, field: impl Into<String>) -> Self {
        self.identity = field.into();
        self
    }

    /// Declare stored field names so link registration can detect
    /// collisions against real data fields.
    #[must_use]
    pub fn declare_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.declared_fields = fields.into_iter().map(Into::into).collect();
        self
    }

    /// Insert one document.
    pub fn insert(&self, doc: Document) {
        let mut docs = self
            .docs
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        docs.push(doc);
    }

    /// Insert one document given as a JSON object value.
    pub fn insert_value(&self, value: Value) -> Result<(), Error> {
        match value {
            Value::Object(doc) => {
                self.insert(doc);
                Ok(())
            }
            other => Err(Error::store(
                self.name.clone(),
                format!("cannot insert non-object document: {other}"),
            )),
        }
    }

    /// Insert every object of a JSON array.
    pub fn seed(&self, values: Value) -> Result<(), Error> {
        let items = match values {
            Value::Array(items) => items,
            other => {
                return Err(Error::store(
                    self.name.clone(),
                    format!("seed expects an array, got {other}"),
                ));
            }
        };
        for item in items {
            self.insert_value(item)?;
        }
        Ok(())
    }

    /// Number of stored documents.
    #[must_use]
    pub fn len(&self) -> usize {
        self.docs
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    /// Is the collection empty?
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn run_query(&self, request: &QueryRequest) -> Result<Vec<Document>, Error> {
        let docs = self
            .docs
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let mut rows: Vec<Document> = docs
            .iter()
            .filter(|doc| matches(doc, &request.filter))
            .cloned()
            .collect();
        drop(docs);

        if let Some(sort) = &request.options.sort {
            sort_documents(&mut rows, sort);
        }
        if let Some(skip) = request.options.skip {
            let skip = usize::try_from(skip).unwrap_or(usize::MAX);
            rows = rows.into_iter().skip(skip).collect();
        }
        if let Some(limit) = request.options.limit {
            let limit = usize::try_from(limit).unwrap_or(usize::MAX);
            rows.truncate(limit);
        }
        for stage in &request.pipeline {
            rows = apply_stage(&self.name, rows, stage)?;
        }
        if let Some(projection) = &request.options.projection {
            rows = rows
                .into_iter()
                .map(|doc| apply_projection(&doc, projection))
                .collect();
        }

        debug!(
            collection = %self.name,
            returned = rows.len(),
            "memory query"
        );
        Ok(rows)
    }
}

impl Collection for MemoryCollection {
    fn name(&self) -> &str {
        &self.name
    }

    fn identity_field(&self) -> &str {
        &self.identity
    }

    fn field_names(&self) -> Vec<String> {
        self.declared_fields.clone()
    }

    fn query<'a>(
        &'a self,
        _cx: &'a Cx,
        request: &'a QueryRequest,
    ) -> Pin<Box<dyn Future<Output = Outcome<Vec<Document>, Error>> + Send + 'a>> {
        Box::pin(async move {
            match self.run_query(request) {
                Ok(rows) => Outcome::Ok(rows),
                Err(e) => Outcome::Err(e),
            }
        })
    }
}

/// Stable multi-key sort by a `{field: 1 | -1}` spec.
fn sort_documents(rows: &mut [Document], sort: &Value) {
    let Some(spec) = sort.as_object() else {
        return;
    };
    let keys: Vec<(&String, bool)> = spec
        .iter()
        .map(|(field, dir)| (field, dir.as_i64().unwrap_or(1) >= 0))
        .collect();

    rows.sort_by(|a, b| {
        for (field, ascending) in &keys {
            let left = path_get(a, field);
            let right = path_get(b, field);
            let order = match (left, right) {
                (Some(l), Some(r)) => ordered(Some(l), r).unwrap_or(Ordering::Equal),
                (Some(_), None) => Ordering::Greater,
                (None, Some(_)) => Ordering::Less,
                (None, None) => Ordering::Equal,
            };
            let order = if *ascending { order } else { order.reverse() };
            if order != Ordering::Equal {
                return order;
            }
        }
        Ordering::Equal
    });
}

/// Apply one pipeline stage. The memory backend supports the stages the
/// engine emits for pipeline-side reducers: `$match` and `$addFields` with
/// literal values.
fn apply_stage(
    collection: &str,
    rows: Vec<Document>,
    stage: &Value,
) -> Result<Vec<Document>, Error> {
    let Some(stage_obj) = stage.as_object() else {
        return Err(Error::store(collection, "pipeline stage must be an object"));
    };
    let Some((op, payload)) = stage_obj.iter().next() else {
        return Ok(rows);
    };
    match op.as_str() {
        "$match" => Ok(rows
            .into_iter()
            .filter(|doc| matches(doc, payload))
            .collect()),
        "$addFields" => {
            let Some(fields) = payload.as_object() else {
                return Err(Error::store(collection, "$addFields expects an object"));
            };
            Ok(rows
                .into_iter()
                .map(|mut doc| {
                    for (field, value) in fields {
                        path_set(&mut doc, field, value.clone());
                    }
                    doc
                })
                .collect())
        }
        other => Err(Error::store(
            collection,
            format!("unsupported pipeline stage '{other}'"),
        )),
    }
}

/// Apply an inclusion projection with `$slice` operator support.
fn apply_projection(doc: &Document, projection: &Value) -> Document {
    let Some(spec) = projection.as_object() else {
        return doc.clone();
    };
    let mut out = Document::new();
    for (path, shape) in spec {
        match shape {
            Value::Bool(true) => {
                if let Some(value) = path_get(doc, path) {
                    path_set(&mut out, path, value.clone());
                }
            }
            Value::Number(n) if n.as_u64() == Some(1) => {
                if let Some(value) = path_get(doc, path) {
                    path_set(&mut out, path, value.clone());
                }
            }
            Value::Object(ops) => {
                if let Some(value) = project_operator(path_get(doc, path), ops) {
                    path_set(&mut out, path, value);
                }
            }
            // `0`/`false` exclusions never reach the store: the engine
            // only emits inclusion projections.
            _ => {}
        }
    }
    out
}

fn project_operator(
    value: Option<&Value>,
    ops: &serde_json::Map<String, Value>,
) -> Option<Value> {
    let value = value?;
    if let Some(slice) = ops.get("$slice") {
        let Some(items) = value.as_array() else {
            return Some(value.clone());
        };
        let n = slice.as_i64().unwrap_or(0);
        let sliced: Vec<Value> = if n >= 0 {
            items.iter().take(n as usize).cloned().collect()
        } else {
            let keep = n.unsigned_abs() as usize;
            let start = items.len().saturating_sub(keep);
            items[start..].to_vec()
        };
        return Some(Value::Array(sliced));
    }
    // Unknown operators pass the stored value through unchanged.
    Some(value.clone())
}
