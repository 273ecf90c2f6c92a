//! The store-facing collection handle and per-request context.
//!
//! Hypernova owns no storage: it resolves over any backend exposing the
//! [`Collection`] trait. All operations are async, take a `Cx` context and
//! return `Outcome` so cancellation propagates cleanly through the engine.

use crate::document::Document;
use crate::error::Error;
use asupersync::{Cx, Outcome};
use serde_json::{Map, Value, json};
use std::future::Future;
use std::pin::Pin;

/// Per-request resolution context.
///
/// Carries opaque caller data (tenant ids, the authenticated principal,
/// feature flags) into link filter functions and reducer compute functions.
/// The engine never inspects `data` itself.
#[derive(Debug, Clone, Default)]
pub struct ResolveContext {
    /// Opaque caller-supplied data.
    pub data: Value,
}

impl ResolveContext {
    /// Create a context around caller data.
    #[must_use]
    pub fn new(data: Value) -> Self {
        Self { data }
    }
}

/// Sort/pagination/projection options for a single fetch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryOptions {
    /// Sort document, `{field: 1 | -1}` per key, applied in key order.
    pub sort: Option<Value>,
    /// Maximum number of rows to return.
    pub limit: Option<u64>,
    /// Number of rows to skip before returning.
    pub skip: Option<u64>,
    /// Projection document; `None` fetches whole documents.
    pub projection: Option<Value>,
}

impl QueryOptions {
    /// Do these options request per-parent pagination?
    ///
    /// A single batched filter cannot express "top-N per parent", so the
    /// resolver falls back to one query per parent when this is set on a
    /// many-cardinality link.
    #[must_use]
    pub fn is_paginated(&self) -> bool {
        self.limit.is_some() || self.skip.is_some()
    }
}

/// One fetch against a collection: filter, options and an optional pipeline
/// suffix of store-native stages (reducer pipeline extensions, lookups).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryRequest {
    /// Filter document; an empty object matches everything.
    pub filter: Value,
    /// Sort/limit/skip/projection.
    pub options: QueryOptions,
    /// Store-native pipeline stages appended after filtering.
    pub pipeline: Vec<Value>,
}

impl QueryRequest {
    /// Build a request from a filter alone.
    #[must_use]
    pub fn filtered(filter: Value) -> Self {
        Self {
            filter,
            ..Self::default()
        }
    }
}

/// A correlated-subquery left-outer-join, the store-level join primitive.
///
/// For each outer row, matching inner rows (`local expression = foreign
/// expression`) are attached under `alias`, optionally post-filtered by an
/// inner pipeline. Usable standalone via
/// [`to_pipeline_stage`](Self::to_pipeline_stage) or embedded in a larger
/// pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct LookupSpec {
    /// Inner collection name.
    pub from: String,
    /// Dotted expression on the outer row.
    pub local_field: String,
    /// Dotted expression on the inner row.
    pub foreign_field: String,
    /// Key the matches are attached under.
    pub alias: String,
    /// Inner pipeline applied to the matches.
    pub pipeline: Vec<Value>,
}

impl LookupSpec {
    /// Create a lookup attaching `from` rows under `alias`.
    #[must_use]
    pub fn new(
        from: impl Into<String>,
        local_field: impl Into<String>,
        foreign_field: impl Into<String>,
        alias: impl Into<String>,
    ) -> Self {
        Self {
            from: from.into(),
            local_field: local_field.into(),
            foreign_field: foreign_field.into(),
            alias: alias.into(),
            pipeline: Vec::new(),
        }
    }

    /// Append an inner pipeline stage.
    #[must_use]
    pub fn stage(mut self, stage: Value) -> Self {
        self.pipeline.push(stage);
        self
    }

    /// Render the store-shape pipeline stage for this join.
    #[must_use]
    pub fn to_pipeline_stage(&self) -> Value {
        let mut lookup = Map::new();
        lookup.insert("from".to_string(), json!(self.from));
        lookup.insert("localField".to_string(), json!(self.local_field));
        lookup.insert("foreignField".to_string(), json!(self.foreign_field));
        lookup.insert("as".to_string(), json!(self.alias));
        if !self.pipeline.is_empty() {
            lookup.insert("pipeline".to_string(), Value::Array(self.pipeline.clone()));
        }
        json!({ "$lookup": Value::Object(lookup) })
    }
}

/// A queryable document collection.
///
/// Object-safe by design: the catalog stores `Arc<dyn Collection>` handles,
/// so `query` returns a boxed future rather than `impl Future`.
///
/// # Example
///
/// ```rust,ignore
/// let rows = collection
///     .query(&cx, &QueryRequest::filtered(json!({"published": true})))
///     .await?;
/// ```
pub trait Collection: Send + Sync {
    /// The collection name used in link targets and lookups.
    fn name(&self) -> &str;

    /// The identity field of this collection's documents.
    fn identity_field(&self) -> &str {
        "_id"
    }

    /// Declared stored field names, used to reject link registrations that
    /// would shadow real data. Schemaless backends may return an empty list.
    fn field_names(&self) -> Vec<String> {
        Vec::new()
    }

    /// Execute one fetch and return matching documents.
    fn query<'a>(
        &'a self,
        cx: &'a Cx,
        request: &'a QueryRequest,
    ) -> Pin<Box<dyn Future<Output = Outcome<Vec<Document>, Error>> + Send + 'a>>;
}
