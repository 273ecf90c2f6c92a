//! The level-synchronized, per-edge-strategy resolution algorithm.
//!
//! The root fetches first; each level then fetches every child before any
//! grandchild starts, so a child never runs before its parent has rows.
//! Per child edge one of three strategies applies:
//!
//! 1. **Recursive-per-parent**: the child's `$` is a function of the
//!    parent row, or a many-cardinality link requests `limit`/`skip`
//!    (a single batched filter cannot express "top-N per parent").
//! 2. **Batched direct join**: distinct stored keys across all parents,
//!    one filtered query, grouped by foreign key.
//! 3. **Batched virtual join**: symmetric, filtered by the parents' own
//!    identities.
//!
//! All strategies compare join keys through canonical identity strings and
//! degrade corrupted shapes to "no match" instead of erroring.

use crate::catalog::Catalog;
use crate::graph::CollectionNode;
use crate::macros::{try_outcome, try_result};
use crate::reducer::ReducerKind;
use asupersync::{Cx, Outcome};
use hypernova_core::document::{identity_key, key_values, path_get};
use hypernova_core::{Document, Error, LinkSpec, QueryRequest, ResolveContext};
use hypernova_query::{ConfigSource, NodeConfig, merge_json};
use serde_json::{Map, Value, json};
use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::pin::Pin;
use tracing::debug;

type BoxOutcome<'a, T> = Pin<Box<dyn Future<Output = Outcome<T, Error>> + Send + 'a>>;

/// Fetch the whole tree, root first, level-synchronized below.
pub(crate) fn fetch_tree<'a>(
    cx: &'a Cx,
    catalog: &'a Catalog,
    node: &'a mut CollectionNode,
    context: &'a ResolveContext,
) -> BoxOutcome<'a, ()> {
    Box::pin(async move {
        let config = node
            .config
            .as_ref()
            .map_or_else(NodeConfig::default, |source| {
                source.resolve(&Document::new())
            });
        let mut request = base_request(node, &config, None, context);
        request.options.limit = config.options.limit;
        request.options.skip = config.options.skip;

        let collection = try_result!(catalog.collection(&node.collection)).clone();
        node.results = try_outcome!(collection.query(cx, &request).await);
        debug!(
            collection = %node.collection,
            rows = node.results.len(),
            "fetched root"
        );
        descend(cx, catalog, node, context).await
    })
}

/// Fetch every child at this level, then recurse into their children.
fn descend<'a>(
    cx: &'a Cx,
    catalog: &'a Catalog,
    node: &'a mut CollectionNode,
    context: &'a ResolveContext,
) -> BoxOutcome<'a, ()> {
    Box::pin(async move {
        let results = &node.results;
        for child in node.children.iter_mut() {
            try_outcome!(fetch_child(cx, catalog, results, child, context).await);
        }
        for child in node.children.iter_mut() {
            try_outcome!(descend(cx, catalog, child, context).await);
        }
        Outcome::Ok(())
    })
}

async fn fetch_child(
    cx: &Cx,
    catalog: &Catalog,
    parent_results: &[Document],
    child: &mut CollectionNode,
    context: &ResolveContext,
) -> Outcome<(), Error> {
    let Some(link) = child.link.clone() else {
        return Outcome::Err(Error::config(
            hypernova_core::ConfigErrorKind::UnknownLink,
            format!("node '{}' has no link metadata", child.output_key),
        ));
    };
    if parent_results.is_empty() {
        child.results = Vec::new();
        child.matches = Vec::new();
        return Outcome::Ok(());
    }

    let per_parent_config = child
        .config
        .as_ref()
        .is_some_and(ConfigSource::is_per_parent);
    let static_config = child
        .config
        .as_ref()
        .and_then(ConfigSource::as_static)
        .cloned()
        .unwrap_or_default();
    let paginated_many = !link.is_one() && static_config.options.is_paginated();

    if per_parent_config || paginated_many {
        debug!(
            link = %link.name,
            parents = parent_results.len(),
            "strategy: recursive-per-parent"
        );
        fetch_recursive(cx, catalog, parent_results, child, &link, context).await
    } else {
        let strategy = if link.is_virtual() {
            "batched-virtual"
        } else {
            "batched-direct"
        };
        debug!(link = %link.name, parents = parent_results.len(), strategy = strategy, "strategy");
        fetch_batched(cx, catalog, parent_results, child, &link, &static_config, context).await
    }
}

/// One query per distinct parent, join key embedded as a filter.
///
/// Each parent's matches are cached during the loop (same key set, same
/// static config, same rows), and the child node's own result set is the
/// identity-deduplicated union.
async fn fetch_recursive(
    cx: &Cx,
    catalog: &Catalog,
    parent_results: &[Document],
    child: &mut CollectionNode,
    link: &LinkSpec,
    context: &ResolveContext,
) -> Outcome<(), Error> {
    let target = try_result!(catalog.collection(&link.target)).clone();
    let per_parent_config = child
        .config
        .as_ref()
        .is_some_and(ConfigSource::is_per_parent);

    let mut results: Vec<Document> = Vec::new();
    let mut index_by_identity: BTreeMap<String, usize> = BTreeMap::new();
    let mut matches: Vec<Vec<usize>> = Vec::with_capacity(parent_results.len());
    let mut cache: BTreeMap<String, Vec<usize>> = BTreeMap::new();

    for parent in parent_results {
        let values: Vec<Value> = key_values(path_get(parent, &child.parent_key_field))
            .into_iter()
            .cloned()
            .collect();
        if values.is_empty() {
            matches.push(Vec::new());
            continue;
        }

        // A per-parent config function may produce a different query for
        // identical key sets, so caching only applies to static configs.
        let cache_key = if per_parent_config {
            None
        } else {
            Some(
                values
                    .iter()
                    .filter_map(identity_key)
                    .collect::<Vec<_>>()
                    .join("\u{1}"),
            )
        };
        if let Some(key) = &cache_key {
            if let Some(cached) = cache.get(key) {
                matches.push(cached.clone());
                continue;
            }
        }

        let config = child
            .config
            .as_ref()
            .map_or_else(NodeConfig::default, |source| source.resolve(parent));
        let mut request = base_request(child, &config, Some(link), context);
        request.options.limit = config.options.limit;
        request.options.skip = config.options.skip;
        set_filter_key(
            &mut request.filter,
            &child.child_key_field,
            json!({"$in": values}),
        );

        let rows = try_outcome!(target.query(cx, &request).await);
        let mut indices = Vec::with_capacity(rows.len());
        for row in rows {
            match path_get(&row, &child.identity_field).and_then(identity_key) {
                Some(key) => {
                    if let Some(&existing) = index_by_identity.get(&key) {
                        indices.push(existing);
                    } else {
                        results.push(row);
                        index_by_identity.insert(key, results.len() - 1);
                        indices.push(results.len() - 1);
                    }
                }
                None => {
                    results.push(row);
                    indices.push(results.len() - 1);
                }
            }
        }
        if let Some(key) = cache_key {
            cache.insert(key, indices.clone());
        }
        matches.push(indices);
    }

    child.results = results;
    child.matches = matches;
    Outcome::Ok(())
}

/// One filtered query over the distinct join keys of every parent, grouped
/// by foreign key; each parent then looks its matches up locally. Serves
/// both the direct and the virtual batched joins; only the wired key
/// fields differ.
async fn fetch_batched(
    cx: &Cx,
    catalog: &Catalog,
    parent_results: &[Document],
    child: &mut CollectionNode,
    link: &LinkSpec,
    config: &NodeConfig,
    context: &ResolveContext,
) -> Outcome<(), Error> {
    let target = try_result!(catalog.collection(&link.target)).clone();

    // Distinct non-null join keys across all parents, arrays flattened.
    let mut distinct: Vec<Value> = Vec::new();
    let mut seen: BTreeSet<String> = BTreeSet::new();
    for parent in parent_results {
        for value in key_values(path_get(parent, &child.parent_key_field)) {
            if let Some(key) = identity_key(value) {
                if seen.insert(key) {
                    distinct.push(value.clone());
                }
            }
        }
    }
    if distinct.is_empty() {
        child.results = Vec::new();
        child.matches = vec![Vec::new(); parent_results.len()];
        return Outcome::Ok(());
    }

    let mut request = base_request(child, config, Some(link), context);
    set_filter_key(
        &mut request.filter,
        &child.child_key_field,
        json!({"$in": distinct}),
    );
    let rows = try_outcome!(target.query(cx, &request).await);

    // Group fetched rows by their foreign-key value(s).
    let mut by_key: BTreeMap<String, Vec<usize>> = BTreeMap::new();
    for (index, row) in rows.iter().enumerate() {
        for value in key_values(path_get(row, &child.child_key_field)) {
            if let Some(key) = identity_key(value) {
                by_key.entry(key).or_default().push(index);
            }
        }
    }

    // Per parent, look up matches by its own stored value; ids with no
    // match are silently skipped.
    let mut matches: Vec<Vec<usize>> = Vec::with_capacity(parent_results.len());
    for parent in parent_results {
        let mut indices: Vec<usize> = Vec::new();
        let mut taken: BTreeSet<usize> = BTreeSet::new();
        for value in key_values(path_get(parent, &child.parent_key_field)) {
            let Some(key) = identity_key(value) else {
                continue;
            };
            let Some(found) = by_key.get(&key) else {
                continue;
            };
            for &index in found {
                if taken.insert(index) {
                    indices.push(index);
                }
            }
        }
        matches.push(indices);
    }

    child.results = rows;
    child.matches = matches;
    Outcome::Ok(())
}

/// Build the fetch request shared by all strategies: link filters, config
/// filters, sort, store projection and pipeline suffix. Callers add the
/// join-key condition and any pagination.
fn base_request(
    node: &CollectionNode,
    config: &NodeConfig,
    link: Option<&LinkSpec>,
    context: &ResolveContext,
) -> QueryRequest {
    let mut filter = Value::Object(Map::new());
    if let Some(link) = link {
        if let Some(filters) = &link.filters {
            merge_json(&mut filter, &filters.evaluate(context));
        }
    }
    if let Some(filters) = &config.filters {
        merge_json(&mut filter, filters);
    }

    let mut pipeline = config.pipeline.clone();
    for reducer in &node.reducers {
        if let ReducerKind::Pipeline(stages) = &reducer.spec.kind {
            pipeline.extend(stages.iter().cloned());
        }
    }

    let mut request = QueryRequest::filtered(filter);
    request.options.sort = config.options.sort.clone();
    request.options.projection = store_projection(node);
    request.pipeline = pipeline;
    request
}

/// The join-key condition always wins over user filters on the same field.
fn set_filter_key(filter: &mut Value, field: &str, condition: Value) {
    if let Value::Object(map) = filter {
        map.insert(field.to_string(), condition);
    }
}

/// Store-side projection from the field tree.
///
/// Join keys and the identity field are always fetched; passthrough
/// operator payloads are forwarded verbatim; pipeline-side reducer outputs
/// are included so a projecting store does not strip them. All-fields mode
/// suppresses projection entirely.
fn store_projection(node: &CollectionNode) -> Option<Value> {
    if node.all {
        return None;
    }
    let mut projection = Map::new();
    collect_paths(&node.fields, "", &mut projection);
    projection
        .entry(node.identity_field.clone())
        .or_insert(json!(1));
    for reducer in &node.reducers {
        if reducer.spec.is_pipeline() {
            projection.insert(reducer.name.clone(), json!(1));
        }
    }
    Some(Value::Object(projection))
}

fn collect_paths(
    fields: &BTreeMap<String, crate::graph::FieldNode>,
    prefix: &str,
    projection: &mut Map<String, Value>,
) {
    for (name, field) in fields {
        let path = if prefix.is_empty() {
            name.clone()
        } else {
            format!("{prefix}.{name}")
        };
        if field.children.is_empty() {
            let shape = field.projection.clone().unwrap_or_else(|| json!(1));
            projection.insert(path, shape);
        } else {
            collect_paths(&field.children, &path, projection);
        }
    }
}
