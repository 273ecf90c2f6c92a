//! Assembly and final projection.
//!
//! Assembly runs bottom-up: a child's subtree is fully assembled (its own
//! links attached, its reducers evaluated) before its rows are cloned into
//! the parent rows, so parent-level reducers see complete child values.
//! One-cardinality values collapse to first-or-null at attach time. The
//! final projection then walks the sealed tree top-down and strips every
//! key whose node resolved implicit.

use crate::graph::{CollectionNode, FieldNode};
use crate::macros::try_outcome;
use crate::reducer;
use asupersync::{Cx, Outcome};
use hypernova_core::{Document, Error, ResolveContext};
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;

type BoxOutcome<'a, T> = Pin<Box<dyn Future<Output = Outcome<T, Error>> + Send + 'a>>;

/// Assemble a node's subtree: children first, then attach, then reducers.
pub(crate) fn assemble<'a>(
    cx: &'a Cx,
    node: &'a mut CollectionNode,
    context: &'a ResolveContext,
) -> BoxOutcome<'a, ()> {
    Box::pin(async move {
        let results = &mut node.results;
        for child in node.children.iter_mut() {
            try_outcome!(assemble(cx, child, context).await);
            attach(child, results);
        }
        try_outcome!(
            reducer::evaluate(cx, &node.reducers, &node.reducer_order, results, context).await
        );
        Outcome::Ok(())
    })
}

/// Clone a child's matched rows into each parent row under the child's
/// output key. One-cardinality collapses to the first match or `null`;
/// many-cardinality always yields an array, possibly empty.
fn attach(child: &CollectionNode, parents: &mut [Document]) {
    let one = child.link.as_ref().is_some_and(|l| l.is_one());
    for (index, parent) in parents.iter_mut().enumerate() {
        let empty = Vec::new();
        let indices = child.matches.get(index).unwrap_or(&empty);
        let value = if one {
            indices
                .first()
                .and_then(|&i| child.results.get(i))
                .map_or(Value::Null, |doc| Value::Object(doc.clone()))
        } else {
            Value::Array(
                indices
                    .iter()
                    .filter_map(|&i| child.results.get(i))
                    .map(|doc| Value::Object(doc.clone()))
                    .collect(),
            )
        };
        parent.insert(child.output_key.clone(), value);
    }
}

/// Strip implicitly pulled-in keys from the assembled rows, top-down.
pub(crate) fn strip_rows(node: &CollectionNode, rows: &mut Vec<Document>) {
    for row in rows.iter_mut() {
        strip_doc(node, row);
    }
}

fn strip_doc(node: &CollectionNode, doc: &mut Document) {
    for child in &node.children {
        if !child.presence.is_kept() {
            doc.remove(&child.output_key);
            continue;
        }
        match doc.get_mut(&child.output_key) {
            Some(Value::Object(map)) => strip_doc(child, map),
            Some(Value::Array(items)) => {
                for item in items.iter_mut() {
                    if let Value::Object(map) = item {
                        strip_doc(child, map);
                    }
                }
            }
            _ => {}
        }
    }
    // All-fields mode keeps whole documents: join keys are real stored
    // fields there, so field stripping is skipped.
    if !node.all {
        for (name, field) in &node.fields {
            strip_field(name, field, doc);
        }
    }
    for reducer in &node.reducers {
        if !reducer.presence.is_kept() {
            doc.remove(&reducer.name);
        }
    }
}

fn strip_field(name: &str, field: &FieldNode, doc: &mut Document) {
    if !field.presence.is_kept() {
        doc.remove(name);
        return;
    }
    if field.children.is_empty() {
        return;
    }
    match doc.get_mut(name) {
        Some(Value::Object(map)) => {
            for (child_name, child) in &field.children {
                strip_field(child_name, child, map);
            }
        }
        Some(Value::Array(items)) => {
            for item in items.iter_mut() {
                if let Value::Object(map) = item {
                    for (child_name, child) in &field.children {
                        strip_field(child_name, child, map);
                    }
                }
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Presence;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn doc(value: Value) -> Document {
        value.as_object().cloned().expect("object literal")
    }

    fn field(presence: Presence) -> FieldNode {
        FieldNode {
            children: BTreeMap::new(),
            presence,
            projection: None,
        }
    }

    #[test]
    fn strip_removes_resolved_implicit_fields() {
        let mut fields = BTreeMap::new();
        fields.insert("title".to_string(), field(Presence::Explicit));
        fields.insert("author_id".to_string(), field(Presence::ImplicitResolved));

        let mut row = doc(json!({"title": "First", "author_id": 7}));
        for (name, f) in &fields {
            strip_field(name, f, &mut row);
        }
        assert!(row.contains_key("title"));
        assert!(!row.contains_key("author_id"));
    }

    #[test]
    fn strip_descends_into_nested_fields() {
        let mut profile = field(Presence::Explicit);
        profile
            .children
            .insert("city".to_string(), field(Presence::Explicit));
        profile
            .children
            .insert("payment_id".to_string(), field(Presence::ImplicitResolved));

        let mut row = doc(json!({"profile": {"city": "Paris", "payment_id": 9}}));
        strip_field("profile", &profile, &mut row);
        assert_eq!(row.get("profile"), Some(&json!({"city": "Paris"})));
    }

    #[test]
    fn strip_handles_array_valued_fields() {
        let mut entries = field(Presence::Explicit);
        entries
            .children
            .insert("kept".to_string(), field(Presence::Explicit));
        entries
            .children
            .insert("gone".to_string(), field(Presence::ImplicitResolved));

        let mut row = doc(json!({"entries": [{"kept": 1, "gone": 2}, {"kept": 3, "gone": 4}]}));
        strip_field("entries", &entries, &mut row);
        assert_eq!(
            row.get("entries"),
            Some(&json!([{"kept": 1}, {"kept": 3}]))
        );
    }
}
