//! The resolution graph: one tree per request, built from a body and the
//! catalog's registrations.
//!
//! Three node kinds: collection nodes (one per link reference, plus the
//! root), field nodes mirroring the nested projection, and reducer nodes
//! for computed fields. Every node carries a three-state presence flag
//! merged by a pure most-explicit-wins rule; whatever is still implicit
//! when the tree is sealed gets stripped by the final projection.

use crate::catalog::{Catalog, KeyKind};
use crate::reducer::{self, ReducerSpec};
use hypernova_core::error::ConfigErrorKind;
use hypernova_core::{Document, Error, LinkDirection, LinkSpec, Result};
use hypernova_query::{Body, ConfigSource, Selector};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Why a node exists in the tree.
///
/// Merging on re-encounter is most-explicit-wins: an explicit request can
/// widen an implicit node, never the reverse. `ImplicitPending` may still
/// be widened during construction; sealing turns the survivors into
/// `ImplicitResolved`, the state the final projection strips.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Presence {
    /// Confirmed implicit; stripped from output.
    ImplicitResolved,
    /// Pulled in to satisfy a join key or reducer dependency; not yet
    /// confirmed.
    ImplicitPending,
    /// Requested directly by the caller.
    Explicit,
}

impl Presence {
    /// Most-explicit-wins merge.
    #[must_use]
    pub fn merge(self, other: Self) -> Self {
        self.max(other)
    }

    /// Does this presence survive the final projection?
    #[must_use]
    pub fn is_kept(self) -> bool {
        self == Presence::Explicit
    }

    fn seal(self) -> Self {
        match self {
            Presence::ImplicitPending => Presence::ImplicitResolved,
            other => other,
        }
    }
}

/// One node of the nested projection tree.
#[derive(Debug, Clone)]
pub struct FieldNode {
    /// Subfields, keyed by name; empty for leaves.
    pub children: BTreeMap<String, FieldNode>,
    /// Keep/strip state.
    pub presence: Presence,
    /// Projection-operator payload forwarded to the store verbatim.
    pub projection: Option<Value>,
}

impl FieldNode {
    fn new(presence: Presence) -> Self {
        Self {
            children: BTreeMap::new(),
            presence,
            projection: None,
        }
    }

    fn seal(&mut self) {
        self.presence = self.presence.seal();
        for child in self.children.values_mut() {
            child.seal();
        }
    }
}

/// A computed-field reference at one collection level.
#[derive(Debug, Clone)]
pub struct ReducerNode {
    /// Output key (normally the reducer's registered name).
    pub name: String,
    /// The registered spec.
    pub spec: Arc<ReducerSpec>,
    /// Sibling reducers this one must wait for.
    pub depends_on: Vec<String>,
    /// Keep/strip state.
    pub presence: Presence,
    /// Arguments from the request's `{$: {...}}` wrapper.
    pub args: Value,
}

/// One collection level of the resolution tree.
///
/// The root has no link; every other node has exactly one. `results` and
/// `matches` are filled by the resolver: `matches[i]` lists indices into
/// `results` for the i-th parent row.
#[derive(Debug)]
pub struct CollectionNode {
    /// Collection this node fetches from.
    pub collection: String,
    /// Identity field of that collection.
    pub identity_field: String,
    /// Key the results attach under in the parent rows (empty for root).
    pub output_key: String,
    /// The link that created this node; `None` only for the root.
    pub link: Option<LinkSpec>,
    /// Dotted path on the parent rows holding this node's join key.
    pub parent_key_field: String,
    /// Dotted path on this node's rows the join key refers to.
    pub child_key_field: String,
    /// Child collection nodes, one per referenced link key.
    pub children: Vec<CollectionNode>,
    /// Nested projection at this level.
    pub fields: BTreeMap<String, FieldNode>,
    /// Computed fields at this level.
    pub reducers: Vec<ReducerNode>,
    /// Topological evaluation order over `reducers`.
    pub reducer_order: Vec<usize>,
    /// Per-node `$` configuration.
    pub config: Option<ConfigSource>,
    /// All-fields mode: no store projection, no field stripping.
    pub all: bool,
    /// Keep/strip state of the whole node.
    pub presence: Presence,
    /// Fetched (and later assembled) rows.
    pub results: Vec<Document>,
    /// Parent-row index to result indices, aligned with the parent's rows.
    pub matches: Vec<Vec<usize>>,
    /// Expanders already applied at this node.
    expanded: BTreeSet<String>,
}

impl CollectionNode {
    fn new(
        catalog: &Catalog,
        collection: &str,
        output_key: String,
        link: Option<LinkSpec>,
        presence: Presence,
    ) -> Result<Self> {
        let identity_field = catalog.collection(collection)?.identity_field().to_string();
        Ok(Self {
            collection: collection.to_string(),
            identity_field,
            output_key,
            link,
            parent_key_field: String::new(),
            child_key_field: String::new(),
            children: Vec::new(),
            fields: BTreeMap::new(),
            reducers: Vec::new(),
            reducer_order: Vec::new(),
            config: None,
            all: false,
            presence,
            results: Vec::new(),
            matches: Vec::new(),
            expanded: BTreeSet::new(),
        })
    }

    /// The child node attached under `key`, if any.
    #[must_use]
    pub fn child(&self, key: &str) -> Option<&CollectionNode> {
        self.children.iter().find(|c| c.output_key == key)
    }

    /// The reducer node named `name`, if any.
    #[must_use]
    pub fn reducer(&self, name: &str) -> Option<&ReducerNode> {
        self.reducers.iter().find(|r| r.name == name)
    }

    fn ingest(&mut self, catalog: &Catalog, body: &Body, presence: Presence) -> Result<()> {
        if body.is_all() {
            self.all = true;
        }
        if let Some(source) = body.config_source() {
            if presence == Presence::Explicit || self.config.is_none() {
                self.config = Some(source.clone());
            }
        }
        for (key, selector) in body.iter() {
            self.ingest_entry(catalog, key, selector, presence)?;
        }
        Ok(())
    }

    fn ingest_entry(
        &mut self,
        catalog: &Catalog,
        key: &str,
        selector: &Selector,
        presence: Presence,
    ) -> Result<()> {
        let alias = match selector {
            Selector::Sub(sub) => sub.alias_target(),
            _ => None,
        };
        let lookup_key = alias.unwrap_or(key);
        let kind = catalog.classify(
            &self.collection,
            lookup_key,
            self.expanded.contains(lookup_key),
        );
        match kind {
            KeyKind::Link(spec) => self.ingest_link(catalog, key, &spec, selector, presence),
            KeyKind::Reducer(spec) => self.ingest_reducer(catalog, key, &spec, selector, presence),
            KeyKind::Expander(expansion) => {
                self.expanded.insert(lookup_key.to_string());
                self.ingest(catalog, &expansion, presence)
            }
            KeyKind::Field => {
                if alias.is_some() {
                    return Err(Error::config(
                        ConfigErrorKind::UnknownLink,
                        format!(
                            "`$alias` target '{lookup_key}' is not a link on '{}'",
                            self.collection
                        ),
                    ));
                }
                self.ingest_field(key, selector, presence);
                Ok(())
            }
        }
    }

    fn ingest_link(
        &mut self,
        catalog: &Catalog,
        output_key: &str,
        spec: &LinkSpec,
        selector: &Selector,
        presence: Presence,
    ) -> Result<()> {
        let sub_body = match selector {
            Selector::Sub(body) => body.clone(),
            // `link: 1` fetches the link with its identity only.
            Selector::Include => Body::new(),
            Selector::Operator(_) => {
                self.ingest_field(output_key, selector, presence);
                return Ok(());
            }
        };

        // Wire both sides' join keys as deletable field nodes: always
        // fetched, stripped from output unless explicitly requested too.
        let (parent_field, child_field) = match spec.direction {
            LinkDirection::Direct => {
                let foreign = match &spec.foreign_storage_field {
                    Some(path) => path.clone(),
                    None => catalog.collection(&spec.target)?.identity_field().to_string(),
                };
                (spec.storage_field_or_default(), foreign)
            }
            LinkDirection::Virtual => {
                let counterpart = catalog.direct_counterpart(spec)?;
                let parent_side = match &counterpart.foreign_storage_field {
                    Some(path) => path.clone(),
                    None => self.identity_field.clone(),
                };
                (parent_side, counterpart.storage_field_or_default())
            }
        };
        insert_field(&mut self.fields, &parent_field, Presence::ImplicitPending, None);

        if let Some(child) = self
            .children
            .iter_mut()
            .find(|c| c.output_key == output_key)
        {
            child.presence = child.presence.merge(presence);
            child.ingest(catalog, &sub_body, presence)?;
            insert_field(&mut child.fields, &child_field, Presence::ImplicitPending, None);
            return Ok(());
        }

        let mut child = CollectionNode::new(
            catalog,
            &spec.target,
            output_key.to_string(),
            Some(spec.clone()),
            presence,
        )?;
        child.parent_key_field = parent_field;
        child.child_key_field = child_field.clone();
        child.ingest(catalog, &sub_body, presence)?;
        insert_field(&mut child.fields, &child_field, Presence::ImplicitPending, None);
        self.children.push(child);
        Ok(())
    }

    fn ingest_reducer(
        &mut self,
        catalog: &Catalog,
        output_key: &str,
        spec: &Arc<ReducerSpec>,
        selector: &Selector,
        presence: Presence,
    ) -> Result<()> {
        let args = match selector {
            Selector::Sub(sub) => sub
                .config_source()
                .and_then(ConfigSource::as_static)
                .map_or(Value::Null, |config| Value::Object(config.args.clone())),
            _ => Value::Null,
        };

        if let Some(existing) = self.reducers.iter_mut().find(|r| r.name == output_key) {
            existing.presence = existing.presence.merge(presence);
            if !args.is_null() {
                existing.args = args;
            }
            // Dependencies were spread on first reference.
            return Ok(());
        }

        self.reducers.push(ReducerNode {
            name: output_key.to_string(),
            spec: Arc::clone(spec),
            depends_on: Vec::new(),
            presence,
            args,
        });
        let index = self.reducers.len() - 1;

        let dependency = spec.dependency.clone();
        for (dep_key, dep_selector) in dependency.iter() {
            // Self-shadowing: a dependency named after the reducer itself
            // is the raw stored field the reducer refines in place. It
            // keeps the reducer's own presence and bypasses classification
            // (which would otherwise see the reducer again).
            if dep_key == spec.name {
                self.ingest_field(dep_key, dep_selector, presence);
                continue;
            }
            match catalog.classify(&self.collection, dep_key, self.expanded.contains(dep_key)) {
                KeyKind::Reducer(dep_spec) => {
                    self.reducers[index].depends_on.push(dep_key.to_string());
                    self.ingest_reducer(
                        catalog,
                        dep_key,
                        &dep_spec,
                        dep_selector,
                        Presence::ImplicitPending,
                    )?;
                }
                _ => {
                    self.ingest_entry(catalog, dep_key, dep_selector, Presence::ImplicitPending)?;
                }
            }
        }
        Ok(())
    }

    fn ingest_field(&mut self, key: &str, selector: &Selector, presence: Presence) {
        match selector {
            Selector::Include => insert_field(&mut self.fields, key, presence, None),
            Selector::Operator(payload) => {
                insert_field(&mut self.fields, key, presence, Some(payload.clone()));
            }
            Selector::Sub(body) => ingest_field_body(&mut self.fields, key, body, presence),
        }
    }

    fn finalize(&mut self) -> Result<()> {
        // A level that ends with no explicitly requested fields (and is not
        // in all-fields mode) gets the identity field injected and kept.
        if !self.all && !self.fields.values().any(|f| f.presence == Presence::Explicit) {
            let identity = self.identity_field.clone();
            insert_field(&mut self.fields, &identity, Presence::Explicit, None);
        }
        // The identity is always fetched (result de-duplication needs it),
        // so it must sit in the tree to be stripped when not requested.
        let identity = self.identity_field.clone();
        insert_field(&mut self.fields, &identity, Presence::ImplicitPending, None);
        self.reducer_order = reducer::evaluation_order(&self.reducers)?;
        for child in &mut self.children {
            child.finalize()?;
        }
        Ok(())
    }

    /// Resolve every remaining pending flag to its final state.
    pub fn seal(&mut self) {
        self.presence = self.presence.seal();
        for field in self.fields.values_mut() {
            field.seal();
        }
        for reducer in &mut self.reducers {
            reducer.presence = reducer.presence.seal();
        }
        for child in &mut self.children {
            child.seal();
        }
    }
}

/// Insert a (possibly dotted) field path, most-explicit-wins on re-encounter.
fn insert_field(
    fields: &mut BTreeMap<String, FieldNode>,
    path: &str,
    presence: Presence,
    projection: Option<Value>,
) {
    match path.split_once('.') {
        None => {
            let node = fields
                .entry(path.to_string())
                .or_insert_with(|| FieldNode::new(presence));
            node.presence = node.presence.merge(presence);
            if projection.is_some() {
                node.projection = projection;
            }
        }
        Some((head, rest)) => {
            let node = fields
                .entry(head.to_string())
                .or_insert_with(|| FieldNode::new(presence));
            node.presence = node.presence.merge(presence);
            insert_field(&mut node.children, rest, presence, projection);
        }
    }
}

/// Merge a nested field selection (`address: {city: 1}`) into the tree.
fn ingest_field_body(
    fields: &mut BTreeMap<String, FieldNode>,
    key: &str,
    body: &Body,
    presence: Presence,
) {
    insert_field(fields, key, presence, None);
    let Some(node) = fields.get_mut(key) else {
        return;
    };
    for (sub_key, selector) in body.iter() {
        match selector {
            Selector::Include => insert_field(&mut node.children, sub_key, presence, None),
            Selector::Operator(payload) => {
                insert_field(&mut node.children, sub_key, presence, Some(payload.clone()));
            }
            Selector::Sub(sub) => ingest_field_body(&mut node.children, sub_key, sub, presence),
        }
    }
}

/// Build the resolution tree for one request.
pub fn build_root(catalog: &Catalog, collection: &str, body: &Body) -> Result<CollectionNode> {
    let mut root = CollectionNode::new(
        catalog,
        collection,
        String::new(),
        None,
        Presence::Explicit,
    )?;
    root.ingest(catalog, body, Presence::Explicit)?;
    root.finalize()?;
    Ok(root)
}
