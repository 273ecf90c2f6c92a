//! The catalog: collection handles plus their registered links, reducers
//! and expanders.
//!
//! Registration happens once at setup and fails fast on name collisions;
//! afterwards the catalog is read-shared by every concurrent resolution.
//! Mutation during a live query is excluded by construction: registration
//! takes `&mut self`, resolution takes `&self`.

use crate::graph;
use crate::macros::{try_outcome, try_result};
use crate::project;
use crate::reducer::ReducerSpec;
use crate::resolver;
use asupersync::{Cx, Outcome};
use hypernova_core::error::ConfigErrorKind;
use hypernova_core::{
    Collection, Document, Error, LinkDirection, LinkSpec, ResolveContext, Result,
    validate_registered_name,
};
use hypernova_query::{Body, enforce_limit};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// How a body key classifies at one collection level.
///
/// Classification runs once per key, in this priority order, keeping
/// registry lookups out of the tree-building control flow.
#[derive(Debug, Clone)]
pub(crate) enum KeyKind {
    /// A registered link: becomes a child collection node.
    Link(LinkSpec),
    /// A registered reducer: becomes a reducer node, dependencies spread.
    Reducer(Arc<ReducerSpec>),
    /// A registered expander: its canned sub-body deep-merges in place.
    Expander(Body),
    /// Anything else: a stored field.
    Field,
}

/// The resolution engine's registry and entry point.
#[derive(Default)]
pub struct Catalog {
    collections: BTreeMap<String, Arc<dyn Collection>>,
    links: BTreeMap<String, BTreeMap<String, LinkSpec>>,
    reducers: BTreeMap<String, BTreeMap<String, Arc<ReducerSpec>>>,
    expanders: BTreeMap<String, BTreeMap<String, Body>>,
}

impl Catalog {
    /// Create an empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a collection handle under its own name.
    pub fn add_collection(&mut self, handle: Arc<dyn Collection>) -> Result<()> {
        let name = handle.name().to_string();
        if self.collections.contains_key(&name) {
            return Err(Error::config(
                ConfigErrorKind::NameCollision,
                format!("collection '{name}' is already registered"),
            ));
        }
        self.collections.insert(name, handle);
        Ok(())
    }

    /// Register links on a collection.
    ///
    /// Fails when a link name collides with an existing link, reducer,
    /// expander or declared stored field. The *target* collection may be
    /// registered later: virtual links resolve their direct counterpart
    /// lazily at query time.
    pub fn add_links<I>(&mut self, collection: &str, specs: I) -> Result<()>
    where
        I: IntoIterator<Item = LinkSpec>,
    {
        let stored = self.collection(collection)?.field_names();
        for spec in specs {
            validate_registered_name("link", &spec.name)?;
            self.check_collision(collection, &spec.name, &stored, "link")?;
            if spec.direction == LinkDirection::Virtual && spec.inversed_by.is_none() {
                return Err(Error::config(
                    ConfigErrorKind::MissingInverse,
                    format!(
                        "virtual link '{}.{}' declares no `inversed_by`",
                        collection, spec.name
                    ),
                ));
            }
            self.links
                .entry(collection.to_string())
                .or_default()
                .insert(spec.name.clone(), spec);
        }
        Ok(())
    }

    /// Register reducers on a collection.
    ///
    /// A reducer name may shadow a stored field (self-shadowing is how a
    /// reducer refines the raw value), but never a link or expander.
    pub fn add_reducers<I>(&mut self, collection: &str, specs: I) -> Result<()>
    where
        I: IntoIterator<Item = ReducerSpec>,
    {
        self.collection(collection)?;
        for spec in specs {
            validate_registered_name("reducer", &spec.name)?;
            if self.link_exists(collection, &spec.name) {
                return Err(Error::config(
                    ConfigErrorKind::NameCollision,
                    format!(
                        "reducer '{}' collides with a link on '{}'",
                        spec.name, collection
                    ),
                ));
            }
            if self.expander_exists(collection, &spec.name)
                || self.reducer_exists(collection, &spec.name)
            {
                return Err(Error::config(
                    ConfigErrorKind::NameCollision,
                    format!(
                        "reducer '{}' is already registered on '{}'",
                        spec.name, collection
                    ),
                ));
            }
            self.reducers
                .entry(collection.to_string())
                .or_default()
                .insert(spec.name.clone(), Arc::new(spec));
        }
        Ok(())
    }

    /// Register a body expander (macro) on a collection.
    pub fn add_expander(
        &mut self,
        collection: &str,
        name: impl Into<String>,
        expansion: Body,
    ) -> Result<()> {
        self.collection(collection)?;
        let name = name.into();
        validate_registered_name("expander", &name)?;
        if self.link_exists(collection, &name)
            || self.reducer_exists(collection, &name)
            || self.expander_exists(collection, &name)
        {
            return Err(Error::config(
                ConfigErrorKind::NameCollision,
                format!("expander '{name}' collides with a registration on '{collection}'"),
            ));
        }
        self.expanders
            .entry(collection.to_string())
            .or_default()
            .insert(name, expansion);
        Ok(())
    }

    /// Look up a collection handle.
    pub fn collection(&self, name: &str) -> Result<&Arc<dyn Collection>> {
        self.collections.get(name).ok_or_else(|| {
            Error::config(
                ConfigErrorKind::UnknownCollection,
                format!("collection '{name}' is not registered"),
            )
        })
    }

    /// Look up a link by collection and name.
    pub fn link(&self, collection: &str, name: &str) -> Result<&LinkSpec> {
        self.links
            .get(collection)
            .and_then(|links| links.get(name))
            .ok_or_else(|| {
                Error::config(
                    ConfigErrorKind::UnknownLink,
                    format!("link '{name}' not found on collection '{collection}'"),
                )
            })
    }

    /// Resolve the direct counterpart of a virtual link.
    ///
    /// Declaration order across the two collections is unconstrained, so
    /// this resolves lazily and fails fast with a descriptive error when
    /// the direct side is missing.
    pub fn direct_counterpart(&self, link: &LinkSpec) -> Result<LinkSpec> {
        let inversed_by = link.inversed_by.as_deref().ok_or_else(|| {
            Error::config(
                ConfigErrorKind::MissingInverse,
                format!("virtual link '{}' declares no `inversed_by`", link.name),
            )
        })?;
        let counterpart = self
            .links
            .get(&link.target)
            .and_then(|links| links.get(inversed_by))
            .ok_or_else(|| {
                Error::config(
                    ConfigErrorKind::MissingInverse,
                    format!(
                        "virtual link '{}' points at '{}.{}', which is not registered",
                        link.name, link.target, inversed_by
                    ),
                )
            })?;
        if counterpart.is_virtual() {
            return Err(Error::config(
                ConfigErrorKind::MissingInverse,
                format!(
                    "virtual link '{}' points at '{}.{}', which is itself virtual",
                    link.name, link.target, inversed_by
                ),
            ));
        }
        Ok(counterpart.clone())
    }

    /// Classify one body key at a collection level.
    ///
    /// Priority: link, then reducer, then expander, then field. Expanders
    /// already expanded at this node (`skip_expander`) fall through to
    /// field so a re-introduced same-name key stays explicit.
    pub(crate) fn classify(&self, collection: &str, key: &str, skip_expander: bool) -> KeyKind {
        if let Some(spec) = self.links.get(collection).and_then(|m| m.get(key)) {
            return KeyKind::Link(spec.clone());
        }
        if let Some(spec) = self.reducers.get(collection).and_then(|m| m.get(key)) {
            return KeyKind::Reducer(Arc::clone(spec));
        }
        if !skip_expander {
            if let Some(expansion) = self.expanders.get(collection).and_then(|m| m.get(key)) {
                return KeyKind::Expander(expansion.clone());
            }
        }
        KeyKind::Field
    }

    /// Resolve a body against a collection and return the assembled rows.
    pub async fn resolve(
        &self,
        cx: &Cx,
        collection: &str,
        body: &Body,
        context: &ResolveContext,
    ) -> Outcome<Vec<Document>, Error> {
        debug!(collection, "resolving query body");
        let mut root = try_result!(graph::build_root(self, collection, body));
        try_outcome!(resolver::fetch_tree(cx, self, &mut root, context).await);
        try_outcome!(project::assemble(cx, &mut root, context).await);
        root.seal();
        let mut rows = std::mem::take(&mut root.results);
        project::strip_rows(&root, &mut rows);
        Outcome::Ok(rows)
    }

    /// Resolve with the root limit clamped to one, returning the first row.
    pub async fn resolve_one(
        &self,
        cx: &Cx,
        collection: &str,
        body: &Body,
        context: &ResolveContext,
    ) -> Outcome<Option<Document>, Error> {
        let mut body = body.clone();
        enforce_limit(&mut body, 1);
        let rows = try_outcome!(self.resolve(cx, collection, &body, context).await);
        Outcome::Ok(rows.into_iter().next())
    }

    fn link_exists(&self, collection: &str, name: &str) -> bool {
        self.links
            .get(collection)
            .is_some_and(|m| m.contains_key(name))
    }

    fn reducer_exists(&self, collection: &str, name: &str) -> bool {
        self.reducers
            .get(collection)
            .is_some_and(|m| m.contains_key(name))
    }

    fn expander_exists(&self, collection: &str, name: &str) -> bool {
        self.expanders
            .get(collection)
            .is_some_and(|m| m.contains_key(name))
    }

    fn check_collision(
        &self,
        collection: &str,
        name: &str,
        stored_fields: &[String],
        what: &str,
    ) -> Result<()> {
        if self.link_exists(collection, name)
            || self.reducer_exists(collection, name)
            || self.expander_exists(collection, name)
        {
            return Err(Error::config(
                ConfigErrorKind::NameCollision,
                format!("{what} '{name}' is already registered on '{collection}'"),
            ));
        }
        if stored_fields.iter().any(|f| f == name) {
            return Err(Error::config(
                ConfigErrorKind::NameCollision,
                format!("{what} '{name}' collides with a stored field on '{collection}'"),
            ));
        }
        Ok(())
    }
}
