//! Hypernova: relational query resolution for document stores.
//!
//! A declarative nested field-selection document (the "query body") turns
//! into an execution plan over any [`Collection`] backend and comes back
//! assembled into exactly the nested shape the caller requested:
//!
//! - **Links** declare relationships per collection (cardinality,
//!   direction, storage fields, filters) and are read-shared by every
//!   request.
//! - **The resolver** walks the tree level by level, choosing one of three
//!   join strategies per edge: recursive-per-parent, batched direct, or
//!   batched virtual.
//! - **Reducers** are computed fields evaluated in dependency order after
//!   assembly (or materialized store-side as pipeline stages).
//! - **Projection** strips everything that was fetched only to satisfy a
//!   join key or a reducer dependency.
//!
//! # Quick Start
//!
//! ```ignore
//! use hypernova::prelude::*;
//!
//! let mut catalog = Catalog::new();
//! catalog.add_collection(posts)?;
//! catalog.add_collection(users)?;
//! catalog.add_links("posts", [LinkSpec::one("author", "users")])?;
//!
//! let body = Body::try_from(json!({
//!     "title": 1,
//!     "author": {"name": 1}
//! }))?;
//!
//! let rows = catalog
//!     .resolve(&cx, "posts", &body, &ResolveContext::default())
//!     .await?;
//! ```

// Re-export the foundational types from the sub-crates.
pub use hypernova_core::{
    Budget, Cardinality, Collection, ConfigError, ConfigErrorKind, Cx, Document, Error,
    LinkDirection, LinkFilters, LinkSpec, LookupSpec, Outcome, QueryOptions, QueryRequest,
    RegionId, RequestError, RequestErrorKind, ResolveContext, Result, StoreError, TaskId,
    identity_key, key_values, path_get, path_set, validate_registered_name,
};
pub use hypernova_query::{
    Body, ConfigSource, NodeConfig, NormalizeParams, RESERVED_KEYS, Selector, apply_root_config,
    argument_at, deny, depth, enforce_limit, ensure_max_depth, intersect, merge_json, normalize,
};

pub mod catalog;
pub mod graph;
mod macros;
pub mod project;
pub mod reducer;
pub mod resolver;

pub use catalog::Catalog;
pub use graph::{CollectionNode, FieldNode, Presence, ReducerNode, build_root};
pub use reducer::{Reduce, ReducerKind, ReducerSpec, evaluation_order};

/// Commonly used types, importable in one line.
pub mod prelude {
    pub use crate::{
        Body, Cardinality, Catalog, Collection, Cx, Document, Error, LinkSpec, NodeConfig,
        Outcome, QueryOptions, QueryRequest, ReducerSpec, ResolveContext, Result,
    };
}
