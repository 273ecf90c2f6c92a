//! Core types and traits for Hypernova.
//!
//! This crate provides the foundational abstractions for relational query
//! resolution over document stores:
//!
//! - `Collection` trait for store-facing query handles
//! - `LinkSpec` relationship metadata (cardinality, direction, storage)
//! - `Document` model with dotted-path access and identity comparison
//! - `Outcome` re-export from asupersync for cancel-correct operations
//! - `Cx` context for structured concurrency

// Re-export asupersync primitives for structured concurrency
pub use asupersync::{Budget, Cx, Outcome, RegionId, TaskId};

pub mod collection;
pub mod document;
pub mod error;
pub mod link;

pub use collection::{Collection, LookupSpec, QueryOptions, QueryRequest, ResolveContext};
pub use document::{Document, identity_key, key_values, path_get, path_set};
pub use error::{
    ConfigError, ConfigErrorKind, Error, ReducerError, RequestError, RequestErrorKind, Result,
    StoreError,
};
pub use link::{Cardinality, LinkDirection, LinkFilters, LinkSpec, validate_registered_name};
