//! Query-body grammar and normalization for Hypernova.
//!
//! `hypernova-query` is the **request construction layer**. It defines the
//! recursive field-selection document (the "body") and the pure transforms
//! applied to it before graph construction.
//!
//! # Role In The Architecture
//!
//! - **Body grammar**: [`Body`]/[`Selector`] model nested selections,
//!   per-node `$` configuration, aliases and all-fields mode.
//! - **Normalizer**: deny-pruning, allow-list intersection, depth checks
//!   and limit clamping, each a standalone body-in/body-out helper.
//!
//! Bodies resolve through the engine in the `hypernova` facade crate.

pub mod body;
pub mod normalize;

pub use body::{Body, ConfigSource, NodeConfig, RESERVED_KEYS, Selector};
pub use normalize::{
    NormalizeParams, apply_root_config, argument_at, deny, depth, enforce_limit, ensure_max_depth,
    intersect, merge_json, normalize,
};
