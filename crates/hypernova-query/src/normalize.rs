//! Pure, synchronous body-in/body-out transforms.
//!
//! These run before graph construction, in a fixed order: caller
//! filters/options merge into the root `$`, a side body is deep-merged,
//! depth is checked, denied paths are pruned, the result is intersected
//! against an allow-list, and the root limit is clamped. Each helper is
//! also usable on its own.

use crate::body::{Body, ConfigSource, NodeConfig, Selector};
use hypernova_core::error::{Error, RequestErrorKind, Result};
use hypernova_core::QueryOptions;
use serde_json::Value;
use tracing::trace;

/// Everything the normalizer may apply to an incoming body.
#[derive(Default)]
pub struct NormalizeParams<'a> {
    /// Caller filters merged into the root `$`.
    pub filters: Option<Value>,
    /// Caller options merged into the root `$`.
    pub options: Option<QueryOptions>,
    /// Forced sub-queries deep-merged into the body.
    pub side_body: Option<&'a Body>,
    /// Maximum allowed nesting depth.
    pub max_depth: Option<usize>,
    /// Dotted paths removed from the body.
    pub deny: &'a [String],
    /// Allow-list body the request is intersected against.
    pub intersect: Option<&'a Body>,
    /// Maximum (and default) root `options.limit`.
    pub max_limit: Option<u64>,
}

/// Run the full normalization pipeline over a body.
pub fn normalize(mut body: Body, params: &NormalizeParams<'_>) -> Result<Body> {
    apply_root_config(&mut body, params.filters.clone(), params.options.clone())?;
    if let Some(side) = params.side_body {
        body.merge_from(side);
    }
    if let Some(max) = params.max_depth {
        ensure_max_depth(&body, max)?;
    }
    if !params.deny.is_empty() {
        deny(&mut body, params.deny);
    }
    if let Some(allowed) = params.intersect {
        body = intersect(&body, allowed);
    }
    if let Some(max) = params.max_limit {
        enforce_limit(&mut body, max);
    }
    Ok(body)
}

/// Merge caller filters/options into the root `$`.
///
/// Static caller filters cannot be combined with a *functional* root `$`:
/// the function would silently shadow them, so the combination is rejected.
pub fn apply_root_config(
    body: &mut Body,
    filters: Option<Value>,
    options: Option<QueryOptions>,
) -> Result<()> {
    if filters.is_none() && options.is_none() {
        return Ok(());
    }

    let mut config = match body.config_source() {
        Some(ConfigSource::PerParent(_)) => {
            if filters.is_some() {
                return Err(Error::request(
                    RequestErrorKind::ConflictingFilters,
                    "static filters cannot be combined with a functional root `$`",
                ));
            }
            // Options alone cannot be merged into a function either.
            return Err(Error::request(
                RequestErrorKind::ConflictingFilters,
                "caller options cannot be combined with a functional root `$`",
            ));
        }
        Some(ConfigSource::Static(config)) => config.clone(),
        None => NodeConfig::default(),
    };

    if let Some(incoming) = filters {
        match &mut config.filters {
            Some(existing) => merge_json(existing, &incoming),
            None => config.filters = Some(incoming),
        }
    }
    if let Some(incoming) = options {
        if incoming.sort.is_some() {
            config.options.sort = incoming.sort;
        }
        if incoming.limit.is_some() {
            config.options.limit = incoming.limit;
        }
        if incoming.skip.is_some() {
            config.options.skip = incoming.skip;
        }
        if incoming.projection.is_some() {
            config.options.projection = incoming.projection;
        }
    }
    body.set_config_source(Some(ConfigSource::Static(config)));
    Ok(())
}

/// Nesting depth of a body: `1` for a flat level, otherwise one more than
/// the deepest sub-body.
#[must_use]
pub fn depth(body: &Body) -> usize {
    let deepest = body
        .iter()
        .filter_map(|(_, selector)| match selector {
            Selector::Sub(sub) => Some(depth(sub)),
            Selector::Include | Selector::Operator(_) => None,
        })
        .max();
    match deepest {
        Some(d) => 1 + d,
        None => 1,
    }
}

/// Reject bodies nested deeper than `max`.
pub fn ensure_max_depth(body: &Body, max: usize) -> Result<()> {
    let actual = depth(body);
    if actual > max {
        return Err(Error::request(
            RequestErrorKind::DepthExceeded,
            format!("body depth {actual} exceeds maximum {max}"),
        ));
    }
    Ok(())
}

/// Remove denied dotted paths, pruning emptied sub-bodies bottom-up.
pub fn deny<S: AsRef<str>>(body: &mut Body, paths: &[S]) {
    for path in paths {
        trace!(path = path.as_ref(), "denying body path");
        deny_path(body, path.as_ref());
    }
}

fn deny_path(body: &mut Body, path: &str) {
    match path.split_once('.') {
        None => {
            body.remove(path);
        }
        Some((head, rest)) => {
            if let Some(Selector::Sub(sub)) = body.get_mut(head) {
                deny_path(sub, rest);
                if sub.is_empty() {
                    body.remove(head);
                }
            }
        }
    }
}

/// Intersect a requested body against an allow-list body.
///
/// A key survives only if present on both sides. Terminal selectors
/// (`1`/`true`, operator objects, `{}`, argument wrappers with no other
/// keys) survive without recursing; two sub-bodies intersect recursively,
/// and a non-terminal intersection that comes back empty is dropped.
/// All-fields mode survives only if both sides request it.
#[must_use]
pub fn intersect(requested: &Body, allowed: &Body) -> Body {
    let mut result = Body::new();
    for (key, selector) in requested.iter() {
        let Some(granted) = allowed.get(key) else {
            continue;
        };
        if granted.is_terminal() || selector.is_terminal() {
            result.insert(key, selector.clone());
            continue;
        }
        if let (Selector::Sub(req_sub), Selector::Sub(allow_sub)) = (selector, granted) {
            let sub = intersect(req_sub, allow_sub);
            if !sub.is_empty() {
                result.insert(key, Selector::Sub(sub));
            }
        }
    }
    result.set_config_source(requested.config_source().cloned());
    if let Some(alias) = requested.alias_target() {
        result = result.alias(alias);
    }
    if requested.is_all() && allowed.is_all() {
        result = result.all(true);
    }
    if let Some(schema) = requested.schema() {
        result = result.with_schema(schema.clone());
    }
    if let Some(context) = requested.context() {
        result = result.with_context(context.clone());
    }
    result
}

/// Clamp the root `options.limit` to `max`, defaulting it in when absent.
pub fn enforce_limit(body: &mut Body, max: u64) {
    let mut config = match body.config_source() {
        Some(ConfigSource::Static(config)) => config.clone(),
        // A functional root `$` owns its options; the clamp applies to the
        // resolved config at fetch time instead.
        Some(ConfigSource::PerParent(_)) => return,
        None => NodeConfig::default(),
    };
    config.options.limit = Some(match config.options.limit {
        Some(limit) => limit.min(max),
        None => max,
    });
    body.set_config_source(Some(ConfigSource::Static(config)));
}

/// Look up the static argument config (`{$: {...}}`) at a dotted path.
///
/// Returns `None` when the path is missing, crosses a non-sub selector, or
/// the node carries a per-parent config function.
#[must_use]
pub fn argument_at<'a>(body: &'a Body, path: &str) -> Option<&'a NodeConfig> {
    match path.split_once('.') {
        None => match body.get(path)? {
            Selector::Sub(sub) => sub.config_source()?.as_static(),
            Selector::Include | Selector::Operator(_) => None,
        },
        Some((head, rest)) => match body.get(head)? {
            Selector::Sub(sub) => argument_at(sub, rest),
            Selector::Include | Selector::Operator(_) => None,
        },
    }
}

/// Deep-merge JSON value `incoming` into `target`.
///
/// Objects merge key-wise; any other shape is overwritten by `incoming`.
pub fn merge_json(target: &mut Value, incoming: &Value) {
    match (target, incoming) {
        (Value::Object(target_map), Value::Object(incoming_map)) => {
            for (key, value) in incoming_map {
                match target_map.get_mut(key) {
                    Some(existing) => merge_json(existing, value),
                    None => {
                        target_map.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (target, incoming) => *target = incoming.clone(),
    }
}
