//! The recursive field-selection document ("query body").
//!
//! A body maps field names to selectors: `1`/`true` scalars, nested
//! sub-bodies, projection-operator passthrough objects, or argument
//! wrappers `{$: {...}}`. The reserved `$` key carries per-node filters,
//! options and pipeline stages, and may be a function of the parent row.
//! Bodies are built once per request and cloned defensively by the engine.

use hypernova_core::error::{Error, RequestErrorKind, Result};
use hypernova_core::{Document, QueryOptions};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Reserved body keys, skipped during classification.
pub const RESERVED_KEYS: &[&str] = &["$", "$alias", "$all", "$schema", "$context"];

/// Per-node fetch configuration carried under the `$` key.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeConfig {
    /// Filter document merged into the fetch.
    pub filters: Option<Value>,
    /// Sort/limit/skip for the fetch.
    pub options: QueryOptions,
    /// Store-native pipeline stages appended to the fetch.
    pub pipeline: Vec<Value>,
    /// Any other `$` keys: free-form arguments handed to reducers.
    pub args: Map<String, Value>,
}

impl NodeConfig {
    /// Config carrying only filters.
    #[must_use]
    pub fn filtered(filters: Value) -> Self {
        Self {
            filters: Some(filters),
            ..Self::default()
        }
    }

    /// Config carrying only options.
    #[must_use]
    pub fn with_options(options: QueryOptions) -> Self {
        Self {
            options,
            ..Self::default()
        }
    }
}

/// The `$` key: a static config or a function of the parent row.
#[derive(Clone)]
pub enum ConfigSource {
    /// One config shared by every parent at this level.
    Static(NodeConfig),
    /// Dynamic per-parent config; forces the recursive-per-parent strategy.
    PerParent(Arc<dyn Fn(&Document) -> NodeConfig + Send + Sync>),
}

impl ConfigSource {
    /// Resolve against a parent row (the root resolves with an empty row).
    #[must_use]
    pub fn resolve(&self, parent: &Document) -> NodeConfig {
        match self {
            ConfigSource::Static(config) => config.clone(),
            ConfigSource::PerParent(f) => f(parent),
        }
    }

    /// Is this config a function of the parent row?
    #[must_use]
    pub fn is_per_parent(&self) -> bool {
        matches!(self, ConfigSource::PerParent(_))
    }

    /// The static config, if this source is not per-parent.
    #[must_use]
    pub fn as_static(&self) -> Option<&NodeConfig> {
        match self {
            ConfigSource::Static(config) => Some(config),
            ConfigSource::PerParent(_) => None,
        }
    }
}

impl fmt::Debug for ConfigSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigSource::Static(config) => f.debug_tuple("Static").field(config).finish(),
            ConfigSource::PerParent(_) => f.debug_tuple("PerParent").field(&"<fn>").finish(),
        }
    }
}

impl PartialEq for ConfigSource {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (ConfigSource::Static(a), ConfigSource::Static(b)) => a == b,
            (ConfigSource::PerParent(a), ConfigSource::PerParent(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

/// One entry of a body.
#[derive(Debug, Clone, PartialEq)]
pub enum Selector {
    /// `1` / `true`: fetch the field as stored.
    Include,
    /// Nested sub-body (links, nested field selections, argument wrappers).
    Sub(Body),
    /// Projection-operator object evaluated by the store at fetch time and
    /// passed through assembly unchanged.
    Operator(Value),
}

impl Selector {
    /// Terminal selectors survive intersection without recursing:
    /// `1`/`true`, operator objects, `{}` and argument wrappers with no
    /// other keys.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        match self {
            Selector::Include | Selector::Operator(_) => true,
            Selector::Sub(body) => body.fields.is_empty(),
        }
    }
}

/// A nested field-selection document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Body {
    fields: BTreeMap<String, Selector>,
    config: Option<ConfigSource>,
    alias: Option<String>,
    all: bool,
    schema: Option<Value>,
    context: Option<Value>,
}

impl Body {
    /// Create an empty body.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a stored field.
    #[must_use]
    pub fn field(mut self, name: impl Into<String>) -> Self {
        self.fields.insert(name.into(), Selector::Include);
        self
    }

    /// Request several stored fields.
    #[must_use]
    pub fn with_fields<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for name in names {
            self.fields.insert(name.into(), Selector::Include);
        }
        self
    }

    /// Attach a nested sub-body (a link, a nested selection, a reducer
    /// argument wrapper).
    #[must_use]
    pub fn nest(mut self, name: impl Into<String>, body: Body) -> Self {
        self.fields.insert(name.into(), Selector::Sub(body));
        self
    }

    /// Attach a projection-operator passthrough field.
    #[must_use]
    pub fn operator(mut self, name: impl Into<String>, operator: Value) -> Self {
        self.fields.insert(name.into(), Selector::Operator(operator));
        self
    }

    /// Set the static `$` config.
    #[must_use]
    pub fn config(mut self, config: NodeConfig) -> Self {
        self.config = Some(ConfigSource::Static(config));
        self
    }

    /// Set a per-parent `$` config function.
    #[must_use]
    pub fn config_fn<F>(mut self, f: F) -> Self
    where
        F: Fn(&Document) -> NodeConfig + Send + Sync + 'static,
    {
        self.config = Some(ConfigSource::PerParent(Arc::new(f)));
        self
    }

    /// Re-fetch a link registered under `link_name` beneath this key.
    #[must_use]
    pub fn alias(mut self, link_name: impl Into<String>) -> Self {
        self.alias = Some(link_name.into());
        self
    }

    /// Skip projection: fetch and return whole documents at this level.
    #[must_use]
    pub fn all(mut self, value: bool) -> Self {
        self.all = value;
        self
    }

    /// Attach a `$schema` passthrough payload.
    #[must_use]
    pub fn with_schema(mut self, schema: Value) -> Self {
        self.schema = Some(schema);
        self
    }

    /// Attach a `$context` passthrough payload.
    #[must_use]
    pub fn with_context(mut self, context: Value) -> Self {
        self.context = Some(context);
        self
    }

    /// The selector registered under `name`, if any.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Selector> {
        self.fields.get(name)
    }

    /// Mutable access to the selector registered under `name`.
    pub fn get_mut(&mut self, name: &str) -> Option<&mut Selector> {
        self.fields.get_mut(name)
    }

    /// Iterate entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Selector)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of non-reserved entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Is the field map empty?
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Insert or replace an entry.
    pub fn insert(&mut self, name: impl Into<String>, selector: Selector) {
        self.fields.insert(name.into(), selector);
    }

    /// Remove an entry, returning it.
    pub fn remove(&mut self, name: &str) -> Option<Selector> {
        self.fields.remove(name)
    }

    /// The `$` config source.
    #[must_use]
    pub fn config_source(&self) -> Option<&ConfigSource> {
        self.config.as_ref()
    }

    /// Replace the `$` config source.
    pub fn set_config_source(&mut self, source: Option<ConfigSource>) {
        self.config = source;
    }

    /// The `$alias` target, if this sub-body re-fetches a link.
    #[must_use]
    pub fn alias_target(&self) -> Option<&str> {
        self.alias.as_deref()
    }

    /// Is this level in all-fields mode (`$all`)?
    #[must_use]
    pub fn is_all(&self) -> bool {
        self.all
    }

    /// The `$schema` passthrough payload.
    #[must_use]
    pub fn schema(&self) -> Option<&Value> {
        self.schema.as_ref()
    }

    /// The `$context` passthrough payload.
    #[must_use]
    pub fn context(&self) -> Option<&Value> {
        self.context.as_ref()
    }

    /// Deep-merge `other` into this body.
    ///
    /// Sub-bodies merge recursively; a sub-body is never demoted back to a
    /// scalar include; otherwise the incoming selector wins. Incoming
    /// reserved keys win where present, and all-fields mode is sticky.
    pub fn merge_from(&mut self, other: &Body) {
        for (key, incoming) in &other.fields {
            match (self.fields.get_mut(key), incoming) {
                (Some(Selector::Sub(existing)), Selector::Sub(sub)) => existing.merge_from(sub),
                (Some(Selector::Sub(_)), _) => {}
                (Some(existing), _) => *existing = incoming.clone(),
                (None, _) => {
                    self.fields.insert(key.clone(), incoming.clone());
                }
            }
        }
        if other.config.is_some() {
            self.config.clone_from(&other.config);
        }
        if other.alias.is_some() {
            self.alias.clone_from(&other.alias);
        }
        if other.schema.is_some() {
            self.schema.clone_from(&other.schema);
        }
        if other.context.is_some() {
            self.context.clone_from(&other.context);
        }
        self.all |= other.all;
    }
}

// ============================================================================
// JSON conversion
// ============================================================================

fn is_reserved(key: &str) -> bool {
    RESERVED_KEYS.contains(&key)
}

fn parse_options(value: &Value) -> Result<QueryOptions> {
    let map = value.as_object().ok_or_else(|| {
        Error::request(RequestErrorKind::MalformedBody, "options must be an object")
    })?;
    let mut options = QueryOptions::default();
    for (key, entry) in map {
        match key.as_str() {
            "sort" => options.sort = Some(entry.clone()),
            "limit" => {
                options.limit = Some(entry.as_u64().ok_or_else(|| {
                    Error::request(
                        RequestErrorKind::MalformedBody,
                        "options.limit must be a non-negative integer",
                    )
                })?);
            }
            "skip" => {
                options.skip = Some(entry.as_u64().ok_or_else(|| {
                    Error::request(
                        RequestErrorKind::MalformedBody,
                        "options.skip must be a non-negative integer",
                    )
                })?);
            }
            other => {
                return Err(Error::request(
                    RequestErrorKind::MalformedBody,
                    format!("unknown options key '{other}'"),
                ));
            }
        }
    }
    Ok(options)
}

fn parse_config(value: &Value) -> Result<NodeConfig> {
    let map = value.as_object().ok_or_else(|| {
        Error::request(RequestErrorKind::MalformedBody, "`$` must be an object")
    })?;
    let mut config = NodeConfig::default();
    for (key, entry) in map {
        match key.as_str() {
            "filters" => config.filters = Some(entry.clone()),
            "options" => config.options = parse_options(entry)?,
            "pipeline" => {
                config.pipeline = entry
                    .as_array()
                    .ok_or_else(|| {
                        Error::request(
                            RequestErrorKind::MalformedBody,
                            "`$`.pipeline must be an array",
                        )
                    })?
                    .clone();
            }
            other => {
                config.args.insert(other.to_string(), entry.clone());
            }
        }
    }
    Ok(config)
}

/// Does this object read as a projection operator (`{"$slice": 3}`)?
///
/// Every key must be operator-shaped (`$`-prefixed) and none reserved.
fn is_operator_object(map: &Map<String, Value>) -> bool {
    !map.is_empty() && map.keys().all(|k| k.starts_with('$') && !is_reserved(k))
}

fn parse_selector(key: &str, value: &Value) -> Result<Selector> {
    match value {
        Value::Bool(true) => Ok(Selector::Include),
        Value::Number(n) if n.as_u64() == Some(1) => Ok(Selector::Include),
        Value::Object(map) if is_operator_object(map) => Ok(Selector::Operator(value.clone())),
        Value::Object(_) => Ok(Selector::Sub(Body::try_from(value)?)),
        _ => Err(Error::request(
            RequestErrorKind::MalformedBody,
            format!("field '{key}' must be 1, true or an object"),
        )),
    }
}

impl TryFrom<&Value> for Body {
    type Error = Error;

    fn try_from(value: &Value) -> Result<Self> {
        let map = value.as_object().ok_or_else(|| {
            Error::request(RequestErrorKind::MalformedBody, "body must be an object")
        })?;

        let mut body = Body::new();
        for (key, entry) in map {
            match key.as_str() {
                "$" => body.config = Some(ConfigSource::Static(parse_config(entry)?)),
                "$alias" => {
                    body.alias = Some(
                        entry
                            .as_str()
                            .ok_or_else(|| {
                                Error::request(
                                    RequestErrorKind::MalformedBody,
                                    "`$alias` must be a string",
                                )
                            })?
                            .to_string(),
                    );
                }
                "$all" => body.all = entry.as_bool().unwrap_or(false),
                "$schema" => body.schema = Some(entry.clone()),
                "$context" => body.context = Some(entry.clone()),
                key if key.starts_with('$') => {
                    return Err(Error::request(
                        RequestErrorKind::MalformedBody,
                        format!("unknown reserved key '{key}'"),
                    ));
                }
                key => {
                    let selector = parse_selector(key, entry)?;
                    body.fields.insert(key.to_string(), selector);
                }
            }
        }
        Ok(body)
    }
}

impl TryFrom<Value> for Body {
    type Error = Error;

    fn try_from(value: Value) -> Result<Self> {
        Body::try_from(&value)
    }
}
