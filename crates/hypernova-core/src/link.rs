//! Link metadata between collections.
//!
//! Links are registered once per collection at setup time and read-shared
//! by every concurrent resolution afterwards. A *direct* link stores the
//! foreign key on its own side; a *virtual* link is the inverse view of a
//! direct link on the target collection, named via `inversed_by`.

use crate::collection::ResolveContext;
use crate::error::{ConfigErrorKind, Error, Result};
use regex::Regex;
use serde_json::Value;
use std::fmt;
use std::sync::{Arc, OnceLock};

/// How many target documents a link points at.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Cardinality {
    /// The link resolves to a single object or `null`.
    One,
    /// The link resolves to an array of objects (possibly empty).
    #[default]
    Many,
}

/// Which side of the relationship physically stores the key(s).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkDirection {
    /// This side stores the foreign key(s) in its own documents.
    Direct,
    /// The inverse side, computed by reversing a direct link's storage.
    Virtual,
}

/// Static or context-derived filters applied to every fetch over a link.
#[derive(Clone)]
pub enum LinkFilters {
    /// A fixed predicate merged into the child query filter.
    Static(Value),
    /// A predicate produced from the per-request resolution context.
    Dynamic(Arc<dyn Fn(&ResolveContext) -> Value + Send + Sync>),
}

impl LinkFilters {
    /// Evaluate the filters against the current resolution context.
    #[must_use]
    pub fn evaluate(&self, context: &ResolveContext) -> Value {
        match self {
            LinkFilters::Static(value) => value.clone(),
            LinkFilters::Dynamic(f) => f(context),
        }
    }
}

impl fmt::Debug for LinkFilters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkFilters::Static(value) => f.debug_tuple("Static").field(value).finish(),
            LinkFilters::Dynamic(_) => f.debug_tuple("Dynamic").field(&"<fn>").finish(),
        }
    }
}

/// Metadata describing one relationship from a collection to a target.
#[derive(Debug, Clone)]
pub struct LinkSpec {
    /// Name of the link; also the default output key.
    pub name: String,

    /// Target collection name, resolved against the catalog lazily so that
    /// two collections may declare each other in either order.
    pub target: String,

    /// How many target documents this link yields.
    pub cardinality: Cardinality,

    /// Which side stores the key(s).
    pub direction: LinkDirection,

    /// Dotted path of the stored key on this side (direct links only).
    /// Defaults to `<name>_id` / `<name>_ids` by cardinality.
    pub local_storage_field: Option<String>,

    /// Dotted path the stored key refers to on the target side.
    /// Defaults to the target's identity field.
    pub foreign_storage_field: Option<String>,

    /// Name of the direct link on the target collection this virtual link
    /// reverses.
    pub inversed_by: Option<String>,

    /// Forces a virtual link to collapse to a single object.
    pub unique: bool,

    /// Filters applied to every fetch over this link.
    pub filters: Option<LinkFilters>,
}

impl LinkSpec {
    /// Declare a direct one-cardinality link.
    #[must_use]
    pub fn one(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            target: target.into(),
            cardinality: Cardinality::One,
            direction: LinkDirection::Direct,
            local_storage_field: None,
            foreign_storage_field: None,
            inversed_by: None,
            unique: false,
            filters: None,
        }
    }

    /// Declare a direct many-cardinality link.
    #[must_use]
    pub fn many(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            cardinality: Cardinality::Many,
            ..Self::one(name, target)
        }
    }

    /// Declare a virtual link reversing `inversed_by` on the target.
    ///
    /// Virtual links are many-cardinality unless marked [`unique`](Self::unique).
    #[must_use]
    pub fn inverse(
        name: impl Into<String>,
        target: impl Into<String>,
        inversed_by: impl Into<String>,
    ) -> Self {
        Self {
            cardinality: Cardinality::Many,
            direction: LinkDirection::Virtual,
            inversed_by: Some(inversed_by.into()),
            ..Self::one(name, target)
        }
    }

    /// Override the dotted storage path on this side.
    #[must_use]
    pub fn storage_field(mut self, path: impl Into<String>) -> Self {
        self.local_storage_field = Some(path.into());
        self
    }

    /// Override the dotted path the stored key refers to on the target.
    #[must_use]
    pub fn foreign_field(mut self, path: impl Into<String>) -> Self {
        self.foreign_storage_field = Some(path.into());
        self
    }

    /// Collapse this virtual link to a single object.
    #[must_use]
    pub fn unique(mut self, value: bool) -> Self {
        self.unique = value;
        self
    }

    /// Attach static filters merged into every fetch over this link.
    #[must_use]
    pub fn filters(mut self, filters: Value) -> Self {
        self.filters = Some(LinkFilters::Static(filters));
        self
    }

    /// Attach context-derived filters.
    #[must_use]
    pub fn filters_fn<F>(mut self, f: F) -> Self
    where
        F: Fn(&ResolveContext) -> Value + Send + Sync + 'static,
    {
        self.filters = Some(LinkFilters::Dynamic(Arc::new(f)));
        self
    }

    /// Is this the inverse side of a direct link?
    #[must_use]
    pub fn is_virtual(&self) -> bool {
        self.direction == LinkDirection::Virtual
    }

    /// Effective cardinality: `unique` collapses a virtual link to one.
    #[must_use]
    pub fn effective_cardinality(&self) -> Cardinality {
        if self.is_virtual() && self.unique {
            Cardinality::One
        } else {
            self.cardinality
        }
    }

    /// Does the link resolve to a single object or `null`?
    #[must_use]
    pub fn is_one(&self) -> bool {
        self.effective_cardinality() == Cardinality::One
    }

    /// Storage path on this side, defaulted by cardinality.
    ///
    /// Only meaningful for direct links; a virtual link reads its storage
    /// through the direct counterpart.
    #[must_use]
    pub fn storage_field_or_default(&self) -> String {
        match &self.local_storage_field {
            Some(path) => path.clone(),
            None => match self.cardinality {
                Cardinality::One => format!("{}_id", self.name),
                Cardinality::Many => format!("{}_ids", self.name),
            },
        }
    }
}

/// Validate a registered name (link, reducer or expander).
///
/// Registered names share the body-key namespace with stored fields, so
/// they must be plain identifiers: no dots (dotted keys expand to nested
/// field nodes) and no `$` prefix (reserved keys).
pub fn validate_registered_name(what: &str, name: &str) -> Result<()> {
    static IDENT: OnceLock<Regex> = OnceLock::new();
    let ident = IDENT
        .get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("static identifier pattern"));
    if ident.is_match(name) {
        Ok(())
    } else {
        Err(Error::config(
            ConfigErrorKind::InvalidName,
            format!("{what} name '{name}' is not a plain identifier"),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn direct_one_defaults() {
        let link = LinkSpec::one("author", "users");
        assert_eq!(link.cardinality, Cardinality::One);
        assert_eq!(link.direction, LinkDirection::Direct);
        assert_eq!(link.storage_field_or_default(), "author_id");
        assert!(!link.is_virtual());
        assert!(link.is_one());
    }

    #[test]
    fn direct_many_defaults() {
        let link = LinkSpec::many("tags", "tags");
        assert_eq!(link.storage_field_or_default(), "tags_ids");
        assert!(!link.is_one());
    }

    #[test]
    fn storage_field_override() {
        let link = LinkSpec::one("author", "users").storage_field("meta.author_ref");
        assert_eq!(link.storage_field_or_default(), "meta.author_ref");
    }

    #[test]
    fn inverse_is_virtual_many() {
        let link = LinkSpec::inverse("posts", "posts", "author");
        assert!(link.is_virtual());
        assert_eq!(link.effective_cardinality(), Cardinality::Many);
        assert_eq!(link.inversed_by.as_deref(), Some("author"));
    }

    #[test]
    fn unique_collapses_virtual_to_one() {
        let link = LinkSpec::inverse("profile", "profiles", "user").unique(true);
        assert_eq!(link.effective_cardinality(), Cardinality::One);
        assert!(link.is_one());
    }

    #[test]
    fn static_filters_evaluate_to_themselves() {
        let link = LinkSpec::many("posts", "posts").filters(json!({"published": true}));
        let context = ResolveContext::default();
        let filters = link.filters.as_ref().map(|f| f.evaluate(&context));
        assert_eq!(filters, Some(json!({"published": true})));
    }

    #[test]
    fn dynamic_filters_see_the_context() {
        let link = LinkSpec::many("posts", "posts")
            .filters_fn(|ctx| json!({"tenant": ctx.data.get("tenant").cloned()}));
        let context = ResolveContext::new(json!({"tenant": "acme"}));
        let filters = link.filters.as_ref().map(|f| f.evaluate(&context));
        assert_eq!(filters, Some(json!({"tenant": "acme"})));
    }

    #[test]
    fn registered_names_must_be_identifiers() {
        assert!(validate_registered_name("link", "author").is_ok());
        assert!(validate_registered_name("link", "author_v2").is_ok());
        assert!(validate_registered_name("link", "$weird").is_err());
        assert!(validate_registered_name("link", "a.b").is_err());
        assert!(validate_registered_name("link", "").is_err());
    }
}
