//! Computed-field ("reducer") specifications and dependency-ordered
//! evaluation.
//!
//! A reducer is a named computed field: a dependency sub-body describing
//! what it needs fetched, plus either a compute function evaluated per row
//! after assembly, or raw pipeline stages handed to the store at fetch
//! time. Same-level reducers evaluate in an explicit topological order
//! over their declared dependency edges; a cycle is a configuration error
//! caught when the resolution graph is built, never an unbounded requeue.

use crate::graph::ReducerNode;
use crate::macros::try_outcome;
use asupersync::{Cx, Outcome};
use hypernova_core::{Document, Error, ResolveContext, Result};
use hypernova_core::error::ConfigErrorKind;
use hypernova_query::Body;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// A reducer compute function.
///
/// Receives the assembled row (dependencies already attached), the static
/// arguments from the request's `{$: {...}}` wrapper, and the per-request
/// resolution context. The returned future may suspend (store round-trips,
/// external calls); an error aborts the whole request.
pub trait Reduce: Send + Sync {
    /// Compute the reducer's value for one row.
    fn compute<'a>(
        &'a self,
        cx: &'a Cx,
        row: &'a Document,
        args: &'a Value,
        context: &'a ResolveContext,
    ) -> Pin<Box<dyn Future<Output = Outcome<Value, Error>> + Send + 'a>>;
}

/// Adapter for synchronous compute closures.
struct FnReduce<F>(F);

impl<F> Reduce for FnReduce<F>
where
    F: Fn(&Document, &Value, &ResolveContext) -> Result<Value> + Send + Sync,
{
    fn compute<'a>(
        &'a self,
        _cx: &'a Cx,
        row: &'a Document,
        args: &'a Value,
        context: &'a ResolveContext,
    ) -> Pin<Box<dyn Future<Output = Outcome<Value, Error>> + Send + 'a>> {
        let result = (self.0)(row, args, context);
        Box::pin(async move {
            match result {
                Ok(value) => Outcome::Ok(value),
                Err(e) => Outcome::Err(e),
            }
        })
    }
}

/// How a reducer produces its value.
#[derive(Clone)]
pub enum ReducerKind {
    /// Evaluated engine-side per row after assembly.
    Compute(Arc<dyn Reduce>),
    /// Raw store-native pipeline stages appended to the owning node's
    /// fetch; the store materializes the field, so evaluation skips it.
    Pipeline(Vec<Value>),
}

impl fmt::Debug for ReducerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReducerKind::Compute(_) => f.debug_tuple("Compute").field(&"<fn>").finish(),
            ReducerKind::Pipeline(stages) => f.debug_tuple("Pipeline").field(stages).finish(),
        }
    }
}

/// A registered computed field.
#[derive(Debug, Clone)]
pub struct ReducerSpec {
    /// The field name this reducer materializes.
    pub name: String,
    /// Sub-body spread into the owning node; fetched but stripped from
    /// output unless also explicitly requested.
    pub dependency: Body,
    /// Compute function or pipeline stages.
    pub kind: ReducerKind,
}

impl ReducerSpec {
    /// Register a reducer with a synchronous compute closure.
    #[must_use]
    pub fn computed<F>(name: impl Into<String>, dependency: Body, f: F) -> Self
    where
        F: Fn(&Document, &Value, &ResolveContext) -> Result<Value> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            dependency,
            kind: ReducerKind::Compute(Arc::new(FnReduce(f))),
        }
    }

    /// Register a reducer with a (possibly suspending) compute impl.
    #[must_use]
    pub fn with_reduce(
        name: impl Into<String>,
        dependency: Body,
        reduce: Arc<dyn Reduce>,
    ) -> Self {
        Self {
            name: name.into(),
            dependency,
            kind: ReducerKind::Compute(reduce),
        }
    }

    /// Register a pure pipeline-side reducer.
    #[must_use]
    pub fn pipeline(name: impl Into<String>, dependency: Body, stages: Vec<Value>) -> Self {
        Self {
            name: name.into(),
            dependency,
            kind: ReducerKind::Pipeline(stages),
        }
    }

    /// Is this reducer materialized by the store rather than the engine?
    #[must_use]
    pub fn is_pipeline(&self) -> bool {
        matches!(self.kind, ReducerKind::Pipeline(_))
    }
}

/// Topologically order a node's reducers by their dependency edges.
///
/// Returns indices into `reducers` such that every reducer appears after
/// everything it depends on. A cycle raises a configuration error. Edges
/// pointing outside the slice (never produced by graph construction) are
/// ignored.
pub fn evaluation_order(reducers: &[ReducerNode]) -> Result<Vec<usize>> {
    let index_of: BTreeMap<&str, usize> = reducers
        .iter()
        .enumerate()
        .map(|(i, r)| (r.name.as_str(), i))
        .collect();

    let mut indegree = vec![0usize; reducers.len()];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); reducers.len()];
    for (i, reducer) in reducers.iter().enumerate() {
        for dep in &reducer.depends_on {
            if let Some(&d) = index_of.get(dep.as_str()) {
                indegree[i] += 1;
                dependents[d].push(i);
            }
        }
    }

    let mut ready: Vec<usize> = (0..reducers.len()).filter(|&i| indegree[i] == 0).collect();
    let mut order = Vec::with_capacity(reducers.len());
    while let Some(i) = ready.pop() {
        order.push(i);
        for &dependent in &dependents[i] {
            indegree[dependent] -= 1;
            if indegree[dependent] == 0 {
                ready.push(dependent);
            }
        }
    }

    if order.len() != reducers.len() {
        let cyclic: Vec<&str> = reducers
            .iter()
            .enumerate()
            .filter(|(i, _)| !order.contains(i))
            .map(|(_, r)| r.name.as_str())
            .collect();
        return Err(Error::config(
            ConfigErrorKind::DependencyCycle,
            format!("reducer dependencies form a cycle: {}", cyclic.join(", ")),
        ));
    }
    Ok(order)
}

/// Evaluate a node's reducers over its assembled rows, in `order`.
///
/// Pipeline-side reducers were materialized by the store at fetch time and
/// are skipped here. A compute error aborts the request; there is no
/// per-row isolation.
pub(crate) async fn evaluate(
    cx: &Cx,
    reducers: &[ReducerNode],
    order: &[usize],
    rows: &mut [Document],
    context: &ResolveContext,
) -> Outcome<(), Error> {
    for &index in order {
        let reducer = &reducers[index];
        let ReducerKind::Compute(reduce) = &reducer.spec.kind else {
            continue;
        };
        for row in rows.iter_mut() {
            let value = try_outcome!(reduce.compute(cx, row, &reducer.args, context).await);
            row.insert(reducer.name.clone(), value);
        }
    }
    Outcome::Ok(())
}
