//! Management capabilities
//!
//! A service declares its runtime-control surface as [`CapabilitySet`]s:
//! named groups of accessors, mutators and actions. A
//! [`ManagementRegistry`] is built from those sets at service start and
//! derives one HTTP route per operation:
//!
//! | Name prefix | Kind     | Verb | Route segment                  |
//! |-------------|----------|------|--------------------------------|
//! | `get`, `is` | accessor | GET  | prefix stripped, lower-cased   |
//! | `set`       | mutator  | POST | prefix stripped, lower-cased   |
//! | other       | action   | POST | full name, lower-cased         |
//!
//! The registry is an ordinary value handed to the router builder; there is
//! no process-wide registry.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use serde_json::Value as JsonValue;

use crate::error::{ApiError, ApiResult};

/// URL prefix of every management route.
pub const MANAGEMENT_PREFIX: &str = "/management";

/// Future returned by a management operation.
pub type ManagementFuture = BoxFuture<'static, ApiResult<JsonValue>>;

type NullaryFn = Arc<dyn Fn() -> ManagementFuture + Send + Sync>;
type UnaryFn = Arc<dyn Fn(JsonValue) -> ManagementFuture + Send + Sync>;

// ============================================================================
// OPERATIONS
// ============================================================================

/// Kind of a managed operation, derived from its name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum OperationKind {
    Accessor,
    Mutator,
    Action,
}

impl OperationKind {
    /// HTTP verb the operation is bound to.
    pub fn verb(&self) -> &'static str {
        match self {
            OperationKind::Accessor => "GET",
            OperationKind::Mutator | OperationKind::Action => "POST",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationKind::Accessor => write!(f, "accessor"),
            OperationKind::Mutator => write!(f, "mutator"),
            OperationKind::Action => write!(f, "action"),
        }
    }
}

/// Derive the kind and route segment of an operation name.
///
/// A prefix only counts when something follows it, so `get` alone is an
/// action named `get`.
pub fn derive_route(name: &str) -> (OperationKind, String) {
    for (prefix, kind) in [
        ("get", OperationKind::Accessor),
        ("is", OperationKind::Accessor),
        ("set", OperationKind::Mutator),
    ] {
        if let Some(rest) = name.strip_prefix(prefix) {
            if !rest.is_empty() {
                return (kind, rest.to_lowercase());
            }
        }
    }
    (OperationKind::Action, name.to_lowercase())
}

/// Callable behind a managed operation.
#[derive(Clone)]
pub enum ManagedOperation {
    /// Zero-argument read.
    Accessor(NullaryFn),
    /// One-argument write; receives the request's `value`.
    Mutator(UnaryFn),
    /// Zero-argument command.
    Action(NullaryFn),
}

impl ManagedOperation {
    pub fn kind(&self) -> OperationKind {
        match self {
            ManagedOperation::Accessor(_) => OperationKind::Accessor,
            ManagedOperation::Mutator(_) => OperationKind::Mutator,
            ManagedOperation::Action(_) => OperationKind::Action,
        }
    }
}

impl fmt::Debug for ManagedOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ManagedOperation::{}", self.kind())
    }
}

/// One named operation of a capability set.
#[derive(Debug, Clone)]
pub struct ManagedMethod {
    pub name: String,
    pub operation: ManagedOperation,
}

// ============================================================================
// CAPABILITY SETS
// ============================================================================

/// A declared group of management operations.
#[derive(Debug, Clone)]
pub struct CapabilitySet {
    name: String,
    methods: Vec<ManagedMethod>,
}

impl CapabilitySet {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            methods: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn methods(&self) -> &[ManagedMethod] {
        &self.methods
    }

    /// Add a `get*`/`is*` accessor.
    pub fn accessor<F>(self, name: &str, f: F) -> Self
    where
        F: Fn() -> ManagementFuture + Send + Sync + 'static,
    {
        self.with(name, ManagedOperation::Accessor(Arc::new(f)))
    }

    /// Add a `set*` mutator.
    pub fn mutator<F>(self, name: &str, f: F) -> Self
    where
        F: Fn(JsonValue) -> ManagementFuture + Send + Sync + 'static,
    {
        self.with(name, ManagedOperation::Mutator(Arc::new(f)))
    }

    /// Add an action.
    pub fn action<F>(self, name: &str, f: F) -> Self
    where
        F: Fn() -> ManagementFuture + Send + Sync + 'static,
    {
        self.with(name, ManagedOperation::Action(Arc::new(f)))
    }

    fn with(mut self, name: &str, operation: ManagedOperation) -> Self {
        self.methods.push(ManagedMethod {
            name: name.to_string(),
            operation,
        });
        self
    }
}

// ============================================================================
// REGISTRY
// ============================================================================

/// A bound management route.
#[derive(Debug, Clone)]
pub struct ManagementRoute {
    pub method: String,
    pub capability: String,
    pub kind: OperationKind,
    pub path: String,
    pub operation: ManagedOperation,
}

/// Routes derived from a service's capability sets.
#[derive(Debug, Clone, Default)]
pub struct ManagementRegistry {
    routes: Vec<ManagementRoute>,
    /// (verb, path) -> index into `routes`
    index: BTreeMap<(&'static str, String), usize>,
}

impl ManagementRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from a list of capability sets.
    pub fn from_capabilities(sets: impl IntoIterator<Item = CapabilitySet>) -> ApiResult<Self> {
        let mut registry = Self::new();
        for set in sets {
            registry.register(set)?;
        }
        Ok(registry)
    }

    /// Bind every operation of `set`.
    ///
    /// Fails if an operation's callable does not match the kind its name
    /// implies, or if its verb and path are already bound.
    pub fn register(&mut self, set: CapabilitySet) -> ApiResult<()> {
        for method in set.methods {
            let (kind, segment) = derive_route(&method.name);
            if kind != method.operation.kind() {
                return Err(ApiError::invalid_input(format!(
                    "{}.{} is declared as {} but its name implies {}",
                    set.name,
                    method.name,
                    method.operation.kind(),
                    kind
                )));
            }

            let path = format!("{}/{}", MANAGEMENT_PREFIX, segment);
            let key = (kind.verb(), path.clone());
            if self.index.contains_key(&key) {
                return Err(ApiError::invalid_input(format!(
                    "{} {} is already bound",
                    kind.verb(),
                    path
                )));
            }

            tracing::debug!(
                capability = %set.name,
                method = %method.name,
                verb = kind.verb(),
                path = %path,
                "Management route bound"
            );
            self.index.insert(key, self.routes.len());
            self.routes.push(ManagementRoute {
                method: method.name,
                capability: set.name.clone(),
                kind,
                path,
                operation: method.operation,
            });
        }
        Ok(())
    }

    pub fn routes(&self) -> &[ManagementRoute] {
        &self.routes
    }

    /// Names of all registered operations, in registration order.
    pub fn method_names(&self) -> Vec<String> {
        self.routes.iter().map(|r| r.method.clone()).collect()
    }

    /// Distinct management paths, sorted.
    pub fn paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.routes.iter().map(|r| r.path.clone()).collect();
        paths.sort();
        paths.dedup();
        paths
    }

    pub fn lookup(&self, verb: &str, path: &str) -> Option<&ManagementRoute> {
        let verb = match verb {
            "GET" => "GET",
            "POST" => "POST",
            _ => return None,
        };
        self.index
            .get(&(verb, path.to_string()))
            .and_then(|&i| self.routes.get(i))
    }
}

/// Invoke a bound operation.
///
/// GET replies `{method, result}` with the accessor's value. POST on a
/// mutator reads `value` from the body, applies it and echoes it back; POST
/// on an action replies with a null result.
pub async fn invoke(route: &ManagementRoute, body: Option<&JsonValue>) -> ApiResult<JsonValue> {
    let result = match &route.operation {
        ManagedOperation::Accessor(f) => f().await?,
        ManagedOperation::Action(f) => {
            f().await?;
            JsonValue::Null
        }
        ManagedOperation::Mutator(f) => {
            let value = body
                .and_then(|b| b.get("value"))
                .cloned()
                .ok_or_else(|| {
                    ApiError::internal_error(format!(
                        "{} expects a body with a 'value' field",
                        route.method
                    ))
                })?;
            f(value.clone()).await?;
            value
        }
    };
    Ok(serde_json::json!({
        "method": route.method,
        "result": result,
    }))
}

/// Wrap a ready value as a [`ManagementFuture`].
pub fn ready(result: ApiResult<JsonValue>) -> ManagementFuture {
    Box::pin(futures_util::future::ready(result))
}
