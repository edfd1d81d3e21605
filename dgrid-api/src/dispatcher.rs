//! Operation dispatcher
//!
//! Routes an inbound [`Envelope`] to the matching [`RecordEngine`] entry
//! point by its `operation` header. The dispatcher itself never touches the
//! cache.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use dgrid_core::Record;
use tracing::{debug, instrument};

use crate::bus::{Envelope, Message, Reply};
use crate::engine::RecordEngine;
use crate::error::{ApiError, ApiResult};
use crate::telemetry::with_metrics;

/// Built-in record operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Create,
    Get,
    Update,
    Remove,
}

impl Operation {
    pub const ALL: [Operation; 4] = [
        Operation::Create,
        Operation::Get,
        Operation::Update,
        Operation::Remove,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Create => "create",
            Operation::Get => "get",
            Operation::Update => "update",
            Operation::Remove => "remove",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = ApiError;

    /// Case-insensitive match on the operation name.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Operation::ALL
            .into_iter()
            .find(|op| op.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| ApiError::unknown_operation(s))
    }
}

// ============================================================================
// HOOK
// ============================================================================

/// Result of an [`OperationHook`] inspection.
#[derive(Debug)]
pub enum HookOutcome {
    /// Fall through to built-in routing.
    Continue,
    /// Dispatch ends here with this result.
    Handled(ApiResult<Reply>),
}

/// Record-type extension point consulted before built-in routing.
///
/// A hook sees every envelope that carries an operation header, including
/// operations the dispatcher does not know, so it can add operations as
/// well as veto built-in ones.
#[async_trait]
pub trait OperationHook: Send + Sync {
    async fn intercept(&self, operation: &str, envelope: &Envelope) -> HookOutcome;
}

// ============================================================================
// DISPATCHER
// ============================================================================

/// Routes envelopes for one record type.
pub struct Dispatcher<R: Record> {
    engine: Arc<RecordEngine<R>>,
    hook: Option<Arc<dyn OperationHook>>,
}

impl<R: Record> Clone for Dispatcher<R> {
    fn clone(&self) -> Self {
        Self {
            engine: Arc::clone(&self.engine),
            hook: self.hook.clone(),
        }
    }
}

impl<R: Record> Dispatcher<R> {
    pub fn new(engine: Arc<RecordEngine<R>>) -> Self {
        Self { engine, hook: None }
    }

    pub fn with_hook(mut self, hook: Arc<dyn OperationHook>) -> Self {
        self.hook = Some(hook);
        self
    }

    pub fn engine(&self) -> &Arc<RecordEngine<R>> {
        &self.engine
    }

    /// Dispatch an envelope and return its outcome.
    #[instrument(skip_all, fields(record_type = R::RECORD_TYPE, operation = tracing::field::Empty))]
    pub async fn dispatch(&self, envelope: &Envelope) -> ApiResult<Reply> {
        let Some(name) = envelope.operation() else {
            debug!("Envelope without operation header");
            return Err(ApiError::missing_operation());
        };
        tracing::Span::current().record("operation", name);

        let start = Instant::now();
        let (label, result) = self.route(name, envelope).await;
        let outcome = outcome_label(&result, label == HOOK_LABEL);
        with_metrics(|m| m.record_operation(label, outcome, start.elapsed().as_secs_f64()));
        debug!(outcome, "Operation dispatched");
        result
    }

    /// Dispatch a delivered message and send its reply.
    pub async fn handle(&self, message: Message) {
        let result = self.dispatch(message.envelope()).await;
        message.respond(result);
    }

    async fn route(&self, name: &str, envelope: &Envelope) -> (&'static str, ApiResult<Reply>) {
        if let Some(hook) = &self.hook {
            if let HookOutcome::Handled(result) = hook.intercept(name, envelope).await {
                return (HOOK_LABEL, result);
            }
        }

        let operation = match name.parse::<Operation>() {
            Ok(operation) => operation,
            Err(err) => return ("unknown", Err(err)),
        };

        let body = &envelope.body;
        let result = match operation {
            Operation::Create => self.engine.create(body).await,
            Operation::Get => self.engine.get(body).await,
            Operation::Update => self.engine.update(body).await,
            Operation::Remove => self.engine.remove(body).await,
        };
        (operation.as_str(), result)
    }
}

/// Metric label for operations answered by a hook.
const HOOK_LABEL: &str = "hook";

fn outcome_label(result: &ApiResult<Reply>, handled: bool) -> &'static str {
    match result {
        Err(_) => "error",
        Ok(_) if handled => "handled",
        Ok(reply) => match reply.status_code {
            201 => "created",
            204 => "no_content",
            404 => "not_found",
            _ => "ok",
        },
    }
}
