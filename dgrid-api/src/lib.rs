//! DGRID API - Versioned Record Services over a Remote Cache
//!
//! This crate turns a [`Record`](dgrid_core::Record) type into a running
//! service: an event-bus consumer that dispatches create/get/update/remove
//! envelopes onto the remote cache, an HTTP adapter bridging REST calls
//! onto the bus, and a management surface for runtime control.
//!
//! Optimistic concurrency is enforced here, at the application layer; the
//! cache itself only offers plain put/replace/remove.

pub mod bus;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod management;
pub mod routes;
pub mod service;
pub mod telemetry;

// Re-export commonly used types
pub use bus::{Consumer, Envelope, EventBus, Message, Reply, OPERATION_HEADER};
pub use dispatcher::{Dispatcher, HookOutcome, Operation, OperationHook};
pub use engine::{lookup_key, RecordEngine, ID_FIELD};
pub use error::{ApiError, ApiResult, ErrorCode};
pub use management::{
    derive_route, CapabilitySet, ManagedOperation, ManagementFuture, ManagementRegistry,
    OperationKind,
};
pub use routes::ServiceRouterBuilder;
pub use service::DataGridService;
