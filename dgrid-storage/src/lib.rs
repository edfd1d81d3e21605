//! DGRID Storage - Remote Cache Collaborator
//!
//! Defines the narrow async interface a DGRID service uses to reach its
//! remote key-value cache, the lifecycle of the per-service cache handle,
//! and an embedded in-memory grid that implements the same interface for
//! standalone runs and tests.

pub mod bootstrap;
pub mod handle;
pub mod memory;
pub mod remote;

pub use bootstrap::{bootstrap_manager, connect_with_settle};
pub use handle::{CacheHandleManager, HandleEvent};
pub use memory::{CacheOp, InMemoryGrid};
pub use remote::{CacheConnector, CacheEndpoint, CacheManager, RemoteCache};
