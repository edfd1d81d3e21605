//! Remote cache collaborator traits.
//!
//! A DGRID service never speaks a cache wire protocol directly. It asks a
//! [`CacheConnector`] for a [`CacheManager`], asks the manager for a named
//! [`RemoteCache`], and then issues keyed calls on that handle. Values are
//! opaque bytes; encoding records is the caller's business.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use dgrid_core::{RecordId, StorageError};

/// Network location of a cache server.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheEndpoint {
    pub host: String,
    pub port: u16,
}

impl CacheEndpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for CacheEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Creates cache managers for an endpoint.
///
/// Connecting may block on topology discovery in real clients, so callers
/// run it off the request path (see [`crate::bootstrap`]).
#[async_trait]
pub trait CacheConnector: Send + Sync {
    async fn connect(&self, endpoint: &CacheEndpoint) -> Result<Arc<dyn CacheManager>, StorageError>;
}

/// A live connection to a cache cluster.
#[async_trait]
pub trait CacheManager: Send + Sync {
    /// Look up a named cache on the cluster.
    fn get_cache(&self, name: &str) -> Result<Arc<dyn RemoteCache>, StorageError>;

    /// Stop the manager. Handles it produced fail afterwards.
    async fn stop(&self) -> Result<(), StorageError>;

    /// False once the manager has been stopped.
    fn is_running(&self) -> bool;
}

/// Handle to one named cache.
///
/// Every call is atomic per key. There is no compare-and-swap.
#[async_trait]
pub trait RemoteCache: Send + Sync {
    /// Name of the cache this handle addresses.
    fn name(&self) -> &str;

    async fn contains_key(&self, key: RecordId) -> Result<bool, StorageError>;

    async fn get(&self, key: RecordId) -> Result<Option<Vec<u8>>, StorageError>;

    /// Store a value, returning the previous one.
    async fn put(&self, key: RecordId, value: Vec<u8>) -> Result<Option<Vec<u8>>, StorageError>;

    /// Store a value only if the key is present. Returns the previous value,
    /// `None` when the key was absent and nothing was written.
    async fn replace(&self, key: RecordId, value: Vec<u8>) -> Result<Option<Vec<u8>>, StorageError>;

    /// Remove a key. Removing an absent key is not an error.
    async fn remove(&self, key: RecordId) -> Result<Option<Vec<u8>>, StorageError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_display() {
        let endpoint = CacheEndpoint::new("grid.internal", 11222);
        assert_eq!(endpoint.to_string(), "grid.internal:11222");
    }
}
