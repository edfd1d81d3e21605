//! Cache manager bootstrap.
//!
//! Connecting a real cache client can block while it discovers the cluster
//! topology, so the connect runs on its own task. After the manager comes
//! up the task pauses for the configured settle delay before handing the
//! manager back; clients that finish discovery asynchronously are not
//! ready for traffic the instant `connect` returns.

use std::sync::Arc;
use std::time::Duration;

use dgrid_core::StorageError;
use tracing::{info, instrument};

use crate::handle::CacheHandleManager;
use crate::remote::{CacheConnector, CacheEndpoint, CacheManager};

/// Connect on a separate task and wait out the settle delay.
#[instrument(skip_all, fields(endpoint = %endpoint))]
pub async fn connect_with_settle(
    connector: Arc<dyn CacheConnector>,
    endpoint: CacheEndpoint,
    settle: Duration,
) -> Result<Arc<dyn CacheManager>, StorageError> {
    let target = endpoint.to_string();
    let task = tokio::spawn(async move {
        let manager = connector.connect(&endpoint).await?;
        if !settle.is_zero() {
            tokio::time::sleep(settle).await;
        }
        Ok::<_, StorageError>(manager)
    });

    let manager = task.await.map_err(|e| StorageError::ConnectFailed {
        endpoint: target.clone(),
        reason: e.to_string(),
    })??;
    info!(endpoint = %target, settle_ms = settle.as_millis() as u64, "Cache manager connected");
    Ok(manager)
}

/// Connect and install the manager into `handles`.
pub async fn bootstrap_manager(
    handles: &CacheHandleManager,
    connector: Arc<dyn CacheConnector>,
    endpoint: CacheEndpoint,
    settle: Duration,
) -> Result<(), StorageError> {
    let manager = connect_with_settle(connector, endpoint, settle).await?;
    handles.install_manager(manager)
}
