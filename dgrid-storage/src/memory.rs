//! Embedded in-memory grid.
//!
//! Implements the cache collaborator traits on top of `dashmap`, so a
//! service can run standalone without a cache cluster. Each named cache is
//! a concurrent map with per-key atomic operations. The grid also counts
//! connections and cache lookups, and can be told to fail, to silently
//! lose or evict on upcoming calls, or to hold calls at a barrier, which is
//! how the fault and interleaving paths of a service are exercised in tests.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use dgrid_core::{RecordId, StorageError};
use tokio::sync::Barrier;
use tracing::{debug, trace};

use crate::remote::{CacheConnector, CacheEndpoint, CacheManager, RemoteCache};

/// Cache calls that can have faults injected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheOp {
    Connect,
    GetCache,
    ContainsKey,
    Get,
    Put,
    Replace,
    Remove,
    Stop,
}

impl CacheOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheOp::Connect => "connect",
            CacheOp::GetCache => "getCache",
            CacheOp::ContainsKey => "containsKey",
            CacheOp::Get => "get",
            CacheOp::Put => "put",
            CacheOp::Replace => "replace",
            CacheOp::Remove => "remove",
            CacheOp::Stop => "stop",
        }
    }
}

impl fmt::Display for CacheOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

type Entries = Arc<DashMap<RecordId, Vec<u8>>>;

struct Stall {
    barrier: Arc<Barrier>,
    remaining: usize,
}

#[derive(Default)]
struct GridState {
    caches: DashMap<String, Entries>,
    faults: DashMap<CacheOp, u32>,
    stalls: DashMap<CacheOp, Stall>,
    lost_writes: AtomicU64,
    evictions: AtomicU64,
    strict_caches: AtomicBool,
    connections: AtomicU64,
    cache_lookups: AtomicU64,
}

impl GridState {
    /// Consume one pending fault for `op`, if any.
    fn take_fault(&self, op: CacheOp) -> Result<(), StorageError> {
        let hit = match self.faults.get_mut(&op) {
            Some(mut pending) if *pending > 0 => {
                *pending -= 1;
                true
            }
            _ => false,
        };
        if hit {
            debug!(operation = %op, "Injected cache fault");
            return Err(StorageError::fault(op.as_str(), "injected fault"));
        }
        Ok(())
    }

    fn take_lost_write(&self) -> bool {
        take_one(&self.lost_writes)
    }

    fn take_eviction(&self) -> bool {
        take_one(&self.evictions)
    }

    /// Barrier the next call of `op` must wait at, if one is pending.
    fn take_stall(&self, op: CacheOp) -> Option<Arc<Barrier>> {
        let mut stall = self.stalls.get_mut(&op)?;
        if stall.remaining == 0 {
            return None;
        }
        stall.remaining -= 1;
        Some(Arc::clone(&stall.barrier))
    }
}

fn take_one(counter: &AtomicU64) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

// ============================================================================
// GRID
// ============================================================================

/// In-memory grid server. Cloning shares the same data.
#[derive(Clone, Default)]
pub struct InMemoryGrid {
    state: Arc<GridState>,
}

impl InMemoryGrid {
    pub fn new() -> Self {
        Self::default()
    }

    /// Require caches to be defined with [`define_cache`](Self::define_cache)
    /// before lookup. By default caches are created on first lookup.
    pub fn with_strict_caches(self) -> Self {
        self.state.strict_caches.store(true, Ordering::SeqCst);
        self
    }

    /// Define a named cache. Existing contents are kept.
    pub fn define_cache(&self, name: &str) {
        self.state
            .caches
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(DashMap::new()));
    }

    /// Make the next call of `op` fail.
    pub fn inject_fault(&self, op: CacheOp) {
        self.inject_faults(op, 1);
    }

    /// Make the next `count` calls of `op` fail.
    pub fn inject_faults(&self, op: CacheOp, count: u32) {
        *self.state.faults.entry(op).or_insert(0) += count;
    }

    /// Make the next `put` or `replace` report success without storing.
    pub fn lose_next_write(&self) {
        self.state.lost_writes.fetch_add(1, Ordering::SeqCst);
    }

    /// Make the next `replace` report success but leave the key absent, as
    /// if the entry expired right after the write.
    pub fn evict_on_next_replace(&self) {
        self.state.evictions.fetch_add(1, Ordering::SeqCst);
    }

    /// Hold the next `parties` calls of `op` until all of them have arrived.
    pub fn stall_next(&self, op: CacheOp, parties: usize) {
        self.state.stalls.insert(
            op,
            Stall {
                barrier: Arc::new(Barrier::new(parties)),
                remaining: parties,
            },
        );
    }

    /// Drop every pending injected fault, lost write, eviction and stall.
    pub fn clear_faults(&self) {
        self.state.faults.clear();
        self.state.stalls.clear();
        self.state.lost_writes.store(0, Ordering::SeqCst);
        self.state.evictions.store(0, Ordering::SeqCst);
    }

    /// Number of managers created so far.
    pub fn connections(&self) -> u64 {
        self.state.connections.load(Ordering::SeqCst)
    }

    /// Number of successful `get_cache` lookups so far.
    pub fn cache_lookups(&self) -> u64 {
        self.state.cache_lookups.load(Ordering::SeqCst)
    }

    /// Raw stored value, bypassing fault injection.
    pub fn peek(&self, cache: &str, key: RecordId) -> Option<Vec<u8>> {
        self.state
            .caches
            .get(cache)
            .and_then(|entries| entries.get(&key).map(|v| v.value().clone()))
    }

    /// Write a raw value, bypassing fault injection.
    pub fn seed(&self, cache: &str, key: RecordId, value: Vec<u8>) {
        self.define_cache(cache);
        if let Some(entries) = self.state.caches.get(cache) {
            entries.insert(key, value);
        }
    }

    /// Number of entries in a named cache.
    pub fn entry_count(&self, cache: &str) -> usize {
        self.state.caches.get(cache).map(|e| e.len()).unwrap_or(0)
    }

    /// Create a manager directly, without going through a connector.
    pub fn manager(&self) -> Arc<dyn CacheManager> {
        self.state.connections.fetch_add(1, Ordering::SeqCst);
        Arc::new(GridManager {
            state: Arc::clone(&self.state),
            running: Arc::new(AtomicBool::new(true)),
        })
    }
}

#[async_trait]
impl CacheConnector for InMemoryGrid {
    async fn connect(&self, endpoint: &CacheEndpoint) -> Result<Arc<dyn CacheManager>, StorageError> {
        self.state
            .take_fault(CacheOp::Connect)
            .map_err(|e| StorageError::ConnectFailed {
                endpoint: endpoint.to_string(),
                reason: e.to_string(),
            })?;
        debug!(endpoint = %endpoint, "In-memory grid connected");
        Ok(self.manager())
    }
}

// ============================================================================
// MANAGER
// ============================================================================

struct GridManager {
    state: Arc<GridState>,
    running: Arc<AtomicBool>,
}

#[async_trait]
impl CacheManager for GridManager {
    fn get_cache(&self, name: &str) -> Result<Arc<dyn RemoteCache>, StorageError> {
        if !self.is_running() {
            return Err(StorageError::ManagerStopped);
        }
        self.state.take_fault(CacheOp::GetCache)?;

        let entries = if self.state.strict_caches.load(Ordering::SeqCst) {
            self.state
                .caches
                .get(name)
                .map(|e| Arc::clone(e.value()))
                .ok_or_else(|| StorageError::CacheNotFound {
                    name: name.to_string(),
                })?
        } else {
            Arc::clone(
                self.state
                    .caches
                    .entry(name.to_string())
                    .or_insert_with(|| Arc::new(DashMap::new()))
                    .value(),
            )
        };

        self.state.cache_lookups.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(GridCache {
            name: name.to_string(),
            entries,
            state: Arc::clone(&self.state),
            running: Arc::clone(&self.running),
        }))
    }

    async fn stop(&self) -> Result<(), StorageError> {
        self.running.store(false, Ordering::SeqCst);
        self.state.take_fault(CacheOp::Stop)?;
        debug!("In-memory grid manager stopped");
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

// ============================================================================
// CACHE
// ============================================================================

struct GridCache {
    name: String,
    entries: Entries,
    state: Arc<GridState>,
    running: Arc<AtomicBool>,
}

impl GridCache {
    async fn check(&self, op: CacheOp) -> Result<(), StorageError> {
        if let Some(barrier) = self.state.take_stall(op) {
            trace!(cache = %self.name, operation = %op, "Grid call stalled");
            barrier.wait().await;
        }
        if !self.running.load(Ordering::SeqCst) {
            return Err(StorageError::ManagerStopped);
        }
        self.state.take_fault(op)?;
        trace!(cache = %self.name, operation = %op, "Grid call");
        Ok(())
    }
}

#[async_trait]
impl RemoteCache for GridCache {
    fn name(&self) -> &str {
        &self.name
    }

    async fn contains_key(&self, key: RecordId) -> Result<bool, StorageError> {
        self.check(CacheOp::ContainsKey).await?;
        Ok(self.entries.contains_key(&key))
    }

    async fn get(&self, key: RecordId) -> Result<Option<Vec<u8>>, StorageError> {
        self.check(CacheOp::Get).await?;
        Ok(self.entries.get(&key).map(|v| v.value().clone()))
    }

    async fn put(&self, key: RecordId, value: Vec<u8>) -> Result<Option<Vec<u8>>, StorageError> {
        self.check(CacheOp::Put).await?;
        if self.state.take_lost_write() {
            return Ok(self.entries.get(&key).map(|v| v.value().clone()));
        }
        Ok(self.entries.insert(key, value))
    }

    async fn replace(&self, key: RecordId, value: Vec<u8>) -> Result<Option<Vec<u8>>, StorageError> {
        self.check(CacheOp::Replace).await?;
        if self.state.take_eviction() {
            return Ok(self.entries.remove(&key).map(|(_, v)| v));
        }
        match self.entries.get_mut(&key) {
            Some(mut slot) => {
                if self.state.take_lost_write() {
                    return Ok(Some(slot.value().clone()));
                }
                Ok(Some(std::mem::replace(slot.value_mut(), value)))
            }
            None => Ok(None),
        }
    }

    async fn remove(&self, key: RecordId) -> Result<Option<Vec<u8>>, StorageError> {
        self.check(CacheOp::Remove).await?;
        Ok(self.entries.remove(&key).map(|(_, v)| v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dgrid_core::new_record_id;

    fn endpoint() -> CacheEndpoint {
        CacheEndpoint::new("127.0.0.1", 11222)
    }

    #[tokio::test]
    async fn test_put_get_remove() -> Result<(), StorageError> {
        let grid = InMemoryGrid::new();
        let manager = grid.connect(&endpoint()).await?;
        let cache = manager.get_cache("account")?;
        let key = new_record_id();

        assert!(!cache.contains_key(key).await?);
        assert_eq!(cache.put(key, b"one".to_vec()).await?, None);
        assert!(cache.contains_key(key).await?);
        assert_eq!(cache.get(key).await?, Some(b"one".to_vec()));

        assert_eq!(cache.remove(key).await?, Some(b"one".to_vec()));
        assert_eq!(cache.remove(key).await?, None);
        assert_eq!(cache.get(key).await?, None);
        Ok(())
    }

    #[tokio::test]
    async fn test_replace_requires_presence() -> Result<(), StorageError> {
        let grid = InMemoryGrid::new();
        let cache = grid.manager().get_cache("account")?;
        let key = new_record_id();

        assert_eq!(cache.replace(key, b"x".to_vec()).await?, None);
        assert_eq!(cache.get(key).await?, None);

        cache.put(key, b"a".to_vec()).await?;
        assert_eq!(cache.replace(key, b"b".to_vec()).await?, Some(b"a".to_vec()));
        assert_eq!(grid.peek("account", key), Some(b"b".to_vec()));
        Ok(())
    }

    #[tokio::test]
    async fn test_injected_fault_hits_once() -> Result<(), StorageError> {
        let grid = InMemoryGrid::new();
        let cache = grid.manager().get_cache("account")?;
        let key = new_record_id();

        grid.inject_fault(CacheOp::Get);
        let err = cache.get(key).await.unwrap_err();
        assert!(matches!(err, StorageError::Fault { ref operation, .. } if operation == "get"));
        assert_eq!(cache.get(key).await?, None);
        Ok(())
    }

    #[tokio::test]
    async fn test_lost_write_is_reported_as_success() -> Result<(), StorageError> {
        let grid = InMemoryGrid::new();
        let cache = grid.manager().get_cache("account")?;
        let key = new_record_id();

        grid.lose_next_write();
        cache.put(key, b"gone".to_vec()).await?;
        assert_eq!(cache.get(key).await?, None);
        Ok(())
    }

    #[tokio::test]
    async fn test_evicting_replace_leaves_key_absent() -> Result<(), StorageError> {
        let grid = InMemoryGrid::new();
        let cache = grid.manager().get_cache("account")?;
        let key = new_record_id();
        cache.put(key, b"a".to_vec()).await?;

        grid.evict_on_next_replace();
        assert_eq!(cache.replace(key, b"b".to_vec()).await?, Some(b"a".to_vec()));
        assert_eq!(cache.get(key).await?, None);

        cache.put(key, b"c".to_vec()).await?;
        assert_eq!(cache.replace(key, b"d".to_vec()).await?, Some(b"c".to_vec()));
        assert_eq!(grid.peek("account", key), Some(b"d".to_vec()));
        Ok(())
    }

    #[tokio::test]
    async fn test_stalled_calls_wait_for_each_other() -> Result<(), StorageError> {
        let grid = InMemoryGrid::new();
        let cache = grid.manager().get_cache("account")?;
        let (first, second) = (new_record_id(), new_record_id());

        grid.stall_next(CacheOp::Put, 2);
        let (a, b) = tokio::join!(
            cache.put(first, b"1".to_vec()),
            cache.put(second, b"2".to_vec())
        );
        assert_eq!((a?, b?), (None, None));
        assert_eq!(grid.entry_count("account"), 2);

        // Exhausted: the next put goes straight through.
        cache.put(first, b"3".to_vec()).await?;
        assert_eq!(grid.peek("account", first), Some(b"3".to_vec()));
        Ok(())
    }

    #[tokio::test]
    async fn test_stopped_manager_fails_calls() -> Result<(), StorageError> {
        let grid = InMemoryGrid::new();
        let manager = grid.manager();
        let cache = manager.get_cache("account")?;
        manager.stop().await?;

        assert!(!manager.is_running());
        assert_eq!(cache.get(new_record_id()).await, Err(StorageError::ManagerStopped));
        assert!(matches!(manager.get_cache("account"), Err(StorageError::ManagerStopped)));
        Ok(())
    }

    #[tokio::test]
    async fn test_strict_caches() -> Result<(), StorageError> {
        let grid = InMemoryGrid::new().with_strict_caches();
        let manager = grid.manager();
        assert!(matches!(
            manager.get_cache("missing"),
            Err(StorageError::CacheNotFound { .. })
        ));
        grid.define_cache("present");
        assert_eq!(manager.get_cache("present")?.name(), "present");
        Ok(())
    }

    #[tokio::test]
    async fn test_connect_fault_and_counters() {
        let grid = InMemoryGrid::new();
        grid.inject_fault(CacheOp::Connect);
        let failed = grid.connect(&endpoint()).await;
        assert!(matches!(failed, Err(StorageError::ConnectFailed { .. })));
        assert_eq!(grid.connections(), 0);

        let manager = grid.connect(&endpoint()).await;
        assert!(manager.is_ok());
        assert_eq!(grid.connections(), 1);
    }

    #[tokio::test]
    async fn test_clones_share_data() -> Result<(), StorageError> {
        let grid = InMemoryGrid::new();
        let other = grid.clone();
        let key = new_record_id();
        grid.seed("account", key, b"v".to_vec());
        assert_eq!(other.entry_count("account"), 1);
        assert_eq!(other.manager().get_cache("account")?.get(key).await?, Some(b"v".to_vec()));
        Ok(())
    }
}
