//! Cache handle lifecycle.
//!
//! A service owns exactly one handle to its named cache. The handle is
//! created lazily on first use and dropped whenever a cache call faults, so
//! the next request asks the manager for a fresh one. This component never
//! retries or backs off on its own; callers decide what to do with a
//! failed acquisition.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use dgrid_core::StorageError;
use tracing::{debug, warn};

use crate::remote::{CacheManager, RemoteCache};

/// Handle lifecycle transitions reported to an observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleEvent {
    /// A new handle was obtained from the manager.
    Acquired,
    /// A live handle was dropped.
    Invalidated,
}

type Observer = Arc<dyn Fn(HandleEvent) + Send + Sync>;

/// Lazy singleton-with-reset around the service's cache handle.
pub struct CacheHandleManager {
    cache_name: String,
    manager: RwLock<Option<Arc<dyn CacheManager>>>,
    handle: Mutex<Option<Arc<dyn RemoteCache>>>,
    acquisitions: AtomicU64,
    observer: Option<Observer>,
}

impl CacheHandleManager {
    pub fn new(cache_name: impl Into<String>) -> Self {
        Self {
            cache_name: cache_name.into(),
            manager: RwLock::new(None),
            handle: Mutex::new(None),
            acquisitions: AtomicU64::new(0),
            observer: None,
        }
    }

    /// Report acquisitions and invalidations to `observer`.
    pub fn with_observer(mut self, observer: impl Fn(HandleEvent) + Send + Sync + 'static) -> Self {
        self.observer = Some(Arc::new(observer));
        self
    }

    pub fn cache_name(&self) -> &str {
        &self.cache_name
    }

    /// Install a connected manager. Any existing handle is dropped.
    pub fn install_manager(&self, manager: Arc<dyn CacheManager>) -> Result<(), StorageError> {
        let mut slot = self.manager.write().map_err(|_| StorageError::LockPoisoned)?;
        *slot = Some(manager);
        drop(slot);
        self.invalidate();
        debug!(cache = %self.cache_name, "Cache manager installed");
        Ok(())
    }

    /// Remove and return the installed manager. Any existing handle is dropped.
    pub fn take_manager(&self) -> Result<Option<Arc<dyn CacheManager>>, StorageError> {
        let taken = self
            .manager
            .write()
            .map_err(|_| StorageError::LockPoisoned)?
            .take();
        self.invalidate();
        Ok(taken)
    }

    /// True if a manager is installed and still running.
    pub fn is_connected(&self) -> bool {
        self.manager
            .read()
            .map(|slot| slot.as_ref().map(|m| m.is_running()).unwrap_or(false))
            .unwrap_or(false)
    }

    /// True if a handle is currently held.
    pub fn has_handle(&self) -> bool {
        self.handle.lock().map(|slot| slot.is_some()).unwrap_or(false)
    }

    /// Number of handles obtained from the manager so far.
    pub fn acquisitions(&self) -> u64 {
        self.acquisitions.load(Ordering::SeqCst)
    }

    /// Return the current handle, creating it on first use.
    ///
    /// Fails with [`StorageError::ManagerUnavailable`] when no manager is
    /// installed. A failed lookup leaves the slot empty.
    pub fn acquire(&self) -> Result<Arc<dyn RemoteCache>, StorageError> {
        let mut slot = self.handle.lock().map_err(|_| StorageError::LockPoisoned)?;
        if let Some(handle) = slot.as_ref() {
            return Ok(Arc::clone(handle));
        }

        let manager = self
            .manager
            .read()
            .map_err(|_| StorageError::LockPoisoned)?
            .clone()
            .ok_or(StorageError::ManagerUnavailable)?;

        let handle = manager.get_cache(&self.cache_name)?;
        *slot = Some(Arc::clone(&handle));
        drop(slot);

        self.acquisitions.fetch_add(1, Ordering::SeqCst);
        debug!(cache = %self.cache_name, "Cache handle acquired");
        self.notify(HandleEvent::Acquired);
        Ok(handle)
    }

    /// Drop the current handle so the next [`acquire`](Self::acquire)
    /// recreates it.
    pub fn invalidate(&self) {
        let had_handle = match self.handle.lock() {
            Ok(mut slot) => slot.take().is_some(),
            Err(poisoned) => {
                warn!(cache = %self.cache_name, "Cache handle lock poisoned, resetting");
                poisoned.into_inner().take().is_some()
            }
        };
        if had_handle {
            debug!(cache = %self.cache_name, "Cache handle invalidated");
            self.notify(HandleEvent::Invalidated);
        }
    }

    fn notify(&self, event: HandleEvent) {
        if let Some(observer) = &self.observer {
            observer(event);
        }
    }
}

impl std::fmt::Debug for CacheHandleManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheHandleManager")
            .field("cache_name", &self.cache_name)
            .field("connected", &self.is_connected())
            .field("has_handle", &self.has_handle())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{CacheOp, InMemoryGrid};
    use dgrid_core::new_record_id;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_acquire_without_manager_fails() {
        let handles = CacheHandleManager::new("account");
        let err = handles.acquire().err();
        assert_eq!(err, Some(StorageError::ManagerUnavailable));
        assert!(!handles.has_handle());
        assert!(!handles.is_connected());
    }

    #[test]
    fn test_acquire_is_lazy_and_cached() -> Result<(), StorageError> {
        let grid = InMemoryGrid::new();
        let handles = CacheHandleManager::new("account");
        handles.install_manager(grid.manager())?;
        assert!(handles.is_connected());
        assert!(!handles.has_handle());
        assert_eq!(grid.cache_lookups(), 0);

        let first = handles.acquire()?;
        let second = handles.acquire()?;
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.name(), "account");
        assert_eq!(grid.cache_lookups(), 1);
        assert_eq!(handles.acquisitions(), 1);
        Ok(())
    }

    #[test]
    fn test_invalidate_forces_reacquire() -> Result<(), StorageError> {
        let grid = InMemoryGrid::new();
        let handles = CacheHandleManager::new("account");
        handles.install_manager(grid.manager())?;

        handles.acquire()?;
        handles.invalidate();
        assert!(!handles.has_handle());

        handles.acquire()?;
        assert_eq!(grid.cache_lookups(), 2);
        Ok(())
    }

    #[test]
    fn test_failed_lookup_leaves_slot_empty() -> Result<(), StorageError> {
        let grid = InMemoryGrid::new();
        let handles = CacheHandleManager::new("account");
        handles.install_manager(grid.manager())?;

        grid.inject_fault(CacheOp::GetCache);
        assert!(handles.acquire().is_err());
        assert!(!handles.has_handle());
        assert!(handles.acquire().is_ok());
        Ok(())
    }

    #[tokio::test]
    async fn test_take_manager_drops_handle() -> Result<(), StorageError> {
        let grid = InMemoryGrid::new();
        let handles = CacheHandleManager::new("account");
        handles.install_manager(grid.manager())?;
        let cache = handles.acquire()?;
        cache.put(new_record_id(), b"v".to_vec()).await?;

        let manager = handles.take_manager()?;
        assert!(manager.is_some());
        assert!(!handles.has_handle());
        assert!(!handles.is_connected());
        assert_eq!(handles.acquire().err(), Some(StorageError::ManagerUnavailable));
        Ok(())
    }

    #[test]
    fn test_observer_sees_transitions() -> Result<(), StorageError> {
        let acquired = Arc::new(AtomicUsize::new(0));
        let invalidated = Arc::new(AtomicUsize::new(0));
        let (a, i) = (Arc::clone(&acquired), Arc::clone(&invalidated));
        let handles = CacheHandleManager::new("account").with_observer(move |event| match event {
            HandleEvent::Acquired => {
                a.fetch_add(1, Ordering::SeqCst);
            }
            HandleEvent::Invalidated => {
                i.fetch_add(1, Ordering::SeqCst);
            }
        });
        handles.install_manager(InMemoryGrid::new().manager())?;

        handles.acquire()?;
        handles.invalidate();
        handles.invalidate();
        assert_eq!(acquired.load(Ordering::SeqCst), 1);
        assert_eq!(invalidated.load(Ordering::SeqCst), 1);
        Ok(())
    }
}
