//! Record Engine - CRUD over the remote cache
//!
//! One engine serves one record type. It turns create/get/update/remove
//! requests into cache calls, applies the optimistic versioning protocol,
//! and maps every outcome onto a [`Reply`] or an [`ApiError`].
//!
//! # Fault handling
//!
//! Any error raised by a cache call drops the service's cache handle before
//! the error is returned, so the next request re-acquires a fresh one. A
//! normal miss on `get` is a reply, not an error, and leaves the handle
//! alone.
//!
//! # Update window
//!
//! The update path reads the stored record, compares tokens, then calls
//! `replace`. The cache has no compare-and-swap, and nothing re-checks the
//! token at replace time; two updaters presenting the same token can both
//! pass the check, and the later write wins.

use std::marker::PhantomData;
use std::sync::Arc;

use dgrid_core::{
    assign_version, is_version_set, parse_record_id, renew_version, tokens_equal, Record,
    RecordId, StorageError, Versioning,
};
use dgrid_storage::{CacheHandleManager, RemoteCache};
use serde_json::Value as JsonValue;
use tracing::{debug, trace, warn};

use crate::bus::Reply;
use crate::error::{ApiError, ApiResult};
use crate::telemetry::with_metrics;

/// Body field carrying the record key.
pub const ID_FIELD: &str = "id";

/// CRUD state machine for one record type.
pub struct RecordEngine<R: Record> {
    handles: Arc<CacheHandleManager>,
    versioning: Versioning,
    _record: PhantomData<fn() -> R>,
}

impl<R: Record> RecordEngine<R> {
    /// Bind an engine to a handle manager. The record type's versioning
    /// capability is read here, once.
    pub fn new(handles: Arc<CacheHandleManager>) -> Self {
        Self {
            handles,
            versioning: R::VERSIONING,
            _record: PhantomData,
        }
    }

    pub fn handles(&self) -> &Arc<CacheHandleManager> {
        &self.handles
    }

    pub fn versioning(&self) -> Versioning {
        self.versioning
    }

    // ========================================================================
    // ENVELOPE ENTRY POINTS
    // ========================================================================

    /// Create from a record body. Replies 201 with the stored record.
    pub async fn create(&self, body: &JsonValue) -> ApiResult<Reply> {
        let record = R::from_json(body)?;
        let stored = self.create_record(record).await?;
        Ok(Reply::created(encode(&stored)?))
    }

    /// Fetch by id. Replies 200 with the record, or 404 with no body.
    pub async fn get(&self, body: &JsonValue) -> ApiResult<Reply> {
        let id = lookup_key(body)?;
        match self.get_record(id).await? {
            Some(record) => Ok(Reply::ok(encode(&record)?)),
            None => {
                debug!(record_type = R::RECORD_TYPE, id = %id, "Record not found");
                Ok(Reply::not_found())
            }
        }
    }

    /// Update from a record body carrying its id. Replies 200 with the
    /// stored record.
    pub async fn update(&self, body: &JsonValue) -> ApiResult<Reply> {
        lookup_key(body)?;
        let candidate = R::from_json(body)?;
        let stored = self.update_record(candidate).await?;
        Ok(Reply::ok(encode(&stored)?))
    }

    /// Remove by id. Always replies 204 once the cache call succeeds.
    pub async fn remove(&self, body: &JsonValue) -> ApiResult<Reply> {
        let id = lookup_key(body)?;
        self.remove_record(id).await?;
        Ok(Reply::no_content())
    }

    // ========================================================================
    // TYPED OPERATIONS
    // ========================================================================

    /// Store a new record and return it as read back from the cache.
    pub async fn create_record(&self, mut record: R) -> ApiResult<R> {
        if self.versioning.is_versioned() {
            if is_version_set(&record) {
                return Err(ApiError::version_preset());
            }
            assign_version(&mut record);
        }

        let id = record.id();
        let cache = self.cache()?;

        if self.call(cache.contains_key(id).await)? {
            return Err(ApiError::key_exists(id, cache.name()));
        }

        let bytes = record.encode()?;
        self.call(cache.put(id, bytes).await)?;
        trace!(record_type = R::RECORD_TYPE, id = %id, "Record put");

        self.read_back(&*cache, id)
            .await?
            .ok_or_else(|| ApiError::consistency_failure("created", id))
    }

    /// Fetch a record. `None` is a normal miss.
    pub async fn get_record(&self, id: RecordId) -> ApiResult<Option<R>> {
        let cache = self.cache()?;
        self.read_back(&*cache, id).await
    }

    /// Replace a stored record and return it as read back from the cache.
    pub async fn update_record(&self, mut candidate: R) -> ApiResult<R> {
        let id = candidate.id();
        let cache = self.cache()?;

        if self.versioning.is_versioned() {
            let current = match self.read_back(&*cache, id).await? {
                Some(current) if is_version_set(&current) => current,
                _ => return Err(ApiError::not_versionable()),
            };
            if !tokens_equal(&current, &candidate) {
                debug!(record_type = R::RECORD_TYPE, id = %id, "Update rejected, version mismatch");
                return Err(ApiError::version_mismatch());
            }
            renew_version(&mut candidate);
        }

        let bytes = candidate.encode()?;
        self.call(cache.replace(id, bytes).await)?;
        trace!(record_type = R::RECORD_TYPE, id = %id, "Record replaced");

        self.read_back(&*cache, id)
            .await?
            .ok_or_else(|| ApiError::consistency_failure("replaced", id))
    }

    /// Remove a record. Removing an absent key succeeds.
    pub async fn remove_record(&self, id: RecordId) -> ApiResult<()> {
        let cache = self.cache()?;
        let previous = self.call(cache.remove(id).await)?;
        trace!(
            record_type = R::RECORD_TYPE,
            id = %id,
            existed = previous.is_some(),
            "Record removed"
        );
        Ok(())
    }

    // ========================================================================
    // CACHE ACCESS
    // ========================================================================

    fn cache(&self) -> ApiResult<Arc<dyn RemoteCache>> {
        self.handles.acquire().map_err(|e| self.fault(e))
    }

    async fn read_back(&self, cache: &dyn RemoteCache, id: RecordId) -> ApiResult<Option<R>> {
        match self.call(cache.get(id).await)? {
            Some(bytes) => Ok(Some(R::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Pass a cache call result through, invalidating the handle on error.
    fn call<T>(&self, result: Result<T, StorageError>) -> ApiResult<T> {
        result.map_err(|e| self.fault(e))
    }

    fn fault(&self, err: StorageError) -> ApiError {
        warn!(
            record_type = R::RECORD_TYPE,
            cache = %self.handles.cache_name(),
            error = %err,
            "Cache fault, dropping handle"
        );
        self.handles.invalidate();
        with_metrics(|m| m.cache_fault());
        ApiError::from(err)
    }
}

/// Extract the record key from a get/remove body: either `{"id": "..."}`
/// or a bare string.
pub fn lookup_key(body: &JsonValue) -> ApiResult<RecordId> {
    let text = match body {
        JsonValue::String(text) => text.as_str(),
        JsonValue::Object(map) => match map.get(ID_FIELD) {
            Some(JsonValue::String(text)) => text.as_str(),
            Some(_) => return Err(ApiError::invalid_input("id must be a string")),
            None => "",
        },
        _ => "",
    };
    Ok(parse_record_id(text)?)
}

fn encode<R: Record>(record: &R) -> ApiResult<JsonValue> {
    record
        .to_json()
        .map_err(|e| ApiError::internal_error(e.to_string()))
}
