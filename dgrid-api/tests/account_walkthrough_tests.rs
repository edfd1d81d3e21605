//! End-to-end account walkthrough over the event bus
//!
//! Drives a started account service purely through operation envelopes:
//! create, duplicate create, get, update, stale update, remove, get.

use std::sync::Arc;

use async_trait::async_trait;
use axum::http::StatusCode;
use dgrid_api::{
    ApiError, ApiResult, DataGridService, Envelope, ErrorCode, EventBus, HookOutcome,
    OperationHook, Reply,
};
use dgrid_test_utils::assertions::{assert_absent, assert_id_field, assert_stored};
use dgrid_test_utils::fixtures::{account_config, usd_account_body};
use dgrid_test_utils::*;
use serde_json::{json, Value as JsonValue};

const ADDRESS: &str = "dgrid.eventbus.account";

async fn started_service(grid: &InMemoryGrid) -> ApiResult<(EventBus, DataGridService<AccountRecord>)> {
    let bus = EventBus::default();
    let service = DataGridService::new(account_config(), bus.clone(), Arc::new(grid.clone()))?;
    service.start().await?;
    Ok((bus, service))
}

async fn send(bus: &EventBus, operation: &str, body: JsonValue) -> ApiResult<Reply> {
    bus.request(ADDRESS, Envelope::for_operation(operation, body))
        .await
}

fn result_of(reply: &Reply) -> ApiResult<JsonValue> {
    reply
        .result
        .clone()
        .ok_or_else(|| ApiError::internal_error("reply carries no result"))
}

#[tokio::test]
async fn test_account_walkthrough() -> ApiResult<()> {
    let grid = InMemoryGrid::new();
    let (bus, service) = started_service(&grid).await?;

    // Create
    let created = send(&bus, "create", usd_account_body()).await?;
    assert_eq!(created.status(), StatusCode::CREATED);
    let created = result_of(&created)?;
    let id = assert_id_field(&created, "id");
    let version = assert_id_field(&created, "version");
    assert_eq!(created["currencyISO4217"], "USD");
    assert_eq!(created["amount"], "0.00");

    // Create again with the returned id forced
    let mut duplicate = usd_account_body();
    duplicate["id"] = json!(id.to_string());
    let err = send(&bus, "create", duplicate).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::EntityAlreadyExists);
    assert!(err.message.starts_with("key already exists"));

    // Get
    let fetched = send(&bus, "get", json!({"id": id.to_string()})).await?;
    assert_eq!(fetched.status(), StatusCode::OK);
    assert_eq!(result_of(&fetched)?, created);

    // Update with the stored version
    let mut change = created.clone();
    change["amount"] = json!("10000.00");
    let updated = send(&bus, "update", change.clone()).await?;
    assert_eq!(updated.status(), StatusCode::OK);
    let updated = result_of(&updated)?;
    assert_eq!(updated["amount"], "10000.00");
    assert_ne!(assert_id_field(&updated, "version"), version);

    // Retry with the old version
    let err = send(&bus, "update", change).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::VersionMismatch);
    assert_eq!(err.message, "wrong version");
    let stored: AccountRecord = serde_json::from_value(updated.clone())?;
    assert_stored(&grid, "account", &stored);

    // Remove, then get
    let removed = send(&bus, "remove", json!({"id": id.to_string()})).await?;
    assert_eq!(removed.status(), StatusCode::NO_CONTENT);
    assert!(removed.result.is_none());
    assert_absent(&grid, "account", id);

    let gone = send(&bus, "get", json!({"id": id.to_string()})).await?;
    assert_eq!(gone.status(), StatusCode::NOT_FOUND);

    service.stop().await
}

#[tokio::test]
async fn test_create_with_version_is_rejected() -> ApiResult<()> {
    let grid = InMemoryGrid::new();
    let (bus, service) = started_service(&grid).await?;

    let mut body = usd_account_body();
    body["version"] = json!(VersionToken::fresh().to_string());
    let err = send(&bus, "create", body).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::VersionPreset);
    assert_eq!(grid.entry_count("account"), 0);

    service.stop().await
}

#[tokio::test]
async fn test_protocol_errors() -> ApiResult<()> {
    let grid = InMemoryGrid::new();
    let (bus, service) = started_service(&grid).await?;

    let err = bus
        .request(ADDRESS, Envelope::new(json!({})))
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::MissingOperation);

    let err = send(&bus, "merge", json!({})).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::UnknownOperation);
    assert!(err.message.contains("merge"));

    let err = send(&bus, "get", json!({"id": "12"})).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::InvalidInput);
    assert_eq!(grid.cache_lookups(), 0);

    service.stop().await
}

#[tokio::test]
async fn test_cache_fault_recovers_on_next_request() -> ApiResult<()> {
    let grid = InMemoryGrid::new();
    let (bus, service) = started_service(&grid).await?;

    let created = result_of(&send(&bus, "create", usd_account_body()).await?)?;
    let id = assert_id_field(&created, "id");
    assert!(service.handles().has_handle());

    grid.inject_fault(CacheOp::Get);
    let err = send(&bus, "get", json!({"id": id.to_string()})).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::CacheFault);
    assert!(!service.handles().has_handle());

    let fetched = send(&bus, "get", json!({"id": id.to_string()})).await?;
    assert_eq!(fetched.status(), StatusCode::OK);
    assert!(service.handles().has_handle());
    assert_eq!(service.handles().acquisitions(), 2);

    service.stop().await
}

#[tokio::test]
async fn test_stopped_service_has_no_handlers() -> ApiResult<()> {
    let grid = InMemoryGrid::new();
    let (bus, service) = started_service(&grid).await?;
    service.stop().await?;

    let err = send(&bus, "get", json!({"id": new_record_id().to_string()}))
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::NoHandlers);
    Ok(())
}

struct FreezeGuard;

#[async_trait]
impl OperationHook for FreezeGuard {
    async fn intercept(&self, operation: &str, envelope: &Envelope) -> HookOutcome {
        let frozen = envelope.body.get("status").and_then(JsonValue::as_str) == Some("FREEZE");
        if operation.eq_ignore_ascii_case("update") && frozen {
            HookOutcome::Handled(Err(ApiError::invalid_input("frozen accounts are read-only")))
        } else {
            HookOutcome::Continue
        }
    }
}

#[tokio::test]
async fn test_hook_vetoes_before_routing() -> ApiResult<()> {
    let grid = InMemoryGrid::new();
    let bus = EventBus::default();
    let service: DataGridService<AccountRecord> = DataGridService::with_hook(
        account_config(),
        bus.clone(),
        Arc::new(grid.clone()),
        Arc::new(FreezeGuard),
    )?;
    service.start().await?;

    let created = result_of(&send(&bus, "create", usd_account_body()).await?)?;
    let mut change = created.clone();
    change["status"] = json!("FREEZE");
    change["amount"] = json!("5.00");

    let err = send(&bus, "update", change).await.unwrap_err();
    assert_eq!(err.message, "frozen accounts are read-only");

    let stored = result_of(&send(&bus, "get", json!({"id": created["id"]})).await?)?;
    assert_eq!(stored["amount"], "0.00");

    service.stop().await
}

#[tokio::test]
async fn test_unversioned_update_overwrites() -> ApiResult<()> {
    let grid = InMemoryGrid::new();
    let bus = EventBus::default();
    let service: DataGridService<AuditNote> = DataGridService::new(
        account_config().with_namespace("notes"),
        bus.clone(),
        Arc::new(grid.clone()),
    )?;
    service.start().await?;

    let note = AuditNote::new("opened");
    let created = bus
        .request("dgrid.eventbus.notes", Envelope::for_operation("create", serde_json::to_value(&note)?))
        .await?;
    assert_eq!(created.status(), StatusCode::CREATED);

    let edited = AuditNote {
        text: "closed".to_string(),
        ..note.clone()
    };
    let updated = bus
        .request("dgrid.eventbus.notes", Envelope::for_operation("update", serde_json::to_value(&edited)?))
        .await?;
    assert_eq!(updated.status(), StatusCode::OK);
    assert_stored(&grid, "notes", &edited);

    service.stop().await
}
