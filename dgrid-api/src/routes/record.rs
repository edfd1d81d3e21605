//! Record REST Routes
//!
//! Thin HTTP adapter over the event bus. Every request becomes an operation
//! envelope sent to the record service's address; the reply's status code
//! becomes the HTTP status.
//!
//! - `GET    /:id` -> `get`
//! - `POST   /`    -> `create`
//! - `PUT    /:id` -> `update`
//! - `DELETE /:id` -> `remove`

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use dgrid_core::{parse_record_id, RecordId};
use serde_json::{json, Value as JsonValue};

use crate::bus::{Envelope, EventBus, Reply};
use crate::dispatcher::Operation;
use crate::engine::ID_FIELD;
use crate::error::{ApiError, ApiResult};

// ============================================================================
// STATE
// ============================================================================

/// Shared state for the record routes.
#[derive(Clone)]
pub struct RecordRouteState {
    pub bus: EventBus,
    pub address: Arc<str>,
}

impl RecordRouteState {
    pub fn new(bus: EventBus, address: impl Into<Arc<str>>) -> Self {
        Self {
            bus,
            address: address.into(),
        }
    }

    async fn send(&self, operation: Operation, body: JsonValue) -> ApiResult<Response> {
        let envelope = Envelope::for_operation(operation.as_str(), body);
        let reply = self.bus.request(&self.address, envelope).await?;
        Ok(reply_response(reply))
    }
}

// ============================================================================
// HANDLERS
// ============================================================================

async fn get_record(
    State(state): State<RecordRouteState>,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    let id = path_id(&id)?;
    state.send(Operation::Get, id_body(id)).await
}

async fn create_record(State(state): State<RecordRouteState>, body: Bytes) -> ApiResult<Response> {
    let body = json_body(&body)?;
    state.send(Operation::Create, body).await
}

async fn update_record(
    State(state): State<RecordRouteState>,
    Path(id): Path<String>,
    body: Bytes,
) -> ApiResult<Response> {
    let id = path_id(&id)?;
    let mut body = json_body(&body)?;
    let fields = body
        .as_object_mut()
        .ok_or_else(|| ApiError::invalid_input("update body must be a JSON object"))?;

    let body_id = fields
        .get(ID_FIELD)
        .map(|v| v.as_str().and_then(|text| parse_record_id(text).ok()));
    match body_id {
        None => {
            fields.insert(ID_FIELD.to_string(), json!(id.to_string()));
        }
        Some(Some(found)) if found == id => {}
        Some(_) => {
            return Err(ApiError::invalid_input(
                "body id does not match the id in the path",
            ))
        }
    }
    state.send(Operation::Update, body).await
}

async fn remove_record(
    State(state): State<RecordRouteState>,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    let id = path_id(&id)?;
    state.send(Operation::Remove, id_body(id)).await
}

// ============================================================================
// HELPERS
// ============================================================================

fn path_id(raw: &str) -> ApiResult<RecordId> {
    Ok(parse_record_id(raw)?)
}

fn id_body(id: RecordId) -> JsonValue {
    json!({ ID_FIELD: id.to_string() })
}

fn json_body(bytes: &Bytes) -> ApiResult<JsonValue> {
    if bytes.is_empty() {
        return Err(ApiError::invalid_input("request body is empty"));
    }
    Ok(serde_json::from_slice(bytes)?)
}

/// Turn a bus reply into an HTTP response. 404 and 204 carry no body.
pub fn reply_response(reply: Reply) -> Response {
    let status = reply.status();
    if status == StatusCode::NOT_FOUND || status == StatusCode::NO_CONTENT {
        return status.into_response();
    }
    match reply.result {
        Some(result) => (status, Json(result)).into_response(),
        None => status.into_response(),
    }
}

// ============================================================================
// ROUTER
// ============================================================================

/// Create the record router.
pub fn create_router(bus: EventBus, address: impl Into<Arc<str>>) -> Router {
    Router::new()
        .route("/", post(create_record))
        .route(
            "/:id",
            get(get_record).put(update_record).delete(remove_record),
        )
        .with_state(RecordRouteState::new(bus, address))
}
