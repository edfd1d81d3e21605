//! Management REST Routes
//!
//! Binds every route of a [`ManagementRegistry`] under `/management`.
//! GET invokes an accessor; POST invokes a mutator with the body's `value`
//! or runs an action.

use std::sync::Arc;

use axum::{body::Bytes, routing::MethodRouter, Json, Router};
use serde_json::Value as JsonValue;

use crate::error::{ApiError, ApiResult};
use crate::management::{invoke, ManagementRegistry, ManagementRoute};

async fn run(route: ManagementRoute, body: Option<JsonValue>) -> ApiResult<Json<JsonValue>> {
    match invoke(&route, body.as_ref()).await {
        Ok(reply) => Ok(Json(reply)),
        Err(err) => {
            tracing::warn!(method = %route.method, error = %err, "Management invocation failed");
            Err(err)
        }
    }
}

/// Parse an optional POST body. Shape errors are invocation errors.
fn post_body(bytes: &Bytes) -> ApiResult<Option<JsonValue>> {
    if bytes.is_empty() {
        return Ok(None);
    }
    serde_json::from_slice(bytes)
        .map(Some)
        .map_err(|e| ApiError::internal_error(format!("Invalid JSON: {}", e)))
}

/// Create the management router.
pub fn create_router(registry: Arc<ManagementRegistry>) -> Router {
    let mut router = Router::new();

    for path in registry.paths() {
        let mut methods: MethodRouter = MethodRouter::new();

        if let Some(route) = registry.lookup("GET", &path).cloned() {
            methods = methods.get(move || {
                let route = route.clone();
                async move { run(route, None).await }
            });
        }

        if let Some(route) = registry.lookup("POST", &path).cloned() {
            methods = methods.post(move |bytes: Bytes| {
                let route = route.clone();
                async move {
                    match post_body(&bytes) {
                        Ok(body) => run(route, body).await,
                        Err(err) => Err(err),
                    }
                }
            });
        }

        router = router.route(&path, methods);
    }

    router
}
