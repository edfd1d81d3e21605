//! HTTP Routes Module
//!
//! Assembles the HTTP surface of one record service:
//! - Record CRUD routes under `/<mount>` (bridged onto the event bus)
//! - Management routes under `/management/*`
//! - `/info` - index of management method names
//! - `/` - index of every registered route path
//! - `/metrics` - Prometheus scrape endpoint

pub mod management;
pub mod record;

use std::sync::Arc;

use axum::{middleware::from_fn, routing::get, Json, Router};
use serde_json::{json, Value as JsonValue};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::bus::EventBus;
use crate::error::{ApiError, ApiResult};
use crate::management::ManagementRegistry;
use crate::telemetry::{metrics_handler, observability_middleware};

pub use management::create_router as management_router;
pub use record::create_router as record_router;

/// Description served by `GET /info`.
pub const INFO_DESCRIPTION: &str = "Available management method(s)";

/// Description served by `GET /`.
pub const INDEX_DESCRIPTION: &str = "Available route(s)";

// ============================================================================
// ROUTER BUILDER
// ============================================================================

/// Builder for a record service's HTTP router.
pub struct ServiceRouterBuilder {
    mount: String,
    bus: EventBus,
    address: String,
    registry: Arc<ManagementRegistry>,
}

impl ServiceRouterBuilder {
    /// `mount` is the path the record routes live under, e.g. `/account`.
    pub fn new(
        mount: impl Into<String>,
        bus: EventBus,
        address: impl Into<String>,
        registry: Arc<ManagementRegistry>,
    ) -> ApiResult<Self> {
        let mount = mount.into();
        if !mount.starts_with('/') || mount.len() < 2 || mount.ends_with('/') {
            return Err(ApiError::invalid_input(format!(
                "record routes need a non-root mount path, got '{}'",
                mount
            )));
        }
        Ok(Self {
            mount,
            bus,
            address: address.into(),
            registry,
        })
    }

    /// Every route path the built router serves, in registration order.
    pub fn route_paths(&self) -> Vec<String> {
        let mut paths = vec![
            "/".to_string(),
            "/info".to_string(),
            "/metrics".to_string(),
            self.mount.clone(),
            format!("{}/:id", self.mount),
        ];
        paths.extend(self.registry.paths());
        paths
    }

    /// Build the router.
    ///
    /// # Middleware Order (outer to inner)
    /// 1. CORS - permissive, handles preflight requests
    /// 2. HTTP trace spans
    /// 3. Observability - request metrics
    pub fn build(self) -> Router {
        let index = Arc::new(json!({
            "description": INDEX_DESCRIPTION,
            "routes": self.route_paths(),
        }));
        let info = Arc::new(json!({
            "description": INFO_DESCRIPTION,
            "methods": self.registry.method_names(),
        }));

        tracing::debug!(
            mount = %self.mount,
            address = %self.address,
            management_routes = self.registry.routes().len(),
            "Service router built"
        );

        Router::new()
            .route("/", get(move || serve_json(Arc::clone(&index))))
            .route("/info", get(move || serve_json(Arc::clone(&info))))
            .route("/metrics", get(metrics_handler))
            .nest(&self.mount, record::create_router(self.bus, self.address))
            .merge(management::create_router(self.registry))
            .layer(from_fn(observability_middleware))
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
    }
}

async fn serve_json(body: Arc<JsonValue>) -> Json<JsonValue> {
    Json(body.as_ref().clone())
}
