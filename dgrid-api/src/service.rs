//! Data-grid service lifecycle
//!
//! A [`DataGridService`] owns everything one record service needs at
//! runtime: its configuration, the cache handle manager, the event-bus
//! consumer, the HTTP server and the management registry.
//!
//! `start` bootstraps the cache manager and the HTTP server concurrently,
//! then registers the event-bus consumer. A failure to bind the HTTP port
//! is logged and tolerated; a failure to reach the cache fails start.

use std::net::SocketAddr;
use std::sync::{Arc, Weak};

use dgrid_core::{Record, ServiceConfig};
use dgrid_storage::{bootstrap_manager, CacheConnector, CacheEndpoint, CacheHandleManager, HandleEvent};
use futures_util::FutureExt;
use serde_json::Value as JsonValue;
use tokio::net::TcpListener;
use tokio::sync::{oneshot, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use crate::bus::EventBus;
use crate::dispatcher::{Dispatcher, OperationHook};
use crate::engine::RecordEngine;
use crate::error::{ApiError, ApiResult};
use crate::management::{ready, CapabilitySet, ManagementFuture, ManagementRegistry};
use crate::routes::ServiceRouterBuilder;
use crate::telemetry::with_metrics;

/// Capability set shared by every service.
pub const COMMON_MANAGEMENT: &str = "CommonServiceManagement";

/// Capability set specific to data-grid services.
pub const DATA_GRID_MANAGEMENT: &str = "DataGridServiceManagement";

/// Name reported by `getServiceName` after the namespace.
pub const SERVICE_KIND: &str = "DataGridService";

// ============================================================================
// RUNNING PARTS
// ============================================================================

struct HttpServer {
    local_addr: SocketAddr,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

struct ServiceInner<R: Record> {
    config: RwLock<ServiceConfig>,
    bus: EventBus,
    connector: Arc<dyn CacheConnector>,
    handles: Arc<CacheHandleManager>,
    dispatcher: Dispatcher<R>,
    registry: Arc<ManagementRegistry>,
    http: Mutex<Option<HttpServer>>,
    consumer: Mutex<Option<JoinHandle<()>>>,
    address: String,
}

/// One record service instance. Cloning shares the instance.
pub struct DataGridService<R: Record> {
    inner: Arc<ServiceInner<R>>,
}

impl<R: Record> Clone for DataGridService<R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<R: Record> DataGridService<R> {
    /// Create a stopped service.
    pub fn new(
        config: ServiceConfig,
        bus: EventBus,
        connector: Arc<dyn CacheConnector>,
    ) -> ApiResult<Self> {
        Self::build(config, bus, connector, None)
    }

    /// Create a stopped service whose dispatcher consults `hook` first.
    pub fn with_hook(
        config: ServiceConfig,
        bus: EventBus,
        connector: Arc<dyn CacheConnector>,
        hook: Arc<dyn OperationHook>,
    ) -> ApiResult<Self> {
        Self::build(config, bus, connector, Some(hook))
    }

    fn build(
        config: ServiceConfig,
        bus: EventBus,
        connector: Arc<dyn CacheConnector>,
        hook: Option<Arc<dyn OperationHook>>,
    ) -> ApiResult<Self> {
        let handles = Arc::new(
            CacheHandleManager::new(config.cache_name()).with_observer(|event| {
                with_metrics(|m| match event {
                    HandleEvent::Acquired => m.handle_acquired(),
                    HandleEvent::Invalidated => m.handle_invalidated(),
                })
            }),
        );
        let mut dispatcher = Dispatcher::new(Arc::new(RecordEngine::new(Arc::clone(&handles))));
        if let Some(hook) = hook {
            dispatcher = dispatcher.with_hook(hook);
        }
        let address = config.event_bus_address();

        let mut registration = Ok(());
        let inner = Arc::new_cyclic(|weak: &Weak<ServiceInner<R>>| {
            let registry = ManagementRegistry::from_capabilities(capabilities(weak))
                .unwrap_or_else(|e| {
                    registration = Err(e);
                    ManagementRegistry::new()
                });
            ServiceInner {
                config: RwLock::new(config),
                bus,
                connector,
                handles,
                dispatcher,
                registry: Arc::new(registry),
                http: Mutex::new(None),
                consumer: Mutex::new(None),
                address,
            }
        });
        registration?;

        Ok(Self { inner })
    }

    // ========================================================================
    // ACCESSORS
    // ========================================================================

    pub fn bus(&self) -> &EventBus {
        &self.inner.bus
    }

    pub fn address(&self) -> &str {
        &self.inner.address
    }

    pub fn handles(&self) -> &Arc<CacheHandleManager> {
        &self.inner.handles
    }

    pub fn dispatcher(&self) -> &Dispatcher<R> {
        &self.inner.dispatcher
    }

    pub fn registry(&self) -> &Arc<ManagementRegistry> {
        &self.inner.registry
    }

    pub async fn config(&self) -> ServiceConfig {
        self.inner.config.read().await.clone()
    }

    /// `<namespace>/DataGridService`.
    pub async fn service_name(&self) -> String {
        format!("{}/{}", self.inner.config.read().await.namespace, SERVICE_KIND)
    }

    /// Address the HTTP server is bound to, if it is running.
    pub async fn http_local_addr(&self) -> Option<SocketAddr> {
        self.inner.http.lock().await.as_ref().map(|s| s.local_addr)
    }

    /// Path the record routes are mounted under: the namespace, or the
    /// record type name when the namespace is empty.
    pub async fn mount_path(&self) -> String {
        let config = self.inner.config.read().await;
        if config.namespace.is_empty() {
            format!("/{}", R::RECORD_TYPE)
        } else {
            format!("/{}", config.namespace)
        }
    }

    /// Build the HTTP router for this service.
    pub async fn router(&self) -> ApiResult<axum::Router> {
        Ok(ServiceRouterBuilder::new(
            self.mount_path().await,
            self.inner.bus.clone(),
            self.inner.address.clone(),
            Arc::clone(&self.inner.registry),
        )?
        .build())
    }

    // ========================================================================
    // LIFECYCLE
    // ========================================================================

    /// Bring the service up.
    #[instrument(skip_all, fields(address = %self.inner.address))]
    pub async fn start(&self) -> ApiResult<()> {
        let (cache, http) = tokio::join!(self.create_cache_manager(), self.create_http_server());

        if let Err(e) = http {
            warn!(error = %e, "HTTP server did not start, continuing without it");
        }
        if let Err(e) = cache {
            error!(error = %e, "Cache manager bootstrap failed");
            self.destroy_http_server().await;
            return Err(e);
        }

        self.register_event_bus_handler().await;
        info!(service = %self.service_name().await, "Service started");
        Ok(())
    }

    /// Bring the service down. Safe to call more than once.
    #[instrument(skip_all, fields(address = %self.inner.address))]
    pub async fn stop(&self) -> ApiResult<()> {
        self.unregister_event_bus_handler().await;
        if let Some(server) = self.inner.http.lock().await.take() {
            let _ = server.shutdown.send(());
            if let Err(e) = server.task.await {
                warn!(error = %e, "HTTP server task ended abnormally");
            }
        }
        self.destroy_cache_manager().await?;
        info!("Service stopped");
        Ok(())
    }

    /// Connect the cache manager. No-op if one is already installed.
    pub async fn create_cache_manager(&self) -> ApiResult<()> {
        if self.inner.handles.is_connected() {
            debug!("Cache manager already connected");
            return Ok(());
        }
        let (endpoint, settle) = {
            let config = self.inner.config.read().await;
            (
                CacheEndpoint::new(config.cache_host.clone(), config.cache_port),
                config.cache_settle,
            )
        };
        bootstrap_manager(
            &self.inner.handles,
            Arc::clone(&self.inner.connector),
            endpoint,
            settle,
        )
        .await?;
        Ok(())
    }

    /// Stop and drop the cache manager, if any.
    pub async fn destroy_cache_manager(&self) -> ApiResult<()> {
        if let Some(manager) = self.inner.handles.take_manager()? {
            match manager.stop().await {
                Ok(()) => info!("Cache manager stopped"),
                Err(e) => warn!(error = %e, "Cache manager did not stop cleanly"),
            }
        }
        Ok(())
    }

    /// Bind and serve the HTTP router. No-op if already running.
    pub async fn create_http_server(&self) -> ApiResult<SocketAddr> {
        let mut slot = self.inner.http.lock().await;
        if let Some(server) = slot.as_ref() {
            return Ok(server.local_addr);
        }

        let bind = self.inner.config.read().await.http_bind_addr();
        let listener = TcpListener::bind(&bind)
            .await
            .map_err(|e| ApiError::internal_error(format!("failed to bind {}: {}", bind, e)))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| ApiError::internal_error(e.to_string()))?;

        let router = self.router().await?;
        let (shutdown, signal) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let served = axum::serve(listener, router)
                .with_graceful_shutdown(signal.map(|_| ()))
                .await;
            if let Err(e) = served {
                error!(error = %e, "HTTP server failed");
            }
        });

        info!(addr = %local_addr, "HTTP server listening");
        *slot = Some(HttpServer {
            local_addr,
            shutdown,
            task,
        });
        Ok(local_addr)
    }

    /// Signal the HTTP server to shut down without waiting for it.
    ///
    /// The server drains in-flight requests on its own task, so this can be
    /// invoked from a request the server itself is handling.
    pub async fn destroy_http_server(&self) {
        if let Some(server) = self.inner.http.lock().await.take() {
            let _ = server.shutdown.send(());
            info!(addr = %server.local_addr, "HTTP server shutting down");
        }
    }

    /// Start consuming the service's event-bus address.
    ///
    /// Each message is handled on its own task. Re-registering replaces the
    /// running consumer.
    pub async fn register_event_bus_handler(&self) {
        let mut slot = self.inner.consumer.lock().await;
        let mut consumer = self.inner.bus.consumer(&self.inner.address);
        let dispatcher = self.inner.dispatcher.clone();

        let task = tokio::spawn(async move {
            while let Some(message) = consumer.recv().await {
                let dispatcher = dispatcher.clone();
                tokio::spawn(async move { dispatcher.handle(message).await });
            }
            debug!(address = %consumer.address(), "Event bus consumer drained");
        });

        if let Some(previous) = slot.replace(task) {
            previous.abort();
        }
        info!(address = %self.inner.address, "Event bus handler registered");
    }

    /// Stop consuming the service's event-bus address.
    pub async fn unregister_event_bus_handler(&self) {
        let task = self.inner.consumer.lock().await.take();
        if self.inner.bus.unregister(&self.inner.address) {
            info!(address = %self.inner.address, "Event bus handler unregistered");
        }
        if let Some(task) = task {
            let _ = task.await;
        }
    }

    // ========================================================================
    // MUTABLE SETTINGS
    // ========================================================================

    /// Takes effect the next time the HTTP server is created.
    pub async fn set_http_server_host(&self, host: String) {
        self.inner.config.write().await.http_host = host;
    }

    /// Takes effect the next time the HTTP server is created.
    pub async fn set_http_server_port(&self, port: u16) {
        self.inner.config.write().await.http_port = port;
    }

    /// Takes effect the next time the cache manager is created.
    pub async fn set_cache_server_host(&self, host: String) {
        self.inner.config.write().await.cache_host = host;
    }

    /// Takes effect the next time the cache manager is created.
    pub async fn set_cache_server_port(&self, port: u16) {
        self.inner.config.write().await.cache_port = port;
    }
}

// ============================================================================
// MANAGEMENT CAPABILITIES
// ============================================================================

/// Run `f` against the live service, failing if it has been dropped.
fn managed<R, F, Fut>(weak: &Weak<ServiceInner<R>>, f: F) -> impl Fn() -> ManagementFuture + Send + Sync + 'static
where
    R: Record,
    F: Fn(DataGridService<R>) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = ApiResult<JsonValue>> + Send + 'static,
{
    let weak = weak.clone();
    move || -> ManagementFuture {
        match weak.upgrade() {
            Some(inner) => Box::pin(f(DataGridService { inner })),
            None => ready(Err(ApiError::internal_error("service is gone"))),
        }
    }
}

/// Like [`managed`], for mutators receiving a value.
fn managed_with<R, F, Fut>(
    weak: &Weak<ServiceInner<R>>,
    f: F,
) -> impl Fn(JsonValue) -> ManagementFuture + Send + Sync + 'static
where
    R: Record,
    F: Fn(DataGridService<R>, JsonValue) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = ApiResult<JsonValue>> + Send + 'static,
{
    let weak = weak.clone();
    move |value: JsonValue| -> ManagementFuture {
        match weak.upgrade() {
            Some(inner) => Box::pin(f(DataGridService { inner }, value)),
            None => ready(Err(ApiError::internal_error("service is gone"))),
        }
    }
}

fn reply_value(value: impl serde::Serialize) -> ApiResult<JsonValue> {
    Ok(serde_json::to_value(value)?)
}

fn done(result: ApiResult<impl Sized>) -> ApiResult<JsonValue> {
    result.map(|_| JsonValue::Null)
}

fn string_value(value: &JsonValue) -> ApiResult<String> {
    value
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| ApiError::internal_error(format!("expected a string, got {}", value)))
}

fn port_value(value: &JsonValue) -> ApiResult<u16> {
    let port = match value {
        JsonValue::Number(n) => n.as_u64(),
        JsonValue::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    };
    port.and_then(|p| u16::try_from(p).ok())
        .ok_or_else(|| ApiError::internal_error(format!("expected a port number, got {}", value)))
}

fn capabilities<R: Record>(weak: &Weak<ServiceInner<R>>) -> Vec<CapabilitySet> {
    let common = CapabilitySet::new(COMMON_MANAGEMENT)
        .accessor(
            "getServiceName",
            managed(weak, |s| async move { reply_value(s.service_name().await) }),
        )
        .action(
            "createHttpServer",
            managed(weak, |s| async move { done(s.create_http_server().await) }),
        )
        .action(
            "destroyHttpServer",
            managed(weak, |s| async move {
                s.destroy_http_server().await;
                done(Ok(()))
            }),
        )
        .accessor(
            "getHttpServerHost",
            managed(weak, |s| async move { reply_value(s.config().await.http_host) }),
        )
        .mutator(
            "setHttpServerHost",
            managed_with(weak, |s, value| async move {
                let parsed = string_value(&value);
                if let Ok(parsed) = &parsed {
                    s.set_http_server_host(parsed.clone()).await;
                }
                done(parsed)
            }),
        )
        .accessor(
            "getHttpServerPort",
            managed(weak, |s| async move { reply_value(s.config().await.http_port) }),
        )
        .mutator(
            "setHttpServerPort",
            managed_with(weak, |s, value| async move {
                let parsed = port_value(&value);
                if let Ok(parsed) = &parsed {
                    s.set_http_server_port(*parsed).await;
                }
                done(parsed)
            }),
        )
        .action(
            "registerEventBusHandler",
            managed(weak, |s| async move {
                s.register_event_bus_handler().await;
                done(Ok(()))
            }),
        )
        .action(
            "unregisterEventBusHandler",
            managed(weak, |s| async move {
                s.unregister_event_bus_handler().await;
                done(Ok(()))
            }),
        );

    let data_grid = CapabilitySet::new(DATA_GRID_MANAGEMENT)
        .action(
            "createCacheManager",
            managed(weak, |s| async move { done(s.create_cache_manager().await) }),
        )
        .action(
            "destroyCacheManager",
            managed(weak, |s| async move { done(s.destroy_cache_manager().await) }),
        )
        .accessor(
            "getCacheServerHost",
            managed(weak, |s| async move { reply_value(s.config().await.cache_host) }),
        )
        .mutator(
            "setCacheServerHost",
            managed_with(weak, |s, value| async move {
                let parsed = string_value(&value);
                if let Ok(parsed) = &parsed {
                    s.set_cache_server_host(parsed.clone()).await;
                }
                done(parsed)
            }),
        )
        .accessor(
            "getCacheServerPort",
            managed(weak, |s| async move { reply_value(s.config().await.cache_port) }),
        )
        .mutator(
            "setCacheServerPort",
            managed_with(weak, |s, value| async move {
                let parsed = port_value(&value);
                if let Ok(parsed) = &parsed {
                    s.set_cache_server_port(*parsed).await;
                }
                done(parsed)
            }),
        )
        .accessor(
            "isCacheConnected",
            managed(weak, |s| async move { reply_value(s.handles().is_connected()) }),
        );

    vec![common, data_grid]
}
