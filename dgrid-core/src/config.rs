//! Service Configuration Module
//!
//! Settings for a single DGRID service instance: where its HTTP surface
//! listens, where the remote cache lives, and which event-bus address and
//! cache name it owns. Loaded from environment variables with defaults
//! suited to a local development grid.

use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;

/// Default HTTP listen host.
pub const DEFAULT_HTTP_HOST: &str = "127.0.0.1";
/// Default HTTP listen port.
pub const DEFAULT_HTTP_PORT: u16 = 8080;
/// Default remote cache host.
pub const DEFAULT_CACHE_HOST: &str = "127.0.0.1";
/// Default remote cache port (Hot Rod).
pub const DEFAULT_CACHE_PORT: u16 = 11222;
/// Default event-bus address prefix.
pub const DEFAULT_EVENTBUS_PREFIX: &str = "dgrid.eventbus";
/// Default pause after the cache manager is created.
pub const DEFAULT_CACHE_SETTLE_MS: u64 = 200;
/// Default event-bus request timeout.
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 30_000;

// ============================================================================
// SERVICE CONFIGURATION
// ============================================================================

/// Configuration for one DGRID service instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceConfig {
    /// Service namespace. Names both the cache and the event-bus address.
    pub namespace: String,

    // ========================================================================
    // HTTP
    // ========================================================================
    pub http_host: String,
    pub http_port: u16,

    // ========================================================================
    // Remote cache
    // ========================================================================
    pub cache_host: String,
    pub cache_port: u16,

    /// Pause after creating the cache manager, letting the client finish
    /// topology discovery before first use.
    pub cache_settle: Duration,

    // ========================================================================
    // Event bus
    // ========================================================================
    pub eventbus_prefix: String,

    /// How long a requester waits for a reply.
    pub request_timeout: Duration,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            namespace: String::new(),
            http_host: DEFAULT_HTTP_HOST.to_string(),
            http_port: DEFAULT_HTTP_PORT,
            cache_host: DEFAULT_CACHE_HOST.to_string(),
            cache_port: DEFAULT_CACHE_PORT,
            cache_settle: Duration::from_millis(DEFAULT_CACHE_SETTLE_MS),
            eventbus_prefix: DEFAULT_EVENTBUS_PREFIX.to_string(),
            request_timeout: Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS),
        }
    }
}

impl ServiceConfig {
    /// Create ServiceConfig from environment variables.
    ///
    /// Environment variables:
    /// - `DGRID_NAMESPACE`: Service namespace (default: empty)
    /// - `DGRID_HTTP_HOST`: HTTP listen host (default: 127.0.0.1)
    /// - `DGRID_HTTP_PORT`: HTTP listen port (default: 8080)
    /// - `DGRID_CACHE_HOST`: Remote cache host (default: 127.0.0.1)
    /// - `DGRID_CACHE_PORT`: Remote cache port (default: 11222)
    /// - `DGRID_EVENTBUS_PREFIX`: Event-bus address prefix (default: dgrid.eventbus)
    /// - `DGRID_CACHE_SETTLE_MS`: Pause after cache connect (default: 200)
    /// - `DGRID_REQUEST_TIMEOUT_MS`: Event-bus request timeout (default: 30000)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_source(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup.
    pub fn from_source<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let text = |key: &str, fallback: String| {
            lookup(key)
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .unwrap_or(fallback)
        };

        Ok(Self {
            namespace: lookup("DGRID_NAMESPACE")
                .map(|s| s.trim().to_string())
                .unwrap_or_default(),
            http_host: text("DGRID_HTTP_HOST", defaults.http_host),
            http_port: parse_or("DGRID_HTTP_PORT", lookup("DGRID_HTTP_PORT"), defaults.http_port)?,
            cache_host: text("DGRID_CACHE_HOST", defaults.cache_host),
            cache_port: parse_or("DGRID_CACHE_PORT", lookup("DGRID_CACHE_PORT"), defaults.cache_port)?,
            cache_settle: Duration::from_millis(parse_or(
                "DGRID_CACHE_SETTLE_MS",
                lookup("DGRID_CACHE_SETTLE_MS"),
                DEFAULT_CACHE_SETTLE_MS,
            )?),
            eventbus_prefix: text("DGRID_EVENTBUS_PREFIX", defaults.eventbus_prefix),
            request_timeout: Duration::from_millis(parse_or(
                "DGRID_REQUEST_TIMEOUT_MS",
                lookup("DGRID_REQUEST_TIMEOUT_MS"),
                DEFAULT_REQUEST_TIMEOUT_MS,
            )?),
        })
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn with_http(mut self, host: impl Into<String>, port: u16) -> Self {
        self.http_host = host.into();
        self.http_port = port;
        self
    }

    pub fn with_cache_server(mut self, host: impl Into<String>, port: u16) -> Self {
        self.cache_host = host.into();
        self.cache_port = port;
        self
    }

    pub fn with_cache_settle(mut self, settle: Duration) -> Self {
        self.cache_settle = settle;
        self
    }

    pub fn with_eventbus_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.eventbus_prefix = prefix.into();
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Event-bus address this service consumes, `<prefix>.<namespace>`.
    ///
    /// The prefix alone when the namespace is empty.
    pub fn event_bus_address(&self) -> String {
        if self.namespace.is_empty() {
            self.eventbus_prefix.clone()
        } else {
            format!("{}.{}", self.eventbus_prefix, self.namespace)
        }
    }

    /// Name of the remote cache this service reads and writes.
    pub fn cache_name(&self) -> &str {
        &self.namespace
    }

    /// `host:port` the HTTP server binds to.
    pub fn http_bind_addr(&self) -> String {
        format!("{}:{}", self.http_host, self.http_port)
    }

    /// `host:port` of the remote cache.
    pub fn cache_endpoint(&self) -> String {
        format!("{}:{}", self.cache_host, self.cache_port)
    }
}

fn parse_or<T>(field: &str, raw: Option<String>, fallback: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match raw.map(|s| s.trim().to_string()).filter(|s| !s.is_empty()) {
        None => Ok(fallback),
        Some(value) => value.parse::<T>().map_err(|e| ConfigError::InvalidValue {
            field: field.to_string(),
            reason: e.to_string(),
            value,
        }),
    }
}
