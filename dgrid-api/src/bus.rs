//! In-process event bus.
//!
//! Addressable request/reply transport between the HTTP adapters and the
//! record services. A consumer registers an inbox at an address; a
//! requester sends an [`Envelope`] there and awaits either a [`Reply`] or
//! an [`ApiError`] on a one-shot channel. Success and failure travel on
//! separate arms of the result, never mixed into one body.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace, warn};

use crate::error::{ApiError, ApiResult};

/// Header naming the requested operation.
pub const OPERATION_HEADER: &str = "operation";

/// Inbox depth per consumer.
const CONSUMER_CAPACITY: usize = 1024;

// ============================================================================
// ENVELOPES
// ============================================================================

/// Request message: headers plus a JSON body.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub headers: HashMap<String, String>,
    pub body: JsonValue,
}

impl Envelope {
    pub fn new(body: JsonValue) -> Self {
        Self {
            headers: HashMap::new(),
            body,
        }
    }

    /// Envelope carrying an `operation` header.
    pub fn for_operation(operation: &str, body: JsonValue) -> Self {
        Self::new(body).with_header(OPERATION_HEADER, operation)
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    pub fn operation(&self) -> Option<&str> {
        self.header(OPERATION_HEADER)
    }
}

/// Successful reply: a status code and an optional result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reply {
    pub status_code: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<JsonValue>,
}

impl Reply {
    pub fn new(status: StatusCode, result: Option<JsonValue>) -> Self {
        Self {
            status_code: status.as_u16(),
            result,
        }
    }

    pub fn created(result: JsonValue) -> Self {
        Self::new(StatusCode::CREATED, Some(result))
    }

    pub fn ok(result: JsonValue) -> Self {
        Self::new(StatusCode::OK, Some(result))
    }

    pub fn not_found() -> Self {
        Self::new(StatusCode::NOT_FOUND, None)
    }

    pub fn no_content() -> Self {
        Self::new(StatusCode::NO_CONTENT, None)
    }

    /// HTTP status for this reply. Unknown codes map to 500.
    pub fn status(&self) -> StatusCode {
        StatusCode::from_u16(self.status_code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }
}

/// A delivered request awaiting its reply.
#[derive(Debug)]
pub struct Message {
    envelope: Envelope,
    reply_to: oneshot::Sender<ApiResult<Reply>>,
}

impl Message {
    /// Build a message and the receiver its reply arrives on.
    pub fn new(envelope: Envelope) -> (Self, oneshot::Receiver<ApiResult<Reply>>) {
        let (reply_to, rx) = oneshot::channel();
        (Self { envelope, reply_to }, rx)
    }

    pub fn envelope(&self) -> &Envelope {
        &self.envelope
    }

    pub fn reply(self, reply: Reply) {
        self.respond(Ok(reply));
    }

    pub fn fail(self, error: ApiError) {
        self.respond(Err(error));
    }

    pub fn respond(self, result: ApiResult<Reply>) {
        if self.reply_to.send(result).is_err() {
            trace!("Requester went away before the reply was sent");
        }
    }
}

// ============================================================================
// BUS
// ============================================================================

/// Receiving side of a registered address.
#[derive(Debug)]
pub struct Consumer {
    address: String,
    inbox: mpsc::Receiver<Message>,
}

impl Consumer {
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Next message, `None` once the address is unregistered.
    pub async fn recv(&mut self) -> Option<Message> {
        self.inbox.recv().await
    }
}

/// Addressable request channel. Cloning shares the address table.
#[derive(Clone)]
pub struct EventBus {
    consumers: Arc<DashMap<String, mpsc::Sender<Message>>>,
    timeout: Duration,
}

impl EventBus {
    pub fn new(timeout: Duration) -> Self {
        Self {
            consumers: Arc::new(DashMap::new()),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Register a consumer at `address`, replacing any previous one.
    pub fn consumer(&self, address: &str) -> Consumer {
        let (tx, inbox) = mpsc::channel(CONSUMER_CAPACITY);
        if self.consumers.insert(address.to_string(), tx).is_some() {
            warn!(address = %address, "Replaced existing event bus consumer");
        }
        debug!(address = %address, "Event bus consumer registered");
        Consumer {
            address: address.to_string(),
            inbox,
        }
    }

    /// Remove the consumer at `address`. Returns false if none was registered.
    pub fn unregister(&self, address: &str) -> bool {
        let removed = self.consumers.remove(address).is_some();
        if removed {
            debug!(address = %address, "Event bus consumer unregistered");
        }
        removed
    }

    pub fn has_consumer(&self, address: &str) -> bool {
        self.consumers
            .get(address)
            .map(|tx| !tx.is_closed())
            .unwrap_or(false)
    }

    /// Send `envelope` to `address` and wait for the reply.
    pub async fn request(&self, address: &str, envelope: Envelope) -> ApiResult<Reply> {
        let sender = self
            .consumers
            .get(address)
            .map(|tx| tx.value().clone())
            .ok_or_else(|| ApiError::no_handlers(address))?;

        let (message, reply) = Message::new(envelope);
        sender
            .send(message)
            .await
            .map_err(|_| ApiError::no_handlers(address))?;

        match tokio::time::timeout(self.timeout, reply).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(ApiError::internal_error(format!(
                "consumer at {} dropped the request without replying",
                address
            ))),
            Err(_) => Err(ApiError::timeout(address)),
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use serde_json::json;

    #[test]
    fn test_reply_serializes_camel_case() -> Result<(), serde_json::Error> {
        let json = serde_json::to_value(Reply::created(json!({"id": "x"})))?;
        assert_eq!(json, json!({"statusCode": 201, "result": {"id": "x"}}));

        let json = serde_json::to_value(Reply::not_found())?;
        assert_eq!(json, json!({"statusCode": 404}));
        Ok(())
    }

    #[test]
    fn test_envelope_operation_header() {
        let envelope = Envelope::for_operation("get", json!({"id": "x"}));
        assert_eq!(envelope.operation(), Some("get"));
        assert_eq!(Envelope::new(JsonValue::Null).operation(), None);
    }

    #[tokio::test]
    async fn test_request_reply() -> Result<(), ApiError> {
        let bus = EventBus::default();
        let mut consumer = bus.consumer("dgrid.eventbus.echo");
        tokio::spawn(async move {
            while let Some(message) = consumer.recv().await {
                let body = message.envelope().body.clone();
                message.reply(Reply::ok(body));
            }
        });

        let reply = bus
            .request("dgrid.eventbus.echo", Envelope::new(json!({"n": 1})))
            .await?;
        assert_eq!(reply.status(), StatusCode::OK);
        assert_eq!(reply.result, Some(json!({"n": 1})));
        Ok(())
    }

    #[tokio::test]
    async fn test_failure_channel() {
        let bus = EventBus::default();
        let mut consumer = bus.consumer("fail");
        tokio::spawn(async move {
            if let Some(message) = consumer.recv().await {
                message.fail(ApiError::version_mismatch());
            }
        });

        let err = bus.request("fail", Envelope::default()).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::VersionMismatch);
    }

    #[tokio::test]
    async fn test_no_handlers() {
        let bus = EventBus::default();
        let err = bus.request("nowhere", Envelope::default()).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::NoHandlers);
    }

    #[tokio::test]
    async fn test_unregister_stops_delivery() {
        let bus = EventBus::default();
        let _consumer = bus.consumer("gone");
        assert!(bus.has_consumer("gone"));
        assert!(bus.unregister("gone"));
        assert!(!bus.unregister("gone"));

        let err = bus.request("gone", Envelope::default()).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::NoHandlers);
    }

    #[tokio::test]
    async fn test_dropped_message_is_internal_error() {
        let bus = EventBus::default();
        let mut consumer = bus.consumer("drop");
        tokio::spawn(async move {
            let _ = consumer.recv().await;
        });

        let err = bus.request("drop", Envelope::default()).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::InternalError);
    }

    #[tokio::test]
    async fn test_timeout() {
        let bus = EventBus::new(Duration::from_millis(20));
        let _consumer = bus.consumer("slow");

        let err = bus.request("slow", Envelope::default()).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::Timeout);
    }
}
