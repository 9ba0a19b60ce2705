//! Wire envelopes and shape-based frame classification.
//!
//! The wire contract (JSON, both directions) carries no explicit frame
//! discriminant. An inbound frame is classified by which fields are present:
//! a non-null `method` makes it a request, a non-null `status` makes it a
//! response, and `type == "system_config"` makes it a push. Anything else is
//! unrecognized and dropped by the reader. This ambiguity is a documented
//! compatibility constraint of the protocol, not an accident of the JSON
//! encoding — keep it when evolving the envelope types.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::constants::PUSH_SYSTEM_CONFIG;
use crate::errors::{LinkError, LinkResult};
use crate::ids::RequestId;

/// JSON object body used throughout the wire contract.
pub type JsonMap = serde_json::Map<String, Value>;

/// Status code for a successful handler response.
pub const STATUS_OK: u16 = 200;
/// Status code for a request with invalid or missing parameters.
pub const STATUS_BAD_REQUEST: u16 = 400;
/// Status code for an unregistered path.
pub const STATUS_NOT_FOUND: u16 = 404;
/// Status code for a handler execution failure.
pub const STATUS_SERVER_ERROR: u16 = 500;

/// An outbound or inbound request frame.
///
/// Immutable once queued for sending.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RequestEnvelope {
    /// Correlation id, echoed back on the response.
    pub id: RequestId,
    /// Request method (`GET`, `POST`, ...).
    pub method: String,
    /// Request path (e.g. `/api/server/ping`).
    pub path: String,
    /// Optional request headers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<HashMap<String, String>>,
    /// Optional request body.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<JsonMap>,
}

impl RequestEnvelope {
    /// Create a request with a fresh correlation id and no headers or body.
    #[must_use]
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            id: RequestId::new(),
            method: method.into(),
            path: path.into(),
            headers: None,
            body: None,
        }
    }

    /// Attach a body.
    #[must_use]
    pub fn with_body(mut self, body: JsonMap) -> Self {
        self.body = Some(body);
        self
    }

    /// Attach headers.
    #[must_use]
    pub fn with_headers(mut self, headers: HashMap<String, String>) -> Self {
        self.headers = Some(headers);
        self
    }

    /// Fetch a string field from the body, treating JSON null as absent.
    #[must_use]
    pub fn body_str(&self, key: &str) -> Option<&str> {
        self.body.as_ref()?.get(key)?.as_str()
    }
}

/// An outbound or inbound response frame.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    /// Correlation id of the request being answered.
    pub id: RequestId,
    /// Status code (HTTP-like semantics).
    pub status: u16,
    /// Optional response headers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<HashMap<String, String>>,
    /// Optional response body.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<JsonMap>,
    /// Error message when the status indicates a failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ResponseEnvelope {
    /// Build a success response.
    #[must_use]
    pub fn ok(id: RequestId, body: JsonMap) -> Self {
        Self {
            id,
            status: STATUS_OK,
            headers: None,
            body: Some(body),
            error: None,
        }
    }

    /// Build an error response with the given status.
    #[must_use]
    pub fn error(id: RequestId, status: u16, message: impl Into<String>) -> Self {
        Self {
            id,
            status,
            headers: None,
            body: None,
            error: Some(message.into()),
        }
    }

    /// Whether the status indicates success.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// A server-initiated push frame (no corresponding request).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PushEnvelope {
    /// Push type; only `system_config` is recognized.
    #[serde(rename = "type")]
    pub kind: String,
    /// Push payload.
    pub data: JsonMap,
}

/// A decoded inbound frame, classified into exactly one variant.
#[derive(Clone, Debug, PartialEq)]
pub enum InboundFrame {
    /// Server-initiated push.
    Push(PushEnvelope),
    /// Request expecting a response with the same id.
    Request(RequestEnvelope),
    /// Response to an outstanding request.
    Response(ResponseEnvelope),
}

/// Classify a raw text frame by structural shape.
///
/// Decodes into a generic document first, then attempts the typed decode
/// for whichever branch the present fields select.
pub fn classify(text: &str) -> LinkResult<InboundFrame> {
    let value: Value = serde_json::from_str(text)?;
    classify_value(value)
}

/// Classify an already-decoded JSON document by structural shape.
pub fn classify_value(value: Value) -> LinkResult<InboundFrame> {
    let is_present = |key: &str| value.get(key).is_some_and(|v| !v.is_null());

    if is_present("method") {
        let request: RequestEnvelope = serde_json::from_value(value)?;
        return Ok(InboundFrame::Request(request));
    }
    if is_present("status") {
        let response: ResponseEnvelope = serde_json::from_value(value)?;
        return Ok(InboundFrame::Response(response));
    }
    if value.get("type").and_then(Value::as_str) == Some(PUSH_SYSTEM_CONFIG) {
        let push: PushEnvelope = serde_json::from_value(value)?;
        return Ok(InboundFrame::Push(push));
    }
    Err(LinkError::Protocol(
        "unrecognized frame shape (no method, status, or known push type)".into(),
    ))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(value: Value) -> JsonMap {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn request_round_trips() {
        let request = RequestEnvelope::new("POST", "/api/config/test")
            .with_body(map(json!({"test_text": "hello"})));
        let text = serde_json::to_string(&request).unwrap();
        let back: RequestEnvelope = serde_json::from_str(&text).unwrap();
        assert_eq!(back, request);
    }

    #[test]
    fn request_omits_absent_optionals() {
        let request = RequestEnvelope::new("GET", "/api/server/ping");
        let text = serde_json::to_string(&request).unwrap();
        assert!(!text.contains("headers"));
        assert!(!text.contains("body"));
    }

    #[test]
    fn classify_request_by_method() {
        let frame = classify(r#"{"id":"r1","method":"GET","path":"/api/server/ping"}"#).unwrap();
        let InboundFrame::Request(request) = frame else {
            panic!("expected request, got {frame:?}");
        };
        assert_eq!(request.method, "GET");
        assert_eq!(request.path, "/api/server/ping");
    }

    #[test]
    fn classify_response_by_status() {
        let frame = classify(r#"{"id":"r1","status":200,"body":{"pong":true}}"#).unwrap();
        let InboundFrame::Response(response) = frame else {
            panic!("expected response, got {frame:?}");
        };
        assert_eq!(response.status, 200);
        assert!(response.is_ok());
    }

    #[test]
    fn classify_push_by_type() {
        let frame = classify(r#"{"type":"system_config","data":{"updated":true}}"#).unwrap();
        let InboundFrame::Push(push) = frame else {
            panic!("expected push, got {frame:?}");
        };
        assert_eq!(push.kind, "system_config");
        assert_eq!(push.data.get("updated"), Some(&json!(true)));
    }

    #[test]
    fn classify_null_method_is_not_a_request() {
        // A frame with method: null and a status is a response.
        let frame = classify(r#"{"id":"r1","method":null,"status":500,"error":"boom"}"#).unwrap();
        assert!(matches!(frame, InboundFrame::Response(_)));
    }

    #[test]
    fn classify_unknown_push_type_rejected() {
        let err = classify(r#"{"type":"mystery","data":{}}"#).unwrap_err();
        assert!(matches!(err, LinkError::Protocol(_)));
    }

    #[test]
    fn classify_empty_object_rejected() {
        let err = classify("{}").unwrap_err();
        assert!(matches!(err, LinkError::Protocol(_)));
    }

    #[test]
    fn classify_invalid_json_is_json_error() {
        let err = classify("{not json").unwrap_err();
        assert!(matches!(err, LinkError::Json(_)));
    }

    #[test]
    fn method_takes_precedence_over_status() {
        // Both present: request wins, matching the documented shape rule.
        let frame =
            classify(r#"{"id":"r1","method":"GET","path":"/x","status":200}"#).unwrap();
        assert!(matches!(frame, InboundFrame::Request(_)));
    }

    #[test]
    fn response_error_constructor() {
        let response = ResponseEnvelope::error(RequestId::from("r9"), STATUS_NOT_FOUND, "no handler");
        assert_eq!(response.status, 404);
        assert_eq!(response.error.as_deref(), Some("no handler"));
        assert!(response.body.is_none());
        assert!(!response.is_ok());
    }

    #[test]
    fn body_str_treats_null_as_absent() {
        let request = RequestEnvelope::new("GET", "/api/mcp/tools")
            .with_body(map(json!({"agent_id": "a1", "device_id": null})));
        assert_eq!(request.body_str("agent_id"), Some("a1"));
        assert_eq!(request.body_str("device_id"), None);
        assert_eq!(request.body_str("missing"), None);
    }
}
