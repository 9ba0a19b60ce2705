//! Path-keyed handler registry and built-in paths.
//!
//! Inbound requests are answered by a handler looked up by path
//! (last-register-wins; entries survive reconnects). The built-ins cover
//! the control plane's standing expectations: server info and ping echoes,
//! the multi-stage configuration test, and MCP tool lookups — the latter
//! two delegate their actual work to the [`ConfigTester`] and [`McpBridge`]
//! collaborator traits supplied by the embedding application.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::{Value, json};
use tether_core::constants::VERSION;
use tether_core::envelope::{
    JsonMap, RequestEnvelope, ResponseEnvelope, STATUS_BAD_REQUEST, STATUS_NOT_FOUND,
    STATUS_SERVER_ERROR,
};
use tether_core::ids::ClientInstanceId;
use tracing::{info, warn};

/// Built-in path: server info echo.
pub const PATH_SERVER_INFO: &str = "/api/server/info";
/// Built-in path: ping echo.
pub const PATH_SERVER_PING: &str = "/api/server/ping";
/// Built-in path: multi-stage configuration test.
pub const PATH_CONFIG_TEST: &str = "/api/config/test";
/// Built-in path: MCP tool listing.
pub const PATH_MCP_TOOLS: &str = "/api/mcp/tools";
/// Built-in path: MCP tool invocation.
pub const PATH_MCP_CALL: &str = "/api/mcp/call";

/// Failure produced by a request handler, carried back on the wire as an
/// error-status response.
#[derive(Clone, Debug, thiserror::Error)]
#[error("[{status}] {message}")]
pub struct HandlerError {
    /// Wire status code.
    pub status: u16,
    /// Human-readable message.
    pub message: String,
}

impl HandlerError {
    /// Invalid or missing parameters (400).
    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: STATUS_BAD_REQUEST,
            message: message.into(),
        }
    }

    /// Handler execution failure (500).
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            status: STATUS_SERVER_ERROR,
            message: message.into(),
        }
    }
}

/// Result of a request handler: a response body, or an error status.
pub type HandlerResult = Result<JsonMap, HandlerError>;

/// Answers inbound requests routed by path (or globally, when installed as
/// the single request handler override).
#[async_trait]
pub trait RequestHandler: Send + Sync {
    /// Handle one request and produce a response body.
    async fn handle(&self, request: RequestEnvelope) -> HandlerResult;
}

/// Receives server-initiated pushes. At most one handler is registered;
/// last registration wins.
#[async_trait]
pub trait PushHandler: Send + Sync {
    /// Handle one push payload.
    async fn on_push(&self, data: JsonMap);
}

/// Run a handler and convert its outcome into a wire response.
pub(crate) async fn run_handler(
    handler: &dyn RequestHandler,
    request: RequestEnvelope,
) -> ResponseEnvelope {
    let id = request.id.clone();
    let path = request.path.clone();
    match handler.handle(request).await {
        Ok(body) => ResponseEnvelope::ok(id, body),
        Err(error) => {
            warn!(%path, status = error.status, message = %error.message, "handler failed");
            ResponseEnvelope::error(id, error.status, error.message)
        }
    }
}

/// Path → handler table. Keys are unique, last-register-wins, and entries
/// persist across reconnects (the table belongs to the client, not to a
/// connection epoch).
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: RwLock<HashMap<String, Arc<dyn RequestHandler>>>,
}

impl HandlerRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for a path, replacing any existing one.
    pub fn register(&self, path: impl Into<String>, handler: Arc<dyn RequestHandler>) {
        let path = path.into();
        if self.handlers.write().insert(path.clone(), handler).is_some() {
            info!(%path, "handler replaced");
        }
    }

    /// Remove a handler. Returns whether one was registered.
    pub fn unregister(&self, path: &str) -> bool {
        self.handlers.write().remove(path).is_some()
    }

    /// Registered paths, for introspection.
    #[must_use]
    pub fn paths(&self) -> Vec<String> {
        self.handlers.read().keys().cloned().collect()
    }

    /// Dispatch a request to the handler registered for its path.
    pub async fn dispatch(&self, request: RequestEnvelope) -> ResponseEnvelope {
        let handler = self.handlers.read().get(&request.path).cloned();
        match handler {
            Some(handler) => run_handler(handler.as_ref(), request).await,
            None => {
                warn!(path = %request.path, "no handler registered");
                ResponseEnvelope::error(
                    request.id,
                    STATUS_NOT_FOUND,
                    format!("no handler for path {}", request.path),
                )
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Collaborator traits
// ─────────────────────────────────────────────────────────────────────────────

/// Pipeline module kind exercised by the configuration test.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ModuleKind {
    /// Voice activity detection.
    Vad,
    /// Speech recognition.
    Asr,
    /// Language model.
    Llm,
    /// Speech synthesis.
    Tts,
}

impl ModuleKind {
    /// All kinds, in the order they appear in reports.
    pub const ALL: [Self; 4] = [Self::Vad, Self::Asr, Self::Llm, Self::Tts];

    /// Wire name of the kind.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Vad => "vad",
            Self::Asr => "asr",
            Self::Llm => "llm",
            Self::Tts => "tts",
        }
    }
}

impl fmt::Display for ModuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of testing one candidate module configuration.
#[derive(Clone, Debug)]
pub struct ModuleTestOutcome {
    /// Whether the candidate works.
    pub ok: bool,
    /// Human-readable detail.
    pub message: String,
}

impl ModuleTestOutcome {
    fn to_json(&self) -> Value {
        json!({"ok": self.ok, "message": self.message})
    }
}

/// Collaborator executing the actual module tests for `/api/config/test`.
#[async_trait]
pub trait ConfigTester: Send + Sync {
    /// Test one named candidate configuration, optionally against sample
    /// text.
    async fn test_module(
        &self,
        kind: ModuleKind,
        name: &str,
        config: &Value,
        test_text: Option<&str>,
    ) -> ModuleTestOutcome;
}

/// Target of an MCP lookup: an agent or a device, never both.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum McpTarget {
    /// Lookup by agent id.
    Agent(String),
    /// Lookup by device id.
    Device(String),
}

impl McpTarget {
    /// Agent id, when targeting an agent.
    #[must_use]
    pub fn agent_id(&self) -> Option<&str> {
        match self {
            Self::Agent(id) => Some(id),
            Self::Device(_) => None,
        }
    }

    /// Device id, when targeting a device.
    #[must_use]
    pub fn device_id(&self) -> Option<&str> {
        match self {
            Self::Device(id) => Some(id),
            Self::Agent(_) => None,
        }
    }
}

/// Collaborator resolving MCP tool catalogs and invocations.
#[async_trait]
pub trait McpBridge: Send + Sync {
    /// List the tools available to the target.
    async fn list_tools(&self, target: &McpTarget) -> Result<Vec<Value>, String>;

    /// Invoke a tool for the target.
    async fn call_tool(
        &self,
        target: &McpTarget,
        tool_name: &str,
        arguments: Value,
    ) -> Result<Value, String>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Built-in handlers
// ─────────────────────────────────────────────────────────────────────────────

/// `GET /api/server/info` — identity and uptime echo.
pub(crate) struct ServerInfoHandler {
    pub(crate) instance_id: ClientInstanceId,
    pub(crate) started_at: std::time::Instant,
}

#[async_trait]
impl RequestHandler for ServerInfoHandler {
    async fn handle(&self, _request: RequestEnvelope) -> HandlerResult {
        let mut body = JsonMap::new();
        let _ = body.insert("instance_id".into(), json!(self.instance_id.as_str()));
        let _ = body.insert("version".into(), json!(VERSION));
        let _ = body.insert("uptime_secs".into(), json!(self.started_at.elapsed().as_secs()));
        let _ = body.insert("time".into(), json!(chrono::Utc::now().to_rfc3339()));
        Ok(body)
    }
}

/// `GET /api/server/ping` — liveness echo over the RPC layer.
pub(crate) struct ServerPingHandler;

#[async_trait]
impl RequestHandler for ServerPingHandler {
    async fn handle(&self, _request: RequestEnvelope) -> HandlerResult {
        let mut body = JsonMap::new();
        let _ = body.insert("message".into(), json!("pong"));
        Ok(body)
    }
}

/// `POST /api/config/test` — run candidate module configs through the
/// tester collaborator under an overall time budget.
///
/// The budget is independent of the per-connection request timeout: on
/// expiry the response is still status 200, but every module kind carries
/// an `_error` entry citing the total timeout instead of per-candidate
/// results.
pub(crate) struct ConfigTestHandler {
    pub(crate) tester: Arc<dyn ConfigTester>,
    pub(crate) budget: Duration,
}

#[async_trait]
impl RequestHandler for ConfigTestHandler {
    async fn handle(&self, request: RequestEnvelope) -> HandlerResult {
        let body = request.body.unwrap_or_default();
        let data = body
            .get("data")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();
        if data.is_empty() {
            return Err(HandlerError::bad_request(
                "data must name at least one of vad, asr, llm, tts",
            ));
        }
        let test_text = body
            .get("test_text")
            .and_then(Value::as_str)
            .map(str::to_owned);

        let run = self.run_all(&data, test_text.as_deref());
        match tokio::time::timeout(self.budget, run).await {
            Ok(results) => Ok(results),
            Err(_) => {
                warn!(budget_secs = self.budget.as_secs(), "configuration test hit total budget");
                let message = format!(
                    "configuration test exceeded the {}s total budget",
                    self.budget.as_secs()
                );
                let mut results = JsonMap::new();
                for kind in ModuleKind::ALL {
                    let _ = results.insert(
                        kind.as_str().to_owned(),
                        json!({"_error": {"ok": false, "message": message}}),
                    );
                }
                Ok(results)
            }
        }
    }
}

impl ConfigTestHandler {
    /// Test every candidate of every requested kind, in report order.
    async fn run_all(&self, data: &JsonMap, test_text: Option<&str>) -> JsonMap {
        let mut results = JsonMap::new();
        for kind in ModuleKind::ALL {
            let Some(candidates) = data.get(kind.as_str()) else {
                continue;
            };
            let mut kind_results = JsonMap::new();
            match candidates.as_object().filter(|map| !map.is_empty()) {
                Some(candidates) => {
                    for (name, config) in candidates {
                        let outcome = self
                            .tester
                            .test_module(kind, name, config, test_text)
                            .await;
                        let _ = kind_results.insert(name.clone(), outcome.to_json());
                    }
                }
                None => {
                    let _ = kind_results.insert(
                        "_none".into(),
                        json!({"ok": false, "message": format!("no {kind} candidates configured")}),
                    );
                }
            }
            let _ = results.insert(kind.as_str().to_owned(), Value::Object(kind_results));
        }
        results
    }
}

/// Extract the `agent_id` xor `device_id` target from a request body.
fn parse_mcp_target(request: &RequestEnvelope) -> Result<McpTarget, HandlerError> {
    let agent = request.body_str("agent_id");
    let device = request.body_str("device_id");
    match (agent, device) {
        (Some(_), Some(_)) => Err(HandlerError::bad_request(
            "agent_id and device_id are mutually exclusive",
        )),
        (Some(agent), None) => Ok(McpTarget::Agent(agent.to_owned())),
        (None, Some(device)) => Ok(McpTarget::Device(device.to_owned())),
        (None, None) => Err(HandlerError::bad_request(
            "either agent_id or device_id is required",
        )),
    }
}

fn target_body(target: &McpTarget) -> JsonMap {
    let mut body = JsonMap::new();
    let _ = body.insert("agent_id".into(), json!(target.agent_id()));
    let _ = body.insert("device_id".into(), json!(target.device_id()));
    body
}

/// `GET /api/mcp/tools` — tool catalog lookup through the bridge.
pub(crate) struct McpToolsHandler {
    pub(crate) bridge: Arc<dyn McpBridge>,
}

#[async_trait]
impl RequestHandler for McpToolsHandler {
    async fn handle(&self, request: RequestEnvelope) -> HandlerResult {
        let target = parse_mcp_target(&request)?;
        let tools = self
            .bridge
            .list_tools(&target)
            .await
            .map_err(HandlerError::internal)?;
        let mut body = target_body(&target);
        let _ = body.insert("count".into(), json!(tools.len()));
        let _ = body.insert("tools".into(), Value::Array(tools));
        Ok(body)
    }
}

/// `POST /api/mcp/call` — tool invocation through the bridge.
pub(crate) struct McpCallHandler {
    pub(crate) bridge: Arc<dyn McpBridge>,
}

#[async_trait]
impl RequestHandler for McpCallHandler {
    async fn handle(&self, request: RequestEnvelope) -> HandlerResult {
        let target = parse_mcp_target(&request)?;
        let tool_name = request
            .body_str("tool_name")
            .ok_or_else(|| HandlerError::bad_request("tool_name is required"))?
            .to_owned();
        let arguments = request
            .body
            .as_ref()
            .and_then(|body| body.get("arguments"))
            .cloned()
            .unwrap_or_else(|| json!({}));

        let result = self
            .bridge
            .call_tool(&target, &tool_name, arguments)
            .await
            .map_err(HandlerError::internal)?;
        let mut body = target_body(&target);
        let _ = body.insert("tool_name".into(), json!(tool_name));
        let _ = body.insert("result".into(), result);
        Ok(body)
    }
}

/// Register the built-in paths on a registry.
///
/// The config-test and MCP paths are only registered when their
/// collaborator is supplied; an unregistered path answers 404 like any
/// other unknown path.
pub(crate) fn register_builtins(
    registry: &HandlerRegistry,
    instance_id: ClientInstanceId,
    started_at: std::time::Instant,
    config_tester: Option<Arc<dyn ConfigTester>>,
    config_test_budget: Duration,
    mcp_bridge: Option<Arc<dyn McpBridge>>,
) {
    registry.register(
        PATH_SERVER_INFO,
        Arc::new(ServerInfoHandler {
            instance_id,
            started_at,
        }),
    );
    registry.register(PATH_SERVER_PING, Arc::new(ServerPingHandler));
    if let Some(tester) = config_tester {
        registry.register(
            PATH_CONFIG_TEST,
            Arc::new(ConfigTestHandler {
                tester,
                budget: config_test_budget,
            }),
        );
    }
    if let Some(bridge) = mcp_bridge {
        registry.register(
            PATH_MCP_TOOLS,
            Arc::new(McpToolsHandler {
                bridge: Arc::clone(&bridge),
            }),
        );
        registry.register(PATH_MCP_CALL, Arc::new(McpCallHandler { bridge }));
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Instant;

    fn request(path: &str, body: Value) -> RequestEnvelope {
        RequestEnvelope::new("POST", path).with_body(body.as_object().cloned().unwrap())
    }

    struct EchoHandler(&'static str);

    #[async_trait]
    impl RequestHandler for EchoHandler {
        async fn handle(&self, _request: RequestEnvelope) -> HandlerResult {
            let mut body = JsonMap::new();
            let _ = body.insert("who".into(), json!(self.0));
            Ok(body)
        }
    }

    struct FailingHandler;

    #[async_trait]
    impl RequestHandler for FailingHandler {
        async fn handle(&self, _request: RequestEnvelope) -> HandlerResult {
            Err(HandlerError::internal("backend exploded"))
        }
    }

    /// Tester that passes everything instantly.
    struct OkTester;

    #[async_trait]
    impl ConfigTester for OkTester {
        async fn test_module(
            &self,
            kind: ModuleKind,
            name: &str,
            _config: &Value,
            test_text: Option<&str>,
        ) -> ModuleTestOutcome {
            ModuleTestOutcome {
                ok: true,
                message: format!(
                    "{kind}/{name} ok (text: {})",
                    test_text.unwrap_or("<none>")
                ),
            }
        }
    }

    /// Tester that never finishes.
    struct StalledTester;

    #[async_trait]
    impl ConfigTester for StalledTester {
        async fn test_module(
            &self,
            _kind: ModuleKind,
            _name: &str,
            _config: &Value,
            _test_text: Option<&str>,
        ) -> ModuleTestOutcome {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            ModuleTestOutcome {
                ok: true,
                message: "unreachable".into(),
            }
        }
    }

    struct StubBridge;

    #[async_trait]
    impl McpBridge for StubBridge {
        async fn list_tools(&self, target: &McpTarget) -> Result<Vec<Value>, String> {
            match target {
                McpTarget::Agent(_) => Ok(vec![json!({"name": "get_weather"})]),
                McpTarget::Device(_) => Ok(vec![
                    json!({"name": "set_volume"}),
                    json!({"name": "reboot"}),
                ]),
            }
        }

        async fn call_tool(
            &self,
            _target: &McpTarget,
            tool_name: &str,
            arguments: Value,
        ) -> Result<Value, String> {
            if tool_name == "broken" {
                return Err("tool exploded".into());
            }
            Ok(json!({"echo": tool_name, "arguments": arguments}))
        }
    }

    // -- registry --

    #[tokio::test]
    async fn dispatch_unknown_path_is_not_found() {
        let registry = HandlerRegistry::new();
        let response = registry.dispatch(request("/nope", json!({}))).await;
        assert_eq!(response.status, STATUS_NOT_FOUND);
        assert!(response.error.unwrap().contains("/nope"));
    }

    #[tokio::test]
    async fn dispatch_routes_by_path() {
        let registry = HandlerRegistry::new();
        registry.register("/a", Arc::new(EchoHandler("a")));
        registry.register("/b", Arc::new(EchoHandler("b")));

        let response = registry.dispatch(request("/b", json!({}))).await;
        assert_eq!(response.status, 200);
        assert_eq!(response.body.unwrap().get("who"), Some(&json!("b")));
    }

    #[tokio::test]
    async fn last_registration_wins() {
        let registry = HandlerRegistry::new();
        registry.register("/x", Arc::new(EchoHandler("first")));
        registry.register("/x", Arc::new(EchoHandler("second")));

        let response = registry.dispatch(request("/x", json!({}))).await;
        assert_eq!(response.body.unwrap().get("who"), Some(&json!("second")));
    }

    #[tokio::test]
    async fn handler_failure_becomes_server_error_response() {
        let registry = HandlerRegistry::new();
        registry.register("/fail", Arc::new(FailingHandler));

        let response = registry.dispatch(request("/fail", json!({}))).await;
        assert_eq!(response.status, STATUS_SERVER_ERROR);
        assert_eq!(response.error.as_deref(), Some("backend exploded"));
    }

    #[tokio::test]
    async fn unregister_removes_handler() {
        let registry = HandlerRegistry::new();
        registry.register("/gone", Arc::new(EchoHandler("x")));
        assert!(registry.unregister("/gone"));
        assert!(!registry.unregister("/gone"));
        let response = registry.dispatch(request("/gone", json!({}))).await;
        assert_eq!(response.status, STATUS_NOT_FOUND);
    }

    // -- built-ins: server --

    #[tokio::test]
    async fn server_ping_echoes_pong() {
        let handler = ServerPingHandler;
        let body = handler
            .handle(request(PATH_SERVER_PING, json!({})))
            .await
            .unwrap();
        assert_eq!(body.get("message"), Some(&json!("pong")));
    }

    #[tokio::test]
    async fn server_info_reports_identity() {
        let handler = ServerInfoHandler {
            instance_id: ClientInstanceId::from("edge-42"),
            started_at: Instant::now(),
        };
        let body = handler
            .handle(request(PATH_SERVER_INFO, json!({})))
            .await
            .unwrap();
        assert_eq!(body.get("instance_id"), Some(&json!("edge-42")));
        assert_eq!(body.get("version"), Some(&json!(VERSION)));
        assert!(body.contains_key("uptime_secs"));
        assert!(body.contains_key("time"));
    }

    // -- built-ins: config test --

    #[tokio::test]
    async fn config_test_reports_per_candidate_results() {
        let handler = ConfigTestHandler {
            tester: Arc::new(OkTester),
            budget: Duration::from_secs(90),
        };
        let body = handler
            .handle(request(
                PATH_CONFIG_TEST,
                json!({
                    "data": {"vad": {"silero": {"threshold": 0.5}}},
                    "test_text": "hello"
                }),
            ))
            .await
            .unwrap();

        let vad = body.get("vad").and_then(Value::as_object).unwrap();
        assert!(!vad.contains_key("_none"));
        let silero = vad.get("silero").unwrap();
        assert_eq!(silero.get("ok"), Some(&json!(true)));
        assert!(
            silero.get("message").unwrap().as_str().unwrap().contains("hello"),
            "test_text should reach the tester"
        );
        // Unrequested kinds are absent entirely.
        assert!(!body.contains_key("asr"));
        assert!(!body.contains_key("llm"));
        assert!(!body.contains_key("tts"));
    }

    #[tokio::test]
    async fn config_test_marks_unconfigured_kind_none() {
        let handler = ConfigTestHandler {
            tester: Arc::new(OkTester),
            budget: Duration::from_secs(90),
        };
        let body = handler
            .handle(request(
                PATH_CONFIG_TEST,
                json!({"data": {"asr": {}, "tts": {"edge": {"voice": "x"}}}}),
            ))
            .await
            .unwrap();

        let asr = body.get("asr").and_then(Value::as_object).unwrap();
        assert!(asr.contains_key("_none"));
        let tts = body.get("tts").and_then(Value::as_object).unwrap();
        assert!(tts.contains_key("edge"));
        assert!(!tts.contains_key("_none"));
    }

    #[tokio::test]
    async fn config_test_empty_data_is_bad_request() {
        let handler = ConfigTestHandler {
            tester: Arc::new(OkTester),
            budget: Duration::from_secs(90),
        };
        let error = handler
            .handle(request(PATH_CONFIG_TEST, json!({"data": {}})))
            .await
            .unwrap_err();
        assert_eq!(error.status, STATUS_BAD_REQUEST);
    }

    #[tokio::test(start_paused = true)]
    async fn config_test_budget_expiry_reports_error_for_all_kinds() {
        let handler = ConfigTestHandler {
            tester: Arc::new(StalledTester),
            budget: Duration::from_secs(90),
        };
        // A stall well past the 90s budget: paused time auto-advances.
        let body = handler
            .handle(request(
                PATH_CONFIG_TEST,
                json!({"data": {"vad": {"silero": {}}}, "test_text": "hello"}),
            ))
            .await
            .unwrap();

        for kind in ModuleKind::ALL {
            let entry = body.get(kind.as_str()).and_then(Value::as_object).unwrap();
            let error = entry.get("_error").unwrap();
            assert_eq!(error.get("ok"), Some(&json!(false)));
            assert!(
                error.get("message").unwrap().as_str().unwrap().contains("90s"),
                "message should cite the total budget"
            );
        }
    }

    // -- built-ins: mcp --

    #[tokio::test]
    async fn mcp_tools_rejects_both_ids() {
        let handler = McpToolsHandler {
            bridge: Arc::new(StubBridge),
        };
        let error = handler
            .handle(request(
                PATH_MCP_TOOLS,
                json!({"agent_id": "a1", "device_id": "d1"}),
            ))
            .await
            .unwrap_err();
        assert_eq!(error.status, STATUS_BAD_REQUEST);
        assert!(error.message.contains("mutually exclusive"));
    }

    #[tokio::test]
    async fn mcp_tools_rejects_neither_id() {
        let handler = McpToolsHandler {
            bridge: Arc::new(StubBridge),
        };
        let error = handler
            .handle(request(PATH_MCP_TOOLS, json!({})))
            .await
            .unwrap_err();
        assert_eq!(error.status, STATUS_BAD_REQUEST);
    }

    #[tokio::test]
    async fn mcp_tools_lists_for_device() {
        let handler = McpToolsHandler {
            bridge: Arc::new(StubBridge),
        };
        let body = handler
            .handle(request(PATH_MCP_TOOLS, json!({"device_id": "d1"})))
            .await
            .unwrap();
        assert_eq!(body.get("device_id"), Some(&json!("d1")));
        assert_eq!(body.get("agent_id"), Some(&json!(null)));
        assert_eq!(body.get("count"), Some(&json!(2)));
        assert_eq!(body.get("tools").unwrap().as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn mcp_call_round_trips_arguments() {
        let handler = McpCallHandler {
            bridge: Arc::new(StubBridge),
        };
        let body = handler
            .handle(request(
                PATH_MCP_CALL,
                json!({"agent_id": "a1", "tool_name": "get_weather", "arguments": {"city": "Oslo"}}),
            ))
            .await
            .unwrap();
        assert_eq!(body.get("tool_name"), Some(&json!("get_weather")));
        let result = body.get("result").unwrap();
        assert_eq!(result.get("arguments").unwrap().get("city"), Some(&json!("Oslo")));
    }

    #[tokio::test]
    async fn mcp_call_requires_tool_name() {
        let handler = McpCallHandler {
            bridge: Arc::new(StubBridge),
        };
        let error = handler
            .handle(request(PATH_MCP_CALL, json!({"agent_id": "a1"})))
            .await
            .unwrap_err();
        assert_eq!(error.status, STATUS_BAD_REQUEST);
        assert!(error.message.contains("tool_name"));
    }

    #[tokio::test]
    async fn mcp_call_failure_is_server_error() {
        let handler = McpCallHandler {
            bridge: Arc::new(StubBridge),
        };
        let error = handler
            .handle(request(
                PATH_MCP_CALL,
                json!({"device_id": "d1", "tool_name": "broken"}),
            ))
            .await
            .unwrap_err();
        assert_eq!(error.status, STATUS_SERVER_ERROR);
        assert!(error.message.contains("tool exploded"));
    }

    // -- built-in registration --

    #[tokio::test]
    async fn builtins_without_collaborators_skip_delegating_paths() {
        let registry = HandlerRegistry::new();
        register_builtins(
            &registry,
            ClientInstanceId::new(),
            Instant::now(),
            None,
            Duration::from_secs(90),
            None,
        );
        let mut paths = registry.paths();
        paths.sort();
        assert_eq!(paths, vec![PATH_SERVER_INFO, PATH_SERVER_PING]);
    }

    #[tokio::test]
    async fn builtins_with_collaborators_register_all_paths() {
        let registry = HandlerRegistry::new();
        register_builtins(
            &registry,
            ClientInstanceId::new(),
            Instant::now(),
            Some(Arc::new(OkTester)),
            Duration::from_secs(90),
            Some(Arc::new(StubBridge)),
        );
        assert_eq!(registry.paths().len(), 5);
    }
}
