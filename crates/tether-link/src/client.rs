//! Link client facade and connection lifecycle.
//!
//! [`LinkClient`] owns all link state through one shared core. The
//! lifecycle controller here is the only writer of the connection state;
//! every other component funnels transport failures into
//! [`LinkShared::on_transport_error`], which tears the connection epoch
//! down and hands control to the reconnect loop.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex as SyncMutex;
use tether_core::envelope::{JsonMap, RequestEnvelope, ResponseEnvelope};
use tether_core::errors::{LinkError, LinkResult};
use tether_core::ids::{ClientInstanceId, RequestId};
use tokio::net::TcpStream;
use tokio::sync::{Mutex as AsyncMutex, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::ORIGIN;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::LinkConfig;
use crate::correlation::PendingTable;
use crate::handlers::{self, ConfigTester, HandlerRegistry, McpBridge, PushHandler, RequestHandler};
use crate::outbound::{self, OutboundQueue};
use crate::reconnect::ReconnectController;
use crate::state::{ConnectionState, LinkStats};
use crate::{heartbeat, router};

pub(crate) type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
pub(crate) type WsSink = SplitSink<WsStream, Message>;
pub(crate) type WsSource = SplitStream<WsStream>;

/// State shared by the client facade and the per-connection tasks.
///
/// Each table lives inside the component responsible for it and is reached
/// only through accessor methods that take the narrow lock internally; the
/// sink mutex is distinct from the state lock because writes are issued
/// concurrently by outbound workers, the heartbeat, and response senders.
pub(crate) struct LinkShared {
    pub(crate) config: LinkConfig,
    pub(crate) instance_id: ClientInstanceId,
    state: SyncMutex<ConnectionState>,
    /// Serializes connect attempts (single critical section).
    connect_lock: AsyncMutex<()>,
    /// Write half of the socket; the one lock every write goes through.
    sink: AsyncMutex<Option<WsSink>>,
    pub(crate) pending: PendingTable,
    pub(crate) handlers: HandlerRegistry,
    push_handler: SyncMutex<Option<Arc<dyn PushHandler>>>,
    request_handler: SyncMutex<Option<Arc<dyn RequestHandler>>>,
    pub(crate) outbound: OutboundQueue,
    reconnect: Arc<ReconnectController>,
    epoch: SyncMutex<Option<CancellationToken>>,
    epoch_tasks: SyncMutex<Vec<JoinHandle<()>>>,
    alive: AtomicBool,
    connected_at: SyncMutex<Option<Instant>>,
}

impl LinkShared {
    /// Current lifecycle state.
    pub(crate) fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    fn set_shutting_down(&self) {
        *self.state.lock() = ConnectionState::ShuttingDown;
    }

    fn clear_shutdown(&self) {
        let mut state = self.state.lock();
        if *state == ConnectionState::ShuttingDown {
            *state = ConnectionState::Disconnected;
        }
    }

    /// Record peer activity for the heartbeat.
    pub(crate) fn mark_alive(&self) {
        self.alive.store(true, Ordering::Relaxed);
    }

    /// Check and reset the alive flag; true when the peer showed life since
    /// the previous check.
    pub(crate) fn check_alive(&self) -> bool {
        self.alive.swap(false, Ordering::Relaxed)
    }

    /// Globally installed request handler, if any.
    pub(crate) fn request_handler(&self) -> Option<Arc<dyn RequestHandler>> {
        self.request_handler.lock().clone()
    }

    /// Registered push handler, if any.
    pub(crate) fn push_handler(&self) -> Option<Arc<dyn PushHandler>> {
        self.push_handler.lock().clone()
    }

    /// Perform one serialized write on the live socket.
    pub(crate) async fn write_frame(&self, message: Message) -> LinkResult<()> {
        let mut guard = self.sink.lock().await;
        let Some(sink) = guard.as_mut() else {
            return Err(LinkError::NotConnected);
        };
        sink.send(message)
            .await
            .map_err(|error| LinkError::Transport(error.to_string()))
    }

    /// Serialize-and-write helper for envelope frames.
    pub(crate) async fn write_text(&self, text: String) -> LinkResult<()> {
        self.write_frame(Message::Text(text.into())).await
    }

    /// Funnel for transport failures observed by any component.
    pub(crate) async fn on_transport_error(self: &Arc<Self>, reason: &str) {
        if self.state() == ConnectionState::ShuttingDown {
            return;
        }
        warn!(reason, "transport error; tearing down connection");
        self.disconnect_inner(false, false).await;
        self.trigger_reconnect();
    }

    /// Start the reconnect loop (no-op while retrying or shutting down).
    pub(crate) fn trigger_reconnect(self: &Arc<Self>) {
        self.reconnect.trigger(Arc::clone(self));
    }

    pub(crate) async fn stop_reconnect(&self) {
        self.reconnect.stop().await;
    }

    /// Open the socket and start the per-connection tasks.
    ///
    /// Idempotent: returns immediately when already connected. The connect
    /// lock makes concurrent invocations safe — one attempt runs, the rest
    /// observe its outcome.
    pub(crate) async fn connect_inner(self: &Arc<Self>) -> LinkResult<()> {
        let _guard = self.connect_lock.lock().await;
        match self.state() {
            ConnectionState::Connected => return Ok(()),
            ConnectionState::ShuttingDown => return Err(LinkError::ShuttingDown),
            ConnectionState::Disconnected => {}
        }

        let url = self.config.link_url()?;
        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|error| LinkError::Handshake(error.to_string()))?;
        let origin = HeaderValue::from_str(&self.config.base_url)
            .map_err(|error| LinkError::Handshake(format!("invalid origin header: {error}")))?;
        let instance = HeaderValue::from_str(self.instance_id.as_str())
            .map_err(|error| LinkError::Handshake(format!("invalid uuid header: {error}")))?;
        let _ = request.headers_mut().insert(ORIGIN, origin);
        let _ = request.headers_mut().insert("uuid", instance);

        info!(%url, instance_id = %self.instance_id, "connecting to control plane");
        let (socket, _response) = connect_async(request)
            .await
            .map_err(|error| LinkError::Handshake(error.to_string()))?;
        let (sink, stream) = socket.split();

        *self.sink.lock().await = Some(sink);
        self.mark_alive();

        let token = CancellationToken::new();
        let (tx, rx) = mpsc::channel(self.config.outbound_capacity.max(1));
        self.outbound.install(tx);

        let mut tasks = outbound::spawn_workers(self, rx, &token, self.config.outbound_workers);
        tasks.push(router::spawn_reader(self, stream, token.clone()));
        tasks.push(heartbeat::spawn_heartbeat(self, token.clone()));

        *self.epoch.lock() = Some(token);
        *self.epoch_tasks.lock() = tasks;
        *self.state.lock() = ConnectionState::Connected;
        *self.connected_at.lock() = Some(Instant::now());
        info!("link established");
        Ok(())
    }

    /// Tear down the current connection epoch.
    ///
    /// Idempotent. Releases every pending correlation entry with a
    /// connection-closed result and closes the outbound queue so workers
    /// drain and exit (the next connect installs a fresh queue). With
    /// `wait_for_tasks` the call blocks until the epoch tasks have exited;
    /// the error path skips the wait because it runs *on* one of those
    /// tasks.
    pub(crate) async fn disconnect_inner(&self, manual: bool, wait_for_tasks: bool) {
        {
            let mut state = self.state.lock();
            if manual {
                *state = ConnectionState::ShuttingDown;
            } else if *state == ConnectionState::Connected {
                *state = ConnectionState::Disconnected;
            }
        }
        *self.connected_at.lock() = None;

        let token = self.epoch.lock().take();
        if let Some(token) = token {
            token.cancel();
        }
        self.outbound.close();

        // Taking the sink under the write lock lets any in-flight write
        // finish before the socket goes away.
        let sink = self.sink.lock().await.take();
        if let Some(mut sink) = sink {
            let _ = sink.send(Message::Close(None)).await;
            let _ = sink.close().await;
            info!(manual, "link closed");
        }

        self.pending.drain_closed();

        if wait_for_tasks {
            let tasks: Vec<JoinHandle<()>> = std::mem::take(&mut *self.epoch_tasks.lock());
            for task in tasks {
                let _ = task.await;
            }
        }
    }
}

/// Client for the persistent control-plane link.
///
/// Cheap to clone; all clones share one connection.
#[derive(Clone)]
pub struct LinkClient {
    shared: Arc<LinkShared>,
}

/// Builder wiring collaborators into a [`LinkClient`].
pub struct LinkClientBuilder {
    config: LinkConfig,
    instance_id: Option<ClientInstanceId>,
    config_tester: Option<Arc<dyn ConfigTester>>,
    mcp_bridge: Option<Arc<dyn McpBridge>>,
}

impl LinkClientBuilder {
    /// Use a fixed instance id instead of a generated one.
    #[must_use]
    pub fn instance_id(mut self, id: ClientInstanceId) -> Self {
        self.instance_id = Some(id);
        self
    }

    /// Attach the configuration-test collaborator, enabling
    /// `POST /api/config/test`.
    #[must_use]
    pub fn config_tester(mut self, tester: Arc<dyn ConfigTester>) -> Self {
        self.config_tester = Some(tester);
        self
    }

    /// Attach the MCP collaborator, enabling `GET /api/mcp/tools` and
    /// `POST /api/mcp/call`.
    #[must_use]
    pub fn mcp_bridge(mut self, bridge: Arc<dyn McpBridge>) -> Self {
        self.mcp_bridge = Some(bridge);
        self
    }

    /// Build the client and register the built-in handlers.
    #[must_use]
    pub fn build(self) -> LinkClient {
        let instance_id = self.instance_id.unwrap_or_default();
        let started_at = Instant::now();
        let config_test_budget = self.config.config_test_budget;

        let shared = Arc::new(LinkShared {
            config: self.config,
            instance_id: instance_id.clone(),
            state: SyncMutex::new(ConnectionState::Disconnected),
            connect_lock: AsyncMutex::new(()),
            sink: AsyncMutex::new(None),
            pending: PendingTable::new(),
            handlers: HandlerRegistry::new(),
            push_handler: SyncMutex::new(None),
            request_handler: SyncMutex::new(None),
            outbound: OutboundQueue::new(),
            reconnect: Arc::new(ReconnectController::new()),
            epoch: SyncMutex::new(None),
            epoch_tasks: SyncMutex::new(Vec::new()),
            alive: AtomicBool::new(false),
            connected_at: SyncMutex::new(None),
        });

        handlers::register_builtins(
            &shared.handlers,
            instance_id,
            started_at,
            self.config_tester,
            config_test_budget,
            self.mcp_bridge,
        );

        LinkClient { shared }
    }
}

impl LinkClient {
    /// Start building a client.
    #[must_use]
    pub fn builder(config: LinkConfig) -> LinkClientBuilder {
        LinkClientBuilder {
            config,
            instance_id: None,
            config_tester: None,
            mcp_bridge: None,
        }
    }

    /// Build a client with no collaborators attached.
    #[must_use]
    pub fn new(config: LinkConfig) -> Self {
        Self::builder(config).build()
    }

    /// This client's instance id (the `UUID` handshake header).
    #[must_use]
    pub fn instance_id(&self) -> &ClientInstanceId {
        &self.shared.instance_id
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    /// Whether a live transport handle exists.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// Snapshot of link internals.
    #[must_use]
    pub fn stats(&self) -> LinkStats {
        LinkStats {
            state: self.state(),
            pending_requests: self.shared.pending.len(),
            reconnect_attempts: self.shared.reconnect_attempts(),
            current_reconnect_delay: self.shared.current_reconnect_delay(),
            connected_for: self.shared.connected_at.lock().map(|since| since.elapsed()),
        }
    }

    /// Open the connection.
    ///
    /// Idempotent and safe under concurrent invocation. Calling connect
    /// after a manual disconnect re-arms the lifecycle.
    pub async fn connect(&self) -> LinkResult<()> {
        self.shared.clear_shutdown();
        self.shared.connect_inner().await
    }

    /// Close the connection.
    ///
    /// Idempotent. Releases all pending requests with a connection-closed
    /// result and blocks until the per-connection tasks have exited. With
    /// `manual`, reconnection is permanently disabled until the next
    /// explicit [`connect`](Self::connect).
    pub async fn disconnect(&self, manual: bool) {
        if manual {
            self.shared.set_shutting_down();
            self.shared.stop_reconnect().await;
        }
        self.shared.disconnect_inner(manual, true).await;
    }

    /// Start the reconnect loop unless one is running or the client is
    /// shutting down.
    pub fn trigger_reconnect(&self) {
        self.shared.trigger_reconnect();
    }

    /// Abort the reconnect loop and block until it has exited.
    pub async fn stop_reconnect(&self) {
        self.shared.stop_reconnect().await;
    }

    /// Blocking request over the link: send, then wait for the correlated
    /// response, the configured timeout, or never — whichever fires first.
    pub async fn request(
        &self,
        method: &str,
        path: &str,
        headers: Option<HashMap<String, String>>,
        body: Option<JsonMap>,
    ) -> LinkResult<ResponseEnvelope> {
        self.request_with_cancel(method, path, headers, body, &CancellationToken::new())
            .await
    }

    /// Blocking request with an external cancellation signal.
    ///
    /// Writes through the direct serialized path (bypassing the queue) so
    /// the caller gets immediate per-call backpressure feedback. The
    /// correlation entry is removed on every exit branch.
    pub async fn request_with_cancel(
        &self,
        method: &str,
        path: &str,
        headers: Option<HashMap<String, String>>,
        body: Option<JsonMap>,
        cancel: &CancellationToken,
    ) -> LinkResult<ResponseEnvelope> {
        if !self.is_connected() {
            return Err(LinkError::NotConnected);
        }
        let envelope = build_envelope(method, path, headers, body);
        let id = envelope.id.clone();
        let text = serde_json::to_string(&envelope)?;

        let rx = self.shared.pending.insert_channel(id.clone());
        if let Err(error) = self.shared.write_text(text).await {
            let _ = self.shared.pending.remove(&id);
            if error.is_transport() {
                self.shared.on_transport_error("blocking request write failed").await;
            }
            return Err(error);
        }

        let timeout = self.shared.config.request_timeout;
        let result = tokio::select! {
            reply = rx => reply.unwrap_or(Err(LinkError::ConnectionClosed)),
            () = tokio::time::sleep(timeout) => Err(LinkError::Timeout(timeout)),
            () = cancel.cancelled() => Err(LinkError::Cancelled),
        };
        let _ = self.shared.pending.remove(&id);
        result
    }

    /// Callback-style request through the bounded outbound queue.
    ///
    /// The callback fires on a background task when the matching response
    /// arrives, or with an error at connection teardown. Enqueue itself can
    /// fail fast ([`LinkError::QueueFull`]) under backpressure.
    pub async fn request_with_callback(
        &self,
        method: &str,
        path: &str,
        headers: Option<HashMap<String, String>>,
        body: Option<JsonMap>,
        callback: impl FnOnce(LinkResult<ResponseEnvelope>) + Send + 'static,
    ) -> LinkResult<RequestId> {
        if !self.is_connected() {
            return Err(LinkError::NotConnected);
        }
        let envelope = build_envelope(method, path, headers, body);
        let id = envelope.id.clone();
        let text = serde_json::to_string(&envelope)?;

        self.shared.pending.insert_callback(id.clone(), Box::new(callback));
        let enqueued = self
            .shared
            .outbound
            .enqueue(
                text,
                self.shared.config.enqueue_timeout,
                &CancellationToken::new(),
            )
            .await;
        if let Err(error) = enqueued {
            let _ = self.shared.pending.remove(&id);
            return Err(error);
        }
        Ok(id)
    }

    /// Deregister a callback before its response arrives.
    pub fn remove_callback(&self, id: &RequestId) -> bool {
        self.shared.pending.remove(id)
    }

    /// Fire a request and return its id immediately; collect the response
    /// later with [`collect_response`](Self::collect_response).
    ///
    /// Nothing is registered in the correlation table here, so a response
    /// arriving before collection starts is dropped as unknown — the
    /// documented at-most-once contract.
    pub async fn send_detached(
        &self,
        method: &str,
        path: &str,
        headers: Option<HashMap<String, String>>,
        body: Option<JsonMap>,
    ) -> LinkResult<RequestId> {
        if !self.is_connected() {
            return Err(LinkError::NotConnected);
        }
        let envelope = build_envelope(method, path, headers, body);
        let id = envelope.id.clone();
        let text = serde_json::to_string(&envelope)?;
        self.shared
            .outbound
            .enqueue(
                text,
                self.shared.config.enqueue_timeout,
                &CancellationToken::new(),
            )
            .await?;
        Ok(id)
    }

    /// Block for the response to a detached send, with its own timeout.
    ///
    /// Temporarily registers a one-shot callback for the id; the entry is
    /// removed whichever way the wait ends.
    pub async fn collect_response(
        &self,
        id: &RequestId,
        timeout: Duration,
    ) -> LinkResult<ResponseEnvelope> {
        let (tx, rx) = oneshot::channel();
        self.shared.pending.insert_callback(
            id.clone(),
            Box::new(move |result| {
                let _ = tx.send(result);
            }),
        );
        let result = tokio::select! {
            reply = rx => reply.unwrap_or(Err(LinkError::ConnectionClosed)),
            () = tokio::time::sleep(timeout) => Err(LinkError::Timeout(timeout)),
        };
        let _ = self.shared.pending.remove(id);
        result
    }

    /// Register a path handler (last-register-wins, survives reconnects).
    pub fn register_handler(&self, path: impl Into<String>, handler: Arc<dyn RequestHandler>) {
        self.shared.handlers.register(path, handler);
    }

    /// Remove a path handler.
    pub fn unregister_handler(&self, path: &str) -> bool {
        self.shared.handlers.unregister(path)
    }

    /// The path-keyed registry, for introspection.
    #[must_use]
    pub fn registry(&self) -> &HandlerRegistry {
        &self.shared.handlers
    }

    /// Install the single global request handler, overriding path dispatch.
    /// Last registration wins.
    pub fn set_request_handler(&self, handler: Arc<dyn RequestHandler>) {
        *self.shared.request_handler.lock() = Some(handler);
    }

    /// Remove the global request handler, restoring path dispatch.
    pub fn clear_request_handler(&self) {
        *self.shared.request_handler.lock() = None;
    }

    /// Install the push handler. At most one is supported; last
    /// registration wins.
    pub fn set_push_handler(&self, handler: Arc<dyn PushHandler>) {
        *self.shared.push_handler.lock() = Some(handler);
    }
}

impl LinkShared {
    fn reconnect_attempts(&self) -> u32 {
        self.reconnect.retry_count()
    }

    fn current_reconnect_delay(&self) -> Duration {
        self.reconnect.current_delay()
    }

    /// Whether a retry loop is currently running.
    #[cfg(test)]
    pub(crate) fn is_retrying(&self) -> bool {
        self.reconnect.is_retrying()
    }
}

fn build_envelope(
    method: &str,
    path: &str,
    headers: Option<HashMap<String, String>>,
    body: Option<JsonMap>,
) -> RequestEnvelope {
    let mut envelope = RequestEnvelope::new(method, path);
    if let Some(headers) = headers {
        envelope = envelope.with_headers(headers);
    }
    if let Some(body) = body {
        envelope = envelope.with_body(body);
    }
    envelope
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
