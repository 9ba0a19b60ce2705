//! Inbound router: one reader task per connection epoch.
//!
//! The reader owns the receive half of the socket and processes one frame
//! at a time. It only classifies and signals — responses are handed to the
//! correlation table, requests and pushes are dispatched on spawned tasks —
//! so a slow consumer can never stall the read loop. Protocol errors are
//! logged and skipped; only transport errors terminate the loop.

use std::sync::Arc;

use futures::StreamExt;
use tether_core::envelope::{InboundFrame, PushEnvelope, RequestEnvelope, classify};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::client::{LinkShared, WsSource};
use crate::handlers;

/// Spawn the reader loop for one connection epoch.
pub(crate) fn spawn_reader(
    shared: &Arc<LinkShared>,
    mut stream: WsSource,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    let shared = Arc::clone(shared);
    tokio::spawn(async move {
        loop {
            let message = tokio::select! {
                () = cancel.cancelled() => return,
                message = stream.next() => message,
            };
            match message {
                Some(Ok(Message::Text(text))) => {
                    shared.mark_alive();
                    route_frame(&shared, text.as_str());
                }
                Some(Ok(Message::Ping(payload))) => {
                    shared.mark_alive();
                    if let Err(error) = shared.write_frame(Message::Pong(payload)).await {
                        warn!(%error, "pong reply failed");
                        break;
                    }
                }
                Some(Ok(Message::Pong(_))) => {
                    shared.mark_alive();
                    debug!("pong received");
                }
                Some(Ok(Message::Close(frame))) => {
                    info!(?frame, "close frame received");
                    break;
                }
                Some(Ok(other)) => {
                    debug!(kind = ?other, "ignoring non-text frame");
                }
                Some(Err(error)) => {
                    warn!(%error, "socket read failed");
                    break;
                }
                None => {
                    info!("socket stream ended");
                    break;
                }
            }
        }
        if !cancel.is_cancelled() {
            shared.on_transport_error("read loop terminated").await;
        }
    })
}

/// Classify one text frame and route it.
fn route_frame(shared: &Arc<LinkShared>, text: &str) {
    match classify(text) {
        Ok(InboundFrame::Response(response)) => {
            let id = response.id.clone();
            if !shared.pending.complete(response) {
                warn!(%id, "unknown response id, dropping");
            }
        }
        Ok(InboundFrame::Request(request)) => dispatch_request(shared, request),
        Ok(InboundFrame::Push(push)) => dispatch_push(shared, push),
        Err(error) => warn!(%error, "dropping undecodable frame"),
    }
}

/// Answer an inbound request on a spawned task.
///
/// The globally set request handler wins when present; otherwise the
/// path-keyed registry dispatches. Either way the response goes back
/// through the serialized write path.
fn dispatch_request(shared: &Arc<LinkShared>, request: RequestEnvelope) {
    let shared = Arc::clone(shared);
    let _ = tokio::spawn(async move {
        debug!(id = %request.id, method = %request.method, path = %request.path, "inbound request");
        let response = match shared.request_handler() {
            Some(handler) => handlers::run_handler(handler.as_ref(), request).await,
            None => shared.handlers.dispatch(request).await,
        };
        let text = match serde_json::to_string(&response) {
            Ok(text) => text,
            Err(error) => {
                warn!(%error, "response serialization failed");
                return;
            }
        };
        if let Err(error) = shared.write_text(text).await {
            warn!(%error, "response write failed");
            shared.on_transport_error("response write failed").await;
        }
    });
}

/// Hand a push to the registered handler, if any.
fn dispatch_push(shared: &Arc<LinkShared>, push: PushEnvelope) {
    match shared.push_handler() {
        Some(handler) => {
            let _ = tokio::spawn(async move { handler.on_push(push.data).await });
        }
        None => warn!(kind = %push.kind, "no push handler registered, dropping push"),
    }
}
