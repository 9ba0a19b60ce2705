//! Pending-request table: correlation ids → waiting consumers.
//!
//! The table is the single point where inbound responses meet outstanding
//! callers. A delivery target is either a one-shot reply channel (blocking
//! calls) or a registered callback (async calls). Entries are consumed
//! exactly once; a response whose id is absent is reported back to the
//! router as unknown so late or duplicate arrivals stay log-only.

use std::collections::HashMap;
use std::time::Instant;

use parking_lot::Mutex;
use tether_core::envelope::ResponseEnvelope;
use tether_core::errors::{LinkError, LinkResult};
use tether_core::ids::RequestId;
use tokio::sync::oneshot;

/// Callback invoked with the response, or with the teardown error.
pub type ResponseCallback = Box<dyn FnOnce(LinkResult<ResponseEnvelope>) + Send + 'static>;

enum PendingTarget {
    Channel(oneshot::Sender<LinkResult<ResponseEnvelope>>),
    Callback(ResponseCallback),
}

struct PendingRequest {
    target: PendingTarget,
    created_at: Instant,
}

/// Table of outstanding requests, guarded by a single mutex.
///
/// Owned by the client; exposed to the router and the request APIs through
/// these accessors only.
#[derive(Default)]
pub(crate) struct PendingTable {
    entries: Mutex<HashMap<RequestId, PendingRequest>>,
}

impl PendingTable {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Register a one-shot reply channel for a blocking call.
    pub(crate) fn insert_channel(
        &self,
        id: RequestId,
    ) -> oneshot::Receiver<LinkResult<ResponseEnvelope>> {
        let (tx, rx) = oneshot::channel();
        let previous = self.entries.lock().insert(
            id,
            PendingRequest {
                target: PendingTarget::Channel(tx),
                created_at: Instant::now(),
            },
        );
        debug_assert!(previous.is_none(), "correlation id reused");
        rx
    }

    /// Register a callback for an async call. Last registration wins.
    pub(crate) fn insert_callback(&self, id: RequestId, callback: ResponseCallback) {
        let _ = self.entries.lock().insert(
            id,
            PendingRequest {
                target: PendingTarget::Callback(callback),
                created_at: Instant::now(),
            },
        );
    }

    /// Deliver a response to its waiting consumer.
    ///
    /// The entry is looked up once and consumed. Returns `false` when the id
    /// is unknown (already resolved, timed out, or never sent from here).
    /// Callback targets run on a freshly spawned task so the caller (the
    /// reader loop) is never blocked by consumer code.
    pub(crate) fn complete(&self, response: ResponseEnvelope) -> bool {
        let entry = self.entries.lock().remove(&response.id);
        let Some(entry) = entry else {
            return false;
        };
        let waited = entry.created_at.elapsed();
        tracing::debug!(id = %response.id, status = response.status, ?waited, "response delivered");
        match entry.target {
            PendingTarget::Channel(tx) => {
                // Receiver may have given up (timeout/cancel); that's fine.
                let _ = tx.send(Ok(response));
            }
            PendingTarget::Callback(callback) => {
                let _ = tokio::spawn(async move { callback(Ok(response)) });
            }
        }
        true
    }

    /// Remove an entry without delivering anything.
    ///
    /// Used for scoped cleanup when a blocking wait exits and for explicit
    /// callback deregistration. Returns whether an entry existed.
    pub(crate) fn remove(&self, id: &RequestId) -> bool {
        self.entries.lock().remove(id).is_some()
    }

    /// Release every pending entry with a connection-closed result.
    ///
    /// Called at teardown so no waiter is left to ride out its timeout.
    pub(crate) fn drain_closed(&self) {
        let drained: Vec<PendingRequest> = {
            let mut entries = self.entries.lock();
            entries.drain().map(|(_, entry)| entry).collect()
        };
        if drained.is_empty() {
            return;
        }
        tracing::info!(count = drained.len(), "releasing pending requests: connection closed");
        for entry in drained {
            match entry.target {
                PendingTarget::Channel(tx) => {
                    let _ = tx.send(Err(LinkError::ConnectionClosed));
                }
                PendingTarget::Callback(callback) => {
                    let _ = tokio::spawn(async move { callback(Err(LinkError::ConnectionClosed)) });
                }
            }
        }
    }

    /// Number of outstanding requests.
    pub(crate) fn len(&self) -> usize {
        self.entries.lock().len()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
