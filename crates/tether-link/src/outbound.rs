//! Outbound dispatcher: bounded queue feeding a fixed pool of sender
//! workers.
//!
//! Workers are the only long-lived producers on the socket besides the
//! heartbeat and response senders; every actual write goes through the
//! single sink mutex owned by the client, so bytes from concurrent
//! producers never interleave. The queue bound is the backpressure
//! contract: when the transport stalls, enqueue itself fails after a fixed
//! wait instead of growing memory.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tether_core::errors::{LinkError, LinkResult};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::client::LinkShared;

/// Handle to the bounded outbound queue.
///
/// The sender half is replaced on every connection epoch: `close` drops it
/// so the workers drain and exit, and the next connect installs a fresh
/// channel.
#[derive(Default)]
pub(crate) struct OutboundQueue {
    tx: Mutex<Option<mpsc::Sender<String>>>,
    dropped: AtomicU64,
}

impl OutboundQueue {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Install the sender half for a new connection epoch.
    pub(crate) fn install(&self, tx: mpsc::Sender<String>) {
        *self.tx.lock() = Some(tx);
    }

    /// Drop the sender half; workers exit once the buffer drains.
    pub(crate) fn close(&self) {
        *self.tx.lock() = None;
    }

    /// Enqueue a serialized envelope.
    ///
    /// Fails with [`LinkError::QueueFull`] after `wait` on a full queue,
    /// [`LinkError::Cancelled`] if the caller's token fires first, and
    /// [`LinkError::NotConnected`] when no epoch is installed.
    pub(crate) async fn enqueue(
        &self,
        text: String,
        wait: Duration,
        cancel: &CancellationToken,
    ) -> LinkResult<()> {
        let tx = self.tx.lock().clone().ok_or(LinkError::NotConnected)?;
        tokio::select! {
            result = tokio::time::timeout(wait, tx.send(text)) => match result {
                Ok(Ok(())) => Ok(()),
                Ok(Err(_)) => Err(LinkError::ConnectionClosed),
                Err(_) => Err(LinkError::QueueFull),
            },
            () = cancel.cancelled() => Err(LinkError::Cancelled),
        }
    }

    /// Count a frame discarded because the connection was not live.
    pub(crate) fn record_drop(&self) {
        let _ = self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Total frames discarded by workers.
    pub(crate) fn drop_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Spawn the fixed worker pool for one connection epoch.
///
/// Each worker pulls one envelope at a time, verifies the connection is
/// live (a dead connection discards the frame — the caller's bound
/// timeout/callback already covers failure detection), and performs a
/// single serialized write. A write failure is a connection error and
/// funnels into the reconnect controller.
pub(crate) fn spawn_workers(
    shared: &Arc<LinkShared>,
    rx: mpsc::Receiver<String>,
    cancel: &CancellationToken,
    count: usize,
) -> Vec<JoinHandle<()>> {
    let rx = Arc::new(tokio::sync::Mutex::new(rx));
    (0..count.max(1))
        .map(|worker| {
            let shared = Arc::clone(shared);
            let rx = Arc::clone(&rx);
            let cancel = cancel.clone();
            tokio::spawn(async move {
                loop {
                    let frame = tokio::select! {
                        () = cancel.cancelled() => return,
                        frame = async { rx.lock().await.recv().await } => frame,
                    };
                    let Some(text) = frame else {
                        // Queue closed and drained: epoch over.
                        return;
                    };
                    if !shared.state().is_connected() {
                        shared.outbound.record_drop();
                        warn!(worker, "connection not live, discarding queued frame");
                        continue;
                    }
                    if let Err(error) = shared.write_text(text).await {
                        warn!(worker, %error, "outbound write failed");
                        shared.on_transport_error("outbound write failed").await;
                    }
                }
            })
        })
        .collect()
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
