//! Reconnect controller: exactly one retry loop, capped exponential
//! backoff, scoped shutdown.
//!
//! The loop retries forever — only a stop signal or shutdown ends it.
//! `stop` cancels the loop and then awaits the task handle, so once it
//! returns no orphaned retry task survives. All loop bookkeeping (running
//! flag, cancel token, task handle) lives under one lock; a concurrent
//! `trigger`/`stop` pair can never observe a half-started loop.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tether_core::backoff::reconnect_delay;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::client::LinkShared;
use crate::state::ConnectionState;

#[derive(Default)]
struct Inner {
    running: bool,
    cancel: Option<CancellationToken>,
    handle: Option<JoinHandle<()>>,
}

/// Retry-loop state, guarded so only one loop runs at a time.
#[derive(Default)]
pub(crate) struct ReconnectController {
    inner: Mutex<Inner>,
    retry_count: AtomicU32,
    current_delay_ms: AtomicU64,
}

impl ReconnectController {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Start the retry loop unless one is already running or the client is
    /// shutting down.
    pub(crate) fn trigger(self: &Arc<Self>, shared: Arc<LinkShared>) {
        if shared.state() == ConnectionState::ShuttingDown {
            return;
        }
        let mut inner = self.inner.lock();
        if inner.running {
            return;
        }
        inner.running = true;
        let token = CancellationToken::new();
        inner.cancel = Some(token.clone());
        let controller = Arc::clone(self);
        inner.handle = Some(tokio::spawn(async move {
            controller.retry_loop(&shared, &token).await;
            controller.inner.lock().running = false;
        }));
    }

    /// Signal the loop to abort and block until it has exited.
    pub(crate) async fn stop(&self) {
        let (cancel, handle) = {
            let mut inner = self.inner.lock();
            (inner.cancel.take(), inner.handle.take())
        };
        if let Some(cancel) = cancel {
            cancel.cancel();
        }
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        self.inner.lock().running = false;
    }

    /// Whether a retry loop is currently running.
    pub(crate) fn is_retrying(&self) -> bool {
        self.inner.lock().running
    }

    /// Attempts made by the current/last loop.
    pub(crate) fn retry_count(&self) -> u32 {
        self.retry_count.load(Ordering::Relaxed)
    }

    /// Delay the loop last slept.
    pub(crate) fn current_delay(&self) -> Duration {
        Duration::from_millis(self.current_delay_ms.load(Ordering::Relaxed))
    }

    async fn retry_loop(&self, shared: &Arc<LinkShared>, cancel: &CancellationToken) {
        let initial = shared.config.reconnect_initial_delay;
        let max = shared.config.reconnect_max_delay;
        self.retry_count.store(0, Ordering::Relaxed);
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            let delay = reconnect_delay(attempt, initial, max);
            self.retry_count.store(attempt, Ordering::Relaxed);
            self.current_delay_ms
                .store(delay.as_millis() as u64, Ordering::Relaxed);
            info!(attempt, ?delay, "reconnect scheduled");

            tokio::select! {
                () = cancel.cancelled() => {
                    info!("reconnect loop stopped");
                    return;
                }
                () = tokio::time::sleep(delay) => {}
            }
            if shared.state() == ConnectionState::ShuttingDown {
                info!("reconnect loop ending: shutdown requested");
                return;
            }

            match shared.connect_inner().await {
                Ok(()) => {
                    info!(attempt, "reconnected");
                    self.current_delay_ms.store(0, Ordering::Relaxed);
                    return;
                }
                Err(error) => {
                    warn!(attempt, %error, "reconnect attempt failed");
                }
            }
        }
    }
}
