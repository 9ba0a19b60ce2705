//! Heartbeat: periodic liveness probe independent of request traffic.
//!
//! Every interval the task sends a Ping through the serialized write path
//! and checks whether the peer has shown any sign of life since the last
//! tick (pongs and all inbound frames count). After `timeout / interval`
//! consecutive silent intervals the connection is declared dead and handed
//! to the reconnect controller.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio::time;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{trace, warn};

use crate::client::LinkShared;

/// Spawn the heartbeat loop for one connection epoch.
pub(crate) fn spawn_heartbeat(
    shared: &Arc<LinkShared>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    let shared = Arc::clone(shared);
    tokio::spawn(async move {
        let interval = shared.config.heartbeat_interval;
        let timeout = shared.config.heartbeat_timeout;
        let interval_secs = interval.as_secs().max(1);
        let max_missed = (timeout.as_secs() / interval_secs).max(1) as u32;

        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
        let _ = ticker.tick().await; // consume the immediate first tick
        let mut missed: u32 = 0;

        loop {
            tokio::select! {
                () = cancel.cancelled() => return,
                _ = ticker.tick() => {}
            }
            if shared.check_alive() {
                missed = 0;
            } else {
                missed += 1;
                if missed >= max_missed {
                    warn!(missed, "peer unresponsive, declaring connection dead");
                    break;
                }
            }
            if let Err(error) = shared.write_frame(Message::Ping(Vec::new().into())).await {
                warn!(%error, "heartbeat ping failed");
                break;
            }
            trace!("heartbeat ping sent");
        }
        if !cancel.is_cancelled() {
            shared.on_transport_error("heartbeat failure").await;
        }
    })
}
