//! Connection state and operational statistics.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Lifecycle state of the link.
///
/// Owned exclusively by the lifecycle controller; every other component
/// reads it through an accessor and never mutates it directly.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No live transport; reconnection may be in progress.
    Disconnected,
    /// Exactly one live transport handle exists.
    Connected,
    /// Manually disconnected; terminal for reconnection.
    ShuttingDown,
}

impl ConnectionState {
    /// Whether a live transport handle exists.
    #[must_use]
    pub fn is_connected(self) -> bool {
        self == Self::Connected
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connected => write!(f, "connected"),
            Self::ShuttingDown => write!(f, "shutting_down"),
        }
    }
}

/// Snapshot of link internals for operational introspection.
#[derive(Clone, Debug)]
pub struct LinkStats {
    /// Current lifecycle state.
    pub state: ConnectionState,
    /// Outstanding, not-yet-resolved requests.
    pub pending_requests: usize,
    /// Reconnect attempts made by the current/last retry loop.
    pub reconnect_attempts: u32,
    /// Delay the retry loop last slept (zero when idle).
    pub current_reconnect_delay: Duration,
    /// Time since the current connection was established, if connected.
    pub connected_for: Option<Duration>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
