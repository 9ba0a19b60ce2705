//! Error types for the control-plane link.
//!
//! The taxonomy follows how each failure is handled, not where it occurs:
//!
//! - Transport failures ([`LinkError::Handshake`], [`LinkError::Transport`])
//!   funnel into disconnect + reconnect and are never fatal.
//! - Caller-side failures ([`LinkError::Timeout`], [`LinkError::Cancelled`],
//!   [`LinkError::QueueFull`], [`LinkError::NotConnected`],
//!   [`LinkError::ConnectionClosed`]) are returned synchronously to the
//!   caller of a blocking or callback API.
//! - Protocol failures ([`LinkError::Protocol`], [`LinkError::Json`]) are
//!   logged at the read loop and never terminate it.

use std::time::Duration;

use thiserror::Error;

/// Errors surfaced by the link client and its request APIs.
#[derive(Debug, Error)]
pub enum LinkError {
    /// No live connection to the control plane.
    #[error("not connected to the control plane")]
    NotConnected,

    /// The connection was torn down while the request was pending.
    #[error("connection closed")]
    ConnectionClosed,

    /// The client is shutting down; no new connections are opened.
    #[error("client is shutting down")]
    ShuttingDown,

    /// A blocking wait expired before the response arrived.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// The caller's cancellation signal fired.
    #[error("request cancelled")]
    Cancelled,

    /// The outbound queue stayed full past the enqueue wait bound.
    #[error("outbound queue full")]
    QueueFull,

    /// The WebSocket upgrade failed.
    #[error("handshake failed: {0}")]
    Handshake(String),

    /// A read or write on the live socket failed.
    #[error("transport error: {0}")]
    Transport(String),

    /// A frame violated the wire contract.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Envelope serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// The shared default client was initialized twice.
    #[error("default client already initialized")]
    AlreadyInitialized,
}

impl LinkError {
    /// Whether this error indicates the transport is unusable and the
    /// connection should be re-established.
    #[must_use]
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Handshake(_) | Self::Transport(_))
    }
}

/// Result alias for link operations.
pub type LinkResult<T> = std::result::Result<T, LinkError>;

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
