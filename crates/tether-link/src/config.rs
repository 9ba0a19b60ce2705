//! Link client configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tether_core::constants::LINK_ENDPOINT_PATH;
use tether_core::errors::{LinkError, LinkResult};

const fn default_request_timeout() -> Duration {
    Duration::from_secs(30)
}
const fn default_enqueue_timeout() -> Duration {
    Duration::from_secs(2)
}
const fn default_reconnect_initial_delay() -> Duration {
    Duration::from_secs(3)
}
const fn default_reconnect_max_delay() -> Duration {
    Duration::from_secs(60)
}
const fn default_heartbeat_interval() -> Duration {
    Duration::from_secs(30)
}
const fn default_heartbeat_timeout() -> Duration {
    Duration::from_secs(90)
}
const fn default_outbound_capacity() -> usize {
    64
}
const fn default_outbound_workers() -> usize {
    4
}
const fn default_config_test_budget() -> Duration {
    Duration::from_secs(90)
}

/// Configuration for a [`crate::LinkClient`].
///
/// All durations have serde defaults so a config can be loaded from a JSON
/// file with only `base_url` present.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LinkConfig {
    /// Base address of the control plane (`http(s)://…` or `ws(s)://…`).
    ///
    /// Sent as the `Origin` header on the upgrade request; the streaming
    /// endpoint is derived from it at a fixed path.
    pub base_url: String,

    /// How long a blocking request waits for its response.
    #[serde(default = "default_request_timeout", with = "duration_secs")]
    pub request_timeout: Duration,

    /// How long an enqueue waits on a full outbound queue before failing.
    #[serde(default = "default_enqueue_timeout", with = "duration_secs")]
    pub enqueue_timeout: Duration,

    /// Delay before the first reconnect attempt; doubles per failure.
    #[serde(default = "default_reconnect_initial_delay", with = "duration_secs")]
    pub reconnect_initial_delay: Duration,

    /// Cap on the reconnect delay.
    #[serde(default = "default_reconnect_max_delay", with = "duration_secs")]
    pub reconnect_max_delay: Duration,

    /// Interval between heartbeat pings.
    #[serde(default = "default_heartbeat_interval", with = "duration_secs")]
    pub heartbeat_interval: Duration,

    /// Window of peer silence after which the connection is declared dead.
    #[serde(default = "default_heartbeat_timeout", with = "duration_secs")]
    pub heartbeat_timeout: Duration,

    /// Outbound queue capacity (envelopes).
    #[serde(default = "default_outbound_capacity")]
    pub outbound_capacity: usize,

    /// Number of outbound sender workers.
    #[serde(default = "default_outbound_workers")]
    pub outbound_workers: usize,

    /// Overall budget for a `/api/config/test` run, independent of
    /// `request_timeout`.
    #[serde(default = "default_config_test_budget", with = "duration_secs")]
    pub config_test_budget: Duration,
}

impl LinkConfig {
    /// Create a config with defaults for everything but the base address.
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            request_timeout: default_request_timeout(),
            enqueue_timeout: default_enqueue_timeout(),
            reconnect_initial_delay: default_reconnect_initial_delay(),
            reconnect_max_delay: default_reconnect_max_delay(),
            heartbeat_interval: default_heartbeat_interval(),
            heartbeat_timeout: default_heartbeat_timeout(),
            outbound_capacity: default_outbound_capacity(),
            outbound_workers: default_outbound_workers(),
            config_test_budget: default_config_test_budget(),
        }
    }

    /// Override the blocking request timeout.
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Override the enqueue wait bound.
    #[must_use]
    pub fn with_enqueue_timeout(mut self, timeout: Duration) -> Self {
        self.enqueue_timeout = timeout;
        self
    }

    /// Override the reconnect backoff schedule.
    #[must_use]
    pub fn with_reconnect_delays(mut self, initial: Duration, max: Duration) -> Self {
        self.reconnect_initial_delay = initial;
        self.reconnect_max_delay = max;
        self
    }

    /// Override the heartbeat cadence.
    #[must_use]
    pub fn with_heartbeat(mut self, interval: Duration, timeout: Duration) -> Self {
        self.heartbeat_interval = interval;
        self.heartbeat_timeout = timeout;
        self
    }

    /// Override outbound queue sizing.
    #[must_use]
    pub fn with_outbound(mut self, capacity: usize, workers: usize) -> Self {
        self.outbound_capacity = capacity;
        self.outbound_workers = workers;
        self
    }

    /// Derive the WebSocket endpoint URL from the base address.
    ///
    /// `http`/`https` schemes map to `ws`/`wss`; `ws`/`wss` pass through.
    pub fn link_url(&self) -> LinkResult<String> {
        let base = self.base_url.trim_end_matches('/');
        let ws_base = if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{rest}")
        } else if base.starts_with("wss://") || base.starts_with("ws://") {
            base.to_owned()
        } else {
            return Err(LinkError::Handshake(format!(
                "unsupported base url scheme: {base}"
            )));
        };
        Ok(format!("{ws_base}{LINK_ENDPOINT_PATH}"))
    }
}

/// Serialize durations as whole seconds, matching the control plane's
/// config file format.
mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
