//! Reconnection backoff calculation.
//!
//! The retry loop in `tether-link` sleeps [`reconnect_delay`] before each
//! attempt. The sequence is deterministic — the reconnect path favors a
//! predictable, capped schedule over jittered spread because a single edge
//! instance owns a single connection.

use std::time::Duration;

/// Default initial reconnect delay.
pub const DEFAULT_INITIAL_DELAY: Duration = Duration::from_secs(3);
/// Default reconnect delay cap.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(60);

/// Delay before reconnect attempt `attempt` (1-based).
///
/// Formula: `min(initial * 2^(attempt-1), max)`. Attempt 0 is treated as
/// attempt 1.
#[must_use]
pub fn reconnect_delay(attempt: u32, initial: Duration, max: Duration) -> Duration {
    let exponent = attempt.saturating_sub(1).min(31);
    let factor = 1u64 << exponent;
    let millis = u64::try_from(initial.as_millis())
        .unwrap_or(u64::MAX)
        .saturating_mul(factor);
    Duration::from_millis(millis).min(max)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
