//! Shared default client with explicit lifecycle hooks.
//!
//! The embedding process owns initialization and teardown; there is no
//! implicit global construction. [`init`] installs the instance once,
//! [`get`] hands out cheap clones, and [`shutdown`] disconnects and clears
//! it so a later `init` can install a fresh one.

use parking_lot::RwLock;
use tether_core::errors::{LinkError, LinkResult};

use crate::client::LinkClient;

static DEFAULT: RwLock<Option<LinkClient>> = RwLock::new(None);

/// Install the shared default client.
///
/// Fails with [`LinkError::AlreadyInitialized`] when one is already
/// installed.
pub fn init(client: LinkClient) -> LinkResult<()> {
    let mut guard = DEFAULT.write();
    if guard.is_some() {
        return Err(LinkError::AlreadyInitialized);
    }
    *guard = Some(client);
    Ok(())
}

/// The shared default client, if initialized.
#[must_use]
pub fn get() -> Option<LinkClient> {
    DEFAULT.read().clone()
}

/// Disconnect (manual) and clear the shared default client.
///
/// No-op when none is installed.
pub async fn shutdown() {
    let client = DEFAULT.write().take();
    if let Some(client) = client {
        client.disconnect(true).await;
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
