//! Package-level constants.

/// Current version of the Tether link (sourced from Cargo.toml).
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Package name.
pub const NAME: &str = "tether";

/// Fixed path of the streaming endpoint on the control plane.
pub const LINK_ENDPOINT_PATH: &str = "/api/link/v1";

/// Push frame type announcing a configuration change.
pub const PUSH_SYSTEM_CONFIG: &str = "system_config";
