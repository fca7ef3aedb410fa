//! Stable exit codes for deployer CLI commands.

/// Command succeeded and every endpoint is deployed.
pub const OK: i32 = 0;
/// Command failed due to invalid config, unreadable state, or other errors.
pub const INVALID: i32 = 1;
/// `deployer status` found an endpoint that is failed or needs manual config.
pub const NEEDS_ATTENTION: i32 = 2;
