// Protocol version negotiation and N-1 support.
//
// Clients send a protocol version string (e.g. "scriptum-sync.v1") when
// creating a sync session. The server rejects unsupported versions with
// an UPGRADE_REQUIRED error. N-1 support is maintained for at least one
// release cycle.

use crate::error::{ErrorCode, RelayError};
use serde_json::json;

/// The current (latest) protocol version.
pub const CURRENT_VERSION: &str = "scriptum-sync.v1";

/// All protocol versions the server accepts, newest first.
/// When a new version is released, the previous version moves to index 1
/// (the N-1 slot) and the new version takes index 0.
const SUPPORTED_VERSIONS: &[&str] = &[
    CURRENT_VERSION,
    // N-1 compatibility window.
    "scriptum-sync.v0",
];

/// Returns true if the given protocol version string is supported.
pub fn is_supported(version: &str) -> bool {
    SUPPORTED_VERSIONS.contains(&version)
}

/// Returns the list of supported protocol versions (newest first).
pub fn supported_versions() -> &'static [&'static str] {
    SUPPORTED_VERSIONS
}

/// Validates a client-supplied protocol version. Returns `Ok(())` if
/// supported, or a `RelayError` with code `UPGRADE_REQUIRED` and
/// `details.supported_versions` if not.
pub fn require_supported(version: &str) -> Result<(), RelayError> {
    if is_supported(version) {
        Ok(())
    } else {
        Err(RelayError::new(
            ErrorCode::UpgradeRequired,
            format!("unsupported protocol version: {version}"),
        )
        .with_details(json!({
            "requested_version": version,
            "supported_versions": SUPPORTED_VERSIONS,
            "current_version": CURRENT_VERSION,
        })))
    }
}
