// Permission evaluation: document/vault access control for the relay.

pub mod oracle;

pub use oracle::{PermissionLevel, PermissionOracle, PermissionStore};
