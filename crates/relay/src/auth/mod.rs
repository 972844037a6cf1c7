pub mod verifier;

pub use verifier::{AuthVerifier, Identity};
