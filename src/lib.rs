#![warn(clippy::pedantic)]
#![warn(clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

/// Version of the passgate application
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod error;
pub mod handlers;
pub mod passkey;
pub mod settings;
pub mod utils;
pub mod webauthn;

// Soft authenticator and fixtures for unit and integration tests
#[cfg(any(test, feature = "testing"))]
pub mod testing;

/// Re-export commonly used items
pub use error::{ErrorKind, PasskeyError};
pub use handlers::{configure, health, PasskeyState};
pub use passkey::{PasskeyResponse, PasskeyService, Principal, SessionContext};
pub use settings::PasskeydSettings;
pub use webauthn::RelyingPartyPolicy;
