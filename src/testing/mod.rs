//! Test support for passgate
//!
//! - [`authenticator`] - A software authenticator producing real ES256 / RS256
//!   registration and assertion responses
//! - [`fixtures`] - Policies, credential records and failing backends
//!
//! Compiled for unit tests and, through the `testing` feature, for the
//! integration tests under `tests/`.

pub mod authenticator;
pub mod fixtures;

pub use authenticator::SoftAuthenticator;
pub use fixtures::{
    attestation_object_none, sample_record, test_policy, FailingBlobStore, TEST_ORIGIN,
    TEST_RP_ID,
};
