//! Shared test fixtures

use async_trait::async_trait;
use chrono::DateTime;

use super::authenticator::{attestation_object, SoftAuthenticator};
use crate::error::{PasskeyError, Result};
use crate::passkey::{BlobStore, CredentialRecord};
use crate::webauthn::{AuthenticatorAttachment, RelyingPartyPolicy, UserVerificationRequirement};

pub const TEST_RP_ID: &str = "localhost";
pub const TEST_ORIGIN: &str = "http://localhost:8080";

/// Policy for `localhost` with a one minute ceremony timeout
///
/// # Panics
///
/// Never; the constants form a valid policy
#[must_use]
pub fn test_policy() -> RelyingPartyPolicy {
    RelyingPartyPolicy::new(
        TEST_RP_ID,
        "Passgate Test",
        60_000,
        UserVerificationRequirement::Preferred,
        AuthenticatorAttachment::None,
    )
    .expect("valid test policy")
}

/// A stored ES256 credential named "Laptop"
///
/// # Panics
///
/// Never; the fixed timestamp is in range
#[must_use]
pub fn sample_record(credential_id: &[u8], sign_count: u32) -> CredentialRecord {
    CredentialRecord {
        credential_id: credential_id.to_vec(),
        name: "Laptop".to_string(),
        public_key: SoftAuthenticator::es256().cose_public_key(),
        sign_count,
        user_handle: None,
        created: DateTime::from_timestamp(1_700_000_000, 0).expect("valid timestamp"),
        last_used: None,
        aaguid: None,
        attestation_format: Some("none".to_string()),
    }
}

/// CBOR attestation object with format `none` around `auth_data`
#[must_use]
pub fn attestation_object_none(auth_data: &[u8]) -> Vec<u8> {
    attestation_object("none", Vec::new(), auth_data.to_vec())
}

/// Backend that fails every operation
pub struct FailingBlobStore;

#[async_trait]
impl BlobStore for FailingBlobStore {
    async fn get(&self, _namespace: &str, _key: &str) -> Result<Option<String>> {
        Err(PasskeyError::storage("backend offline"))
    }

    async fn put(&self, _namespace: &str, _key: &str, _value: &str) -> Result<()> {
        Err(PasskeyError::storage("backend offline"))
    }

    async fn delete(&self, _namespace: &str, _key: &str) -> Result<()> {
        Err(PasskeyError::storage("backend offline"))
    }
}
