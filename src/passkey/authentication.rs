//! Authentication ceremony
//!
//! Verifies an assertion from `navigator.credentials.get()` against a stored
//! credential and advances its signature counter.

use chrono::{DateTime, Utc};
use log::{debug, info, warn};

use super::challenge::{CeremonyType, ChallengeManager};
use super::session::{Principal, SessionContext};
use super::store::CredentialStore;
use crate::error::{ErrorKind, PasskeyError, Result};
use crate::webauthn::{
    encoding, AuthenticationResponse, AuthenticatorData, ClientData, ClientDataType, CoseKey,
    RelyingPartyPolicy,
};

/// A verified assertion
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticationOutcome {
    pub principal: Principal,
    pub credential_id: Vec<u8>,
    pub sign_count: u32,
}

pub struct AuthenticationCeremony<'a> {
    pub policy: &'a RelyingPartyPolicy,
    pub challenges: &'a ChallengeManager,
    pub store: &'a CredentialStore,
}

impl AuthenticationCeremony<'_> {
    /// Verify `response` and record the credential use
    ///
    /// The principal comes from `session`; without one, the assertion's
    /// `userHandle` must resolve to a registered principal.
    ///
    /// # Errors
    /// - `Validation` for malformed fields or a missing principal and user handle
    /// - `NotFound` if the credential is unknown
    /// - `OriginMismatch` / `ChallengeInvalid` / `PolicyViolation` when the
    ///   assertion is not bound to this relying party and challenge
    /// - `SignatureInvalid` if the signature does not verify
    /// - `ReplayDetected` if the counter did not advance
    /// - `StorageUnavailable` if the store fails
    pub async fn run(
        &self,
        session: &SessionContext,
        response: &AuthenticationResponse,
        now: DateTime<Utc>,
    ) -> Result<AuthenticationOutcome> {
        if response.type_ != "public-key" {
            return Err(PasskeyError::validation(format!(
                "Unexpected credential type {:?}",
                response.type_
            )));
        }
        let raw_id = encoding::decode("rawId", &response.raw_id)?;
        if encoding::decode("id", &response.id)? != raw_id {
            return Err(PasskeyError::validation("id and rawId differ"));
        }
        let authenticator_data =
            encoding::decode("authenticatorData", &response.response.authenticator_data)?;
        let client_data_json =
            encoding::decode("clientDataJSON", &response.response.client_data_json)?;
        let signature = encoding::decode("signature", &response.response.signature)?;
        let user_handle = match response.response.user_handle.as_deref() {
            Some(text) if !text.is_empty() => Some(encoding::decode("userHandle", text)?),
            _ => None,
        };

        let principal = self.resolve_principal(session, user_handle.as_deref()).await?;

        let record = self
            .store
            .find_by_credential_id(&principal, &raw_id)
            .await?
            .ok_or_else(|| {
                PasskeyError::new(
                    ErrorKind::NotFound,
                    format!(
                        "Credential {} not registered for {principal}",
                        encoding::encode(&raw_id)
                    ),
                )
            })?;

        let client_data = ClientData::verify(&client_data_json, ClientDataType::Get, self.policy)?;

        self.challenges
            .consume(
                &session.challenge_subject(),
                CeremonyType::Authentication,
                &client_data.challenge,
            )
            .map_err(PasskeyError::into_challenge_invalid)?;
        debug!("Authentication challenge consumed for {principal}");

        let auth_data = AuthenticatorData::parse(&authenticator_data)?;
        auth_data.check_policy(self.policy)?;

        let mut signed = Vec::with_capacity(authenticator_data.len() + client_data.hash.len());
        signed.extend_from_slice(&authenticator_data);
        signed.extend_from_slice(&client_data.hash);
        CoseKey::from_cbor(&record.public_key)
            .map_err(|e| PasskeyError::storage(format!("Stored public key unusable: {e}")))?
            .verify(&signed, &signature)
            .inspect_err(|e| warn!("Assertion for {principal} rejected: {e}"))?;

        let stored = record.sign_count;
        let presented = auth_data.sign_count;
        if stored != 0 && presented <= stored {
            warn!(
                "Counter regression for credential {} of {principal}: presented {presented}, stored {stored}; possible cloned authenticator",
                encoding::encode(&raw_id)
            );
            return Err(PasskeyError::new(
                ErrorKind::ReplayDetected,
                format!("Counter {presented} does not exceed stored {stored}"),
            ));
        }
        if stored == 0 && presented == 0 {
            debug!(
                "Credential {} reports no signature counter",
                encoding::encode(&raw_id)
            );
        }

        if let (Some(presented), Some(expected)) = (&user_handle, &record.user_handle) {
            if presented != expected {
                return Err(PasskeyError::new(
                    ErrorKind::PolicyViolation,
                    "userHandle does not belong to this credential",
                ));
            }
        }

        self.store
            .update_counter_from(&principal, &raw_id, stored, presented, now)
            .await?;

        info!(
            "Authenticated {principal} with credential {}",
            encoding::encode(&raw_id)
        );
        Ok(AuthenticationOutcome {
            principal,
            credential_id: raw_id,
            sign_count: presented,
        })
    }

    async fn resolve_principal(
        &self,
        session: &SessionContext,
        user_handle: Option<&[u8]>,
    ) -> Result<Principal> {
        if let Some(principal) = &session.principal {
            return Ok(principal.clone());
        }
        let Some(user_handle) = user_handle else {
            return Err(PasskeyError::validation(
                "Assertion without a principal must carry a userHandle",
            ));
        };
        self.store
            .resolve_user_handle(user_handle)
            .await?
            .ok_or_else(|| PasskeyError::new(ErrorKind::NotFound, "Unknown userHandle"))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Duration;

    use super::*;
    use crate::passkey::registration::RegistrationCeremony;
    use crate::passkey::store::MemoryBlobStore;
    use crate::testing::{test_policy, SoftAuthenticator, TEST_ORIGIN};
    use crate::webauthn::AttestationRegistry;

    struct Fixture {
        policy: RelyingPartyPolicy,
        challenges: ChallengeManager,
        store: CredentialStore,
        authenticator: SoftAuthenticator,
    }

    impl Fixture {
        async fn registered() -> Self {
            let fixture = Self {
                policy: test_policy(),
                challenges: ChallengeManager::new(60_000),
                store: CredentialStore::new(Arc::new(MemoryBlobStore::new())),
                authenticator: SoftAuthenticator::es256(),
            };
            let challenge = fixture
                .challenges
                .issue("alice", CeremonyType::Registration)
                .unwrap();
            let response = fixture
                .authenticator
                .none_registration(&challenge.value, TEST_ORIGIN);
            RegistrationCeremony {
                policy: &fixture.policy,
                challenges: &fixture.challenges,
                store: &fixture.store,
                attestation: &AttestationRegistry::with_defaults(),
            }
            .run(&alice(), "Laptop", &response, Utc::now())
            .await
            .unwrap();
            fixture
        }

        fn ceremony(&self) -> AuthenticationCeremony<'_> {
            AuthenticationCeremony {
                policy: &self.policy,
                challenges: &self.challenges,
                store: &self.store,
            }
        }

        fn assertion(&self, session: &SessionContext, counter: u32) -> AuthenticationResponse {
            let challenge = self
                .challenges
                .issue(&session.challenge_subject(), CeremonyType::Authentication)
                .unwrap();
            self.authenticator
                .assertion(&challenge.value, TEST_ORIGIN, counter, None)
        }

        async fn stored_counter(&self) -> u32 {
            self.store
                .find_by_credential_id(&alice(), &self.authenticator.credential_id())
                .await
                .unwrap()
                .unwrap()
                .sign_count
        }
    }

    fn alice() -> Principal {
        Principal::new("alice").unwrap()
    }

    #[tokio::test]
    async fn test_counter_advances() {
        let fixture = Fixture::registered().await;
        let session = SessionContext::new(Some(alice()));

        let response = fixture.assertion(&session, 1);
        let outcome = fixture
            .ceremony()
            .run(&session, &response, Utc::now())
            .await
            .unwrap();
        assert_eq!(outcome.principal, alice());
        assert_eq!(fixture.stored_counter().await, 1);
    }

    #[tokio::test]
    async fn test_tampered_signature_rejected() {
        let fixture = Fixture::registered().await;
        let session = SessionContext::new(Some(alice()));
        let mut response = fixture.assertion(&session, 1);
        response.response.signature = fixture
            .authenticator
            .assertion(b"another challenge", TEST_ORIGIN, 1, None)
            .response
            .signature;

        let err = fixture
            .ceremony()
            .run(&session, &response, Utc::now())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SignatureInvalid);
        assert_eq!(fixture.stored_counter().await, 0);
    }

    #[tokio::test]
    async fn test_unknown_credential_is_not_found() {
        let fixture = Fixture::registered().await;
        let session = SessionContext::new(Some(alice()));
        let stranger = SoftAuthenticator::es256();
        let challenge = fixture
            .challenges
            .issue("alice", CeremonyType::Authentication)
            .unwrap();
        let response = stranger.assertion(&challenge.value, TEST_ORIGIN, 1, None);

        let err = fixture
            .ceremony()
            .run(&session, &response, Utc::now())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_discoverable_login_resolves_user_handle() {
        let fixture = Fixture::registered().await;
        let handle = fixture
            .store
            .user_handle(&alice())
            .await
            .unwrap()
            .unwrap();
        let session = SessionContext::new(None);
        let challenge = fixture
            .challenges
            .issue(&session.challenge_subject(), CeremonyType::Authentication)
            .unwrap();
        let response =
            fixture
                .authenticator
                .assertion(&challenge.value, TEST_ORIGIN, 4, Some(handle.as_slice()));

        let outcome = fixture
            .ceremony()
            .run(&session, &response, Utc::now())
            .await
            .unwrap();
        assert_eq!(outcome.principal, alice());
        assert_eq!(outcome.sign_count, 4);
    }

    #[tokio::test]
    async fn test_anonymous_without_user_handle_is_validation_error() {
        let fixture = Fixture::registered().await;
        let session = SessionContext::new(None);
        let response = fixture.assertion(&session, 1);
        let err = fixture
            .ceremony()
            .run(&session, &response, Utc::now())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[tokio::test]
    async fn test_expired_challenge() {
        let fixture = Fixture::registered().await;
        let session = SessionContext::new(Some(alice()));
        let issued = Utc::now() - Duration::milliseconds(60_001);
        let challenge = fixture
            .challenges
            .issue_at("alice", CeremonyType::Authentication, issued)
            .unwrap();
        let response = fixture
            .authenticator
            .assertion(&challenge.value, TEST_ORIGIN, 1, None);

        let err = fixture
            .ceremony()
            .run(&session, &response, Utc::now())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ChallengeInvalid);
        assert!(err.detail().contains("expired"));
    }
}
