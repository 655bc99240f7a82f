//! Registration ceremony
//!
//! Verifies an attestation response from `navigator.credentials.create()` and
//! persists the new credential.

use chrono::{DateTime, Utc};
use log::{debug, info, warn};

use super::challenge::{CeremonyType, ChallengeManager};
use super::session::Principal;
use super::store::{CredentialRecord, CredentialStore};
use crate::error::{PasskeyError, Result};
use crate::webauthn::attestation::{AttestationInput, AttestationObject, AttestationRegistry};
use crate::webauthn::{
    encoding, AuthenticatorData, ClientData, ClientDataType, CoseKey, RegistrationResponse,
    RelyingPartyPolicy,
};

const MAX_NAME_LEN: usize = 128;

pub struct RegistrationCeremony<'a> {
    pub policy: &'a RelyingPartyPolicy,
    pub challenges: &'a ChallengeManager,
    pub store: &'a CredentialStore,
    pub attestation: &'a AttestationRegistry,
}

impl RegistrationCeremony<'_> {
    /// Verify `response` for `principal` and store the resulting credential
    ///
    /// # Errors
    /// - `Validation` for malformed fields, an empty name, or a credential id
    ///   that disagrees with the attested one
    /// - `OriginMismatch` / `ChallengeInvalid` / `PolicyViolation` when the
    ///   response is not bound to this relying party and challenge
    /// - `UnsupportedAttestation` / `SignatureInvalid` from attestation checks
    /// - `Conflict` if the credential is already registered
    /// - `StorageUnavailable` if the store fails
    pub async fn run(
        &self,
        principal: &Principal,
        name: &str,
        response: &RegistrationResponse,
        now: DateTime<Utc>,
    ) -> Result<CredentialRecord> {
        let name = name.trim();
        if name.is_empty() {
            return Err(PasskeyError::validation("Credential name cannot be empty"));
        }
        if name.chars().count() > MAX_NAME_LEN {
            return Err(PasskeyError::validation("Credential name is too long"));
        }
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
        let client_data_json =
            encoding::decode("clientDataJSON", &response.response.client_data_json)?;
        let attestation_bytes =
            encoding::decode("attestationObject", &response.response.attestation_object)?;

        let client_data = ClientData::verify(&client_data_json, ClientDataType::Create, self.policy)?;

        self.challenges
            .consume(
                principal.as_str(),
                CeremonyType::Registration,
                &client_data.challenge,
            )
            .map_err(PasskeyError::into_challenge_invalid)?;
        debug!("Registration challenge consumed for {principal}");

        let attestation = AttestationObject::from_cbor(&attestation_bytes)?;
        let auth_data = AuthenticatorData::parse(&attestation.auth_data)?;
        auth_data.check_policy(self.policy)?;

        let attested = auth_data
            .attested_credential
            .as_ref()
            .ok_or_else(|| PasskeyError::validation("Attested credential data missing"))?;
        if attested.credential_id != raw_id {
            return Err(PasskeyError::validation(
                "Attested credential id does not match rawId",
            ));
        }

        let credential_key = CoseKey::from_cbor(&attested.public_key)?;

        self.attestation
            .verify(
                &attestation.fmt,
                &AttestationInput {
                    att_stmt: &attestation.att_stmt,
                    auth_data_raw: &attestation.auth_data,
                    credential_key: &credential_key,
                    client_data_hash: &client_data.hash,
                },
            )
            .inspect_err(|e| {
                warn!(
                    "Rejected {} attestation from {principal}: {e}",
                    attestation.fmt
                );
            })?;

        let user_handle = self.store.get_or_create_user_handle(principal).await?;

        let record = CredentialRecord {
            credential_id: raw_id,
            name: name.to_string(),
            public_key: attested.public_key.clone(),
            sign_count: auth_data.sign_count,
            user_handle: Some(user_handle),
            created: now,
            last_used: None,
            aaguid: Some(uuid::Uuid::from_bytes(attested.aaguid).to_string()),
            attestation_format: Some(attestation.fmt.clone()),
        };
        self.store.save(principal, record.clone()).await?;

        info!(
            "Registered {:?} credential {} for {principal}",
            credential_key.algorithm(),
            encoding::encode(&record.credential_id)
        );
        Ok(record)
    }
}
