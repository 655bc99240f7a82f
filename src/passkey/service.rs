//! Passkey façade
//!
//! Orchestrates the ceremonies for the HTTP layer and turns every outcome into
//! the uniform `{success, message, ...data}` response. Security failures are
//! logged with full detail and answered with a generic message.

use std::sync::Arc;

use chrono::Utc;
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use super::authentication::AuthenticationCeremony;
use super::challenge::{CeremonyType, ChallengeManager};
use super::registration::RegistrationCeremony;
use super::session::{Principal, SessionContext};
use super::store::{BlobStore, CredentialStore, CredentialSummary};
use crate::error::{ErrorKind, PasskeyError, Result};
use crate::webauthn::{
    encoding, AttestationRegistry, AuthenticationResponse, AuthenticatorSelectionCriteria,
    CoseAlgorithm, CreationOptions, PublicKeyCredentialDescriptor, PublicKeyCredentialParameters,
    RegistrationResponse, RelyingPartyEntity, RelyingPartyPolicy, RequestOptions, UserEntity,
};

pub const MSG_REGISTERED: &str = "Passkey registered successfully";
pub const MSG_AUTHENTICATED: &str = "Authentication successful";
pub const MSG_DELETED: &str = "Passkey deleted successfully";
pub const MSG_REGISTRATION_FAILED: &str = "Registration failed";
pub const MSG_AUTHENTICATION_FAILED: &str = "Authentication failed";
pub const MSG_DISABLED: &str = "Passkey support is not enabled";
pub const MSG_STORAGE: &str = "Passkey storage is unavailable";
pub const MSG_MISSING_CREDENTIAL: &str = "Missing credential data or name";
pub const MSG_INVALID_CREDENTIAL: &str = "Invalid credential data";
pub const MSG_INVALID_CREDENTIAL_STRUCTURE: &str = "Invalid credential structure";
pub const MSG_MISSING_ASSERTION: &str = "Missing assertion data";
pub const MSG_INVALID_ASSERTION: &str = "Invalid assertion data";
pub const MSG_INVALID_ASSERTION_STRUCTURE: &str = "Invalid assertion structure";
pub const MSG_MISSING_CREDENTIAL_ID: &str = "Missing credential ID";

/// Uniform response of every façade operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PasskeyResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(flatten)]
    pub data: Map<String, Value>,
    /// Failure classification, for choosing a transport status
    #[serde(skip)]
    pub error: Option<ErrorKind>,
}

impl PasskeyResponse {
    #[must_use]
    pub fn ok(message: &str) -> Self {
        Self {
            success: true,
            message: Some(message.to_string()),
            data: Map::new(),
            error: None,
        }
    }

    #[must_use]
    pub fn with_data(data: Map<String, Value>) -> Self {
        Self {
            success: true,
            message: None,
            data,
            error: None,
        }
    }

    #[must_use]
    pub fn failure(kind: ErrorKind, message: &str) -> Self {
        Self {
            success: false,
            message: Some(message.to_string()),
            data: Map::new(),
            error: Some(kind),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RegisterRequest {
    /// The `PublicKeyCredential` as an object or as JSON text
    #[serde(default)]
    pub credential_data: Option<Value>,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthenticateRequest {
    #[serde(default)]
    pub assertion_data: Option<Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeleteRequest {
    #[serde(default)]
    pub credential_id: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct ActivateRequest {
    #[serde(default)]
    pub activate: bool,
}

/// Deployment switches read from configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PasskeyToggles {
    pub enabled: bool,
    /// Activation state for principals that never chose one
    pub default_activation: bool,
    pub always_activated: bool,
}

impl Default for PasskeyToggles {
    fn default() -> Self {
        Self {
            enabled: true,
            default_activation: false,
            always_activated: false,
        }
    }
}

#[derive(Clone, Copy)]
enum Ceremony {
    Registration,
    Authentication,
    Management,
}

impl Ceremony {
    fn failure_message(self) -> &'static str {
        match self {
            Self::Registration => MSG_REGISTRATION_FAILED,
            Self::Authentication | Self::Management => MSG_AUTHENTICATION_FAILED,
        }
    }
}

pub struct PasskeyService {
    toggles: PasskeyToggles,
    policy: RelyingPartyPolicy,
    store: CredentialStore,
    challenges: ChallengeManager,
    attestation: AttestationRegistry,
}

impl PasskeyService {
    #[must_use]
    pub fn new(
        toggles: PasskeyToggles,
        policy: RelyingPartyPolicy,
        backend: Arc<dyn BlobStore>,
    ) -> Self {
        let challenges = ChallengeManager::new(policy.timeout_ms);
        Self {
            toggles,
            policy,
            store: CredentialStore::new(backend),
            challenges,
            attestation: AttestationRegistry::with_defaults(),
        }
    }

    /// Replace the attestation verifiers
    #[must_use]
    pub fn with_attestation(mut self, attestation: AttestationRegistry) -> Self {
        self.attestation = attestation;
        self
    }

    #[must_use]
    pub fn policy(&self) -> &RelyingPartyPolicy {
        &self.policy
    }

    #[must_use]
    pub fn store(&self) -> &CredentialStore {
        &self.store
    }

    #[must_use]
    pub fn challenges(&self) -> &ChallengeManager {
        &self.challenges
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.toggles.enabled
    }

    fn registration(&self) -> RegistrationCeremony<'_> {
        RegistrationCeremony {
            policy: &self.policy,
            challenges: &self.challenges,
            store: &self.store,
            attestation: &self.attestation,
        }
    }

    fn authentication(&self) -> AuthenticationCeremony<'_> {
        AuthenticationCeremony {
            policy: &self.policy,
            challenges: &self.challenges,
            store: &self.store,
        }
    }

    /// Register a new passkey for `principal`
    pub async fn register(&self, principal: &Principal, request: RegisterRequest) -> PasskeyResponse {
        if !self.toggles.enabled {
            return disabled();
        }
        let name = request.name.unwrap_or_default();
        let (Some(credential_data), false) = (request.credential_data, name.trim().is_empty())
        else {
            return PasskeyResponse::failure(ErrorKind::Validation, MSG_MISSING_CREDENTIAL);
        };
        let response: RegistrationResponse = match parse_payload(
            credential_data,
            MSG_INVALID_CREDENTIAL,
            MSG_INVALID_CREDENTIAL_STRUCTURE,
        ) {
            Ok(response) => response,
            Err(failure) => return failure,
        };

        match self
            .registration()
            .run(principal, &name, &response, Utc::now())
            .await
        {
            Ok(_) => PasskeyResponse::ok(MSG_REGISTERED),
            Err(e) => self.fail(Ceremony::Registration, principal.as_str(), &e),
        }
    }

    /// Verify an assertion and mark the session passkey-authenticated
    pub async fn authenticate(
        &self,
        session: &mut SessionContext,
        request: AuthenticateRequest,
    ) -> PasskeyResponse {
        if !self.toggles.enabled {
            return disabled();
        }
        let Some(assertion_data) = request.assertion_data else {
            return PasskeyResponse::failure(ErrorKind::Validation, MSG_MISSING_ASSERTION);
        };
        let response: AuthenticationResponse = match parse_payload(
            assertion_data,
            MSG_INVALID_ASSERTION,
            MSG_INVALID_ASSERTION_STRUCTURE,
        ) {
            Ok(response) => response,
            Err(failure) => return failure,
        };

        let now = Utc::now();
        match self.authentication().run(session, &response, now).await {
            Ok(outcome) => {
                session.mark_passkey_authenticated(outcome.principal, now);
                PasskeyResponse::ok(MSG_AUTHENTICATED)
            }
            Err(e) => {
                let subject = session.challenge_subject();
                self.fail(Ceremony::Authentication, &subject, &e)
            }
        }
    }

    /// Credential summaries for `principal`; never includes key material
    pub async fn list(&self, principal: &Principal) -> PasskeyResponse {
        if !self.toggles.enabled {
            return disabled();
        }
        match self.store.list_for_principal(principal).await {
            Ok(records) => {
                let passkeys: Vec<CredentialSummary> =
                    records.iter().map(CredentialSummary::from).collect();
                let mut data = Map::new();
                data.insert("passkeys".to_string(), json!(passkeys));
                PasskeyResponse::with_data(data)
            }
            Err(e) => self.fail(Ceremony::Management, principal.as_str(), &e),
        }
    }

    /// Delete a credential; unknown ids still report success
    pub async fn delete(&self, principal: &Principal, request: DeleteRequest) -> PasskeyResponse {
        if !self.toggles.enabled {
            return disabled();
        }
        let Some(credential_id) = request.credential_id.filter(|id| !id.trim().is_empty()) else {
            return PasskeyResponse::failure(ErrorKind::Validation, MSG_MISSING_CREDENTIAL_ID);
        };
        let credential_id = match encoding::decode("credential_id", &credential_id) {
            Ok(id) => id,
            Err(e) => return self.fail(Ceremony::Management, principal.as_str(), &e),
        };

        match self.store.remove(principal, &credential_id).await {
            Ok(_) => PasskeyResponse::ok(MSG_DELETED),
            Err(e) => self.fail(Ceremony::Management, principal.as_str(), &e),
        }
    }

    /// Switch passkey login on or off for `principal`
    pub async fn activate(&self, principal: &Principal, request: ActivateRequest) -> PasskeyResponse {
        if !self.toggles.enabled {
            return disabled();
        }
        match self.store.set_activation(principal, request.activate).await {
            Ok(()) => {
                info!(
                    "Passkey login {} for {principal}",
                    if request.activate { "activated" } else { "deactivated" }
                );
                let mut response = PasskeyResponse::ok(if request.activate {
                    "Passkey login activated"
                } else {
                    "Passkey login deactivated"
                });
                response.data.insert(
                    "activated".to_string(),
                    json!(request.activate || self.toggles.always_activated),
                );
                response
            }
            Err(e) => self.fail(Ceremony::Management, principal.as_str(), &e),
        }
    }

    /// Whether passkey login is active for `principal`
    ///
    /// # Errors
    /// Returns `StorageUnavailable` if the store fails
    pub async fn is_activated(&self, principal: &Principal) -> Result<bool> {
        if self.toggles.always_activated {
            return Ok(true);
        }
        Ok(self
            .store
            .activation(principal)
            .await?
            .unwrap_or(self.toggles.default_activation))
    }

    /// [`Self::is_activated`] as a uniform response
    pub async fn activation_status(&self, principal: &Principal) -> PasskeyResponse {
        if !self.toggles.enabled {
            return disabled();
        }
        match self.is_activated(principal).await {
            Ok(activated) => {
                let mut data = Map::new();
                data.insert("activated".to_string(), json!(activated));
                PasskeyResponse::with_data(data)
            }
            Err(e) => self.fail(Ceremony::Management, principal.as_str(), &e),
        }
    }

    /// Whether this session still has to complete a passkey login
    ///
    /// # Errors
    /// Returns `StorageUnavailable` if the store fails
    pub async fn requires_passkey_login(&self, session: &SessionContext) -> Result<bool> {
        let Some(principal) = &session.principal else {
            return Ok(false);
        };
        if !self.toggles.enabled || session.passkey_authenticated {
            return Ok(false);
        }
        Ok(self.is_activated(principal).await? && self.store.has_credentials(principal).await?)
    }

    /// Feature and login-gate state for the session
    pub async fn status(&self, session: &SessionContext) -> PasskeyResponse {
        let mut data = Map::new();
        data.insert("enabled".to_string(), json!(self.toggles.enabled));
        data.insert(
            "passkeyAuthenticated".to_string(),
            json!(session.passkey_authenticated),
        );

        if let (true, Some(principal)) = (self.toggles.enabled, &session.principal) {
            let state = async {
                Ok::<_, PasskeyError>((
                    self.is_activated(principal).await?,
                    self.store.has_credentials(principal).await?,
                    self.requires_passkey_login(session).await?,
                ))
            };
            match state.await {
                Ok((activated, has_credentials, required)) => {
                    data.insert("activated".to_string(), json!(activated));
                    data.insert("hasCredentials".to_string(), json!(has_credentials));
                    data.insert("requiresPasskeyLogin".to_string(), json!(required));
                }
                Err(e) => return self.fail(Ceremony::Management, principal.as_str(), &e),
            }
        }
        PasskeyResponse::with_data(data)
    }

    /// Issue a registration challenge and the matching creation options
    pub async fn registration_options(&self, principal: &Principal) -> PasskeyResponse {
        if !self.toggles.enabled {
            return disabled();
        }
        match self.build_creation_options(principal).await {
            Ok(options) => public_key_response(json!(options)),
            Err(e) => self.fail(Ceremony::Registration, principal.as_str(), &e),
        }
    }

    /// Issue an authentication challenge and the matching request options
    pub async fn authentication_options(&self, session: &SessionContext) -> PasskeyResponse {
        if !self.toggles.enabled {
            return disabled();
        }
        let subject = session.challenge_subject();
        match self.build_request_options(session).await {
            Ok(options) => public_key_response(json!(options)),
            Err(e) => self.fail(Ceremony::Authentication, &subject, &e),
        }
    }

    async fn build_creation_options(&self, principal: &Principal) -> Result<CreationOptions> {
        let user_handle = self.store.get_or_create_user_handle(principal).await?;
        let existing = self.store.list_for_principal(principal).await?;
        let challenge = self
            .challenges
            .issue(principal.as_str(), CeremonyType::Registration)?;
        debug!("Issued registration challenge for {principal}");

        Ok(CreationOptions {
            challenge: challenge.encoded(),
            rp: RelyingPartyEntity {
                id: self.policy.rp_id.clone(),
                name: self.policy.rp_name.clone(),
            },
            user: UserEntity {
                id: encoding::encode(&user_handle),
                name: principal.to_string(),
                display_name: principal.to_string(),
            },
            pub_key_cred_params: vec![
                PublicKeyCredentialParameters::public_key(CoseAlgorithm::Es256.id()),
                PublicKeyCredentialParameters::public_key(CoseAlgorithm::Rs256.id()),
            ],
            timeout: self.policy.timeout_ms,
            attestation: "none".to_string(),
            authenticator_selection: AuthenticatorSelectionCriteria {
                authenticator_attachment: self
                    .policy
                    .authenticator_attachment
                    .as_option_str()
                    .map(str::to_string),
                resident_key: "preferred".to_string(),
                user_verification: self.policy.user_verification.to_string(),
            },
            exclude_credentials: existing
                .iter()
                .map(|record| {
                    PublicKeyCredentialDescriptor::public_key(encoding::encode(
                        &record.credential_id,
                    ))
                })
                .collect(),
        })
    }

    async fn build_request_options(&self, session: &SessionContext) -> Result<RequestOptions> {
        let allow_credentials = match &session.principal {
            Some(principal) => self
                .store
                .list_for_principal(principal)
                .await?
                .iter()
                .map(|record| {
                    PublicKeyCredentialDescriptor::public_key(encoding::encode(
                        &record.credential_id,
                    ))
                })
                .collect(),
            None => Vec::new(),
        };
        let challenge = self
            .challenges
            .issue(&session.challenge_subject(), CeremonyType::Authentication)?;

        Ok(RequestOptions {
            challenge: challenge.encoded(),
            timeout: self.policy.timeout_ms,
            rp_id: self.policy.rp_id.clone(),
            allow_credentials,
            user_verification: self.policy.user_verification.to_string(),
        })
    }

    fn fail(&self, ceremony: Ceremony, subject: &str, err: &PasskeyError) -> PasskeyResponse {
        let kind = err.kind();
        if err.is_security_failure() {
            warn!("Passkey security failure for {subject}: {err}");
            return PasskeyResponse::failure(kind, ceremony.failure_message());
        }
        match kind {
            ErrorKind::StorageUnavailable => {
                error!("Passkey storage failure for {subject}: {err}");
                PasskeyResponse::failure(kind, MSG_STORAGE)
            }
            ErrorKind::Disabled => disabled(),
            _ => {
                debug!("Rejected passkey request from {subject}: {err}");
                PasskeyResponse::failure(kind, err.detail())
            }
        }
    }
}

fn disabled() -> PasskeyResponse {
    PasskeyResponse::failure(ErrorKind::Disabled, MSG_DISABLED)
}

fn public_key_response(options: Value) -> PasskeyResponse {
    let mut data = Map::new();
    data.insert("publicKey".to_string(), options);
    PasskeyResponse::with_data(data)
}

/// Accept a credential payload either as a JSON object or as JSON text
fn parse_payload<T: serde::de::DeserializeOwned>(
    payload: Value,
    invalid_message: &str,
    structure_message: &str,
) -> std::result::Result<T, PasskeyResponse> {
    let value = match payload {
        Value::String(text) => serde_json::from_str::<Value>(&text).map_err(|e| {
            debug!("Unparseable credential payload: {e}");
            PasskeyResponse::failure(ErrorKind::Validation, invalid_message)
        })?,
        other => other,
    };
    serde_json::from_value(value).map_err(|e| {
        debug!("Credential payload has wrong shape: {e}");
        PasskeyResponse::failure(ErrorKind::Validation, structure_message)
    })
}
