//! `WebAuthn` wire types
//!
//! Ceremony options sent to the browser and the credential responses it
//! returns. Binary fields stay base64url text here and are decoded by the
//! ceremonies through [`super::encoding`].

use serde::{Deserialize, Serialize};

/// Options for `navigator.credentials.create()`
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct CreationOptions {
    pub challenge: String,
    pub rp: RelyingPartyEntity,
    pub user: UserEntity,
    #[serde(rename = "pubKeyCredParams")]
    pub pub_key_cred_params: Vec<PublicKeyCredentialParameters>,
    pub timeout: u64,
    pub attestation: String,
    #[serde(rename = "authenticatorSelection")]
    pub authenticator_selection: AuthenticatorSelectionCriteria,
    #[serde(rename = "excludeCredentials")]
    pub exclude_credentials: Vec<PublicKeyCredentialDescriptor>,
}

/// Options for `navigator.credentials.get()`
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct RequestOptions {
    pub challenge: String,
    pub timeout: u64,
    #[serde(rename = "rpId")]
    pub rp_id: String,
    #[serde(rename = "allowCredentials")]
    pub allow_credentials: Vec<PublicKeyCredentialDescriptor>,
    #[serde(rename = "userVerification")]
    pub user_verification: String,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct RelyingPartyEntity {
    pub id: String,
    pub name: String,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct UserEntity {
    /// Base64url user handle
    pub id: String,
    pub name: String,
    #[serde(rename = "displayName")]
    pub display_name: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct PublicKeyCredentialParameters {
    #[serde(rename = "type")]
    pub type_: String,
    pub alg: i64,
}

impl PublicKeyCredentialParameters {
    #[must_use]
    pub fn public_key(alg: i64) -> Self {
        Self {
            type_: "public-key".to_string(),
            alg,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct AuthenticatorSelectionCriteria {
    #[serde(
        rename = "authenticatorAttachment",
        skip_serializing_if = "Option::is_none",
        default
    )]
    pub authenticator_attachment: Option<String>,
    #[serde(rename = "residentKey")]
    pub resident_key: String,
    #[serde(rename = "userVerification")]
    pub user_verification: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct PublicKeyCredentialDescriptor {
    #[serde(rename = "type")]
    pub type_: String,
    /// Base64url credential id
    pub id: String,
}

impl PublicKeyCredentialDescriptor {
    #[must_use]
    pub fn public_key(id: String) -> Self {
        Self {
            type_: "public-key".to_string(),
            id,
        }
    }
}

/// `PublicKeyCredential` returned by `navigator.credentials.create()`
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct RegistrationResponse {
    pub id: String,
    #[serde(rename = "rawId")]
    pub raw_id: String,
    #[serde(rename = "type", default = "public_key_type")]
    pub type_: String,
    pub response: AttestationResponse,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct AttestationResponse {
    #[serde(rename = "attestationObject")]
    pub attestation_object: String,
    #[serde(rename = "clientDataJSON")]
    pub client_data_json: String,
}

/// `PublicKeyCredential` returned by `navigator.credentials.get()`
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct AuthenticationResponse {
    pub id: String,
    #[serde(rename = "rawId")]
    pub raw_id: String,
    #[serde(rename = "type", default = "public_key_type")]
    pub type_: String,
    pub response: AssertionResponse,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct AssertionResponse {
    #[serde(rename = "authenticatorData")]
    pub authenticator_data: String,
    #[serde(rename = "clientDataJSON")]
    pub client_data_json: String,
    pub signature: String,
    #[serde(rename = "userHandle", default, skip_serializing_if = "Option::is_none")]
    pub user_handle: Option<String>,
}

fn public_key_type() -> String {
    "public-key".to_string()
}
