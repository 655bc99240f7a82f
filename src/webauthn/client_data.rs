//! Client data JSON processing
//!
//! Parses `clientDataJSON` and binds it to the relying party: ceremony type,
//! origin host against `rp_id`, and the challenge the browser signed over.

use ring::digest;
use serde::Deserialize;
use url::Url;

use super::encoding;
use super::policy::RelyingPartyPolicy;
use crate::error::{ErrorKind, PasskeyError, Result};

/// Ceremony type recorded by the browser in client data
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientDataType {
    Create,
    Get,
}

impl ClientDataType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Create => "webauthn.create",
            Self::Get => "webauthn.get",
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawClientData {
    #[serde(rename = "type")]
    type_: String,
    challenge: String,
    origin: String,
    #[serde(rename = "crossOrigin", default)]
    cross_origin: bool,
}

/// Verified client data
#[derive(Debug, Clone)]
pub struct ClientData {
    /// Raw challenge bytes the authenticator signed over
    pub challenge: Vec<u8>,
    pub origin: String,
    /// SHA-256 of the exact `clientDataJSON` bytes
    pub hash: [u8; 32],
}

impl ClientData {
    /// Parse client data and check type and origin binding
    ///
    /// # Errors
    /// - `Validation` if the JSON is malformed or fields are missing
    /// - `OriginMismatch` if the type, origin scheme or origin host is wrong
    pub fn verify(
        client_data_json: &[u8],
        expected_type: ClientDataType,
        policy: &RelyingPartyPolicy,
    ) -> Result<Self> {
        let raw: RawClientData = serde_json::from_slice(client_data_json)
            .map_err(|e| PasskeyError::validation(format!("Invalid client data JSON: {e}")))?;

        if raw.type_ != expected_type.as_str() {
            return Err(PasskeyError::new(
                ErrorKind::OriginMismatch,
                format!(
                    "Invalid client data type {:?}, expected {}",
                    raw.type_,
                    expected_type.as_str()
                ),
            ));
        }

        if raw.cross_origin {
            return Err(PasskeyError::new(
                ErrorKind::OriginMismatch,
                "Cross-origin ceremonies are not accepted",
            ));
        }

        verify_origin(&raw.origin, policy)?;

        let challenge = encoding::decode("clientData.challenge", &raw.challenge)?;

        let mut hash = [0u8; 32];
        hash.copy_from_slice(digest::digest(&digest::SHA256, client_data_json).as_ref());

        Ok(Self {
            challenge,
            origin: raw.origin,
            hash,
        })
    }
}

/// Check that an origin is https (http only for localhost) and its host belongs to `rp_id`
fn verify_origin(origin: &str, policy: &RelyingPartyPolicy) -> Result<()> {
    let url = Url::parse(origin).map_err(|e| {
        PasskeyError::new(
            ErrorKind::OriginMismatch,
            format!("Unparseable origin {origin:?}: {e}"),
        )
    })?;

    let Some(host) = url.host_str() else {
        return Err(PasskeyError::new(
            ErrorKind::OriginMismatch,
            format!("Origin {origin:?} has no host"),
        ));
    };

    let scheme_ok = match url.scheme() {
        "https" => true,
        "http" => host == "localhost",
        _ => false,
    };
    if !scheme_ok {
        return Err(PasskeyError::new(
            ErrorKind::OriginMismatch,
            format!("Origin {origin:?} must use https"),
        ));
    }

    if !policy.host_matches(host) {
        return Err(PasskeyError::new(
            ErrorKind::OriginMismatch,
            format!("Origin host {host} does not match rp_id {}", policy.rp_id),
        ));
    }

    Ok(())
}
