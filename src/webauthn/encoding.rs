//! Base64URL boundary
//!
//! Binary WebAuthn fields travel base64url-encoded; everything past this module
//! works on raw bytes. Credential ids are compared only after passing through
//! [`decode`], never as strings.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;

use crate::error::{PasskeyError, Result};

/// Decode a base64url value, tolerating trailing `=` padding
///
/// # Errors
/// Returns a validation error naming `field` if the value is empty or not base64url
pub fn decode(field: &str, value: &str) -> Result<Vec<u8>> {
    let trimmed = value.trim().trim_end_matches('=');
    if trimmed.is_empty() {
        return Err(PasskeyError::validation(format!("{field} is empty")));
    }
    URL_SAFE_NO_PAD
        .decode(trimmed)
        .map_err(|e| PasskeyError::validation(format!("{field} is not valid base64url: {e}")))
}

/// Encode raw bytes as unpadded base64url
#[must_use]
pub fn encode(bytes: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Serde adapter storing `Vec<u8>` as base64url text
pub mod bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::encode(value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        super::decode("value", &text).map_err(serde::de::Error::custom)
    }
}

/// Serde adapter storing `Option<Vec<u8>>` as base64url text or null
pub mod optional_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    #[allow(clippy::ref_option)]
    pub fn serialize<S: Serializer>(
        value: &Option<Vec<u8>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(bytes) => serializer.serialize_some(&super::encode(bytes)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Vec<u8>>, D::Error> {
        match Option::<String>::deserialize(deserializer)? {
            Some(text) if !text.is_empty() => super::decode("value", &text)
                .map(Some)
                .map_err(serde::de::Error::custom),
            _ => Ok(None),
        }
    }
}
