//! Relying-party policy
//!
//! Per-deployment configuration that every ceremony is checked against. It is
//! built once from settings and passed explicitly into each ceremony call.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{PasskeyError, Result};

/// User verification requirement ("required", "preferred", "discouraged")
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserVerificationRequirement {
    Required,
    Preferred,
    Discouraged,
}

impl UserVerificationRequirement {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Required => "required",
            Self::Preferred => "preferred",
            Self::Discouraged => "discouraged",
        }
    }
}

impl FromStr for UserVerificationRequirement {
    type Err = PasskeyError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "required" => Ok(Self::Required),
            "preferred" => Ok(Self::Preferred),
            "discouraged" => Ok(Self::Discouraged),
            other => Err(PasskeyError::validation(format!(
                "Unknown user verification requirement: {other}"
            ))),
        }
    }
}

impl fmt::Display for UserVerificationRequirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Authenticator attachment preference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthenticatorAttachment {
    #[serde(rename = "platform")]
    Platform,
    #[serde(rename = "cross-platform")]
    CrossPlatform,
    /// No preference; omitted from ceremony options
    #[serde(rename = "none")]
    None,
}

impl AuthenticatorAttachment {
    /// Value for `authenticatorSelection.authenticatorAttachment`, if any
    #[must_use]
    pub fn as_option_str(self) -> Option<&'static str> {
        match self {
            Self::Platform => Some("platform"),
            Self::CrossPlatform => Some("cross-platform"),
            Self::None => None,
        }
    }
}

impl FromStr for AuthenticatorAttachment {
    type Err = PasskeyError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "platform" => Ok(Self::Platform),
            "cross-platform" => Ok(Self::CrossPlatform),
            "" | "none" | "null" => Ok(Self::None),
            other => Err(PasskeyError::validation(format!(
                "Unknown authenticator attachment: {other}"
            ))),
        }
    }
}

/// Immutable relying-party configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelyingPartyPolicy {
    pub rp_id: String,
    pub rp_name: String,
    pub timeout_ms: u64,
    pub user_verification: UserVerificationRequirement,
    pub authenticator_attachment: AuthenticatorAttachment,
    /// Accept origins on subdomains of `rp_id` (registrable-domain suffix match)
    pub allow_subdomains: bool,
}

impl RelyingPartyPolicy {
    /// Build a policy, validating the relying-party id and timeout
    ///
    /// # Errors
    /// Returns a validation error if `rp_id` is empty or not a bare host name,
    /// or if `timeout_ms` is zero
    pub fn new(
        rp_id: &str,
        rp_name: &str,
        timeout_ms: u64,
        user_verification: UserVerificationRequirement,
        authenticator_attachment: AuthenticatorAttachment,
    ) -> Result<Self> {
        let rp_id = rp_id.trim().trim_end_matches('.').to_ascii_lowercase();
        if rp_id.is_empty() {
            return Err(PasskeyError::validation("Relying party ID cannot be empty"));
        }
        if rp_id.contains("://") || rp_id.contains('/') || rp_id.contains(':') {
            return Err(PasskeyError::validation(
                "Relying party ID must be a host name without scheme, port or path",
            ));
        }
        if timeout_ms == 0 {
            return Err(PasskeyError::validation("Ceremony timeout must be positive"));
        }

        Ok(Self {
            rp_id,
            rp_name: rp_name.to_string(),
            timeout_ms,
            user_verification,
            authenticator_attachment,
            allow_subdomains: true,
        })
    }

    #[must_use]
    pub fn with_subdomains(mut self, allow: bool) -> Self {
        self.allow_subdomains = allow;
        self
    }

    #[must_use]
    pub fn requires_user_verification(&self) -> bool {
        self.user_verification == UserVerificationRequirement::Required
    }

    /// Check whether an origin host is bound to this relying party
    #[must_use]
    pub fn host_matches(&self, host: &str) -> bool {
        let host = host.trim_end_matches('.').to_ascii_lowercase();
        if host == self.rp_id {
            return true;
        }
        self.allow_subdomains
            && host
                .strip_suffix(&self.rp_id)
                .is_some_and(|prefix| prefix.ends_with('.'))
    }
}
