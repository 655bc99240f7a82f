//! Passkey error taxonomy
//!
//! Every ceremony, store and challenge operation fails with a [`PasskeyError`]
//! carrying an [`ErrorKind`]. The kind decides how the façade answers the
//! client; the detail string is for server-side logs only.

/// Classification of a passkey failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, thiserror::Error)]
pub enum ErrorKind {
    /// Malformed or missing request fields
    #[error("validation error")]
    Validation,
    /// Challenge could not be consumed (expired, mismatched or reused)
    #[error("challenge invalid")]
    ChallengeInvalid,
    #[error("challenge expired")]
    ChallengeExpired,
    #[error("challenge mismatch")]
    ChallengeMismatch,
    #[error("challenge already used")]
    ChallengeAlreadyUsed,
    /// Client data type or origin does not bind to this relying party
    #[error("origin mismatch")]
    OriginMismatch,
    /// Authenticator flags or rpIdHash violate the relying-party policy
    #[error("policy violation")]
    PolicyViolation,
    /// Signature counter regression, possible cloned authenticator
    #[error("replay detected")]
    ReplayDetected,
    #[error("signature invalid")]
    SignatureInvalid,
    #[error("unsupported attestation")]
    UnsupportedAttestation,
    #[error("not found")]
    NotFound,
    #[error("conflict")]
    Conflict,
    #[error("storage unavailable")]
    StorageUnavailable,
    /// Passkey support is switched off in configuration
    #[error("passkeys disabled")]
    Disabled,
}

/// Error returned by passkey operations
#[derive(Debug, Clone, thiserror::Error)]
#[error("{kind}: {detail}")]
pub struct PasskeyError {
    kind: ErrorKind,
    detail: String,
}

impl PasskeyError {
    pub fn new(kind: ErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }

    pub fn validation(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, detail)
    }

    pub fn storage(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::StorageUnavailable, detail)
    }

    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    #[must_use]
    pub fn detail(&self) -> &str {
        &self.detail
    }

    /// Failures whose detail must never reach the client
    #[must_use]
    pub fn is_security_failure(&self) -> bool {
        matches!(
            self.kind,
            ErrorKind::ChallengeInvalid
                | ErrorKind::ChallengeExpired
                | ErrorKind::ChallengeMismatch
                | ErrorKind::ChallengeAlreadyUsed
                | ErrorKind::OriginMismatch
                | ErrorKind::PolicyViolation
                | ErrorKind::ReplayDetected
                | ErrorKind::SignatureInvalid
                | ErrorKind::UnsupportedAttestation
                | ErrorKind::NotFound
                | ErrorKind::Conflict
        )
    }

    /// Wrap any challenge failure as `ChallengeInvalid`, keeping the cause in the detail
    #[must_use]
    pub fn into_challenge_invalid(self) -> Self {
        Self::new(
            ErrorKind::ChallengeInvalid,
            format!("{}: {}", self.kind, self.detail),
        )
    }
}

pub type Result<T, E = PasskeyError> = std::result::Result<T, E>;
