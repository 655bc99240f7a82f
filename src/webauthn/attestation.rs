//! Attestation object decoding and statement verification
//!
//! Attestation formats are pluggable through [`AttestationVerifier`]. The
//! default registry accepts `none` and `packed` self-attestation; certificate
//! chains (`x5c`) and every other format are rejected as unsupported.

use std::collections::HashMap;

use ciborium::value::Value;

use super::cose::{CoseAlgorithm, CoseKey};
use crate::error::{ErrorKind, PasskeyError, Result};

/// Decoded `attestationObject`
#[derive(Debug, Clone)]
pub struct AttestationObject {
    pub fmt: String,
    /// Raw authenticator data, kept byte-exact for signature checks
    pub auth_data: Vec<u8>,
    pub att_stmt: Vec<(Value, Value)>,
}

impl AttestationObject {
    /// Decode the CBOR attestation object
    ///
    /// # Errors
    /// Returns a validation error if the CBOR is malformed or `fmt`, `authData`
    /// or `attStmt` are missing
    pub fn from_cbor(bytes: &[u8]) -> Result<Self> {
        let value: Value = ciborium::de::from_reader(bytes)
            .map_err(|e| PasskeyError::validation(format!("Invalid attestation object: {e}")))?;
        let Value::Map(entries) = value else {
            return Err(PasskeyError::validation("Attestation object is not a map"));
        };

        let mut fmt = None;
        let mut auth_data = None;
        let mut att_stmt = None;
        for (key, value) in entries {
            match (key.as_text(), value) {
                (Some("fmt"), Value::Text(text)) => fmt = Some(text),
                (Some("authData"), Value::Bytes(bytes)) => auth_data = Some(bytes),
                (Some("attStmt"), Value::Map(map)) => att_stmt = Some(map),
                _ => {}
            }
        }

        Ok(Self {
            fmt: fmt.ok_or_else(|| PasskeyError::validation("Attestation object missing fmt"))?,
            auth_data: auth_data
                .ok_or_else(|| PasskeyError::validation("Attestation object missing authData"))?,
            att_stmt: att_stmt
                .ok_or_else(|| PasskeyError::validation("Attestation object missing attStmt"))?,
        })
    }
}

/// Everything a format verifier may inspect
pub struct AttestationInput<'a> {
    pub att_stmt: &'a [(Value, Value)],
    pub auth_data_raw: &'a [u8],
    pub credential_key: &'a CoseKey,
    pub client_data_hash: &'a [u8; 32],
}

/// Verifies one attestation statement format
pub trait AttestationVerifier: Send + Sync {
    /// The `fmt` identifier this verifier handles
    fn format(&self) -> &'static str;

    /// Verify the attestation statement
    ///
    /// # Errors
    /// Returns `UnsupportedAttestation` or `SignatureInvalid` when the statement
    /// is not acceptable
    fn verify(&self, input: &AttestationInput<'_>) -> Result<()>;
}

/// `none`: no statement, nothing to check beyond an empty map
pub struct NoneAttestation;

impl AttestationVerifier for NoneAttestation {
    fn format(&self) -> &'static str {
        "none"
    }

    fn verify(&self, input: &AttestationInput<'_>) -> Result<()> {
        if input.att_stmt.is_empty() {
            Ok(())
        } else {
            Err(PasskeyError::new(
                ErrorKind::UnsupportedAttestation,
                "Attestation format none carries a non-empty statement",
            ))
        }
    }
}

/// `packed` self-attestation: signed with the credential key itself
pub struct PackedSelfAttestation;

impl AttestationVerifier for PackedSelfAttestation {
    fn format(&self) -> &'static str {
        "packed"
    }

    fn verify(&self, input: &AttestationInput<'_>) -> Result<()> {
        let mut alg = None;
        let mut sig = None;
        for (key, value) in input.att_stmt {
            match key.as_text() {
                Some("alg") => alg = value.as_integer().map(i128::from),
                Some("sig") => sig = value.as_bytes(),
                Some("x5c" | "ecdaaKeyId") => {
                    return Err(PasskeyError::new(
                        ErrorKind::UnsupportedAttestation,
                        "Packed attestation with a certificate chain is not supported",
                    ));
                }
                _ => {}
            }
        }

        let alg = alg.ok_or_else(|| {
            PasskeyError::new(ErrorKind::UnsupportedAttestation, "Packed attestation missing alg")
        })?;
        let sig = sig.ok_or_else(|| {
            PasskeyError::new(ErrorKind::UnsupportedAttestation, "Packed attestation missing sig")
        })?;

        if CoseAlgorithm::from_id(alg)? != input.credential_key.algorithm() {
            return Err(PasskeyError::new(
                ErrorKind::UnsupportedAttestation,
                format!("Packed attestation alg {alg} does not match the credential key"),
            ));
        }

        let mut signed = Vec::with_capacity(input.auth_data_raw.len() + 32);
        signed.extend_from_slice(input.auth_data_raw);
        signed.extend_from_slice(input.client_data_hash);
        input.credential_key.verify(&signed, sig)
    }
}

/// Attestation verifiers keyed by format identifier
pub struct AttestationRegistry {
    verifiers: HashMap<&'static str, Box<dyn AttestationVerifier>>,
}

impl AttestationRegistry {
    /// An empty registry that rejects every format
    #[must_use]
    pub fn empty() -> Self {
        Self {
            verifiers: HashMap::new(),
        }
    }

    /// Registry accepting `none` and `packed` self-attestation
    #[must_use]
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        registry.register(Box::new(NoneAttestation));
        registry.register(Box::new(PackedSelfAttestation));
        registry
    }

    /// Add or replace the verifier for its format
    pub fn register(&mut self, verifier: Box<dyn AttestationVerifier>) {
        self.verifiers.insert(verifier.format(), verifier);
    }

    /// Dispatch to the verifier for `fmt`
    ///
    /// # Errors
    /// Returns `UnsupportedAttestation` for unknown formats, otherwise whatever
    /// the format verifier reports
    pub fn verify(&self, fmt: &str, input: &AttestationInput<'_>) -> Result<()> {
        let verifier = self.verifiers.get(fmt).ok_or_else(|| {
            PasskeyError::new(
                ErrorKind::UnsupportedAttestation,
                format!("Unsupported attestation format {fmt:?}"),
            )
        })?;
        verifier.verify(input)
    }
}

impl Default for AttestationRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}
