//! `WebAuthn` protocol engine
//!
//! Parsing and verification of the data structures exchanged during passkey
//! ceremonies. Nothing here holds application state; callers pass a
//! [`RelyingPartyPolicy`] into every check.

pub mod attestation;
pub mod authenticator_data;
pub mod client_data;
pub mod cose;
pub mod encoding;
pub mod policy;
pub mod types;

pub use attestation::{AttestationObject, AttestationRegistry, AttestationVerifier};
pub use authenticator_data::{AttestedCredentialData, AuthenticatorData, AuthenticatorFlags};
pub use client_data::{ClientData, ClientDataType};
pub use cose::{CoseAlgorithm, CoseKey};
pub use policy::{AuthenticatorAttachment, RelyingPartyPolicy, UserVerificationRequirement};
pub use types::*;
