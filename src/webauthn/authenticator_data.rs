//! Authenticator data parsing
//!
//! Binary layout:
//! - 32 bytes: RP ID hash
//! - 1 byte: flags
//! - 4 bytes: signature counter (big-endian)
//! - if AT: 16 bytes AAGUID, 2 bytes credential id length L, L bytes credential
//!   id, then a CBOR-encoded COSE public key
//! - if ED: a CBOR extensions map

use std::io::Cursor;

use ciborium::value::Value;
use ring::digest;

use super::policy::RelyingPartyPolicy;
use crate::error::{ErrorKind, PasskeyError, Result};

const RP_ID_HASH_LEN: usize = 32;
const HEADER_LEN: usize = 37;
const AAGUID_LEN: usize = 16;
const MAX_CREDENTIAL_ID_LEN: usize = 1023;

/// Authenticator data flag bits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthenticatorFlags(u8);

impl AuthenticatorFlags {
    pub const USER_PRESENT: u8 = 0x01;
    pub const USER_VERIFIED: u8 = 0x04;
    pub const ATTESTED_CREDENTIAL_DATA: u8 = 0x40;
    pub const EXTENSION_DATA: u8 = 0x80;

    #[must_use]
    pub fn user_present(self) -> bool {
        self.0 & Self::USER_PRESENT != 0
    }

    #[must_use]
    pub fn user_verified(self) -> bool {
        self.0 & Self::USER_VERIFIED != 0
    }

    #[must_use]
    pub fn has_attested_credential_data(self) -> bool {
        self.0 & Self::ATTESTED_CREDENTIAL_DATA != 0
    }

    #[must_use]
    pub fn has_extension_data(self) -> bool {
        self.0 & Self::EXTENSION_DATA != 0
    }
}

/// Credential data embedded in registration authenticator data
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttestedCredentialData {
    pub aaguid: [u8; AAGUID_LEN],
    pub credential_id: Vec<u8>,
    /// COSE public key, byte-exact as emitted by the authenticator
    pub public_key: Vec<u8>,
}

/// Parsed authenticator data
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatorData {
    pub rp_id_hash: [u8; RP_ID_HASH_LEN],
    pub flags: AuthenticatorFlags,
    pub sign_count: u32,
    pub attested_credential: Option<AttestedCredentialData>,
}

impl AuthenticatorData {
    /// Parse authenticator data bytes
    ///
    /// # Errors
    /// Returns a validation error if the data is truncated, a declared section is
    /// malformed, or undeclared trailing bytes follow
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_LEN {
            return Err(PasskeyError::validation(format!(
                "Authenticator data too short: {} bytes",
                data.len()
            )));
        }

        let mut rp_id_hash = [0u8; RP_ID_HASH_LEN];
        rp_id_hash.copy_from_slice(&data[..RP_ID_HASH_LEN]);
        let flags = AuthenticatorFlags(data[32]);
        let sign_count = u32::from_be_bytes([data[33], data[34], data[35], data[36]]);

        let mut pos = HEADER_LEN;
        let attested_credential = if flags.has_attested_credential_data() {
            let (attested, consumed) = parse_attested_credential(&data[pos..])?;
            pos += consumed;
            Some(attested)
        } else {
            None
        };

        if flags.has_extension_data() {
            pos += cbor_item_len(&data[pos..], "extensions")?;
        }

        if pos != data.len() {
            return Err(PasskeyError::validation(format!(
                "Authenticator data has {} unexpected trailing bytes",
                data.len() - pos
            )));
        }

        Ok(Self {
            rp_id_hash,
            flags,
            sign_count,
            attested_credential,
        })
    }

    /// Check rpIdHash, user presence and user verification against policy
    ///
    /// # Errors
    /// Returns `PolicyViolation` describing the first failed check
    pub fn check_policy(&self, policy: &RelyingPartyPolicy) -> Result<()> {
        let expected = digest::digest(&digest::SHA256, policy.rp_id.as_bytes());
        if self.rp_id_hash.as_slice() != expected.as_ref() {
            return Err(PasskeyError::new(
                ErrorKind::PolicyViolation,
                format!("rpIdHash does not match SHA-256({})", policy.rp_id),
            ));
        }

        if !self.flags.user_present() {
            return Err(PasskeyError::new(
                ErrorKind::PolicyViolation,
                "User presence flag not set",
            ));
        }

        if policy.requires_user_verification() && !self.flags.user_verified() {
            return Err(PasskeyError::new(
                ErrorKind::PolicyViolation,
                "User verification required but not performed",
            ));
        }

        Ok(())
    }
}

fn parse_attested_credential(data: &[u8]) -> Result<(AttestedCredentialData, usize)> {
    if data.len() < AAGUID_LEN + 2 {
        return Err(PasskeyError::validation(
            "Authenticator data too short for attested credential data",
        ));
    }

    let mut aaguid = [0u8; AAGUID_LEN];
    aaguid.copy_from_slice(&data[..AAGUID_LEN]);
    let id_len = usize::from(u16::from_be_bytes([data[AAGUID_LEN], data[AAGUID_LEN + 1]]));
    let mut pos = AAGUID_LEN + 2;

    if id_len == 0 || id_len > MAX_CREDENTIAL_ID_LEN {
        return Err(PasskeyError::validation(format!(
            "Invalid credential ID length {id_len}"
        )));
    }
    if data.len() < pos + id_len {
        return Err(PasskeyError::validation(
            "Authenticator data too short for credential ID",
        ));
    }
    let credential_id = data[pos..pos + id_len].to_vec();
    pos += id_len;

    let key_len = cbor_item_len(&data[pos..], "credential public key")?;
    let public_key = data[pos..pos + key_len].to_vec();
    pos += key_len;

    Ok((
        AttestedCredentialData {
            aaguid,
            credential_id,
            public_key,
        },
        pos,
    ))
}

/// Length in bytes of the single CBOR map at the start of `data`
fn cbor_item_len(data: &[u8], what: &str) -> Result<usize> {
    if data.is_empty() {
        return Err(PasskeyError::validation(format!("Missing {what}")));
    }
    let mut cursor = Cursor::new(data);
    let value: Value = ciborium::de::from_reader(&mut cursor)
        .map_err(|e| PasskeyError::validation(format!("Invalid CBOR in {what}: {e}")))?;
    if !value.is_map() {
        return Err(PasskeyError::validation(format!("{what} is not a CBOR map")));
    }
    usize::try_from(cursor.position())
        .map_err(|_| PasskeyError::validation(format!("{what} length overflow")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::webauthn::policy::{AuthenticatorAttachment, UserVerificationRequirement};

    fn rp_hash(rp_id: &str) -> Vec<u8> {
        digest::digest(&digest::SHA256, rp_id.as_bytes())
            .as_ref()
            .to_vec()
    }

    fn cose_key() -> Vec<u8> {
        let map = Value::Map(vec![
            (Value::Integer(1.into()), Value::Integer(2.into())),
            (Value::Integer(3.into()), Value::Integer((-7).into())),
        ]);
        let mut buf = Vec::new();
        ciborium::into_writer(&map, &mut buf).unwrap();
        buf
    }

    fn policy(uv: UserVerificationRequirement) -> RelyingPartyPolicy {
        RelyingPartyPolicy::new("example.com", "Example", 1000, uv, AuthenticatorAttachment::None)
            .unwrap()
    }

    #[test]
    fn test_parse_assertion_data() {
        let mut data = rp_hash("example.com");
        data.push(0x05); // UP | UV
        data.extend_from_slice(&7u32.to_be_bytes());

        let parsed = AuthenticatorData::parse(&data).unwrap();
        assert_eq!(parsed.sign_count, 7);
        assert!(parsed.flags.user_present());
        assert!(parsed.flags.user_verified());
        assert!(parsed.attested_credential.is_none());
        assert!(parsed
            .check_policy(&policy(UserVerificationRequirement::Required))
            .is_ok());
    }

    #[test]
    fn test_parse_attested_credential() {
        let key = cose_key();
        let mut data = rp_hash("example.com");
        data.push(0x41); // UP | AT
        data.extend_from_slice(&0u32.to_be_bytes());
        data.extend_from_slice(&[9u8; 16]);
        data.extend_from_slice(&4u16.to_be_bytes());
        data.extend_from_slice(b"cred");
        data.extend_from_slice(&key);

        let parsed = AuthenticatorData::parse(&data).unwrap();
        let attested = parsed.attested_credential.unwrap();
        assert_eq!(attested.aaguid, [9u8; 16]);
        assert_eq!(attested.credential_id, b"cred");
        assert_eq!(attested.public_key, key);
    }

    #[test]
    fn test_truncated_and_trailing_rejected() {
        assert!(AuthenticatorData::parse(&[0u8; 36]).is_err());

        let mut data = rp_hash("example.com");
        data.push(0x01);
        data.extend_from_slice(&1u32.to_be_bytes());
        data.push(0xff);
        let err = AuthenticatorData::parse(&data).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        let mut data = rp_hash("example.com");
        data.push(0x41);
        data.extend_from_slice(&0u32.to_be_bytes());
        data.extend_from_slice(&[0u8; 16]);
        data.extend_from_slice(&40u16.to_be_bytes());
        data.extend_from_slice(b"short");
        assert!(AuthenticatorData::parse(&data).is_err());
    }

    #[test]
    fn test_policy_checks() {
        let mut data = rp_hash("other.com");
        data.push(0x01);
        data.extend_from_slice(&0u32.to_be_bytes());
        let parsed = AuthenticatorData::parse(&data).unwrap();
        let err = parsed
            .check_policy(&policy(UserVerificationRequirement::Preferred))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PolicyViolation);

        let mut data = rp_hash("example.com");
        data.push(0x00); // no UP
        data.extend_from_slice(&0u32.to_be_bytes());
        let parsed = AuthenticatorData::parse(&data).unwrap();
        assert!(parsed
            .check_policy(&policy(UserVerificationRequirement::Discouraged))
            .is_err());

        let mut data = rp_hash("example.com");
        data.push(0x01); // UP only
        data.extend_from_slice(&0u32.to_be_bytes());
        let parsed = AuthenticatorData::parse(&data).unwrap();
        assert!(parsed
            .check_policy(&policy(UserVerificationRequirement::Preferred))
            .is_ok());
        assert!(parsed
            .check_policy(&policy(UserVerificationRequirement::Required))
            .is_err());
    }
}
