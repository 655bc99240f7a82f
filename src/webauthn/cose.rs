//! COSE public keys and signature verification
//!
//! Supported algorithms:
//! - ES256 (-7): EC2 key on P-256, ASN.1/DER ECDSA signatures, verified with `ring`
//! - RS256 (-257): RSA key, PKCS#1 v1.5 with SHA-256, verified with `rsa`
//!
//! Keys are validated when decoded: the EC point must lie on P-256 and the RSA
//! key must be one `rsa` accepts (at most 4096 bits, sane exponent).

use ciborium::value::Value;
use p256::ecdsa::VerifyingKey as EcdsaVerifyingKey;
use p256::Sec1Point;
use ring::signature::{UnparsedPublicKey, ECDSA_P256_SHA256_ASN1};
use rsa::pkcs1v15::{Signature as RsaSignature, VerifyingKey};
use rsa::signature::Verifier;
use rsa::{BigUint, RsaPublicKey};
use sha2::Sha256;

use crate::error::{ErrorKind, PasskeyError, Result};

const LABEL_KTY: i128 = 1;
const LABEL_ALG: i128 = 3;
const LABEL_CRV_OR_N: i128 = -1;
const LABEL_X_OR_E: i128 = -2;
const LABEL_Y: i128 = -3;

const KTY_EC2: i128 = 2;
const KTY_RSA: i128 = 3;
const CRV_P256: i128 = 1;
const MIN_RSA_MODULUS_BYTES: usize = 256;

/// COSE algorithm identifiers accepted for credentials
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoseAlgorithm {
    Es256,
    Rs256,
}

impl CoseAlgorithm {
    #[must_use]
    pub fn id(self) -> i64 {
        match self {
            Self::Es256 => -7,
            Self::Rs256 => -257,
        }
    }

    /// Map a COSE `alg` value to a supported algorithm
    ///
    /// # Errors
    /// Returns `UnsupportedAttestation` for any other algorithm
    pub fn from_id(id: i128) -> Result<Self> {
        match id {
            -7 => Ok(Self::Es256),
            -257 => Ok(Self::Rs256),
            other => Err(PasskeyError::new(
                ErrorKind::UnsupportedAttestation,
                format!("Unsupported COSE algorithm {other}"),
            )),
        }
    }
}

/// A decoded and validated credential public key
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoseKey {
    /// Uncompressed SEC1 point: 0x04 || x || y
    Es256 { point: Vec<u8> },
    Rs256(RsaPublicKey),
}

impl CoseKey {
    /// Decode a COSE_Key CBOR map
    ///
    /// # Errors
    /// - `Validation` if the CBOR is malformed or required parameters are missing
    /// - `UnsupportedAttestation` if the key type, curve or algorithm is not supported
    pub fn from_cbor(bytes: &[u8]) -> Result<Self> {
        let value: Value = ciborium::de::from_reader(bytes)
            .map_err(|e| PasskeyError::validation(format!("Invalid COSE key: {e}")))?;
        let Value::Map(map) = value else {
            return Err(PasskeyError::validation("COSE key is not a map"));
        };

        let kty = int_param(&map, LABEL_KTY, "kty")?;
        let alg = CoseAlgorithm::from_id(int_param(&map, LABEL_ALG, "alg")?)?;

        match (kty, alg) {
            (KTY_EC2, CoseAlgorithm::Es256) => {
                let crv = int_param(&map, LABEL_CRV_OR_N, "crv")?;
                if crv != CRV_P256 {
                    return Err(PasskeyError::new(
                        ErrorKind::UnsupportedAttestation,
                        format!("Unsupported EC2 curve {crv}"),
                    ));
                }
                let x = coordinate(&map, LABEL_X_OR_E, "x")?;
                let y = coordinate(&map, LABEL_Y, "y")?;
                let encoded = Sec1Point::from_affine_coordinates(&x.into(), &y.into(), false);
                EcdsaVerifyingKey::from_sec1_point(&encoded).map_err(|e| {
                    PasskeyError::new(
                        ErrorKind::UnsupportedAttestation,
                        format!("EC2 key is not a P-256 point: {e}"),
                    )
                })?;
                Ok(Self::Es256 {
                    point: encoded.as_bytes().to_vec(),
                })
            }
            (KTY_RSA, CoseAlgorithm::Rs256) => {
                let n = bytes_param(&map, LABEL_CRV_OR_N, "n")?;
                let e = bytes_param(&map, LABEL_X_OR_E, "e")?;
                let significant = n.iter().skip_while(|&&b| b == 0).count();
                if significant < MIN_RSA_MODULUS_BYTES {
                    return Err(PasskeyError::new(
                        ErrorKind::UnsupportedAttestation,
                        format!("RSA modulus of {significant} bytes is too small"),
                    ));
                }
                let key = RsaPublicKey::new(BigUint::from_bytes_be(n), BigUint::from_bytes_be(e))
                    .map_err(|e| {
                        PasskeyError::new(
                            ErrorKind::UnsupportedAttestation,
                            format!("Unusable RSA public key: {e}"),
                        )
                    })?;
                Ok(Self::Rs256(key))
            }
            (kty, alg) => Err(PasskeyError::new(
                ErrorKind::UnsupportedAttestation,
                format!("Key type {kty} does not match algorithm {}", alg.id()),
            )),
        }
    }

    #[must_use]
    pub fn algorithm(&self) -> CoseAlgorithm {
        match self {
            Self::Es256 { .. } => CoseAlgorithm::Es256,
            Self::Rs256(_) => CoseAlgorithm::Rs256,
        }
    }

    /// Verify `signature` over `message` with this key
    ///
    /// # Errors
    /// Returns `SignatureInvalid` if the signature does not verify
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> Result<()> {
        match self {
            Self::Es256 { point } => UnparsedPublicKey::new(&ECDSA_P256_SHA256_ASN1, point)
                .verify(message, signature)
                .map_err(|_| {
                    PasskeyError::new(
                        ErrorKind::SignatureInvalid,
                        "ES256 signature verification failed",
                    )
                }),
            Self::Rs256(key) => {
                let signature = RsaSignature::try_from(signature).map_err(|e| {
                    PasskeyError::new(
                        ErrorKind::SignatureInvalid,
                        format!("Invalid RSA signature format: {e}"),
                    )
                })?;
                VerifyingKey::<Sha256>::new(key.clone())
                    .verify(message, &signature)
                    .map_err(|_| {
                        PasskeyError::new(
                            ErrorKind::SignatureInvalid,
                            "RS256 signature verification failed",
                        )
                    })
            }
        }
    }
}

fn param<'a>(map: &'a [(Value, Value)], label: i128) -> Option<&'a Value> {
    map.iter()
        .find(|(k, _)| k.as_integer().map(i128::from) == Some(label))
        .map(|(_, v)| v)
}

fn int_param(map: &[(Value, Value)], label: i128, name: &str) -> Result<i128> {
    param(map, label)
        .and_then(Value::as_integer)
        .map(i128::from)
        .ok_or_else(|| PasskeyError::validation(format!("Missing or invalid COSE {name}")))
}

fn bytes_param<'a>(map: &'a [(Value, Value)], label: i128, name: &str) -> Result<&'a [u8]> {
    param(map, label)
        .and_then(Value::as_bytes)
        .map(Vec::as_slice)
        .ok_or_else(|| PasskeyError::validation(format!("Missing or invalid COSE {name}")))
}

fn coordinate(map: &[(Value, Value)], label: i128, name: &str) -> Result<[u8; 32]> {
    let bytes = bytes_param(map, label, name)?;
    <[u8; 32]>::try_from(bytes).map_err(|_| {
        PasskeyError::validation(format!(
            "COSE {name} coordinate must be 32 bytes, got {}",
            bytes.len()
        ))
    })
}
