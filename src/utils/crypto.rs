// Cryptographic helpers: secure random and cookie sealing

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Key, Nonce,
};
use anyhow::{anyhow, Context, Result};
use base64::{engine::general_purpose, Engine as _};
use ring::digest;
use ring::rand::{SecureRandom, SystemRandom};
use serde::{de::DeserializeOwned, Serialize};

/// Nonce size for AES-256-GCM encryption (96 bits)
pub const NONCE_SIZE: usize = 12;

/// Encryption key size for AES-256 (256 bits)
pub const ENCRYPTION_KEY_SIZE: usize = 32;

/// Fill a buffer of `length` bytes from the system CSPRNG
///
/// # Errors
///
/// Returns an error if the system random source fails
pub fn random_bytes(length: usize) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; length];
    SystemRandom::new()
        .fill(&mut buf)
        .map_err(|_| anyhow!("System random source unavailable"))?;
    Ok(buf)
}

/// Generate a base64-encoded 256-bit secret suitable for `session_secret`
///
/// # Errors
///
/// Returns an error if the system random source fails
pub fn generate_secret() -> Result<String> {
    Ok(general_purpose::STANDARD.encode(random_bytes(ENCRYPTION_KEY_SIZE)?))
}

/// Encrypt serializable data using AES-256-GCM
///
/// The output is base64url(nonce || ciphertext).
///
/// # Errors
///
/// Returns an error if the key length is wrong, serialization fails or
/// encryption fails
pub fn encrypt_data<T: Serialize>(data: &T, key: &[u8]) -> Result<String> {
    if key.len() != ENCRYPTION_KEY_SIZE {
        return Err(anyhow!(
            "Invalid key length: expected {ENCRYPTION_KEY_SIZE} bytes, got {}",
            key.len()
        ));
    }

    let json_data = serde_json::to_vec(data).context("Failed to serialize data")?;

    let nonce_bytes = random_bytes(NONCE_SIZE)?;
    let nonce = Nonce::from_slice(&nonce_bytes);

    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let ciphertext = cipher
        .encrypt(nonce, json_data.as_slice())
        .map_err(|e| anyhow!("AES encryption failed: {e}"))?;

    let mut combined = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    combined.extend_from_slice(&nonce_bytes);
    combined.extend_from_slice(&ciphertext);

    Ok(general_purpose::URL_SAFE_NO_PAD.encode(&combined))
}

/// Decrypt data produced by [`encrypt_data`]
///
/// # Errors
///
/// Returns an error if the key length is wrong, the input is not base64url,
/// authentication fails or deserialization fails
pub fn decrypt_data<T: DeserializeOwned>(encrypted_data: &str, key: &[u8]) -> Result<T> {
    if key.len() != ENCRYPTION_KEY_SIZE {
        return Err(anyhow!(
            "Invalid key length: expected {ENCRYPTION_KEY_SIZE} bytes, got {}",
            key.len()
        ));
    }

    let combined = general_purpose::URL_SAFE_NO_PAD
        .decode(encrypted_data)
        .context("Failed to decode base64 data")?;

    if combined.len() < NONCE_SIZE {
        return Err(anyhow!("Invalid data length"));
    }

    let (nonce_bytes, ciphertext) = combined.split_at(NONCE_SIZE);
    let nonce = Nonce::from_slice(nonce_bytes);

    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let plaintext = cipher
        .decrypt(nonce, ciphertext)
        .map_err(|e| anyhow!("AES decryption failed: {e}"))?;

    serde_json::from_slice(&plaintext).context("Failed to deserialize data from decrypted JSON")
}

/// Derive a 32-byte AES key from arbitrary secret material (SHA-256)
#[must_use]
pub fn derive_encryption_key(secret: &[u8]) -> [u8; ENCRYPTION_KEY_SIZE] {
    let mut key = [0u8; ENCRYPTION_KEY_SIZE];
    key.copy_from_slice(digest::digest(&digest::SHA256, secret).as_ref());
    key
}
