//! AES-256-GCM artifact encryption
//!
//! The key is derived from the configuration's passphrase with Argon2id and
//! a random per-artifact salt. Envelope layout:
//!
//! ```text
//! "SVE1" | salt (16) | nonce (12) | ciphertext + tag
//! ```
//!
//! GCM authenticates the ciphertext, so a wrong passphrase or any tampering
//! fails decryption instead of yielding garbage plaintext.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use argon2::{Algorithm, Argon2, Params, Version};
use rand::rngs::OsRng;
use rand::RngCore;

use crate::{BackupError, Result};

const MAGIC: &[u8; 4] = b"SVE1";
const SALT_SIZE: usize = 16;
/// Size of the AES-GCM nonce in bytes (96 bits)
const NONCE_SIZE: usize = 12;
const HEADER_SIZE: usize = MAGIC.len() + SALT_SIZE + NONCE_SIZE;
/// Argon2id memory cost in KiB
const KDF_MEMORY_KIB: u32 = 16 * 1024;
const KDF_ITERATIONS: u32 = 2;

struct DerivedKey([u8; 32]);

impl Drop for DerivedKey {
    fn drop(&mut self) {
        self.0.iter_mut().for_each(|b| *b = 0);
    }
}

fn derive_key(passphrase: &str, salt: &[u8]) -> Result<DerivedKey> {
    let params = Params::new(KDF_MEMORY_KIB, KDF_ITERATIONS, 1, Some(32))
        .map_err(|e| BackupError::Pipeline(format!("Invalid key derivation parameters: {}", e)))?;
    let mut key = DerivedKey([0u8; 32]);
    Argon2::new(Algorithm::Argon2id, Version::V0x13, params)
        .hash_password_into(passphrase.as_bytes(), salt, &mut key.0)
        .map_err(|e| BackupError::Pipeline(format!("Key derivation failed: {}", e)))?;
    Ok(key)
}

pub fn encrypt(plaintext: &[u8], passphrase: &str) -> Result<Vec<u8>> {
    let mut salt = [0u8; SALT_SIZE];
    let mut nonce_bytes = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut salt);
    OsRng.fill_bytes(&mut nonce_bytes);

    let key = derive_key(passphrase, &salt)?;
    let cipher = Aes256Gcm::new_from_slice(&key.0)
        .map_err(|e| BackupError::Pipeline(format!("Failed to create cipher: {}", e)))?;
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce_bytes), plaintext)
        .map_err(|e| BackupError::Pipeline(format!("Encryption failed: {}", e)))?;

    let mut envelope = Vec::with_capacity(HEADER_SIZE + ciphertext.len());
    envelope.extend_from_slice(MAGIC);
    envelope.extend_from_slice(&salt);
    envelope.extend_from_slice(&nonce_bytes);
    envelope.extend_from_slice(&ciphertext);
    Ok(envelope)
}

pub fn decrypt(envelope: &[u8], passphrase: &str) -> Result<Vec<u8>> {
    if envelope.len() < HEADER_SIZE || &envelope[..MAGIC.len()] != MAGIC {
        return Err(BackupError::Decryption(
            "artifact is not an encrypted envelope".to_string(),
        ));
    }

    let salt = &envelope[MAGIC.len()..MAGIC.len() + SALT_SIZE];
    let nonce = &envelope[MAGIC.len() + SALT_SIZE..HEADER_SIZE];
    let ciphertext = &envelope[HEADER_SIZE..];

    let key = derive_key(passphrase, salt).map_err(|e| BackupError::Decryption(e.to_string()))?;
    let cipher = Aes256Gcm::new_from_slice(&key.0)
        .map_err(|e| BackupError::Decryption(format!("Failed to create cipher: {}", e)))?;

    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| BackupError::Decryption("invalid key or corrupted data".to_string()))
}
