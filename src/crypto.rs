//! Secrets-at-rest encryption for stored refresh tokens.
//!
//! AES-256-GCM with a fresh random 96-bit nonce per call. Envelopes are
//! `<nonce_hex>:<ciphertext_and_tag_hex>` so they survive being stored in a
//! TEXT column and round-trip exactly.

use aes_gcm::{
    aead::{Aead, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use rand::RngCore;
use thiserror::Error;

const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;

#[derive(Debug, Error)]
pub enum CipherError {
    /// Envelope did not split into exactly two non-empty hex segments,
    /// or the nonce segment is not 12 bytes.
    #[error("malformed ciphertext envelope")]
    Format,

    /// Authentication tag check failed: tampered data or wrong key.
    #[error("ciphertext integrity check failed")]
    Integrity,

    #[error("encryption failed")]
    Encrypt,
}

#[derive(Clone)]
pub struct Cipher {
    key: [u8; KEY_LEN],
}

impl Cipher {
    /// Parse the master key from its 64-char hex form. Missing or
    /// wrong-length keys abort startup before any traffic is accepted.
    pub fn from_hex(master_key_hex: &str) -> anyhow::Result<Self> {
        if master_key_hex.len() != KEY_LEN * 2 {
            anyhow::bail!(
                "master key must be {} hex chars ({} bytes), got {} chars",
                KEY_LEN * 2,
                KEY_LEN,
                master_key_hex.len()
            );
        }
        let bytes = hex::decode(master_key_hex)?;
        let mut key = [0u8; KEY_LEN];
        key.copy_from_slice(&bytes);
        Ok(Self { key })
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<String, CipherError> {
        let cipher = Aes256Gcm::new_from_slice(&self.key).map_err(|_| CipherError::Encrypt)?;
        let nonce_bytes = generate_nonce();
        let nonce = Nonce::from_slice(&nonce_bytes);
        let ciphertext = cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|_| CipherError::Encrypt)?;

        Ok(format!(
            "{}:{}",
            hex::encode(nonce_bytes),
            hex::encode(ciphertext)
        ))
    }

    pub fn decrypt(&self, envelope: &str) -> Result<String, CipherError> {
        let (nonce_hex, ct_hex) = envelope.split_once(':').ok_or(CipherError::Format)?;
        if nonce_hex.is_empty() || ct_hex.is_empty() || ct_hex.contains(':') {
            return Err(CipherError::Format);
        }

        let nonce_bytes = hex::decode(nonce_hex).map_err(|_| CipherError::Format)?;
        if nonce_bytes.len() != NONCE_LEN {
            return Err(CipherError::Format);
        }
        let ciphertext = hex::decode(ct_hex).map_err(|_| CipherError::Format)?;

        let cipher = Aes256Gcm::new_from_slice(&self.key).map_err(|_| CipherError::Integrity)?;
        let plaintext = cipher
            .decrypt(Nonce::from_slice(&nonce_bytes), ciphertext.as_ref())
            .map_err(|_| CipherError::Integrity)?;

        String::from_utf8(plaintext).map_err(|_| CipherError::Integrity)
    }
}

fn generate_nonce() -> [u8; NONCE_LEN] {
    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);
    nonce
}
