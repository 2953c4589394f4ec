//! Encryption layer using ChaCha20-Poly1305 AEAD
//!
//! Symmetric encryption for branch head cells. A space shared through an
//! untrusted host can wrap every branch's cell so the host only ever sees
//! ciphertext; the key is shared between the participating peers out of band.

use crate::error::SyncError;
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Nonce,
};
use rand::RngCore;

/// Nonce size for ChaCha20-Poly1305 (12 bytes)
pub const NONCE_SIZE: usize = 12;

/// Authentication tag size appended to every ciphertext (16 bytes)
pub const TAG_SIZE: usize = 16;

/// Cipher for encrypted cells and spaces.
///
/// Wire format of every ciphertext: `[nonce (12 bytes)] + [ciphertext + tag]`.
/// A fresh random nonce is drawn per encryption, so equal plaintexts never
/// produce equal ciphertexts.
pub struct SpaceCrypto {
    cipher: ChaCha20Poly1305,
}

impl SpaceCrypto {
    /// Create a cipher from a 32-byte symmetric key.
    pub fn new(key: &[u8; 32]) -> Self {
        Self {
            cipher: ChaCha20Poly1305::new(key.into()),
        }
    }

    /// Generate a new random 32-byte key.
    pub fn generate_key() -> [u8; 32] {
        let mut key = [0u8; 32];
        rand::rng().fill_bytes(&mut key);
        key
    }

    /// Encrypt plaintext, prepending the random nonce.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, SyncError> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext)
            .map_err(|e| SyncError::Crypto(format!("Encryption failed: {}", e)))?;

        let mut result = nonce_bytes.to_vec();
        result.extend_from_slice(&ciphertext);
        Ok(result)
    }

    /// Decrypt a nonce-prepended ciphertext.
    ///
    /// Fails closed: wrong key, tampered bytes, or truncated input all
    /// return an error and never partial plaintext.
    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, SyncError> {
        if ciphertext.len() < NONCE_SIZE {
            return Err(SyncError::Crypto(
                "Data too short to contain nonce".to_string(),
            ));
        }

        let nonce = Nonce::from_slice(&ciphertext[..NONCE_SIZE]);
        let encrypted = &ciphertext[NONCE_SIZE..];

        self.cipher
            .decrypt(nonce, encrypted)
            .map_err(|e| SyncError::Crypto(format!("Decryption failed: {}", e)))
    }
}
