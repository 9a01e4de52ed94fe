//! Encryption at rest for session key material.
//!
//! ChaCha20-Poly1305 with a random 12-byte nonce prefixed to the
//! ciphertext. Decrypted secrets come back in a [`Zeroizing`] buffer so
//! they are scrubbed when the signing call drops them.

use chacha20poly1305::aead::Aead;
use chacha20poly1305::{ChaCha20Poly1305, Key, KeyInit, Nonce};
use zeroize::Zeroizing;

use crate::error::EngineError;

const NONCE_LEN: usize = 12;

/// Encrypt a secret under the store key. Output is `nonce || ciphertext`.
pub fn encrypt_secret(store_key: &[u8; 32], secret: &[u8]) -> Result<Vec<u8>, EngineError> {
    let cipher = ChaCha20Poly1305::new(Key::from_slice(store_key));
    let nonce_bytes: [u8; NONCE_LEN] = rand::random();
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, secret)
        .map_err(|_| EngineError::Key("session key encryption failed".to_string()))?;

    let mut blob = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    blob.extend_from_slice(&nonce_bytes);
    blob.extend_from_slice(&ciphertext);
    Ok(blob)
}

/// Decrypt a `nonce || ciphertext` blob produced by [`encrypt_secret`].
pub fn decrypt_secret(
    store_key: &[u8; 32],
    blob: &[u8],
) -> Result<Zeroizing<Vec<u8>>, EngineError> {
    if blob.len() <= NONCE_LEN {
        return Err(EngineError::Key("encrypted session key is truncated".to_string()));
    }
    let (nonce_bytes, ciphertext) = blob.split_at(NONCE_LEN);

    let cipher = ChaCha20Poly1305::new(Key::from_slice(store_key));
    let plaintext = cipher
        .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
        .map_err(|_| EngineError::Key("session key decryption failed".to_string()))?;
    Ok(Zeroizing::new(plaintext))
}
