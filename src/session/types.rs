//! Session key data model.

use nonempty::NonEmpty;
use serde::Serialize;

/// Request to issue a delegated signing key for a wallet. The fields must
/// match the authorization message the wallet signed; issuance rebuilds
/// the message from them and verifies the signature against that.
#[derive(Debug, Clone)]
pub struct SessionKeyRequest {
    pub wallet_address: String,
    /// Operations the key is allowed to sign for, e.g. "chat_storage"
    pub scope: NonEmpty<String>,
    /// Expiry named in the signed authorization message, unix ms
    pub expires_at_ms: u64,
}

/// A delegated signing keypair, scoped to one wallet. The secret is held
/// encrypted at rest and only decrypted for the duration of a signing call.
#[derive(Debug, Clone)]
pub struct SessionKey {
    /// Base58 public key of the session keypair
    pub public_key: String,
    /// Nonce-prefixed ChaCha20-Poly1305 ciphertext of the 64-byte keypair
    pub encrypted_secret: Vec<u8>,
    pub wallet_address: String,
    pub scope: NonEmpty<String>,
    pub created_at_ms: u64,
    pub expires_at_ms: u64,
    pub is_active: bool,
}

impl SessionKey {
    /// Whether the key may still sign at `now_ms`.
    pub fn is_valid(&self, now_ms: u64) -> bool {
        self.is_active && now_ms < self.expires_at_ms
    }
}

/// Display-oriented session summary for the product layer.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SessionInfo {
    pub has_session: bool,
    pub expires_at_ms: Option<u64>,
    pub scope: Option<Vec<String>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(expires_at_ms: u64, is_active: bool) -> SessionKey {
        SessionKey {
            public_key: "pk".to_string(),
            encrypted_secret: Vec::new(),
            wallet_address: "wallet".to_string(),
            scope: NonEmpty::new("chat_storage".to_string()),
            created_at_ms: 0,
            expires_at_ms,
            is_active,
        }
    }

    #[test]
    fn test_validity_window() {
        assert!(key(100, true).is_valid(99));
        assert!(!key(100, true).is_valid(100));
        assert!(!key(100, false).is_valid(50));
    }
}
