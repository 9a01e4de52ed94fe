//! Issuance, validation, and use of delegated session keys.
//!
//! A session key lets the backend sign routine transactions (chat memos)
//! without prompting the user's wallet each time. Issuance requires a real
//! ed25519 signature from the owning wallet over the authorization message
//! this module constructs; possession of a message string alone is not
//! authorization.

use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use moka::future::Cache;
use nonempty::NonEmpty;
use solana_sdk::hash::Hash;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::{Keypair, Signature};
use solana_sdk::signer::Signer;
use solana_sdk::transaction::Transaction;
use std::str::FromStr;
use tracing::{info, instrument, warn};

use crate::error::EngineError;
use crate::session::crypto::{decrypt_secret, encrypt_secret};
use crate::session::store::SessionKeyStore;
use crate::session::types::{SessionInfo, SessionKey, SessionKeyRequest};

const CACHE_CAPACITY: u64 = 1_024;

pub struct SessionKeyManager {
    store: Arc<dyn SessionKeyStore>,
    cache: Cache<String, SessionKey>,
    encryption_key: [u8; 32],
}

impl SessionKeyManager {
    pub fn new(store: Arc<dyn SessionKeyStore>, encryption_key: [u8; 32]) -> Self {
        Self {
            store,
            cache: Cache::new(CACHE_CAPACITY),
            encryption_key,
        }
    }

    /// The exact text a wallet must sign to authorize a session key.
    pub fn authorization_message(
        wallet_address: &str,
        scope: &NonEmpty<String>,
        expires_at_ms: u64,
    ) -> String {
        let expires = DateTime::<Utc>::from_timestamp_millis(expires_at_ms as i64)
            .unwrap_or_else(Utc::now)
            .to_rfc3339_opts(SecondsFormat::Millis, true);
        let scope_list = scope.iter().cloned().collect::<Vec<_>>().join(", ");
        format!(
            "I authorize ConvoAI to create a session key for my wallet {} \
             with the following permissions:\n\n\
             Scope: {}\n\
             Expires: {}\n\
             Purpose: Automatic transaction signing for chat storage\n\n\
             This session key will allow ConvoAI to sign transactions on my \
             behalf for the specified scope until the expiration date. I can \
             revoke this authorization at any time.",
            wallet_address, scope_list, expires
        )
    }

    /// Issue a session key for a wallet. `wallet_signature` must be the
    /// wallet's ed25519 signature over exactly the authorization message
    /// this manager constructs for the request's wallet, scope, and
    /// expiry; a signature over any other text does not authorize
    /// anything. A new key supersedes any previous key for the same
    /// wallet.
    #[instrument(skip_all, fields(wallet = %request.wallet_address))]
    pub async fn issue(
        &self,
        request: SessionKeyRequest,
        wallet_signature: &Signature,
    ) -> Result<SessionKey, EngineError> {
        let wallet = Pubkey::from_str(&request.wallet_address).map_err(|e| {
            EngineError::Validation(format!("invalid wallet address: {}", e))
        })?;
        let now_ms = Utc::now().timestamp_millis() as u64;
        if request.expires_at_ms <= now_ms {
            return Err(EngineError::Validation(
                "session expiry must be in the future".to_string(),
            ));
        }

        // Rebuild the message from the request rather than trusting a
        // caller-supplied string: the signature must cover the wallet,
        // scope, and expiry actually being granted.
        let message = Self::authorization_message(
            &request.wallet_address,
            &request.scope,
            request.expires_at_ms,
        );
        if !wallet_signature.verify(wallet.as_ref(), message.as_bytes()) {
            return Err(EngineError::Key(
                "authorization signature does not cover this request".to_string(),
            ));
        }

        let session_keypair = Keypair::new();
        let encrypted_secret =
            encrypt_secret(&self.encryption_key, &session_keypair.to_bytes())?;

        let key = SessionKey {
            public_key: session_keypair.pubkey().to_string(),
            encrypted_secret,
            wallet_address: request.wallet_address.clone(),
            scope: request.scope,
            created_at_ms: now_ms,
            expires_at_ms: request.expires_at_ms,
            is_active: true,
        };

        self.store
            .save(&key)
            .await
            .map_err(|e| EngineError::Key(format!("failed to store session key: {:#}", e)))?;
        self.cache.insert(key.wallet_address.clone(), key.clone()).await;

        info!(
            session_pubkey = %key.public_key,
            expires_at_ms = key.expires_at_ms,
            "session key issued"
        );
        Ok(key)
    }

    /// The valid session key for a wallet, or `None`. An expired or
    /// deactivated key found along the way is revoked on the spot.
    pub async fn get(&self, wallet_address: &str) -> Result<Option<SessionKey>, EngineError> {
        let key = match self.cache.get(&wallet_address.to_string()).await {
            Some(key) => Some(key),
            None => self
                .store
                .load(wallet_address)
                .await
                .map_err(|e| EngineError::Key(format!("session store failed: {:#}", e)))?,
        };

        let Some(key) = key else { return Ok(None) };
        let now_ms = Utc::now().timestamp_millis() as u64;
        if key.is_valid(now_ms) {
            self.cache.insert(wallet_address.to_string(), key.clone()).await;
            Ok(Some(key))
        } else {
            self.revoke(wallet_address).await?;
            Ok(None)
        }
    }

    pub async fn has_valid(&self, wallet_address: &str) -> Result<bool, EngineError> {
        Ok(self.get(wallet_address).await?.is_some())
    }

    /// Sign `transaction` with the wallet's session key. The decrypted
    /// keypair lives only for the duration of this call.
    #[instrument(skip(self, transaction, blockhash))]
    pub async fn sign(
        &self,
        wallet_address: &str,
        transaction: &mut Transaction,
        blockhash: Hash,
    ) -> Result<(), EngineError> {
        let key = self
            .get(wallet_address)
            .await?
            .ok_or_else(|| EngineError::Key("no valid session key found".to_string()))?;

        let secret = decrypt_secret(&self.encryption_key, &key.encrypted_secret)?;
        let keypair = Keypair::from_bytes(&secret)
            .map_err(|e| EngineError::Key(format!("stored session key is corrupt: {}", e)))?;

        transaction
            .try_partial_sign(&[&keypair], blockhash)
            .map_err(|e| EngineError::Key(format!("session key cannot sign: {}", e)))?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn revoke(&self, wallet_address: &str) -> Result<(), EngineError> {
        self.store
            .delete(wallet_address)
            .await
            .map_err(|e| EngineError::Key(format!("failed to revoke session key: {:#}", e)))?;
        self.cache.invalidate(&wallet_address.to_string()).await;
        info!("session key revoked for wallet {}", wallet_address);
        Ok(())
    }

    /// Remove every expired or deactivated key. Returns the number removed.
    pub async fn sweep(&self) -> Result<usize, EngineError> {
        let keys = self
            .store
            .list()
            .await
            .map_err(|e| EngineError::Key(format!("session store failed: {:#}", e)))?;

        let now_ms = Utc::now().timestamp_millis() as u64;
        let mut removed = 0;
        for key in keys {
            if !key.is_valid(now_ms) {
                if let Err(e) = self.revoke(&key.wallet_address).await {
                    warn!("sweep failed to revoke {}: {}", key.wallet_address, e);
                    continue;
                }
                removed += 1;
            }
        }
        if removed > 0 {
            info!("session sweep removed {} keys", removed);
        }
        Ok(removed)
    }

    /// Display summary for the product layer.
    pub async fn session_info(&self, wallet_address: &str) -> Result<SessionInfo, EngineError> {
        Ok(match self.get(wallet_address).await? {
            Some(key) => SessionInfo {
                has_session: true,
                expires_at_ms: Some(key.expires_at_ms),
                scope: Some(key.scope.iter().cloned().collect()),
            },
            None => SessionInfo::default(),
        })
    }
}
