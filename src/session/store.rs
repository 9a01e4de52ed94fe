//! Persistence for session keys.
//!
//! One row per wallet; a new issuance replaces the previous key. Scope
//! lists are stored as JSON text and rebuilt into `NonEmpty` on load.

use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use nonempty::NonEmpty;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{FromRow, Pool, Sqlite};
use tracing::info;

use crate::session::types::SessionKey;

/// Contract for session-key persistence.
#[async_trait]
pub trait SessionKeyStore: Send + Sync {
    /// The key for `wallet_address`, if one is stored.
    async fn load(&self, wallet_address: &str) -> Result<Option<SessionKey>>;

    /// Insert or replace the key for its wallet.
    async fn save(&self, key: &SessionKey) -> Result<()>;

    /// Remove the key for `wallet_address`. Removing an absent key is not
    /// an error.
    async fn delete(&self, wallet_address: &str) -> Result<()>;

    /// All stored keys, for the expiry sweep.
    async fn list(&self) -> Result<Vec<SessionKey>>;
}

/// In-memory store for tests and demos.
#[derive(Default)]
pub struct MemorySessionKeyStore {
    keys: Mutex<HashMap<String, SessionKey>>,
}

impl MemorySessionKeyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionKeyStore for MemorySessionKeyStore {
    async fn load(&self, wallet_address: &str) -> Result<Option<SessionKey>> {
        Ok(self.keys.lock().expect("key map poisoned").get(wallet_address).cloned())
    }

    async fn save(&self, key: &SessionKey) -> Result<()> {
        self.keys
            .lock()
            .expect("key map poisoned")
            .insert(key.wallet_address.clone(), key.clone());
        Ok(())
    }

    async fn delete(&self, wallet_address: &str) -> Result<()> {
        self.keys.lock().expect("key map poisoned").remove(wallet_address);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<SessionKey>> {
        Ok(self.keys.lock().expect("key map poisoned").values().cloned().collect())
    }
}

#[derive(FromRow)]
struct SessionKeyRow {
    wallet_address: String,
    public_key: String,
    encrypted_secret: Vec<u8>,
    scope: String,
    created_at_ms: i64,
    expires_at_ms: i64,
    is_active: bool,
}

impl SessionKeyRow {
    fn into_key(self) -> Result<SessionKey> {
        let scope: Vec<String> =
            serde_json::from_str(&self.scope).context("Malformed scope list in store")?;
        let Some(scope) = NonEmpty::from_vec(scope) else {
            bail!("empty scope list in store for wallet {}", self.wallet_address);
        };
        Ok(SessionKey {
            public_key: self.public_key,
            encrypted_secret: self.encrypted_secret,
            wallet_address: self.wallet_address,
            scope,
            created_at_ms: self.created_at_ms as u64,
            expires_at_ms: self.expires_at_ms as u64,
            is_active: self.is_active,
        })
    }
}

/// SQLite-backed store.
pub struct SqliteSessionKeyStore {
    pool: Pool<Sqlite>,
}

impl SqliteSessionKeyStore {
    pub async fn connect(db_path: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&format!("sqlite:{}?mode=rwc", db_path))
            .await
            .context("Failed to connect to session key database")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS session_keys (
                wallet_address TEXT PRIMARY KEY,
                public_key TEXT NOT NULL,
                encrypted_secret BLOB NOT NULL,
                scope TEXT NOT NULL,
                created_at_ms INTEGER NOT NULL,
                expires_at_ms INTEGER NOT NULL,
                is_active BOOLEAN NOT NULL
            );
            "#,
        )
        .execute(&pool)
        .await
        .context("Failed to create session_keys table")?;

        info!("SqliteSessionKeyStore connected to {}", db_path);
        Ok(Self { pool })
    }
}

#[async_trait]
impl SessionKeyStore for SqliteSessionKeyStore {
    async fn load(&self, wallet_address: &str) -> Result<Option<SessionKey>> {
        let row: Option<SessionKeyRow> =
            sqlx::query_as("SELECT * FROM session_keys WHERE wallet_address = ?")
                .bind(wallet_address)
                .fetch_optional(&self.pool)
                .await
                .context("Failed to load session key")?;
        row.map(SessionKeyRow::into_key).transpose()
    }

    async fn save(&self, key: &SessionKey) -> Result<()> {
        let scope: Vec<&String> = key.scope.iter().collect();
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO session_keys (
                wallet_address, public_key, encrypted_secret, scope,
                created_at_ms, expires_at_ms, is_active
            ) VALUES (?, ?, ?, ?, ?, ?, ?);
            "#,
        )
        .bind(&key.wallet_address)
        .bind(&key.public_key)
        .bind(&key.encrypted_secret)
        .bind(serde_json::to_string(&scope).context("Failed to encode scope list")?)
        .bind(key.created_at_ms as i64)
        .bind(key.expires_at_ms as i64)
        .bind(key.is_active)
        .execute(&self.pool)
        .await
        .context("Failed to save session key")?;
        Ok(())
    }

    async fn delete(&self, wallet_address: &str) -> Result<()> {
        sqlx::query("DELETE FROM session_keys WHERE wallet_address = ?")
            .bind(wallet_address)
            .execute(&self.pool)
            .await
            .context("Failed to delete session key")?;
        Ok(())
    }

    async fn list(&self) -> Result<Vec<SessionKey>> {
        let rows: Vec<SessionKeyRow> = sqlx::query_as("SELECT * FROM session_keys")
            .fetch_all(&self.pool)
            .await
            .context("Failed to list session keys")?;
        rows.into_iter().map(SessionKeyRow::into_key).collect()
    }
}
