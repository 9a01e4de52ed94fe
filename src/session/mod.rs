//! Short-lived delegated signing keys.

pub mod crypto;
pub mod manager;
pub mod store;
pub mod types;

pub use manager::SessionKeyManager;
pub use store::{MemorySessionKeyStore, SessionKeyStore, SqliteSessionKeyStore};
pub use types::{SessionInfo, SessionKey, SessionKeyRequest};
