//! convo-rewards - Reward-and-trust layer for an AI-chat product on Solana.
//!
//! This crate distributes CONVO token rewards with a configurable user/burn
//! split, gates payouts behind rate limiting and fraud heuristics, manages
//! short-lived delegated session keys, and persists chat records as memo
//! transactions on-chain.

pub mod config;
pub mod engine;
pub mod error;
pub mod ledger;
pub mod rpc;
pub mod security;
pub mod session;
pub mod types;

// Re-export the main entry points for convenience
pub use config::EngineConfig;
pub use engine::{RewardEngine, RewardRequest, RewardResult};
pub use error::EngineError;
pub use ledger::ChatLedger;
pub use security::FraudDetector;
pub use session::SessionKeyManager;
pub use types::SigningOutcome;
