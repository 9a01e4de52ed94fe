//! Reward distribution request/result types.

use solana_sdk::pubkey::Pubkey;

use crate::error::EngineError;
use crate::types::SigningOutcome;

/// One reward payout to perform.
#[derive(Debug, Clone)]
pub struct RewardRequest {
    pub user_id: String,
    pub user_wallet: Pubkey,
    /// Total amount in base units, before the user/burn split
    pub total_amount: u64,
    pub conversation_id: String,
    /// Character length of the qualifying conversation
    pub conversation_length: usize,
    pub timestamp_ms: u64,
}

/// Structured outcome of a distribution attempt. Expected business
/// failures land here rather than as raised errors; `logs` is the
/// chronological audit trail of every step taken.
#[derive(Debug, Clone)]
pub struct RewardResult {
    pub success: bool,
    pub user_amount: u64,
    pub burn_amount: u64,
    pub outcome: Option<SigningOutcome>,
    pub user_token_account: Option<Pubkey>,
    pub error: Option<EngineError>,
    pub logs: Vec<String>,
}

impl RewardResult {
    pub(crate) fn failure(error: EngineError, logs: Vec<String>) -> Self {
        Self {
            success: false,
            user_amount: 0,
            burn_amount: 0,
            outcome: None,
            user_token_account: None,
            error: Some(error),
            logs,
        }
    }
}
