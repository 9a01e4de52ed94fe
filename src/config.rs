//! Configuration for the reward-and-trust layer.
//!
//! Every protocol constant the components consume (token mint, burn sink,
//! memo program, commitment, endpoints) lives here rather than inline in the
//! business logic, so mainnet/devnet deployments and both deployed split
//! policies are expressible without code changes.

use std::collections::HashSet;
use std::str::FromStr;
use std::time::Duration;

use base64::Engine as _;
use serde::{Deserialize, Serialize};
use solana_sdk::commitment_config::CommitmentConfig;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Keypair;
use solana_sdk::signer::Signer;

use crate::error::EngineError;

/// CONVO mint on mainnet.
pub const CONVO_MINT: &str = "DHyRK8gue96rB8QxAg7d16ghDjxvRERJramcGCFNmoon";
/// System null address used as the burn sink.
pub const BURN_SINK: &str = "11111111111111111111111111111111";
/// SPL memo program id.
pub const MEMO_PROGRAM: &str = "MemoSq4gqABAXKb96qnH8TysNcWxMyWCqXgDLGmfcHr";

const MAINNET_RPC: &str = "https://api.mainnet-beta.solana.com";
const DEVNET_RPC: &str = "https://api.devnet.solana.com";

/// User/burn split in basis points (1 bps = 0.01%).
///
/// Two policies are deployed in production: the standard 90/10 split and the
/// low-burn 99.9/0.1 split. Floor rounding can leave a residual that is
/// neither paid nor burned; it stays in the treasury.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitPolicy {
    pub user_bps: u16,
    pub burn_bps: u16,
}

impl SplitPolicy {
    /// Build a policy, rejecting splits that would pay out more than 100%.
    pub fn new(user_bps: u16, burn_bps: u16) -> Result<Self, EngineError> {
        if user_bps as u32 + burn_bps as u32 > 10_000 {
            return Err(EngineError::Config(format!(
                "split exceeds 100%: user {} bps + burn {} bps",
                user_bps, burn_bps
            )));
        }
        Ok(Self { user_bps, burn_bps })
    }

    /// Standard policy: 90% to the user, 10% burned.
    pub fn standard() -> Self {
        Self { user_bps: 9_000, burn_bps: 1_000 }
    }

    /// Low-burn policy: 99.9% to the user, 0.1% burned.
    pub fn low_burn() -> Self {
        Self { user_bps: 9_990, burn_bps: 10 }
    }

    /// Floor split of `total` base units into (user, burn) amounts.
    pub fn split(&self, total: u64) -> (u64, u64) {
        let user = (total as u128 * self.user_bps as u128 / 10_000) as u64;
        let burn = (total as u128 * self.burn_bps as u128 / 10_000) as u64;
        (user, burn)
    }
}

/// The credential paying fees and funding rewards. A local keypair signs
/// automatically; an external payer yields unsigned transactions for the
/// wallet extension to complete.
pub enum TreasurySigner {
    Local(Keypair),
    External(Pubkey),
}

impl TreasurySigner {
    pub fn pubkey(&self) -> Pubkey {
        match self {
            TreasurySigner::Local(keypair) => keypair.pubkey(),
            TreasurySigner::External(pubkey) => *pubkey,
        }
    }
}

impl std::fmt::Debug for TreasurySigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TreasurySigner::Local(keypair) => {
                write!(f, "TreasurySigner::Local({})", keypair.pubkey())
            }
            TreasurySigner::External(pubkey) => {
                write!(f, "TreasurySigner::External({})", pubkey)
            }
        }
    }
}

/// Top-level configuration for all components.
#[derive(Debug)]
pub struct EngineConfig {
    /// Reward token mint
    pub token_mint: Pubkey,
    /// Token decimal places
    pub token_decimals: u8,
    /// Burn sink address
    pub burn_sink: Pubkey,
    /// Memo program id
    pub memo_program: Pubkey,
    /// RPC endpoint URL
    pub rpc_url: String,
    /// Network selector ("mainnet" or "devnet")
    pub network: String,
    /// Commitment level for submissions and reads
    pub commitment: CommitmentConfig,
    /// User/burn split policy
    pub split: SplitPolicy,
    /// Per-request payout ceiling in base units
    pub max_reward_amount: u64,
    /// Minimum conversation character count for a meaningful interaction
    pub min_conversation_length: usize,
    /// Minimum treasury lamport balance to cover fees
    pub min_fee_lamports: u64,
    /// Deadline for transaction confirmation
    pub confirm_timeout: Duration,
    /// Signature-history page size for ledger scans
    pub history_page_size: usize,
    /// Retry attempts for read-only RPC fetches
    pub rpc_retry_attempts: usize,
    /// Treasury signing credential
    pub treasury: TreasurySigner,
    /// Wallets barred from rewards
    pub blocked_wallets: HashSet<String>,
    /// 32-byte key encrypting session keys at rest
    pub session_encryption_key: [u8; 32],
}

impl EngineConfig {
    /// Load configuration from the environment.
    ///
    /// `TREASURY_PRIVATE_KEY` (JSON array of bytes) is required: the
    /// treasury must hold a real signing credential. Optional variables:
    /// `SOLANA_RPC_URL`, `SOLANA_NETWORK`, `BLOCKED_WALLET_ADDRESSES`
    /// (comma separated), `SESSION_ENCRYPTION_KEY` (base64, 32 bytes).
    pub fn from_env() -> Result<Self, EngineError> {
        let network = std::env::var("SOLANA_NETWORK").unwrap_or_else(|_| "mainnet".to_string());
        let rpc_url = std::env::var("SOLANA_RPC_URL").unwrap_or_else(|_| {
            if network == "devnet" { DEVNET_RPC } else { MAINNET_RPC }.to_string()
        });

        let raw_key = std::env::var("TREASURY_PRIVATE_KEY").map_err(|_| {
            EngineError::Config("TREASURY_PRIVATE_KEY environment variable is required".into())
        })?;
        let treasury = TreasurySigner::Local(parse_keypair_json(&raw_key)?);

        let blocked_wallets = std::env::var("BLOCKED_WALLET_ADDRESSES")
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();

        let session_encryption_key = match std::env::var("SESSION_ENCRYPTION_KEY") {
            Ok(encoded) => parse_session_key(&encoded)?,
            Err(_) => rand::random(),
        };

        Ok(Self {
            rpc_url,
            network,
            treasury,
            blocked_wallets,
            session_encryption_key,
            ..Self::unconfigured()
        })
    }

    /// Baseline mainnet constants with an external (non-signing) treasury.
    /// Tests and wallet-funded flows start from here.
    pub fn unconfigured() -> Self {
        Self {
            token_mint: Pubkey::from_str(CONVO_MINT).expect("static mint address"),
            token_decimals: 6,
            burn_sink: Pubkey::from_str(BURN_SINK).expect("static burn address"),
            memo_program: Pubkey::from_str(MEMO_PROGRAM).expect("static memo program"),
            rpc_url: MAINNET_RPC.to_string(),
            network: "mainnet".to_string(),
            commitment: CommitmentConfig::confirmed(),
            split: SplitPolicy::standard(),
            max_reward_amount: 1_000_000_000_000,
            min_conversation_length: 50,
            min_fee_lamports: 10_000_000, // 0.01 SOL
            confirm_timeout: Duration::from_secs(60),
            history_page_size: 100,
            rpc_retry_attempts: 3,
            treasury: TreasurySigner::External(Pubkey::default()),
            blocked_wallets: HashSet::new(),
            session_encryption_key: [0u8; 32],
        }
    }
}

fn parse_keypair_json(raw: &str) -> Result<Keypair, EngineError> {
    let bytes: Vec<u8> = serde_json::from_str(raw).map_err(|_| {
        EngineError::Config("invalid TREASURY_PRIVATE_KEY: expected JSON array of bytes".into())
    })?;
    Keypair::from_bytes(&bytes)
        .map_err(|e| EngineError::Config(format!("invalid treasury keypair: {}", e)))
}

fn parse_session_key(encoded: &str) -> Result<[u8; 32], EngineError> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .map_err(|_| EngineError::Config("SESSION_ENCRYPTION_KEY is not valid base64".into()))?;
    bytes.try_into().map_err(|_| {
        EngineError::Config("SESSION_ENCRYPTION_KEY must decode to exactly 32 bytes".into())
    })
}
