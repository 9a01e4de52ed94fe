//! On-chain chat ledger.
//!
//! Chat records ride as JSON memos on minimal 1-lamport carrier
//! transactions, and state is rebuilt by scanning the wallet's signature
//! history and replaying every memo that parses. With a valid session key
//! the carrier pays from the session account to the wallet so the backend
//! can sign autonomously; without one, the unsigned wallet self-transfer
//! comes back base64-encoded for manual signing.

pub mod types;

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use solana_sdk::instruction::Instruction;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::system_instruction;
use solana_sdk::transaction::Transaction;
use tokio::task::JoinSet;
use tokio_retry::strategy::ExponentialBackoff;
use tokio_retry::Retry;
use tracing::{debug, instrument, warn};

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::rpc::SolanaRpc;
use crate::session::SessionKeyManager;
use crate::types::SigningOutcome;

pub use types::{
    encode_memo, materialize_chats, materialize_messages, parse_memo, ChatSummary, MemoRecord,
    StoredMessage,
};

const CARRIER_LAMPORTS: u64 = 1;

pub struct ChatLedger {
    rpc: Arc<dyn SolanaRpc>,
    sessions: Arc<SessionKeyManager>,
    memo_program: Pubkey,
    history_page_size: usize,
    confirm_timeout: Duration,
    retry_attempts: usize,
}

impl ChatLedger {
    pub fn new(
        config: &EngineConfig,
        rpc: Arc<dyn SolanaRpc>,
        sessions: Arc<SessionKeyManager>,
    ) -> Self {
        Self {
            rpc,
            sessions,
            memo_program: config.memo_program,
            history_page_size: config.history_page_size,
            confirm_timeout: config.confirm_timeout,
            retry_attempts: config.rpc_retry_attempts,
        }
    }

    /// Write one record to chain for `wallet_address`.
    #[instrument(skip(self, record), fields(wallet = %wallet_address))]
    pub async fn append(
        &self,
        wallet_address: &str,
        record: &MemoRecord,
    ) -> Result<SigningOutcome, EngineError> {
        let wallet = Pubkey::from_str(wallet_address)
            .map_err(|e| EngineError::Validation(format!("invalid wallet address: {}", e)))?;
        let memo = encode_memo(record)
            .map_err(|e| EngineError::Validation(format!("unencodable record: {}", e)))?;

        let blockhash = self.rpc.latest_blockhash().await?;

        if let Some(session) = self.sessions.get(wallet_address).await? {
            let session_pubkey = Pubkey::from_str(&session.public_key)
                .map_err(|e| EngineError::Key(format!("corrupt session public key: {}", e)))?;

            // The carrier pays from the session account to the wallet so
            // the record lands in the wallet's signature history.
            let instructions = vec![
                system_instruction::transfer(&session_pubkey, &wallet, CARRIER_LAMPORTS),
                self.memo_instruction(&memo),
            ];
            let mut transaction =
                Transaction::new_with_payer(&instructions, Some(&session_pubkey));
            self.sessions.sign(wallet_address, &mut transaction, blockhash).await?;

            let signature = tokio::time::timeout(
                self.confirm_timeout,
                self.rpc.send_and_confirm(&transaction),
            )
            .await
            .map_err(|_| EngineError::ConfirmationTimeout(self.confirm_timeout))??;

            debug!(%signature, "record appended with session key");
            return Ok(SigningOutcome::Signed(signature));
        }

        // No session key: unsigned self-transfer for the wallet to sign.
        let instructions = vec![
            system_instruction::transfer(&wallet, &wallet, CARRIER_LAMPORTS),
            self.memo_instruction(&memo),
        ];
        let mut transaction = Transaction::new_with_payer(&instructions, Some(&wallet));
        transaction.message.recent_blockhash = blockhash;
        let encoded = bincode::serialize(&transaction).map_err(|e| {
            EngineError::Transaction(format!("failed to serialize unsigned transaction: {}", e))
        })?;
        Ok(SigningOutcome::RequiresManualSignature(BASE64.encode(encoded)))
    }

    /// All chats for a wallet, newest first.
    #[instrument(skip(self))]
    pub async fn list_chats(&self, wallet_address: &str) -> Result<Vec<ChatSummary>, EngineError> {
        let records = self.scan(wallet_address).await?;
        Ok(materialize_chats(records))
    }

    /// One conversation's messages, oldest first.
    #[instrument(skip(self))]
    pub async fn list_messages(
        &self,
        wallet_address: &str,
        conversation_id: &str,
    ) -> Result<Vec<StoredMessage>, EngineError> {
        let records = self.scan(wallet_address).await?;
        Ok(materialize_messages(records, conversation_id))
    }

    /// Mark a chat deleted. Replay drops it from every future scan.
    pub async fn mark_deleted(
        &self,
        wallet_address: &str,
        chat_id: &str,
    ) -> Result<SigningOutcome, EngineError> {
        let record = MemoRecord::DeleteChat {
            chat_id: chat_id.to_string(),
            timestamp_ms: chrono::Utc::now().timestamp_millis() as u64,
        };
        self.append(wallet_address, &record).await
    }

    /// Scan the wallet's recent signature history and collect every record
    /// that parses. Per-transaction fetch failures are skipped so one bad
    /// RPC response cannot hide the rest of the history.
    async fn scan(&self, wallet_address: &str) -> Result<Vec<MemoRecord>, EngineError> {
        let wallet = Pubkey::from_str(wallet_address)
            .map_err(|e| EngineError::Validation(format!("invalid wallet address: {}", e)))?;

        let strategy = ExponentialBackoff::from_millis(100)
            .max_delay(Duration::from_secs(5))
            .take(self.retry_attempts);
        let signatures = Retry::spawn(strategy, || {
            self.rpc.signatures_for_address(&wallet, self.history_page_size)
        })
        .await?;

        let mut fetches = JoinSet::new();
        for entry in signatures {
            let rpc = Arc::clone(&self.rpc);
            fetches.spawn(async move { rpc.transaction_memos(&entry.signature).await });
        }

        let mut records = Vec::new();
        while let Some(joined) = fetches.join_next().await {
            let memos = match joined {
                Ok(Ok(memos)) => memos,
                Ok(Err(e)) => {
                    warn!("memo fetch failed, skipping transaction: {}", e);
                    continue;
                }
                Err(e) => {
                    warn!("memo fetch task failed: {}", e);
                    continue;
                }
            };
            records.extend(memos.iter().filter_map(|memo| parse_memo(memo)));
        }
        debug!("scan of {} produced {} records", wallet_address, records.len());
        Ok(records)
    }

    fn memo_instruction(&self, memo: &str) -> Instruction {
        Instruction {
            program_id: self.memo_program,
            accounts: Vec::new(),
            data: memo.as_bytes().to_vec(),
        }
    }
}
