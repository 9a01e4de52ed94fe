//! Shared test fixtures: an in-memory `SolanaRpc` double and conversation
//! builders.
#![allow(dead_code)] // not every test binary uses every fixture

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use convo_rewards::error::EngineError;
use convo_rewards::rpc::{SignatureRecord, SolanaRpc, TransactionStatusInfo};
use convo_rewards::types::{ChatMessage, ConversationPayload};
use solana_sdk::hash::Hash;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Signature;
use solana_sdk::transaction::Transaction;

/// Scriptable RPC double. Balances, history, and memos are plain maps the
/// test populates; every submitted transaction is recorded.
#[derive(Default)]
pub struct MockRpc {
    pub lamports: Mutex<HashMap<Pubkey, u64>>,
    pub token_balances: Mutex<HashMap<Pubkey, u64>>,
    pub sent: Mutex<Vec<Transaction>>,
    pub history: Mutex<Vec<SignatureRecord>>,
    pub memos: Mutex<HashMap<Signature, Vec<String>>>,
    /// Signatures whose memo fetch should fail with a network error
    pub failing_fetches: Mutex<HashSet<Signature>>,
    /// On-chain error to report from `transaction_status`
    pub status_err: Mutex<Option<String>>,
}

impl MockRpc {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_lamports(&self, address: Pubkey, amount: u64) {
        self.lamports.lock().unwrap().insert(address, amount);
    }

    pub fn set_token_balance(&self, ata: Pubkey, amount: u64) {
        self.token_balances.lock().unwrap().insert(ata, amount);
    }

    pub fn add_history_entry(&self, signature: Signature, memos: Vec<String>) {
        self.history.lock().unwrap().push(SignatureRecord {
            signature,
            slot: 1,
            block_time: Some(0),
            err: None,
        });
        self.memos.lock().unwrap().insert(signature, memos);
    }

    pub fn sent_transactions(&self) -> Vec<Transaction> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl SolanaRpc for MockRpc {
    async fn lamport_balance(&self, address: &Pubkey) -> Result<u64, EngineError> {
        Ok(self.lamports.lock().unwrap().get(address).copied().unwrap_or(0))
    }

    async fn token_account_balance(&self, ata: &Pubkey) -> Result<Option<u64>, EngineError> {
        Ok(self.token_balances.lock().unwrap().get(ata).copied())
    }

    async fn latest_blockhash(&self) -> Result<Hash, EngineError> {
        Ok(Hash::new_unique())
    }

    async fn send_and_confirm(&self, transaction: &Transaction) -> Result<Signature, EngineError> {
        let signature = transaction.signatures[0];
        self.sent.lock().unwrap().push(transaction.clone());
        Ok(signature)
    }

    async fn transaction_status(
        &self,
        _signature: &Signature,
    ) -> Result<TransactionStatusInfo, EngineError> {
        Ok(TransactionStatusInfo {
            err: self.status_err.lock().unwrap().clone(),
            block_time: Some(0),
        })
    }

    async fn signatures_for_address(
        &self,
        _address: &Pubkey,
        limit: usize,
    ) -> Result<Vec<SignatureRecord>, EngineError> {
        let mut history = self.history.lock().unwrap().clone();
        history.truncate(limit);
        Ok(history)
    }

    async fn transaction_memos(&self, signature: &Signature) -> Result<Vec<String>, EngineError> {
        if self.failing_fetches.lock().unwrap().contains(signature) {
            return Err(EngineError::Network("fetch failed".to_string()));
        }
        Ok(self
            .memos
            .lock()
            .unwrap()
            .get(signature)
            .cloned()
            .unwrap_or_default())
    }
}

/// A conversation long and varied enough to pass every heuristic.
pub fn natural_conversation() -> ConversationPayload {
    let gaps = [6_000u64, 19_000, 11_500, 43_000, 8_000, 27_000];
    let mut now = 1_700_000_000_000u64;
    let messages = (0..12)
        .map(|i| {
            now += gaps[i % gaps.len()];
            ChatMessage {
                role: if i % 2 == 0 { "user" } else { "assistant" }.to_string(),
                content: format!(
                    "Message {}: could you explain how this step works, because I want \
                     to understand what happens when the transaction confirms?",
                    i
                ),
                timestamp_ms: now,
            }
        })
        .collect();
    ConversationPayload { messages }
}

/// Decompile a transaction into (program id, data) pairs.
pub fn instructions_of(transaction: &Transaction) -> Vec<(Pubkey, Vec<u8>)> {
    transaction
        .message
        .instructions
        .iter()
        .map(|ci| {
            (
                transaction.message.account_keys[ci.program_id_index as usize],
                ci.data.clone(),
            )
        })
        .collect()
}
