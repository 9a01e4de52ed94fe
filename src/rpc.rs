//! RPC seam between the reward-and-trust components and Solana.
//!
//! Components talk to the chain through the [`SolanaRpc`] trait so the
//! business logic stays testable without a validator; [`ClientRpc`] is the
//! production implementation over the nonblocking `RpcClient`.

use async_trait::async_trait;
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_client::rpc_client::GetConfirmedSignaturesForAddress2Config;
use solana_client::rpc_config::RpcTransactionConfig;
use solana_sdk::commitment_config::CommitmentConfig;
use solana_sdk::hash::Hash;
use solana_sdk::program_pack::Pack;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Signature;
use solana_sdk::transaction::Transaction;
use solana_transaction_status::{
    EncodedTransaction, UiInstruction, UiMessage, UiParsedInstruction, UiTransactionEncoding,
};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument};

use crate::error::EngineError;

/// One entry of a wallet's signature history.
#[derive(Debug, Clone)]
pub struct SignatureRecord {
    pub signature: Signature,
    pub slot: u64,
    pub block_time: Option<i64>,
    pub err: Option<String>,
}

/// Confirmed-transaction status relevant to post-submission verification.
#[derive(Debug, Clone)]
pub struct TransactionStatusInfo {
    /// On-chain execution error, if the transaction landed but failed
    pub err: Option<String>,
    pub block_time: Option<i64>,
}

/// Abstract RPC surface consumed by the engine, detector, and ledger.
#[async_trait]
pub trait SolanaRpc: Send + Sync {
    /// Native balance in lamports.
    async fn lamport_balance(&self, address: &Pubkey) -> Result<u64, EngineError>;

    /// Token balance of an associated token account, or `None` when the
    /// account does not exist yet.
    async fn token_account_balance(&self, ata: &Pubkey) -> Result<Option<u64>, EngineError>;

    /// Recent blockhash for transaction construction.
    async fn latest_blockhash(&self) -> Result<Hash, EngineError>;

    /// Submit a fully signed transaction and wait for confirmation.
    async fn send_and_confirm(&self, transaction: &Transaction) -> Result<Signature, EngineError>;

    /// Status of a confirmed transaction.
    async fn transaction_status(
        &self,
        signature: &Signature,
    ) -> Result<TransactionStatusInfo, EngineError>;

    /// Most recent signatures involving `address`, newest first, bounded
    /// by `limit`.
    async fn signatures_for_address(
        &self,
        address: &Pubkey,
        limit: usize,
    ) -> Result<Vec<SignatureRecord>, EngineError>;

    /// Memo payloads carried by a transaction, in instruction order.
    async fn transaction_memos(&self, signature: &Signature) -> Result<Vec<String>, EngineError>;
}

/// Production implementation over `solana_client`.
pub struct ClientRpc {
    client: Arc<RpcClient>,
    commitment: CommitmentConfig,
}

impl ClientRpc {
    pub fn new(rpc_url: &str, commitment: CommitmentConfig, timeout: Duration) -> Self {
        let client = Arc::new(RpcClient::new_with_timeout_and_commitment(
            rpc_url.to_string(),
            timeout,
            commitment,
        ));
        Self { client, commitment }
    }

    fn network_err(context: &str, err: impl std::fmt::Display) -> EngineError {
        EngineError::Network(format!("{}: {}", context, err))
    }
}

#[async_trait]
impl SolanaRpc for ClientRpc {
    #[instrument(skip(self))]
    async fn lamport_balance(&self, address: &Pubkey) -> Result<u64, EngineError> {
        self.client
            .get_balance(address)
            .await
            .map_err(|e| Self::network_err("failed to fetch lamport balance", e))
    }

    #[instrument(skip(self))]
    async fn token_account_balance(&self, ata: &Pubkey) -> Result<Option<u64>, EngineError> {
        let response = self
            .client
            .get_account_with_commitment(ata, self.commitment)
            .await
            .map_err(|e| Self::network_err("failed to fetch token account", e))?;

        match response.value {
            Some(account) => {
                let parsed = spl_token::state::Account::unpack(&account.data).map_err(|e| {
                    EngineError::AccountSetup(format!("account {} is not a token account: {}", ata, e))
                })?;
                Ok(Some(parsed.amount))
            }
            None => Ok(None),
        }
    }

    #[instrument(skip(self))]
    async fn latest_blockhash(&self) -> Result<Hash, EngineError> {
        self.client
            .get_latest_blockhash()
            .await
            .map_err(|e| Self::network_err("failed to fetch blockhash", e))
    }

    #[instrument(skip(self, transaction))]
    async fn send_and_confirm(&self, transaction: &Transaction) -> Result<Signature, EngineError> {
        self.client
            .send_and_confirm_transaction(transaction)
            .await
            .map_err(|e| EngineError::Transaction(format!("submission failed: {}", e)))
    }

    #[instrument(skip(self))]
    async fn transaction_status(
        &self,
        signature: &Signature,
    ) -> Result<TransactionStatusInfo, EngineError> {
        let config = RpcTransactionConfig {
            encoding: Some(UiTransactionEncoding::JsonParsed),
            commitment: Some(self.commitment),
            max_supported_transaction_version: Some(0),
        };
        let tx = self
            .client
            .get_transaction_with_config(signature, config)
            .await
            .map_err(|e| Self::network_err("failed to fetch transaction", e))?;

        let err = tx
            .transaction
            .meta
            .as_ref()
            .and_then(|meta| meta.err.as_ref())
            .map(|e| e.to_string());
        Ok(TransactionStatusInfo { err, block_time: tx.block_time })
    }

    #[instrument(skip(self))]
    async fn signatures_for_address(
        &self,
        address: &Pubkey,
        limit: usize,
    ) -> Result<Vec<SignatureRecord>, EngineError> {
        let config = GetConfirmedSignaturesForAddress2Config {
            before: None,
            until: None,
            limit: Some(limit),
            commitment: Some(self.commitment),
        };
        let history = self
            .client
            .get_signatures_for_address_with_config(address, config)
            .await
            .map_err(|e| Self::network_err("failed to fetch signature history", e))?;

        let mut records = Vec::with_capacity(history.len());
        for entry in history {
            let signature = Signature::from_str(&entry.signature).map_err(|e| {
                EngineError::Network(format!("malformed signature in history: {}", e))
            })?;
            records.push(SignatureRecord {
                signature,
                slot: entry.slot,
                block_time: entry.block_time,
                err: entry.err.map(|e| format!("{:?}", e)),
            });
        }
        debug!("fetched {} signatures for {}", records.len(), address);
        Ok(records)
    }

    #[instrument(skip(self))]
    async fn transaction_memos(&self, signature: &Signature) -> Result<Vec<String>, EngineError> {
        let config = RpcTransactionConfig {
            encoding: Some(UiTransactionEncoding::JsonParsed),
            commitment: Some(self.commitment),
            max_supported_transaction_version: Some(0),
        };
        let tx = self
            .client
            .get_transaction_with_config(signature, config)
            .await
            .map_err(|e| Self::network_err("failed to fetch transaction", e))?;

        let mut memos = Vec::new();
        if let EncodedTransaction::Json(ui_tx) = &tx.transaction.transaction {
            if let UiMessage::Parsed(message) = &ui_tx.message {
                for instruction in &message.instructions {
                    if let UiInstruction::Parsed(UiParsedInstruction::Parsed(parsed)) = instruction
                    {
                        if parsed.program == "spl-memo" {
                            if let Some(text) = parsed.parsed.as_str() {
                                memos.push(text.to_string());
                            }
                        }
                    }
                }
            }
        }
        Ok(memos)
    }
}
