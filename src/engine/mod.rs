//! CONVO reward distribution.
//!
//! Builds and submits the payout transaction: an optional associated token
//! account creation for the user, a transfer of the user share from the
//! treasury, and a transfer of the burn share to the burn sink, all in one
//! atomic transaction. Expected business failures are reported inside
//! [`RewardResult`], never raised; `logs` carries a line per step.

pub mod types;

use std::sync::Arc;
use std::time::{Duration, Instant};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use solana_sdk::instruction::Instruction;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::transaction::Transaction;
use spl_associated_token_account::get_associated_token_address;
use spl_associated_token_account::instruction::create_associated_token_account;
use tokio_retry::strategy::ExponentialBackoff;
use tokio_retry::Retry;
use tracing::{info, instrument, warn};

use crate::config::{EngineConfig, TreasurySigner};
use crate::error::EngineError;
use crate::rpc::SolanaRpc;
use crate::security::FraudDetector;
use crate::types::{ConversationPayload, RequestMeta, SigningOutcome};

pub use types::{RewardRequest, RewardResult};

pub struct RewardEngine {
    config: EngineConfig,
    rpc: Arc<dyn SolanaRpc>,
    detector: Arc<FraudDetector>,
}

impl RewardEngine {
    pub fn new(config: EngineConfig, rpc: Arc<dyn SolanaRpc>, detector: Arc<FraudDetector>) -> Self {
        Self { config, rpc, detector }
    }

    /// Distribute a reward to `request.user_wallet` under the configured
    /// split policy.
    #[instrument(skip_all, fields(
        conversation_id = %request.conversation_id,
        wallet = %request.user_wallet,
        total_amount = request.total_amount,
    ))]
    pub async fn distribute(
        &self,
        request: RewardRequest,
        conversation: &ConversationPayload,
        meta: &RequestMeta,
    ) -> RewardResult {
        let started = Instant::now();
        let mut logs = Vec::new();

        let treasury = self.config.treasury.pubkey();
        logs.push("Starting CONVO token reward distribution".to_string());
        logs.push(format!(
            "Total reward amount: {} base units ({} tokens)",
            request.total_amount,
            self.tokens(request.total_amount)
        ));
        logs.push(format!("User wallet: {}", request.user_wallet));
        logs.push(format!("Treasury wallet: {}", treasury));
        logs.push(format!("Conversation ID: {}", request.conversation_id));

        // Step 1: request validation.
        if let Err(e) = self.validate(&request) {
            logs.push(format!("Validation failed: {}", e));
            return RewardResult::failure(e, logs);
        }
        logs.push("Request validation passed".to_string());

        // Step 2: fraud and rate-limit assessment.
        let assessment = self
            .detector
            .assess(
                &request.user_id,
                &request.user_wallet.to_string(),
                request.total_amount,
                conversation,
                meta,
            )
            .await;
        if assessment.is_fraudulent {
            let detail = assessment.reasons.join("; ");
            let error = if assessment.rate_limited {
                EngineError::RateLimited(detail)
            } else {
                EngineError::FraudFlagged(detail)
            };
            logs.push(format!("Security check rejected the request: {}", error));
            return RewardResult::failure(error, logs);
        }
        logs.push(format!(
            "Security check passed (risk score {})",
            assessment.risk_score
        ));

        // Step 3: treasury balances.
        let (lamports, token_balance) = match self.treasury_balances().await {
            Ok(balances) => balances,
            Err(e) => {
                logs.push(format!("Treasury validation failed: {}", e));
                return RewardResult::failure(e, logs);
            }
        };
        if lamports < self.config.min_fee_lamports {
            let e = EngineError::InsufficientFunds(format!(
                "treasury needs at least {} lamports for fees, has {}",
                self.config.min_fee_lamports, lamports
            ));
            logs.push(format!("Treasury validation failed: {}", e));
            return RewardResult::failure(e, logs);
        }
        let Some(token_balance) = token_balance else {
            let e = EngineError::InsufficientFunds(
                "treasury has no CONVO token account".to_string(),
            );
            logs.push(format!("Treasury validation failed: {}", e));
            return RewardResult::failure(e, logs);
        };
        if token_balance < request.total_amount {
            let e = EngineError::InsufficientFunds(format!(
                "treasury needs {} CONVO base units, has {}",
                request.total_amount, token_balance
            ));
            logs.push(format!("Treasury validation failed: {}", e));
            return RewardResult::failure(e, logs);
        }
        logs.push(format!(
            "Treasury validated: {} lamports, {} CONVO base units",
            lamports, token_balance
        ));

        // Step 4: split calculation.
        let (user_amount, burn_amount) = self.config.split.split(request.total_amount);
        logs.push(format!(
            "User reward: {} base units ({} tokens)",
            user_amount,
            self.tokens(user_amount)
        ));
        logs.push(format!(
            "Burn amount: {} base units ({} tokens)",
            burn_amount,
            self.tokens(burn_amount)
        ));
        let residual = request.total_amount - user_amount - burn_amount;
        if residual > 0 {
            logs.push(format!(
                "Rounding residual of {} base units stays in treasury",
                residual
            ));
        }

        // Step 5: user token account.
        let user_ata = get_associated_token_address(&request.user_wallet, &self.config.token_mint);
        let ata_exists = match self.retry(|| self.rpc.token_account_balance(&user_ata)).await {
            Ok(balance) => balance.is_some(),
            Err(e) => {
                logs.push(format!("Failed to inspect user token account: {}", e));
                return RewardResult::failure(e, logs);
            }
        };
        logs.push(if ata_exists {
            format!("Using existing associated token account {}", user_ata)
        } else {
            format!("Will create associated token account {}", user_ata)
        });

        // Step 6: build, sign, submit.
        let instructions = match self.build_instructions(
            &request.user_wallet,
            &user_ata,
            ata_exists,
            user_amount,
            burn_amount,
        ) {
            Ok(instructions) => instructions,
            Err(e) => {
                logs.push(format!("Failed to build transaction: {}", e));
                return RewardResult::failure(e, logs);
            }
        };
        let blockhash = match self.rpc.latest_blockhash().await {
            Ok(hash) => hash,
            Err(e) => {
                logs.push(format!("Failed to fetch blockhash: {}", e));
                return RewardResult::failure(e, logs);
            }
        };
        let mut transaction = Transaction::new_with_payer(&instructions, Some(&treasury));
        transaction.message.recent_blockhash = blockhash;

        let keypair = match &self.config.treasury {
            TreasurySigner::Local(keypair) => keypair,
            TreasurySigner::External(_) => {
                // No signing credential on this side; hand the transaction
                // back for the wallet extension to complete.
                let encoded = match bincode::serialize(&transaction) {
                    Ok(bytes) => BASE64.encode(bytes),
                    Err(e) => {
                        let e = EngineError::Transaction(format!(
                            "failed to serialize unsigned transaction: {}",
                            e
                        ));
                        logs.push(e.to_string());
                        return RewardResult::failure(e, logs);
                    }
                };
                logs.push("Returning unsigned transaction for manual signature".to_string());
                return RewardResult {
                    success: true,
                    user_amount,
                    burn_amount,
                    outcome: Some(SigningOutcome::RequiresManualSignature(encoded)),
                    user_token_account: Some(user_ata),
                    error: None,
                    logs,
                };
            }
        };
        if let Err(e) = transaction.try_sign(&[keypair], blockhash) {
            let e = EngineError::Transaction(format!("treasury signing failed: {}", e));
            logs.push(e.to_string());
            return RewardResult::failure(e, logs);
        }
        logs.push("Transaction signed with treasury keypair".to_string());

        let signature = match tokio::time::timeout(
            self.config.confirm_timeout,
            self.rpc.send_and_confirm(&transaction),
        )
        .await
        {
            Ok(Ok(signature)) => signature,
            Ok(Err(e)) => {
                logs.push(format!("Transaction failed: {}", e));
                return RewardResult::failure(e, logs);
            }
            Err(_) => {
                let e = EngineError::ConfirmationTimeout(self.config.confirm_timeout);
                logs.push(e.to_string());
                return RewardResult::failure(e, logs);
            }
        };
        logs.push(format!("Transaction signature: {}", signature));

        // Step 7: post-submission verification.
        match self.rpc.transaction_status(&signature).await {
            Ok(status) => {
                if let Some(err) = status.err {
                    let e = EngineError::Transaction(format!(
                        "transaction {} failed on-chain: {}",
                        signature, err
                    ));
                    logs.push(e.to_string());
                    return RewardResult::failure(e, logs);
                }
                logs.push("Transaction verified successfully".to_string());
            }
            Err(e) => {
                // The transfer is confirmed; a failed read here is a
                // warning, not a payout failure.
                warn!("verification fetch failed for {}: {}", signature, e);
                logs.push(format!("Transaction verification warning: {}", e));
            }
        }

        // Step 8: final balance, best effort.
        if let Ok(Some(balance)) = self.rpc.token_account_balance(&user_ata).await {
            logs.push(format!("User final balance: {} CONVO base units", balance));
        }

        let elapsed = started.elapsed().as_millis();
        logs.push(format!(
            "CONVO reward distribution completed successfully in {}ms",
            elapsed
        ));
        info!(%signature, user_amount, burn_amount, elapsed_ms = elapsed as u64, "reward distributed");

        RewardResult {
            success: true,
            user_amount,
            burn_amount,
            outcome: Some(SigningOutcome::Signed(signature)),
            user_token_account: Some(user_ata),
            error: None,
            logs,
        }
    }

    fn validate(&self, request: &RewardRequest) -> Result<(), EngineError> {
        if request.user_wallet == Pubkey::default() {
            return Err(EngineError::Validation(
                "user wallet address is required".to_string(),
            ));
        }
        if request.total_amount == 0 {
            return Err(EngineError::Validation(
                "reward amount must be greater than 0".to_string(),
            ));
        }
        if request.total_amount > self.config.max_reward_amount {
            return Err(EngineError::Validation(format!(
                "reward amount exceeds maximum limit of {} base units",
                self.config.max_reward_amount
            )));
        }
        if request.conversation_length < self.config.min_conversation_length {
            return Err(EngineError::Validation(format!(
                "conversation too short to qualify: {} of {} required characters",
                request.conversation_length, self.config.min_conversation_length
            )));
        }
        Ok(())
    }

    fn build_instructions(
        &self,
        user_wallet: &Pubkey,
        user_ata: &Pubkey,
        ata_exists: bool,
        user_amount: u64,
        burn_amount: u64,
    ) -> Result<Vec<Instruction>, EngineError> {
        let treasury = self.config.treasury.pubkey();
        let treasury_ata = get_associated_token_address(&treasury, &self.config.token_mint);
        let mut instructions = Vec::new();

        if !ata_exists {
            instructions.push(create_associated_token_account(
                &treasury,
                user_wallet,
                &self.config.token_mint,
                &spl_token::id(),
            ));
        }
        if user_amount > 0 {
            instructions.push(
                spl_token::instruction::transfer(
                    &spl_token::id(),
                    &treasury_ata,
                    user_ata,
                    &treasury,
                    &[],
                    user_amount,
                )
                .map_err(|e| EngineError::Transaction(format!("user transfer: {}", e)))?,
            );
        }
        if burn_amount > 0 {
            instructions.push(
                spl_token::instruction::transfer(
                    &spl_token::id(),
                    &treasury_ata,
                    &self.config.burn_sink,
                    &treasury,
                    &[],
                    burn_amount,
                )
                .map_err(|e| EngineError::Transaction(format!("burn transfer: {}", e)))?,
            );
        }
        Ok(instructions)
    }

    /// Treasury lamport balance and token balance (None when the treasury
    /// has no token account).
    pub async fn treasury_balances(&self) -> Result<(u64, Option<u64>), EngineError> {
        let treasury = self.config.treasury.pubkey();
        let treasury_ata = get_associated_token_address(&treasury, &self.config.token_mint);
        let lamports = self.retry(|| self.rpc.lamport_balance(&treasury)).await?;
        let tokens = self.retry(|| self.rpc.token_account_balance(&treasury_ata)).await?;
        Ok((lamports, tokens))
    }

    /// A user's CONVO balance; 0 when the token account does not exist.
    pub async fn user_token_balance(&self, wallet: &Pubkey) -> Result<u64, EngineError> {
        let ata = get_associated_token_address(wallet, &self.config.token_mint);
        Ok(self
            .retry(|| self.rpc.token_account_balance(&ata))
            .await?
            .unwrap_or(0))
    }

    async fn retry<T, F, Fut>(&self, action: F) -> Result<T, EngineError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, EngineError>>,
    {
        let strategy = ExponentialBackoff::from_millis(100)
            .max_delay(Duration::from_secs(5))
            .take(self.config.rpc_retry_attempts);
        Retry::spawn(strategy, action).await
    }

    fn tokens(&self, base_units: u64) -> f64 {
        base_units as f64 / 10f64.powi(self.config.token_decimals as i32)
    }
}
