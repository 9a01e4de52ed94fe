//! Failure taxonomy for the reward-and-trust layer.
//!
//! Every caller-visible failure maps onto exactly one variant so the UI
//! layer can decide between "show error", "prompt wallet signature", and
//! "retry later" without string matching.

use std::time::Duration;

use thiserror::Error;

/// Classified failure of a reward, ledger, or session operation.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum EngineError {
    /// Bad input shape or range. Never retried, surfaced verbatim.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Treasury lacks fee or token balance. Operational alert, not
    /// user-retryable.
    #[error("insufficient funds: {0}")]
    InsufficientFunds(String),

    /// Policy rejection from the rate limiter.
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// Policy rejection from the fraud detector.
    #[error("fraud check failed: {0}")]
    FraudFlagged(String),

    /// Associated token account creation failed. Retryable.
    #[error("token account setup failed: {0}")]
    AccountSetup(String),

    /// Submission failed, or the confirmed transaction carries an
    /// on-chain error. Retryable with backoff by the caller.
    #[error("transaction failed: {0}")]
    Transaction(String),

    /// Submission outlived the confirmation deadline. The transaction may
    /// still land; the caller decides whether to re-check or resubmit.
    #[error("transaction unconfirmed after {0:?}")]
    ConfirmationTimeout(Duration),

    /// Session key missing, expired, or undecryptable. The caller must
    /// fall back to manual wallet signing.
    #[error("session key error: {0}")]
    Key(String),

    /// RPC endpoint unreachable. Retryable.
    #[error("network error: {0}")]
    Network(String),

    /// Malformed configuration. Programmer error, raised eagerly.
    #[error("configuration error: {0}")]
    Config(String),
}

impl EngineError {
    /// Whether the caller may reasonably retry the operation as-is.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngineError::AccountSetup(_)
                | EngineError::Transaction(_)
                | EngineError::ConfirmationTimeout(_)
                | EngineError::Network(_)
        )
    }
}
