//! Shared types for the reward-and-trust layer.

use serde::{Deserialize, Serialize};
use solana_sdk::signature::Signature;

/// Outcome of a signing path: either the backend held a valid signer and
/// the transaction is already on-chain, or the caller must complete it
/// with the user's own wallet. Both are first-class results, not fallbacks.
#[derive(Debug, Clone, PartialEq)]
pub enum SigningOutcome {
    /// Transaction signed locally, submitted, and confirmed.
    Signed(Signature),
    /// Base64-encoded unsigned transaction for the wallet extension to
    /// sign and submit.
    RequiresManualSignature(String),
}

impl SigningOutcome {
    /// Confirmed signature, if the automatic path was taken.
    pub fn signature(&self) -> Option<&Signature> {
        match self {
            SigningOutcome::Signed(sig) => Some(sig),
            SigningOutcome::RequiresManualSignature(_) => None,
        }
    }
}

/// A single chat message as supplied by the product layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Message author ("user" or "assistant")
    pub role: String,
    /// Message text
    pub content: String,
    /// Unix timestamp in milliseconds
    pub timestamp_ms: u64,
}

/// Conversation payload handed over by the chat UI for fraud assessment.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversationPayload {
    pub messages: Vec<ChatMessage>,
}

impl ConversationPayload {
    /// Total character length across all messages.
    pub fn char_length(&self) -> usize {
        self.messages.iter().map(|m| m.content.chars().count()).sum()
    }
}

/// Request metadata forwarded from the calling product for audit records.
#[derive(Debug, Clone, Default)]
pub struct RequestMeta {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

/// Solana Explorer URL for a transaction signature.
pub fn explorer_url(signature: &Signature, network: &str) -> String {
    if network == "devnet" {
        format!("https://explorer.solana.com/tx/{}?cluster=devnet", signature)
    } else {
        format!("https://explorer.solana.com/tx/{}", signature)
    }
}
