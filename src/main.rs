//! Demo entry point for the convo-rewards trust layer.
//!
//! Wires the fraud detector, session key manager, and memo replay core
//! together with in-memory stores and walks through a reward request the
//! way the product backend would, without touching a live RPC endpoint.

use anyhow::Result;
use chrono::Utc;
use convo_rewards::security::{FraudDetector, MemorySecurityStore, SecurityConfig};
use convo_rewards::session::{MemorySessionKeyStore, SessionKeyManager, SessionKeyRequest};
use convo_rewards::config::{EngineConfig, SplitPolicy};
use convo_rewards::ledger::{materialize_chats, MemoRecord};
use convo_rewards::types::{ChatMessage, ConversationPayload, RequestMeta};
use nonempty::NonEmpty;
use solana_sdk::signature::Keypair;
use solana_sdk::signer::Signer;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, Level};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .init();

    info!("Starting convo-rewards demo");

    let config = EngineConfig::unconfigured();
    info!(
        "Config: mint {}, split {}bps/{}bps, network {}",
        config.token_mint, config.split.user_bps, config.split.burn_bps, config.network
    );
    let (user, burn) = SplitPolicy::standard().split(100_000_000);
    info!("Standard split of 100_000_000 base units: {} to user, {} burned", user, burn);

    // Fraud assessment over a sample conversation
    let detector = Arc::new(FraudDetector::new(
        Arc::new(MemorySecurityStore::new()),
        None,
        SecurityConfig::default(),
        HashSet::new(),
    ));

    let wallet = Keypair::new();
    let conversation = sample_conversation();
    let assessment = detector
        .assess(
            "demo-user",
            &wallet.pubkey().to_string(),
            50_000_000,
            &conversation,
            &RequestMeta::default(),
        )
        .await;
    info!(
        "Fraud assessment: fraudulent={}, risk={}, reasons={:?}",
        assessment.is_fraudulent, assessment.risk_score, assessment.reasons
    );

    // Session key issuance with a real wallet signature
    let sessions = SessionKeyManager::new(Arc::new(MemorySessionKeyStore::new()), rand::random());
    let request = SessionKeyRequest {
        wallet_address: wallet.pubkey().to_string(),
        scope: NonEmpty::new("chat_storage".to_string()),
        expires_at_ms: Utc::now().timestamp_millis() as u64 + 7 * 24 * 60 * 60 * 1000,
    };
    let message = SessionKeyManager::authorization_message(
        &request.wallet_address,
        &request.scope,
        request.expires_at_ms,
    );
    let signature = wallet.sign_message(message.as_bytes());
    let session = sessions.issue(request, &signature).await?;
    info!("Session key issued: {}", session.public_key);

    let session_info = sessions.session_info(&wallet.pubkey().to_string()).await?;
    info!("Session info: {:?}", session_info);

    // Ledger replay over a handful of records
    let records = vec![
        MemoRecord::Chat {
            id: "chat-1".to_string(),
            title: "Rust questions".to_string(),
            last_message: "How do lifetimes work?".to_string(),
            timestamp_ms: 1_000,
        },
        MemoRecord::Chat {
            id: "chat-2".to_string(),
            title: "Trip planning".to_string(),
            last_message: "What about trains?".to_string(),
            timestamp_ms: 2_000,
        },
        MemoRecord::DeleteChat {
            chat_id: "chat-1".to_string(),
            timestamp_ms: 3_000,
        },
    ];
    let chats = materialize_chats(records);
    info!("Replayed chat list ({} live): {:?}", chats.len(), chats);

    info!("Demo completed");
    Ok(())
}

fn sample_conversation() -> ConversationPayload {
    let lines = [
        "How do I stake SOL from a hardware wallet?",
        "You can delegate directly from the wallet interface, and your keys never leave the device.",
        "What happens to my stake if the validator goes offline?",
        "You stop earning rewards for those epochs, but the stake itself is safe and you can redelegate.",
        "Thanks, that helps me understand the risks.",
    ];
    let gaps = [0u64, 14_000, 32_000, 51_000, 9_500];
    let mut now = 1_700_000_000_000u64;
    let messages = lines
        .iter()
        .zip(gaps.iter())
        .enumerate()
        .map(|(i, (content, gap))| {
            now += gap;
            ChatMessage {
                role: if i % 2 == 0 { "user" } else { "assistant" }.to_string(),
                content: content.to_string(),
                timestamp_ms: now,
            }
        })
        .collect();
    ConversationPayload { messages }
}
