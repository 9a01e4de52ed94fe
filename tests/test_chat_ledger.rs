//! Chat ledger append and scan-and-replay against the mock RPC.

mod common;

use std::sync::Arc;

use base64::Engine as _;
use chrono::Utc;
use common::{instructions_of, MockRpc};
use convo_rewards::config::EngineConfig;
use convo_rewards::ledger::{encode_memo, ChatLedger, MemoRecord};
use convo_rewards::session::{MemorySessionKeyStore, SessionKeyManager, SessionKeyRequest};
use convo_rewards::types::SigningOutcome;
use nonempty::NonEmpty;
use solana_sdk::signature::{Keypair, Signature};
use solana_sdk::signer::Signer;
use solana_sdk::transaction::Transaction;

fn ledger_with(rpc: Arc<MockRpc>) -> (ChatLedger, Arc<SessionKeyManager>) {
    let sessions = Arc::new(SessionKeyManager::new(
        Arc::new(MemorySessionKeyStore::new()),
        [5u8; 32],
    ));
    let config = EngineConfig::unconfigured();
    (ChatLedger::new(&config, rpc, sessions.clone()), sessions)
}

async fn issue_session(sessions: &SessionKeyManager, owner: &Keypair) {
    let request = SessionKeyRequest {
        wallet_address: owner.pubkey().to_string(),
        scope: NonEmpty::new("chat_storage".to_string()),
        expires_at_ms: Utc::now().timestamp_millis() as u64 + 7 * 24 * 60 * 60 * 1000,
    };
    let message = SessionKeyManager::authorization_message(
        &request.wallet_address,
        &request.scope,
        request.expires_at_ms,
    );
    let signature = owner.sign_message(message.as_bytes());
    sessions.issue(request, &signature).await.unwrap();
}

fn chat_record(id: &str, timestamp_ms: u64) -> MemoRecord {
    MemoRecord::Chat {
        id: id.to_string(),
        title: format!("Chat {}", id),
        last_message: "hello".to_string(),
        timestamp_ms,
    }
}

#[tokio::test]
async fn test_append_with_session_key_submits_memo() {
    let rpc = Arc::new(MockRpc::new());
    let (ledger, sessions) = ledger_with(rpc.clone());
    let owner = Keypair::new();
    issue_session(&sessions, &owner).await;

    let outcome = ledger
        .append(&owner.pubkey().to_string(), &chat_record("c1", 42))
        .await
        .unwrap();
    assert!(matches!(outcome, SigningOutcome::Signed(_)));

    let sent = rpc.sent_transactions();
    assert_eq!(sent.len(), 1);
    let instructions = instructions_of(&sent[0]);
    assert_eq!(instructions.len(), 2);

    // Second instruction is the memo; its payload round-trips.
    let memo_program = EngineConfig::unconfigured().memo_program;
    assert_eq!(instructions[1].0, memo_program);
    let memo_text = String::from_utf8(instructions[1].1.clone()).unwrap();
    assert_eq!(memo_text, encode_memo(&chat_record("c1", 42)).unwrap());

    // The wallet is referenced by the carrier transfer, so the record
    // shows up in its signature history.
    assert!(sent[0].message.account_keys.contains(&owner.pubkey()));
}

#[tokio::test]
async fn test_append_without_session_key_returns_unsigned() {
    let rpc = Arc::new(MockRpc::new());
    let (ledger, _) = ledger_with(rpc.clone());
    let wallet = Keypair::new().pubkey();

    let outcome = ledger
        .append(&wallet.to_string(), &chat_record("c1", 42))
        .await
        .unwrap();
    let SigningOutcome::RequiresManualSignature(encoded) = outcome else {
        panic!("expected an unsigned transaction");
    };

    let bytes = base64::engine::general_purpose::STANDARD.decode(encoded).unwrap();
    let transaction: Transaction = bincode::deserialize(&bytes).unwrap();
    assert_eq!(instructions_of(&transaction).len(), 2);
    assert_eq!(transaction.message.account_keys[0], wallet);
    assert!(rpc.sent_transactions().is_empty());
}

#[tokio::test]
async fn test_scan_replays_history_and_skips_garbage() {
    let rpc = Arc::new(MockRpc::new());
    let (ledger, _) = ledger_with(rpc.clone());
    let wallet = Keypair::new().pubkey();

    rpc.add_history_entry(
        Signature::from([1u8; 64]),
        vec![encode_memo(&chat_record("a", 100)).unwrap()],
    );
    rpc.add_history_entry(
        Signature::from([2u8; 64]),
        vec![
            "gm".to_string(), // foreign memo
            encode_memo(&chat_record("b", 200)).unwrap(),
        ],
    );
    // A newer version of chat "a".
    rpc.add_history_entry(
        Signature::from([3u8; 64]),
        vec![encode_memo(&chat_record("a", 300)).unwrap()],
    );
    // One transaction fetch fails outright; the scan carries on.
    let failing = Signature::from([4u8; 64]);
    rpc.add_history_entry(failing, vec![encode_memo(&chat_record("c", 400)).unwrap()]);
    rpc.failing_fetches.lock().unwrap().insert(failing);

    let chats = ledger.list_chats(&wallet.to_string()).await.unwrap();
    assert_eq!(chats.len(), 2);
    assert_eq!(chats[0].id, "a");
    assert_eq!(chats[0].timestamp_ms, 300);
    assert_eq!(chats[1].id, "b");
}

#[tokio::test]
async fn test_delete_marker_removes_chat_from_listing() {
    let rpc = Arc::new(MockRpc::new());
    let (ledger, sessions) = ledger_with(rpc.clone());
    let owner = Keypair::new();
    issue_session(&sessions, &owner).await;
    let wallet = owner.pubkey().to_string();

    rpc.add_history_entry(
        Signature::from([1u8; 64]),
        vec![
            encode_memo(&chat_record("keep", 100)).unwrap(),
            encode_memo(&chat_record("gone", 100)).unwrap(),
        ],
    );

    let outcome = ledger.mark_deleted(&wallet, "gone").await.unwrap();
    assert!(matches!(outcome, SigningOutcome::Signed(_)));

    // Make the delete marker visible to the next scan.
    let sent = rpc.sent_transactions();
    let memo_text = String::from_utf8(instructions_of(&sent[0])[1].1.clone()).unwrap();
    rpc.add_history_entry(Signature::from([9u8; 64]), vec![memo_text]);

    let chats = ledger.list_chats(&wallet).await.unwrap();
    assert_eq!(chats.len(), 1);
    assert_eq!(chats[0].id, "keep");
}

#[tokio::test]
async fn test_list_messages_for_one_conversation() {
    let rpc = Arc::new(MockRpc::new());
    let (ledger, _) = ledger_with(rpc.clone());
    let wallet = Keypair::new().pubkey();

    let msg = |id: &str, conversation_id: &str, timestamp_ms: u64| MemoRecord::Message {
        id: id.to_string(),
        conversation_id: conversation_id.to_string(),
        role: "user".to_string(),
        content: format!("text {}", id),
        timestamp_ms,
    };
    rpc.add_history_entry(
        Signature::from([1u8; 64]),
        vec![
            encode_memo(&msg("m2", "conv", 200)).unwrap(),
            encode_memo(&msg("m1", "conv", 100)).unwrap(),
            encode_memo(&msg("x", "other", 150)).unwrap(),
        ],
    );

    let messages = ledger.list_messages(&wallet.to_string(), "conv").await.unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].id, "m1");
    assert_eq!(messages[1].id, "m2");
}
