//! Memo record schema and the pure replay core.
//!
//! Records are versioned, type-tagged JSON. Reconstruction is a pure
//! function over whatever memos a scan produced: it deduplicates by id
//! (latest timestamp wins), honors delete markers regardless of scan
//! order, and is idempotent, so partial or repeated scans never corrupt
//! the result.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

/// Current memo schema version. Records carrying any other version are
/// skipped during replay.
pub const MEMO_VERSION: u8 = 1;

/// One on-chain chat record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MemoRecord {
    Chat {
        id: String,
        title: String,
        last_message: String,
        timestamp_ms: u64,
    },
    Message {
        id: String,
        conversation_id: String,
        role: String,
        content: String,
        timestamp_ms: u64,
    },
    DeleteChat {
        chat_id: String,
        timestamp_ms: u64,
    },
}

#[derive(Serialize, Deserialize)]
struct VersionedMemo {
    v: u8,
    #[serde(flatten)]
    record: MemoRecord,
}

/// Serialize a record into memo text.
pub fn encode_memo(record: &MemoRecord) -> Result<String, serde_json::Error> {
    serde_json::to_string(&VersionedMemo {
        v: MEMO_VERSION,
        record: record.clone(),
    })
}

/// Parse memo text into a record. Unknown versions, unknown types, and
/// non-record memos all come back as `None`; replay skips them.
pub fn parse_memo(text: &str) -> Option<MemoRecord> {
    let memo: VersionedMemo = serde_json::from_str(text).ok()?;
    if memo.v != MEMO_VERSION {
        return None;
    }
    Some(memo.record)
}

/// A chat conversation as reconstructed from chain.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatSummary {
    pub id: String,
    pub title: String,
    pub last_message: String,
    pub timestamp_ms: u64,
}

/// A chat message as reconstructed from chain.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredMessage {
    pub id: String,
    pub role: String,
    pub content: String,
    pub timestamp_ms: u64,
}

/// Rebuild the chat list from scanned records, newest first.
pub fn materialize_chats(records: impl IntoIterator<Item = MemoRecord>) -> Vec<ChatSummary> {
    let mut chats: HashMap<String, ChatSummary> = HashMap::new();
    let mut deleted: HashSet<String> = HashSet::new();

    for record in records {
        match record {
            MemoRecord::Chat {
                id,
                title,
                last_message,
                timestamp_ms,
            } => {
                let keep = chats
                    .get(&id)
                    .map(|existing| timestamp_ms > existing.timestamp_ms)
                    .unwrap_or(true);
                if keep {
                    chats.insert(
                        id.clone(),
                        ChatSummary { id, title, last_message, timestamp_ms },
                    );
                }
            }
            MemoRecord::DeleteChat { chat_id, .. } => {
                deleted.insert(chat_id);
            }
            MemoRecord::Message { .. } => {}
        }
    }

    let mut result: Vec<ChatSummary> = chats
        .into_values()
        .filter(|chat| !deleted.contains(&chat.id))
        .collect();
    result.sort_by(|a, b| b.timestamp_ms.cmp(&a.timestamp_ms).then(a.id.cmp(&b.id)));
    result
}

/// Rebuild one conversation's messages from scanned records, oldest first.
pub fn materialize_messages(
    records: impl IntoIterator<Item = MemoRecord>,
    conversation: &str,
) -> Vec<StoredMessage> {
    let mut messages: HashMap<String, StoredMessage> = HashMap::new();

    for record in records {
        if let MemoRecord::Message {
            id,
            conversation_id,
            role,
            content,
            timestamp_ms,
        } = record
        {
            if conversation_id != conversation {
                continue;
            }
            let keep = messages
                .get(&id)
                .map(|existing| timestamp_ms > existing.timestamp_ms)
                .unwrap_or(true);
            if keep {
                messages.insert(id.clone(), StoredMessage { id, role, content, timestamp_ms });
            }
        }
    }

    let mut result: Vec<StoredMessage> = messages.into_values().collect();
    result.sort_by(|a, b| a.timestamp_ms.cmp(&b.timestamp_ms).then(a.id.cmp(&b.id)));
    result
}
