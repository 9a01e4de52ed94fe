//! Fraud detection over reward requests.
//!
//! Every reward request passes through [`FraudDetector::assess`], which
//! layers a blocklist, rate limiting, conversation heuristics, and wallet
//! history into a single additive risk score. The detector fails closed:
//! if persistence breaks mid-check, the request is scored as fraudulent
//! rather than waved through.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use solana_sdk::pubkey::Pubkey;
use std::str::FromStr;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, instrument, warn};

use crate::rpc::SolanaRpc;
use crate::security::rate_limit::{check_amount_windows, RequestGate};
use crate::security::store::SecurityStore;
use crate::security::types::{
    EventType, FraudAssessment, SecurityConfig, SecurityEvent, SecurityStats, Severity,
    UserActivityProfile,
};
use crate::types::{ChatMessage, ConversationPayload, RequestMeta};

const RISK_SHORT_CONVERSATION: u8 = 15;
const RISK_DUPLICATE_CONTENT: u8 = 25;
const RISK_AUTOMATED_PATTERNS: u8 = 30;
const RISK_LOW_QUALITY: u8 = 20;
const RISK_NEW_WALLET: u8 = 10;
const RISK_HIGH_TX_FREQUENCY: u8 = 20;
const FRAUD_THRESHOLD: u8 = 80;
const MONITORING_THRESHOLD: u8 = 50;

pub struct FraudDetector {
    store: Arc<dyn SecurityStore>,
    rpc: Option<Arc<dyn SolanaRpc>>,
    config: SecurityConfig,
    gate: RequestGate,
    blocklist: RwLock<HashSet<String>>,
    // One lock per wallet so check-then-update cannot interleave for the
    // same wallet while independent wallets proceed in parallel.
    wallet_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl FraudDetector {
    pub fn new(
        store: Arc<dyn SecurityStore>,
        rpc: Option<Arc<dyn SolanaRpc>>,
        config: SecurityConfig,
        blocked_wallets: HashSet<String>,
    ) -> Self {
        let gate = RequestGate::new(config.max_requests_per_minute);
        Self {
            store,
            rpc,
            config,
            gate,
            blocklist: RwLock::new(blocked_wallets),
            wallet_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Score one reward request. Never errors: an internal failure is
    /// reported as a fraudulent assessment with reason "Security check
    /// failed".
    #[instrument(skip(self, conversation, meta), fields(user_id, wallet_address, amount))]
    pub async fn assess(
        &self,
        user_id: &str,
        wallet_address: &str,
        amount: u64,
        conversation: &ConversationPayload,
        meta: &RequestMeta,
    ) -> FraudAssessment {
        let lock = self.wallet_lock(wallet_address).await;
        let _guard = lock.lock().await;

        match self
            .assess_inner(user_id, wallet_address, amount, conversation, meta)
            .await
        {
            Ok(assessment) => assessment,
            Err(e) => {
                warn!("security check failed for wallet {}: {:#}", wallet_address, e);
                let mut assessment = FraudAssessment::default();
                assessment.is_fraudulent = true;
                assessment.risk_score = 100;
                assessment.reasons.push("Security check failed".to_string());
                assessment
            }
        }
    }

    async fn assess_inner(
        &self,
        user_id: &str,
        wallet_address: &str,
        amount: u64,
        conversation: &ConversationPayload,
        meta: &RequestMeta,
    ) -> Result<FraudAssessment> {
        let mut assessment = FraudAssessment::default();
        let now_ms = Utc::now().timestamp_millis() as u64;

        if self.blocklist.read().await.contains(wallet_address) {
            assessment.is_fraudulent = true;
            assessment.risk_score = 100;
            assessment.reasons.push("Wallet address is blocked".to_string());
            self.log_event(
                user_id,
                wallet_address,
                EventType::FraudDetected,
                Severity::Critical,
                serde_json::json!({ "reason": "Blocked wallet address", "reward_amount": amount }),
                meta,
                now_ms,
            )
            .await?;
            return Ok(assessment);
        }

        let mut profile = self
            .store
            .load_profile(user_id, wallet_address)
            .await?
            .unwrap_or_else(|| UserActivityProfile::new(user_id, wallet_address));

        if !self.gate.allow(wallet_address) {
            assessment.is_fraudulent = true;
            assessment.rate_limited = true;
            assessment.risk_score = 80;
            assessment.reasons.push("Too many requests this minute".to_string());
            self.log_event(
                user_id,
                wallet_address,
                EventType::RateLimitExceeded,
                Severity::High,
                serde_json::json!({ "reason": "Request rate limit", "reward_amount": amount }),
                meta,
                now_ms,
            )
            .await?;
            return Ok(assessment);
        }

        // A rejected request consumes no window budget and leaves the
        // stored profile untouched.
        if let Err(reason) = check_amount_windows(&mut profile, amount, now_ms, &self.config) {
            assessment.is_fraudulent = true;
            assessment.rate_limited = true;
            assessment.risk_score = 80;
            assessment.reasons.push(reason.clone());
            self.log_event(
                user_id,
                wallet_address,
                EventType::RateLimitExceeded,
                Severity::High,
                serde_json::json!({
                    "reason": reason,
                    "reward_amount": amount,
                    "current_total": profile.total_rewards,
                }),
                meta,
                now_ms,
            )
            .await?;
            return Ok(assessment);
        }

        let mut pattern_reasons = Vec::new();
        if conversation.messages.len() < self.config.min_message_count {
            assessment.add_risk(RISK_SHORT_CONVERSATION);
            pattern_reasons.push("Very short conversation".to_string());
        }
        if duplicate_ratio(&conversation.messages) > self.config.duplicate_ratio_threshold {
            assessment.add_risk(RISK_DUPLICATE_CONTENT);
            pattern_reasons.push("Duplicate conversation content detected".to_string());
        }
        if let Some(variance) = timing_variance(&conversation.messages) {
            if variance < self.config.timing_variance_floor {
                assessment.add_risk(RISK_AUTOMATED_PATTERNS);
                pattern_reasons.push("Automated conversation patterns detected".to_string());
            }
        }
        if !pattern_reasons.is_empty() {
            assessment.reasons.extend(pattern_reasons.iter().cloned());
            self.log_event(
                user_id,
                wallet_address,
                EventType::SuspiciousActivity,
                Severity::Medium,
                serde_json::json!({ "reasons": pattern_reasons, "reward_amount": amount }),
                meta,
                now_ms,
            )
            .await?;
        }

        if quality_score(conversation) < self.config.min_quality_score {
            assessment.add_risk(RISK_LOW_QUALITY);
            assessment.reasons.push("Low conversation quality".to_string());
            assessment
                .recommendations
                .push("Improve conversation quality for better rewards".to_string());
        }

        if self.config.check_wallet_history {
            self.check_wallet_history(wallet_address, &mut assessment).await;
        }

        if assessment.risk_score >= FRAUD_THRESHOLD {
            assessment.is_fraudulent = true;
            assessment
                .recommendations
                .push("Account flagged for manual review".to_string());
        } else if assessment.risk_score >= MONITORING_THRESHOLD {
            assessment
                .recommendations
                .push("Account under increased monitoring".to_string());
        }

        self.update_profile(&mut profile, amount, assessment.risk_score, now_ms);
        self.store.save_profile(&profile).await?;

        self.log_event(
            user_id,
            wallet_address,
            EventType::RewardRequest,
            Severity::Low,
            serde_json::json!({ "reward_amount": amount, "risk_score": assessment.risk_score }),
            meta,
            now_ms,
        )
        .await?;

        Ok(assessment)
    }

    /// On-chain history heuristics. RPC failures are logged and skipped so
    /// a flaky endpoint cannot block payouts by itself.
    async fn check_wallet_history(&self, wallet_address: &str, assessment: &mut FraudAssessment) {
        let Some(rpc) = &self.rpc else { return };
        let Ok(address) = Pubkey::from_str(wallet_address) else { return };

        let history = match rpc
            .signatures_for_address(&address, self.config.wallet_history_sample)
            .await
        {
            Ok(history) => history,
            Err(e) => {
                warn!("wallet history check skipped for {}: {}", wallet_address, e);
                return;
            }
        };

        if history.len() < self.config.new_wallet_floor {
            assessment.add_risk(RISK_NEW_WALLET);
            assessment
                .reasons
                .push("New wallet with limited transaction history".to_string());
        }

        let hour_ago = Utc::now().timestamp() - 3600;
        let recent = history
            .iter()
            .filter(|record| record.block_time.map(|t| t > hour_ago).unwrap_or(false))
            .count();
        if recent > self.config.hourly_tx_ceiling {
            assessment.add_risk(RISK_HIGH_TX_FREQUENCY);
            assessment.reasons.push("High transaction frequency".to_string());
        }
    }

    fn update_profile(
        &self,
        profile: &mut UserActivityProfile,
        amount: u64,
        risk_score: u8,
        now_ms: u64,
    ) {
        if profile.last_reward_time > 0 {
            let gap_ms = now_ms.saturating_sub(profile.last_reward_time).max(1);
            profile.reward_frequency = 3_600_000.0 / gap_ms as f64;
        }
        profile.total_rewards += amount;
        profile.reward_count += 1;
        profile.average_reward_amount = profile.total_rewards as f64 / profile.reward_count as f64;
        profile.last_reward_time = now_ms;
        profile.risk_score = profile.risk_score.max(risk_score);
        if risk_score > MONITORING_THRESHOLD {
            profile.suspicious_activities += 1;
        }
        if profile.suspicious_activities > self.config.flag_after_suspicious {
            profile.is_flagged = true;
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn log_event(
        &self,
        user_id: &str,
        wallet_address: &str,
        event_type: EventType,
        severity: Severity,
        details: serde_json::Value,
        meta: &RequestMeta,
        now_ms: u64,
    ) -> Result<()> {
        let event = SecurityEvent {
            id: format!("event_{}_{:08x}", now_ms, rand::random::<u32>()),
            user_id: user_id.to_string(),
            wallet_address: wallet_address.to_string(),
            event_type,
            severity,
            details,
            timestamp_ms: now_ms,
            ip_address: meta.ip_address.clone(),
            user_agent: meta.user_agent.clone(),
        };
        info!(
            event_type = event.event_type.as_str(),
            severity = event.severity.as_str(),
            wallet = %event.wallet_address,
            "security event"
        );
        self.store.append_event(&event).await
    }

    async fn wallet_lock(&self, wallet_address: &str) -> Arc<Mutex<()>> {
        let mut locks = self.wallet_locks.lock().await;
        locks
            .entry(wallet_address.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    // --- administration surface ---

    pub async fn block_wallet(&self, address: &str) {
        self.blocklist.write().await.insert(address.to_string());
        info!("wallet address blocked: {}", address);
    }

    pub async fn unblock_wallet(&self, address: &str) {
        self.blocklist.write().await.remove(address);
        info!("wallet address unblocked: {}", address);
    }

    pub async fn is_blocked(&self, address: &str) -> bool {
        self.blocklist.read().await.contains(address)
    }

    pub async fn security_events(&self, limit: usize) -> Result<Vec<SecurityEvent>> {
        self.store.recent_events(limit).await
    }

    pub async fn profile(
        &self,
        user_id: &str,
        wallet_address: &str,
    ) -> Result<Option<UserActivityProfile>> {
        self.store.load_profile(user_id, wallet_address).await
    }

    /// Manual unflag, for support tooling.
    pub async fn clear_flag(&self, user_id: &str, wallet_address: &str) -> Result<()> {
        self.store
            .clear_flag(user_id, wallet_address)
            .await
            .context("Failed to clear profile flag")
    }

    pub async fn stats(&self) -> Result<SecurityStats> {
        let mut stats = self.store.stats().await?;
        stats.blocked_addresses = self.blocklist.read().await.len() as u64;
        Ok(stats)
    }
}

/// Fraction of messages whose normalized content repeats an earlier one.
fn duplicate_ratio(messages: &[ChatMessage]) -> f64 {
    if messages.is_empty() {
        return 0.0;
    }
    let unique: HashSet<String> = messages
        .iter()
        .map(|m| m.content.trim().to_lowercase())
        .collect();
    1.0 - unique.len() as f64 / messages.len() as f64
}

/// Variance of inter-message gaps in ms^2, or `None` when the conversation
/// is too short to say anything about timing.
fn timing_variance(messages: &[ChatMessage]) -> Option<f64> {
    if messages.len() < 3 {
        return None;
    }
    let diffs: Vec<f64> = messages
        .windows(2)
        .map(|pair| pair[1].timestamp_ms as f64 - pair[0].timestamp_ms as f64)
        .collect();
    let mean = diffs.iter().sum::<f64>() / diffs.len() as f64;
    let variance = diffs.iter().map(|d| (d - mean).powi(2)).sum::<f64>() / diffs.len() as f64;
    Some(variance)
}

const MEANINGFUL_WORDS: &[&str] = &[
    "how", "what", "why", "when", "where", "explain", "help", "understand", "learn",
];

const PRONOUNS: &[&str] = &["i", "you", "he", "she", "we", "they"];
const AUXILIARIES: &[&str] = &["is", "are", "was", "were", "have", "has", "had"];
const CONNECTIVES: &[&str] = &["and", "or", "but", "because", "however", "therefore"];

/// Heuristic conversation quality in `[0, 1]`, starting from a neutral 1.0
/// and adjusted for length, meaningful vocabulary, and natural phrasing.
fn quality_score(conversation: &ConversationPayload) -> f64 {
    let mut score: f64 = 1.0;

    if conversation.char_length() < 50 {
        score -= 0.3;
    }

    let words: HashSet<String> = conversation
        .messages
        .iter()
        .flat_map(|m| {
            m.content
                .to_lowercase()
                .split(|c: char| !c.is_alphanumeric())
                .filter(|w| !w.is_empty())
                .map(str::to_string)
                .collect::<Vec<_>>()
        })
        .collect();

    if MEANINGFUL_WORDS.iter().any(|w| words.contains(*w)) {
        score += 0.2;
    } else {
        score -= 0.4;
    }

    let natural = PRONOUNS.iter().any(|w| words.contains(*w))
        || AUXILIARIES.iter().any(|w| words.contains(*w))
        || CONNECTIVES.iter().any(|w| words.contains(*w));
    if natural {
        score += 0.1;
    } else {
        score -= 0.2;
    }

    score.clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::store::MemorySecurityStore;

    fn message(content: &str, timestamp_ms: u64) -> ChatMessage {
        ChatMessage {
            role: "user".to_string(),
            content: content.to_string(),
            timestamp_ms,
        }
    }

    fn natural_conversation(count: usize) -> ConversationPayload {
        // Irregular gaps so timing variance stays well above the floor.
        let gaps = [5_000u64, 21_000, 9_000, 47_000, 13_000, 62_000];
        let mut now = 0u64;
        let messages = (0..count)
            .map(|i| {
                now += gaps[i % gaps.len()];
                message(
                    &format!(
                        "Could you explain how message number {} relates to what we \
                         discussed, because I want to understand it better?",
                        i
                    ),
                    now,
                )
            })
            .collect();
        ConversationPayload { messages }
    }

    fn detector(config: SecurityConfig) -> FraudDetector {
        FraudDetector::new(
            Arc::new(MemorySecurityStore::new()),
            None,
            SecurityConfig {
                check_wallet_history: false,
                ..config
            },
            HashSet::new(),
        )
    }

    #[test]
    fn test_duplicate_ratio() {
        let distinct = vec![message("a", 0), message("b", 1), message("c", 2)];
        assert!(duplicate_ratio(&distinct).abs() < f64::EPSILON);

        // "Hello " and "hello" normalize to the same content.
        let repeated = vec![message("Hello ", 0), message("hello", 1), message("bye", 2)];
        assert!(duplicate_ratio(&repeated) > 0.2);
    }

    #[test]
    fn test_timing_variance_flags_uniform_gaps() {
        let uniform: Vec<ChatMessage> =
            (0..5).map(|i| message("m", i * 1_000)).collect();
        assert!(timing_variance(&uniform).unwrap() < 1_000.0);

        let irregular = vec![
            message("a", 0),
            message("b", 4_000),
            message("c", 30_000),
            message("d", 31_000),
        ];
        assert!(timing_variance(&irregular).unwrap() >= 1_000.0);

        assert!(timing_variance(&[message("a", 0), message("b", 1)]).is_none());
    }

    #[test]
    fn test_quality_score_bounds() {
        let good = natural_conversation(4);
        assert!(quality_score(&good) >= 0.7);

        let junk = ConversationPayload {
            messages: vec![message("zzz", 0)],
        };
        assert!(quality_score(&junk) < 0.7);
    }

    #[tokio::test]
    async fn test_blocked_wallet_scores_100() {
        let detector = detector(SecurityConfig::default());
        detector.block_wallet("bad-wallet").await;

        let assessment = detector
            .assess(
                "user-1",
                "bad-wallet",
                10,
                &natural_conversation(12),
                &RequestMeta::default(),
            )
            .await;
        assert!(assessment.is_fraudulent);
        assert_eq!(assessment.risk_score, 100);
        assert!(assessment
            .reasons
            .contains(&"Wallet address is blocked".to_string()));

        let events = detector.security_events(10).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, EventType::FraudDetected);
        assert_eq!(events[0].severity, Severity::Critical);
    }

    #[tokio::test]
    async fn test_clean_request_passes_and_updates_profile() {
        let detector = detector(SecurityConfig::default());

        let assessment = detector
            .assess(
                "user-1",
                "wallet-1",
                25,
                &natural_conversation(12),
                &RequestMeta::default(),
            )
            .await;
        assert!(!assessment.is_fraudulent);
        assert_eq!(assessment.risk_score, 0);

        let profile = detector.profile("user-1", "wallet-1").await.unwrap().unwrap();
        assert_eq!(profile.total_rewards, 25);
        assert_eq!(profile.reward_count, 1);
        assert!(!profile.is_flagged);
    }

    #[tokio::test]
    async fn test_spacing_rejection_keeps_profile_untouched() {
        let detector = detector(SecurityConfig::default());
        let conversation = natural_conversation(12);
        let meta = RequestMeta::default();

        let first = detector.assess("user-1", "wallet-1", 10, &conversation, &meta).await;
        assert!(!first.is_fraudulent);

        // Immediately again, inside the 30 second spacing window.
        let second = detector.assess("user-1", "wallet-1", 10, &conversation, &meta).await;
        assert!(second.is_fraudulent);
        assert!(second.rate_limited);
        assert_eq!(second.risk_score, 80);
        assert!(second
            .reasons
            .contains(&"Too frequent reward requests".to_string()));

        // Only the accepted request counted.
        let profile = detector.profile("user-1", "wallet-1").await.unwrap().unwrap();
        assert_eq!(profile.total_rewards, 10);
        assert_eq!(profile.reward_count, 1);
    }

    #[tokio::test]
    async fn test_degenerate_conversation_accumulates_risk() {
        let detector = detector(SecurityConfig::default());

        // Three identical messages on a metronome: short, duplicated,
        // automated, and low quality all at once.
        let conversation = ConversationPayload {
            messages: (0..3).map(|i| message("zzz", i * 1_000)).collect(),
        };
        let assessment = detector
            .assess("user-1", "wallet-1", 10, &conversation, &RequestMeta::default())
            .await;

        // 15 + 25 + 30 + 20
        assert!(assessment.is_fraudulent);
        assert!(!assessment.rate_limited);
        assert_eq!(assessment.risk_score, 90);
        assert!(assessment
            .reasons
            .contains(&"Duplicate conversation content detected".to_string()));
        assert!(assessment
            .reasons
            .contains(&"Automated conversation patterns detected".to_string()));
        assert!(assessment
            .recommendations
            .contains(&"Account flagged for manual review".to_string()));
    }

    #[tokio::test]
    async fn test_repeat_offender_gets_flagged() {
        let config = SecurityConfig {
            // Disable spacing and windows so every assessment lands.
            min_ms_between_rewards: 0,
            max_hourly_amount: u64::MAX,
            max_daily_amount: u64::MAX,
            max_requests_per_minute: 100,
            flag_after_suspicious: 2,
            ..SecurityConfig::default()
        };
        let detector = detector(config);
        let degenerate = ConversationPayload {
            messages: (0..3).map(|i| message("zzz", i * 1_000)).collect(),
        };

        for _ in 0..3 {
            detector
                .assess("user-1", "wallet-1", 1, &degenerate, &RequestMeta::default())
                .await;
        }

        let profile = detector.profile("user-1", "wallet-1").await.unwrap().unwrap();
        assert_eq!(profile.suspicious_activities, 3);
        assert!(profile.is_flagged);

        detector.clear_flag("user-1", "wallet-1").await.unwrap();
        let profile = detector.profile("user-1", "wallet-1").await.unwrap().unwrap();
        assert!(!profile.is_flagged);
    }

    #[tokio::test]
    async fn test_stats_include_blocklist() {
        let detector = detector(SecurityConfig::default());
        detector.block_wallet("a").await;
        detector.block_wallet("b").await;
        assert!(detector.is_blocked("a").await);

        detector.unblock_wallet("a").await;
        let stats = detector.stats().await.unwrap();
        assert_eq!(stats.blocked_addresses, 1);
    }
}
