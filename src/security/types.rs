//! Types for the rate limiter and fraud detector.

use serde::{Deserialize, Serialize};

/// Tunable thresholds for rate limiting and fraud heuristics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// Reward requests allowed per wallet per minute
    pub max_requests_per_minute: u32,
    /// Base-unit ceiling on rewards per wallet per hour. Defaults assume
    /// the six-decimal CONVO mint, so 50 tokens per hour.
    pub max_hourly_amount: u64,
    /// Base-unit ceiling on rewards per wallet per day (1000 tokens at
    /// six decimals)
    pub max_daily_amount: u64,
    /// Minimum milliseconds between two rewards for the same wallet
    pub min_ms_between_rewards: u64,
    /// Conversations with fewer messages than this are suspicious
    pub min_message_count: usize,
    /// Fraction of duplicate messages above which content is suspicious
    pub duplicate_ratio_threshold: f64,
    /// Inter-message timing variance (ms^2) below which cadence looks scripted
    pub timing_variance_floor: f64,
    /// Quality score floor; below it adds risk and a recommendation
    pub min_quality_score: f64,
    /// High-risk assessments before a profile is permanently flagged
    pub flag_after_suspicious: u32,
    /// Whether to consult on-chain wallet history
    pub check_wallet_history: bool,
    /// Signature-history sample size for the wallet check
    pub wallet_history_sample: usize,
    /// Wallets with fewer prior transactions than this count as new
    pub new_wallet_floor: usize,
    /// Transactions within the last hour above which frequency is suspicious
    pub hourly_tx_ceiling: usize,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            max_requests_per_minute: 10,
            max_hourly_amount: 50_000_000,
            max_daily_amount: 1_000_000_000,
            min_ms_between_rewards: 30_000,
            min_message_count: 10,
            duplicate_ratio_threshold: 0.2,
            timing_variance_floor: 1_000.0,
            min_quality_score: 0.7,
            flag_after_suspicious: 5,
            check_wallet_history: true,
            wallet_history_sample: 50,
            new_wallet_floor: 5,
            hourly_tx_ceiling: 10,
        }
    }
}

/// Outcome of one fraud assessment.
#[derive(Debug, Clone, Default)]
pub struct FraudAssessment {
    pub is_fraudulent: bool,
    /// True when the rejection came from a rate limit rather than a fraud
    /// heuristic, so callers can surface the right error class
    pub rate_limited: bool,
    /// Additive risk estimate, 0-100
    pub risk_score: u8,
    pub reasons: Vec<String>,
    pub recommendations: Vec<String>,
}

impl FraudAssessment {
    pub(crate) fn add_risk(&mut self, points: u8) {
        self.risk_score = self.risk_score.saturating_add(points).min(100);
    }
}

/// Abuse-history ledger entry for one (user, wallet) pair. Never deleted,
/// only grows. Carries the sliding-window rate state so limits survive
/// process restarts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserActivityProfile {
    pub user_id: String,
    pub wallet_address: String,
    /// Cumulative base units rewarded
    pub total_rewards: u64,
    pub reward_count: u64,
    pub average_reward_amount: f64,
    /// Unix ms of the most recent reward; 0 when none yet
    pub last_reward_time: u64,
    /// Rewards per hour over the profile lifetime
    pub reward_frequency: f64,
    pub suspicious_activities: u32,
    /// Highest risk score ever assessed
    pub risk_score: u8,
    /// Permanent until manually cleared
    pub is_flagged: bool,
    pub hourly_total: u64,
    pub hourly_window_start: u64,
    pub daily_total: u64,
    pub daily_window_start: u64,
}

impl UserActivityProfile {
    pub fn new(user_id: &str, wallet_address: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            wallet_address: wallet_address.to_string(),
            total_rewards: 0,
            reward_count: 0,
            average_reward_amount: 0.0,
            last_reward_time: 0,
            reward_frequency: 0.0,
            suspicious_activities: 0,
            risk_score: 0,
            is_flagged: false,
            hourly_total: 0,
            hourly_window_start: 0,
            daily_total: 0,
            daily_window_start: 0,
        }
    }
}

/// Kind of audit event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    RewardRequest,
    FraudDetected,
    RateLimitExceeded,
    SuspiciousActivity,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::RewardRequest => "reward_request",
            EventType::FraudDetected => "fraud_detected",
            EventType::RateLimitExceeded => "rate_limit_exceeded",
            EventType::SuspiciousActivity => "suspicious_activity",
        }
    }
}

/// Event severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

/// Immutable audit record, append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityEvent {
    pub id: String,
    pub user_id: String,
    pub wallet_address: String,
    pub event_type: EventType,
    pub severity: Severity,
    pub details: serde_json::Value,
    pub timestamp_ms: u64,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

/// Aggregate counters for the admin surface.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SecurityStats {
    pub total_events: u64,
    pub fraud_events: u64,
    /// Percentage of events that were fraud detections
    pub fraud_rate: f64,
    pub blocked_addresses: u64,
    pub flagged_users: u64,
    pub total_users: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_risk_saturates_at_100() {
        let mut assessment = FraudAssessment::default();
        assessment.add_risk(80);
        assessment.add_risk(50);
        assert_eq!(assessment.risk_score, 100);
    }

    #[test]
    fn test_event_type_round_trip() {
        let json = serde_json::to_string(&EventType::RateLimitExceeded).unwrap();
        assert_eq!(json, "\"rate_limit_exceeded\"");
        let back: EventType = serde_json::from_str(&json).unwrap();
        assert_eq!(back, EventType::RateLimitExceeded);
    }

    #[test]
    fn test_new_profile_is_clean() {
        let profile = UserActivityProfile::new("user-1", "wallet-1");
        assert_eq!(profile.total_rewards, 0);
        assert!(!profile.is_flagged);
        assert_eq!(profile.risk_score, 0);
    }
}
