//! Persistence for activity profiles and the security-event log.
//!
//! The detector talks to storage through [`SecurityStore`] so state survives
//! restarts and multiple instances; [`SqliteSecurityStore`] is the production
//! backend, [`MemorySecurityStore`] backs tests and the demo binary.

use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{FromRow, Pool, Sqlite};
use tracing::info;

use crate::security::types::{
    EventType, SecurityEvent, SecurityStats, Severity, UserActivityProfile,
};

/// Contract for profile and audit-event persistence.
#[async_trait]
pub trait SecurityStore: Send + Sync {
    /// Load the profile for a (user, wallet) pair, if one exists.
    async fn load_profile(
        &self,
        user_id: &str,
        wallet_address: &str,
    ) -> Result<Option<UserActivityProfile>>;

    /// Insert or replace a profile.
    async fn save_profile(&self, profile: &UserActivityProfile) -> Result<()>;

    /// Append an audit event. Events are never updated or deleted.
    async fn append_event(&self, event: &SecurityEvent) -> Result<()>;

    /// Most recent events, newest first, bounded by `limit`.
    async fn recent_events(&self, limit: usize) -> Result<Vec<SecurityEvent>>;

    /// Clear the permanent flag on a profile. Manual intervention only;
    /// nothing in the detector calls this.
    async fn clear_flag(&self, user_id: &str, wallet_address: &str) -> Result<()>;

    /// Aggregate counters over profiles and events.
    async fn stats(&self) -> Result<SecurityStats>;
}

/// In-memory store for tests and demos.
#[derive(Default)]
pub struct MemorySecurityStore {
    profiles: Mutex<HashMap<(String, String), UserActivityProfile>>,
    events: Mutex<Vec<SecurityEvent>>,
}

impl MemorySecurityStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SecurityStore for MemorySecurityStore {
    async fn load_profile(
        &self,
        user_id: &str,
        wallet_address: &str,
    ) -> Result<Option<UserActivityProfile>> {
        let profiles = self.profiles.lock().expect("profile map poisoned");
        Ok(profiles
            .get(&(user_id.to_string(), wallet_address.to_string()))
            .cloned())
    }

    async fn save_profile(&self, profile: &UserActivityProfile) -> Result<()> {
        let mut profiles = self.profiles.lock().expect("profile map poisoned");
        profiles.insert(
            (profile.user_id.clone(), profile.wallet_address.clone()),
            profile.clone(),
        );
        Ok(())
    }

    async fn append_event(&self, event: &SecurityEvent) -> Result<()> {
        self.events.lock().expect("event log poisoned").push(event.clone());
        Ok(())
    }

    async fn recent_events(&self, limit: usize) -> Result<Vec<SecurityEvent>> {
        let events = self.events.lock().expect("event log poisoned");
        let mut sorted: Vec<SecurityEvent> = events.clone();
        sorted.sort_by(|a, b| b.timestamp_ms.cmp(&a.timestamp_ms));
        sorted.truncate(limit);
        Ok(sorted)
    }

    async fn clear_flag(&self, user_id: &str, wallet_address: &str) -> Result<()> {
        let mut profiles = self.profiles.lock().expect("profile map poisoned");
        if let Some(profile) =
            profiles.get_mut(&(user_id.to_string(), wallet_address.to_string()))
        {
            profile.is_flagged = false;
        }
        Ok(())
    }

    async fn stats(&self) -> Result<SecurityStats> {
        let events = self.events.lock().expect("event log poisoned");
        let profiles = self.profiles.lock().expect("profile map poisoned");
        let total_events = events.len() as u64;
        let fraud_events = events
            .iter()
            .filter(|e| e.event_type == EventType::FraudDetected)
            .count() as u64;
        Ok(SecurityStats {
            total_events,
            fraud_events,
            fraud_rate: if total_events > 0 {
                fraud_events as f64 / total_events as f64 * 100.0
            } else {
                0.0
            },
            blocked_addresses: 0,
            flagged_users: profiles.values().filter(|p| p.is_flagged).count() as u64,
            total_users: profiles.len() as u64,
        })
    }
}

#[derive(FromRow)]
struct ProfileRow {
    user_id: String,
    wallet_address: String,
    total_rewards: i64,
    reward_count: i64,
    average_reward_amount: f64,
    last_reward_time: i64,
    reward_frequency: f64,
    suspicious_activities: i64,
    risk_score: i64,
    is_flagged: bool,
    hourly_total: i64,
    hourly_window_start: i64,
    daily_total: i64,
    daily_window_start: i64,
}

impl From<ProfileRow> for UserActivityProfile {
    fn from(row: ProfileRow) -> Self {
        Self {
            user_id: row.user_id,
            wallet_address: row.wallet_address,
            total_rewards: row.total_rewards as u64,
            reward_count: row.reward_count as u64,
            average_reward_amount: row.average_reward_amount,
            last_reward_time: row.last_reward_time as u64,
            reward_frequency: row.reward_frequency,
            suspicious_activities: row.suspicious_activities as u32,
            risk_score: row.risk_score as u8,
            is_flagged: row.is_flagged,
            hourly_total: row.hourly_total as u64,
            hourly_window_start: row.hourly_window_start as u64,
            daily_total: row.daily_total as u64,
            daily_window_start: row.daily_window_start as u64,
        }
    }
}

#[derive(FromRow)]
struct EventRow {
    id: String,
    user_id: String,
    wallet_address: String,
    event_type: String,
    severity: String,
    details: String,
    timestamp_ms: i64,
    ip_address: Option<String>,
    user_agent: Option<String>,
}

/// SQLite-backed store.
pub struct SqliteSecurityStore {
    pool: Pool<Sqlite>,
}

impl SqliteSecurityStore {
    pub async fn connect(db_path: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&format!("sqlite:{}?mode=rwc", db_path))
            .await
            .context("Failed to connect to security database")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS user_profiles (
                user_id TEXT NOT NULL,
                wallet_address TEXT NOT NULL,
                total_rewards INTEGER NOT NULL,
                reward_count INTEGER NOT NULL,
                average_reward_amount REAL NOT NULL,
                last_reward_time INTEGER NOT NULL,
                reward_frequency REAL NOT NULL,
                suspicious_activities INTEGER NOT NULL,
                risk_score INTEGER NOT NULL,
                is_flagged BOOLEAN NOT NULL,
                hourly_total INTEGER NOT NULL,
                hourly_window_start INTEGER NOT NULL,
                daily_total INTEGER NOT NULL,
                daily_window_start INTEGER NOT NULL,
                PRIMARY KEY (user_id, wallet_address)
            );
            "#,
        )
        .execute(&pool)
        .await
        .context("Failed to create user_profiles table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS security_events (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                wallet_address TEXT NOT NULL,
                event_type TEXT NOT NULL,
                severity TEXT NOT NULL,
                details TEXT NOT NULL,
                timestamp_ms INTEGER NOT NULL,
                ip_address TEXT,
                user_agent TEXT
            );
            "#,
        )
        .execute(&pool)
        .await
        .context("Failed to create security_events table")?;

        info!("SqliteSecurityStore connected to {}", db_path);
        Ok(Self { pool })
    }
}

#[async_trait]
impl SecurityStore for SqliteSecurityStore {
    async fn load_profile(
        &self,
        user_id: &str,
        wallet_address: &str,
    ) -> Result<Option<UserActivityProfile>> {
        let row: Option<ProfileRow> = sqlx::query_as(
            "SELECT * FROM user_profiles WHERE user_id = ? AND wallet_address = ?",
        )
        .bind(user_id)
        .bind(wallet_address)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to load user profile")?;
        Ok(row.map(UserActivityProfile::from))
    }

    async fn save_profile(&self, profile: &UserActivityProfile) -> Result<()> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO user_profiles (
                user_id, wallet_address, total_rewards, reward_count,
                average_reward_amount, last_reward_time, reward_frequency,
                suspicious_activities, risk_score, is_flagged,
                hourly_total, hourly_window_start, daily_total, daily_window_start
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?);
            "#,
        )
        .bind(&profile.user_id)
        .bind(&profile.wallet_address)
        .bind(profile.total_rewards as i64)
        .bind(profile.reward_count as i64)
        .bind(profile.average_reward_amount)
        .bind(profile.last_reward_time as i64)
        .bind(profile.reward_frequency)
        .bind(profile.suspicious_activities as i64)
        .bind(profile.risk_score as i64)
        .bind(profile.is_flagged)
        .bind(profile.hourly_total as i64)
        .bind(profile.hourly_window_start as i64)
        .bind(profile.daily_total as i64)
        .bind(profile.daily_window_start as i64)
        .execute(&self.pool)
        .await
        .context("Failed to save user profile")?;
        Ok(())
    }

    async fn append_event(&self, event: &SecurityEvent) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO security_events (
                id, user_id, wallet_address, event_type, severity,
                details, timestamp_ms, ip_address, user_agent
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?);
            "#,
        )
        .bind(&event.id)
        .bind(&event.user_id)
        .bind(&event.wallet_address)
        .bind(event.event_type.as_str())
        .bind(event.severity.as_str())
        .bind(event.details.to_string())
        .bind(event.timestamp_ms as i64)
        .bind(&event.ip_address)
        .bind(&event.user_agent)
        .execute(&self.pool)
        .await
        .context("Failed to append security event")?;
        Ok(())
    }

    async fn recent_events(&self, limit: usize) -> Result<Vec<SecurityEvent>> {
        let rows: Vec<EventRow> = sqlx::query_as(
            "SELECT * FROM security_events ORDER BY timestamp_ms DESC LIMIT ?",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch security events")?;

        let mut events = Vec::with_capacity(rows.len());
        for row in rows {
            events.push(SecurityEvent {
                event_type: parse_event_type(&row.event_type)?,
                severity: parse_severity(&row.severity)?,
                details: serde_json::from_str(&row.details).unwrap_or(serde_json::Value::Null),
                id: row.id,
                user_id: row.user_id,
                wallet_address: row.wallet_address,
                timestamp_ms: row.timestamp_ms as u64,
                ip_address: row.ip_address,
                user_agent: row.user_agent,
            });
        }
        Ok(events)
    }

    async fn clear_flag(&self, user_id: &str, wallet_address: &str) -> Result<()> {
        sqlx::query(
            "UPDATE user_profiles SET is_flagged = FALSE WHERE user_id = ? AND wallet_address = ?",
        )
        .bind(user_id)
        .bind(wallet_address)
        .execute(&self.pool)
        .await
        .context("Failed to clear profile flag")?;
        Ok(())
    }

    async fn stats(&self) -> Result<SecurityStats> {
        let (total_events,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM security_events")
            .fetch_one(&self.pool)
            .await?;
        let (fraud_events,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM security_events WHERE event_type = 'fraud_detected'",
        )
        .fetch_one(&self.pool)
        .await?;
        let (total_users,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM user_profiles")
            .fetch_one(&self.pool)
            .await?;
        let (flagged_users,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM user_profiles WHERE is_flagged = TRUE")
                .fetch_one(&self.pool)
                .await?;

        Ok(SecurityStats {
            total_events: total_events as u64,
            fraud_events: fraud_events as u64,
            fraud_rate: if total_events > 0 {
                fraud_events as f64 / total_events as f64 * 100.0
            } else {
                0.0
            },
            blocked_addresses: 0,
            flagged_users: flagged_users as u64,
            total_users: total_users as u64,
        })
    }
}

fn parse_event_type(raw: &str) -> Result<EventType> {
    match raw {
        "reward_request" => Ok(EventType::RewardRequest),
        "fraud_detected" => Ok(EventType::FraudDetected),
        "rate_limit_exceeded" => Ok(EventType::RateLimitExceeded),
        "suspicious_activity" => Ok(EventType::SuspiciousActivity),
        other => anyhow::bail!("unknown event type in store: {}", other),
    }
}

fn parse_severity(raw: &str) -> Result<Severity> {
    match raw {
        "low" => Ok(Severity::Low),
        "medium" => Ok(Severity::Medium),
        "high" => Ok(Severity::High),
        "critical" => Ok(Severity::Critical),
        other => anyhow::bail!("unknown severity in store: {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(id: &str, timestamp_ms: u64, event_type: EventType) -> SecurityEvent {
        SecurityEvent {
            id: id.to_string(),
            user_id: "user-1".to_string(),
            wallet_address: "wallet-1".to_string(),
            event_type,
            severity: Severity::Low,
            details: serde_json::json!({}),
            timestamp_ms,
            ip_address: None,
            user_agent: None,
        }
    }

    #[tokio::test]
    async fn test_memory_profile_round_trip() {
        let store = MemorySecurityStore::new();
        assert!(store.load_profile("u", "w").await.unwrap().is_none());

        let mut profile = UserActivityProfile::new("u", "w");
        profile.total_rewards = 42;
        store.save_profile(&profile).await.unwrap();

        let loaded = store.load_profile("u", "w").await.unwrap().unwrap();
        assert_eq!(loaded.total_rewards, 42);
    }

    #[tokio::test]
    async fn test_memory_events_newest_first() {
        let store = MemorySecurityStore::new();
        store.append_event(&event("a", 100, EventType::RewardRequest)).await.unwrap();
        store.append_event(&event("b", 300, EventType::FraudDetected)).await.unwrap();
        store.append_event(&event("c", 200, EventType::SuspiciousActivity)).await.unwrap();

        let events = store.recent_events(2).await.unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].id, "b");
        assert_eq!(events[1].id, "c");
    }

    #[tokio::test]
    async fn test_memory_stats() {
        let store = MemorySecurityStore::new();
        store.append_event(&event("a", 1, EventType::FraudDetected)).await.unwrap();
        store.append_event(&event("b", 2, EventType::RewardRequest)).await.unwrap();

        let mut profile = UserActivityProfile::new("u", "w");
        profile.is_flagged = true;
        store.save_profile(&profile).await.unwrap();

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.total_events, 2);
        assert_eq!(stats.fraud_events, 1);
        assert!((stats.fraud_rate - 50.0).abs() < f64::EPSILON);
        assert_eq!(stats.flagged_users, 1);
        assert_eq!(stats.total_users, 1);
    }

    #[tokio::test]
    async fn test_memory_clear_flag() {
        let store = MemorySecurityStore::new();
        let mut profile = UserActivityProfile::new("u", "w");
        profile.is_flagged = true;
        store.save_profile(&profile).await.unwrap();

        store.clear_flag("u", "w").await.unwrap();
        assert!(!store.load_profile("u", "w").await.unwrap().unwrap().is_flagged);
    }
}
