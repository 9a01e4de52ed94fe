//! Per-wallet reward rate limiting.
//!
//! Two layers: a governor-backed request-per-minute gate, and sliding
//! amount windows (hourly and daily) kept on the activity profile so they
//! survive restarts. The minimum-spacing rule lives with the windows.

use std::num::NonZeroU32;

use governor::{DefaultKeyedRateLimiter, Quota, RateLimiter};
use tracing::debug;

use crate::security::types::{SecurityConfig, UserActivityProfile};

const HOUR_MS: u64 = 60 * 60 * 1000;
const DAY_MS: u64 = 24 * HOUR_MS;

/// Request-count gate, keyed by wallet address.
pub struct RequestGate {
    limiter: DefaultKeyedRateLimiter<String>,
}

impl RequestGate {
    pub fn new(requests_per_minute: u32) -> Self {
        let quota = Quota::per_minute(
            NonZeroU32::new(requests_per_minute).unwrap_or(NonZeroU32::new(10).unwrap()),
        );
        Self { limiter: RateLimiter::keyed(quota) }
    }

    /// Consume one permit for `wallet`; false when the minute quota is spent.
    pub fn allow(&self, wallet: &str) -> bool {
        let allowed = self.limiter.check_key(&wallet.to_string()).is_ok();
        if !allowed {
            debug!("request gate closed for wallet {}", wallet);
        }
        allowed
    }
}

/// Check the amount windows and minimum spacing for one request.
///
/// On acceptance the window counters on `profile` are advanced to include
/// `amount`; on rejection the profile is left untouched so a rejected
/// request does not consume budget. The caller saves the profile.
pub fn check_amount_windows(
    profile: &mut UserActivityProfile,
    amount: u64,
    now_ms: u64,
    config: &SecurityConfig,
) -> Result<(), String> {
    // Roll expired windows before checking.
    if now_ms.saturating_sub(profile.hourly_window_start) >= HOUR_MS {
        profile.hourly_window_start = now_ms;
        profile.hourly_total = 0;
    }
    if now_ms.saturating_sub(profile.daily_window_start) >= DAY_MS {
        profile.daily_window_start = now_ms;
        profile.daily_total = 0;
    }

    if profile.hourly_total + amount > config.max_hourly_amount {
        return Err("Hourly reward limit exceeded".to_string());
    }
    if profile.daily_total + amount > config.max_daily_amount {
        return Err("Daily reward limit exceeded".to_string());
    }
    if profile.last_reward_time > 0
        && now_ms.saturating_sub(profile.last_reward_time) < config.min_ms_between_rewards
    {
        return Err("Too frequent reward requests".to_string());
    }

    profile.hourly_total += amount;
    profile.daily_total += amount;
    Ok(())
}
