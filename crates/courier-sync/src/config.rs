//! Engine configuration loaded from environment variables.
//!
//! Every setting has a default so an embedding client can start with zero
//! configuration.

use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};

use courier_shared::constants::{
    DEFAULT_BACKOFF_BASE_MS, DEFAULT_BACKOFF_MAX_MS, DEFAULT_MAX_ATTEMPTS,
    DEFAULT_MAX_PAGES_PER_PASS, DEFAULT_SYNC_INTERVAL_SECS,
};
use courier_shared::UserId;
use courier_store::OutboxEntry;

/// Retry schedule for outbox entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Failed attempts after which an entry is given up.
    /// Env: `COURIER_MAX_ATTEMPTS`
    pub max_attempts: u32,

    /// Delay before the first retry; doubles with each further attempt.
    /// Env: `COURIER_BACKOFF_BASE_MS`
    pub base_delay: Duration,

    /// Cap on the retry delay.
    /// Env: `COURIER_BACKOFF_MAX_MS`
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: Duration::from_millis(DEFAULT_BACKOFF_BASE_MS),
            max_delay: Duration::from_millis(DEFAULT_BACKOFF_MAX_MS),
        }
    }
}

impl RetryPolicy {
    /// Wait required after `attempt_count` failed attempts:
    /// `base * 2^(attempt_count - 1)`, capped at `max_delay`.
    pub fn delay_for(&self, attempt_count: u32) -> Duration {
        if attempt_count == 0 {
            return Duration::ZERO;
        }
        let factor = 1u32.checked_shl(attempt_count - 1).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Earliest time the entry may be attempted again; `None` for an entry
    /// that was never attempted.
    pub fn next_attempt_at(&self, entry: &OutboxEntry) -> Option<DateTime<Utc>> {
        let last = entry.last_attempt_at?;
        let delay = chrono::Duration::from_std(self.delay_for(entry.attempt_count))
            .unwrap_or_else(|_| chrono::Duration::days(1));
        Some(last.checked_add_signed(delay).unwrap_or(last))
    }

    pub fn is_eligible(&self, entry: &OutboxEntry, now: DateTime<Utc>) -> bool {
        if entry.attempt_count == 0 {
            return true;
        }
        self.next_attempt_at(entry).map_or(true, |at| now >= at)
    }
}

/// Sync engine configuration.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub retry: RetryPolicy,

    /// Period of timer-driven sync passes.
    /// Env: `COURIER_SYNC_INTERVAL_SECS`
    pub sync_interval: Duration,

    /// Delta pages followed per cursor in one pass.
    /// Env: `COURIER_MAX_PAGES_PER_PASS`
    pub max_pages_per_pass: u32,

    /// The signed-in user. Pulled messages from anyone else count as unread.
    /// Env: `COURIER_USER_ID`
    pub local_user: Option<UserId>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            sync_interval: Duration::from_secs(DEFAULT_SYNC_INTERVAL_SECS),
            max_pages_per_pass: DEFAULT_MAX_PAGES_PER_PASS,
            local_user: None,
        }
    }
}

impl SyncConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(n) = env_parse::<u32>("COURIER_MAX_ATTEMPTS") {
            config.retry.max_attempts = n.max(1);
        }
        if let Some(ms) = env_parse::<u64>("COURIER_BACKOFF_BASE_MS") {
            config.retry.base_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = env_parse::<u64>("COURIER_BACKOFF_MAX_MS") {
            config.retry.max_delay = Duration::from_millis(ms);
        }
        if let Some(secs) = env_parse::<u64>("COURIER_SYNC_INTERVAL_SECS") {
            config.sync_interval = Duration::from_secs(secs.max(1));
        }
        if let Some(n) = env_parse::<u32>("COURIER_MAX_PAGES_PER_PASS") {
            config.max_pages_per_pass = n.max(1);
        }
        if let Ok(user) = std::env::var("COURIER_USER_ID") {
            if !user.is_empty() {
                config.local_user = Some(UserId(user));
            }
        }

        config
    }
}

/// Read and parse an environment variable. Invalid values are logged and
/// ignored.
pub fn env_parse<T: FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(var = name, value = %raw, "Invalid value, using default");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use courier_shared::{ConversationId, OutboxPayload};

    fn entry(attempts: u32, last_attempt_secs: Option<i64>) -> OutboxEntry {
        let start = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let mut entry = OutboxEntry::new(
            OutboxPayload::ReadReceipt {
                conversation_id: ConversationId::new("c1"),
                up_to: None,
                read_at: start,
            },
            start,
        );
        entry.attempt_count = attempts;
        entry.last_attempt_at = last_attempt_secs.map(|s| start + chrono::Duration::seconds(s));
        entry
    }

    #[test]
    fn test_default_config() {
        let config = SyncConfig::default();
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.sync_interval, Duration::from_secs(30));
        assert!(config.local_user.is_none());
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(10),
        };
        assert_eq!(policy.delay_for(0), Duration::ZERO);
        assert_eq!(policy.delay_for(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for(2), Duration::from_secs(4));
        assert_eq!(policy.delay_for(3), Duration::from_secs(8));
        assert_eq!(policy.delay_for(4), Duration::from_secs(10));
        assert_eq!(policy.delay_for(64), Duration::from_secs(10));
    }

    #[test]
    fn test_eligibility() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(60),
        };
        let start = Utc.timestamp_opt(1_700_000_000, 0).unwrap();

        assert!(policy.is_eligible(&entry(0, None), start));

        // second failure at t=10 -> wait 4s
        let e = entry(2, Some(10));
        assert!(!policy.is_eligible(&e, start + chrono::Duration::seconds(13)));
        assert!(policy.is_eligible(&e, start + chrono::Duration::seconds(14)));
    }
}
