//! Per-user request counters with shadow-ban escalation.
//!
//! Two fixed windows (minute and hour) are cleared by scheduled resets. Every
//! window breach bumps the user's exceed counter; reaching the threshold
//! shadow-bans the user unless an admin has whitelisted them.

use crate::clock::SharedClock;
use crate::config::RateLimitConfig;
use crate::metrics::Metrics;
use crate::persistence::JsonSnapshot;
use crate::platform::{NewStatus, PlatformClient, Visibility};
use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

pub const RATE_LIMITER_FILE: &str = "ratelimiter.json";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimiterState {
    pub minute_counts: BTreeMap<String, u32>,
    pub hour_counts: BTreeMap<String, u32>,
    pub account_ages: BTreeMap<String, DateTime<Utc>>,
    pub exceeded_counts: BTreeMap<String, u32>,
    pub shadow_banned: BTreeSet<String>,
    pub whitelist: BTreeSet<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    ShadowBanned,
    LimitExceeded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allow,
    Deny(DenyReason),
}

impl RateDecision {
    pub fn is_allowed(self) -> bool {
        self == RateDecision::Allow
    }
}

pub struct RateLimiter {
    settings: RateLimitConfig,
    snapshot: JsonSnapshot,
    state: Mutex<RateLimiterState>,
    clock: SharedClock,
    platform: Arc<dyn PlatformClient>,
    metrics: Arc<Metrics>,
}

impl RateLimiter {
    pub fn open(
        settings: RateLimitConfig,
        path: impl Into<PathBuf>,
        clock: SharedClock,
        platform: Arc<dyn PlatformClient>,
        metrics: Arc<Metrics>,
    ) -> Result<Self> {
        let snapshot = JsonSnapshot::new(path);
        let state: RateLimiterState = snapshot.load_or_default()?;
        tracing::info!(
            shadow_banned = state.shadow_banned.len(),
            whitelisted = state.whitelist.len(),
            "rate limiter loaded"
        );
        Ok(Self {
            settings,
            snapshot,
            state: Mutex::new(state),
            clock,
            platform,
            metrics,
        })
    }

    pub fn enabled(&self) -> bool {
        self.settings.enabled
    }

    fn lock(&self) -> MutexGuard<'_, RateLimiterState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn persist(&self, state: &RateLimiterState) {
        if let Err(err) = self.snapshot.save(state) {
            tracing::warn!(error = ?err, "failed to persist rate limiter");
        }
    }

    fn limits(&self, created_at: Option<DateTime<Utc>>) -> (u32, u32) {
        let period = Duration::days(i64::from(self.settings.new_account_period_days));
        let is_new = created_at.is_some_and(|created| self.clock.now() - created < period);
        if is_new {
            (
                self.settings.new_account_max_requests_per_minute,
                self.settings.new_account_max_requests_per_hour,
            )
        } else {
            (
                self.settings.max_requests_per_user_per_minute,
                self.settings.max_requests_per_user_per_hour,
            )
        }
    }

    async fn account_created_at(&self, user_id: &str) -> Option<DateTime<Utc>> {
        if let Some(created) = self.lock().account_ages.get(user_id).copied() {
            return Some(created);
        }
        match self.platform.get_account(user_id).await {
            Ok(account) => account.created_at,
            Err(err) => {
                tracing::warn!(error = ?err, user_id, "failed to look up account age");
                None
            }
        }
    }

    /// Counts one request for `user_id` and decides whether it may proceed.
    pub async fn check(&self, user_id: &str) -> RateDecision {
        if !self.settings.enabled {
            return RateDecision::Allow;
        }
        if self.is_shadow_banned(user_id) {
            return RateDecision::Deny(DenyReason::ShadowBanned);
        }
        let created_at = self.account_created_at(user_id).await;
        let (max_per_minute, max_per_hour) = self.limits(created_at);

        let (decision, newly_banned) = {
            let mut state = self.lock();
            if let Some(created) = created_at {
                state.account_ages.entry(user_id.to_string()).or_insert(created);
            }
            if state.shadow_banned.contains(user_id) {
                return RateDecision::Deny(DenyReason::ShadowBanned);
            }
            let minute = state.minute_counts.get(user_id).copied().unwrap_or(0);
            let hour = state.hour_counts.get(user_id).copied().unwrap_or(0);

            // One denied request counts once, however many windows it breaches.
            let outcome = if minute >= max_per_minute || hour >= max_per_hour {
                let exceeded = state.exceeded_counts.entry(user_id.to_string()).or_insert(0);
                *exceeded += 1;
                let exceeded = *exceeded;
                let newly_banned = exceeded >= self.settings.shadow_ban_threshold
                    && !state.whitelist.contains(user_id);
                if newly_banned {
                    state.shadow_banned.insert(user_id.to_string());
                }
                tracing::info!(user_id, exceeded, minute, hour, "rate limit exceeded");
                (RateDecision::Deny(DenyReason::LimitExceeded), newly_banned)
            } else {
                *state.minute_counts.entry(user_id.to_string()).or_insert(0) += 1;
                *state.hour_counts.entry(user_id.to_string()).or_insert(0) += 1;
                (RateDecision::Allow, false)
            };
            self.persist(&state);
            outcome
        };

        if newly_banned {
            self.metrics.record_shadow_ban();
            tracing::warn!(user_id, "user shadow banned");
            if let Err(err) = self.notify_admin(user_id).await {
                tracing::warn!(error = ?err, user_id, "failed to notify admin about shadow ban");
            }
        }
        decision
    }

    async fn notify_admin(&self, user_id: &str) -> Result<()> {
        let admin = self.settings.admin_contact_handle.trim().trim_start_matches('@');
        if admin.is_empty() {
            tracing::warn!(user_id, "no admin contact configured for shadow ban notice");
            return Ok(());
        }
        let acct = match self.platform.get_account(user_id).await {
            Ok(account) => account.acct,
            Err(err) => {
                tracing::warn!(error = ?err, user_id, "falling back to user id in admin notice");
                user_id.to_string()
            }
        };
        let body = format!(
            "@{admin} User {acct} has been shadow banned for exceeding rate limits.\nTo unban, reply with 'unban {user_id}'."
        );
        self.platform
            .post_status(NewStatus::new(body, Visibility::Direct))
            .await?;
        Ok(())
    }

    /// Lifts a shadow ban and whitelists the user for good.
    pub fn unban(&self, user_id: &str) -> bool {
        let mut state = self.lock();
        let was_banned = state.shadow_banned.remove(user_id);
        state.whitelist.insert(user_id.to_string());
        state.exceeded_counts.remove(user_id);
        self.persist(&state);
        tracing::info!(user_id, was_banned, "user unbanned and whitelisted");
        was_banned
    }

    pub fn reset_minute(&self) {
        let mut state = self.lock();
        if state.minute_counts.is_empty() {
            return;
        }
        state.minute_counts.clear();
        self.persist(&state);
    }

    /// Clears hour and exceed counters, and forgets cached creation dates of
    /// accounts that have aged out of the new-account tier.
    pub fn reset_hour(&self) {
        let cutoff = self.clock.now() - Duration::days(i64::from(self.settings.new_account_period_days));
        let mut state = self.lock();
        state.hour_counts.clear();
        state.exceeded_counts.clear();
        state.account_ages.retain(|_, created| *created > cutoff);
        self.persist(&state);
    }

    pub fn is_shadow_banned(&self, user_id: &str) -> bool {
        self.lock().shadow_banned.contains(user_id)
    }

    pub fn is_whitelisted(&self, user_id: &str) -> bool {
        self.lock().whitelist.contains(user_id)
    }

    pub fn snapshot(&self) -> RateLimiterState {
        self.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::platform::{Account, PlatformEvent, Status};
    use async_trait::async_trait;
    use chrono::TimeZone;
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    struct Accounts {
        created_at: DateTime<Utc>,
        posted: Mutex<Vec<NewStatus>>,
    }

    #[async_trait]
    impl PlatformClient for Accounts {
        async fn stream_user(&self, _cancel: CancellationToken) -> Result<mpsc::Receiver<PlatformEvent>> {
            anyhow::bail!("not streaming in tests")
        }
        async fn get_status(&self, id: &str) -> Result<Status> {
            anyhow::bail!("no status {id}")
        }
        async fn post_status(&self, status: NewStatus) -> Result<Status> {
            self.posted.lock().expect("lock").push(status);
            Ok(Status::default())
        }
        async fn delete_status(&self, _id: &str) -> Result<()> {
            Ok(())
        }
        async fn follow(&self, _account_id: &str) -> Result<()> {
            Ok(())
        }
        async fn get_account(&self, account_id: &str) -> Result<Account> {
            Ok(Account {
                id: account_id.to_string(),
                acct: format!("user{account_id}"),
                created_at: Some(self.created_at),
                ..Account::default()
            })
        }
        async fn current_account(&self) -> Result<Account> {
            self.get_account("bot").await
        }
    }

    fn settings() -> RateLimitConfig {
        RateLimitConfig {
            enabled: true,
            max_requests_per_user_per_minute: 3,
            max_requests_per_user_per_hour: 3,
            new_account_max_requests_per_minute: 1,
            new_account_max_requests_per_hour: 1,
            new_account_period_days: 7,
            shadow_ban_threshold: 2,
            admin_contact_handle: "@admin".to_string(),
        }
    }

    fn limiter(
        dir: &std::path::Path,
        settings: RateLimitConfig,
        account_age: Duration,
    ) -> (RateLimiter, Arc<Accounts>, Arc<ManualClock>) {
        let now = Utc.with_ymd_and_hms(2024, 4, 1, 10, 0, 0).unwrap();
        let clock = Arc::new(ManualClock::new(now));
        let platform = Arc::new(Accounts {
            created_at: now - account_age,
            posted: Mutex::new(Vec::new()),
        });
        let limiter = RateLimiter::open(
            settings,
            dir.join(RATE_LIMITER_FILE),
            clock.clone(),
            platform.clone(),
            Arc::new(Metrics::new()),
        )
        .expect("open");
        (limiter, platform, clock)
    }

    #[tokio::test]
    async fn escalates_to_shadow_ban_and_notifies_admin() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (limiter, platform, _) = limiter(dir.path(), settings(), Duration::days(365));
        for _ in 0..3 {
            assert_eq!(limiter.check("42").await, RateDecision::Allow);
        }
        assert_eq!(limiter.check("42").await, RateDecision::Deny(DenyReason::LimitExceeded));
        assert_eq!(limiter.snapshot().exceeded_counts.get("42"), Some(&1));
        assert!(!limiter.is_shadow_banned("42"));
        assert!(platform.posted.lock().expect("lock").is_empty());

        assert_eq!(limiter.check("42").await, RateDecision::Deny(DenyReason::LimitExceeded));
        assert!(limiter.is_shadow_banned("42"));
        assert_eq!(limiter.check("42").await, RateDecision::Deny(DenyReason::ShadowBanned));
        assert_eq!(limiter.snapshot().exceeded_counts.get("42"), Some(&2));

        let posted = platform.posted.lock().expect("lock");
        assert_eq!(posted.len(), 1);
        assert_eq!(posted[0].visibility, Visibility::Direct);
        assert_eq!(
            posted[0].status,
            "@admin User user42 has been shadow banned for exceeding rate limits.\nTo unban, reply with 'unban 42'."
        );
    }

    #[tokio::test]
    async fn whitelisted_users_are_limited_but_never_banned() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (limiter, _, _) = limiter(dir.path(), settings(), Duration::days(365));
        limiter.unban("7");
        for _ in 0..3 {
            assert!(limiter.check("7").await.is_allowed());
        }
        for _ in 0..4 {
            assert_eq!(limiter.check("7").await, RateDecision::Deny(DenyReason::LimitExceeded));
        }
        assert!(!limiter.is_shadow_banned("7"));
        assert!(limiter.is_whitelisted("7"));
    }

    #[tokio::test]
    async fn new_accounts_get_stricter_limits() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut settings = settings();
        settings.shadow_ban_threshold = 10;
        let (limiter, _, _) = limiter(dir.path(), settings, Duration::days(2));
        assert!(limiter.check("n").await.is_allowed());
        assert!(!limiter.check("n").await.is_allowed());
    }

    #[tokio::test]
    async fn resets_clear_their_windows() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut settings = settings();
        settings.shadow_ban_threshold = 10;
        let (limiter, _, _) = limiter(dir.path(), settings, Duration::days(365));
        for _ in 0..4 {
            limiter.check("a").await;
        }
        limiter.check("b").await;
        limiter.reset_minute();
        let state = limiter.snapshot();
        assert!(state.minute_counts.values().all(|count| *count == 0));
        assert_eq!(state.hour_counts.get("a"), Some(&3));

        limiter.reset_hour();
        let state = limiter.snapshot();
        assert!(state.hour_counts.values().all(|count| *count == 0));
        assert!(state.exceeded_counts.values().all(|count| *count == 0));
    }

    #[tokio::test]
    async fn aged_accounts_leave_the_cache_on_hourly_reset() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (limiter, _, clock) = limiter(dir.path(), settings(), Duration::days(6));
        limiter.check("young").await;
        assert!(limiter.snapshot().account_ages.contains_key("young"));
        clock.advance(Duration::days(2));
        limiter.reset_hour();
        assert!(!limiter.snapshot().account_ages.contains_key("young"));
    }

    #[tokio::test]
    async fn state_survives_restart() {
        let dir = tempfile::tempdir().expect("tempdir");
        {
            let (limiter, _, _) = limiter(dir.path(), settings(), Duration::days(365));
            for _ in 0..4 {
                limiter.check("9").await;
            }
            assert!(limiter.is_shadow_banned("9"));
        }
        let (reloaded, _, _) = limiter(dir.path(), settings(), Duration::days(365));
        assert!(reloaded.is_shadow_banned("9"));
        assert_eq!(reloaded.check("9").await, RateDecision::Deny(DenyReason::ShadowBanned));
    }

    #[tokio::test]
    async fn disabled_limiter_allows_everything() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut settings = settings();
        settings.enabled = false;
        let (limiter, _, _) = limiter(dir.path(), settings, Duration::days(365));
        for _ in 0..10 {
            assert!(limiter.check("x").await.is_allowed());
        }
    }
}
