//! API keys for the HTTP endpoint: monthly quotas, expiry and revocation.

use crate::clock::SharedClock;
use crate::persistence::JsonSnapshot;
use chrono::{DateTime, Datelike, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard, PoisonError};

pub const API_KEYS_FILE: &str = "api_keys.json";
pub const KEY_PREFIX: &str = "altbot_";
/// Keys expired for longer than this are removed by cleanup.
pub const EXPIRED_RETENTION_DAYS: i64 = 30;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiKey {
    pub key: String,
    pub email: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub usage_month: u32,
    pub last_reset: DateTime<Utc>,
    pub active: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub note: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ApiKeyError {
    #[error("invalid API key")]
    Invalid,
    #[error("API key is deactivated")]
    Deactivated,
    #[error("API key has expired")]
    Expired,
    #[error("monthly usage limit exceeded ({used}/{limit})")]
    QuotaExceeded { used: u32, limit: u32 },
    #[error("API key not found")]
    NotFound,
    #[error("failed to save API keys: {0}")]
    Persist(String),
}

/// Usage figures reported by `/api/v1/usage`.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyUsage {
    pub usage_this_month: u32,
    pub days_remaining: i64,
    pub expires_at: DateTime<Utc>,
}

pub struct ApiKeyStore {
    snapshot: JsonSnapshot,
    keys: Mutex<BTreeMap<String, ApiKey>>,
    clock: SharedClock,
}

fn random_key() -> String {
    let bytes: [u8; 32] = rand::random();
    let mut key = String::with_capacity(KEY_PREFIX.len() + 64);
    key.push_str(KEY_PREFIX);
    for byte in bytes {
        let _ = write!(key, "{byte:02x}");
    }
    key
}

impl ApiKeyStore {
    pub fn open(path: impl Into<PathBuf>, clock: SharedClock) -> anyhow::Result<Self> {
        let snapshot = JsonSnapshot::new(path);
        let keys: BTreeMap<String, ApiKey> = snapshot.load_or_default()?;
        tracing::info!(keys = keys.len(), "API keys loaded");
        Ok(Self {
            snapshot,
            keys: Mutex::new(keys),
            clock,
        })
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, ApiKey>> {
        self.keys.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn persist(&self, keys: &BTreeMap<String, ApiKey>) -> Result<(), ApiKeyError> {
        self.snapshot
            .save(keys)
            .map_err(|err| ApiKeyError::Persist(format!("{err:#}")))
    }

    /// Picks up keys created by the admin CLI while the server is running.
    fn reload(&self) {
        match self.snapshot.load_or_default::<BTreeMap<String, ApiKey>>() {
            Ok(keys) => *self.lock() = keys,
            Err(err) => tracing::warn!(error = ?err, "failed to reload API keys"),
        }
    }

    pub fn generate(&self, email: &str, duration_days: i64, note: &str) -> Result<ApiKey, ApiKeyError> {
        let now = self.clock.now();
        let api_key = ApiKey {
            key: random_key(),
            email: email.trim().to_string(),
            created_at: now,
            expires_at: now + Duration::days(duration_days),
            usage_month: 0,
            last_reset: now,
            active: true,
            note: note.trim().to_string(),
        };
        let mut keys = self.lock();
        keys.insert(api_key.key.clone(), api_key.clone());
        self.persist(&keys)?;
        tracing::info!(email = %api_key.email, expires_at = %api_key.expires_at, "API key created");
        Ok(api_key)
    }

    pub fn validate(&self, key: &str) -> Result<ApiKey, ApiKeyError> {
        let mut found = self.lock().get(key).cloned();
        if found.is_none() {
            self.reload();
            found = self.lock().get(key).cloned();
        }
        let api_key = found.ok_or(ApiKeyError::Invalid)?;
        if !api_key.active {
            return Err(ApiKeyError::Deactivated);
        }
        if self.clock.now() > api_key.expires_at {
            return Err(ApiKeyError::Expired);
        }
        Ok(api_key)
    }

    /// Counts one request against the monthly quota. The counter starts over
    /// when the calendar month changes.
    pub fn check_and_increment(&self, key: &str, monthly_limit: u32) -> Result<u32, ApiKeyError> {
        let now = self.clock.now();
        let mut keys = self.lock();
        let api_key = keys.get_mut(key).ok_or(ApiKeyError::Invalid)?;
        if (now.year(), now.month()) != (api_key.last_reset.year(), api_key.last_reset.month()) {
            api_key.usage_month = 0;
            api_key.last_reset = now;
        }
        if api_key.usage_month >= monthly_limit {
            return Err(ApiKeyError::QuotaExceeded {
                used: api_key.usage_month,
                limit: monthly_limit,
            });
        }
        api_key.usage_month += 1;
        let used = api_key.usage_month;
        if let Err(err) = self.persist(&keys) {
            tracing::warn!(error = %err, "failed to persist API key usage");
        }
        Ok(used)
    }

    pub fn usage(&self, key: &str) -> Result<KeyUsage, ApiKeyError> {
        let keys = self.lock();
        let api_key = keys.get(key).ok_or(ApiKeyError::Invalid)?;
        Ok(KeyUsage {
            usage_this_month: api_key.usage_month,
            days_remaining: self.days_remaining(api_key),
            expires_at: api_key.expires_at,
        })
    }

    pub fn days_remaining(&self, api_key: &ApiKey) -> i64 {
        (api_key.expires_at - self.clock.now()).num_days().max(0)
    }

    pub fn revoke(&self, key: &str) -> Result<(), ApiKeyError> {
        let mut keys = self.lock();
        let api_key = keys.get_mut(key).ok_or(ApiKeyError::NotFound)?;
        api_key.active = false;
        self.persist(&keys)
    }

    /// Extends from now when already expired, otherwise from the current
    /// expiry. Extending always reactivates the key.
    pub fn extend(&self, key: &str, additional_days: i64) -> Result<ApiKey, ApiKeyError> {
        let now = self.clock.now();
        let mut keys = self.lock();
        let api_key = keys.get_mut(key).ok_or(ApiKeyError::NotFound)?;
        let base = if now > api_key.expires_at {
            now
        } else {
            api_key.expires_at
        };
        api_key.expires_at = base + Duration::days(additional_days);
        api_key.active = true;
        let extended = api_key.clone();
        self.persist(&keys)?;
        Ok(extended)
    }

    pub fn list(&self) -> Vec<ApiKey> {
        let mut keys: Vec<ApiKey> = self.lock().values().cloned().collect();
        keys.sort_by_key(|key| key.created_at);
        keys
    }

    pub fn find_by_email(&self, email: &str) -> Option<ApiKey> {
        let email = email.trim();
        self.lock()
            .values()
            .find(|key| key.email.eq_ignore_ascii_case(email))
            .cloned()
    }

    /// Drops keys that expired more than 30 days ago.
    pub fn cleanup_expired(&self) -> Result<usize, ApiKeyError> {
        let cutoff = self.clock.now() - Duration::days(EXPIRED_RETENTION_DAYS);
        let mut keys = self.lock();
        let before = keys.len();
        keys.retain(|_, key| key.expires_at >= cutoff);
        let removed = before - keys.len();
        if removed > 0 {
            self.persist(&keys)?;
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use chrono::TimeZone;
    use std::sync::Arc;

    fn store(dir: &std::path::Path) -> (ApiKeyStore, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 5, 20, 12, 0, 0).unwrap(),
        ));
        let store = ApiKeyStore::open(dir.join(API_KEYS_FILE), clock.clone()).expect("open");
        (store, clock)
    }

    #[test]
    fn generated_keys_have_prefix_and_validate() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (store, _) = store(dir.path());
        let key = store.generate("a@example.org", 30, "beta").expect("generate");
        assert!(key.key.starts_with(KEY_PREFIX));
        assert_eq!(key.key.len(), KEY_PREFIX.len() + 64);
        assert!(key.key[KEY_PREFIX.len()..].chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(store.validate(&key.key).expect("valid").email, "a@example.org");
        assert!(matches!(store.validate("altbot_nope"), Err(ApiKeyError::Invalid)));
    }

    #[test]
    fn quota_resets_with_the_calendar_month() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (store, clock) = store(dir.path());
        let key = store.generate("a@example.org", 90, "").expect("generate").key;
        assert_eq!(store.check_and_increment(&key, 2).expect("1"), 1);
        assert_eq!(store.check_and_increment(&key, 2).expect("2"), 2);
        assert!(matches!(
            store.check_and_increment(&key, 2),
            Err(ApiKeyError::QuotaExceeded { used: 2, limit: 2 })
        ));

        clock.advance(Duration::days(15));
        assert_eq!(store.check_and_increment(&key, 2).expect("new month"), 1);
        assert_eq!(store.usage(&key).expect("usage").usage_this_month, 1);
    }

    #[test]
    fn revoke_expire_and_extend() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (store, clock) = store(dir.path());
        let key = store.generate("b@example.org", 10, "").expect("generate").key;

        store.revoke(&key).expect("revoke");
        assert!(matches!(store.validate(&key), Err(ApiKeyError::Deactivated)));

        let extended = store.extend(&key, 5).expect("extend");
        assert!(extended.active);
        assert_eq!(store.usage(&key).expect("usage").days_remaining, 15);

        clock.advance(Duration::days(20));
        assert!(matches!(store.validate(&key), Err(ApiKeyError::Expired)));
        let revived = store.extend(&key, 7).expect("extend expired");
        assert_eq!(revived.expires_at, clock.now() + Duration::days(7));
        assert!(matches!(store.revoke("missing"), Err(ApiKeyError::NotFound)));
    }

    #[test]
    fn cleanup_and_lookup() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (store, clock) = store(dir.path());
        let short = store.generate("old@example.org", 1, "").expect("short").key;
        store.generate("new@example.org", 365, "").expect("long");

        clock.advance(Duration::days(20));
        assert_eq!(store.cleanup_expired().expect("cleanup"), 0);
        clock.advance(Duration::days(20));
        assert_eq!(store.cleanup_expired().expect("cleanup"), 1);
        assert!(store.find_by_email("old@example.org").is_none());
        assert!(store.find_by_email("NEW@example.org").is_some());
        assert!(!store.list().iter().any(|key| key.key == short));
    }

    #[test]
    fn keys_created_elsewhere_are_picked_up() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (server, clock) = store(dir.path());
        let admin = ApiKeyStore::open(dir.path().join(API_KEYS_FILE), clock).expect("open");
        let key = admin.generate("c@example.org", 30, "").expect("generate").key;
        assert!(server.validate(&key).is_ok());
    }
}
