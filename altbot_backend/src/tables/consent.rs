use crate::clock::SharedClock;
use crate::persistence::JsonTable;
use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Days an unanswered consent prompt stays matchable.
pub const PENDING_CONSENT_TTL_DAYS: i64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsentMethod {
    /// Affirmative answer to a consent prompt.
    Explicit,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsentRecord {
    pub granted_at: DateTime<Utc>,
    pub method: ConsentMethod,
}

/// user id → consent. Absence means none of the user's posts may be processed.
pub struct ConsentLedger {
    table: JsonTable<ConsentRecord>,
    clock: SharedClock,
}

impl ConsentLedger {
    pub fn open(path: impl Into<PathBuf>, clock: SharedClock) -> Result<Self> {
        Ok(Self {
            table: JsonTable::open("consent", path)?,
            clock,
        })
    }

    pub fn has_consent(&self, user_id: &str) -> bool {
        self.table.contains(user_id)
    }

    pub fn get(&self, user_id: &str) -> Option<ConsentRecord> {
        self.table.get(user_id)
    }

    /// Records consent. An existing record is kept as it is.
    pub fn grant(&self, user_id: &str, method: ConsentMethod) -> bool {
        let record = ConsentRecord {
            granted_at: self.clock.now(),
            method,
        };
        let stored = self.table.insert_if_absent(user_id, record);
        if stored {
            tracing::info!(user_id, method = ?method, "consent recorded");
        }
        stored
    }

    pub fn revoke(&self, user_id: &str) -> bool {
        let removed = self.table.remove(user_id).is_some();
        if removed {
            tracing::info!(user_id, "consent revoked");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingConsentRequest {
    pub request_post_id: String,
    pub issued_at: DateTime<Utc>,
}

/// user id → outstanding consent prompt. Lets the bot match a bare direct
/// message to the prompt it answers.
pub struct PendingConsent {
    table: JsonTable<PendingConsentRequest>,
    clock: SharedClock,
}

impl PendingConsent {
    pub fn open(path: impl Into<PathBuf>, clock: SharedClock) -> Result<Self> {
        Ok(Self {
            table: JsonTable::open("pending_consent", path)?,
            clock,
        })
    }

    pub fn issue(&self, user_id: &str, request_post_id: &str) {
        self.table.insert(
            user_id,
            PendingConsentRequest {
                request_post_id: request_post_id.to_string(),
                issued_at: self.clock.now(),
            },
        );
    }

    fn expired(&self, request: &PendingConsentRequest, now: DateTime<Utc>) -> bool {
        now - request.issued_at > Duration::days(PENDING_CONSENT_TTL_DAYS)
    }

    /// Live request for `user_id`. An expired entry is dropped on sight.
    pub fn get(&self, user_id: &str) -> Option<PendingConsentRequest> {
        let request = self.table.get(user_id)?;
        if self.expired(&request, self.clock.now()) {
            self.table.remove(user_id);
            return None;
        }
        Some(request)
    }

    pub fn remove(&self, user_id: &str) -> Option<PendingConsentRequest> {
        self.table.remove(user_id)
    }

    pub fn prune_expired(&self) -> usize {
        let now = self.clock.now();
        self.table.retain(|_, request| !self.expired(request, now))
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::TimeZone;
    use std::sync::Arc;

    fn clock() -> Arc<ManualClock> {
        Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap()))
    }

    #[test]
    fn grant_is_idempotent_and_revocable() {
        let dir = tempfile::tempdir().expect("tempdir");
        let clock = clock();
        let ledger = ConsentLedger::open(dir.path().join("c.json"), clock.clone()).expect("open");
        assert!(!ledger.has_consent("u1"));
        assert!(ledger.grant("u1", ConsentMethod::Explicit));
        clock.advance(Duration::hours(1));
        assert!(!ledger.grant("u1", ConsentMethod::Explicit));
        let record = ledger.get("u1").expect("record");
        assert_eq!(record.method, ConsentMethod::Explicit);
        assert!(ledger.revoke("u1"));
        assert!(!ledger.has_consent("u1"));
        assert!(!ledger.revoke("u1"));
    }

    #[test]
    fn ledger_reloads_from_disk() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("c.json");
        let clock = clock();
        ConsentLedger::open(&path, clock.clone())
            .expect("open")
            .grant("u9", ConsentMethod::Explicit);
        let reopened = ConsentLedger::open(&path, clock).expect("reopen");
        assert!(reopened.has_consent("u9"));
    }

    #[test]
    fn pending_request_expires_lazily_after_thirty_days() {
        let dir = tempfile::tempdir().expect("tempdir");
        let clock = clock();
        let pending = PendingConsent::open(dir.path().join("p.json"), clock.clone()).expect("open");
        pending.issue("u1", "post-1");
        clock.advance(Duration::days(29));
        assert_eq!(pending.get("u1").expect("live").request_post_id, "post-1");
        clock.advance(Duration::days(2));
        assert!(pending.get("u1").is_none());
        assert!(pending.is_empty());
    }

    #[test]
    fn prune_without_expired_entries_is_a_noop() {
        let dir = tempfile::tempdir().expect("tempdir");
        let clock = clock();
        let pending = PendingConsent::open(dir.path().join("p.json"), clock.clone()).expect("open");
        pending.issue("u1", "a");
        pending.issue("u2", "b");
        assert_eq!(pending.prune_expired(), 0);
        assert_eq!(pending.len(), 2);
        clock.advance(Duration::days(31));
        pending.issue("u3", "c");
        assert_eq!(pending.prune_expired(), 2);
        assert!(pending.get("u3").is_some());
    }
}
