use crate::clock::SharedClock;
use crate::persistence::JsonTable;
use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub const LEGACY_CONSENT_TTL_DAYS: i64 = 30;

/// A per-post question to the author on behalf of someone else.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LegacyConsentRequest {
    /// The mention that asked for the description; the eventual reply goes there.
    pub asker_post_id: String,
    pub asked_at: DateTime<Utc>,
}

/// source post id → outstanding legacy consent question.
pub struct LegacyConsentRequests {
    table: JsonTable<LegacyConsentRequest>,
    clock: SharedClock,
}

impl LegacyConsentRequests {
    pub fn open(path: impl Into<PathBuf>, clock: SharedClock) -> Result<Self> {
        Ok(Self {
            table: JsonTable::open("legacy_consent", path)?,
            clock,
        })
    }

    /// Stores the request unless one is already open for the same post.
    pub fn ask(&self, source_id: &str, asker_post_id: &str) -> bool {
        self.table.insert_if_absent(
            source_id,
            LegacyConsentRequest {
                asker_post_id: asker_post_id.to_string(),
                asked_at: self.clock.now(),
            },
        )
    }

    pub fn contains(&self, source_id: &str) -> bool {
        self.table.contains(source_id)
    }

    pub fn get(&self, source_id: &str) -> Option<LegacyConsentRequest> {
        self.table.get(source_id)
    }

    pub fn remove(&self, source_id: &str) -> Option<LegacyConsentRequest> {
        self.table.remove(source_id)
    }

    pub fn prune_expired(&self) -> usize {
        let cutoff = self.clock.now() - Duration::days(LEGACY_CONSENT_TTL_DAYS);
        self.table.retain(|_, request| request.asked_at > cutoff)
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

    #[test]
    fn one_open_request_per_post() {
        let dir = tempfile::tempdir().expect("tempdir");
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap()));
        let requests = LegacyConsentRequests::open(dir.path().join("l.json"), clock.clone()).expect("open");
        assert!(requests.ask("s1", "m1"));
        assert!(!requests.ask("s1", "m2"));
        assert_eq!(requests.get("s1").expect("entry").asker_post_id, "m1");

        clock.advance(Duration::days(31));
        assert_eq!(requests.prune_expired(), 1);
        assert!(!requests.contains("s1"));
    }
}
