use crate::clock::SharedClock;
use crate::persistence::JsonTable;
use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub const REMINDER_COOLDOWN_HOURS: i64 = 24;
pub const COOLDOWN_RETENTION_DAYS: i64 = 7;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AltTextWatch {
    pub author_id: String,
    pub queued_at: DateTime<Utc>,
}

/// post id → pending "did the author add alt-text?" check.
pub struct AltTextWatches {
    table: JsonTable<AltTextWatch>,
    clock: SharedClock,
}

impl AltTextWatches {
    pub fn open(path: impl Into<PathBuf>, clock: SharedClock) -> Result<Self> {
        Ok(Self {
            table: JsonTable::open("alt_text_watch", path)?,
            clock,
        })
    }

    pub fn queue(&self, post_id: &str, author_id: &str) {
        self.table.insert(
            post_id,
            AltTextWatch {
                author_id: author_id.to_string(),
                queued_at: self.clock.now(),
            },
        );
        tracing::debug!(post_id, author_id, "queued alt-text reminder check");
    }

    /// Watches whose delay has elapsed, oldest first.
    pub fn due(&self, delay: Duration) -> Vec<(String, AltTextWatch)> {
        let now = self.clock.now();
        let mut due: Vec<_> = self
            .table
            .entries()
            .into_iter()
            .filter(|(_, watch)| now - watch.queued_at >= delay)
            .collect();
        due.sort_by_key(|(_, watch)| watch.queued_at);
        due
    }

    pub fn contains(&self, post_id: &str) -> bool {
        self.table.contains(post_id)
    }

    pub fn remove(&self, post_id: &str) -> Option<AltTextWatch> {
        self.table.remove(post_id)
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

/// user id → when the bot last sent them a reminder.
pub struct ReminderCooldowns {
    table: JsonTable<DateTime<Utc>>,
    clock: SharedClock,
}

impl ReminderCooldowns {
    pub fn open(path: impl Into<PathBuf>, clock: SharedClock) -> Result<Self> {
        Ok(Self {
            table: JsonTable::open("reminder_cooldown", path)?,
            clock,
        })
    }

    pub fn ready(&self, user_id: &str) -> bool {
        match self.table.get(user_id) {
            Some(last) => self.clock.now() - last >= Duration::hours(REMINDER_COOLDOWN_HOURS),
            None => true,
        }
    }

    pub fn mark(&self, user_id: &str) {
        self.table.insert(user_id, self.clock.now());
    }

    pub fn prune(&self) -> usize {
        let cutoff = self.clock.now() - Duration::days(COOLDOWN_RETENTION_DAYS);
        self.table.retain(|_, last| *last > cutoff)
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
        Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()))
    }

    #[test]
    fn due_returns_only_elapsed_watches_in_queue_order() {
        let dir = tempfile::tempdir().expect("tempdir");
        let clock = clock();
        let watches = AltTextWatches::open(dir.path().join("w.json"), clock.clone()).expect("open");
        watches.queue("p2", "u1");
        clock.advance(Duration::minutes(5));
        watches.queue("p1", "u2");
        clock.advance(Duration::minutes(26));
        let due = watches.due(Duration::minutes(30));
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].0, "p2");
        clock.advance(Duration::minutes(10));
        let due: Vec<String> = watches
            .due(Duration::minutes(30))
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        assert_eq!(due, vec!["p2".to_string(), "p1".to_string()]);
    }

    #[test]
    fn cooldown_blocks_for_a_day_and_prunes_after_a_week() {
        let dir = tempfile::tempdir().expect("tempdir");
        let clock = clock();
        let cooldowns = ReminderCooldowns::open(dir.path().join("c.json"), clock.clone()).expect("open");
        assert!(cooldowns.ready("u1"));
        cooldowns.mark("u1");
        clock.advance(Duration::hours(23));
        assert!(!cooldowns.ready("u1"));
        clock.advance(Duration::hours(1));
        assert!(cooldowns.ready("u1"));
        assert_eq!(cooldowns.prune(), 0);
        clock.advance(Duration::days(7));
        assert_eq!(cooldowns.prune(), 1);
        assert!(cooldowns.is_empty());
    }
}
