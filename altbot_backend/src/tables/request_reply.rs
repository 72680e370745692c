use crate::clock::SharedClock;
use crate::persistence::JsonTable;
use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Deleting a source post more than an hour later leaves the bot's reply up.
pub const REQUEST_REPLY_TTL_MINUTES: i64 = 60;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestReply {
    pub reply_id: String,
    pub created_at: DateTime<Utc>,
}

/// source post id → the bot's reply, for delete cascades.
pub struct RequestReplies {
    table: JsonTable<RequestReply>,
    clock: SharedClock,
}

impl RequestReplies {
    pub fn open(path: impl Into<PathBuf>, clock: SharedClock) -> Result<Self> {
        Ok(Self {
            table: JsonTable::open("request_reply", path)?,
            clock,
        })
    }

    /// Last write wins.
    pub fn record(&self, source_id: &str, reply_id: &str) {
        self.table.insert(
            source_id,
            RequestReply {
                reply_id: reply_id.to_string(),
                created_at: self.clock.now(),
            },
        );
    }

    pub fn get(&self, source_id: &str) -> Option<RequestReply> {
        self.table.get(source_id)
    }

    pub fn remove(&self, source_id: &str) -> Option<RequestReply> {
        self.table.remove(source_id)
    }

    pub fn prune_expired(&self) -> usize {
        let cutoff = self.clock.now() - Duration::minutes(REQUEST_REPLY_TTL_MINUTES);
        self.table.retain(|_, entry| entry.created_at > cutoff)
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}
