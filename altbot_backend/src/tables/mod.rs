//! Correlation tables joining platform ids to bot-side state.
//!
//! Each table has its own lock and its own snapshot file; no operation spans
//! two tables.

pub mod alt_text_watch;
pub mod consent;
pub mod legacy_consent;
pub mod request_reply;

use crate::clock::SharedClock;
use anyhow::Result;
use std::path::Path;

pub use alt_text_watch::{AltTextWatch, AltTextWatches, ReminderCooldowns};
pub use consent::{ConsentLedger, ConsentMethod, ConsentRecord, PendingConsent, PendingConsentRequest};
pub use legacy_consent::{LegacyConsentRequest, LegacyConsentRequests};
pub use request_reply::{RequestReplies, RequestReply};

pub const CONSENT_FILE: &str = "consent_database.json";
pub const PENDING_CONSENT_FILE: &str = "pending_gdpr_requests.json";
pub const REQUEST_REPLY_FILE: &str = "reply_map.json";
pub const ALT_TEXT_WATCH_FILE: &str = "alt_text_checks.json";
pub const REMINDER_COOLDOWN_FILE: &str = "reminder_cooldowns.json";
pub const LEGACY_CONSENT_FILE: &str = "consent_requests.json";

pub struct Tables {
    pub consent: ConsentLedger,
    pub pending_consent: PendingConsent,
    pub request_replies: RequestReplies,
    pub watches: AltTextWatches,
    pub cooldowns: ReminderCooldowns,
    pub legacy_consent: LegacyConsentRequests,
}

impl Tables {
    pub fn open(data_dir: &Path, clock: SharedClock) -> Result<Self> {
        let tables = Self {
            consent: ConsentLedger::open(data_dir.join(CONSENT_FILE), clock.clone())?,
            pending_consent: PendingConsent::open(data_dir.join(PENDING_CONSENT_FILE), clock.clone())?,
            request_replies: RequestReplies::open(data_dir.join(REQUEST_REPLY_FILE), clock.clone())?,
            watches: AltTextWatches::open(data_dir.join(ALT_TEXT_WATCH_FILE), clock.clone())?,
            cooldowns: ReminderCooldowns::open(data_dir.join(REMINDER_COOLDOWN_FILE), clock.clone())?,
            legacy_consent: LegacyConsentRequests::open(data_dir.join(LEGACY_CONSENT_FILE), clock)?,
        };
        tracing::info!(
            consented_users = tables.consent.len(),
            pending_consent = tables.pending_consent.len(),
            tracked_replies = tables.request_replies.len(),
            queued_reminders = tables.watches.len(),
            "correlation tables loaded"
        );
        Ok(tables)
    }
}
