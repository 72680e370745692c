use crate::provider::MediaKind;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Process-lifetime counters. Nothing here is persisted.
#[derive(Debug, Default)]
pub struct Metrics {
    requests: AtomicU64,
    images: AtomicU64,
    videos: AtomicU64,
    audio: AtomicU64,
    failures: AtomicU64,
    rate_limit_hits: AtomicU64,
    shadow_bans: AtomicU64,
    unbans: AtomicU64,
    consent_requests: AtomicU64,
    consent_grants: AtomicU64,
    follows: AtomicU64,
    reminders: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub requests: u64,
    pub images: u64,
    pub videos: u64,
    pub audio: u64,
    pub failures: u64,
    pub rate_limit_hits: u64,
    pub shadow_bans: u64,
    pub unbans: u64,
    pub consent_requests: u64,
    pub consent_grants: u64,
    pub follows: u64,
    pub reminders: u64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_request(&self, user_id: &str) {
        bump(&self.requests);
        tracing::debug!(user_id, "generation request");
    }

    pub fn record_generation(&self, kind: MediaKind) {
        match kind {
            MediaKind::Image => bump(&self.images),
            MediaKind::Video => bump(&self.videos),
            MediaKind::Audio => bump(&self.audio),
        }
    }

    pub fn record_failure(&self) {
        bump(&self.failures);
    }

    pub fn record_rate_limit_hit(&self, user_id: &str) {
        bump(&self.rate_limit_hits);
        tracing::info!(user_id, "request rate limited");
    }

    pub fn record_shadow_ban(&self) {
        bump(&self.shadow_bans);
    }

    pub fn record_unban(&self) {
        bump(&self.unbans);
    }

    pub fn record_consent_request(&self) {
        bump(&self.consent_requests);
    }

    pub fn record_consent_grant(&self) {
        bump(&self.consent_grants);
    }

    pub fn record_follow(&self) {
        bump(&self.follows);
    }

    pub fn record_reminder(&self) {
        bump(&self.reminders);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        MetricsSnapshot {
            requests: load(&self.requests),
            images: load(&self.images),
            videos: load(&self.videos),
            audio: load(&self.audio),
            failures: load(&self.failures),
            rate_limit_hits: load(&self.rate_limit_hits),
            shadow_bans: load(&self.shadow_bans),
            unbans: load(&self.unbans),
            consent_requests: load(&self.consent_requests),
            consent_grants: load(&self.consent_grants),
            follows: load(&self.follows),
            reminders: load(&self.reminders),
        }
    }

    pub fn log_summary(&self) {
        let snapshot = self.snapshot();
        tracing::info!(
            requests = snapshot.requests,
            images = snapshot.images,
            videos = snapshot.videos,
            audio = snapshot.audio,
            failures = snapshot.failures,
            rate_limit_hits = snapshot.rate_limit_hits,
            shadow_bans = snapshot.shadow_bans,
            consent_grants = snapshot.consent_grants,
            follows = snapshot.follows,
            reminders = snapshot.reminders,
            "activity summary"
        );
    }
}
