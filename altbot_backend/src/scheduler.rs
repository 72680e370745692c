//! Coarse timers for counter resets, table pruning and reminders.

use crate::orchestrator::BotContext;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

pub const MINUTE: Duration = Duration::from_secs(60);
pub const HOUR: Duration = Duration::from_secs(60 * 60);
pub const REPLY_PRUNE_INTERVAL: Duration = Duration::from_secs(10 * 60);
pub const COOLDOWN_PRUNE_INTERVAL: Duration = Duration::from_secs(6 * 60 * 60);
pub const PENDING_CONSENT_PRUNE_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);
pub const REMINDER_POLL_INTERVAL: Duration = MINUTE;

/// Runs `tick` every `period` until `cancel` fires. The first run happens one
/// full period after spawning.
pub fn spawn_ticker<F, Fut>(name: &'static str, period: Duration, cancel: CancellationToken, mut tick: F) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send,
{
    tokio::spawn(async move {
        let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => tick().await,
            }
        }
        tracing::debug!(task = name, "scheduled task stopped");
    })
}

/// Starts every periodic task for the bot.
pub fn spawn_all(ctx: Arc<BotContext>, cancel: &CancellationToken) -> Vec<JoinHandle<()>> {
    let mut tasks = Vec::new();

    let limiter = ctx.rate_limiter.clone();
    tasks.push(spawn_ticker("minute-reset", MINUTE, cancel.clone(), move || {
        limiter.reset_minute();
        async {}
    }));

    let limiter = ctx.rate_limiter.clone();
    let metrics = ctx.metrics.clone();
    tasks.push(spawn_ticker("hour-reset", HOUR, cancel.clone(), move || {
        limiter.reset_hour();
        metrics.log_summary();
        async {}
    }));

    let tables = ctx.tables.clone();
    tasks.push(spawn_ticker("reply-prune", REPLY_PRUNE_INTERVAL, cancel.clone(), move || {
        let removed = tables.request_replies.prune_expired();
        if removed > 0 {
            tracing::info!(removed, "pruned reply correlations");
        }
        async {}
    }));

    let tables = ctx.tables.clone();
    tasks.push(spawn_ticker("legacy-consent-prune", HOUR, cancel.clone(), move || {
        let removed = tables.legacy_consent.prune_expired();
        if removed > 0 {
            tracing::info!(removed, "pruned per-post consent requests");
        }
        async {}
    }));

    let tables = ctx.tables.clone();
    tasks.push(spawn_ticker(
        "pending-consent-prune",
        PENDING_CONSENT_PRUNE_INTERVAL,
        cancel.clone(),
        move || {
            let removed = tables.pending_consent.prune_expired();
            if removed > 0 {
                tracing::info!(removed, "pruned expired consent requests");
            }
            async {}
        },
    ));

    let tables = ctx.tables.clone();
    tasks.push(spawn_ticker("cooldown-prune", COOLDOWN_PRUNE_INTERVAL, cancel.clone(), move || {
        let removed = tables.cooldowns.prune();
        if removed > 0 {
            tracing::info!(removed, "pruned reminder cooldowns");
        }
        async {}
    }));

    if ctx.config.alt_text_reminders.enabled {
        let reminders = ctx.clone();
        tasks.push(spawn_ticker("alt-text-reminders", REMINDER_POLL_INTERVAL, cancel.clone(), move || {
            let ctx = reminders.clone();
            async move {
                ctx.send_due_reminders().await;
            }
        }));
    }

    tracing::info!(tasks = tasks.len(), "scheduled tasks started");
    tasks
}
