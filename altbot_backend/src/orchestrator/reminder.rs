use super::BotContext;
use crate::localization::keys;
use crate::platform::{NewStatus, Visibility};
use crate::policy::needs_alt_text;
use chrono::Duration;

impl BotContext {
    /// Checks every watch whose delay has passed. Each due watch is removed
    /// whether or not a reminder goes out. Returns the number sent.
    pub async fn send_due_reminders(&self) -> usize {
        let delay = Duration::from_std(self.config.alt_text_reminders.delay()).unwrap_or_else(|_| Duration::days(365));
        let capabilities = self.provider.capabilities();
        let mut sent = 0;

        for (post_id, watch) in self.tables.watches.due(delay) {
            self.tables.watches.remove(&post_id);
            let post = match self.platform.get_status(&post_id).await {
                Ok(post) => post,
                Err(err) => {
                    tracing::warn!(error = ?err, post_id = %post_id, "dropping reminder for unreadable post");
                    continue;
                }
            };
            if !needs_alt_text(&post, &capabilities) {
                continue;
            }
            if !self.tables.cooldowns.ready(&watch.author_id) {
                tracing::debug!(user_id = %watch.author_id, "reminder cooldown active");
                continue;
            }

            let language = self.language_of(&post);
            let body = self
                .localizer
                .render(&language, keys::ALT_TEXT_REMINDER, &[&post.account.acct]);
            let reminder = NewStatus::new(body, Visibility::Direct)
                .in_reply_to(&post.id)
                .language(Some(language));
            match self.platform.post_status(reminder).await {
                Ok(_) => {
                    self.tables.cooldowns.mark(&watch.author_id);
                    self.metrics.record_reminder();
                    sent += 1;
                    tracing::info!(user = %post.account.acct, post_id = %post.id, "alt-text reminder sent");
                }
                Err(err) => {
                    tracing::warn!(error = ?err, post_id = %post.id, "failed to send alt-text reminder");
                }
            }
        }
        sent
    }
}
