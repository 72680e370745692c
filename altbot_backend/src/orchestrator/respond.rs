use super::BotContext;
use crate::platform::{NewStatus, Status, Visibility};
use crate::policy::needs_alt_text;
use crate::reply::{assemble_body, content_warning, fallback_body, reply_visibility, ReplyContext};
use anyhow::{Context, Result};

impl BotContext {
    /// Describes `source` and posts the result under `reply_target_id`.
    pub(crate) async fn generate_and_reply(&self, source: &Status, reply_target_id: &str) -> Result<()> {
        let target = if reply_target_id == source.id {
            source.clone()
        } else {
            self.platform
                .get_status(reply_target_id)
                .await
                .with_context(|| format!("failed to fetch reply target {reply_target_id}"))?
        };
        let language = self.language_of(&target);

        let elements = self
            .generator
            .describe(source, &target.account.id, &language)
            .await;
        if elements.is_empty() {
            return Ok(());
        }

        let model_label = self.provider.model_label();
        let ctx = ReplyContext {
            author_acct: &target.account.acct,
            bot_username: self.bot_acct(),
            model_label: &model_label,
            provider_is_local: self.provider.is_local(),
            energy_watts: self
                .config
                .power_metrics
                .enabled
                .then_some(self.config.power_metrics.gpu_watts),
            language: &language,
        };
        let body = assemble_body(&elements, &ctx, &self.localizer);
        let visibility = reply_visibility(self.reply_visibility, source.visibility.max(target.visibility));

        let reply = NewStatus::new(body, visibility)
            .in_reply_to(&target.id)
            .language(Some(language.clone()))
            .spoiler(content_warning(&source.spoiler_text));
        match self.platform.post_status(reply).await {
            Ok(posted) => {
                self.tables.request_replies.record(&source.id, &posted.id);
                tracing::info!(
                    source_id = %source.id,
                    reply_id = %posted.id,
                    elements = elements.len(),
                    %visibility,
                    "alt-text reply posted"
                );
                self.watch_for_alt_text(source, visibility);
            }
            Err(err) => {
                tracing::warn!(error = ?err, source_id = %source.id, "failed to post alt-text reply");
                let fallback = NewStatus::new(fallback_body(&target.account.acct, &language, &self.localizer), visibility)
                    .in_reply_to(&target.id)
                    .language(Some(language.clone()));
                if let Err(err) = self.platform.post_status(fallback).await {
                    tracing::error!(error = ?err, source_id = %source.id, "fallback reply failed too");
                }
            }
        }
        Ok(())
    }

    /// Queues a reminder for the author if their post still lacks alt-text.
    fn watch_for_alt_text(&self, source: &Status, visibility: Visibility) {
        if !self.config.alt_text_reminders.enabled || visibility == Visibility::Direct {
            return;
        }
        if !self.tables.consent.has_consent(&source.account.id) {
            return;
        }
        if needs_alt_text(source, &self.provider.capabilities()) {
            self.tables.watches.queue(&source.id, &source.account.id);
        }
    }
}
