use super::BotContext;
use crate::platform::{Account, Status};
use crate::policy::{decide_update, is_dni, needs_alt_text, UpdateDecision};
use anyhow::{Context, Result};

impl BotContext {
    pub(super) async fn handle_follow(&self, account: Account) -> Result<()> {
        if is_dni(&account, self.bot_acct(), &self.config.dni) {
            tracing::debug!(user = %account.acct, "not greeting do-not-interact follower");
            return Ok(());
        }
        tracing::info!(user = %account.acct, "new follower");

        if !self.tables.consent.has_consent(&account.id) {
            let language = self.config.localization.default_language.clone();
            if let Err(err) = self.request_consent(&account, None, &language, true).await {
                tracing::warn!(error = ?err, user = %account.acct, "failed to welcome follower");
            }
        }

        if self.config.behavior.follow_back {
            self.platform
                .follow(&account.id)
                .await
                .with_context(|| format!("failed to follow back {}", account.acct))?;
            self.metrics.record_follow();
            tracing::info!(user = %account.acct, "followed back");
        }
        Ok(())
    }

    /// A followed account posted something.
    pub(super) async fn handle_update(&self, status: Status) -> Result<()> {
        let author = &status.account;
        if author.id == self.bot.id || is_dni(author, self.bot_acct(), &self.config.dni) {
            return Ok(());
        }
        let decision = decide_update(
            needs_alt_text(&status, &self.provider.capabilities()),
            self.tables.consent.has_consent(&author.id),
            self.tables.pending_consent.get(&author.id).is_some(),
        );
        match decision {
            UpdateDecision::Ignore => Ok(()),
            UpdateDecision::RequestConsent => {
                let language = self.language_of(&status);
                self.request_consent(author, Some(&status.id), &language, false)
                    .await
            }
            UpdateDecision::Generate => self.generate_and_reply(&status, &status.id).await,
        }
    }

    /// Removes the bot's reply when the post it answered disappears.
    pub(super) async fn handle_delete(&self, status_id: &str) -> Result<()> {
        self.tables.watches.remove(status_id);
        let Some(entry) = self.tables.request_replies.remove(status_id) else {
            return Ok(());
        };
        self.platform
            .delete_status(&entry.reply_id)
            .await
            .with_context(|| format!("failed to delete reply {}", entry.reply_id))?;
        tracing::info!(source_id = status_id, reply_id = %entry.reply_id, "deleted reply to removed post");
        Ok(())
    }
}
