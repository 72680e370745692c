use super::BotContext;
use crate::localization::keys;
use crate::platform::{Account, NewStatus, Status};
use crate::policy::{
    decide_mention, has_supported_media, is_admin, is_dni, is_legacy_consent, needs_alt_text,
    parse_admin_command, MentionDecision, SourceFacts,
};
use crate::utils::strip_html;
use anyhow::{Context, Result};

impl BotContext {
    pub(super) async fn handle_mention(&self, sender: Account, mention: Status) -> Result<()> {
        if is_dni(&sender, self.bot_acct(), &self.config.dni) {
            tracing::debug!(sender = %sender.acct, "ignoring mention from do-not-interact account");
            return Ok(());
        }
        let plain = strip_html(&mention.content);

        if is_admin(&sender, &self.config.rate_limit.admin_contact_handle) {
            if let Some(command) = parse_admin_command(&plain) {
                return self.handle_admin(command, &mention).await;
            }
        }

        let Some(parent_id) = mention.in_reply_to_id.clone() else {
            // Clients that drop the reply link still answer consent prompts.
            if self.resolve_direct_consent(&sender, &mention, &plain).await? {
                return Ok(());
            }
            tracing::debug!(sender = %sender.acct, "mention without a post to describe");
            return Ok(());
        };
        let parent = self
            .platform
            .get_status(&parent_id)
            .await
            .with_context(|| format!("failed to fetch status {parent_id}"))?;

        if parent.account.id == self.bot.id {
            if let Some(source_id) = parent.in_reply_to_id.as_deref() {
                if self.tables.legacy_consent.contains(source_id) {
                    return self.resolve_legacy_consent(source_id, &sender, &mention, &plain).await;
                }
            }
            if self.resolve_threaded_consent(&sender, &mention, &parent, &plain).await? {
                return Ok(());
            }
        }

        self.handle_source(parent, &sender, &mention).await
    }

    /// The mention's parent is the post whose media should be described.
    async fn handle_source(&self, source: Status, sender: &Account, mention: &Status) -> Result<()> {
        if source.account.id != sender.id && is_dni(&source.account, self.bot_acct(), &self.config.dni) {
            tracing::debug!(author = %source.account.acct, "source author opted out");
            return Ok(());
        }
        let capabilities = self.provider.capabilities();
        let facts = SourceFacts {
            sender_is_author: source.account.id == sender.id,
            sender_has_consent: self.tables.consent.has_consent(&sender.id),
            has_supported_media: has_supported_media(&source, &capabilities),
            needs_alt_text: needs_alt_text(&source, &capabilities),
            legacy_consent_enabled: self.config.behavior.ask_for_consent,
            legacy_request_open: self.tables.legacy_consent.contains(&source.id),
        };

        match decide_mention(facts) {
            MentionDecision::Ignore => Ok(()),
            MentionDecision::RequestConsent => {
                tracing::info!(user = %sender.acct, "consent required before describing media");
                let language = self.language_of(mention);
                self.request_consent(sender, Some(&mention.id), &language, false)
                    .await
            }
            MentionDecision::Generate => self.generate_and_reply(&source, &mention.id).await,
            MentionDecision::AskAuthor => self.ask_author(&source, sender, mention).await,
        }
    }

    /// Someone other than the author asked; check with the author first.
    async fn ask_author(&self, source: &Status, asker: &Account, mention: &Status) -> Result<()> {
        if !self.tables.legacy_consent.ask(&source.id, &mention.id) {
            return Ok(());
        }
        let language = self.language_of(mention);
        let body = format!(
            "@{} {}",
            source.account.acct,
            self.localizer
                .render(&language, keys::CONSENT_REQUEST, &[&asker.acct])
        );
        let request = NewStatus::new(body, source.visibility)
            .in_reply_to(&source.id)
            .language(Some(language));
        if let Err(err) = self.platform.post_status(request).await {
            self.tables.legacy_consent.remove(&source.id);
            return Err(err.context("failed to ask author for consent"));
        }
        self.metrics.record_consent_request();
        tracing::info!(
            author = %source.account.acct,
            asker = %asker.acct,
            source_id = %source.id,
            "asked author for consent"
        );
        Ok(())
    }

    /// The author answered a per-post consent question.
    async fn resolve_legacy_consent(
        &self,
        source_id: &str,
        sender: &Account,
        answer: &Status,
        plain: &str,
    ) -> Result<()> {
        let source = self
            .platform
            .get_status(source_id)
            .await
            .with_context(|| format!("failed to fetch status {source_id}"))?;
        if source.account.id != sender.id {
            tracing::warn!(
                sender = %sender.acct,
                author = %source.account.acct,
                "consent answer from someone other than the author"
            );
            return Ok(());
        }
        let request = self.tables.legacy_consent.remove(source_id);
        if !is_legacy_consent(plain) {
            tracing::info!(author = %sender.acct, source_id, "author declined");
            return Ok(());
        }

        // Covers this post only; the author's consent ledger entry is untouched.
        tracing::info!(author = %sender.acct, source_id, "author approved this post");
        let reply_target = request
            .map(|request| request.asker_post_id)
            .unwrap_or_else(|| answer.id.clone());
        self.generate_and_reply(&source, &reply_target).await
    }
}
