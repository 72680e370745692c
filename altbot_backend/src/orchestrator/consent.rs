use super::BotContext;
use crate::localization::keys;
use crate::platform::{Account, NewStatus, Status, Visibility};
use crate::policy::contains_affirmative;
use crate::tables::ConsentMethod;
use anyhow::{Context, Result};

impl BotContext {
    fn privacy_policy_url(&self) -> &str {
        self.config.behavior.privacy_policy_url.trim()
    }

    /// Consent prompt text. The privacy policy link must be present so that
    /// threaded answers can be recognised later.
    fn consent_prompt(&self, language: &str) -> String {
        let url = self.privacy_policy_url();
        let prompt = self
            .localizer
            .render(language, keys::GDPR_CONSENT_REQUEST, &[url]);
        if prompt.contains(url) {
            prompt
        } else {
            format!("{prompt}\n\n{url}")
        }
    }

    /// Sends the consent DM and remembers it for clients that answer without
    /// a reply link. `welcome` prepends the follower greeting.
    pub(super) async fn request_consent(
        &self,
        account: &Account,
        reply_to: Option<&str>,
        language: &str,
        welcome: bool,
    ) -> Result<()> {
        let prompt = self.consent_prompt(language);
        let body = if welcome {
            format!(
                "@{} {}\n\n{}",
                account.acct,
                self.localizer.response(language, keys::GDPR_WELCOME),
                prompt
            )
        } else {
            format!("@{} {}", account.acct, prompt)
        };
        let mut request = NewStatus::new(body, Visibility::Direct).language(Some(language.to_string()));
        if let Some(reply_to) = reply_to {
            request = request.in_reply_to(reply_to);
        }
        let posted = self
            .platform
            .post_status(request)
            .await
            .context("failed to send consent request")?;
        self.tables.pending_consent.issue(&account.id, &posted.id);
        self.metrics.record_consent_request();
        tracing::info!(user = %account.acct, request_id = %posted.id, "consent request sent");
        Ok(())
    }

    /// Threaded path: `parent` is a bot post carrying the privacy policy link.
    pub(super) async fn resolve_threaded_consent(
        &self,
        sender: &Account,
        answer: &Status,
        parent: &Status,
        plain: &str,
    ) -> Result<bool> {
        let url = self.privacy_policy_url();
        if url.is_empty() || !parent.content.contains(url) {
            return Ok(false);
        }
        if !contains_affirmative(plain) {
            tracing::debug!(user = %sender.acct, "reply to consent prompt without an affirmative");
            return Ok(false);
        }
        self.record_explicit_consent(sender, answer).await;
        Ok(true)
    }

    /// Non-threaded path: a direct message with no reply link from a user who
    /// has an open consent request.
    pub(super) async fn resolve_direct_consent(&self, sender: &Account, answer: &Status, plain: &str) -> Result<bool> {
        if answer.in_reply_to_id.is_some() || answer.visibility != Visibility::Direct {
            return Ok(false);
        }
        if self.tables.pending_consent.get(&sender.id).is_none() {
            return Ok(false);
        }
        if !contains_affirmative(plain) {
            return Ok(false);
        }
        self.record_explicit_consent(sender, answer).await;
        Ok(true)
    }

    /// The record is written before the confirmation goes out, so a failed
    /// confirmation never leaves the user unauthorised.
    async fn record_explicit_consent(&self, sender: &Account, answer: &Status) {
        self.tables.consent.grant(&sender.id, ConsentMethod::Explicit);
        self.tables.pending_consent.remove(&sender.id);
        self.metrics.record_consent_grant();
        tracing::info!(user = %sender.acct, "explicit consent recorded");

        let language = self.language_of(answer);
        let body = format!(
            "@{} {}",
            sender.acct,
            self.localizer
                .response(&language, keys::GDPR_CONSENT_CONFIRMATION)
        );
        let confirmation = NewStatus::new(body, Visibility::Direct)
            .in_reply_to(&answer.id)
            .language(Some(language));
        if let Err(err) = self.platform.post_status(confirmation).await {
            tracing::warn!(error = ?err, user = %sender.acct, "failed to send consent confirmation");
        }
    }

    /// Blocking the bot withdraws consent.
    pub(super) fn handle_block(&self, account_id: &str) {
        let revoked = self.tables.consent.revoke(account_id);
        self.tables.pending_consent.remove(account_id);
        tracing::info!(user_id = account_id, revoked, "account blocked the bot");
    }
}
