use super::BotContext;
use crate::platform::{NewStatus, Status, Visibility};
use crate::policy::AdminCommand;
use anyhow::{Context, Result};

impl BotContext {
    pub(super) async fn handle_admin(&self, command: AdminCommand, mention: &Status) -> Result<()> {
        match command {
            AdminCommand::Unban { user_id } => {
                let was_banned = self.rate_limiter.unban(&user_id);
                self.metrics.record_unban();
                tracing::info!(user_id = %user_id, was_banned, "admin unban");

                let admin = self.config.rate_limit.admin_contact_handle.trim().trim_start_matches('@');
                let body = format!("@{admin} User {user_id} has been unbanned and added to the whitelist.");
                self.platform
                    .post_status(NewStatus::new(body, Visibility::Direct).in_reply_to(&mention.id))
                    .await
                    .context("failed to confirm unban")?;
                Ok(())
            }
        }
    }
}
