//! Event orchestrator: consumes the platform stream one event at a time and
//! routes each event through policy, consent, rate limiting and generation.
//!
//! All collaborators hang off [`BotContext`], which is built once at startup
//! and shared by reference with the scheduler and the handlers.

mod admin;
mod consent;
mod feed;
mod mention;
mod reminder;
mod respond;

use crate::clock::SharedClock;
use crate::config::AltbotConfig;
use crate::job::Generator;
use crate::localization::Localizer;
use crate::media::MediaFetcher;
use crate::metrics::Metrics;
use crate::platform::{Account, PlatformClient, PlatformEvent, Status, Visibility};
use crate::provider::SharedProvider;
use crate::rate_limit::{RateLimiter, RATE_LIMITER_FILE};
use crate::tables::Tables;
use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// External collaborators handed to [`BotContext::start`].
pub struct BotServices {
    pub platform: Arc<dyn PlatformClient>,
    pub provider: SharedProvider,
    pub fetcher: Arc<dyn MediaFetcher>,
    pub localizer: Localizer,
    pub clock: SharedClock,
}

pub struct BotContext {
    pub config: AltbotConfig,
    /// The bot's own account, as reported by the platform at startup.
    pub bot: Account,
    pub platform: Arc<dyn PlatformClient>,
    pub provider: SharedProvider,
    pub generator: Generator,
    pub localizer: Arc<Localizer>,
    pub tables: Arc<Tables>,
    pub rate_limiter: Arc<RateLimiter>,
    pub metrics: Arc<Metrics>,
    pub clock: SharedClock,
    reply_visibility: Visibility,
}

impl BotContext {
    /// Verifies the bot account, opens every table under `storage.data_dir`
    /// and wires the generator.
    pub async fn start(config: AltbotConfig, services: BotServices) -> Result<Arc<Self>> {
        let BotServices {
            platform,
            provider,
            fetcher,
            localizer,
            clock,
        } = services;
        let reply_visibility = config.behavior.visibility()?;
        let bot = platform
            .current_account()
            .await
            .context("failed to verify bot account")?;
        tracing::info!(bot_id = %bot.id, bot_acct = %bot.acct, "bot account verified");

        let metrics = Arc::new(Metrics::new());
        let tables = Arc::new(Tables::open(&config.storage.data_dir, clock.clone())?);
        let rate_limiter = Arc::new(RateLimiter::open(
            config.rate_limit.clone(),
            config.data_path(RATE_LIMITER_FILE),
            clock.clone(),
            platform.clone(),
            metrics.clone(),
        )?);
        let localizer = Arc::new(localizer);
        let generator = Generator::new(
            provider.clone(),
            fetcher,
            rate_limiter.clone(),
            localizer.clone(),
            metrics.clone(),
            config.image_processing.clone(),
            config.video_processing.clone(),
        );

        Ok(Arc::new(Self {
            config,
            bot,
            platform,
            provider,
            generator,
            localizer,
            tables,
            rate_limiter,
            metrics,
            clock,
            reply_visibility,
        }))
    }

    /// Drains `events` in arrival order until the stream ends or `cancel`
    /// fires. Handler errors are logged and never stop the loop.
    pub async fn run(self: Arc<Self>, mut events: mpsc::Receiver<PlatformEvent>, cancel: CancellationToken) {
        tracing::info!("waiting for mentions and follows");
        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => break,
                event = events.recv() => event,
            };
            let Some(event) = event else {
                tracing::warn!("event stream closed");
                break;
            };
            self.handle_event(event).await;
        }
        tracing::info!("orchestrator stopped");
    }

    pub async fn handle_event(&self, event: PlatformEvent) {
        let kind = event.kind();
        let outcome = match event {
            PlatformEvent::Mention { account, status } => self.handle_mention(account, status).await,
            PlatformEvent::Follow { account } => self.handle_follow(account).await,
            PlatformEvent::Update(status) => self.handle_update(status).await,
            PlatformEvent::Delete(status_id) => self.handle_delete(&status_id).await,
            PlatformEvent::Block { account_id } => {
                self.handle_block(&account_id);
                Ok(())
            }
            PlatformEvent::Error(message) => {
                tracing::warn!(%message, "stream error event");
                Ok(())
            }
        };
        if let Err(err) = outcome {
            tracing::warn!(error = ?err, event = kind, "event handler failed");
        }
    }

    pub fn bot_acct(&self) -> &str {
        &self.bot.acct
    }

    /// Status language, or the configured default.
    fn language_of(&self, status: &Status) -> String {
        status
            .language
            .as_deref()
            .map(str::trim)
            .filter(|lang| !lang.is_empty())
            .unwrap_or(&self.config.localization.default_language)
            .to_string()
    }
}
