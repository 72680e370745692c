use crate::api::{self, AltTextQueue, AppState};
use crate::api_keys::{ApiKeyStore, API_KEYS_FILE};
use crate::clock::SystemClock;
use crate::config::AltbotConfig;
use crate::localization::Localizer;
use crate::media::HttpMediaFetcher;
use crate::orchestrator::{BotContext, BotServices};
use crate::platform::{MastodonClient, PlatformClient};
use crate::provider::{self, MediaKind};
use crate::scheduler;
use anyhow::{Context, Result};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Wires the production collaborators together once and owns the running
/// bot until shutdown.
pub struct AltbotNode {
    ctx: Arc<BotContext>,
    cancel: CancellationToken,
}

impl AltbotNode {
    /// Connects to the platform, selects the model provider and opens every
    /// persistent table.
    pub async fn start(config: AltbotConfig) -> Result<Self> {
        config.validate()?;

        let platform: Arc<dyn PlatformClient> = Arc::new(MastodonClient::new(
            &config.server.mastodon_server,
            &config.server.access_token,
        )?);
        let localizer = Localizer::from_config(&config)?;
        let provider = provider::with_translation_layer(provider::from_config(&config)?, &config, &localizer)?;
        let fetcher = Arc::new(HttpMediaFetcher::new()?);
        std::fs::create_dir_all(&config.storage.data_dir).with_context(|| {
            format!(
                "failed to create data directory {}",
                config.storage.data_dir.display()
            )
        })?;

        let ctx = BotContext::start(
            config,
            BotServices {
                platform,
                provider,
                fetcher,
                localizer,
                clock: Arc::new(SystemClock),
            },
        )
        .await?;
        log_startup_status(&ctx);

        Ok(Self {
            ctx,
            cancel: CancellationToken::new(),
        })
    }

    pub fn context(&self) -> Arc<BotContext> {
        self.ctx.clone()
    }

    /// Token that stops the stream, the scheduler and the API server.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Processes events until Ctrl-C or the stream ends.
    pub async fn run(self) -> Result<()> {
        let cancel = self.cancel.clone();
        let ctx = self.ctx.clone();

        let events = ctx
            .platform
            .stream_user(cancel.clone())
            .await
            .context("failed to open user stream")?;
        let mut tasks = scheduler::spawn_all(ctx.clone(), &cancel);

        if ctx.config.api.enabled {
            let keys = Arc::new(ApiKeyStore::open(
                ctx.config.data_path(API_KEYS_FILE),
                ctx.clock.clone(),
            )?);
            let (queue, worker) = AltTextQueue::spawn(
                ctx.provider.clone(),
                ctx.localizer.clone(),
                ctx.config.image_processing.downscale_width,
                cancel.clone(),
            );
            tasks.push(worker);
            let state = AppState {
                keys,
                queue,
                monthly_limit: ctx.config.api.monthly_limit,
            };
            let port = ctx.config.api.port;
            let server_cancel = cancel.clone();
            tasks.push(tokio::spawn(async move {
                if let Err(err) = api::serve_http(state, port, server_cancel).await {
                    tracing::error!(error = ?err, "API server failed");
                }
            }));
        }

        let signal_cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = signal_cancel.cancelled() => {}
                result = tokio::signal::ctrl_c() => {
                    if let Err(err) = result {
                        tracing::warn!(error = ?err, "failed to listen for Ctrl-C");
                        return;
                    }
                    tracing::info!("shutdown requested");
                    signal_cancel.cancel();
                }
            }
        });

        ctx.clone().run(events, cancel.clone()).await;
        cancel.cancel();
        for task in tasks {
            if let Err(err) = task.await {
                tracing::warn!(error = ?err, "background task ended abnormally");
            }
        }
        if let Err(err) = ctx.provider.close().await {
            tracing::warn!(error = ?err, "failed to close model provider");
        }
        ctx.metrics.log_summary();
        tracing::info!("altbot stopped");
        Ok(())
    }
}

fn on_off(enabled: bool) -> &'static str {
    if enabled {
        "enabled"
    } else {
        "disabled"
    }
}

fn log_startup_status(ctx: &BotContext) {
    let config = &ctx.config;
    let capabilities = ctx.provider.capabilities();

    tracing::info!(
        server = %config.server.mastodon_server,
        bot = %ctx.bot.acct,
        "connected to platform"
    );
    tracing::info!(
        provider = ctx.provider.name(),
        model = %ctx.provider.model_label(),
        local = ctx.provider.is_local(),
        "model provider ready"
    );
    tracing::info!(
        video = capabilities.supports(MediaKind::Video),
        audio = capabilities.supports(MediaKind::Audio),
        "media support"
    );
    if config.llm.use_translation_layer && ctx.provider.is_local() {
        tracing::info!("translation layer active for non-English requests");
    }
    if ctx.localizer.has_prompt_override() {
        tracing::info!("prompt override active");
    }
    if ctx.localizer.has_prompt_addition() {
        tracing::info!("additional prompt instructions active");
    }
    tracing::info!(
        status = on_off(config.alt_text_reminders.enabled),
        delay_minutes = config.alt_text_reminders.reminder_time,
        "alt-text reminders"
    );
    tracing::info!(
        status = on_off(config.rate_limit.enabled),
        per_minute = config.rate_limit.max_requests_per_user_per_minute,
        per_hour = config.rate_limit.max_requests_per_user_per_hour,
        "rate limiting"
    );
    tracing::info!(
        per_post_consent = on_off(config.behavior.ask_for_consent),
        privacy_policy = %config.behavior.privacy_policy_url,
        "consent"
    );
    tracing::info!(
        status = on_off(config.api.enabled),
        port = config.api.port,
        "API server"
    );
    tracing::info!(
        status = on_off(config.power_metrics.enabled && ctx.provider.is_local()),
        gpu_watts = config.power_metrics.gpu_watts,
        "power metrics"
    );
    tracing::info!(languages = ?ctx.localizer.languages(), "localization");
}
