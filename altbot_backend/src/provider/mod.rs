//! Multimodal model backends that turn media into alt-text.

pub mod gemini;
pub mod ollama;
pub mod transformers;
pub mod translation;

use crate::config::{AltbotConfig, ProviderKind};
use crate::localization::Localizer;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

pub use gemini::GeminiProvider;
pub use ollama::OllamaProvider;
pub use transformers::TransformersProvider;
pub use translation::TranslationLayer;

pub const IMAGE_TIMEOUT: Duration = Duration::from_secs(30);
pub const LONG_MEDIA_TIMEOUT: Duration = Duration::from_secs(120);
pub const TEXT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
    Audio,
}

impl MediaKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MediaKind::Image => "image",
            MediaKind::Video => "video",
            MediaKind::Audio => "audio",
        }
    }

    /// Upper bound for one provider call on this kind of media.
    pub fn timeout(self) -> Duration {
        match self {
            MediaKind::Image => IMAGE_TIMEOUT,
            MediaKind::Video | MediaKind::Audio => LONG_MEDIA_TIMEOUT,
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Capabilities {
    pub image: bool,
    pub video: bool,
    pub audio: bool,
}

impl Capabilities {
    pub fn supports(&self, kind: MediaKind) -> bool {
        match kind {
            MediaKind::Image => self.image,
            MediaKind::Video => self.video,
            MediaKind::Audio => self.audio,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("{0} input is not supported by this provider")]
    Unsupported(MediaKind),
    #[error("provider request failed: {0}")]
    Request(String),
    #[error("text-only prompts are not supported by this provider")]
    TextUnsupported,
    #[error("provider returned an empty response")]
    EmptyResponse,
    #[error("provider has been closed")]
    Closed,
}

/// A model backend. Failures are opaque to callers: every error ends up as
/// the same localized message in the reply.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    fn name(&self) -> &'static str;

    fn capabilities(&self) -> Capabilities;

    /// Human-friendly model name used in the attribution line.
    fn model_label(&self) -> String;

    /// Local providers get the energy estimate appended to replies.
    fn is_local(&self) -> bool;

    async fn generate_image_alt_text(
        &self,
        prompt: &str,
        image: &[u8],
        format: &str,
        language: &str,
    ) -> Result<String>;

    async fn generate_video_alt_text(
        &self,
        _prompt: &str,
        _video: &[u8],
        _format: &str,
        _language: &str,
    ) -> Result<String> {
        Err(ProviderError::Unsupported(MediaKind::Video).into())
    }

    async fn generate_audio_alt_text(
        &self,
        _prompt: &str,
        _audio: &[u8],
        _format: &str,
        _language: &str,
    ) -> Result<String> {
        Err(ProviderError::Unsupported(MediaKind::Audio).into())
    }

    /// Answers a prompt without media. Used to translate descriptions.
    async fn complete_text(&self, _prompt: &str) -> Result<String> {
        Err(ProviderError::TextUnsupported.into())
    }

    /// Releases provider resources. Safe to call more than once.
    async fn close(&self) -> Result<()>;

    async fn generate(
        &self,
        kind: MediaKind,
        prompt: &str,
        bytes: &[u8],
        format: &str,
        language: &str,
    ) -> Result<String> {
        match kind {
            MediaKind::Image => self.generate_image_alt_text(prompt, bytes, format, language).await,
            MediaKind::Video => self.generate_video_alt_text(prompt, bytes, format, language).await,
            MediaKind::Audio => self.generate_audio_alt_text(prompt, bytes, format, language).await,
        }
    }
}

pub type SharedProvider = Arc<dyn ModelProvider>;

/// Builds the provider selected by `llm.provider`.
pub fn from_config(config: &AltbotConfig) -> Result<SharedProvider> {
    let http = reqwest::Client::builder()
        .user_agent(format!("{}/{}", crate::utils::APP_NAME, crate::utils::VERSION))
        .timeout(LONG_MEDIA_TIMEOUT)
        .build()
        .context("failed to build provider HTTP client")?;
    let provider: SharedProvider = match config.llm.provider_kind()? {
        ProviderKind::Gemini => Arc::new(GeminiProvider::new(http, config.gemini.clone())),
        ProviderKind::Ollama => Arc::new(
            OllamaProvider::new(
                http,
                &config.llm.ollama_url,
                &config.llm.ollama_model,
                &config.llm.ollama_keep_alive,
            )
            .with_translation_model(
                &config.llm.ollama_translation_model,
                &config.llm.ollama_translation_keep_alive,
            ),
        ),
        ProviderKind::Transformers => Arc::new(TransformersProvider::new(
            http,
            &config.transformers.url,
            &config.transformers.model,
        )),
    };
    Ok(provider)
}

/// Wraps local providers in a [`TranslationLayer`] when
/// `llm.use_translation_layer` is set. Cloud providers are returned as is.
pub fn with_translation_layer(
    provider: SharedProvider,
    config: &AltbotConfig,
    localizer: &Localizer,
) -> Result<SharedProvider> {
    if !config.llm.use_translation_layer {
        return Ok(provider);
    }
    match config.llm.provider_kind()? {
        ProviderKind::Gemini => {
            tracing::warn!("translation layer only applies to local providers; ignoring");
            Ok(provider)
        }
        ProviderKind::Ollama | ProviderKind::Transformers => {
            Ok(Arc::new(TranslationLayer::new(provider, localizer)))
        }
    }
}

pub(crate) async fn error_body(response: reqwest::Response) -> ProviderError {
    let status = response.status();
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "Unable to read body".to_string());
    ProviderError::Request(format!("{status}: {body}"))
}

pub(crate) fn non_empty(text: String) -> Result<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(ProviderError::EmptyResponse.into());
    }
    Ok(trimmed.to_string())
}
