//! Generation fan-out over one post's attachments.
//!
//! Each attachment runs on its own task; results are joined in attachment
//! order before anything is posted. A failing attachment only costs its own
//! element.

use crate::config::{ImageProcessingConfig, VideoProcessingConfig};
use crate::localization::{keys, Localizer};
use crate::media::{downscale_image, media_format, MediaError, MediaFetcher};
use crate::metrics::Metrics;
use crate::platform::{Attachment, Status};
use crate::policy::{classify, AttachmentClass};
use crate::provider::{MediaKind, SharedProvider};
use crate::rate_limit::RateLimiter;
use crate::reply::{sanitize_alt_text, ResponseElement};
use anyhow::{anyhow, Context, Result};
use futures_util::future::join_all;
use std::sync::Arc;
use std::time::Instant;

/// Result of one attachment worker.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Element(ResponseElement),
    AlreadyHasAlt,
}

#[derive(Clone)]
pub struct Generator {
    provider: SharedProvider,
    fetcher: Arc<dyn MediaFetcher>,
    rate_limiter: Arc<RateLimiter>,
    localizer: Arc<Localizer>,
    metrics: Arc<Metrics>,
    image: ImageProcessingConfig,
    video: VideoProcessingConfig,
}

impl Generator {
    pub fn new(
        provider: SharedProvider,
        fetcher: Arc<dyn MediaFetcher>,
        rate_limiter: Arc<RateLimiter>,
        localizer: Arc<Localizer>,
        metrics: Arc<Metrics>,
        image: ImageProcessingConfig,
        video: VideoProcessingConfig,
    ) -> Self {
        Self {
            provider,
            fetcher,
            rate_limiter,
            localizer,
            metrics,
            image,
            video,
        }
    }

    pub fn provider(&self) -> &SharedProvider {
        &self.provider
    }

    /// Describes every attachment of `source`. Rate limits are charged to
    /// `requester_id`, the author of the post the reply will attach to.
    pub async fn describe(&self, source: &Status, requester_id: &str, language: &str) -> Vec<ResponseElement> {
        self.metrics.record_request(requester_id);
        let workers = source.media_attachments.iter().cloned().map(|attachment| {
            let generator = self.clone();
            let requester_id = requester_id.to_string();
            let language = language.to_string();
            tokio::spawn(async move {
                generator
                    .describe_attachment(&attachment, &requester_id, &language)
                    .await
            })
        });
        let outcomes = join_all(workers)
            .await
            .into_iter()
            .map(|joined| {
                joined.unwrap_or_else(|err| {
                    tracing::error!(error = ?err, "attachment worker panicked");
                    Outcome::Element(ResponseElement::Notice(
                        self.localizer.response(language, keys::ALT_TEXT_ERROR),
                    ))
                })
            })
            .collect();
        collect_elements(
            outcomes,
            self.localizer.response(language, keys::IMAGE_ALREADY_HAS_ALT_TEXT),
        )
    }

    async fn describe_attachment(&self, attachment: &Attachment, requester_id: &str, language: &str) -> Outcome {
        let notice = |key: &str| Outcome::Element(ResponseElement::Notice(self.localizer.response(language, key)));

        if !self.rate_limiter.check(requester_id).await.is_allowed() {
            self.metrics.record_rate_limit_hit(requester_id);
            return notice(keys::ALT_TEXT_ERROR);
        }
        let kind = match classify(attachment, &self.provider.capabilities()) {
            AttachmentClass::AlreadyHasAlt => return Outcome::AlreadyHasAlt,
            AttachmentClass::Unsupported => return notice(keys::UNSUPPORTED_FILE),
            AttachmentClass::Generate(kind) => kind,
        };

        match self.generate(kind, attachment, language).await {
            Ok(element) => {
                self.metrics.record_generation(kind);
                Outcome::Element(element)
            }
            Err(err) => {
                self.metrics.record_failure();
                let unsupported = matches!(
                    err.downcast_ref::<MediaError>(),
                    Some(MediaError::TooLarge { .. } | MediaError::UnsupportedFormat)
                );
                tracing::warn!(
                    error = ?err,
                    attachment_id = %attachment.id,
                    kind = %kind,
                    "alt-text generation failed"
                );
                if unsupported {
                    notice(keys::UNSUPPORTED_FILE)
                } else {
                    notice(keys::ALT_TEXT_ERROR)
                }
            }
        }
    }

    async fn generate(&self, kind: MediaKind, attachment: &Attachment, language: &str) -> Result<ResponseElement> {
        let max_bytes = match kind {
            MediaKind::Image => self.image.max_bytes(),
            MediaKind::Video | MediaKind::Audio => self.video.max_bytes(),
        };
        let fetched = self.fetcher.fetch(&attachment.url, max_bytes).await?;

        let (bytes, format) = match kind {
            MediaKind::Image => {
                let width = self.image.downscale_width;
                let raw = fetched.bytes.clone();
                let (bytes, format) = tokio::task::spawn_blocking(move || downscale_image(&raw, width))
                    .await
                    .context("image preprocessing task failed")??;
                (bytes, format.to_string())
            }
            MediaKind::Video | MediaKind::Audio => {
                let format = media_format(&attachment.url, fetched.content_type.as_deref(), &fetched.bytes);
                (fetched.bytes.to_vec(), format)
            }
        };

        let prompt_key = match kind {
            MediaKind::Image => keys::GENERATE_ALT_TEXT,
            MediaKind::Video => keys::GENERATE_VIDEO_ALT_TEXT,
            MediaKind::Audio => keys::GENERATE_AUDIO_ALT_TEXT,
        };
        let prompt = self.localizer.prompt(language, prompt_key);

        let started = Instant::now();
        let text = tokio::time::timeout(
            kind.timeout(),
            self.provider.generate(kind, &prompt, &bytes, &format, language),
        )
        .await
        .map_err(|_| anyhow!("{kind} generation timed out after {:?}", kind.timeout()))??;
        let elapsed = started.elapsed();

        let text = sanitize_alt_text(&text);
        if text.is_empty() {
            anyhow::bail!("provider returned only boilerplate");
        }
        tracing::info!(
            attachment_id = %attachment.id,
            kind = %kind,
            elapsed_ms = elapsed.as_millis() as u64,
            "alt-text generated"
        );
        Ok(ResponseElement::Generated { text, elapsed })
    }
}

/// Flattens worker outcomes in attachment order. The "already has alt-text"
/// notice appears once, at the position of the first such attachment.
pub fn collect_elements(outcomes: Vec<Outcome>, already_has_alt_text: String) -> Vec<ResponseElement> {
    let mut elements = Vec::with_capacity(outcomes.len());
    let mut already_noted = false;
    for outcome in outcomes {
        match outcome {
            Outcome::Element(element) => elements.push(element),
            Outcome::AlreadyHasAlt if !already_noted => {
                already_noted = true;
                elements.push(ResponseElement::Notice(already_has_alt_text.clone()));
            }
            Outcome::AlreadyHasAlt => {}
        }
    }
    elements
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn generated(text: &str) -> Outcome {
        Outcome::Element(ResponseElement::Generated {
            text: text.into(),
            elapsed: Duration::from_millis(10),
        })
    }

    #[test]
    fn already_described_notice_is_emitted_once() {
        let elements = collect_elements(
            vec![
                Outcome::AlreadyHasAlt,
                generated("A fox."),
                Outcome::AlreadyHasAlt,
            ],
            "already described".into(),
        );
        assert_eq!(elements.len(), 2);
        assert_eq!(elements[0], ResponseElement::Notice("already described".into()));
        assert!(elements[1].is_generated());
    }

    #[test]
    fn attachment_order_is_preserved() {
        let elements = collect_elements(
            vec![
                generated("first"),
                Outcome::Element(ResponseElement::Notice("second".into())),
                generated("third"),
            ],
            String::new(),
        );
        let texts: Vec<&str> = elements.iter().map(ResponseElement::text).collect();
        assert_eq!(texts, vec!["first", "second", "third"]);
    }
}
