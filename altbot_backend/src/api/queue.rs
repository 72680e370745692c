//! Bounded job queue between the HTTP handlers and the model provider.
//!
//! Uploads are processed one at a time by a single worker so API traffic
//! cannot starve the bot of provider capacity.

use super::ApiError;
use crate::localization::{keys, Localizer};
use crate::media::downscale_image;
use crate::provider::{MediaKind, SharedProvider};
use crate::reply::sanitize_alt_text;
use anyhow::{anyhow, Context, Result};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub const QUEUE_CAPACITY: usize = 100;
pub const ADMISSION_TIMEOUT: Duration = Duration::from_secs(10);
pub const RESULT_TIMEOUT: Duration = Duration::from_secs(120);

struct AltTextJob {
    image: Vec<u8>,
    language: String,
    reply: oneshot::Sender<Result<String>>,
}

/// Cloneable handle for submitting uploads.
#[derive(Clone)]
pub struct AltTextQueue {
    tx: mpsc::Sender<AltTextJob>,
    admission: Duration,
    deadline: Duration,
}

#[derive(Clone)]
struct Worker {
    provider: SharedProvider,
    localizer: Arc<Localizer>,
    downscale_width: u32,
}

impl AltTextQueue {
    pub fn spawn(
        provider: SharedProvider,
        localizer: Arc<Localizer>,
        downscale_width: u32,
        cancel: CancellationToken,
    ) -> (Self, JoinHandle<()>) {
        Self::spawn_with_limits(
            provider,
            localizer,
            downscale_width,
            cancel,
            QUEUE_CAPACITY,
            ADMISSION_TIMEOUT,
            RESULT_TIMEOUT,
        )
    }

    pub fn spawn_with_limits(
        provider: SharedProvider,
        localizer: Arc<Localizer>,
        downscale_width: u32,
        cancel: CancellationToken,
        capacity: usize,
        admission: Duration,
        deadline: Duration,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(capacity);
        let worker = Worker {
            provider,
            localizer,
            downscale_width,
        };
        let handle = tokio::spawn(worker.run(rx, cancel));
        (
            Self {
                tx,
                admission,
                deadline,
            },
            handle,
        )
    }

    /// Enqueues an upload and waits for its alt-text.
    pub async fn submit(&self, image: Vec<u8>, language: String) -> Result<String, ApiError> {
        let (reply, result) = oneshot::channel();
        let job = AltTextJob {
            image,
            language,
            reply,
        };

        match tokio::time::timeout(self.admission, self.tx.send(job)).await {
            Ok(Ok(())) => {}
            Ok(Err(_)) => return Err(ApiError::Internal(anyhow!("alt-text worker has stopped"))),
            Err(_) => return Err(ApiError::Busy),
        }

        match tokio::time::timeout(self.deadline, result).await {
            Ok(Ok(Ok(text))) => Ok(text),
            Ok(Ok(Err(err))) => Err(ApiError::Generation(err)),
            Ok(Err(_)) => Err(ApiError::Internal(anyhow!("alt-text worker dropped the request"))),
            Err(_) => Err(ApiError::Timeout),
        }
    }
}

impl Worker {
    async fn run(self, mut rx: mpsc::Receiver<AltTextJob>, cancel: CancellationToken) {
        tracing::info!("API alt-text worker started");
        loop {
            let job = tokio::select! {
                _ = cancel.cancelled() => break,
                job = rx.recv() => match job {
                    Some(job) => job,
                    None => break,
                },
            };
            if job.reply.is_closed() {
                tracing::debug!("skipping API job whose client already gave up");
                continue;
            }
            let result = self.process(job.image, &job.language).await;
            if job.reply.send(result).is_err() {
                tracing::debug!("API client gave up before the result was ready");
            }
        }
        tracing::info!("API alt-text worker stopped");
    }

    async fn process(&self, image: Vec<u8>, language: &str) -> Result<String> {
        let width = self.downscale_width;
        let (bytes, format) = tokio::task::spawn_blocking(move || downscale_image(&image, width))
            .await
            .context("image preprocessing task failed")??;

        let prompt = self.localizer.prompt(language, keys::GENERATE_ALT_TEXT);
        let started = Instant::now();
        let text = tokio::time::timeout(
            MediaKind::Image.timeout(),
            self.provider
                .generate_image_alt_text(&prompt, &bytes, format, language),
        )
        .await
        .map_err(|_| anyhow!("image generation timed out after {:?}", MediaKind::Image.timeout()))??;

        let text = sanitize_alt_text(&text);
        if text.is_empty() {
            anyhow::bail!("provider returned only boilerplate");
        }
        tracing::info!(
            language,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "API alt-text generated"
        );
        Ok(text)
    }
}
