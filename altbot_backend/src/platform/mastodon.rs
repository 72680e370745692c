use super::sse::{SseDecoder, SseFrame};
use super::{Account, NewStatus, PlatformClient, PlatformEvent, Status};
use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::StreamExt;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const EVENT_BUFFER: usize = 256;
const RECONNECT_MIN: Duration = Duration::from_secs(5);
const RECONNECT_MAX: Duration = Duration::from_secs(120);

/// REST + streaming client for a Mastodon-compatible server.
#[derive(Clone)]
pub struct MastodonClient {
    base_url: String,
    access_token: String,
    http: reqwest::Client,
    stream_http: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct Notification {
    #[serde(rename = "type")]
    kind: String,
    account: Account,
    #[serde(default)]
    status: Option<Status>,
}

impl MastodonClient {
    pub fn new(base_url: &str, access_token: &str) -> Result<Self> {
        let user_agent = format!("{}/{}", crate::utils::APP_NAME, crate::utils::VERSION);
        let http = reqwest::Client::builder()
            .user_agent(user_agent.clone())
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("failed to build platform HTTP client")?;
        // the stream stays open indefinitely, so only the connect phase is bounded
        let stream_http = reqwest::Client::builder()
            .user_agent(user_agent)
            .connect_timeout(REQUEST_TIMEOUT)
            .build()
            .context("failed to build streaming HTTP client")?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            access_token: access_token.to_string(),
            http,
            stream_http,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn read_json<T: DeserializeOwned>(response: reqwest::Response, what: &str) -> Result<T> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read body".to_string());
            anyhow::bail!("{what} failed with {status}: {body}");
        }
        response
            .json()
            .await
            .with_context(|| format!("failed to decode {what} response"))
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str, what: &str) -> Result<T> {
        let response = self
            .http
            .get(self.url(path))
            .bearer_auth(&self.access_token)
            .send()
            .await
            .with_context(|| format!("{what} request failed"))?;
        Self::read_json(response, what).await
    }

    async fn pump_stream(
        &self,
        tx: &mpsc::Sender<PlatformEvent>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let response = self
            .stream_http
            .get(self.url("/api/v1/streaming/user"))
            .bearer_auth(&self.access_token)
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .send()
            .await
            .context("failed to open user stream")?;
        if !response.status().is_success() {
            anyhow::bail!("user stream rejected with {}", response.status());
        }
        tracing::info!("connected to user stream");

        let mut body = response.bytes_stream();
        let mut decoder = SseDecoder::new();
        loop {
            let chunk = tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                chunk = body.next() => chunk,
            };
            let Some(chunk) = chunk else {
                anyhow::bail!("user stream closed by server");
            };
            let chunk = chunk.context("user stream read failed")?;
            for frame in decoder.push(&chunk) {
                let Some(event) = decode_frame(&frame) else {
                    continue;
                };
                if tx.send(event).await.is_err() {
                    return Ok(());
                }
            }
        }
    }
}

/// Maps one SSE frame to a platform event. Frame kinds the bot does not act
/// on yield `None`; undecodable payloads become `Error` events.
pub(crate) fn decode_frame(frame: &SseFrame) -> Option<PlatformEvent> {
    match frame.event.as_str() {
        "update" => Some(match serde_json::from_str::<Status>(&frame.data) {
            Ok(status) => PlatformEvent::Update(status),
            Err(err) => PlatformEvent::Error(format!("malformed update frame: {err}")),
        }),
        "delete" => Some(PlatformEvent::Delete(frame.data.trim().to_string())),
        "notification" => match serde_json::from_str::<Notification>(&frame.data) {
            Ok(notification) => match (notification.kind.as_str(), notification.status) {
                ("mention", Some(status)) => Some(PlatformEvent::Mention {
                    account: notification.account,
                    status,
                }),
                ("follow", _) => Some(PlatformEvent::Follow {
                    account: notification.account,
                }),
                _ => None,
            },
            Err(err) => Some(PlatformEvent::Error(format!(
                "malformed notification frame: {err}"
            ))),
        },
        _ => None,
    }
}

#[async_trait]
impl PlatformClient for MastodonClient {
    async fn stream_user(&self, cancel: CancellationToken) -> Result<mpsc::Receiver<PlatformEvent>> {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let client = self.clone();
        tokio::spawn(async move {
            let mut backoff = RECONNECT_MIN;
            while !cancel.is_cancelled() {
                let connected_at = tokio::time::Instant::now();
                match client.pump_stream(&tx, &cancel).await {
                    Ok(()) => break,
                    Err(err) => {
                        if connected_at.elapsed() > RECONNECT_MAX {
                            backoff = RECONNECT_MIN;
                        }
                        tracing::warn!(error = ?err, retry_in = ?backoff, "user stream interrupted");
                        if tx.send(PlatformEvent::Error(format!("{err:#}"))).await.is_err() {
                            break;
                        }
                    }
                }
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(backoff) => {}
                }
                backoff = (backoff * 2).min(RECONNECT_MAX);
            }
            tracing::info!("user stream stopped");
        });
        Ok(rx)
    }

    async fn get_status(&self, id: &str) -> Result<Status> {
        self.get_json(&format!("/api/v1/statuses/{id}"), "get status").await
    }

    async fn post_status(&self, status: NewStatus) -> Result<Status> {
        let response = self
            .http
            .post(self.url("/api/v1/statuses"))
            .bearer_auth(&self.access_token)
            .header("Idempotency-Key", uuid::Uuid::new_v4().to_string())
            .json(&status)
            .send()
            .await
            .context("post status request failed")?;
        Self::read_json(response, "post status").await
    }

    async fn delete_status(&self, id: &str) -> Result<()> {
        let response = self
            .http
            .delete(self.url(&format!("/api/v1/statuses/{id}")))
            .bearer_auth(&self.access_token)
            .send()
            .await
            .context("delete status request failed")?;
        let _: serde_json::Value = Self::read_json(response, "delete status").await?;
        Ok(())
    }

    async fn follow(&self, account_id: &str) -> Result<()> {
        let response = self
            .http
            .post(self.url(&format!("/api/v1/accounts/{account_id}/follow")))
            .bearer_auth(&self.access_token)
            .send()
            .await
            .context("follow request failed")?;
        let _: serde_json::Value = Self::read_json(response, "follow").await?;
        Ok(())
    }

    async fn get_account(&self, account_id: &str) -> Result<Account> {
        self.get_json(&format!("/api/v1/accounts/{account_id}"), "get account")
            .await
    }

    async fn current_account(&self) -> Result<Account> {
        self.get_json("/api/v1/accounts/verify_credentials", "verify credentials")
            .await
    }
}
