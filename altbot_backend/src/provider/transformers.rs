use super::{error_body, non_empty, Capabilities, MediaKind, ModelProvider, ProviderError, TEXT_TIMEOUT};
use crate::media::mime_for;
use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};

/// Locally hosted vision-language model behind an OpenAI-compatible
/// chat completions endpoint.
pub struct TransformersProvider {
    http: reqwest::Client,
    base_url: String,
    model: String,
    closed: AtomicBool,
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<Message<'a>>,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'static str,
    content: Vec<ContentPart<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart<'a> {
    Text { text: &'a str },
    ImageUrl { image_url: DataUrl },
    VideoUrl { video_url: DataUrl },
}

#[derive(Debug, Serialize)]
struct DataUrl {
    url: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

impl TransformersProvider {
    pub fn new(http: reqwest::Client, base_url: &str, model: &str) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            closed: AtomicBool::new(false),
        }
    }

    async fn complete(&self, kind: MediaKind, prompt: &str, bytes: &[u8], format: &str) -> Result<String> {
        let url = DataUrl {
            url: format!("data:{};base64,{}", mime_for(kind, format), STANDARD.encode(bytes)),
        };
        let media = match kind {
            MediaKind::Image => ContentPart::ImageUrl { image_url: url },
            MediaKind::Video => ContentPart::VideoUrl { video_url: url },
            MediaKind::Audio => return Err(ProviderError::Unsupported(MediaKind::Audio).into()),
        };
        self.chat(vec![ContentPart::Text { text: prompt }, media], kind.timeout())
            .await
    }

    async fn chat(&self, content: Vec<ContentPart<'_>>, timeout: std::time::Duration) -> Result<String> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ProviderError::Closed.into());
        }
        let request = ChatCompletionRequest {
            model: &self.model,
            messages: vec![Message {
                role: "user",
                content,
            }],
            max_tokens: 1024,
        };
        let response = self
            .http
            .post(format!("{}/v1/chat/completions", self.base_url))
            .json(&request)
            .timeout(timeout)
            .send()
            .await
            .context("failed to send transformers request")?;
        if !response.status().is_success() {
            return Err(error_body(response).await.into());
        }
        let completion: ChatCompletionResponse = response
            .json()
            .await
            .context("failed to parse transformers response")?;
        let content = completion
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .unwrap_or_default();
        non_empty(content)
    }
}

#[async_trait]
impl ModelProvider for TransformersProvider {
    fn name(&self) -> &'static str {
        "transformers"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            image: true,
            video: true,
            audio: false,
        }
    }

    fn model_label(&self) -> String {
        self.model
            .rsplit('/')
            .next()
            .unwrap_or(&self.model)
            .to_string()
    }

    fn is_local(&self) -> bool {
        true
    }

    async fn generate_image_alt_text(
        &self,
        prompt: &str,
        image: &[u8],
        format: &str,
        _language: &str,
    ) -> Result<String> {
        self.complete(MediaKind::Image, prompt, image, format).await
    }

    async fn generate_video_alt_text(
        &self,
        prompt: &str,
        video: &[u8],
        format: &str,
        _language: &str,
    ) -> Result<String> {
        self.complete(MediaKind::Video, prompt, video, format).await
    }

    async fn complete_text(&self, prompt: &str) -> Result<String> {
        self.chat(vec![ContentPart::Text { text: prompt }], TEXT_TIMEOUT)
            .await
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_parts_are_tagged_like_openai() {
        let part = ContentPart::ImageUrl {
            image_url: DataUrl {
                url: "data:image/png;base64,AA==".into(),
            },
        };
        let json = serde_json::to_value(&part).expect("json");
        assert_eq!(json["type"], "image_url");
        assert_eq!(json["image_url"]["url"], "data:image/png;base64,AA==");
    }

    #[test]
    fn model_label_strips_organisation() {
        let provider =
            TransformersProvider::new(reqwest::Client::new(), "http://x", "Qwen/Qwen2.5-VL-7B-Instruct");
        assert_eq!(provider.model_label(), "Qwen2.5-VL-7B-Instruct");
    }
}
