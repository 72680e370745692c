use super::{error_body, non_empty, Capabilities, MediaKind, ModelProvider, ProviderError};
use crate::config::GeminiConfig;
use crate::media::mime_for;
use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};

/// Google Gemini `generateContent` over REST with inline media.
pub struct GeminiProvider {
    http: reqwest::Client,
    config: GeminiConfig,
    closed: AtomicBool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    role: &'static str,
    parts: Vec<Part<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum Part<'a> {
    Text { text: &'a str },
    Inline { inline_data: InlineData },
}

#[derive(Debug, Serialize)]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    top_k: i32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: Option<String>,
}

impl GenerateResponse {
    fn text(self) -> String {
        self.candidates
            .into_iter()
            .filter_map(|candidate| candidate.content)
            .flat_map(|content| content.parts)
            .filter_map(|part| part.text)
            .collect::<Vec<_>>()
            .join("")
    }
}

impl GeminiProvider {
    pub fn new(http: reqwest::Client, config: GeminiConfig) -> Self {
        Self {
            http,
            config,
            closed: AtomicBool::new(false),
        }
    }

    async fn generate_inline(
        &self,
        kind: MediaKind,
        prompt: &str,
        bytes: &[u8],
        format: &str,
    ) -> Result<String> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ProviderError::Closed.into());
        }
        let request = GenerateRequest {
            contents: vec![Content {
                role: "user",
                parts: vec![
                    Part::Text { text: prompt },
                    Part::Inline {
                        inline_data: InlineData {
                            mime_type: mime_for(kind, format),
                            data: STANDARD.encode(bytes),
                        },
                    },
                ],
            }],
            generation_config: GenerationConfig {
                temperature: self.config.temperature,
                top_k: self.config.top_k,
            },
        };
        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.config.api_url.trim_end_matches('/'),
            self.config.model
        );
        let response = self
            .http
            .post(url)
            .query(&[("key", self.config.api_key.as_str())])
            .json(&request)
            .timeout(kind.timeout())
            .send()
            .await
            .context("failed to send Gemini request")?;
        if !response.status().is_success() {
            return Err(error_body(response).await.into());
        }
        let parsed: GenerateResponse = response
            .json()
            .await
            .context("failed to parse Gemini response")?;
        non_empty(parsed.text())
    }
}

#[async_trait]
impl ModelProvider for GeminiProvider {
    fn name(&self) -> &'static str {
        "gemini"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            image: true,
            video: true,
            audio: true,
        }
    }

    fn model_label(&self) -> String {
        "Gemini".to_string()
    }

    fn is_local(&self) -> bool {
        false
    }

    async fn generate_image_alt_text(
        &self,
        prompt: &str,
        image: &[u8],
        format: &str,
        _language: &str,
    ) -> Result<String> {
        self.generate_inline(MediaKind::Image, prompt, image, format).await
    }

    async fn generate_video_alt_text(
        &self,
        prompt: &str,
        video: &[u8],
        format: &str,
        _language: &str,
    ) -> Result<String> {
        self.generate_inline(MediaKind::Video, prompt, video, format).await
    }

    async fn generate_audio_alt_text(
        &self,
        prompt: &str,
        audio: &[u8],
        format: &str,
        _language: &str,
    ) -> Result<String> {
        self.generate_inline(MediaKind::Audio, prompt, audio, format).await
    }

    async fn close(&self) -> Result<()> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            tracing::debug!("gemini provider closed");
        }
        Ok(())
    }
}
