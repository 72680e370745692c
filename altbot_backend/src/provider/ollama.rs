use super::{error_body, non_empty, Capabilities, MediaKind, ModelProvider, ProviderError, TEXT_TIMEOUT};
use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};

/// Local Ollama server; images only.
pub struct OllamaProvider {
    http: reqwest::Client,
    base_url: String,
    model: String,
    keep_alive: String,
    translation_model: String,
    translation_keep_alive: String,
    closed: AtomicBool,
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    images: Vec<String>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    keep_alive: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
}

impl OllamaProvider {
    pub fn new(http: reqwest::Client, base_url: &str, model: &str, keep_alive: &str) -> Self {
        let keep_alive = keep_alive.trim().to_string();
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            translation_model: model.to_string(),
            translation_keep_alive: keep_alive.clone(),
            keep_alive,
            closed: AtomicBool::new(false),
        }
    }

    /// Uses a separate text model for translations. Blank values keep the
    /// vision model and its keep-alive.
    pub fn with_translation_model(mut self, model: &str, keep_alive: &str) -> Self {
        let model = model.trim();
        if !model.is_empty() {
            self.translation_model = model.to_string();
        }
        let keep_alive = keep_alive.trim();
        if !keep_alive.is_empty() {
            self.translation_keep_alive = keep_alive.to_string();
        }
        self
    }

    fn keep_alive_value(&self) -> Option<serde_json::Value> {
        keep_alive_value(&self.keep_alive)
    }

    async fn send(&self, request: &GenerateRequest<'_>, timeout: std::time::Duration) -> Result<String> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ProviderError::Closed.into());
        }
        let response = self
            .http
            .post(format!("{}/api/generate", self.base_url))
            .json(request)
            .timeout(timeout)
            .send()
            .await
            .context("failed to send Ollama request")?;
        if !response.status().is_success() {
            return Err(error_body(response).await.into());
        }
        let parsed: GenerateResponse = response
            .json()
            .await
            .context("failed to parse Ollama response")?;
        non_empty(parsed.response)
    }
}

// Ollama accepts a bare number of seconds or a duration string such as "5m".
fn keep_alive_value(raw: &str) -> Option<serde_json::Value> {
    if raw.is_empty() {
        return None;
    }
    match raw.parse::<i64>() {
        Ok(seconds) => Some(serde_json::Value::from(seconds)),
        Err(_) => Some(serde_json::Value::from(raw)),
    }
}

/// "llava-phi3:3.8b" becomes "Llava-phi3".
fn pretty_model_name(model: &str) -> String {
    let base = model.split(':').next().unwrap_or(model);
    let mut chars = base.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[async_trait]
impl ModelProvider for OllamaProvider {
    fn name(&self) -> &'static str {
        "ollama"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            image: true,
            video: false,
            audio: false,
        }
    }

    fn model_label(&self) -> String {
        pretty_model_name(&self.model)
    }

    fn is_local(&self) -> bool {
        true
    }

    async fn generate_image_alt_text(
        &self,
        prompt: &str,
        image: &[u8],
        _format: &str,
        _language: &str,
    ) -> Result<String> {
        let request = GenerateRequest {
            model: &self.model,
            prompt,
            images: vec![STANDARD.encode(image)],
            stream: false,
            keep_alive: self.keep_alive_value(),
        };
        self.send(&request, MediaKind::Image.timeout()).await
    }

    async fn complete_text(&self, prompt: &str) -> Result<String> {
        let request = GenerateRequest {
            model: &self.translation_model,
            prompt,
            images: Vec::new(),
            stream: false,
            keep_alive: keep_alive_value(&self.translation_keep_alive),
        };
        self.send(&request, TEXT_TIMEOUT).await
    }

    async fn close(&self) -> Result<()> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            tracing::debug!(model = %self.model, "ollama provider closed");
        }
        Ok(())
    }
}
