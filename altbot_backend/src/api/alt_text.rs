use super::{extract_api_key, ApiError, AppState};
use crate::media::image_format;
use axum::extract::{Multipart, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::Serialize;

const DEFAULT_LANGUAGE: &str = "en";

#[derive(Debug, Serialize)]
pub struct AltTextResponse {
    pub alt_text: String,
    pub media_type: &'static str,
    pub language: String,
}

#[derive(Debug, Serialize)]
pub struct UsageResponse {
    pub usage_this_month: u32,
    pub monthly_limit: u32,
    pub remaining: u32,
    pub days_remaining: i64,
    pub expires_at: String,
}

struct Upload {
    image: Vec<u8>,
    language: String,
}

fn require_key(headers: &HeaderMap) -> Result<String, ApiError> {
    extract_api_key(headers).ok_or_else(|| {
        ApiError::Unauthorized("Missing API key. Use Authorization: Bearer <your-key>".into())
    })
}

async fn read_upload(mut multipart: Multipart) -> Result<Upload, ApiError> {
    let mut image = None;
    let mut language = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| ApiError::BadRequest(format!("Failed to parse form: {err}")))?
    {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("image") => {
                let format = image_format(field.file_name(), field.content_type());
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|err| ApiError::BadRequest(format!("Failed to read image: {err}")))?;
                image = Some((format, bytes));
            }
            Some("language") => {
                let value = field
                    .text()
                    .await
                    .map_err(|err| ApiError::BadRequest(format!("Failed to read language: {err}")))?;
                let value = value.trim();
                if !value.is_empty() {
                    language = Some(value.to_string());
                }
            }
            _ => {}
        }
    }

    let (format, bytes) =
        image.ok_or_else(|| ApiError::BadRequest("Missing 'image' field in form data".into()))?;
    if format.is_none() || bytes.is_empty() {
        return Err(ApiError::BadRequest("Unsupported image format".into()));
    }
    Ok(Upload {
        image: bytes.to_vec(),
        language: language.unwrap_or_else(|| DEFAULT_LANGUAGE.to_string()),
    })
}

pub(super) async fn create_alt_text(
    State(state): State<AppState>,
    headers: HeaderMap,
    multipart: Multipart,
) -> Result<Json<AltTextResponse>, ApiError> {
    let key = require_key(&headers)?;
    let api_key = state.keys.validate(&key)?;
    let upload = read_upload(multipart).await?;
    let used = state.keys.check_and_increment(&key, state.monthly_limit)?;
    tracing::debug!(email = %api_key.email, used, "API alt-text request accepted");

    let alt_text = state.queue.submit(upload.image, upload.language.clone()).await?;
    Ok(Json(AltTextResponse {
        alt_text,
        media_type: "image",
        language: upload.language,
    }))
}

pub(super) async fn usage(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<UsageResponse>, ApiError> {
    let key = require_key(&headers)?;
    let usage = state.keys.usage(&key)?;
    Ok(Json(UsageResponse {
        usage_this_month: usage.usage_this_month,
        monthly_limit: state.monthly_limit,
        remaining: state.monthly_limit.saturating_sub(usage.usage_this_month),
        days_remaining: usage.days_remaining,
        expires_at: usage.expires_at.to_rfc3339(),
    }))
}
