//! Media download and preprocessing ahead of a provider call.

use crate::provider::MediaKind;
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures_util::StreamExt;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::ImageFormat;
use std::io::Cursor;
use std::time::Duration;

const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(60);
const JPEG_QUALITY: u8 = 90;

#[derive(Debug, thiserror::Error)]
pub enum MediaError {
    #[error("media exceeds the {limit_bytes} byte limit")]
    TooLarge { limit_bytes: u64 },
    #[error("unsupported media format")]
    UnsupportedFormat,
    #[error("media download failed: {0}")]
    Download(String),
    #[error("failed to decode media: {0}")]
    Decode(String),
}

#[derive(Debug, Clone)]
pub struct Fetched {
    pub bytes: Bytes,
    pub content_type: Option<String>,
}

/// Where attachment bytes come from.
#[async_trait]
pub trait MediaFetcher: Send + Sync {
    async fn fetch(&self, url: &str, max_bytes: u64) -> Result<Fetched, MediaError>;
}

pub struct HttpMediaFetcher {
    http: reqwest::Client,
}

impl HttpMediaFetcher {
    pub fn new() -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(format!("{}/{}", crate::utils::APP_NAME, crate::utils::VERSION))
            .timeout(DOWNLOAD_TIMEOUT)
            .build()?;
        Ok(Self { http })
    }
}

#[async_trait]
impl MediaFetcher for HttpMediaFetcher {
    async fn fetch(&self, url: &str, max_bytes: u64) -> Result<Fetched, MediaError> {
        download(&self.http, url, max_bytes).await
    }
}

/// Downloads `url`, refusing bodies larger than `max_bytes` both up front
/// (from `Content-Length`) and while streaming.
pub async fn download(http: &reqwest::Client, url: &str, max_bytes: u64) -> Result<Fetched, MediaError> {
    let response = http
        .get(url)
        .send()
        .await
        .map_err(|err| MediaError::Download(err.to_string()))?;
    if !response.status().is_success() {
        return Err(MediaError::Download(format!("server answered {}", response.status())));
    }
    if response.content_length().is_some_and(|len| len > max_bytes) {
        return Err(MediaError::TooLarge { limit_bytes: max_bytes });
    }
    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.to_string());

    let mut body = response.bytes_stream();
    let mut buffer = BytesMut::new();
    while let Some(chunk) = body.next().await {
        let chunk = chunk.map_err(|err| MediaError::Download(err.to_string()))?;
        if (buffer.len() + chunk.len()) as u64 > max_bytes {
            return Err(MediaError::TooLarge { limit_bytes: max_bytes });
        }
        buffer.extend_from_slice(&chunk);
    }
    Ok(Fetched {
        bytes: buffer.freeze(),
        content_type,
    })
}

fn supported_image_format(format: ImageFormat) -> bool {
    matches!(
        format,
        ImageFormat::Jpeg
            | ImageFormat::Png
            | ImageFormat::Gif
            | ImageFormat::WebP
            | ImageFormat::Bmp
            | ImageFormat::Tiff
    )
}

/// Decodes an image, shrinks it to `max_width` keeping the aspect ratio, and
/// re-encodes it. JPEG stays JPEG; every other input becomes PNG. Returns the
/// encoded bytes and the short format name.
pub fn downscale_image(bytes: &[u8], max_width: u32) -> Result<(Vec<u8>, &'static str), MediaError> {
    let format = image::guess_format(bytes).map_err(|_| MediaError::UnsupportedFormat)?;
    if !supported_image_format(format) {
        return Err(MediaError::UnsupportedFormat);
    }
    let mut img = image::load_from_memory_with_format(bytes, format)
        .map_err(|err| MediaError::Decode(err.to_string()))?;
    if img.width() > max_width {
        let height = ((img.height() as f64) * (max_width as f64) / (img.width() as f64)).round() as u32;
        img = img.resize_exact(max_width, height.max(1), FilterType::Lanczos3);
    }

    let mut out = Vec::new();
    if format == ImageFormat::Jpeg {
        let encoder = JpegEncoder::new_with_quality(&mut out, JPEG_QUALITY);
        img.to_rgb8()
            .write_with_encoder(encoder)
            .map_err(|err| MediaError::Decode(err.to_string()))?;
        Ok((out, "jpeg"))
    } else {
        img.write_to(&mut Cursor::new(&mut out), ImageFormat::Png)
            .map_err(|err| MediaError::Decode(err.to_string()))?;
        Ok((out, "png"))
    }
}

/// Maps a filename extension or content type to an image format name.
pub fn image_format(filename: Option<&str>, content_type: Option<&str>) -> Option<&'static str> {
    let from_extension = filename
        .and_then(|name| name.rsplit_once('.'))
        .and_then(|(_, ext)| match ext.to_ascii_lowercase().as_str() {
            "jpg" | "jpeg" => Some("jpeg"),
            "png" => Some("png"),
            "gif" => Some("gif"),
            "webp" => Some("webp"),
            "bmp" => Some("bmp"),
            "tif" | "tiff" => Some("tiff"),
            _ => None,
        });
    from_extension.or_else(|| {
        content_type.and_then(|ct| match ct.split(';').next().unwrap_or(ct).trim() {
            "image/jpeg" | "image/jpg" => Some("jpeg"),
            "image/png" => Some("png"),
            "image/gif" => Some("gif"),
            "image/webp" => Some("webp"),
            "image/bmp" => Some("bmp"),
            "image/tiff" => Some("tiff"),
            _ => None,
        })
    })
}

/// Container format for video or audio, from the URL path, the content type,
/// then the bytes themselves.
pub fn media_format(url: &str, content_type: Option<&str>, bytes: &[u8]) -> String {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let extension = path
        .rsplit('/')
        .next()
        .and_then(|file| file.rsplit_once('.'))
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .filter(|ext| !ext.is_empty() && ext.len() <= 5);
    if let Some(ext) = extension {
        return ext;
    }
    if let Some(subtype) = content_type
        .and_then(|ct| ct.split(';').next())
        .and_then(|ct| ct.trim().split_once('/'))
        .map(|(_, subtype)| subtype.to_string())
        .filter(|subtype| subtype != "octet-stream")
    {
        return subtype;
    }
    infer::get(bytes)
        .map(|kind| kind.extension().to_string())
        .unwrap_or_else(|| "mp4".to_string())
}

/// MIME type to send to a provider for `kind` in `format`.
pub fn mime_for(kind: MediaKind, format: &str) -> String {
    let format = format.to_ascii_lowercase();
    match (kind, format.as_str()) {
        (MediaKind::Image, "jpg") => "image/jpeg".to_string(),
        (MediaKind::Video, "mov") => "video/quicktime".to_string(),
        (MediaKind::Video, "m4v") => "video/mp4".to_string(),
        (MediaKind::Audio, "mp3") | (MediaKind::Audio, "mpeg") => "audio/mpeg".to_string(),
        (MediaKind::Audio, "m4a") => "audio/mp4".to_string(),
        (MediaKind::Audio, "oga") => "audio/ogg".to_string(),
        (kind, format) => format!("{}/{}", kind.as_str(), format),
    }
}
