use altbot_backend::api::{self, AltTextQueue, AppState};
use altbot_backend::api_keys::{ApiKeyStore, API_KEYS_FILE};
use altbot_backend::clock::SystemClock;
use altbot_backend::config::LlmConfig;
use altbot_backend::localization::Localizer;
use altbot_backend::provider::{Capabilities, ModelProvider, SharedProvider};
use anyhow::Result;
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use serde_json::Value;
use std::io::Cursor;
use std::sync::Arc;
use tempfile::{tempdir, TempDir};
use tokio::time::{sleep, Duration};
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

const BOUNDARY: &str = "altbot-test-boundary";

enum Behaviour {
    Describe,
    Fail,
    Stall,
}

struct StubProvider(Behaviour);

#[async_trait]
impl ModelProvider for StubProvider {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            image: true,
            video: false,
            audio: false,
        }
    }

    fn model_label(&self) -> String {
        "Stub".into()
    }

    fn is_local(&self) -> bool {
        true
    }

    async fn generate_image_alt_text(&self, _prompt: &str, bytes: &[u8], format: &str, language: &str) -> Result<String> {
        match self.0 {
            Behaviour::Describe => {
                let img = image::load_from_memory(bytes)?;
                Ok(format!(
                    "Here's alt-text describing the image: a {}x{} {format} picture for @someone ({language})",
                    img.width(),
                    img.height()
                ))
            }
            Behaviour::Fail => anyhow::bail!("model unavailable"),
            Behaviour::Stall => {
                sleep(Duration::from_secs(30)).await;
                Ok("too late".into())
            }
        }
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

struct TestApi {
    _dir: TempDir,
    keys: Arc<ApiKeyStore>,
    state: AppState,
    _cancel: tokio_util::sync::DropGuard,
}

impl TestApi {
    fn new(behaviour: Behaviour, monthly_limit: u32) -> Self {
        Self::with_deadline(behaviour, monthly_limit, Duration::from_secs(120))
    }

    fn with_deadline(behaviour: Behaviour, monthly_limit: u32, deadline: Duration) -> Self {
        let dir = tempdir().expect("tempdir");
        let keys = Arc::new(
            ApiKeyStore::open(dir.path().join(API_KEYS_FILE), Arc::new(SystemClock)).expect("key store"),
        );
        let provider: SharedProvider = Arc::new(StubProvider(behaviour));
        let cancel = CancellationToken::new();
        let (queue, _worker) = AltTextQueue::spawn_with_limits(
            provider,
            Arc::new(Localizer::builtin(&LlmConfig::default())),
            100,
            cancel.clone(),
            4,
            Duration::from_secs(10),
            deadline,
        );
        let state = AppState {
            keys: keys.clone(),
            queue,
            monthly_limit,
        };
        Self {
            _dir: dir,
            keys,
            state,
            _cancel: cancel.drop_guard(),
        }
    }

    fn new_key(&self) -> String {
        self.keys
            .generate("dev@example.org", 30, "")
            .expect("generate key")
            .key
    }

    async fn call(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = api::router(self.state.clone())
            .oneshot(request)
            .await
            .expect("router");
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, json)
    }
}

struct Part<'a> {
    name: &'a str,
    filename: Option<&'a str>,
    content_type: Option<&'a str>,
    data: Vec<u8>,
}

fn multipart_body(parts: &[Part<'_>]) -> Vec<u8> {
    let mut body = Vec::new();
    for part in parts {
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        let mut disposition = format!("Content-Disposition: form-data; name=\"{}\"", part.name);
        if let Some(filename) = part.filename {
            disposition.push_str(&format!("; filename=\"{filename}\""));
        }
        body.extend_from_slice(disposition.as_bytes());
        body.extend_from_slice(b"\r\n");
        if let Some(content_type) = part.content_type {
            body.extend_from_slice(format!("Content-Type: {content_type}\r\n").as_bytes());
        }
        body.extend_from_slice(b"\r\n");
        body.extend_from_slice(&part.data);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}

fn png(width: u32, height: u32) -> Vec<u8> {
    let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb([10, 200, 30])));
    let mut out = Vec::new();
    img.write_to(&mut Cursor::new(&mut out), ImageFormat::Png)
        .expect("encode png");
    out
}

fn image_part(data: Vec<u8>) -> Part<'static> {
    Part {
        name: "image",
        filename: Some("photo.png"),
        content_type: Some("image/png"),
        data,
    }
}

fn upload(key: Option<&str>, parts: &[Part<'_>]) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/api/v1/alt-text")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        );
    if let Some(key) = key {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {key}"));
    }
    builder.body(Body::from(multipart_body(parts))).expect("request")
}

fn get(uri: &str, key: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method("GET").uri(uri);
    if let Some(key) = key {
        builder = builder.header(header::AUTHORIZATION, key);
    }
    builder.body(Body::empty()).expect("request")
}

#[tokio::test(flavor = "multi_thread")]
async fn health_reports_version() {
    let api = TestApi::new(Behaviour::Describe, 10);
    let (status, body) = api.call(get("/api/v1/health", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test(flavor = "multi_thread")]
async fn upload_returns_sanitized_alt_text_and_counts_usage() {
    let api = TestApi::new(Behaviour::Describe, 10);
    let key = api.new_key();
    let parts = [
        image_part(png(1600, 400)),
        Part {
            name: "language",
            filename: None,
            content_type: None,
            data: b"de".to_vec(),
        },
    ];

    let (status, body) = api.call(upload(Some(&key), &parts)).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["media_type"], "image");
    assert_eq!(body["language"], "de");
    assert_eq!(
        body["alt_text"],
        "a 100x25 png picture for [@]someone (de)"
    );

    let (status, usage) = api.call(get("/api/v1/usage", Some(&key))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(usage["usage_this_month"], 1);
    assert_eq!(usage["monthly_limit"], 10);
    assert_eq!(usage["remaining"], 9);
    assert!(usage["days_remaining"].as_i64().expect("days") >= 29);
    assert!(usage["expires_at"].as_str().expect("expiry").contains('T'));
}

#[tokio::test(flavor = "multi_thread")]
async fn language_defaults_to_english() {
    let api = TestApi::new(Behaviour::Describe, 10);
    let key = api.new_key();
    let (status, body) = api.call(upload(Some(&key), &[image_part(png(8, 8))])).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["language"], "en");
}

#[tokio::test(flavor = "multi_thread")]
async fn missing_or_unknown_keys_are_rejected() {
    let api = TestApi::new(Behaviour::Describe, 10);

    let (status, body) = api.call(upload(None, &[image_part(png(8, 8))])).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["status"], 401);
    assert!(body["error"].as_str().expect("error").starts_with("Missing API key"));

    let (status, _) = api
        .call(upload(Some("altbot_unknown"), &[image_part(png(8, 8))]))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let key = api.new_key();
    api.keys.revoke(&key).expect("revoke");
    let (status, body) = api.call(upload(Some(&key), &[image_part(png(8, 8))])).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "API key is deactivated");
}

#[tokio::test(flavor = "multi_thread")]
async fn quota_is_enforced_per_month() {
    let api = TestApi::new(Behaviour::Describe, 1);
    let key = api.new_key();
    let (status, _) = api.call(upload(Some(&key), &[image_part(png(8, 8))])).await;
    assert_eq!(status, StatusCode::OK);
    let (status, body) = api.call(upload(Some(&key), &[image_part(png(8, 8))])).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["status"], 429);
}

#[tokio::test(flavor = "multi_thread")]
async fn malformed_uploads_are_bad_requests_and_free() {
    let api = TestApi::new(Behaviour::Describe, 10);
    let key = api.new_key();

    let language_only = [Part {
        name: "language",
        filename: None,
        content_type: None,
        data: b"fr".to_vec(),
    }];
    let (status, body) = api.call(upload(Some(&key), &language_only)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Missing 'image' field in form data");

    let text_file = [Part {
        name: "image",
        filename: Some("notes.txt"),
        content_type: Some("text/plain"),
        data: b"hello".to_vec(),
    }];
    let (status, body) = api.call(upload(Some(&key), &text_file)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Unsupported image format");

    assert_eq!(api.keys.usage(&key).expect("usage").usage_this_month, 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn provider_failure_is_a_server_error() {
    let api = TestApi::new(Behaviour::Fail, 10);
    let key = api.new_key();
    let (status, body) = api.call(upload(Some(&key), &[image_part(png(8, 8))])).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body["error"]
        .as_str()
        .expect("error")
        .starts_with("Failed to generate alt-text"));
}

#[tokio::test(flavor = "multi_thread")]
async fn slow_generation_times_out() {
    let api = TestApi::with_deadline(Behaviour::Stall, 10, Duration::from_millis(200));
    let key = api.new_key();
    let (status, body) = api.call(upload(Some(&key), &[image_part(png(8, 8))])).await;
    assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(body["error"], "Request timeout");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ignore = "requires local networking"]
async fn served_over_tcp() {
    let api = TestApi::new(Behaviour::Describe, 10);
    let port = std::net::TcpListener::bind("127.0.0.1:0")
        .expect("bind ephemeral port")
        .local_addr()
        .unwrap()
        .port();
    let cancel = CancellationToken::new();
    let server = tokio::spawn(api::serve_http(api.state.clone(), port, cancel.clone()));

    let client = reqwest::Client::new();
    let url = format!("http://127.0.0.1:{port}/api/v1/health");
    let mut healthy = false;
    for _ in 0..50 {
        if let Ok(resp) = client.get(&url).send().await {
            if resp.status().is_success() {
                healthy = true;
                break;
            }
        }
        sleep(Duration::from_millis(100)).await;
    }
    assert!(healthy, "server did not become healthy in time");

    cancel.cancel();
    server.await.expect("join").expect("serve");
}
