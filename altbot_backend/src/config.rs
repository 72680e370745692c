use crate::platform::Visibility;
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CONFIG_PATH: &str = "config.toml";
pub const PLACEHOLDER_SERVER: &str = "https://mastodon.example.com";
pub const DEFAULT_PRIVACY_POLICY_URL: &str =
    "https://github.com/micr0-dev/Altbot/blob/main/PRIVACY.md";

/// Full bot configuration as stored in `config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AltbotConfig {
    pub server: ServerConfig,
    pub llm: LlmConfig,
    pub gemini: GeminiConfig,
    pub transformers: TransformersConfig,
    pub localization: LocalizationConfig,
    pub dni: DniConfig,
    pub image_processing: ImageProcessingConfig,
    pub video_processing: VideoProcessingConfig,
    pub behavior: BehaviorConfig,
    pub power_metrics: PowerMetricsConfig,
    pub rate_limit: RateLimitConfig,
    pub alt_text_reminders: AltTextRemindersConfig,
    pub api: ApiConfig,
    pub storage: StorageConfig,
}

impl AltbotConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config: Self = toml::from_str(&raw)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let body = toml::to_string_pretty(self).context("failed to serialize config")?;
        fs::write(path, body)
            .with_context(|| format!("failed to write config file {}", path.display()))
    }

    /// Rejects configurations the bot cannot start with.
    pub fn validate(&self) -> Result<()> {
        let server = self.server.mastodon_server.trim();
        if server.is_empty() || server == PLACEHOLDER_SERVER {
            bail!("server.mastodon_server is not configured; run with --setup");
        }
        if self.server.access_token.trim().is_empty() {
            bail!("server.access_token is empty");
        }
        if self.server.username.trim().is_empty() {
            bail!("server.username is empty");
        }
        self.llm.provider_kind()?;
        self.behavior.visibility()?;
        if self.image_processing.downscale_width == 0 {
            bail!("image_processing.downscale_width must be positive");
        }
        if self.image_processing.max_size_mb == 0 || self.video_processing.max_size_mb == 0 {
            bail!("media max_size_mb values must be positive");
        }
        if self.rate_limit.enabled {
            let limits = [
                self.rate_limit.max_requests_per_user_per_minute,
                self.rate_limit.max_requests_per_user_per_hour,
                self.rate_limit.new_account_max_requests_per_minute,
                self.rate_limit.new_account_max_requests_per_hour,
                self.rate_limit.shadow_ban_threshold,
            ];
            if limits.iter().any(|limit| *limit == 0) {
                bail!("rate_limit limits and shadow_ban_threshold must be positive");
            }
        }
        if self.alt_text_reminders.enabled && self.alt_text_reminders.reminder_time == 0 {
            bail!("alt_text_reminders.reminder_time must be positive");
        }
        if self.api.enabled && self.api.monthly_limit == 0 {
            bail!("api.monthly_limit must be positive");
        }
        Ok(())
    }

    pub fn data_path(&self, file_name: &str) -> PathBuf {
        self.storage.data_dir.join(file_name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub mastodon_server: String,
    pub client_secret: String,
    pub access_token: String,
    pub username: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            mastodon_server: PLACEHOLDER_SERVER.to_string(),
            client_secret: String::new(),
            access_token: String::new(),
            username: "altbot".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    Gemini,
    Ollama,
    Transformers,
}

impl ProviderKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ProviderKind::Gemini => "gemini",
            ProviderKind::Ollama => "ollama",
            ProviderKind::Transformers => "transformers",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub provider: String,
    pub ollama_model: String,
    pub ollama_keep_alive: String,
    pub ollama_url: String,
    pub prompt_override: String,
    pub prompt_additional_instructions: String,
    /// Local providers describe in English, then translate the result.
    pub use_translation_layer: bool,
    /// Text model used for translation; empty means `ollama_model`.
    pub ollama_translation_model: String,
    /// Empty means `ollama_keep_alive`.
    pub ollama_translation_keep_alive: String,
}

impl LlmConfig {
    pub fn provider_kind(&self) -> Result<ProviderKind> {
        match self.provider.trim().to_ascii_lowercase().as_str() {
            "gemini" => Ok(ProviderKind::Gemini),
            "ollama" => Ok(ProviderKind::Ollama),
            "transformers" => Ok(ProviderKind::Transformers),
            other => bail!("unknown llm.provider {other:?}; expected gemini, ollama or transformers"),
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "gemini".to_string(),
            ollama_model: "llava-phi3".to_string(),
            ollama_keep_alive: "-1".to_string(),
            ollama_url: "http://localhost:11434".to_string(),
            prompt_override: String::new(),
            prompt_additional_instructions: String::new(),
            use_translation_layer: false,
            ollama_translation_model: String::new(),
            ollama_translation_keep_alive: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeminiConfig {
    pub model: String,
    pub api_key: String,
    pub temperature: f32,
    pub top_k: i32,
    pub api_url: String,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            model: "gemini-1.5-flash".to_string(),
            api_key: String::new(),
            temperature: 0.4,
            top_k: 32,
            api_url: "https://generativelanguage.googleapis.com".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransformersConfig {
    pub url: String,
    pub model: String,
}

impl Default for TransformersConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8000".to_string(),
            model: "Qwen/Qwen2.5-VL-7B-Instruct".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalizationConfig {
    pub default_language: String,
    pub path: PathBuf,
}

impl Default for LocalizationConfig {
    fn default() -> Self {
        Self {
            default_language: "en".to_string(),
            path: PathBuf::from("localizations.json"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DniConfig {
    pub tags: Vec<String>,
    pub ignore_bots: bool,
}

impl Default for DniConfig {
    fn default() -> Self {
        Self {
            tags: vec!["#nobot".to_string(), "#noai".to_string(), "#noaltbot".to_string()],
            ignore_bots: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageProcessingConfig {
    pub downscale_width: u32,
    pub max_size_mb: u64,
}

impl ImageProcessingConfig {
    pub fn max_bytes(&self) -> u64 {
        self.max_size_mb * 1024 * 1024
    }
}

impl Default for ImageProcessingConfig {
    fn default() -> Self {
        Self {
            downscale_width: 800,
            max_size_mb: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoProcessingConfig {
    pub max_size_mb: u64,
}

impl VideoProcessingConfig {
    pub fn max_bytes(&self) -> u64 {
        self.max_size_mb * 1024 * 1024
    }
}

impl Default for VideoProcessingConfig {
    fn default() -> Self {
        Self { max_size_mb: 40 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BehaviorConfig {
    pub reply_visibility: String,
    pub follow_back: bool,
    pub ask_for_consent: bool,
    pub privacy_policy_url: String,
}

impl BehaviorConfig {
    pub fn visibility(&self) -> Result<Visibility> {
        self.reply_visibility
            .parse()
            .with_context(|| format!("invalid behavior.reply_visibility {:?}", self.reply_visibility))
    }
}

impl Default for BehaviorConfig {
    fn default() -> Self {
        Self {
            reply_visibility: "unlisted".to_string(),
            follow_back: true,
            ask_for_consent: true,
            privacy_policy_url: DEFAULT_PRIVACY_POLICY_URL.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PowerMetricsConfig {
    pub enabled: bool,
    pub gpu_watts: f64,
}

impl Default for PowerMetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            gpu_watts: 250.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub enabled: bool,
    pub max_requests_per_user_per_minute: u32,
    pub max_requests_per_user_per_hour: u32,
    pub new_account_max_requests_per_minute: u32,
    pub new_account_max_requests_per_hour: u32,
    pub new_account_period_days: u32,
    pub shadow_ban_threshold: u32,
    pub admin_contact_handle: String,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_requests_per_user_per_minute: 5,
            max_requests_per_user_per_hour: 30,
            new_account_max_requests_per_minute: 2,
            new_account_max_requests_per_hour: 10,
            new_account_period_days: 30,
            shadow_ban_threshold: 3,
            admin_contact_handle: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AltTextRemindersConfig {
    pub enabled: bool,
    /// Minutes to wait after a reply before checking the post again.
    pub reminder_time: u64,
}

impl AltTextRemindersConfig {
    pub fn delay(&self) -> Duration {
        Duration::from_secs(self.reminder_time * 60)
    }
}

impl Default for AltTextRemindersConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            reminder_time: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub enabled: bool,
    pub port: u16,
    pub monthly_limit: u32,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: 8080,
            monthly_limit: 1000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("."),
        }
    }
}
