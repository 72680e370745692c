//! Two-step generation for local models that describe well only in English:
//! describe the media in English, then ask the same backend to translate the
//! description without the media attached.

use super::{Capabilities, ModelProvider, SharedProvider};
use crate::localization::{keys, Localizer};
use anyhow::{Context, Result};
use async_trait::async_trait;

const ENGLISH: &str = "en";

const LANGUAGE_NAMES: &[(&str, &str)] = &[
    ("af", "Afrikaans"),
    ("am", "Amharic"),
    ("ar", "Arabic"),
    ("as", "Assamese"),
    ("az", "Azerbaijani"),
    ("be", "Belarusian"),
    ("bg", "Bulgarian"),
    ("bn", "Bengali"),
    ("bo", "Tibetan"),
    ("bs", "Bosnian"),
    ("ca", "Catalan"),
    ("cs", "Czech"),
    ("cy", "Welsh"),
    ("da", "Danish"),
    ("de", "German"),
    ("dv", "Dhivehi"),
    ("el", "Greek"),
    ("en", "English"),
    ("eo", "Esperanto"),
    ("es", "Spanish"),
    ("et", "Estonian"),
    ("eu", "Basque"),
    ("fa", "Persian"),
    ("fi", "Finnish"),
    ("fil", "Filipino"),
    ("fo", "Faroese"),
    ("fr", "French"),
    ("ga", "Irish"),
    ("gd", "Scottish Gaelic"),
    ("gl", "Galician"),
    ("gu", "Gujarati"),
    ("ha", "Hausa"),
    ("haw", "Hawaiian"),
    ("he", "Hebrew"),
    ("hi", "Hindi"),
    ("hr", "Croatian"),
    ("hu", "Hungarian"),
    ("hy", "Armenian"),
    ("id", "Indonesian"),
    ("ig", "Igbo"),
    ("is", "Icelandic"),
    ("it", "Italian"),
    ("ja", "Japanese"),
    ("jv", "Javanese"),
    ("ka", "Georgian"),
    ("kk", "Kazakh"),
    ("km", "Khmer"),
    ("kn", "Kannada"),
    ("ko", "Korean"),
    ("ky", "Kyrgyz"),
    ("la", "Latin"),
    ("lo", "Lao"),
    ("lt", "Lithuanian"),
    ("lv", "Latvian"),
    ("mi", "Maori"),
    ("mk", "Macedonian"),
    ("ml", "Malayalam"),
    ("mn", "Mongolian"),
    ("mr", "Marathi"),
    ("ms", "Malay"),
    ("mt", "Maltese"),
    ("my", "Burmese"),
    ("ne", "Nepali"),
    ("nl", "Dutch"),
    ("no", "Norwegian"),
    ("or", "Odia"),
    ("pa", "Punjabi"),
    ("pl", "Polish"),
    ("ps", "Pashto"),
    ("pt", "Portuguese"),
    ("ro", "Romanian"),
    ("ru", "Russian"),
    ("si", "Sinhala"),
    ("sk", "Slovak"),
    ("sl", "Slovenian"),
    ("sm", "Samoan"),
    ("so", "Somali"),
    ("sq", "Albanian"),
    ("sr", "Serbian"),
    ("st", "Sesotho"),
    ("su", "Sundanese"),
    ("sv", "Swedish"),
    ("sw", "Swahili"),
    ("ta", "Tamil"),
    ("te", "Telugu"),
    ("tg", "Tajik"),
    ("th", "Thai"),
    ("tk", "Turkmen"),
    ("tr", "Turkish"),
    ("tt", "Tatar"),
    ("ug", "Uyghur"),
    ("uk", "Ukrainian"),
    ("ur", "Urdu"),
    ("uz", "Uzbek"),
    ("vi", "Vietnamese"),
    ("xh", "Xhosa"),
    ("yi", "Yiddish"),
    ("yo", "Yoruba"),
    ("zh", "Chinese"),
    ("zu", "Zulu"),
];

/// English name for an ISO 639 code. Region suffixes are ignored, and
/// unknown codes are passed through so the model still gets a hint.
pub fn language_name(code: &str) -> String {
    let base = code
        .split(['-', '_'])
        .next()
        .unwrap_or(code)
        .to_ascii_lowercase();
    LANGUAGE_NAMES
        .iter()
        .find(|(known, _)| *known == base)
        .map(|(_, name)| (*name).to_string())
        .unwrap_or_else(|| code.to_string())
}

fn is_english(language: &str) -> bool {
    language.trim().to_ascii_lowercase().starts_with(ENGLISH)
}

fn translation_prompt(language: &str, description: &str) -> String {
    format!(
        "Translate the following image description to {}, maintaining all details. Your response should only be the translated text:\n\n{}",
        language_name(language),
        description
    )
}

/// Delegates to a local provider, routing non-English image and video
/// requests through English generation plus a text-only translation step.
pub struct TranslationLayer {
    inner: SharedProvider,
    image_prompt: String,
    video_prompt: String,
}

impl TranslationLayer {
    pub fn new(inner: SharedProvider, localizer: &Localizer) -> Self {
        Self {
            inner,
            image_prompt: localizer.prompt(ENGLISH, keys::GENERATE_ALT_TEXT),
            video_prompt: localizer.prompt(ENGLISH, keys::GENERATE_VIDEO_ALT_TEXT),
        }
    }

    async fn translate(&self, english: String, language: &str) -> Result<String> {
        let translated = self
            .inner
            .complete_text(&translation_prompt(language, &english))
            .await
            .with_context(|| format!("failed to translate alt-text to {language}"))?;
        tracing::debug!(language, "alt-text translated");
        Ok(translated)
    }
}

#[async_trait]
impl ModelProvider for TranslationLayer {
    fn name(&self) -> &'static str {
        self.inner.name()
    }

    fn capabilities(&self) -> Capabilities {
        self.inner.capabilities()
    }

    fn model_label(&self) -> String {
        self.inner.model_label()
    }

    fn is_local(&self) -> bool {
        self.inner.is_local()
    }

    async fn generate_image_alt_text(
        &self,
        prompt: &str,
        image: &[u8],
        format: &str,
        language: &str,
    ) -> Result<String> {
        if is_english(language) {
            return self
                .inner
                .generate_image_alt_text(prompt, image, format, language)
                .await;
        }
        let english = self
            .inner
            .generate_image_alt_text(&self.image_prompt, image, format, ENGLISH)
            .await
            .context("failed to generate English alt-text")?;
        self.translate(english, language).await
    }

    async fn generate_video_alt_text(
        &self,
        prompt: &str,
        video: &[u8],
        format: &str,
        language: &str,
    ) -> Result<String> {
        if is_english(language) {
            return self
                .inner
                .generate_video_alt_text(prompt, video, format, language)
                .await;
        }
        let english = self
            .inner
            .generate_video_alt_text(&self.video_prompt, video, format, ENGLISH)
            .await
            .context("failed to generate English video description")?;
        self.translate(english, language).await
    }

    async fn generate_audio_alt_text(
        &self,
        prompt: &str,
        audio: &[u8],
        format: &str,
        language: &str,
    ) -> Result<String> {
        self.inner
            .generate_audio_alt_text(prompt, audio, format, language)
            .await
    }

    async fn complete_text(&self, prompt: &str) -> Result<String> {
        self.inner.complete_text(prompt).await
    }

    async fn close(&self) -> Result<()> {
        self.inner.close().await
    }
}
