//! Localized prompts and reply strings.
//!
//! Strings come from `localizations.json` (`{lang: {prompts, responses}}`).
//! Lookups fall back to the configured default language and finally to the
//! built-in English table, so a missing file or key never yields an empty
//! reply.

use crate::config::{AltbotConfig, LlmConfig};
use anyhow::{Context, Result};
use regex::{Captures, Regex};
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::OnceLock;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LanguagePack {
    #[serde(default)]
    pub prompts: HashMap<String, String>,
    #[serde(default)]
    pub responses: HashMap<String, String>,
}

pub mod keys {
    pub const GENERATE_ALT_TEXT: &str = "generateAltText";
    pub const GENERATE_VIDEO_ALT_TEXT: &str = "generateVideoAltText";
    pub const GENERATE_AUDIO_ALT_TEXT: &str = "generateAudioAltText";

    pub const ALT_TEXT_ERROR: &str = "altTextError";
    pub const IMAGE_ALREADY_HAS_ALT_TEXT: &str = "imageAlreadyHasAltText";
    pub const UNSUPPORTED_FILE: &str = "unsupportedFile";
    pub const REPLY_ERROR: &str = "replyError";
    pub const PROVIDED_BY: &str = "providedByMessage";
    pub const PROVIDED_BY_LOCAL: &str = "providedByMessageLocal";
    pub const ENERGY_USAGE: &str = "energyUsageMessage";
    pub const CONSENT_REQUEST: &str = "consentRequest";
    pub const GDPR_WELCOME: &str = "gdprWelcomeMessage";
    pub const GDPR_CONSENT_REQUEST: &str = "gdprConsentRequest";
    pub const GDPR_CONSENT_CONFIRMATION: &str = "gdprConsentConfirmation";
    pub const ALT_TEXT_REMINDER: &str = "altTextReminder";
}

const BUILTIN_PROMPTS: &[(&str, &str)] = &[
    (
        keys::GENERATE_ALT_TEXT,
        "Write alt-text for this image for someone who cannot see it. Describe the important visual content and transcribe any legible text. Be concise and answer with the description only.",
    ),
    (
        keys::GENERATE_VIDEO_ALT_TEXT,
        "Write alt-text for this video for someone who cannot see it. Summarise what happens, who or what appears, and any on-screen text. Be concise and answer with the description only.",
    ),
    (
        keys::GENERATE_AUDIO_ALT_TEXT,
        "Write a text description of this audio for someone who cannot hear it. Transcribe speech and describe music or notable sounds. Be concise and answer with the description only.",
    ),
];

const BUILTIN_RESPONSES: &[(&str, &str)] = &[
    (keys::ALT_TEXT_ERROR, "Sorry, I couldn't generate a description for this one."),
    (
        keys::IMAGE_ALREADY_HAS_ALT_TEXT,
        "This media already has a description from its author.",
    ),
    (keys::UNSUPPORTED_FILE, "I can't describe this type of media yet."),
    (
        keys::REPLY_ERROR,
        "Something went wrong while posting the description. Please try again later.",
    ),
    (keys::PROVIDED_BY, "Alt-text generated by %s using %s"),
    (keys::PROVIDED_BY_LOCAL, "Alt-text generated locally by %s using %s"),
    (keys::ENERGY_USAGE, "Energy used: %.4f Wh"),
    (
        keys::CONSENT_REQUEST,
        "@%s asked me to describe the media in this post. Reply with \"y\" if that's okay with you.",
    ),
    (
        keys::GDPR_WELCOME,
        "Thanks for following! I write alt-text for media that is missing a description.",
    ),
    (
        keys::GDPR_CONSENT_REQUEST,
        "Before I can look at your posts I need your consent to process them, as explained in %s. Reply \"yes\" to agree.",
    ),
    (
        keys::GDPR_CONSENT_CONFIRMATION,
        "Thank you, your consent has been recorded. You can withdraw it at any time by blocking me.",
    ),
    (
        keys::ALT_TEXT_REMINDER,
        "@%s Friendly reminder: the media in your post still has no alt-text. Consider editing the post to add a description so everyone can enjoy it.",
    ),
];

fn builtin(table: &[(&str, &str)], key: &str) -> Option<String> {
    table
        .iter()
        .find(|(candidate, _)| *candidate == key)
        .map(|(_, value)| value.to_string())
}

#[derive(Debug, Clone, Default)]
pub struct Localizer {
    packs: HashMap<String, LanguagePack>,
    default_language: String,
    prompt_override: Option<String>,
    prompt_addition: Option<String>,
}

impl Localizer {
    pub fn new(packs: HashMap<String, LanguagePack>, default_language: &str, llm: &LlmConfig) -> Self {
        let non_blank = |text: &str| {
            let text = text.trim();
            (!text.is_empty()).then(|| text.to_string())
        };
        Self {
            packs,
            default_language: default_language.to_string(),
            prompt_override: non_blank(&llm.prompt_override),
            prompt_addition: non_blank(&llm.prompt_additional_instructions),
        }
    }

    /// Only the built-in English strings.
    pub fn builtin(llm: &LlmConfig) -> Self {
        Self::new(HashMap::new(), "en", llm)
    }

    /// Loads `localization.path`; a missing file leaves the built-ins in place.
    pub fn from_config(config: &AltbotConfig) -> Result<Self> {
        let packs = load_packs(&config.localization.path)?;
        tracing::info!(languages = packs.len(), "localizations loaded");
        Ok(Self::new(packs, &config.localization.default_language, &config.llm))
    }

    pub fn has_prompt_override(&self) -> bool {
        self.prompt_override.is_some()
    }

    pub fn has_prompt_addition(&self) -> bool {
        self.prompt_addition.is_some()
    }

    pub fn languages(&self) -> Vec<String> {
        let mut languages: Vec<String> = self.packs.keys().cloned().collect();
        languages.sort();
        languages
    }

    fn pack_value(&self, lang: &str, lookup: impl Fn(&LanguagePack) -> Option<&String>) -> Option<String> {
        self.packs
            .get(lang)
            .and_then(&lookup)
            .or_else(|| self.packs.get(&self.default_language).and_then(&lookup))
            .cloned()
    }

    /// Prompt for `key`. An override replaces the localized prompt; extra
    /// instructions are appended after a space.
    pub fn prompt(&self, lang: &str, key: &str) -> String {
        let mut prompt = match &self.prompt_override {
            Some(text) => text.clone(),
            None => self
                .pack_value(lang, |pack| pack.prompts.get(key))
                .or_else(|| builtin(BUILTIN_PROMPTS, key))
                .unwrap_or_default(),
        };
        if let Some(addition) = &self.prompt_addition {
            prompt.push(' ');
            prompt.push_str(addition);
        }
        prompt
    }

    pub fn response(&self, lang: &str, key: &str) -> String {
        self.pack_value(lang, |pack| pack.responses.get(key))
            .or_else(|| builtin(BUILTIN_RESPONSES, key))
            .unwrap_or_else(|| {
                tracing::warn!(lang, key, "missing localized response");
                String::new()
            })
    }

    /// Positional templating. Each `%s`, `%d`, `%v`, `%.Nf` or `{}` takes the
    /// next argument; `%.Nf` re-renders numeric arguments with N decimals.
    /// Placeholders beyond the argument list are left as they are.
    pub fn format(template: &str, args: &[&str]) -> String {
        static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
        let pattern = PLACEHOLDER.get_or_init(|| Regex::new(r"%(?:\.(\d+))?[sdvf]|\{\}").unwrap());
        let mut next = 0;
        pattern
            .replace_all(template, |caps: &Captures| {
                let Some(arg) = args.get(next) else {
                    return caps[0].to_string();
                };
                next += 1;
                match (caps.get(1), arg.parse::<f64>()) {
                    (Some(precision), Ok(value)) => {
                        let precision = precision.as_str().parse::<usize>().unwrap_or(2);
                        format!("{value:.precision$}")
                    }
                    _ => arg.to_string(),
                }
            })
            .into_owned()
    }

    pub fn render(&self, lang: &str, key: &str, args: &[&str]) -> String {
        Self::format(&self.response(lang, key), args)
    }
}

pub fn load_packs(path: &Path) -> Result<HashMap<String, LanguagePack>> {
    if !path.exists() {
        tracing::warn!(path = %path.display(), "localization file missing, using built-in English");
        return Ok(HashMap::new());
    }
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("failed to parse {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn localizer_with_german(llm: &LlmConfig) -> Localizer {
        let mut packs = HashMap::new();
        let mut de = LanguagePack::default();
        de.prompts
            .insert(keys::GENERATE_ALT_TEXT.into(), "Beschreibe dieses Bild.".into());
        de.responses
            .insert(keys::ALT_TEXT_ERROR.into(), "Leider fehlgeschlagen.".into());
        packs.insert("de".to_string(), de);
        Localizer::new(packs, "en", llm)
    }

    #[test]
    fn lookup_prefers_language_then_builtin() {
        let localizer = localizer_with_german(&LlmConfig::default());
        assert_eq!(localizer.response("de", keys::ALT_TEXT_ERROR), "Leider fehlgeschlagen.");
        assert!(localizer
            .response("de", keys::UNSUPPORTED_FILE)
            .contains("can't describe"));
        assert!(localizer.response("xx", keys::ALT_TEXT_ERROR).starts_with("Sorry"));
        assert_eq!(localizer.prompt("de", keys::GENERATE_ALT_TEXT), "Beschreibe dieses Bild.");
    }

    #[test]
    fn override_replaces_and_addition_appends() {
        let mut llm = LlmConfig::default();
        llm.prompt_override = "Describe tersely.".into();
        llm.prompt_additional_instructions = "Use British spelling.".into();
        let localizer = localizer_with_german(&llm);
        assert_eq!(
            localizer.prompt("de", keys::GENERATE_ALT_TEXT),
            "Describe tersely. Use British spelling."
        );

        let mut llm = LlmConfig::default();
        llm.prompt_additional_instructions = "Mention colours.".into();
        let localizer = localizer_with_german(&llm);
        assert_eq!(
            localizer.prompt("de", keys::GENERATE_ALT_TEXT),
            "Beschreibe dieses Bild. Mention colours."
        );
    }

    #[test]
    fn format_fills_placeholders_in_order() {
        assert_eq!(
            Localizer::format("by @%s using %s", &["altbot", "Gemini"]),
            "by @altbot using Gemini"
        );
        assert_eq!(Localizer::format("{} and {}", &["a", "b"]), "a and b");
        assert_eq!(Localizer::format("%.2f Wh", &["0.123456"]), "0.12 Wh");
        assert_eq!(Localizer::format("%s and %s", &["only"]), "only and %s");
    }

    #[test]
    fn load_packs_reads_json_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("localizations.json");
        std::fs::write(
            &path,
            r#"{"fr": {"prompts": {}, "responses": {"replyError": "Oups"}}}"#,
        )
        .expect("write");
        let packs = load_packs(&path).expect("load");
        let localizer = Localizer::new(packs, "en", &LlmConfig::default());
        assert_eq!(localizer.response("fr", keys::REPLY_ERROR), "Oups");
        assert_eq!(localizer.languages(), vec!["fr".to_string()]);
        assert!(load_packs(&dir.path().join("missing.json")).expect("missing").is_empty());
    }
}
