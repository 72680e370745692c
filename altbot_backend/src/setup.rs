//! Interactive first-run wizard that writes `config.toml`.

use crate::config::{AltbotConfig, ProviderKind};
use crate::platform::Visibility;
use anyhow::{Context, Result};
use std::io::{self, BufRead, Write};
use std::path::Path;

/// Runs the wizard on the terminal and saves the result to `path`.
pub fn run_setup(path: &Path) -> Result<AltbotConfig> {
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let config = prompt_config(&mut stdin.lock(), &mut stdout, AltbotConfig::default())?;
    config.save(path)?;
    writeln!(stdout, "\nConfiguration written to {}", path.display())?;
    tracing::info!(path = %path.display(), "configuration saved");
    Ok(config)
}

struct Prompter<'a, R, W> {
    input: &'a mut R,
    output: &'a mut W,
}

impl<R: BufRead, W: Write> Prompter<'_, R, W> {
    /// Empty input or end of input keeps `default`.
    fn ask(&mut self, question: &str, default: &str) -> Result<String> {
        if default.is_empty() {
            write!(self.output, "{question}: ")?;
        } else {
            write!(self.output, "{question} [{default}]: ")?;
        }
        self.output.flush()?;
        let mut line = String::new();
        self.input.read_line(&mut line).context("failed to read answer")?;
        let answer = line.trim();
        Ok(if answer.is_empty() {
            default.to_string()
        } else {
            answer.to_string()
        })
    }

    fn ask_bool(&mut self, question: &str, default: bool) -> Result<bool> {
        loop {
            let answer = self.ask(question, if default { "y" } else { "n" })?;
            match answer.to_ascii_lowercase().as_str() {
                "y" | "yes" | "true" => return Ok(true),
                "n" | "no" | "false" => return Ok(false),
                _ => writeln!(self.output, "Please answer y or n.")?,
            }
        }
    }

    fn ask_parsed<T: std::str::FromStr>(&mut self, question: &str, default: T) -> Result<T>
    where
        T: ToString,
    {
        let fallback = default.to_string();
        loop {
            let answer = self.ask(question, &fallback)?;
            match answer.parse() {
                Ok(value) => return Ok(value),
                Err(_) => writeln!(self.output, "Could not understand {answer:?}.")?,
            }
        }
    }
}

/// Walks through the settings most installations need to change, starting
/// from `config`.
pub fn prompt_config<R: BufRead, W: Write>(
    input: &mut R,
    output: &mut W,
    mut config: AltbotConfig,
) -> Result<AltbotConfig> {
    let mut p = Prompter { input, output };
    writeln!(p.output, "Altbot setup\n")?;

    config.server.mastodon_server = p
        .ask("Mastodon server URL", &config.server.mastodon_server)?
        .trim_end_matches('/')
        .to_string();
    config.server.access_token = p.ask("Access token", &config.server.access_token)?;
    config.server.username = p
        .ask("Bot username (without @)", &config.server.username)?
        .trim_start_matches('@')
        .to_string();

    let provider = loop {
        let answer = p.ask("Model provider (gemini, ollama, transformers)", &config.llm.provider)?;
        config.llm.provider = answer.to_ascii_lowercase();
        match config.llm.provider_kind() {
            Ok(kind) => break kind,
            Err(err) => writeln!(p.output, "{err}")?,
        }
    };
    match provider {
        ProviderKind::Gemini => {
            config.gemini.api_key = p.ask("Gemini API key", &config.gemini.api_key)?;
            config.gemini.model = p.ask("Gemini model", &config.gemini.model)?;
        }
        ProviderKind::Ollama => {
            config.llm.ollama_url = p.ask("Ollama URL", &config.llm.ollama_url)?;
            config.llm.ollama_model = p.ask("Ollama model", &config.llm.ollama_model)?;
        }
        ProviderKind::Transformers => {
            config.transformers.url = p.ask("Transformers server URL", &config.transformers.url)?;
            config.transformers.model = p.ask("Transformers model", &config.transformers.model)?;
        }
    }
    if provider != ProviderKind::Gemini {
        config.llm.use_translation_layer = p.ask_bool(
            "Describe in English first and translate other languages?",
            config.llm.use_translation_layer,
        )?;
    }

    let visibility: Visibility = p.ask_parsed(
        "Reply visibility (public, unlisted, private, direct)",
        config.behavior.visibility()?,
    )?;
    config.behavior.reply_visibility = visibility.to_string();
    config.behavior.follow_back = p.ask_bool("Follow back new followers?", config.behavior.follow_back)?;

    config.power_metrics.enabled = p.ask_bool(
        "Append an energy estimate to replies from local models?",
        config.power_metrics.enabled,
    )?;
    if config.power_metrics.enabled {
        config.power_metrics.gpu_watts = p.ask_parsed("GPU power draw in watts", config.power_metrics.gpu_watts)?;
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn answers_fill_the_config_and_blanks_keep_defaults() {
        let answers = "https://social.example.org/\nsecret\n@describer\nollama\n\nllava\ny\nbogus\ndirect\nn\ny\n300\n";
        let mut input = Cursor::new(answers.as_bytes());
        let mut output = Vec::new();
        let config = prompt_config(&mut input, &mut output, AltbotConfig::default()).expect("wizard");

        assert_eq!(config.server.mastodon_server, "https://social.example.org");
        assert_eq!(config.server.username, "describer");
        assert_eq!(config.llm.provider, "ollama");
        assert_eq!(config.llm.ollama_url, "http://localhost:11434");
        assert_eq!(config.llm.ollama_model, "llava");
        assert!(config.llm.use_translation_layer);
        assert_eq!(config.behavior.reply_visibility, "direct");
        assert!(!config.behavior.follow_back);
        assert!(config.power_metrics.enabled);
        assert_eq!(config.power_metrics.gpu_watts, 300.0);
        config.validate().expect("valid");

        let transcript = String::from_utf8(output).expect("utf8");
        assert!(transcript.contains("Could not understand \"bogus\""));
    }
}
