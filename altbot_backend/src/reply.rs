//! Turns per-attachment results into the text the bot posts.

use crate::localization::{keys, Localizer};
use crate::platform::Visibility;
use regex::Regex;
use std::sync::OnceLock;
use std::time::Duration;

pub const ELEMENT_SEPARATOR: &str = "\n\u{2015}\n";
pub const CONTENT_WARNING_PREFIX: &str = "re: ";

/// Reply visibility indexed by `[source][configured]`, widest to narrowest.
/// Every cell is the narrower of the two scopes.
const VISIBILITY_TABLE: [[Visibility; 4]; 4] = {
    use Visibility::{Direct as D, Private as P, Public as Pu, Unlisted as U};
    [
        [Pu, U, P, D],
        [U, U, P, D],
        [P, P, P, D],
        [D, D, D, D],
    ]
};

/// Table lookup only: the narrower of the configured and source scopes.
pub fn downgrade(configured: Visibility, source: Visibility) -> Visibility {
    VISIBILITY_TABLE[source.index()][configured.index()]
}

/// Chooses the reply's audience. A private source always yields a direct reply.
pub fn reply_visibility(configured: Visibility, source: Visibility) -> Visibility {
    if source == Visibility::Private {
        return Visibility::Direct;
    }
    downgrade(configured, source)
}

/// Carries a source content warning over, prefixed once with `re: `.
pub fn content_warning(source_spoiler: &str) -> Option<String> {
    let spoiler = source_spoiler.trim();
    if spoiler.is_empty() {
        return None;
    }
    if spoiler.starts_with(CONTENT_WARNING_PREFIX) {
        Some(spoiler.to_string())
    } else {
        Some(format!("{CONTENT_WARNING_PREFIX}{spoiler}"))
    }
}

/// Cleans model output: drops boilerplate lead-ins, defuses `@` so the reply
/// cannot mention anyone, and trims.
pub fn sanitize_alt_text(text: &str) -> String {
    static PREAMBLE: OnceLock<Regex> = OnceLock::new();
    let preamble = PREAMBLE.get_or_init(|| {
        Regex::new(r"(?i)here(?:'|\x{2019})?s (?:the )?alt[- ]text (?:describing|for) the (?:image|video|audio):?\s*")
            .unwrap()
    });
    let stripped = preamble.replace_all(text, "");
    stripped.replace('@', "[@]").trim().to_string()
}

/// Watt-hours used by `elapsed` of GPU time at `gpu_watts`.
pub fn energy_wh(elapsed: Duration, gpu_watts: f64) -> f64 {
    elapsed.as_millis() as f64 * gpu_watts / 3.6e6
}

/// One entry of a reply body.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseElement {
    /// Model output, already sanitized.
    Generated { text: String, elapsed: Duration },
    /// Localized notice standing in for an attachment.
    Notice(String),
}

impl ResponseElement {
    pub fn text(&self) -> &str {
        match self {
            ResponseElement::Generated { text, .. } => text,
            ResponseElement::Notice(text) => text,
        }
    }

    pub fn is_generated(&self) -> bool {
        matches!(self, ResponseElement::Generated { .. })
    }
}

/// Everything besides the elements that shapes the body.
#[derive(Debug, Clone)]
pub struct ReplyContext<'a> {
    pub author_acct: &'a str,
    pub bot_username: &'a str,
    pub model_label: &'a str,
    pub provider_is_local: bool,
    /// GPU watts when the energy line is enabled.
    pub energy_watts: Option<f64>,
    pub language: &'a str,
}

pub fn assemble_body(elements: &[ResponseElement], ctx: &ReplyContext<'_>, localizer: &Localizer) -> String {
    let joined = elements
        .iter()
        .map(ResponseElement::text)
        .collect::<Vec<_>>()
        .join(ELEMENT_SEPARATOR);
    let mut body = format!("@{} {}", ctx.author_acct, joined);

    if elements.iter().any(ResponseElement::is_generated) {
        let key = if ctx.provider_is_local {
            keys::PROVIDED_BY_LOCAL
        } else {
            keys::PROVIDED_BY
        };
        body.push_str("\n\n");
        body.push_str(&localizer.render(ctx.language, key, &[ctx.bot_username, ctx.model_label]));

        if let (true, Some(watts)) = (ctx.provider_is_local, ctx.energy_watts) {
            let elapsed = elements
                .iter()
                .map(|element| match element {
                    ResponseElement::Generated { elapsed, .. } => *elapsed,
                    ResponseElement::Notice(_) => Duration::ZERO,
                })
                .sum();
            let wh = format!("{:.6}", energy_wh(elapsed, watts));
            body.push('\n');
            body.push_str(&localizer.render(ctx.language, keys::ENERGY_USAGE, &[&wh]));
        }
    }
    body
}

/// Just the localized generic error, addressed to the author.
pub fn fallback_body(author_acct: &str, language: &str, localizer: &Localizer) -> String {
    format!("@{} {}", author_acct, localizer.response(language, keys::REPLY_ERROR))
}
