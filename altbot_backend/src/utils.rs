//! Shared helpers and constants.

use html2text::from_read;
use regex::Regex;
use std::sync::OnceLock;

pub const APP_NAME: &str = "altbot";
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub fn print_banner() {
    println!("{APP_NAME} v{VERSION}");
    println!("alt-text for the fediverse");
    println!();
}

/// Converts post HTML to plain text for keyword and consent matching.
/// Links keep their visible text; markup and entities are dropped.
pub fn strip_html(html: &str) -> String {
    if html.is_empty() {
        return String::new();
    }
    let text = from_read(html.as_bytes(), 10_000);
    let text = text.trim().replace('\u{00a0}', " ");
    strip_link_targets(&text)
}

// html2text renders anchors as `[label][1]` plus a footnote list; keep only the label.
fn strip_link_targets(text: &str) -> String {
    let mut lines = Vec::new();
    for line in text.lines() {
        let trimmed = line.trim_start();
        if trimmed.starts_with('[') && trimmed.contains("]: ") {
            continue;
        }
        lines.push(line);
    }
    let joined = lines.join("\n");
    static LINK: OnceLock<Regex> = OnceLock::new();
    let pattern = LINK.get_or_init(|| Regex::new(r"\[([^\]]*)\]\[\d+\]").unwrap());
    pattern.replace_all(&joined, "$1").trim().to_string()
}
