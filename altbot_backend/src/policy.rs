//! Pure per-event decisions. Nothing in here performs I/O.

use crate::config::DniConfig;
use crate::platform::{Account, Attachment, AttachmentType, Status};
use crate::provider::{Capabilities, MediaKind};
use crate::utils::strip_html;

/// Words and phrases accepted as a "yes" to a consent prompt.
pub const AFFIRMATIVE_TOKENS: &[&str] = &[
    "yes", "agree", "i agree", "consent", "i consent", "ok", "okay", "ja", "oui", "si",
];

/// Whether the bot must leave `account` alone: its own account, a bot when
/// bots are ignored, or a profile carrying a do-not-interact tag.
pub fn is_dni(account: &Account, bot_username: &str, dni: &DniConfig) -> bool {
    if account.acct.eq_ignore_ascii_case(bot_username) {
        return true;
    }
    if dni.ignore_bots && account.bot {
        return true;
    }
    let note = strip_html(&account.note).to_lowercase();
    dni.tags
        .iter()
        .map(|tag| tag.trim().to_lowercase())
        .any(|tag| !tag.is_empty() && note.contains(&tag))
}

fn is_word_char(c: Option<char>) -> bool {
    c.is_some_and(|c| c.is_ascii_alphabetic())
}

/// Whole-word, case-insensitive search for any affirmative token. A match
/// must not touch an ASCII letter on either side.
pub fn contains_affirmative(text: &str) -> bool {
    let text = text.to_lowercase();
    AFFIRMATIVE_TOKENS.iter().any(|token| {
        text.match_indices(token).any(|(start, matched)| {
            let before = text[..start].chars().next_back();
            let after = text[start + matched.len()..].chars().next();
            !is_word_char(before) && !is_word_char(after)
        })
    })
}

/// Legacy rule: the last whitespace-separated word is `y` or `yes`.
pub fn is_legacy_consent(plain_text: &str) -> bool {
    plain_text
        .split_whitespace()
        .last()
        .map(|word| word.to_lowercase())
        .is_some_and(|word| word == "y" || word == "yes")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdminCommand {
    Unban { user_id: String },
}

/// Parses `[@mentions...] unban <userId>` from the plain text of a mention.
pub fn parse_admin_command(plain_text: &str) -> Option<AdminCommand> {
    let words: Vec<&str> = plain_text
        .split_whitespace()
        .filter(|word| !word.starts_with('@'))
        .collect();
    match words.as_slice() {
        [verb, user_id] if verb.eq_ignore_ascii_case("unban") => Some(AdminCommand::Unban {
            user_id: user_id.to_string(),
        }),
        _ => None,
    }
}

pub fn is_admin(account: &Account, admin_handle: &str) -> bool {
    let admin = admin_handle.trim().trim_start_matches('@');
    !admin.is_empty() && account.acct.eq_ignore_ascii_case(admin)
}

/// What a single attachment turns into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachmentClass {
    Generate(MediaKind),
    AlreadyHasAlt,
    Unsupported,
}

pub fn media_kind(attachment: &Attachment, capabilities: &Capabilities) -> Option<MediaKind> {
    let kind = match attachment.kind {
        AttachmentType::Image => MediaKind::Image,
        AttachmentType::Video | AttachmentType::Gifv => MediaKind::Video,
        AttachmentType::Audio => MediaKind::Audio,
        AttachmentType::Unknown => return None,
    };
    capabilities.supports(kind).then_some(kind)
}

pub fn classify(attachment: &Attachment, capabilities: &Capabilities) -> AttachmentClass {
    if attachment.has_alt_text() {
        return AttachmentClass::AlreadyHasAlt;
    }
    match media_kind(attachment, capabilities) {
        Some(kind) => AttachmentClass::Generate(kind),
        None => AttachmentClass::Unsupported,
    }
}

/// At least one attachment is a kind the provider can describe.
pub fn has_supported_media(status: &Status, capabilities: &Capabilities) -> bool {
    status
        .media_attachments
        .iter()
        .any(|attachment| media_kind(attachment, capabilities).is_some())
}

/// At least one supported attachment still lacks author alt-text.
pub fn needs_alt_text(status: &Status, capabilities: &Capabilities) -> bool {
    status
        .media_attachments
        .iter()
        .any(|attachment| !attachment.has_alt_text() && media_kind(attachment, capabilities).is_some())
}

/// Facts the mention handler gathered about the source post.
#[derive(Debug, Clone, Copy)]
pub struct SourceFacts {
    pub sender_is_author: bool,
    pub sender_has_consent: bool,
    pub has_supported_media: bool,
    pub needs_alt_text: bool,
    pub legacy_consent_enabled: bool,
    pub legacy_request_open: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MentionDecision {
    /// Nothing to describe.
    Ignore,
    /// Author asked but has not consented yet.
    RequestConsent,
    Generate,
    /// Someone else asked; check with the author first.
    AskAuthor,
}

pub fn decide_mention(facts: SourceFacts) -> MentionDecision {
    if !facts.has_supported_media {
        return MentionDecision::Ignore;
    }
    if facts.sender_is_author {
        return if facts.sender_has_consent {
            MentionDecision::Generate
        } else {
            MentionDecision::RequestConsent
        };
    }
    if !facts.legacy_consent_enabled {
        return MentionDecision::Generate;
    }
    if facts.needs_alt_text && !facts.legacy_request_open {
        MentionDecision::AskAuthor
    } else {
        MentionDecision::Ignore
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateDecision {
    Ignore,
    RequestConsent,
    Generate,
}

/// A followed account posted something. Only posts with undescribed
/// supported media matter; a prompt already waiting for an answer is not
/// sent again.
pub fn decide_update(needs_alt_text: bool, author_has_consent: bool, consent_pending: bool) -> UpdateDecision {
    match (needs_alt_text, author_has_consent, consent_pending) {
        (false, _, _) => UpdateDecision::Ignore,
        (true, true, _) => UpdateDecision::Generate,
        (true, false, false) => UpdateDecision::RequestConsent,
        (true, false, true) => UpdateDecision::Ignore,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account(acct: &str) -> Account {
        Account {
            id: "1".into(),
            acct: acct.into(),
            ..Account::default()
        }
    }

    fn attachment(kind: AttachmentType, description: Option<&str>) -> Attachment {
        Attachment {
            id: "a".into(),
            kind,
            url: "https://cdn/a".into(),
            description: description.map(str::to_string),
        }
    }

    const IMAGE_ONLY: Capabilities = Capabilities {
        image: true,
        video: false,
        audio: false,
    };

    #[test]
    fn affirmative_requires_whole_words() {
        for text in ["Yes!", "yes.", "I agree.", "ok", "Oui, merci", "si", "JA"] {
            assert!(contains_affirmative(text), "{text:?} should grant");
        }
        for text in ["yesterday", "eyes", "okapi", "book", "disagreeable", "sister"] {
            assert!(!contains_affirmative(text), "{text:?} should not grant");
        }
    }

    #[test]
    fn affirmative_finds_later_occurrences() {
        assert!(contains_affirmative("eyes on it, yes"));
    }

    #[test]
    fn legacy_consent_checks_last_word() {
        assert!(is_legacy_consent("@altbot sure y"));
        assert!(is_legacy_consent("YES"));
        assert!(!is_legacy_consent("yes please"));
        assert!(!is_legacy_consent(""));
    }

    #[test]
    fn dni_covers_self_bots_and_tags() {
        let dni = DniConfig::default();
        assert!(is_dni(&account("altbot"), "altbot", &dni));

        let mut bot = account("robot");
        bot.bot = true;
        assert!(is_dni(&bot, "altbot", &dni));
        let lenient = DniConfig {
            ignore_bots: false,
            ..DniConfig::default()
        };
        assert!(!is_dni(&bot, "altbot", &lenient));

        let mut tagged = account("person");
        tagged.note = r#"<p>Artist. <a href="https://x.social/tags/nobot" class="mention hashtag">#<span>NoBot</span></a> please</p>"#.into();
        assert!(is_dni(&tagged, "altbot", &dni));
        assert!(!is_dni(&account("person"), "altbot", &dni));
    }

    #[test]
    fn admin_command_parsing() {
        assert_eq!(
            parse_admin_command("@altbot unban 12345"),
            Some(AdminCommand::Unban {
                user_id: "12345".into()
            })
        );
        assert_eq!(parse_admin_command("@altbot unban"), None);
        assert_eq!(parse_admin_command("@altbot please unban 1"), None);
        assert!(is_admin(&account("boss@example.org"), "@boss@example.org"));
        assert!(!is_admin(&account("boss"), ""));
    }

    #[test]
    fn classification_respects_alt_text_and_capabilities() {
        assert_eq!(
            classify(&attachment(AttachmentType::Image, None), &IMAGE_ONLY),
            AttachmentClass::Generate(MediaKind::Image)
        );
        assert_eq!(
            classify(&attachment(AttachmentType::Image, Some("a cat")), &IMAGE_ONLY),
            AttachmentClass::AlreadyHasAlt
        );
        assert_eq!(
            classify(&attachment(AttachmentType::Video, None), &IMAGE_ONLY),
            AttachmentClass::Unsupported
        );
        let everything = Capabilities {
            image: true,
            video: true,
            audio: true,
        };
        assert_eq!(
            classify(&attachment(AttachmentType::Gifv, None), &everything),
            AttachmentClass::Generate(MediaKind::Video)
        );
        assert_eq!(
            classify(&attachment(AttachmentType::Unknown, None), &everything),
            AttachmentClass::Unsupported
        );
    }

    #[test]
    fn media_checks_on_whole_status() {
        let mut status = Status::default();
        status.media_attachments = vec![
            attachment(AttachmentType::Image, Some("described")),
            attachment(AttachmentType::Audio, None),
        ];
        assert!(has_supported_media(&status, &IMAGE_ONLY));
        assert!(!needs_alt_text(&status, &IMAGE_ONLY));
        status.media_attachments.push(attachment(AttachmentType::Image, None));
        assert!(needs_alt_text(&status, &IMAGE_ONLY));
    }

    fn facts() -> SourceFacts {
        SourceFacts {
            sender_is_author: true,
            sender_has_consent: true,
            has_supported_media: true,
            needs_alt_text: true,
            legacy_consent_enabled: true,
            legacy_request_open: false,
        }
    }

    #[test]
    fn mention_decisions() {
        assert_eq!(decide_mention(facts()), MentionDecision::Generate);
        assert_eq!(
            decide_mention(SourceFacts {
                sender_has_consent: false,
                ..facts()
            }),
            MentionDecision::RequestConsent
        );
        assert_eq!(
            decide_mention(SourceFacts {
                has_supported_media: false,
                ..facts()
            }),
            MentionDecision::Ignore
        );
        let stranger = SourceFacts {
            sender_is_author: false,
            sender_has_consent: false,
            ..facts()
        };
        assert_eq!(decide_mention(stranger), MentionDecision::AskAuthor);
        assert_eq!(
            decide_mention(SourceFacts {
                legacy_request_open: true,
                ..stranger
            }),
            MentionDecision::Ignore
        );
        assert_eq!(
            decide_mention(SourceFacts {
                legacy_consent_enabled: false,
                ..stranger
            }),
            MentionDecision::Generate
        );
    }

    #[test]
    fn update_decisions() {
        assert_eq!(decide_update(false, true, false), UpdateDecision::Ignore);
        assert_eq!(decide_update(true, true, false), UpdateDecision::Generate);
        assert_eq!(decide_update(true, false, false), UpdateDecision::RequestConsent);
        assert_eq!(decide_update(true, false, true), UpdateDecision::Ignore);
    }
}
