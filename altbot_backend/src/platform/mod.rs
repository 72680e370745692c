//! Minimal view of the microblogging platform the bot talks to.

pub mod mastodon;
mod sse;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub use mastodon::MastodonClient;

/// Audience scope of a post, ordered from widest to narrowest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    #[default]
    Public,
    Unlisted,
    Private,
    Direct,
}

impl Visibility {
    pub const ALL: [Visibility; 4] = [
        Visibility::Public,
        Visibility::Unlisted,
        Visibility::Private,
        Visibility::Direct,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Visibility::Public => "public",
            Visibility::Unlisted => "unlisted",
            Visibility::Private => "private",
            Visibility::Direct => "direct",
        }
    }

    pub(crate) fn index(self) -> usize {
        match self {
            Visibility::Public => 0,
            Visibility::Unlisted => 1,
            Visibility::Private => 2,
            Visibility::Direct => 3,
        }
    }
}

impl fmt::Display for Visibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown visibility {0:?}")]
pub struct ParseVisibilityError(String);

impl FromStr for Visibility {
    type Err = ParseVisibilityError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "public" => Ok(Visibility::Public),
            "unlisted" => Ok(Visibility::Unlisted),
            "private" => Ok(Visibility::Private),
            "direct" => Ok(Visibility::Direct),
            _ => Err(ParseVisibilityError(raw.to_string())),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    pub acct: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub note: String,
    #[serde(default)]
    pub bot: bool,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttachmentType {
    Image,
    Video,
    Gifv,
    Audio,
    #[default]
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    pub id: String,
    #[serde(rename = "type", default)]
    pub kind: AttachmentType,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub description: Option<String>,
}

impl Attachment {
    /// True when the author wrote a non-blank description.
    pub fn has_alt_text(&self) -> bool {
        self.description
            .as_deref()
            .is_some_and(|text| !text.trim().is_empty())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Status {
    pub id: String,
    pub account: Account,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub in_reply_to_id: Option<String>,
    #[serde(default)]
    pub visibility: Visibility,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub spoiler_text: String,
    #[serde(default)]
    pub media_attachments: Vec<Attachment>,
}

/// Body of a post the bot wants to publish.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewStatus {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub in_reply_to_id: Option<String>,
    pub visibility: Visibility,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spoiler_text: Option<String>,
}

impl NewStatus {
    pub fn new(status: impl Into<String>, visibility: Visibility) -> Self {
        Self {
            status: status.into(),
            in_reply_to_id: None,
            visibility,
            language: None,
            spoiler_text: None,
        }
    }

    pub fn in_reply_to(mut self, id: impl Into<String>) -> Self {
        self.in_reply_to_id = Some(id.into());
        self
    }

    pub fn language(mut self, language: Option<String>) -> Self {
        self.language = language.filter(|lang| !lang.is_empty());
        self
    }

    pub fn spoiler(mut self, spoiler: Option<String>) -> Self {
        self.spoiler_text = spoiler;
        self
    }
}

/// Tagged events produced by the user stream.
#[derive(Debug, Clone, PartialEq)]
pub enum PlatformEvent {
    /// Someone mentioned the bot; the status is the mention itself.
    Mention { account: Account, status: Status },
    Follow { account: Account },
    /// A post by a followed account showed up on the home timeline.
    Update(Status),
    /// A status was deleted; carries its id.
    Delete(String),
    /// The account blocked the bot.
    Block { account_id: String },
    Error(String),
}

impl PlatformEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            PlatformEvent::Mention { .. } => "mention",
            PlatformEvent::Follow { .. } => "follow",
            PlatformEvent::Update(_) => "update",
            PlatformEvent::Delete(_) => "delete",
            PlatformEvent::Block { .. } => "block",
            PlatformEvent::Error(_) => "error",
        }
    }
}

/// Operations the bot needs from the platform.
#[async_trait]
pub trait PlatformClient: Send + Sync {
    /// Opens the user event stream. Events flow until `cancel` fires or the
    /// receiver is dropped; transient disconnects are retried internally.
    async fn stream_user(&self, cancel: CancellationToken) -> Result<mpsc::Receiver<PlatformEvent>>;

    async fn get_status(&self, id: &str) -> Result<Status>;

    async fn post_status(&self, status: NewStatus) -> Result<Status>;

    async fn delete_status(&self, id: &str) -> Result<()>;

    async fn follow(&self, account_id: &str) -> Result<()>;

    async fn get_account(&self, account_id: &str) -> Result<Account>;

    async fn current_account(&self) -> Result<Account>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn visibility_parses_case_insensitively() {
        assert_eq!("Unlisted".parse::<Visibility>().expect("parse"), Visibility::Unlisted);
        assert!("followers".parse::<Visibility>().is_err());
    }

    #[test]
    fn visibility_orders_from_widest_to_narrowest() {
        assert!(Visibility::Public < Visibility::Unlisted);
        assert!(Visibility::Private < Visibility::Direct);
    }

    #[test]
    fn status_json_tolerates_unknown_media_types() {
        let raw = r#"{
            "id": "1",
            "account": {"id": "9", "acct": "alice@example.org", "username": "alice"},
            "content": "<p>hi</p>",
            "visibility": "unlisted",
            "spoiler_text": "",
            "media_attachments": [
                {"id": "a", "type": "image", "url": "https://cdn/a.png", "description": null},
                {"id": "b", "type": "hologram", "url": "https://cdn/b", "description": "  "}
            ]
        }"#;
        let status: Status = serde_json::from_str(raw).expect("parse");
        assert_eq!(status.visibility, Visibility::Unlisted);
        assert_eq!(status.media_attachments[1].kind, AttachmentType::Unknown);
        assert!(!status.media_attachments[0].has_alt_text());
        assert!(!status.media_attachments[1].has_alt_text());
    }
}
