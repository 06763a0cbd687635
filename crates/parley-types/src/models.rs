use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identity as the external user domain exposes it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: Uuid,
    pub username: String,
}

impl UserProfile {
    /// Display name with the anonymized-account degrade applied.
    /// The identity domain renames deleted accounts to `UnknownUser_<id>`;
    /// those render the same as a lookup failure.
    pub fn display_name(&self) -> &str {
        if self.username.starts_with("UnknownUser_") {
            "Unknown User"
        } else {
            &self.username
        }
    }
}

/// The placeholder name used whenever identity resolution fails.
pub const UNKNOWN_USER: &str = "Unknown User";

/// Group as the membership domain exposes it in listings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupSummary {
    pub id: Uuid,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Group {
    pub id: Uuid,
    pub name: String,
    pub owner_id: Uuid,
}

/// Discriminates the two durable conversation kinds on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatType {
    Direct,
    Group,
}

/// A resolved reply reference carried inline on messages and history entries.
///
/// When the referenced message has been deleted, `id` and `from` are `None`
/// and `content` holds the sentinel body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplyPreview {
    pub id: Option<Uuid>,
    pub from: Option<String>,
    pub content: String,
}

impl ReplyPreview {
    pub const UNAVAILABLE: &'static str = "Message unavailable";

    /// The degraded preview shown when the reply target no longer exists.
    pub fn unavailable() -> Self {
        Self {
            id: None,
            from: None,
            content: Self::UNAVAILABLE.to_string(),
        }
    }
}

/// One direct-history entry, names resolved and reply inlined.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectHistoryEntry {
    pub id: Uuid,
    pub from: String,
    pub to: String,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<ReplyPreview>,
}

/// One group-history entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupHistoryEntry {
    pub id: Uuid,
    pub from: String,
    pub group: Uuid,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<ReplyPreview>,
}
