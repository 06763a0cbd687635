use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// -- JWT Claims --

/// JWT claims issued by the external identity domain. Canonical definition
/// lives here so the REST middleware and the WebSocket upgrade validate the
/// same shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub username: String,
    pub exp: usize,
}

// -- Unread aggregation --

/// Per-counterpart and per-group unread counts for one user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnreadSummary {
    pub direct: HashMap<Uuid, i64>,
    pub groups: HashMap<Uuid, i64>,
}

// -- Conversation listing --

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectPeerSummary {
    pub id: Uuid,
    pub username: String,
    pub last_message: Option<String>,
    pub last_timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupConversationSummary {
    pub id: Uuid,
    pub name: String,
    pub last_message: Option<String>,
    pub last_timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationList {
    pub users: Vec<DirectPeerSummary>,
    pub groups: Vec<GroupConversationSummary>,
}

// -- Groups --

#[derive(Debug, Deserialize)]
pub struct CreateGroupRequest {
    pub name: String,
    pub member_ids: Vec<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct AddMemberRequest {
    pub username: String,
}

#[derive(Debug, Deserialize)]
pub struct TransferOwnerRequest {
    pub new_owner_username: String,
}

#[derive(Debug, Serialize)]
pub struct GroupInfoResponse {
    pub id: Uuid,
    pub name: String,
    pub owner_username: String,
}

/// Result of removing a departing or deleted user from every group.
/// Re-invoking cleanup is safe; a second pass reports zeros.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupReport {
    pub groups_cleaned: u32,
    pub ownerships_transferred: u32,
}

// -- Generic status --

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: &'static str,
}

impl StatusResponse {
    pub fn ok() -> Self {
        Self { status: "ok" }
    }

    pub fn deleted() -> Self {
        Self { status: "deleted" }
    }

    pub fn owner_transferred() -> Self {
        Self {
            status: "owner_transferred",
        }
    }
}
