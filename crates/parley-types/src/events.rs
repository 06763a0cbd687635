use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{ChatType, ReplyPreview};

/// Frames sent FROM a client TO the server over the event stream.
///
/// Frames whose `type` tag is unrecognized fail to decode; the session
/// handler logs and ignores them rather than erroring the connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Send a durable direct message to one recipient.
    Direct {
        to: Uuid,
        content: String,
        #[serde(default)]
        reply_to: Option<ReplyPreview>,
        #[serde(default)]
        image_url: Option<String>,
    },

    /// Send a durable message to a group.
    Group {
        group: Uuid,
        content: String,
        #[serde(default)]
        reply_to: Option<ReplyPreview>,
        #[serde(default)]
        image_url: Option<String>,
    },

    /// Ephemeral: the sender is typing at a direct counterpart.
    Typing { to: Uuid },

    /// Ephemeral: the sender stopped typing at a direct counterpart.
    StopTyping { to: Uuid },

    /// Ephemeral: the sender is typing in a group.
    GroupTyping { group: Uuid },

    /// Ephemeral: the sender stopped typing in a group.
    GroupStopTyping { group: Uuid },
}

/// Events sent FROM the server TO clients over the event stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Server confirms successful authentication.
    Ready { user_id: Uuid, username: String },

    /// Snapshot of who is online, sent once after Ready.
    OnlineUsers { user_ids: Vec<Uuid> },

    /// A user came online or went offline.
    Presence {
        user_id: Uuid,
        username: String,
        online: bool,
    },

    /// A direct message was delivered live.
    Direct {
        id: Uuid,
        from: String,
        to: String,
        content: String,
        timestamp: DateTime<Utc>,
        #[serde(skip_serializing_if = "Option::is_none")]
        reply_to: Option<ReplyPreview>,
        #[serde(skip_serializing_if = "Option::is_none")]
        image_url: Option<String>,
    },

    /// A group message was delivered live.
    Group {
        id: Uuid,
        from: String,
        group: Uuid,
        content: String,
        timestamp: DateTime<Utc>,
        #[serde(skip_serializing_if = "Option::is_none")]
        reply_to: Option<ReplyPreview>,
        #[serde(skip_serializing_if = "Option::is_none")]
        image_url: Option<String>,
    },

    /// Plain-text error reported back to the offending sender only
    /// (e.g. unknown recipient).
    Error { message: String },

    Typing {
        from_user_id: Uuid,
        from_username: String,
    },

    StopTyping { from_user_id: Uuid },

    GroupTyping {
        group_id: Uuid,
        from_user_id: Uuid,
        from_username: String,
    },

    GroupStopTyping {
        group_id: Uuid,
        from_user_id: Uuid,
    },

    /// A single message was hard-deleted.
    Delete {
        id: Uuid,
        chat_type: ChatType,
        from: Uuid,
        #[serde(skip_serializing_if = "Option::is_none")]
        to: Option<Uuid>,
        #[serde(skip_serializing_if = "Option::is_none")]
        group_id: Option<Uuid>,
    },

    /// An entire conversation was deleted.
    ConversationDeleted {
        chat_type: ChatType,
        #[serde(skip_serializing_if = "Option::is_none")]
        user1: Option<Uuid>,
        #[serde(skip_serializing_if = "Option::is_none")]
        user2: Option<Uuid>,
        #[serde(skip_serializing_if = "Option::is_none")]
        group_id: Option<Uuid>,
    },

    /// A group ceased to exist (last member left, owner dissolved it).
    GroupDeleted { id: Uuid },

    /// Group ownership moved to another member.
    OwnerTransferred {
        group_id: Uuid,
        new_owner: String,
    },

    /// A member left a group.
    GroupLeft { group_id: Uuid, user_id: Uuid },

    /// A member was added to a group.
    MemberAdded { group_id: Uuid, username: String },

    /// A member was removed from a group by the owner.
    MemberRemoved { group_id: Uuid, user_id: Uuid },

    /// Notifies a specific user that they now belong to a group.
    GroupJoined {
        group_id: Uuid,
        group_name: String,
        username: String,
    },
}
