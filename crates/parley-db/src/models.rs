/// Raw rows as stored. IDs and timestamps stay TEXT here; the API layer
/// parses them into `Uuid` / `DateTime<Utc>` when building responses.

#[derive(Debug, Clone)]
pub struct DirectMessageRow {
    pub id: String,
    pub sender_id: String,
    pub receiver_id: String,
    pub content: String,
    pub timestamp: String,
    pub reply_to_id: Option<String>,
    pub was_reply: bool,
    pub image_url: Option<String>,
    /// Filled by the history self-join: sender and content of the message
    /// this one replies to, if it still exists.
    pub reply_sender_id: Option<String>,
    pub reply_content: Option<String>,
}

#[derive(Debug, Clone)]
pub struct GroupMessageRow {
    pub id: String,
    pub sender_id: String,
    pub group_id: String,
    pub content: String,
    pub timestamp: String,
    pub reply_to_id: Option<String>,
    pub was_reply: bool,
    pub image_url: Option<String>,
    pub reply_sender_id: Option<String>,
    pub reply_content: Option<String>,
}

#[derive(Debug, Clone)]
pub struct GroupRow {
    pub id: String,
    pub name: String,
    pub owner_id: String,
}

#[derive(Debug, Clone)]
pub struct GroupMemberRow {
    pub id: i64,
    pub group_id: String,
    pub user_id: String,
}
