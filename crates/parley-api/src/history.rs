use std::collections::HashMap;

use axum::{Extension, Json, extract::Path, extract::State};
use tracing::warn;
use uuid::Uuid;

use parley_db::parse_timestamp;
use parley_directory::IdentityDirectory;
use parley_types::models::{
    DirectHistoryEntry, GroupHistoryEntry, ReplyPreview, UNKNOWN_USER,
};

use crate::error::{ApiError, blocking};
use crate::middleware::AuthContext;
use crate::state::AppState;

/// Per-request username cache: history rows repeat the same few senders, so
/// each id goes to the identity port at most once per fetch.
pub(crate) struct NameCache {
    names: HashMap<String, String>,
}

impl NameCache {
    pub(crate) fn new() -> Self {
        Self {
            names: HashMap::new(),
        }
    }

    pub(crate) async fn resolve(
        &mut self,
        identity: &dyn IdentityDirectory,
        raw_id: &str,
        token: &str,
    ) -> String {
        if let Some(name) = self.names.get(raw_id) {
            return name.clone();
        }
        let name = match raw_id.parse::<Uuid>() {
            Ok(id) => match identity.user_by_id(id, token).await {
                Some(profile) => profile.display_name().to_string(),
                None => UNKNOWN_USER.to_string(),
            },
            Err(_) => {
                warn!("corrupt user id '{}' in stored message", raw_id);
                UNKNOWN_USER.to_string()
            }
        };
        self.names.insert(raw_id.to_string(), name.clone());
        name
    }
}

pub(crate) fn parse_id(raw: &str) -> Uuid {
    raw.parse().unwrap_or_else(|e| {
        warn!("corrupt id '{}': {}", raw, e);
        Uuid::nil()
    })
}

pub(crate) fn parse_ts(raw: &str) -> chrono::DateTime<chrono::Utc> {
    parse_timestamp(raw).unwrap_or_else(|| {
        warn!("corrupt timestamp '{}'", raw);
        chrono::DateTime::default()
    })
}

/// Inline reply resolution with the degrade rule: a reply whose target was
/// deleted renders the sentinel preview, never an error or a dangling id.
pub(crate) async fn build_reply(
    identity: &dyn IdentityDirectory,
    cache: &mut NameCache,
    token: &str,
    was_reply: bool,
    reply_to_id: Option<&str>,
    reply_sender_id: Option<&str>,
    reply_content: Option<&str>,
) -> Option<ReplyPreview> {
    if !was_reply {
        return None;
    }
    match (reply_to_id, reply_sender_id, reply_content) {
        (Some(id), Some(sender), Some(content)) => Some(ReplyPreview {
            id: Some(parse_id(id)),
            from: Some(cache.resolve(identity, sender, token).await),
            content: content.to_string(),
        }),
        _ => Some(ReplyPreview::unavailable()),
    }
}

/// Direct history between two users, both directions, oldest first.
pub async fn get_direct_history(
    State(state): State<AppState>,
    Path((user_a, user_b)): Path<(Uuid, Uuid)>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Json<Vec<DirectHistoryEntry>>, ApiError> {
    let db = state.db.clone();
    let a = user_a.to_string();
    let b = user_b.to_string();
    let rows = blocking(move || db.direct_conversation(&a, &b)).await?;

    let mut cache = NameCache::new();
    let mut entries = Vec::with_capacity(rows.len());
    for row in rows {
        let from = cache
            .resolve(state.identity.as_ref(), &row.sender_id, &auth.token)
            .await;
        let to = cache
            .resolve(state.identity.as_ref(), &row.receiver_id, &auth.token)
            .await;
        let reply_to = build_reply(
            state.identity.as_ref(),
            &mut cache,
            &auth.token,
            row.was_reply,
            row.reply_to_id.as_deref(),
            row.reply_sender_id.as_deref(),
            row.reply_content.as_deref(),
        )
        .await;

        entries.push(DirectHistoryEntry {
            id: parse_id(&row.id),
            from,
            to,
            content: row.content,
            image_url: row.image_url,
            timestamp: parse_ts(&row.timestamp),
            reply_to,
        });
    }

    Ok(Json(entries))
}

pub async fn get_group_history(
    State(state): State<AppState>,
    Path(group_id): Path<Uuid>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Json<Vec<GroupHistoryEntry>>, ApiError> {
    let db = state.db.clone();
    let gid = group_id.to_string();
    let rows = blocking(move || db.group_messages(&gid)).await?;

    let mut cache = NameCache::new();
    let mut entries = Vec::with_capacity(rows.len());
    for row in rows {
        let from = cache
            .resolve(state.identity.as_ref(), &row.sender_id, &auth.token)
            .await;
        let reply_to = build_reply(
            state.identity.as_ref(),
            &mut cache,
            &auth.token,
            row.was_reply,
            row.reply_to_id.as_deref(),
            row.reply_sender_id.as_deref(),
            row.reply_content.as_deref(),
        )
        .await;

        entries.push(GroupHistoryEntry {
            id: parse_id(&row.id),
            from,
            group: group_id,
            content: row.content,
            image_url: row.image_url,
            timestamp: parse_ts(&row.timestamp),
            reply_to,
        });
    }

    Ok(Json(entries))
}
