use std::collections::HashMap;

use axum::{Extension, Json, extract::Path, extract::State};
use chrono::Utc;
use uuid::Uuid;

use parley_db::format_timestamp;
use parley_types::api::{
    ConversationList, DirectPeerSummary, GroupConversationSummary, StatusResponse, UnreadSummary,
};

use crate::error::{ApiError, blocking};
use crate::history::{NameCache, parse_id, parse_ts};
use crate::middleware::AuthContext;
use crate::state::AppState;

fn assert_self(auth: &AuthContext, user_id: Uuid) -> Result<(), ApiError> {
    if auth.user_id() != user_id {
        return Err(ApiError::Forbidden);
    }
    Ok(())
}

/// Mark every message from `counterpart_id` to `user_id` as read. Idempotent:
/// re-marking an already-read conversation is a no-op.
pub async fn mark_direct_read(
    State(state): State<AppState>,
    Path((user_id, counterpart_id)): Path<(Uuid, Uuid)>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Json<StatusResponse>, ApiError> {
    assert_self(&auth, user_id)?;

    let db = state.db.clone();
    let reader = user_id.to_string();
    let counterpart = counterpart_id.to_string();
    let read_at = format_timestamp(Utc::now());
    blocking(move || db.mark_direct_read(&reader, &counterpart, &read_at)).await?;

    Ok(Json(StatusResponse::ok()))
}

pub async fn mark_group_read(
    State(state): State<AppState>,
    Path((user_id, group_id)): Path<(Uuid, Uuid)>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Json<StatusResponse>, ApiError> {
    assert_self(&auth, user_id)?;

    let db = state.db.clone();
    let reader = user_id.to_string();
    let group = group_id.to_string();
    let read_at = format_timestamp(Utc::now());
    blocking(move || db.mark_group_read(&reader, &group, &read_at)).await?;

    Ok(Json(StatusResponse::ok()))
}

/// Unread counts per direct counterpart and per group. Group counts are
/// scoped by resolved membership, so an unreachable membership resolver
/// degrades to zero group entries rather than an error.
pub async fn unread_counts(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Json<UnreadSummary>, ApiError> {
    assert_self(&auth, user_id)?;

    let db = state.db.clone();
    let uid = user_id.to_string();
    let direct_rows = blocking(move || db.direct_unread_counts(&uid)).await?;

    let memberships = state.membership.groups_for_user(user_id, &auth.token).await;
    let group_ids: Vec<String> = memberships.iter().map(|g| g.id.to_string()).collect();
    let db = state.db.clone();
    let uid = user_id.to_string();
    let group_rows = blocking(move || db.group_unread_counts(&uid, &group_ids)).await?;

    let direct: HashMap<Uuid, i64> = direct_rows
        .into_iter()
        .map(|(id, count)| (parse_id(&id), count))
        .collect();
    let groups: HashMap<Uuid, i64> = group_rows
        .into_iter()
        .map(|(id, count)| (parse_id(&id), count))
        .collect();

    Ok(Json(UnreadSummary { direct, groups }))
}

/// Every conversation the user participates in, with the latest message of
/// each. Direct peers are derived from the stored messages themselves.
pub async fn list_conversations(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Json<ConversationList>, ApiError> {
    assert_self(&auth, user_id)?;

    let db = state.db.clone();
    let uid = user_id.to_string();
    let partner_ids = blocking(move || db.direct_partners(&uid)).await?;

    let mut cache = NameCache::new();
    let mut users = Vec::with_capacity(partner_ids.len());
    for partner in partner_ids {
        let username = cache
            .resolve(state.identity.as_ref(), &partner, &auth.token)
            .await;
        let db = state.db.clone();
        let uid = user_id.to_string();
        let pid = partner.clone();
        let last = blocking(move || db.last_direct_message(&uid, &pid)).await?;
        users.push(DirectPeerSummary {
            id: parse_id(&partner),
            username,
            last_message: last.as_ref().map(|m| m.content.clone()),
            last_timestamp: last.as_ref().map(|m| parse_ts(&m.timestamp)),
        });
    }

    let memberships = state.membership.groups_for_user(user_id, &auth.token).await;
    let mut groups = Vec::with_capacity(memberships.len());
    for summary in memberships {
        let db = state.db.clone();
        let gid = summary.id.to_string();
        let last = blocking(move || db.last_group_message(&gid)).await?;
        groups.push(GroupConversationSummary {
            id: summary.id,
            name: summary.name,
            last_message: last.as_ref().map(|m| m.content.clone()),
            last_timestamp: last.as_ref().map(|m| parse_ts(&m.timestamp)),
        });
    }

    Ok(Json(ConversationList { users, groups }))
}
