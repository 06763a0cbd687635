use axum::{Extension, Json, extract::Path, extract::State};
use uuid::Uuid;

use parley_types::api::StatusResponse;
use parley_types::events::ServerEvent;
use parley_types::models::ChatType;

use crate::error::{ApiError, blocking};
use crate::history::parse_id;
use crate::middleware::AuthContext;
use crate::state::AppState;

/// Delete one direct message and notify both participants. The row is gone
/// before any event leaves the process; replies that pointed at it degrade
/// on their next render.
pub async fn delete_direct_message(
    State(state): State<AppState>,
    Path(message_id): Path<Uuid>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Json<StatusResponse>, ApiError> {
    let db = state.db.clone();
    let id = message_id.to_string();
    let row = blocking(move || db.get_direct_message(&id))
        .await?
        .ok_or(ApiError::NotFound)?;

    if row.sender_id != auth.user_id().to_string() {
        return Err(ApiError::Forbidden);
    }

    let db = state.db.clone();
    let id = message_id.to_string();
    blocking(move || db.delete_direct_message(&id)).await?;

    let sender = parse_id(&row.sender_id);
    let receiver = parse_id(&row.receiver_id);
    let event = ServerEvent::Delete {
        id: message_id,
        chat_type: ChatType::Direct,
        from: sender,
        to: Some(receiver),
        group_id: None,
    };
    state.fanout.deliver_to_users(&[sender, receiver], &event).await;

    Ok(Json(StatusResponse::deleted()))
}

pub async fn delete_group_message(
    State(state): State<AppState>,
    Path(message_id): Path<Uuid>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Json<StatusResponse>, ApiError> {
    let db = state.db.clone();
    let id = message_id.to_string();
    let row = blocking(move || db.get_group_message(&id))
        .await?
        .ok_or(ApiError::NotFound)?;

    if row.sender_id != auth.user_id().to_string() {
        return Err(ApiError::Forbidden);
    }

    let db = state.db.clone();
    let id = message_id.to_string();
    blocking(move || db.delete_group_message(&id)).await?;

    let group_id = parse_id(&row.group_id);
    let event = ServerEvent::Delete {
        id: message_id,
        chat_type: ChatType::Group,
        from: parse_id(&row.sender_id),
        to: None,
        group_id: Some(group_id),
    };
    state
        .fanout
        .deliver_to_group(group_id, &event, &auth.token)
        .await;

    Ok(Json(StatusResponse::deleted()))
}

/// Delete every message between two users, both directions. 404 when the
/// pair has no history at all.
pub async fn delete_direct_conversation(
    State(state): State<AppState>,
    Path((user_a, user_b)): Path<(Uuid, Uuid)>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Json<StatusResponse>, ApiError> {
    if auth.user_id() != user_a && auth.user_id() != user_b {
        return Err(ApiError::Forbidden);
    }

    let db = state.db.clone();
    let a = user_a.to_string();
    let b = user_b.to_string();
    let removed = blocking(move || db.delete_direct_conversation(&a, &b)).await?;
    if removed == 0 {
        return Err(ApiError::NotFound);
    }

    let event = ServerEvent::ConversationDeleted {
        chat_type: ChatType::Direct,
        user1: Some(user_a),
        user2: Some(user_b),
        group_id: None,
    };
    state.fanout.deliver_to_users(&[user_a, user_b], &event).await;

    Ok(Json(StatusResponse::deleted()))
}

/// Purging a group's history is owner-only when the group is hosted
/// locally. When the group domain is external (no local row), the caller
/// must at least resolve as a member; an unresolvable group fails closed.
pub async fn delete_group_conversation(
    State(state): State<AppState>,
    Path(group_id): Path<Uuid>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Json<StatusResponse>, ApiError> {
    let db = state.db.clone();
    let gid = group_id.to_string();
    let group = blocking(move || db.group_by_id(&gid)).await?;
    let authorized = match &group {
        Some(group) => group.owner_id == auth.user_id().to_string(),
        None => state
            .membership
            .group_members(group_id, &auth.token)
            .await
            .iter()
            .any(|m| m.id == auth.user_id()),
    };
    if !authorized {
        return Err(ApiError::Forbidden);
    }

    let db = state.db.clone();
    let gid = group_id.to_string();
    let removed = blocking(move || db.delete_group_conversation(&gid)).await?;
    if removed == 0 {
        return Err(ApiError::NotFound);
    }

    let event = ServerEvent::ConversationDeleted {
        chat_type: ChatType::Group,
        user1: None,
        user2: None,
        group_id: Some(group_id),
    };
    state
        .fanout
        .deliver_to_group(group_id, &event, &auth.token)
        .await;

    Ok(Json(StatusResponse::deleted()))
}
