use axum::{Extension, Json, extract::Path, extract::Query, extract::State};
use uuid::Uuid;

use parley_db::DepartureOutcome;
use parley_types::api::{
    AddMemberRequest, CleanupReport, CreateGroupRequest, GroupInfoResponse, StatusResponse,
    TransferOwnerRequest,
};
use parley_types::events::ServerEvent;
use parley_types::models::{Group, GroupSummary, UserProfile};

use crate::error::{ApiError, blocking};
use crate::history::{NameCache, parse_id};
use crate::middleware::AuthContext;
use crate::state::AppState;

async fn member_ids(state: &AppState, group_id: Uuid) -> Result<Vec<Uuid>, ApiError> {
    let db = state.db.clone();
    let gid = group_id.to_string();
    let ids = blocking(move || db.group_member_ids(&gid)).await?;
    Ok(ids.iter().map(|id| parse_id(id)).collect())
}

/// Create a group owned by the caller. The owner is always a member; the
/// requested member list is best-effort and duplicates are ignored.
pub async fn create_group(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(req): Json<CreateGroupRequest>,
) -> Result<Json<Group>, ApiError> {
    let group_id = Uuid::new_v4();
    let owner_id = auth.user_id();

    let db = state.db.clone();
    let name = req.name.clone();
    if blocking(move || db.group_name_exists(&name)).await? {
        return Err(ApiError::Conflict);
    }

    let mut members: Vec<String> = vec![owner_id.to_string()];
    for id in &req.member_ids {
        if *id != owner_id {
            members.push(id.to_string());
        }
    }

    let db = state.db.clone();
    let gid = group_id.to_string();
    let name = req.name.clone();
    let owner = owner_id.to_string();
    blocking(move || db.create_group(&gid, &name, &owner, &members)).await?;

    for member in req.member_ids {
        if member == owner_id {
            continue;
        }
        state
            .fanout
            .deliver_to_user(
                member,
                ServerEvent::GroupJoined {
                    group_id,
                    group_name: req.name.clone(),
                    username: auth.claims.username.clone(),
                },
            )
            .await;
    }

    Ok(Json(Group {
        id: group_id,
        name: req.name,
        owner_id,
    }))
}

pub async fn list_user_groups(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Json<Vec<GroupSummary>>, ApiError> {
    if auth.user_id() != user_id {
        return Err(ApiError::Forbidden);
    }
    let db = state.db.clone();
    let uid = user_id.to_string();
    let rows = blocking(move || db.groups_for_user(&uid)).await?;
    let groups = rows
        .into_iter()
        .map(|row| GroupSummary {
            id: parse_id(&row.id),
            name: row.name,
        })
        .collect();
    Ok(Json(groups))
}

/// Members of a group with names resolved through the identity domain;
/// unresolvable members render as the placeholder, never as an error.
pub async fn get_group_members(
    State(state): State<AppState>,
    Path(group_id): Path<Uuid>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Json<Vec<UserProfile>>, ApiError> {
    let db = state.db.clone();
    let gid = group_id.to_string();
    let group = blocking(move || db.group_by_id(&gid)).await?;
    if group.is_none() {
        return Err(ApiError::NotFound);
    }

    let db = state.db.clone();
    let gid = group_id.to_string();
    let ids = blocking(move || db.group_member_ids(&gid)).await?;

    let mut cache = NameCache::new();
    let mut members = Vec::with_capacity(ids.len());
    for raw in ids {
        let username = cache
            .resolve(state.identity.as_ref(), &raw, &auth.token)
            .await;
        members.push(UserProfile {
            id: parse_id(&raw),
            username,
        });
    }
    Ok(Json(members))
}

pub async fn group_info(
    State(state): State<AppState>,
    Path(group_id): Path<Uuid>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Json<GroupInfoResponse>, ApiError> {
    let db = state.db.clone();
    let gid = group_id.to_string();
    let group = blocking(move || db.group_by_id(&gid))
        .await?
        .ok_or(ApiError::NotFound)?;

    let mut cache = NameCache::new();
    let owner_username = cache
        .resolve(state.identity.as_ref(), &group.owner_id, &auth.token)
        .await;

    Ok(Json(GroupInfoResponse {
        id: group_id,
        name: group.name,
        owner_username,
    }))
}

/// Owner adds a member by username. 404 when the username does not resolve,
/// 409 when the user already belongs to the group.
pub async fn add_member(
    State(state): State<AppState>,
    Path(group_id): Path<Uuid>,
    Query(req): Query<AddMemberRequest>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Json<StatusResponse>, ApiError> {
    let db = state.db.clone();
    let gid = group_id.to_string();
    let group = blocking(move || db.group_by_id(&gid))
        .await?
        .ok_or(ApiError::NotFound)?;
    if group.owner_id != auth.user_id().to_string() {
        return Err(ApiError::Forbidden);
    }

    let profile = state
        .identity
        .user_by_username(&req.username, &auth.token)
        .await
        .ok_or(ApiError::NotFound)?;

    let db = state.db.clone();
    let gid = group_id.to_string();
    let uid = profile.id.to_string();
    let inserted = blocking(move || db.add_member(&gid, &uid)).await?;
    if !inserted {
        return Err(ApiError::Conflict);
    }

    let members = member_ids(&state, group_id).await?;
    let event = ServerEvent::MemberAdded {
        group_id,
        username: profile.username.clone(),
    };
    state.fanout.deliver_to_users(&members, &event).await;
    state
        .fanout
        .deliver_to_user(
            profile.id,
            ServerEvent::GroupJoined {
                group_id,
                group_name: group.name,
                username: profile.username,
            },
        )
        .await;

    Ok(Json(StatusResponse::ok()))
}

/// Owner removes a member by username. The removed user gets the event too
/// so their client can drop the conversation.
pub async fn remove_member(
    State(state): State<AppState>,
    Path((group_id, username)): Path<(Uuid, String)>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Json<StatusResponse>, ApiError> {
    let db = state.db.clone();
    let gid = group_id.to_string();
    let group = blocking(move || db.group_by_id(&gid))
        .await?
        .ok_or(ApiError::NotFound)?;
    if group.owner_id != auth.user_id().to_string() {
        return Err(ApiError::Forbidden);
    }

    let member_id = state
        .identity
        .user_by_username(&username, &auth.token)
        .await
        .ok_or(ApiError::NotFound)?
        .id;

    let db = state.db.clone();
    let gid = group_id.to_string();
    let uid = member_id.to_string();
    let removed = blocking(move || db.remove_member(&gid, &uid)).await?;
    if !removed {
        return Err(ApiError::NotFound);
    }

    let mut targets = member_ids(&state, group_id).await?;
    targets.push(member_id);
    let event = ServerEvent::MemberRemoved {
        group_id,
        user_id: member_id,
    };
    state.fanout.deliver_to_users(&targets, &event).await;

    Ok(Json(StatusResponse::ok()))
}

/// Owner dissolves the group outright. Membership rows cascade with the
/// group row; stored messages stay until a conversation purge.
pub async fn dissolve_group(
    State(state): State<AppState>,
    Path((group_id, user_id)): Path<(Uuid, Uuid)>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Json<StatusResponse>, ApiError> {
    let db = state.db.clone();
    let gid = group_id.to_string();
    let group = blocking(move || db.group_by_id(&gid))
        .await?
        .ok_or(ApiError::NotFound)?;
    if group.owner_id != auth.user_id().to_string() {
        return Err(ApiError::Forbidden);
    }

    let db = state.db.clone();
    let gid = group_id.to_string();
    let uid = user_id.to_string();
    if !blocking(move || db.is_member(&gid, &uid)).await? {
        return Err(ApiError::Forbidden);
    }

    let db = state.db.clone();
    let gid = group_id.to_string();
    blocking(move || db.delete_group(&gid).map(|_| ())).await?;

    state.fanout.broadcast(ServerEvent::GroupDeleted { id: group_id });
    Ok(Json(StatusResponse::deleted()))
}

/// Owner hands ownership to another user by username; the group hears
/// `owner_transferred` with the new owner's name.
pub async fn transfer_owner(
    State(state): State<AppState>,
    Path(group_id): Path<Uuid>,
    Query(req): Query<TransferOwnerRequest>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Json<StatusResponse>, ApiError> {
    let db = state.db.clone();
    let gid = group_id.to_string();
    let group = blocking(move || db.group_by_id(&gid))
        .await?
        .ok_or(ApiError::NotFound)?;
    if group.owner_id != auth.user_id().to_string() {
        return Err(ApiError::Forbidden);
    }

    let new_owner = state
        .identity
        .user_by_username(&req.new_owner_username, &auth.token)
        .await
        .ok_or(ApiError::NotFound)?;

    let db = state.db.clone();
    let gid = group_id.to_string();
    let oid = new_owner.id.to_string();
    blocking(move || db.set_group_owner(&gid, &oid)).await?;

    let members = member_ids(&state, group_id).await?;
    state
        .fanout
        .deliver_to_users(
            &members,
            &ServerEvent::OwnerTransferred {
                group_id,
                new_owner: new_owner.username,
            },
        )
        .await;

    Ok(Json(StatusResponse::owner_transferred()))
}

/// Deliver the side effects of one departure to whoever remains. The
/// ownership-transfer notice goes out before the generic departure notice so
/// clients never observe an ownerless group.
async fn emit_departure(
    state: &AppState,
    group_id: Uuid,
    leaver_id: Uuid,
    outcome: &DepartureOutcome,
) -> Result<(), ApiError> {
    match outcome {
        DepartureOutcome::GroupDeleted => {
            state.fanout.broadcast(ServerEvent::GroupDeleted { id: group_id });
        }
        DepartureOutcome::OwnershipTransferred { new_owner } => {
            let remaining = member_ids(state, group_id).await?;
            state
                .fanout
                .deliver_to_users(
                    &remaining,
                    &ServerEvent::OwnerTransferred {
                        group_id,
                        new_owner: new_owner.clone(),
                    },
                )
                .await;
            state
                .fanout
                .deliver_to_users(
                    &remaining,
                    &ServerEvent::GroupLeft {
                        group_id,
                        user_id: leaver_id,
                    },
                )
                .await;
        }
        DepartureOutcome::MemberLeft => {
            let remaining = member_ids(state, group_id).await?;
            state
                .fanout
                .deliver_to_users(
                    &remaining,
                    &ServerEvent::GroupLeft {
                        group_id,
                        user_id: leaver_id,
                    },
                )
                .await;
        }
    }
    Ok(())
}

pub async fn leave_group(
    State(state): State<AppState>,
    Path((group_id, user_id)): Path<(Uuid, Uuid)>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Json<StatusResponse>, ApiError> {
    if auth.user_id() != user_id {
        return Err(ApiError::Forbidden);
    }

    let db = state.db.clone();
    let gid = group_id.to_string();
    let uid = user_id.to_string();
    let outcome = blocking(move || db.leave_group(&gid, &uid))
        .await?
        .ok_or(ApiError::NotFound)?;

    emit_departure(&state, group_id, user_id, &outcome).await?;
    Ok(Json(StatusResponse::ok()))
}

/// Remove a departing or deleted user from every group they belong to,
/// emitting the same per-group events an explicit leave would. Safe to call
/// again; the second pass reports zeros.
pub async fn cleanup_user(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Json<CleanupReport>, ApiError> {
    if auth.user_id() != user_id {
        return Err(ApiError::Forbidden);
    }

    let db = state.db.clone();
    let uid = user_id.to_string();
    let (report, outcomes) = blocking(move || db.cleanup_user(&uid)).await?;

    for (gid, outcome) in &outcomes {
        emit_departure(&state, parse_id(gid), user_id, outcome).await?;
    }

    Ok(Json(report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::tests::{auth_for, test_state};
    use parley_directory::StaticDirectory;

    fn seed_group(state: &AppState, group_id: Uuid, name: &str, owner: Uuid, members: &[Uuid]) {
        let all: Vec<String> = std::iter::once(owner)
            .chain(members.iter().copied())
            .map(|id| id.to_string())
            .collect();
        state
            .db
            .create_group(&group_id.to_string(), name, &owner.to_string(), &all)
            .unwrap();
    }

    #[tokio::test]
    async fn owner_departure_transfers_then_announces_leave() {
        let owner = Uuid::new_v4();
        let member = Uuid::new_v4();
        let group = Uuid::new_v4();
        let state = test_state(StaticDirectory::new());
        seed_group(&state, group, "ops", owner, &[member]);

        let (_, mut member_rx) = state.registry.register(member, "m".into()).await;

        leave_group(
            State(state.clone()),
            Path((group, owner)),
            Extension(auth_for(owner, "o")),
        )
        .await
        .unwrap();

        let first = member_rx.try_recv().unwrap();
        assert!(matches!(
            first,
            ServerEvent::OwnerTransferred { ref new_owner, .. } if *new_owner == member.to_string()
        ));
        let second = member_rx.try_recv().unwrap();
        assert!(matches!(second, ServerEvent::GroupLeft { user_id, .. } if user_id == owner));

        assert_eq!(
            state.db.group_by_id(&group.to_string()).unwrap().unwrap().owner_id,
            member.to_string()
        );
    }

    #[tokio::test]
    async fn last_member_departure_deletes_and_broadcasts() {
        let owner = Uuid::new_v4();
        let group = Uuid::new_v4();
        let state = test_state(StaticDirectory::new());
        seed_group(&state, group, "ops", owner, &[]);

        let mut broadcast_rx = state.registry.subscribe();

        leave_group(
            State(state.clone()),
            Path((group, owner)),
            Extension(auth_for(owner, "o")),
        )
        .await
        .unwrap();

        let event = broadcast_rx.try_recv().unwrap();
        assert!(matches!(event, ServerEvent::GroupDeleted { id } if id == group));
        assert!(state.db.group_by_id(&group.to_string()).unwrap().is_none());
    }

    #[tokio::test]
    async fn leaving_a_group_twice_is_not_found() {
        let owner = Uuid::new_v4();
        let member = Uuid::new_v4();
        let group = Uuid::new_v4();
        let state = test_state(StaticDirectory::new());
        seed_group(&state, group, "ops", owner, &[member]);

        leave_group(
            State(state.clone()),
            Path((group, member)),
            Extension(auth_for(member, "m")),
        )
        .await
        .unwrap();
        let err = leave_group(
            State(state),
            Path((group, member)),
            Extension(auth_for(member, "m")),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ApiError::NotFound));
    }

    #[tokio::test]
    async fn add_member_rejects_duplicates_and_unknown_usernames() {
        let owner = Uuid::new_v4();
        let member = Uuid::new_v4();
        let group = Uuid::new_v4();
        let directory = StaticDirectory::new();
        directory.add_user(member, "mallory");
        let state = test_state(directory);
        seed_group(&state, group, "ops", owner, &[]);

        add_member(
            State(state.clone()),
            Path(group),
            Query(AddMemberRequest {
                username: "mallory".into(),
            }),
            Extension(auth_for(owner, "o")),
        )
        .await
        .unwrap();

        let err = add_member(
            State(state.clone()),
            Path(group),
            Query(AddMemberRequest {
                username: "mallory".into(),
            }),
            Extension(auth_for(owner, "o")),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ApiError::Conflict));

        let err = add_member(
            State(state),
            Path(group),
            Query(AddMemberRequest {
                username: "nobody".into(),
            }),
            Extension(auth_for(owner, "o")),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ApiError::NotFound));
    }

    #[tokio::test]
    async fn only_the_owner_manages_membership() {
        let owner = Uuid::new_v4();
        let member = Uuid::new_v4();
        let group = Uuid::new_v4();
        let state = test_state(StaticDirectory::new());
        seed_group(&state, group, "ops", owner, &[member]);

        let err = remove_member(
            State(state),
            Path((group, "o".to_string())),
            Extension(auth_for(member, "m")),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ApiError::Forbidden));
    }

    #[tokio::test]
    async fn owner_dissolves_the_group_and_everyone_hears_it() {
        let owner = Uuid::new_v4();
        let member = Uuid::new_v4();
        let group = Uuid::new_v4();
        let state = test_state(StaticDirectory::new());
        seed_group(&state, group, "ops", owner, &[member]);

        let mut broadcast_rx = state.registry.subscribe();

        // Only the owner may dissolve.
        let err = dissolve_group(
            State(state.clone()),
            Path((group, member)),
            Extension(auth_for(member, "m")),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ApiError::Forbidden));

        dissolve_group(
            State(state.clone()),
            Path((group, owner)),
            Extension(auth_for(owner, "o")),
        )
        .await
        .unwrap();

        let event = broadcast_rx.try_recv().unwrap();
        assert!(matches!(event, ServerEvent::GroupDeleted { id } if id == group));
        assert!(state.db.group_by_id(&group.to_string()).unwrap().is_none());
        assert!(state.db.group_member_ids(&group.to_string()).unwrap().is_empty());
    }

    #[tokio::test]
    async fn manual_ownership_transfer_updates_owner_and_notifies() {
        let owner = Uuid::new_v4();
        let member = Uuid::new_v4();
        let group = Uuid::new_v4();
        let directory = StaticDirectory::new();
        directory.add_user(member, "mallory");
        let state = test_state(directory);
        seed_group(&state, group, "ops", owner, &[member]);

        let (_, mut member_rx) = state.registry.register(member, "mallory".into()).await;

        transfer_owner(
            State(state.clone()),
            Path(group),
            Query(TransferOwnerRequest {
                new_owner_username: "mallory".into(),
            }),
            Extension(auth_for(owner, "o")),
        )
        .await
        .unwrap();

        assert_eq!(
            state.db.group_by_id(&group.to_string()).unwrap().unwrap().owner_id,
            member.to_string()
        );
        let event = member_rx.try_recv().unwrap();
        assert!(matches!(
            event,
            ServerEvent::OwnerTransferred { ref new_owner, .. } if new_owner == "mallory"
        ));

        // Unknown username resolves to 404; ownership stays put.
        let err = transfer_owner(
            State(state.clone()),
            Path(group),
            Query(TransferOwnerRequest {
                new_owner_username: "nobody".into(),
            }),
            Extension(auth_for(member, "mallory")),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ApiError::NotFound));
    }

    #[tokio::test]
    async fn duplicate_group_name_is_a_conflict() {
        let owner = Uuid::new_v4();
        let state = test_state(StaticDirectory::new());

        create_group(
            State(state.clone()),
            Extension(auth_for(owner, "o")),
            Json(CreateGroupRequest {
                name: "ops".into(),
                member_ids: vec![],
            }),
        )
        .await
        .unwrap();

        let err = create_group(
            State(state),
            Extension(auth_for(owner, "o")),
            Json(CreateGroupRequest {
                name: "ops".into(),
                member_ids: vec![],
            }),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ApiError::Conflict));
    }

    #[tokio::test]
    async fn cleanup_counts_owned_and_joined_groups() {
        let user = Uuid::new_v4();
        let other = Uuid::new_v4();
        let g1 = Uuid::new_v4();
        let g2 = Uuid::new_v4();
        let state = test_state(StaticDirectory::new());
        // sole member and owner of g1, plain member of other's g2
        seed_group(&state, g1, "ops", user, &[]);
        seed_group(&state, g2, "standup", other, &[user]);

        let Json(report) = cleanup_user(
            State(state.clone()),
            Path(user),
            Extension(auth_for(user, "u")),
        )
        .await
        .unwrap();
        assert_eq!(report.groups_cleaned, 2);
        assert_eq!(report.ownerships_transferred, 0);
        assert!(state.db.group_by_id(&g1.to_string()).unwrap().is_none());

        let Json(report) = cleanup_user(
            State(state),
            Path(user),
            Extension(auth_for(user, "u")),
        )
        .await
        .unwrap();
        assert_eq!(report.groups_cleaned, 0);
    }
}
