use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;
use uuid::Uuid;

use parley_db::Database;
use parley_types::models::{GroupSummary, UNKNOWN_USER, UserProfile};

use crate::{IdentityDirectory, MembershipDirectory};

/// Membership resolution against the locally-hosted group tables, used when
/// this process also serves the group domain (no external group URL
/// configured). Identity stays external: member usernames are enriched
/// through the identity port, degrading per member.
pub struct LocalMembership {
    db: Arc<Database>,
    identity: Arc<dyn IdentityDirectory>,
}

impl LocalMembership {
    pub fn new(db: Arc<Database>, identity: Arc<dyn IdentityDirectory>) -> Self {
        Self { db, identity }
    }
}

#[async_trait]
impl MembershipDirectory for LocalMembership {
    async fn group_members(&self, group_id: Uuid, token: &str) -> Vec<UserProfile> {
        let db = self.db.clone();
        let gid = group_id.to_string();
        let member_ids = match tokio::task::spawn_blocking(move || db.group_member_ids(&gid)).await {
            Ok(Ok(ids)) => ids,
            Ok(Err(e)) => {
                warn!("membership lookup for group {} failed: {}", group_id, e);
                return vec![];
            }
            Err(e) => {
                warn!("membership lookup task for group {} panicked: {}", group_id, e);
                return vec![];
            }
        };

        let mut members = Vec::with_capacity(member_ids.len());
        for raw_id in member_ids {
            let Ok(id) = raw_id.parse::<Uuid>() else {
                warn!("corrupt member id '{}' in group {}", raw_id, group_id);
                continue;
            };
            let username = match self.identity.user_by_id(id, token).await {
                Some(profile) => profile.display_name().to_string(),
                None => UNKNOWN_USER.to_string(),
            };
            members.push(UserProfile { id, username });
        }
        members
    }

    async fn groups_for_user(&self, user_id: Uuid, token: &str) -> Vec<GroupSummary> {
        let _ = token;
        let db = self.db.clone();
        let uid = user_id.to_string();
        let rows = match tokio::task::spawn_blocking(move || db.groups_for_user(&uid)).await {
            Ok(Ok(rows)) => rows,
            Ok(Err(e)) => {
                warn!("group listing for user {} failed: {}", user_id, e);
                return vec![];
            }
            Err(e) => {
                warn!("group listing task for user {} panicked: {}", user_id, e);
                return vec![];
            }
        };

        rows.into_iter()
            .filter_map(|row| {
                let id = row.id.parse::<Uuid>().ok()?;
                Some(GroupSummary { id, name: row.name })
            })
            .collect()
    }
}
