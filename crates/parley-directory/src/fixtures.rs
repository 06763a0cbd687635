//! In-memory directory used by tests. An absent entry behaves exactly like
//! a collaborator outage: identity misses resolve to `None`, membership
//! misses resolve to an empty list.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use uuid::Uuid;

use parley_types::models::{GroupSummary, UserProfile};

use crate::{IdentityDirectory, MembershipDirectory};

#[derive(Default)]
pub struct StaticDirectory {
    users: RwLock<HashMap<Uuid, String>>,
    members: RwLock<HashMap<Uuid, Vec<UserProfile>>>,
    user_groups: RwLock<HashMap<Uuid, Vec<GroupSummary>>>,
}

impl StaticDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_user(&self, id: Uuid, username: &str) {
        self.users.write().unwrap().insert(id, username.to_string());
    }

    pub fn set_group_members(&self, group_id: Uuid, members: Vec<UserProfile>) {
        self.members.write().unwrap().insert(group_id, members);
    }

    pub fn set_user_groups(&self, user_id: Uuid, groups: Vec<GroupSummary>) {
        self.user_groups.write().unwrap().insert(user_id, groups);
    }
}

#[async_trait]
impl IdentityDirectory for StaticDirectory {
    async fn user_by_id(&self, id: Uuid, _token: &str) -> Option<UserProfile> {
        self.users
            .read()
            .unwrap()
            .get(&id)
            .map(|username| UserProfile {
                id,
                username: username.clone(),
            })
    }

    async fn user_by_username(&self, username: &str, _token: &str) -> Option<UserProfile> {
        self.users
            .read()
            .unwrap()
            .iter()
            .find(|(_, name)| name.as_str() == username)
            .map(|(id, name)| UserProfile {
                id: *id,
                username: name.clone(),
            })
    }
}

#[async_trait]
impl MembershipDirectory for StaticDirectory {
    async fn group_members(&self, group_id: Uuid, _token: &str) -> Vec<UserProfile> {
        self.members
            .read()
            .unwrap()
            .get(&group_id)
            .cloned()
            .unwrap_or_default()
    }

    async fn groups_for_user(&self, user_id: Uuid, _token: &str) -> Vec<GroupSummary> {
        self.user_groups
            .read()
            .unwrap()
            .get(&user_id)
            .cloned()
            .unwrap_or_default()
    }
}
