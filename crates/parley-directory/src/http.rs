use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;
use uuid::Uuid;

use parley_types::models::{GroupSummary, UserProfile};

use crate::{IdentityDirectory, MembershipDirectory};

/// Collaborator calls get a short fixed timeout so one slow dependency
/// cannot starve the issuing session.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(3);

/// HTTP client for the identity and group services.
#[derive(Clone)]
pub struct HttpDirectory {
    client: reqwest::Client,
    identity_url: String,
    group_url: String,
}

impl HttpDirectory {
    pub fn new(identity_url: String, group_url: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            client,
            identity_url,
            group_url,
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: String, token: &str) -> Option<T> {
        let res = match self.client.get(&url).bearer_auth(token).send().await {
            Ok(res) => res,
            Err(e) => {
                warn!("directory request to {} failed: {}", url, e);
                return None;
            }
        };
        if !res.status().is_success() {
            warn!("directory request to {} returned {}", url, res.status());
            return None;
        }
        match res.json::<T>().await {
            Ok(body) => Some(body),
            Err(e) => {
                warn!("directory response from {} undecodable: {}", url, e);
                None
            }
        }
    }
}

#[async_trait]
impl IdentityDirectory for HttpDirectory {
    async fn user_by_id(&self, id: Uuid, token: &str) -> Option<UserProfile> {
        self.get_json(format!("{}/users/{}", self.identity_url, id), token)
            .await
    }

    async fn user_by_username(&self, username: &str, token: &str) -> Option<UserProfile> {
        self.get_json(
            format!("{}/users/by-username/{}", self.identity_url, username),
            token,
        )
        .await
    }
}

#[async_trait]
impl MembershipDirectory for HttpDirectory {
    async fn group_members(&self, group_id: Uuid, token: &str) -> Vec<UserProfile> {
        self.get_json(format!("{}/groups/{}/members", self.group_url, group_id), token)
            .await
            .unwrap_or_default()
    }

    async fn groups_for_user(&self, user_id: Uuid, token: &str) -> Vec<GroupSummary> {
        self.get_json(format!("{}/groups/{}", self.group_url, user_id), token)
            .await
            .unwrap_or_default()
    }
}
