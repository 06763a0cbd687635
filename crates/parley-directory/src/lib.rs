//! Ports to the externally-owned identity and group domains.
//!
//! Both lookups are network round-trips in production and both degrade
//! rather than fail: identity misses become `None` (rendered as
//! "Unknown User"), membership misses become an empty list. Callers never
//! see a hard error from a collaborator outage; the tradeoff is logged at
//! warn where it happens.

pub mod http;
pub mod local;
pub mod fixtures;

use async_trait::async_trait;
use uuid::Uuid;

use parley_types::models::{GroupSummary, UNKNOWN_USER, UserProfile};

pub use http::HttpDirectory;
pub use local::LocalMembership;
pub use fixtures::StaticDirectory;

/// Lookup into the user domain. `token` is the requester's bearer credential,
/// forwarded as-is.
#[async_trait]
pub trait IdentityDirectory: Send + Sync {
    async fn user_by_id(&self, id: Uuid, token: &str) -> Option<UserProfile>;
    async fn user_by_username(&self, username: &str, token: &str) -> Option<UserProfile>;
}

/// Resolution against the group domain.
#[async_trait]
pub trait MembershipDirectory: Send + Sync {
    /// Members of a group, earliest joined first. Empty on any failure.
    async fn group_members(&self, group_id: Uuid, token: &str) -> Vec<UserProfile>;
    /// Groups the user belongs to. Empty on any failure.
    async fn groups_for_user(&self, user_id: Uuid, token: &str) -> Vec<GroupSummary>;
}

/// The display name for a lookup result, placeholder applied.
pub fn display_name(profile: Option<&UserProfile>) -> String {
    match profile {
        Some(p) => p.display_name().to_string(),
        None => UNKNOWN_USER.to_string(),
    }
}
