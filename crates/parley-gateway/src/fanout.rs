use std::sync::Arc;

use tracing::debug;
use uuid::Uuid;

use parley_directory::MembershipDirectory;
use parley_types::events::ServerEvent;

use crate::registry::PresenceRegistry;

/// Routes one payload to every currently-present member of a target set.
/// Best-effort, at-most-once: absent users are silently skipped, and a
/// broken session is unregistered on the spot by the registry. Group targets
/// are resolved through the membership port, which degrades to an empty
/// member list when the group domain is unreachable.
#[derive(Clone)]
pub struct Fanout {
    registry: PresenceRegistry,
    membership: Arc<dyn MembershipDirectory>,
}

impl Fanout {
    pub fn new(registry: PresenceRegistry, membership: Arc<dyn MembershipDirectory>) -> Self {
        Self {
            registry,
            membership,
        }
    }

    pub fn registry(&self) -> &PresenceRegistry {
        &self.registry
    }

    /// Deliver to one user if present. Returns whether delivery happened.
    pub async fn deliver_to_user(&self, user_id: Uuid, event: ServerEvent) -> bool {
        self.registry.send_to_user(user_id, event).await
    }

    /// Deliver to each listed user that is currently present.
    pub async fn deliver_to_users(&self, user_ids: &[Uuid], event: &ServerEvent) -> usize {
        let mut delivered = 0;
        for &user_id in user_ids {
            if self.registry.send_to_user(user_id, event.clone()).await {
                delivered += 1;
            }
        }
        delivered
    }

    /// Resolve the group's membership and deliver to every present member.
    pub async fn deliver_to_group(&self, group_id: Uuid, event: &ServerEvent, token: &str) -> usize {
        self.deliver_to_group_except(group_id, None, event, token)
            .await
    }

    /// Same, excluding one member (ephemeral typing never echoes the sender).
    pub async fn deliver_to_group_except(
        &self,
        group_id: Uuid,
        exclude: Option<Uuid>,
        event: &ServerEvent,
        token: &str,
    ) -> usize {
        let members = self.membership.group_members(group_id, token).await;
        debug!(
            "fanout to group {}: {} resolved members",
            group_id,
            members.len()
        );

        let mut delivered = 0;
        for member in members {
            if Some(member.id) == exclude {
                continue;
            }
            if self.registry.send_to_user(member.id, event.clone()).await {
                delivered += 1;
            }
        }
        delivered
    }

    /// Deliver to the entire current presence snapshot.
    pub fn broadcast(&self, event: ServerEvent) {
        self.registry.broadcast(event);
    }
}
