use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{RwLock, broadcast, mpsc};
use uuid::Uuid;

use parley_types::events::ServerEvent;

/// One live session: the per-connection id that guards cleanup, the
/// username presented at authentication, and the send half of the
/// connection's event channel.
struct SessionEntry {
    conn_id: Uuid,
    username: String,
    tx: mpsc::UnboundedSender<ServerEvent>,
}

/// Single source of truth for "is user X reachable now".
///
/// One live session per user id: a new connection for the same user silently
/// supersedes the prior mapping (last-writer-wins). The connection id guard
/// keeps a superseded connection's teardown from evicting its successor.
/// State is empty at process start; nothing here persists.
#[derive(Clone)]
pub struct PresenceRegistry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    /// Broadcast channel for process-wide events (presence, group deletion).
    broadcast_tx: broadcast::Sender<ServerEvent>,
    sessions: RwLock<HashMap<Uuid, SessionEntry>>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        let (broadcast_tx, _) = broadcast::channel(1024);
        Self {
            inner: Arc::new(RegistryInner {
                broadcast_tx,
                sessions: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Subscribe to broadcast events. Each connection holds one receiver.
    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.inner.broadcast_tx.subscribe()
    }

    /// Broadcast an event to every connected client.
    pub fn broadcast(&self, event: ServerEvent) {
        let _ = self.inner.broadcast_tx.send(event);
    }

    /// Install a session for `user_id`, superseding any existing one.
    /// Returns the connection id and the receive half of the session channel.
    pub async fn register(
        &self,
        user_id: Uuid,
        username: String,
    ) -> (Uuid, mpsc::UnboundedReceiver<ServerEvent>) {
        let conn_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.sessions.write().await.insert(
            user_id,
            SessionEntry {
                conn_id,
                username,
                tx,
            },
        );
        (conn_id, rx)
    }

    /// Remove the mapping for `user_id`, but only if `conn_id` still owns it.
    /// Returns whether an entry was removed; a stale or absent id is a no-op.
    pub async fn unregister(&self, user_id: Uuid, conn_id: Uuid) -> bool {
        let mut sessions = self.inner.sessions.write().await;
        if sessions.get(&user_id).is_some_and(|s| s.conn_id == conn_id) {
            sessions.remove(&user_id);
            true
        } else {
            false
        }
    }

    /// The connection id currently holding `user_id`'s session, if any.
    pub async fn lookup(&self, user_id: Uuid) -> Option<Uuid> {
        self.inner
            .sessions
            .read()
            .await
            .get(&user_id)
            .map(|s| s.conn_id)
    }

    pub async fn is_online(&self, user_id: Uuid) -> bool {
        self.inner.sessions.read().await.contains_key(&user_id)
    }

    /// Currently-registered users and their usernames.
    pub async fn snapshot(&self) -> Vec<(Uuid, String)> {
        self.inner
            .sessions
            .read()
            .await
            .iter()
            .map(|(id, s)| (*id, s.username.clone()))
            .collect()
    }

    /// Send an event to a specific user. Absent users are silently skipped.
    /// A send failure means the receive half is gone: the stale entry is
    /// unregistered immediately so it never looks live again.
    pub async fn send_to_user(&self, user_id: Uuid, event: ServerEvent) -> bool {
        let (conn_id, tx) = {
            let sessions = self.inner.sessions.read().await;
            match sessions.get(&user_id) {
                Some(s) => (s.conn_id, s.tx.clone()),
                None => return false,
            }
        };

        if tx.send(event).is_ok() {
            return true;
        }

        self.unregister(user_id, conn_id).await;
        false
    }
}

impl Default for PresenceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn register_then_lookup_then_unregister() {
        let registry = PresenceRegistry::new();
        let user = Uuid::new_v4();

        assert!(registry.lookup(user).await.is_none());

        let (conn, _rx) = registry.register(user, "alice".into()).await;
        assert_eq!(registry.lookup(user).await, Some(conn));
        assert!(registry.is_online(user).await);

        assert!(registry.unregister(user, conn).await);
        assert!(registry.lookup(user).await.is_none());
    }

    #[tokio::test]
    async fn new_connection_supersedes_prior_mapping() {
        let registry = PresenceRegistry::new();
        let user = Uuid::new_v4();

        let (old_conn, _old_rx) = registry.register(user, "alice".into()).await;
        let (new_conn, mut new_rx) = registry.register(user, "alice".into()).await;
        assert_ne!(old_conn, new_conn);
        assert_eq!(registry.lookup(user).await, Some(new_conn));

        // Only the new session receives.
        assert!(
            registry
                .send_to_user(user, ServerEvent::OnlineUsers { user_ids: vec![] })
                .await
        );
        assert!(new_rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn stale_conn_id_unregister_is_a_noop() {
        let registry = PresenceRegistry::new();
        let user = Uuid::new_v4();

        let (old_conn, _old_rx) = registry.register(user, "alice".into()).await;
        let (new_conn, _new_rx) = registry.register(user, "alice".into()).await;

        assert!(!registry.unregister(user, old_conn).await);
        assert_eq!(registry.lookup(user).await, Some(new_conn));
    }

    #[tokio::test]
    async fn unregister_removes_regardless_of_register_count() {
        let registry = PresenceRegistry::new();
        let user = Uuid::new_v4();

        let mut conn = Uuid::nil();
        for _ in 0..3 {
            let (c, _rx) = registry.register(user, "alice".into()).await;
            conn = c;
        }
        assert!(registry.unregister(user, conn).await);
        assert!(!registry.is_online(user).await);
    }

    #[tokio::test]
    async fn send_to_absent_user_is_a_noop() {
        let registry = PresenceRegistry::new();
        assert!(
            !registry
                .send_to_user(Uuid::new_v4(), ServerEvent::OnlineUsers { user_ids: vec![] })
                .await
        );
    }

    #[tokio::test]
    async fn failed_send_unregisters_the_stale_session() {
        let registry = PresenceRegistry::new();
        let user = Uuid::new_v4();

        let (_conn, rx) = registry.register(user, "alice".into()).await;
        drop(rx);

        assert!(
            !registry
                .send_to_user(user, ServerEvent::OnlineUsers { user_ids: vec![] })
                .await
        );
        assert!(!registry.is_online(user).await, "no stale entry may look live");
    }

    #[tokio::test]
    async fn snapshot_lists_current_users() {
        let registry = PresenceRegistry::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        let (_ca, _rxa) = registry.register(a, "alice".into()).await;
        let (_cb, _rxb) = registry.register(b, "bob".into()).await;

        let mut names: Vec<String> = registry
            .snapshot()
            .await
            .into_iter()
            .map(|(_, name)| name)
            .collect();
        names.sort();
        assert_eq!(names, vec!["alice".to_string(), "bob".to_string()]);
    }
}
