use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tokio::task::spawn_blocking;
use tracing::{error, info, warn};
use uuid::Uuid;

use parley_db::{Database, format_timestamp};
use parley_directory::{IdentityDirectory, MembershipDirectory};
use parley_types::events::{ClientFrame, ServerEvent};

use crate::fanout::Fanout;
use crate::registry::PresenceRegistry;

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Everything a session needs to handle frames: the shared registry, the
/// fanout engine over it, the conversation store, and the collaborator ports.
#[derive(Clone)]
pub struct GatewayContext {
    pub registry: PresenceRegistry,
    pub fanout: Fanout,
    pub db: Arc<Database>,
    pub identity: Arc<dyn IdentityDirectory>,
    pub membership: Arc<dyn MembershipDirectory>,
}

/// Run one authenticated session to completion.
///
/// The credential was already validated at the HTTP upgrade (Connecting →
/// Authenticated happened there); this function registers presence, sends
/// the Ready + online snapshot, runs the Active frame loop, and on any exit
/// path unregisters and broadcasts offline (Closed). `token` is the raw
/// bearer credential, forwarded to collaborator calls made on this
/// session's behalf.
pub async fn handle_socket(
    socket: WebSocket,
    ctx: GatewayContext,
    user_id: Uuid,
    username: String,
    token: String,
) {
    let (mut sender, mut receiver) = socket.split();

    info!("{} ({}) connected", username, user_id);

    let ready = ServerEvent::Ready {
        user_id,
        username: username.clone(),
    };
    if send_event(&mut sender, &ready).await.is_err() {
        return;
    }

    // Register presence, then show the new session who is already here.
    let (conn_id, mut session_rx) = ctx.registry.register(user_id, username.clone()).await;

    let online: Vec<Uuid> = ctx
        .registry
        .snapshot()
        .await
        .into_iter()
        .map(|(id, _)| id)
        .collect();
    if send_event(&mut sender, &ServerEvent::OnlineUsers { user_ids: online })
        .await
        .is_err()
    {
        ctx.registry.unregister(user_id, conn_id).await;
        return;
    }

    ctx.registry.broadcast(ServerEvent::Presence {
        user_id,
        username: username.clone(),
        online: true,
    });

    let mut broadcast_rx = ctx.registry.subscribe();

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Forward broadcasts + targeted events to the client, with heartbeat.
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                result = broadcast_rx.recv() => {
                    let event = match result {
                        Ok(event) => event,
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                            warn!("broadcast receiver lagged by {} events", n);
                            continue;
                        }
                        Err(_) => break,
                    };
                    if send_event(&mut sender, &event).await.is_err() {
                        break;
                    }
                }
                result = session_rx.recv() => {
                    let event = match result {
                        Some(event) => event,
                        None => break,
                    };
                    if send_event(&mut sender, &event).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Sequential frame loop: one frame fully handled before the next.
    let ctx_recv = ctx.clone();
    let username_recv = username.clone();
    let token_recv = token.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<ClientFrame>(&text) {
                    Ok(frame) => {
                        handle_frame(&ctx_recv, user_id, &username_recv, &token_recv, frame).await;
                    }
                    Err(e) => {
                        // Unknown or malformed frame kinds are ignored.
                        warn!(
                            "{} ({}) unhandled frame: {} -- raw: {}",
                            username_recv,
                            user_id,
                            e,
                            truncate_for_log(&text, 200)
                        );
                    }
                },
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    // Conn-guarded teardown: if a newer connection superseded this one,
    // leave its presence alone.
    if ctx.registry.unregister(user_id, conn_id).await {
        ctx.registry.broadcast(ServerEvent::Presence {
            user_id,
            username: username.clone(),
            online: false,
        });
    }
    info!("{} ({}) disconnected", username, user_id);
}

async fn send_event(
    sender: &mut futures_util::stream::SplitSink<WebSocket, Message>,
    event: &ServerEvent,
) -> Result<(), axum::Error> {
    let text = match serde_json::to_string(event) {
        Ok(text) => text,
        Err(e) => {
            // Never emit an empty frame; drop the event and keep the session.
            warn!("failed to encode outbound event: {}", e);
            return Ok(());
        }
    };
    sender.send(Message::Text(text.into())).await
}

/// Handle one inbound frame. Durable kinds persist before any fanout so a
/// delivered event is never observed before the message is fetchable.
pub async fn handle_frame(
    ctx: &GatewayContext,
    user_id: Uuid,
    username: &str,
    token: &str,
    frame: ClientFrame,
) {
    match frame {
        ClientFrame::Direct {
            to,
            content,
            reply_to,
            image_url,
        } => {
            let Some(receiver) = ctx.identity.user_by_id(to, token).await else {
                warn!("{} ({}) direct to unknown user {}", username, user_id, to);
                ctx.registry
                    .send_to_user(
                        user_id,
                        ServerEvent::Error {
                            message: format!("User {} not found", to),
                        },
                    )
                    .await;
                return;
            };

            let message_id = Uuid::new_v4();
            let now = chrono::Utc::now();

            let db = ctx.db.clone();
            let mid = message_id.to_string();
            let sid = user_id.to_string();
            let rid = to.to_string();
            let body = content.clone();
            let ts = format_timestamp(now);
            let reply_id = reply_to.as_ref().and_then(|r| r.id).map(|id| id.to_string());
            let image = image_url.clone();
            let inserted = spawn_blocking(move || {
                db.insert_direct_message(
                    &mid,
                    &sid,
                    &rid,
                    &body,
                    &ts,
                    reply_id.as_deref(),
                    image.as_deref(),
                )
            })
            .await;
            if let Err(e) = flatten(inserted) {
                error!("failed to persist direct message: {}", e);
                return;
            }

            let event = ServerEvent::Direct {
                id: message_id,
                from: username.to_string(),
                to: receiver.display_name().to_string(),
                content,
                timestamp: now,
                reply_to,
                image_url,
            };
            ctx.fanout.deliver_to_users(&[user_id, to], &event).await;
        }

        ClientFrame::Group {
            group,
            content,
            reply_to,
            image_url,
        } => {
            let message_id = Uuid::new_v4();
            let now = chrono::Utc::now();

            let db = ctx.db.clone();
            let mid = message_id.to_string();
            let sid = user_id.to_string();
            let gid = group.to_string();
            let body = content.clone();
            let ts = format_timestamp(now);
            let reply_id = reply_to.as_ref().and_then(|r| r.id).map(|id| id.to_string());
            let image = image_url.clone();
            let inserted = spawn_blocking(move || {
                db.insert_group_message(
                    &mid,
                    &sid,
                    &gid,
                    &body,
                    &ts,
                    reply_id.as_deref(),
                    image.as_deref(),
                )
            })
            .await;
            if let Err(e) = flatten(inserted) {
                error!("failed to persist group message: {}", e);
                return;
            }

            // Membership resolution after the write: an unreachable group
            // domain costs the markers and the live fanout, never the
            // message itself.
            let members = ctx.membership.group_members(group, token).await;
            let member_ids: Vec<Uuid> = members.iter().map(|m| m.id).collect();

            let db = ctx.db.clone();
            let mid = message_id.to_string();
            let sid = user_id.to_string();
            let marker_ids: Vec<String> = member_ids.iter().map(|id| id.to_string()).collect();
            let seeded =
                spawn_blocking(move || db.seed_group_read_markers(&mid, &sid, &marker_ids)).await;
            if let Err(e) = flatten(seeded) {
                error!("failed to seed read markers for {}: {}", message_id, e);
            }

            let event = ServerEvent::Group {
                id: message_id,
                from: username.to_string(),
                group,
                content,
                timestamp: now,
                reply_to,
                image_url,
            };
            ctx.fanout.deliver_to_users(&member_ids, &event).await;
        }

        ClientFrame::Typing { to } => {
            ctx.registry
                .send_to_user(
                    to,
                    ServerEvent::Typing {
                        from_user_id: user_id,
                        from_username: username.to_string(),
                    },
                )
                .await;
        }

        ClientFrame::StopTyping { to } => {
            ctx.registry
                .send_to_user(to, ServerEvent::StopTyping { from_user_id: user_id })
                .await;
        }

        ClientFrame::GroupTyping { group } => {
            let event = ServerEvent::GroupTyping {
                group_id: group,
                from_user_id: user_id,
                from_username: username.to_string(),
            };
            ctx.fanout
                .deliver_to_group_except(group, Some(user_id), &event, token)
                .await;
        }

        ClientFrame::GroupStopTyping { group } => {
            let event = ServerEvent::GroupStopTyping {
                group_id: group,
                from_user_id: user_id,
            };
            ctx.fanout
                .deliver_to_group_except(group, Some(user_id), &event, token)
                .await;
        }
    }
}

/// Clamp a payload to at most `max` bytes for logging, backing up to the
/// nearest char boundary so a multibyte character at the cut never panics.
fn truncate_for_log(text: &str, max: usize) -> &str {
    let mut end = text.len().min(max);
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

fn flatten<T>(joined: Result<anyhow::Result<T>, tokio::task::JoinError>) -> anyhow::Result<T> {
    match joined {
        Ok(inner) => inner,
        Err(e) => Err(anyhow::anyhow!("blocking task failed: {}", e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_directory::StaticDirectory;
    use parley_types::models::{ReplyPreview, UserProfile};

    fn context(directory: StaticDirectory) -> GatewayContext {
        let registry = PresenceRegistry::new();
        let directory = Arc::new(directory);
        GatewayContext {
            fanout: Fanout::new(registry.clone(), directory.clone()),
            registry,
            db: Arc::new(Database::open_in_memory().unwrap()),
            identity: directory.clone(),
            membership: directory,
        }
    }

    #[tokio::test]
    async fn direct_send_persists_then_delivers_to_both() {
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        let directory = StaticDirectory::new();
        directory.add_user(alice, "alice");
        directory.add_user(bob, "bob");
        let ctx = context(directory);

        let (_ca, mut alice_rx) = ctx.registry.register(alice, "alice".into()).await;
        let (_cb, mut bob_rx) = ctx.registry.register(bob, "bob".into()).await;

        handle_frame(
            &ctx,
            alice,
            "alice",
            "token",
            ClientFrame::Direct {
                to: bob,
                content: "hi".into(),
                reply_to: None,
                image_url: None,
            },
        )
        .await;

        let event = bob_rx.try_recv().expect("bob must receive the direct event");
        match event {
            ServerEvent::Direct { from, content, .. } => {
                assert_eq!(from, "alice");
                assert_eq!(content, "hi");
            }
            other => panic!("unexpected event: {:?}", other),
        }
        assert!(alice_rx.try_recv().is_ok(), "sender gets an echo too");

        let convo = ctx
            .db
            .direct_conversation(&alice.to_string(), &bob.to_string())
            .unwrap();
        assert_eq!(convo.len(), 1);

        let unread = ctx.db.direct_unread_counts(&bob.to_string()).unwrap();
        assert_eq!(unread, vec![(alice.to_string(), 1)]);
    }

    #[tokio::test]
    async fn direct_to_unknown_user_is_rejected_without_persisting() {
        let alice = Uuid::new_v4();
        let ghost = Uuid::new_v4();
        let directory = StaticDirectory::new();
        directory.add_user(alice, "alice");
        let ctx = context(directory);

        let (_ca, mut alice_rx) = ctx.registry.register(alice, "alice".into()).await;

        handle_frame(
            &ctx,
            alice,
            "alice",
            "token",
            ClientFrame::Direct {
                to: ghost,
                content: "hello?".into(),
                reply_to: None,
                image_url: None,
            },
        )
        .await;

        assert!(matches!(
            alice_rx.try_recv().unwrap(),
            ServerEvent::Error { .. }
        ));
        assert!(
            ctx.db
                .direct_conversation(&alice.to_string(), &ghost.to_string())
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn group_send_seeds_markers_for_everyone_but_sender() {
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        let group = Uuid::new_v4();
        let directory = StaticDirectory::new();
        directory.add_user(alice, "alice");
        directory.add_user(bob, "bob");
        directory.set_group_members(
            group,
            vec![
                UserProfile { id: alice, username: "alice".into() },
                UserProfile { id: bob, username: "bob".into() },
            ],
        );
        let ctx = context(directory);

        let (_cb, mut bob_rx) = ctx.registry.register(bob, "bob".into()).await;

        handle_frame(
            &ctx,
            alice,
            "alice",
            "token",
            ClientFrame::Group {
                group,
                content: "meeting at 5".into(),
                reply_to: None,
                image_url: None,
            },
        )
        .await;

        assert!(matches!(
            bob_rx.try_recv().unwrap(),
            ServerEvent::Group { .. }
        ));

        let unread = ctx
            .db
            .group_unread_counts(&bob.to_string(), &[group.to_string()])
            .unwrap();
        assert_eq!(unread, vec![(group.to_string(), 1)]);
        // The sender holds no marker and counts nothing unread.
        assert!(
            ctx.db
                .group_unread_counts(&alice.to_string(), &[group.to_string()])
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn group_send_with_resolver_down_persists_quietly() {
        let alice = Uuid::new_v4();
        let group = Uuid::new_v4();
        // No users, no groups: every resolution degrades.
        let directory = StaticDirectory::new();
        let ctx = context(directory);

        let (_ca, mut alice_rx) = ctx.registry.register(alice, "alice".into()).await;

        handle_frame(
            &ctx,
            alice,
            "alice",
            "token",
            ClientFrame::Group {
                group,
                content: "anyone there?".into(),
                reply_to: None,
                image_url: None,
            },
        )
        .await;

        // Message persisted, zero markers, zero deliveries, no error frame.
        let msgs = ctx.db.group_messages(&group.to_string()).unwrap();
        assert_eq!(msgs.len(), 1);

        let markers: i64 = ctx
            .db
            .with_conn(|conn| {
                Ok(conn.query_row("SELECT COUNT(*) FROM group_reads", [], |row| row.get(0))?)
            })
            .unwrap();
        assert_eq!(markers, 0);
        assert!(alice_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn typing_is_ephemeral_and_targeted() {
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        let directory = StaticDirectory::new();
        directory.add_user(alice, "alice");
        directory.add_user(bob, "bob");
        let ctx = context(directory);

        let (_cb, mut bob_rx) = ctx.registry.register(bob, "bob".into()).await;

        handle_frame(&ctx, alice, "alice", "token", ClientFrame::Typing { to: bob }).await;
        handle_frame(&ctx, alice, "alice", "token", ClientFrame::StopTyping { to: bob }).await;

        assert!(matches!(bob_rx.try_recv().unwrap(), ServerEvent::Typing { .. }));
        assert!(matches!(
            bob_rx.try_recv().unwrap(),
            ServerEvent::StopTyping { .. }
        ));

        // Nothing durable was written.
        let convo = ctx
            .db
            .direct_conversation(&alice.to_string(), &bob.to_string())
            .unwrap();
        assert!(convo.is_empty());
    }

    #[test]
    fn log_truncation_respects_char_boundaries() {
        // 199 ASCII bytes, then a two-byte char straddling the 200-byte cut.
        let mut payload = "x".repeat(199);
        payload.push('é');
        payload.push_str(&"y".repeat(50));

        let cut = truncate_for_log(&payload, 200);
        assert_eq!(cut.len(), 199);
        assert!(payload.starts_with(cut));

        assert_eq!(truncate_for_log("short", 200), "short");
        assert_eq!(truncate_for_log("", 200), "");
    }

    #[tokio::test]
    async fn direct_reply_preview_travels_with_the_event() {
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        let directory = StaticDirectory::new();
        directory.add_user(alice, "alice");
        directory.add_user(bob, "bob");
        let ctx = context(directory);

        let (_cb, mut bob_rx) = ctx.registry.register(bob, "bob".into()).await;

        let preview = ReplyPreview {
            id: Some(Uuid::new_v4()),
            from: Some("bob".into()),
            content: "earlier message".into(),
        };
        handle_frame(
            &ctx,
            alice,
            "alice",
            "token",
            ClientFrame::Direct {
                to: bob,
                content: "replying".into(),
                reply_to: Some(preview.clone()),
                image_url: None,
            },
        )
        .await;

        match bob_rx.try_recv().unwrap() {
            ServerEvent::Direct { reply_to, .. } => assert_eq!(reply_to, Some(preview)),
            other => panic!("unexpected event: {:?}", other),
        }
    }
}
