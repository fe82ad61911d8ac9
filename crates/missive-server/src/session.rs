//! WebSocket session lifecycle.
//!
//! One task per connection, driving a single `tokio::select!` loop with one
//! exit path: whichever signal ends the session (transport close, socket
//! error, logout, forced replacement), teardown runs exactly once.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use missive_shared::{ClientEvent, ConnId, ServerEvent, UserId};

use crate::api::AppState;
use crate::auth::{bearer_token, AuthError};
use crate::error::ServerError;
use crate::registry::{ConnectionHandle, SessionCommand};

#[derive(Debug, Deserialize)]
pub struct WsParams {
    pub token: Option<String>,
}

/// `GET /ws` -- authenticate the handshake, then hand the socket to
/// [`run_session`].
///
/// The token comes from the `token` query parameter or a bearer header.
/// A bad credential rejects the upgrade outright; no registry state is
/// touched for failed handshakes.
pub async fn ws_handler(
    State(state): State<AppState>,
    Query(params): Query<WsParams>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Result<Response, ServerError> {
    let token = params
        .token
        .as_deref()
        .or_else(|| bearer_token(&headers))
        .ok_or(AuthError::MissingToken)?;

    let user_id = state.verifier.verify(token)?;
    let user = state
        .store
        .find_user(user_id)
        .await?
        .ok_or(AuthError::UnknownUser)?;

    Ok(ws.on_upgrade(move |socket| run_session(state, socket, user_id, user.username)))
}

/// Drive one authenticated connection until it closes.
async fn run_session(state: AppState, socket: WebSocket, user_id: UserId, username: String) {
    let (mut sink, mut stream) = socket.split();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let handle = ConnectionHandle::new(user_id, username.clone(), tx.clone());
    let conn_id = handle.conn_id;

    register_session(&state, handle).await;
    info!(user = %user_id.short(), conn = %conn_id, "Session started");

    let mut replaced = false;

    loop {
        tokio::select! {
            command = rx.recv() => match command {
                Some(SessionCommand::Event(event)) => {
                    let text = match event.to_json() {
                        Ok(text) => text,
                        Err(e) => {
                            warn!(user = %user_id.short(), error = %e, "Failed to encode outbound event");
                            continue;
                        }
                    };
                    if sink.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                Some(SessionCommand::Replaced) => {
                    debug!(user = %user_id.short(), conn = %conn_id, "Replaced by newer connection");
                    replaced = true;
                    break;
                }
                None => break,
            },

            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    let outcome = handle_frame(&state, user_id, &username, &tx, &text).await;
                    if outcome == FrameOutcome::Close {
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                // Ping/pong are answered by the transport layer.
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!(user = %user_id.short(), error = %e, "Socket error");
                    break;
                }
            },
        }
    }

    // Single close path. For a replaced session the guarded unregister
    // inside is a no-op, so no offline transition is emitted while the
    // newer connection lives.
    close_session(&state, user_id, conn_id).await;

    info!(user = %user_id.short(), conn = %conn_id, replaced, "Session closed");
}

/// Put a fresh connection in the registry and announce the user online.
///
/// A previous connection for the same user is told to shut down; the user
/// never transitions offline during the swap.
pub(crate) async fn register_session(state: &AppState, handle: ConnectionHandle) {
    let user_id = handle.user_id;

    if let Some(previous) = state.registry.register(handle) {
        previous.replace();
    }

    // The persisted flag is advisory; a failed write never tears down the
    // session.
    if let Err(e) = state.store.set_online_status(user_id, true).await {
        warn!(user = %user_id.short(), error = %e, "Failed to persist online flag");
    }

    state.presence.broadcast(user_id, true);
}

/// Tear down a connection's presence.
///
/// The guarded unregister makes this stale-safe and idempotent: the offline
/// flag and broadcast fire only when this call removed the live mapping.
pub(crate) async fn close_session(state: &AppState, user_id: UserId, conn_id: ConnId) {
    if !state.registry.unregister(user_id, conn_id) {
        return;
    }

    if let Err(e) = state.store.set_online_status(user_id, false).await {
        warn!(user = %user_id.short(), error = %e, "Failed to persist offline flag");
    }

    state.presence.broadcast(user_id, false);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameOutcome {
    Continue,
    Close,
}

/// Dispatch one inbound text frame.
///
/// Failures answer with an `error` event on this connection and leave the
/// session open; only `logout` closes it.
async fn handle_frame(
    state: &AppState,
    user_id: UserId,
    username: &str,
    self_tx: &mpsc::UnboundedSender<SessionCommand>,
    text: &str,
) -> FrameOutcome {
    let event = match ClientEvent::from_json(text) {
        Ok(event) => event,
        Err(e) => {
            debug!(user = %user_id.short(), error = %e, "Malformed frame");
            let _ = self_tx.send(SessionCommand::Event(ServerEvent::error("Malformed event")));
            return FrameOutcome::Continue;
        }
    };

    match event {
        ClientEvent::SendMessage(payload) => {
            if let Err(e) = state.router.send(user_id, payload).await {
                let _ = self_tx.send(SessionCommand::Event(ServerEvent::error(e.to_string())));
            }
            FrameOutcome::Continue
        }
        ClientEvent::Typing(payload) => {
            state
                .router
                .typing_notify(user_id, username, payload.receiver_id, payload.is_typing);
            FrameOutcome::Continue
        }
        ClientEvent::Logout => {
            debug!(user = %user_id.short(), "Logout requested");
            FrameOutcome::Close
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;

    use tempfile::TempDir;

    use missive_store::{ChatStore, Database, NewUser, SqliteStore};

    use crate::config::ServerConfig;

    async fn test_state() -> (AppState, TempDir) {
        let dir = TempDir::new().unwrap();
        let db = Database::open_at(&dir.path().join("missive.db")).unwrap();
        let store: Arc<dyn ChatStore> = Arc::new(SqliteStore::new(db));

        let mut config = ServerConfig::default();
        config.upload_dir = dir.path().join("uploads");

        let state = AppState::new(config, store).await.unwrap();
        (state, dir)
    }

    async fn seed_user(state: &AppState, name: &str) -> UserId {
        state
            .store
            .create_user(NewUser {
                username: name.to_string(),
                email: format!("{name}@example.com"),
                password_hash: "x".to_string(),
            })
            .await
            .unwrap()
            .id
    }

    #[tokio::test]
    async fn test_register_replaces_previous_session() {
        let (state, _dir) = test_state().await;
        let user = seed_user(&state, "alice").await;

        let (tx1, mut rx1) = mpsc::unbounded_channel();
        register_session(&state, ConnectionHandle::new(user, "alice".into(), tx1)).await;

        let (tx2, _rx2) = mpsc::unbounded_channel();
        register_session(&state, ConnectionHandle::new(user, "alice".into(), tx2)).await;

        let mut saw_replaced = false;
        while let Ok(command) = rx1.try_recv() {
            if matches!(command, SessionCommand::Replaced) {
                saw_replaced = true;
            }
        }
        assert!(saw_replaced);
        assert_eq!(state.registry.len(), 1);
    }

    #[tokio::test]
    async fn test_stale_close_after_replacement_is_a_noop() {
        let (state, _dir) = test_state().await;
        let user = seed_user(&state, "alice").await;

        let (tx1, _rx1) = mpsc::unbounded_channel();
        let first = ConnectionHandle::new(user, "alice".into(), tx1);
        let first_conn = first.conn_id;
        register_session(&state, first).await;

        let (tx2, _rx2) = mpsc::unbounded_channel();
        register_session(&state, ConnectionHandle::new(user, "alice".into(), tx2)).await;

        // The displaced session closes late.
        close_session(&state, user, first_conn).await;

        // The newer connection stays online, live and persisted.
        assert!(state.registry.is_online(user));
        let stored = state.store.find_user(user).await.unwrap().unwrap();
        assert!(stored.is_online);
    }

    #[tokio::test]
    async fn test_close_broadcasts_offline_exactly_once() {
        let (state, _dir) = test_state().await;
        let alice = seed_user(&state, "alice").await;
        let bob = seed_user(&state, "bob").await;

        let (bob_tx, mut bob_rx) = mpsc::unbounded_channel();
        register_session(&state, ConnectionHandle::new(bob, "bob".into(), bob_tx)).await;

        let (alice_tx, _alice_rx) = mpsc::unbounded_channel();
        let alice_handle = ConnectionHandle::new(alice, "alice".into(), alice_tx);
        let alice_conn = alice_handle.conn_id;
        register_session(&state, alice_handle).await;

        // Close twice; the second is stale.
        close_session(&state, alice, alice_conn).await;
        close_session(&state, alice, alice_conn).await;

        let mut offline_events = 0;
        while let Ok(command) = bob_rx.try_recv() {
            if let SessionCommand::Event(ServerEvent::UserStatusChanged(update)) = command {
                if update.user_id == alice && !update.is_online {
                    offline_events += 1;
                }
            }
        }
        assert_eq!(offline_events, 1);

        let stored = state.store.find_user(alice).await.unwrap().unwrap();
        assert!(!stored.is_online);
    }

    #[tokio::test]
    async fn test_frame_dispatch() {
        let (state, _dir) = test_state().await;
        let alice = seed_user(&state, "alice").await;
        let bob = seed_user(&state, "bob").await;

        let (alice_tx, mut alice_rx) = mpsc::unbounded_channel();
        register_session(
            &state,
            ConnectionHandle::new(alice, "alice".into(), alice_tx.clone()),
        )
        .await;
        let (bob_tx, mut bob_rx) = mpsc::unbounded_channel();
        register_session(&state, ConnectionHandle::new(bob, "bob".into(), bob_tx)).await;

        // Drain the presence traffic from the two connects.
        while alice_rx.try_recv().is_ok() {}
        while bob_rx.try_recv().is_ok() {}

        // Malformed frame: error event, session stays open.
        let outcome = handle_frame(&state, alice, "alice", &alice_tx, "not json").await;
        assert_eq!(outcome, FrameOutcome::Continue);
        assert!(matches!(
            alice_rx.try_recv(),
            Ok(SessionCommand::Event(ServerEvent::Error(_)))
        ));

        // send_message reaches bob.
        let frame = format!(
            r#"{{"event":"send_message","data":{{"receiverId":"{bob}","content":"hi"}}}}"#
        );
        let outcome = handle_frame(&state, alice, "alice", &alice_tx, &frame).await;
        assert_eq!(outcome, FrameOutcome::Continue);
        assert!(matches!(
            bob_rx.try_recv(),
            Ok(SessionCommand::Event(ServerEvent::ReceiveMessage(_)))
        ));

        // typing reaches bob.
        let frame =
            format!(r#"{{"event":"typing","data":{{"receiverId":"{bob}","isTyping":true}}}}"#);
        handle_frame(&state, alice, "alice", &alice_tx, &frame).await;
        assert!(matches!(
            bob_rx.try_recv(),
            Ok(SessionCommand::Event(ServerEvent::UserTyping(_)))
        ));

        // logout is the only frame that closes the session.
        let outcome = handle_frame(&state, alice, "alice", &alice_tx, r#"{"event":"logout"}"#).await;
        assert_eq!(outcome, FrameOutcome::Close);
    }
}
