use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use shared::{
    domain::{BoardId, ConnectionId, PresenceUser, UserId},
    error::ApiError,
    protocol::{ClientMessage, ServerEvent},
};
use sync_core::Origin;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::app_state::AppState;

#[derive(Debug, Deserialize)]
pub(crate) struct WsQuery {
    user_id: i64,
}

pub(crate) async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(q): Query<WsQuery>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| ws_connection(state, socket, UserId(q.user_id)))
}

async fn ws_connection(state: Arc<AppState>, socket: WebSocket, user_id: UserId) {
    let (mut sender, mut receiver) = socket.split();
    let (outbox, mut inbox) = mpsc::channel::<Arc<ServerEvent>>(state.outbox_capacity);
    let connection_id = state.registry.connect(outbox);
    info!(connection_id = %connection_id, user_id = %user_id, "socket connected");

    let broadcaster = state.coordinator.broadcaster().clone();
    broadcaster.send_to(connection_id, ServerEvent::Connected { connection_id });

    let send_task = tokio::spawn(async move {
        while let Some(event) = inbox.recv().await {
            let text = match serde_json::to_string(&*event) {
                Ok(v) => v,
                Err(error) => {
                    warn!(%error, event = event.name(), "failed to encode event");
                    continue;
                }
            };
            if sender.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
        let _ = sender.close().await;
    });

    while let Some(Ok(message)) = receiver.next().await {
        match message {
            Message::Text(text) => handle_text(&state, connection_id, user_id, &text).await,
            Message::Close(_) => break,
            _ => {}
        }
    }

    if let Some((board_id, user)) = state.registry.drop_connection(connection_id) {
        broadcaster.publish(
            board_id,
            ServerEvent::UserLeft {
                connection_id,
                user,
            },
            Some(connection_id),
        );
    }
    info!(connection_id = %connection_id, "socket closed");
    send_task.abort();
}

async fn handle_text(state: &AppState, connection_id: ConnectionId, user_id: UserId, text: &str) {
    let broadcaster = state.coordinator.broadcaster();
    let message = match serde_json::from_str::<ClientMessage>(text) {
        Ok(message) => message,
        Err(error) => {
            broadcaster.send_to(
                connection_id,
                ServerEvent::Error(ApiError::validation(format!("bad frame: {error}"))),
            );
            return;
        }
    };

    match message {
        ClientMessage::JoinBoard { board_id, user } => {
            if let Err(err) = state.coordinator.authorize_view(user_id, board_id).await {
                broadcaster.send_to(connection_id, ServerEvent::Error(err));
                return;
            }
            let user = presence_for(user_id, user);
            let Some(outcome) = state.registry.join(connection_id, board_id, user.clone()) else {
                return;
            };
            if let Some(previous) = outcome.previous_board {
                broadcaster.publish(
                    previous,
                    ServerEvent::UserLeft {
                        connection_id,
                        user: user.clone(),
                    },
                    Some(connection_id),
                );
            }
            for (peer_id, peer) in outcome.peers {
                broadcaster.send_to(
                    connection_id,
                    ServerEvent::UserJoined {
                        connection_id: peer_id,
                        user: peer,
                    },
                );
            }
            broadcaster.publish(
                board_id,
                ServerEvent::UserJoined {
                    connection_id,
                    user,
                },
                Some(connection_id),
            );
            info!(connection_id = %connection_id, board_id = %board_id, "joined board room");
        }
        ClientMessage::LeaveBoard { board_id } => {
            if let Some(user) = state.registry.leave(connection_id, board_id) {
                broadcaster.publish(
                    board_id,
                    ServerEvent::UserLeft {
                        connection_id,
                        user,
                    },
                    Some(connection_id),
                );
            }
        }
        ClientMessage::CursorMove {
            board_id, position, ..
        } => {
            relay(state, connection_id, board_id, |user| {
                ServerEvent::CursorUpdate {
                    connection_id,
                    position,
                    user,
                }
            });
        }
        ClientMessage::TaskDragging {
            board_id,
            task_id,
            position,
        } => {
            relay(state, connection_id, board_id, |_| ServerEvent::TaskDragUpdate {
                connection_id,
                task_id,
                position,
            });
        }
        ClientMessage::TaskTyping {
            board_id,
            task_id,
            is_typing,
            ..
        } => {
            relay(state, connection_id, board_id, |user| {
                ServerEvent::TaskTypingUpdate {
                    task_id,
                    user,
                    is_typing,
                }
            });
        }
        ClientMessage::Mutate {
            request_id,
            mutation,
        } => {
            let result = state
                .coordinator
                .submit(Origin::connection(user_id, connection_id), mutation)
                .await;
            broadcaster.send_to(
                connection_id,
                ServerEvent::MutationResult {
                    request_id,
                    result: result.into(),
                },
            );
        }
        ClientMessage::Pong { timestamp } => {
            debug!(connection_id = %connection_id, timestamp, "pong");
        }
    }
}

/// Forwards an ephemeral event to the sender's own room, never back to the
/// sender. Frames naming a room the sender has not joined are dropped.
fn relay(
    state: &AppState,
    connection_id: ConnectionId,
    board_id: BoardId,
    build: impl FnOnce(PresenceUser) -> ServerEvent,
) {
    if state.registry.room_of(connection_id) != Some(board_id) {
        debug!(connection_id = %connection_id, board_id = %board_id, "relay outside joined room ignored");
        return;
    }
    let user = state
        .registry
        .user_of(connection_id)
        .unwrap_or_else(PresenceUser::anonymous);
    state
        .coordinator
        .broadcaster()
        .publish(board_id, build(user), Some(connection_id));
}

fn presence_for(user_id: UserId, claimed: Option<PresenceUser>) -> PresenceUser {
    let mut user = claimed.unwrap_or_else(|| PresenceUser {
        user_id: None,
        name: format!("user-{user_id}"),
        avatar: None,
    });
    user.user_id = Some(user_id);
    user
}
