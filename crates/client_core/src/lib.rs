use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use futures::{SinkExt, StreamExt};
use reqwest::{Client, Response};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use shared::{
    domain::{Board, BoardId, BoardMember, BoardSnapshot, PresenceUser, Role, UserId},
    error::{ApiError, ErrorCode},
    protocol::{ClientMessage, Committed, MutationReply, MutationRequest, PointerPosition, ServerEvent},
};
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot, Mutex};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

pub mod store;
pub use store::{BoardState, Pending, Settlement};

const DEFAULT_REPLY_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("websocket failed: {0}")]
    Socket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("server rejected request: {0}")]
    Api(ApiError),
    #[error("server_url must start with http:// or https://")]
    InvalidUrl,
    #[error("login first")]
    NotLoggedIn,
    #[error("socket is not connected")]
    NotConnected,
    #[error("no reply for mutation {0}")]
    NoReply(String),
}

impl ClientError {
    /// The wire error an optimistic edit is reverted with.
    pub fn into_api_error(self) -> ApiError {
        match self {
            ClientError::Api(err) => err,
            ClientError::NoReply(request_id) => ApiError::new(
                ErrorCode::Timeout,
                format!("no reply for mutation {request_id}"),
            ),
            other => ApiError::new(ErrorCode::Unavailable, other.to_string()),
        }
    }
}

pub type ClientResult<T> = Result<T, ClientError>;

#[derive(Debug, Clone)]
pub enum ClientEvent {
    Server(ServerEvent),
    Disconnected,
    Error(String),
}

#[derive(Debug, Serialize)]
struct LoginRequest<'a> {
    username: &'a str,
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    user_id: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AddMemberRequest {
    user_id: UserId,
    role: Role,
}

type ReplyWaiters = Arc<Mutex<HashMap<String, oneshot::Sender<MutationReply>>>>;

/// HTTP and socket access to one board server on behalf of one user.
pub struct BoardClient {
    http: Client,
    server_url: String,
    user_id: Mutex<Option<UserId>>,
    events: broadcast::Sender<ClientEvent>,
    outgoing: Mutex<Option<mpsc::UnboundedSender<Message>>>,
    replies: ReplyWaiters,
    next_request: AtomicU64,
    reply_timeout: Duration,
}

impl BoardClient {
    pub fn new(server_url: impl Into<String>) -> Arc<Self> {
        Self::with_reply_timeout(server_url, DEFAULT_REPLY_TIMEOUT)
    }

    pub fn with_reply_timeout(server_url: impl Into<String>, reply_timeout: Duration) -> Arc<Self> {
        let (events, _) = broadcast::channel(1024);
        Arc::new(Self {
            http: Client::new(),
            server_url: server_url.into().trim_end_matches('/').to_string(),
            user_id: Mutex::new(None),
            events,
            outgoing: Mutex::new(None),
            replies: Arc::new(Mutex::new(HashMap::new())),
            next_request: AtomicU64::new(1),
            reply_timeout,
        })
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    pub async fn user_id(&self) -> Option<UserId> {
        *self.user_id.lock().await
    }

    async fn session(&self) -> ClientResult<UserId> {
        self.user_id().await.ok_or(ClientError::NotLoggedIn)
    }

    fn api(&self, path: &str) -> String {
        format!("{}/api{path}", self.server_url)
    }

    pub async fn login(&self, username: &str) -> ClientResult<UserId> {
        let response = self
            .http
            .post(self.api("/login"))
            .json(&LoginRequest { username })
            .send()
            .await?;
        let body: LoginResponse = decode(response).await?;
        let user_id = UserId(body.user_id);
        *self.user_id.lock().await = Some(user_id);
        info!(user_id = %user_id, "logged in");
        Ok(user_id)
    }

    pub async fn list_boards(&self) -> ClientResult<Vec<Board>> {
        let user_id = self.session().await?;
        let response = self
            .http
            .get(self.api("/boards"))
            .query(&[("user_id", user_id.0)])
            .send()
            .await?;
        decode(response).await
    }

    pub async fn fetch_board(&self, board_id: BoardId) -> ClientResult<BoardSnapshot> {
        let user_id = self.session().await?;
        let response = self
            .http
            .get(self.api(&format!("/boards/{board_id}")))
            .query(&[("user_id", user_id.0)])
            .send()
            .await?;
        decode(response).await
    }

    pub async fn create_board(
        &self,
        name: &str,
        description: Option<&str>,
    ) -> ClientResult<Board> {
        let user_id = self.session().await?;
        let response = self
            .http
            .post(self.api("/boards"))
            .query(&[("user_id", user_id.0)])
            .json(&serde_json::json!({ "name": name, "description": description }))
            .send()
            .await?;
        decode(response).await
    }

    pub async fn add_member(
        &self,
        board_id: BoardId,
        user_id: UserId,
        role: Role,
    ) -> ClientResult<BoardMember> {
        let actor = self.session().await?;
        let response = self
            .http
            .post(self.api(&format!("/boards/{board_id}/members")))
            .query(&[("user_id", actor.0)])
            .json(&AddMemberRequest { user_id, role })
            .send()
            .await?;
        decode(response).await
    }

    /// Opens the board socket. Server events are re-emitted as
    /// `ClientEvent::Server`, pings are answered and mutation results are
    /// routed back to whoever is waiting on them.
    pub async fn connect(self: &Arc<Self>) -> ClientResult<()> {
        let user_id = self.session().await?;
        let ws_url = if self.server_url.starts_with("https://") {
            self.server_url.replacen("https://", "wss://", 1)
        } else if self.server_url.starts_with("http://") {
            self.server_url.replacen("http://", "ws://", 1)
        } else {
            return Err(ClientError::InvalidUrl);
        };
        let ws_url = format!("{ws_url}/ws?user_id={user_id}");
        let (ws_stream, _) = connect_async(ws_url.as_str()).await?;
        let (mut ws_writer, mut ws_reader) = ws_stream.split();

        let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
        *self.outgoing.lock().await = Some(tx);

        tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                if ws_writer.send(message).await.is_err() {
                    break;
                }
            }
            let _ = ws_writer.close().await;
        });

        let client = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(msg) = ws_reader.next().await {
                match msg {
                    Ok(Message::Text(text)) => match serde_json::from_str::<ServerEvent>(&text) {
                        Ok(event) => client.dispatch(event).await,
                        Err(err) => {
                            let _ = client
                                .events
                                .send(ClientEvent::Error(format!("invalid server event: {err}")));
                        }
                    },
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(err) => {
                        let _ = client
                            .events
                            .send(ClientEvent::Error(format!("websocket receive failed: {err}")));
                        break;
                    }
                }
            }
            client.outgoing.lock().await.take();
            // dropping the senders wakes every waiter with a closed channel
            client.replies.lock().await.clear();
            let _ = client.events.send(ClientEvent::Disconnected);
            info!("board socket closed");
        });

        Ok(())
    }

    async fn dispatch(&self, event: ServerEvent) {
        match event {
            ServerEvent::Ping { timestamp } => {
                debug!(timestamp, "answering ping");
                if let Err(err) = self.send(&ClientMessage::Pong { timestamp }).await {
                    warn!(%err, "failed to answer ping");
                }
            }
            ServerEvent::MutationResult { request_id, result } => {
                let waiter = self.replies.lock().await.remove(&request_id);
                match waiter {
                    Some(waiter) => {
                        let _ = waiter.send(result);
                    }
                    None => {
                        let _ = self
                            .events
                            .send(ClientEvent::Server(ServerEvent::MutationResult {
                                request_id,
                                result,
                            }));
                    }
                }
            }
            other => {
                let _ = self.events.send(ClientEvent::Server(other));
            }
        }
    }

    pub async fn send(&self, message: &ClientMessage) -> ClientResult<()> {
        let text = serde_json::to_string(message)?;
        let guard = self.outgoing.lock().await;
        let tx = guard.as_ref().ok_or(ClientError::NotConnected)?;
        tx.send(Message::Text(text))
            .map_err(|_| ClientError::NotConnected)
    }

    pub async fn disconnect(&self) {
        if let Some(tx) = self.outgoing.lock().await.take() {
            let _ = tx.send(Message::Close(None));
        }
    }

    pub async fn join_board(
        &self,
        board_id: BoardId,
        user: Option<PresenceUser>,
    ) -> ClientResult<()> {
        self.send(&ClientMessage::JoinBoard { board_id, user }).await
    }

    pub async fn leave_board(&self, board_id: BoardId) -> ClientResult<()> {
        self.send(&ClientMessage::LeaveBoard { board_id }).await
    }

    pub async fn move_cursor(&self, board_id: BoardId, x: f64, y: f64) -> ClientResult<()> {
        self.send(&ClientMessage::CursorMove {
            board_id,
            position: PointerPosition { x, y },
            user: None,
        })
        .await
    }

    /// Sends one mutation over the socket and waits for its result.
    pub async fn mutate(&self, mutation: MutationRequest) -> ClientResult<Committed> {
        self.request(mutation)
            .await?
            .into_result()
            .map_err(ClientError::Api)
    }

    /// Applies `mutation` to `state` right away, sends it, and settles the
    /// tentative edit with whatever comes back. Transport failures revert
    /// the edit like a rejection would.
    pub async fn mutate_optimistic(
        &self,
        state: &mut BoardState,
        mutation: MutationRequest,
    ) -> ClientResult<Settlement> {
        let pending = state.apply(mutation).map_err(ClientError::Api)?;
        let result = match self.request(pending.request().clone()).await {
            Ok(reply) => reply.into_result(),
            Err(err) => Err(err.into_api_error()),
        };
        Ok(state.settle(pending, result))
    }

    /// Request ids come from one counter per client, so any number of board
    /// states can share a connection without their replies crossing.
    fn next_request_id(&self) -> String {
        format!("c-{}", self.next_request.fetch_add(1, Ordering::Relaxed))
    }

    async fn request(&self, mutation: MutationRequest) -> ClientResult<MutationReply> {
        let request_id = self.next_request_id();
        let (tx, rx) = oneshot::channel();
        self.replies.lock().await.insert(request_id.clone(), tx);
        let sent = self
            .send(&ClientMessage::Mutate {
                request_id: request_id.clone(),
                mutation,
            })
            .await;
        if let Err(err) = sent {
            self.replies.lock().await.remove(&request_id);
            return Err(err);
        }
        match tokio::time::timeout(self.reply_timeout, rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(ClientError::NotConnected),
            Err(_) => {
                self.replies.lock().await.remove(&request_id);
                Err(ClientError::NoReply(request_id))
            }
        }
    }
}

async fn decode<T: DeserializeOwned>(response: Response) -> ClientResult<T> {
    let status = response.status();
    if status.is_success() {
        return Ok(response.json().await?);
    }
    match response.json::<ApiError>().await {
        Ok(err) => Err(ClientError::Api(err)),
        Err(_) => Err(ClientError::Api(ApiError::new(
            ErrorCode::Internal,
            format!("unexpected status {status}"),
        ))),
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
