//! JSON request/response surface under `/api`. Every state change goes
//! through the same `Coordinator::submit` path as socket mutations.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, patch, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use shared::{
    domain::{Board, BoardId, BoardMember, BoardSnapshot, ConnectionId, Role, UserId},
    error::{ApiError, ErrorCode},
    protocol::{Committed, MutationRequest},
};
use sync_core::Origin;

use crate::app_state::AppState;

type HttpError = (StatusCode, Json<ApiError>);

#[derive(Debug, Deserialize)]
pub(crate) struct ActorQuery {
    pub(crate) user_id: i64,
    #[serde(default)]
    pub(crate) connection_id: Option<ConnectionId>,
}

impl ActorQuery {
    fn origin(&self) -> Origin {
        Origin {
            user_id: UserId(self.user_id),
            connection: self.connection_id,
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct LoginRequest {
    pub(crate) username: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct LoginResponse {
    pub(crate) user_id: i64,
    pub(crate) username: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct AddMemberRequest {
    pub(crate) user_id: i64,
    #[serde(default)]
    pub(crate) role: Option<Role>,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    connections: usize,
    rooms: usize,
}

pub(crate) fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/login", post(login))
        .route("/health", get(health))
        .route("/boards", get(list_boards).post(create_board))
        .route(
            "/boards/:board_id",
            get(get_board).patch(update_board).delete(delete_board),
        )
        .route("/boards/:board_id/members", post(add_member))
        .route("/lists", post(create_list))
        .route("/lists/:list_id", patch(update_list).delete(delete_list))
        .route("/tasks", post(create_task))
        .route("/tasks/:task_id", patch(update_task).delete(delete_task))
        .route("/tasks/:task_id/move", patch(move_task))
}

pub(crate) fn status_for(code: ErrorCode) -> StatusCode {
    match code {
        ErrorCode::Validation => StatusCode::BAD_REQUEST,
        ErrorCode::Forbidden => StatusCode::FORBIDDEN,
        ErrorCode::NotFound => StatusCode::NOT_FOUND,
        ErrorCode::Conflict => StatusCode::CONFLICT,
        ErrorCode::Timeout => StatusCode::GATEWAY_TIMEOUT,
        ErrorCode::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn reject(err: ApiError) -> HttpError {
    (status_for(err.code), Json(err))
}

/// Builds a mutation from a JSON body plus the ids taken from the path, so
/// HTTP and socket clients share one decoding of absent versus null fields.
fn mutation_from_body(
    op: &str,
    ids: &[(&str, i64)],
    body: Option<Value>,
) -> Result<MutationRequest, HttpError> {
    let mut fields = match body {
        Some(Value::Object(map)) => map,
        None | Some(Value::Null) => Map::new(),
        Some(_) => return Err(reject(ApiError::validation("body must be a JSON object"))),
    };
    fields.insert("op".into(), Value::from(op));
    for (key, id) in ids {
        fields.insert((*key).into(), Value::from(*id));
    }
    serde_json::from_value(Value::Object(fields))
        .map_err(|e| reject(ApiError::validation(e.to_string())))
}

async fn submit(
    state: &AppState,
    actor: &ActorQuery,
    request: MutationRequest,
    created: bool,
) -> Result<Response, HttpError> {
    let committed = state
        .coordinator
        .submit(actor.origin(), request)
        .await
        .map_err(reject)?;
    let status = if created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok(match committed {
        Committed::Board(board) => (status, Json(board)).into_response(),
        Committed::List(list) => (status, Json(list)).into_response(),
        Committed::Task(task) => (status, Json(task)).into_response(),
        Committed::BoardDeleted(_) | Committed::ListDeleted(_) | Committed::TaskDeleted(_) => {
            StatusCode::NO_CONTENT.into_response()
        }
    })
}

async fn login(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, HttpError> {
    let user = state
        .coordinator
        .login(&req.username)
        .await
        .map_err(reject)?;
    Ok(Json(LoginResponse {
        user_id: user.id.0,
        username: user.username,
    }))
}

async fn health(State(state): State<Arc<AppState>>) -> Result<Json<HealthResponse>, HttpError> {
    state.coordinator.health().await.map_err(|err| {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ApiError::new(ErrorCode::Unavailable, err.message)),
        )
    })?;
    Ok(Json(HealthResponse {
        status: "ok",
        connections: state.registry.connection_count(),
        rooms: state.registry.room_count(),
    }))
}

async fn list_boards(
    State(state): State<Arc<AppState>>,
    Query(q): Query<ActorQuery>,
) -> Result<Json<Vec<Board>>, HttpError> {
    let boards = state
        .coordinator
        .boards_for_user(UserId(q.user_id))
        .await
        .map_err(reject)?;
    Ok(Json(boards))
}

async fn get_board(
    State(state): State<Arc<AppState>>,
    Path(board_id): Path<i64>,
    Query(q): Query<ActorQuery>,
) -> Result<Json<BoardSnapshot>, HttpError> {
    let snapshot = state
        .coordinator
        .board_snapshot(UserId(q.user_id), BoardId(board_id))
        .await
        .map_err(reject)?;
    Ok(Json(snapshot))
}

async fn create_board(
    State(state): State<Arc<AppState>>,
    Query(q): Query<ActorQuery>,
    Json(body): Json<Value>,
) -> Result<Response, HttpError> {
    let request = mutation_from_body("create_board", &[], Some(body))?;
    submit(&state, &q, request, true).await
}

async fn update_board(
    State(state): State<Arc<AppState>>,
    Path(board_id): Path<i64>,
    Query(q): Query<ActorQuery>,
    Json(body): Json<Value>,
) -> Result<Response, HttpError> {
    let request = mutation_from_body("update_board", &[("boardId", board_id)], Some(body))?;
    submit(&state, &q, request, false).await
}

async fn delete_board(
    State(state): State<Arc<AppState>>,
    Path(board_id): Path<i64>,
    Query(q): Query<ActorQuery>,
) -> Result<Response, HttpError> {
    let request = mutation_from_body("delete_board", &[("boardId", board_id)], None)?;
    submit(&state, &q, request, false).await
}

async fn add_member(
    State(state): State<Arc<AppState>>,
    Path(board_id): Path<i64>,
    Query(q): Query<ActorQuery>,
    Json(req): Json<AddMemberRequest>,
) -> Result<(StatusCode, Json<BoardMember>), HttpError> {
    let member = state
        .coordinator
        .add_member(
            UserId(q.user_id),
            BoardId(board_id),
            UserId(req.user_id),
            req.role.unwrap_or(Role::Member),
        )
        .await
        .map_err(reject)?;
    Ok((StatusCode::CREATED, Json(member)))
}

async fn create_list(
    State(state): State<Arc<AppState>>,
    Query(q): Query<ActorQuery>,
    Json(body): Json<Value>,
) -> Result<Response, HttpError> {
    let request = mutation_from_body("create_list", &[], Some(body))?;
    submit(&state, &q, request, true).await
}

async fn update_list(
    State(state): State<Arc<AppState>>,
    Path(list_id): Path<i64>,
    Query(q): Query<ActorQuery>,
    Json(body): Json<Value>,
) -> Result<Response, HttpError> {
    let request = mutation_from_body("update_list", &[("listId", list_id)], Some(body))?;
    submit(&state, &q, request, false).await
}

async fn delete_list(
    State(state): State<Arc<AppState>>,
    Path(list_id): Path<i64>,
    Query(q): Query<ActorQuery>,
) -> Result<Response, HttpError> {
    let request = mutation_from_body("delete_list", &[("listId", list_id)], None)?;
    submit(&state, &q, request, false).await
}

async fn create_task(
    State(state): State<Arc<AppState>>,
    Query(q): Query<ActorQuery>,
    Json(body): Json<Value>,
) -> Result<Response, HttpError> {
    let request = mutation_from_body("create_task", &[], Some(body))?;
    submit(&state, &q, request, true).await
}

async fn update_task(
    State(state): State<Arc<AppState>>,
    Path(task_id): Path<i64>,
    Query(q): Query<ActorQuery>,
    Json(body): Json<Value>,
) -> Result<Response, HttpError> {
    let request = mutation_from_body("update_task", &[("taskId", task_id)], Some(body))?;
    submit(&state, &q, request, false).await
}

async fn move_task(
    State(state): State<Arc<AppState>>,
    Path(task_id): Path<i64>,
    Query(q): Query<ActorQuery>,
    Json(body): Json<Value>,
) -> Result<Response, HttpError> {
    let request = mutation_from_body("move_task", &[("taskId", task_id)], Some(body))?;
    submit(&state, &q, request, false).await
}

async fn delete_task(
    State(state): State<Arc<AppState>>,
    Path(task_id): Path<i64>,
    Query(q): Query<ActorQuery>,
) -> Result<Response, HttpError> {
    let request = mutation_from_body("delete_task", &[("taskId", task_id)], None)?;
    submit(&state, &q, request, false).await
}

#[cfg(test)]
#[path = "tests/mod_tests.rs"]
mod tests;
