use std::{future::Future, sync::Arc, time::Duration};

use shared::{
    domain::{
        Board, BoardId, BoardMember, BoardSnapshot, ConnectionId, ListId, Role, TaskId, UserId,
        UserSummary, DEFAULT_BOARD_COLOR,
    },
    error::{ApiError, ErrorCode},
    ordering::{self, Placement, PlacementError},
    protocol::{Committed, MutationRequest, ServerEvent},
};
use storage::{
    BoardPatch, BoardRepository, ListPatch, NewBoard, NewList, NewTask, RepoError, RepoResult,
    TaskPatch,
};
use tracing::{debug, error, info, warn};

use crate::broadcast::Broadcaster;

pub const DEFAULT_REPO_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub repo_timeout: Duration,
    /// When false the originating connection does not receive its own event.
    pub echo_to_originator: bool,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            repo_timeout: DEFAULT_REPO_TIMEOUT,
            echo_to_originator: true,
        }
    }
}

/// Who asked for a mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Origin {
    pub user_id: UserId,
    pub connection: Option<ConnectionId>,
}

impl Origin {
    pub fn user(user_id: UserId) -> Self {
        Self {
            user_id,
            connection: None,
        }
    }

    pub fn connection(user_id: UserId, connection_id: ConnectionId) -> Self {
        Self {
            user_id,
            connection: Some(connection_id),
        }
    }
}

/// Validates mutations, commits them through the repository and announces
/// each commit to the board room.
#[derive(Clone)]
pub struct Coordinator {
    repo: Arc<dyn BoardRepository>,
    broadcaster: Arc<Broadcaster>,
    config: CoordinatorConfig,
}

impl Coordinator {
    pub fn new(
        repo: Arc<dyn BoardRepository>,
        broadcaster: Arc<Broadcaster>,
        config: CoordinatorConfig,
    ) -> Self {
        Self {
            repo,
            broadcaster,
            config,
        }
    }

    pub fn broadcaster(&self) -> &Arc<Broadcaster> {
        &self.broadcaster
    }

    /// Runs the mutation on its own task and waits at most `repo_timeout`
    /// for it. Neither a timeout nor dropping the returned future cancels
    /// the write; a late commit is still broadcast to the room.
    pub async fn submit(
        &self,
        origin: Origin,
        request: MutationRequest,
    ) -> Result<Committed, ApiError> {
        let coordinator = self.clone();
        let op = request.op_name();
        let mut task = tokio::spawn(async move { coordinator.apply(origin, request).await });
        match tokio::time::timeout(self.config.repo_timeout, &mut task).await {
            Ok(joined) => joined.map_err(|join_error| {
                error!(op, %join_error, "mutation task aborted");
                ApiError::new(ErrorCode::Internal, "mutation did not complete")
            })?,
            Err(_) => {
                warn!(
                    op,
                    timeout_ms = self.config.repo_timeout.as_millis() as u64,
                    "mutation still running, reporting timeout"
                );
                Err(ApiError::new(
                    ErrorCode::Timeout,
                    format!("{op} did not finish in time"),
                ))
            }
        }
    }

    /// Runs the mutation inline. Only reads are bounded here; `submit` adds
    /// the caller-side deadline.
    pub async fn apply(
        &self,
        origin: Origin,
        request: MutationRequest,
    ) -> Result<Committed, ApiError> {
        let op = request.op_name();
        let outcome = self.commit(origin, request).await;
        match outcome {
            Ok((board_id, event, committed)) => {
                let exclude = if self.config.echo_to_originator {
                    None
                } else {
                    origin.connection
                };
                let delivered = self.broadcaster.publish(board_id, event, exclude);
                info!(
                    op,
                    board_id = %board_id,
                    user_id = %origin.user_id,
                    delivered,
                    "mutation committed"
                );
                Ok(committed)
            }
            Err(err) => {
                warn!(
                    op,
                    user_id = %origin.user_id,
                    code = ?err.code,
                    message = %err.message,
                    "mutation rejected"
                );
                Err(err)
            }
        }
    }

    async fn commit(
        &self,
        origin: Origin,
        request: MutationRequest,
    ) -> Result<(BoardId, ServerEvent, Committed), ApiError> {
        let actor = origin.user_id;
        match request {
            MutationRequest::CreateBoard {
                name,
                description,
                color,
            } => {
                let name = required_text(name, "name")?;
                let board = NewBoard {
                    name,
                    description,
                    color: color
                        .filter(|color| !color.trim().is_empty())
                        .unwrap_or_else(|| DEFAULT_BOARD_COLOR.to_string()),
                };
                let board = self
                    .write("create_board", self.repo.create_board(actor, board))
                    .await?;
                Ok((
                    board.id,
                    ServerEvent::BoardCreated {
                        board: board.clone(),
                    },
                    Committed::Board(board),
                ))
            }
            MutationRequest::UpdateBoard {
                board_id,
                name,
                description,
                color,
            } => {
                let patch = BoardPatch {
                    name: optional_text(name, "name")?,
                    description,
                    color: optional_text(color, "color")?,
                };
                if patch.is_empty() {
                    return Err(ApiError::validation("update_board changes nothing"));
                }
                self.require_member(board_id, actor).await?;
                let board = self
                    .write("update_board", self.repo.update_board(board_id, patch))
                    .await?;
                Ok((
                    board_id,
                    ServerEvent::BoardUpdated {
                        board: board.clone(),
                    },
                    Committed::Board(board),
                ))
            }
            MutationRequest::DeleteBoard { board_id } => {
                let role = self.require_member(board_id, actor).await?;
                if !role.can_delete_board() {
                    return Err(ApiError::new(
                        ErrorCode::Forbidden,
                        "only the board owner can delete it",
                    ));
                }
                self.write("delete_board", self.repo.delete_board(board_id))
                    .await?;
                Ok((
                    board_id,
                    ServerEvent::BoardDeleted { board_id },
                    Committed::BoardDeleted(board_id),
                ))
            }
            MutationRequest::CreateList {
                board_id,
                title,
                placement,
            } => {
                let board_id = board_id.ok_or_else(|| ApiError::missing_field("boardId"))?;
                let title = required_text(title, "title")?;
                self.require_member(board_id, actor).await?;
                let position = self
                    .place_list(board_id, placement.unwrap_or(Placement::End))
                    .await?;
                let list = self
                    .write(
                        "create_list",
                        self.repo.create_list(NewList {
                            board_id,
                            title,
                            position,
                        }),
                    )
                    .await?;
                Ok((
                    board_id,
                    ServerEvent::ListCreated {
                        board_id,
                        list: list.clone(),
                    },
                    Committed::List(list),
                ))
            }
            MutationRequest::UpdateList {
                list_id,
                title,
                position,
            } => {
                let patch = ListPatch {
                    title: optional_text(title, "title")?,
                    position: finite(position)?,
                };
                if patch.is_empty() {
                    return Err(ApiError::validation("update_list changes nothing"));
                }
                let board_id = self
                    .call("board_for_list", self.repo.board_for_list(list_id))
                    .await?;
                self.require_member(board_id, actor).await?;
                let list = self
                    .write("update_list", self.repo.update_list(list_id, patch))
                    .await?;
                Ok((
                    board_id,
                    ServerEvent::ListUpdated { list: list.clone() },
                    Committed::List(list),
                ))
            }
            MutationRequest::DeleteList { list_id } => {
                let board_id = self
                    .call("board_for_list", self.repo.board_for_list(list_id))
                    .await?;
                self.require_member(board_id, actor).await?;
                let list = self
                    .write("delete_list", self.repo.delete_list(list_id))
                    .await?;
                Ok((
                    board_id,
                    ServerEvent::ListDeleted {
                        board_id,
                        list_id: list.id,
                    },
                    Committed::ListDeleted(list.id),
                ))
            }
            MutationRequest::CreateTask {
                list_id,
                title,
                description,
                placement,
                priority,
                assignee_id,
                due_date,
            } => {
                let list_id = list_id.ok_or_else(|| ApiError::missing_field("listId"))?;
                let title = required_text(title, "title")?;
                let board_id = self
                    .call("board_for_list", self.repo.board_for_list(list_id))
                    .await?;
                self.require_member(board_id, actor).await?;
                let position = self
                    .place_task(board_id, list_id, None, placement.unwrap_or(Placement::End))
                    .await?;
                let task = self
                    .write(
                        "create_task",
                        self.repo.create_task(NewTask {
                            list_id,
                            title,
                            description,
                            position,
                            priority: priority.unwrap_or_default(),
                            assignee_id,
                            due_date,
                        }),
                    )
                    .await?;
                Ok((
                    board_id,
                    ServerEvent::TaskCreated {
                        list_id,
                        task: task.clone(),
                    },
                    Committed::Task(task),
                ))
            }
            MutationRequest::UpdateTask {
                task_id,
                title,
                description,
                priority,
                position,
                assignee_id,
                due_date,
            } => {
                let patch = TaskPatch {
                    title: optional_text(title, "title")?,
                    description,
                    priority,
                    position: finite(position)?,
                    assignee_id,
                    due_date,
                };
                if patch.is_empty() {
                    return Err(ApiError::validation("update_task changes nothing"));
                }
                let board_id = self
                    .call("board_for_task", self.repo.board_for_task(task_id))
                    .await?;
                self.require_member(board_id, actor).await?;
                let task = self
                    .write("update_task", self.repo.update_task(task_id, patch))
                    .await?;
                Ok((
                    board_id,
                    ServerEvent::TaskUpdated { task: task.clone() },
                    Committed::Task(task),
                ))
            }
            MutationRequest::MoveTask {
                task_id,
                to_list_id,
                placement,
                from_list_id,
            } => {
                let to_list_id = to_list_id.ok_or_else(|| ApiError::missing_field("toListId"))?;
                let board_id = self
                    .call("board_for_task", self.repo.board_for_task(task_id))
                    .await?;
                let target_board = self
                    .call("board_for_list", self.repo.board_for_list(to_list_id))
                    .await?;
                if target_board != board_id {
                    return Err(ApiError::validation(
                        "a task cannot move to a list on another board",
                    ));
                }
                self.require_member(board_id, actor).await?;
                let position = self
                    .place_task(
                        board_id,
                        to_list_id,
                        Some(task_id),
                        placement.unwrap_or(Placement::End),
                    )
                    .await?;
                let task = self
                    .write(
                        "move_task",
                        self.repo.move_task(task_id, to_list_id, position),
                    )
                    .await?;
                Ok((
                    board_id,
                    ServerEvent::TaskMoved {
                        task: task.clone(),
                        from_list_id,
                        to_list_id,
                        animate: true,
                    },
                    Committed::Task(task),
                ))
            }
            MutationRequest::DeleteTask { task_id } => {
                let board_id = self
                    .call("board_for_task", self.repo.board_for_task(task_id))
                    .await?;
                self.require_member(board_id, actor).await?;
                let task = self
                    .write("delete_task", self.repo.delete_task(task_id))
                    .await?;
                Ok((
                    board_id,
                    ServerEvent::TaskDeleted {
                        list_id: task.list_id,
                        task_id: task.id,
                    },
                    Committed::TaskDeleted(task.id),
                ))
            }
        }
    }

    pub async fn login(&self, username: &str) -> Result<UserSummary, ApiError> {
        let username = username.trim();
        if username.is_empty() {
            return Err(ApiError::missing_field("username"));
        }
        self.call("create_user", self.repo.create_user(username))
            .await
    }

    pub async fn health(&self) -> Result<(), ApiError> {
        self.call("health_check", self.repo.health_check()).await
    }

    pub async fn boards_for_user(&self, user_id: UserId) -> Result<Vec<Board>, ApiError> {
        self.call(
            "list_boards_for_user",
            self.repo.list_boards_for_user(user_id),
        )
        .await
    }

    /// Authoritative snapshot used for initial load and client reconciliation.
    pub async fn board_snapshot(
        &self,
        user_id: UserId,
        board_id: BoardId,
    ) -> Result<BoardSnapshot, ApiError> {
        self.require_member(board_id, user_id).await?;
        self.call("get_board", self.repo.get_board(board_id)).await
    }

    /// Owners and admins may add members; nobody can hand out ownership.
    pub async fn add_member(
        &self,
        actor: UserId,
        board_id: BoardId,
        user_id: UserId,
        role: Role,
    ) -> Result<BoardMember, ApiError> {
        let actor_role = self.require_member(board_id, actor).await?;
        if actor_role == Role::Member {
            return Err(ApiError::new(
                ErrorCode::Forbidden,
                "only owners and admins can add members",
            ));
        }
        if role == Role::Owner {
            return Err(ApiError::validation("a board has exactly one owner"));
        }
        self.call("add_member", self.repo.add_member(board_id, user_id, role))
            .await
    }

    /// Checks that `user_id` may watch `board_id`'s room.
    pub async fn authorize_view(&self, user_id: UserId, board_id: BoardId) -> Result<Role, ApiError> {
        self.require_member(board_id, user_id).await
    }

    async fn require_member(&self, board_id: BoardId, user_id: UserId) -> Result<Role, ApiError> {
        let role = self
            .call("member_role", self.repo.member_role(board_id, user_id))
            .await?;
        match role {
            Some(role) => Ok(role),
            None => {
                // distinguish a missing board from a foreign one
                self.call("get_board", self.repo.get_board(board_id))
                    .await?;
                Err(ApiError::new(
                    ErrorCode::Forbidden,
                    "user is not a member of this board",
                ))
            }
        }
    }

    /// Position for a new or moved task in `list_id`. A collapsed gap is
    /// compacted in one transaction first and every rewritten task is
    /// announced, so peers pick up the new positions.
    async fn place_task(
        &self,
        board_id: BoardId,
        list_id: ListId,
        moving: Option<TaskId>,
        placement: Placement<TaskId>,
    ) -> Result<f64, ApiError> {
        let siblings = self
            .call("list_tasks", self.repo.list_tasks(list_id))
            .await?;
        match ordering::resolve(&siblings, moving, placement) {
            Err(PlacementError::NeedsRenumber) => {}
            resolved => return resolved.map_err(placement_error),
        }
        let renumbered = self
            .write(
                "renumber_tasks",
                self.repo
                    .renumber_tasks(list_id, &ordering::renumber(&siblings)),
            )
            .await?;
        info!(list_id = %list_id, tasks = renumbered.len(), "renumbered task positions");
        for task in &renumbered {
            self.broadcaster
                .publish(board_id, ServerEvent::TaskUpdated { task: task.clone() }, None);
        }
        ordering::resolve(&renumbered, moving, placement).map_err(placement_error)
    }

    async fn place_list(
        &self,
        board_id: BoardId,
        placement: Placement<ListId>,
    ) -> Result<f64, ApiError> {
        let siblings = self
            .call("list_lists", self.repo.list_lists(board_id))
            .await?;
        match ordering::resolve(&siblings, None, placement) {
            Err(PlacementError::NeedsRenumber) => {}
            resolved => return resolved.map_err(placement_error),
        }
        let renumbered = self
            .write(
                "renumber_lists",
                self.repo
                    .renumber_lists(board_id, &ordering::renumber(&siblings)),
            )
            .await?;
        info!(board_id = %board_id, lists = renumbered.len(), "renumbered list positions");
        for list in &renumbered {
            self.broadcaster
                .publish(board_id, ServerEvent::ListUpdated { list: list.clone() }, None);
        }
        ordering::resolve(&renumbered, None, placement).map_err(placement_error)
    }

    /// Writes carry no deadline of their own; `submit` bounds how long the
    /// caller waits.
    async fn write<T>(
        &self,
        op: &'static str,
        fut: impl Future<Output = RepoResult<T>>,
    ) -> Result<T, ApiError> {
        let result = fut.await;
        debug!(op, ok = result.is_ok(), "repository write finished");
        result.map_err(repo_error)
    }

    async fn call<T>(
        &self,
        op: &'static str,
        fut: impl Future<Output = RepoResult<T>>,
    ) -> Result<T, ApiError> {
        match tokio::time::timeout(self.config.repo_timeout, fut).await {
            Ok(result) => result.map_err(repo_error),
            Err(_) => {
                warn!(op, timeout_ms = self.config.repo_timeout.as_millis() as u64, "repository call timed out");
                Err(ApiError::new(
                    ErrorCode::Timeout,
                    format!("{op} did not finish in time"),
                ))
            }
        }
    }
}

fn repo_error(err: RepoError) -> ApiError {
    let code = match &err {
        RepoError::NotFound { .. } => ErrorCode::NotFound,
        RepoError::Conflict(_) => ErrorCode::Conflict,
        RepoError::Validation(_) => ErrorCode::Validation,
        RepoError::Timeout => ErrorCode::Timeout,
        RepoError::Unavailable(_) => ErrorCode::Unavailable,
    };
    ApiError::new(code, err.to_string())
}

fn placement_error(err: PlacementError) -> ApiError {
    ApiError::validation(err.to_string())
}

fn required_text(value: Option<String>, field: &str) -> Result<String, ApiError> {
    match value {
        Some(text) if !text.trim().is_empty() => Ok(text.trim().to_string()),
        _ => Err(ApiError::missing_field(field)),
    }
}

fn optional_text(value: Option<String>, field: &str) -> Result<Option<String>, ApiError> {
    value.map(|text| required_text(Some(text), field)).transpose()
}

fn finite(position: Option<f64>) -> Result<Option<f64>, ApiError> {
    match position {
        Some(value) if !value.is_finite() => Err(ApiError::validation("position must be finite")),
        other => Ok(other),
    }
}

#[cfg(test)]
#[path = "tests/coordinator_tests.rs"]
mod tests;
