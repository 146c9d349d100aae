//! The contract the synchronization core uses to read and write boards.
//!
//! Every write returns the full committed entity, assignee included, so the
//! caller can publish a self-contained event without a second read.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shared::domain::{
    Board, BoardId, BoardMember, BoardSnapshot, List, ListId, Priority, Role, Task, TaskId,
    UserId, UserSummary,
};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RepoError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("invalid input: {0}")]
    Validation(String),
    #[error("store did not answer in time")]
    Timeout,
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl RepoError {
    pub fn not_found(entity: &'static str, id: i64) -> Self {
        Self::NotFound { entity, id }
    }
}

impl From<sqlx::Error> for RepoError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut => RepoError::Timeout,
            sqlx::Error::Database(db) if db.is_foreign_key_violation() => {
                RepoError::Validation("referenced entity does not exist".into())
            }
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                RepoError::Conflict(db.message().to_string())
            }
            other => RepoError::Unavailable(other.to_string()),
        }
    }
}

pub type RepoResult<T> = Result<T, RepoError>;

#[derive(Debug, Clone, PartialEq)]
pub struct NewBoard {
    pub name: String,
    pub description: Option<String>,
    pub color: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BoardPatch {
    pub name: Option<String>,
    pub description: Option<Option<String>>,
    pub color: Option<String>,
}

impl BoardPatch {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.description.is_none() && self.color.is_none()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewList {
    pub board_id: BoardId,
    pub title: String,
    pub position: f64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListPatch {
    pub title: Option<String>,
    pub position: Option<f64>,
}

impl ListPatch {
    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.position.is_none()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewTask {
    pub list_id: ListId,
    pub title: String,
    pub description: Option<String>,
    pub position: f64,
    pub priority: Priority,
    pub assignee_id: Option<UserId>,
    pub due_date: Option<DateTime<Utc>>,
}

/// Partial task update. `None` leaves a field untouched; `Some(None)` clears
/// a nullable field.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskPatch {
    pub title: Option<String>,
    pub description: Option<Option<String>>,
    pub priority: Option<Priority>,
    pub position: Option<f64>,
    pub assignee_id: Option<Option<UserId>>,
    pub due_date: Option<Option<DateTime<Utc>>>,
}

impl TaskPatch {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.priority.is_none()
            && self.position.is_none()
            && self.assignee_id.is_none()
            && self.due_date.is_none()
    }
}

#[async_trait]
pub trait BoardRepository: Send + Sync {
    async fn health_check(&self) -> RepoResult<()>;

    async fn create_user(&self, username: &str) -> RepoResult<UserSummary>;
    async fn get_user(&self, user_id: UserId) -> RepoResult<UserSummary>;

    /// Creates the board and records `owner` as its `Role::Owner` member.
    async fn create_board(&self, owner: UserId, board: NewBoard) -> RepoResult<Board>;
    async fn update_board(&self, board_id: BoardId, patch: BoardPatch) -> RepoResult<Board>;
    /// Removes the board together with its lists, tasks and memberships.
    async fn delete_board(&self, board_id: BoardId) -> RepoResult<()>;
    async fn get_board(&self, board_id: BoardId) -> RepoResult<BoardSnapshot>;
    async fn list_boards_for_user(&self, user_id: UserId) -> RepoResult<Vec<Board>>;
    async fn add_member(
        &self,
        board_id: BoardId,
        user_id: UserId,
        role: Role,
    ) -> RepoResult<BoardMember>;
    async fn member_role(&self, board_id: BoardId, user_id: UserId) -> RepoResult<Option<Role>>;

    async fn create_list(&self, list: NewList) -> RepoResult<List>;
    async fn update_list(&self, list_id: ListId, patch: ListPatch) -> RepoResult<List>;
    /// Fails with `Conflict` while the list still holds tasks.
    async fn delete_list(&self, list_id: ListId) -> RepoResult<List>;
    async fn list_lists(&self, board_id: BoardId) -> RepoResult<Vec<List>>;
    /// Rewrites list positions of one board in a single transaction and
    /// returns the rewritten lists. Ids not on the board are skipped.
    async fn renumber_lists(
        &self,
        board_id: BoardId,
        positions: &[(ListId, f64)],
    ) -> RepoResult<Vec<List>>;
    async fn board_for_list(&self, list_id: ListId) -> RepoResult<BoardId>;

    async fn create_task(&self, task: NewTask) -> RepoResult<Task>;
    async fn update_task(&self, task_id: TaskId, patch: TaskPatch) -> RepoResult<Task>;
    /// Rewrites `list_id` and `position` in a single statement.
    async fn move_task(
        &self,
        task_id: TaskId,
        to_list_id: ListId,
        position: f64,
    ) -> RepoResult<Task>;
    /// Returns the task as it was just before removal.
    async fn delete_task(&self, task_id: TaskId) -> RepoResult<Task>;
    async fn get_task(&self, task_id: TaskId) -> RepoResult<Task>;
    async fn list_tasks(&self, list_id: ListId) -> RepoResult<Vec<Task>>;
    /// Same as `renumber_lists`, for the tasks of one list.
    async fn renumber_tasks(
        &self,
        list_id: ListId,
        positions: &[(TaskId, f64)],
    ) -> RepoResult<Vec<Task>>;
    async fn board_for_task(&self, task_id: TaskId) -> RepoResult<BoardId>;
}
