use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::{
    domain::{
        Board, BoardId, ConnectionId, List, ListId, PresenceUser, Priority, Task, TaskId, UserId,
    },
    error::ApiError,
    ordering::Placement,
};

/// Distinguishes "field absent" (`None`) from "field explicitly null" (`Some(None)`).
fn double_option<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PointerPosition {
    pub x: f64,
    pub y: f64,
}

/// Every state change a client can ask for. Fields a mutation cannot do
/// without are still `Option` on the wire so that an absent value is reported
/// as a validation error instead of a decode failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum MutationRequest {
    CreateBoard {
        #[serde(default)]
        name: Option<String>,
        #[serde(default)]
        description: Option<String>,
        #[serde(default)]
        color: Option<String>,
    },
    UpdateBoard {
        board_id: BoardId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        #[serde(
            default,
            deserialize_with = "double_option",
            skip_serializing_if = "Option::is_none"
        )]
        description: Option<Option<String>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        color: Option<String>,
    },
    DeleteBoard {
        board_id: BoardId,
    },
    CreateList {
        #[serde(default)]
        board_id: Option<BoardId>,
        #[serde(default)]
        title: Option<String>,
        #[serde(default)]
        placement: Option<Placement<ListId>>,
    },
    UpdateList {
        list_id: ListId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        title: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        position: Option<f64>,
    },
    DeleteList {
        list_id: ListId,
    },
    CreateTask {
        #[serde(default)]
        list_id: Option<ListId>,
        #[serde(default)]
        title: Option<String>,
        #[serde(default)]
        description: Option<String>,
        #[serde(default)]
        placement: Option<Placement<TaskId>>,
        #[serde(default)]
        priority: Option<Priority>,
        #[serde(default)]
        assignee_id: Option<UserId>,
        #[serde(default)]
        due_date: Option<DateTime<Utc>>,
    },
    UpdateTask {
        task_id: TaskId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        title: Option<String>,
        #[serde(
            default,
            deserialize_with = "double_option",
            skip_serializing_if = "Option::is_none"
        )]
        description: Option<Option<String>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        priority: Option<Priority>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        position: Option<f64>,
        #[serde(
            default,
            deserialize_with = "double_option",
            skip_serializing_if = "Option::is_none"
        )]
        assignee_id: Option<Option<UserId>>,
        #[serde(
            default,
            deserialize_with = "double_option",
            skip_serializing_if = "Option::is_none"
        )]
        due_date: Option<Option<DateTime<Utc>>>,
    },
    MoveTask {
        task_id: TaskId,
        #[serde(default)]
        to_list_id: Option<ListId>,
        #[serde(default)]
        placement: Option<Placement<TaskId>>,
        /// Annotation for clients animating the task out of its old list.
        /// Never consulted when committing the move.
        #[serde(default)]
        from_list_id: Option<ListId>,
    },
    DeleteTask {
        task_id: TaskId,
    },
}

impl MutationRequest {
    pub fn op_name(&self) -> &'static str {
        match self {
            MutationRequest::CreateBoard { .. } => "create_board",
            MutationRequest::UpdateBoard { .. } => "update_board",
            MutationRequest::DeleteBoard { .. } => "delete_board",
            MutationRequest::CreateList { .. } => "create_list",
            MutationRequest::UpdateList { .. } => "update_list",
            MutationRequest::DeleteList { .. } => "delete_list",
            MutationRequest::CreateTask { .. } => "create_task",
            MutationRequest::UpdateTask { .. } => "update_task",
            MutationRequest::MoveTask { .. } => "move_task",
            MutationRequest::DeleteTask { .. } => "delete_task",
        }
    }
}

/// The committed entity handed back to whoever issued a mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "entity", content = "value", rename_all = "snake_case")]
pub enum Committed {
    Board(Board),
    List(List),
    Task(Task),
    BoardDeleted(BoardId),
    ListDeleted(ListId),
    TaskDeleted(TaskId),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationReply {
    Committed(Committed),
    Rejected(ApiError),
}

impl From<Result<Committed, ApiError>> for MutationReply {
    fn from(value: Result<Committed, ApiError>) -> Self {
        match value {
            Ok(committed) => MutationReply::Committed(committed),
            Err(err) => MutationReply::Rejected(err),
        }
    }
}

impl MutationReply {
    pub fn into_result(self) -> Result<Committed, ApiError> {
        match self {
            MutationReply::Committed(committed) => Ok(committed),
            MutationReply::Rejected(err) => Err(err),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    content = "payload",
    rename_all_fields = "camelCase"
)]
pub enum ClientMessage {
    #[serde(rename = "board:join")]
    JoinBoard {
        board_id: BoardId,
        #[serde(default)]
        user: Option<PresenceUser>,
    },
    #[serde(rename = "board:leave")]
    LeaveBoard { board_id: BoardId },
    #[serde(rename = "cursor:move")]
    CursorMove {
        board_id: BoardId,
        position: PointerPosition,
        #[serde(default)]
        user: Option<PresenceUser>,
    },
    #[serde(rename = "task:dragging")]
    TaskDragging {
        board_id: BoardId,
        task_id: TaskId,
        position: PointerPosition,
    },
    #[serde(rename = "task:typing")]
    TaskTyping {
        board_id: BoardId,
        task_id: TaskId,
        #[serde(default)]
        user: Option<PresenceUser>,
        is_typing: bool,
    },
    #[serde(rename = "mutation")]
    Mutate {
        request_id: String,
        mutation: MutationRequest,
    },
    #[serde(rename = "pong")]
    Pong { timestamp: i64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Board,
    List,
    Task,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationKind {
    Created,
    Updated,
    Moved,
    Deleted,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    content = "payload",
    rename_all_fields = "camelCase"
)]
pub enum ServerEvent {
    #[serde(rename = "connected")]
    Connected { connection_id: ConnectionId },
    #[serde(rename = "user:joined")]
    UserJoined {
        connection_id: ConnectionId,
        user: PresenceUser,
    },
    #[serde(rename = "user:left")]
    UserLeft {
        connection_id: ConnectionId,
        user: PresenceUser,
    },
    #[serde(rename = "board:created")]
    BoardCreated { board: Board },
    #[serde(rename = "board:updated")]
    BoardUpdated { board: Board },
    #[serde(rename = "board:deleted")]
    BoardDeleted { board_id: BoardId },
    #[serde(rename = "list:created")]
    ListCreated { board_id: BoardId, list: List },
    #[serde(rename = "list:updated")]
    ListUpdated { list: List },
    #[serde(rename = "list:deleted")]
    ListDeleted { board_id: BoardId, list_id: ListId },
    #[serde(rename = "task:created")]
    TaskCreated { list_id: ListId, task: Task },
    #[serde(rename = "task:updated")]
    TaskUpdated { task: Task },
    #[serde(rename = "task:moved")]
    TaskMoved {
        task: Task,
        #[serde(default)]
        from_list_id: Option<ListId>,
        to_list_id: ListId,
        animate: bool,
    },
    #[serde(rename = "task:deleted")]
    TaskDeleted { list_id: ListId, task_id: TaskId },
    #[serde(rename = "cursor:update")]
    CursorUpdate {
        connection_id: ConnectionId,
        position: PointerPosition,
        user: PresenceUser,
    },
    #[serde(rename = "task:drag-update")]
    TaskDragUpdate {
        connection_id: ConnectionId,
        task_id: TaskId,
        position: PointerPosition,
    },
    #[serde(rename = "task:typing-update")]
    TaskTypingUpdate {
        task_id: TaskId,
        user: PresenceUser,
        is_typing: bool,
    },
    #[serde(rename = "mutation:result")]
    MutationResult {
        request_id: String,
        result: MutationReply,
    },
    #[serde(rename = "ping")]
    Ping { timestamp: i64 },
    #[serde(rename = "error")]
    Error(ApiError),
}

impl ServerEvent {
    /// `Some` for the events that describe a committed board/list/task change.
    pub fn mutation_kind(&self) -> Option<(EntityKind, MutationKind)> {
        use EntityKind as E;
        use MutationKind as M;
        match self {
            ServerEvent::BoardCreated { .. } => Some((E::Board, M::Created)),
            ServerEvent::BoardUpdated { .. } => Some((E::Board, M::Updated)),
            ServerEvent::BoardDeleted { .. } => Some((E::Board, M::Deleted)),
            ServerEvent::ListCreated { .. } => Some((E::List, M::Created)),
            ServerEvent::ListUpdated { .. } => Some((E::List, M::Updated)),
            ServerEvent::ListDeleted { .. } => Some((E::List, M::Deleted)),
            ServerEvent::TaskCreated { .. } => Some((E::Task, M::Created)),
            ServerEvent::TaskUpdated { .. } => Some((E::Task, M::Updated)),
            ServerEvent::TaskMoved { .. } => Some((E::Task, M::Moved)),
            ServerEvent::TaskDeleted { .. } => Some((E::Task, M::Deleted)),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::Connected { .. } => "connected",
            ServerEvent::UserJoined { .. } => "user:joined",
            ServerEvent::UserLeft { .. } => "user:left",
            ServerEvent::BoardCreated { .. } => "board:created",
            ServerEvent::BoardUpdated { .. } => "board:updated",
            ServerEvent::BoardDeleted { .. } => "board:deleted",
            ServerEvent::ListCreated { .. } => "list:created",
            ServerEvent::ListUpdated { .. } => "list:updated",
            ServerEvent::ListDeleted { .. } => "list:deleted",
            ServerEvent::TaskCreated { .. } => "task:created",
            ServerEvent::TaskUpdated { .. } => "task:updated",
            ServerEvent::TaskMoved { .. } => "task:moved",
            ServerEvent::TaskDeleted { .. } => "task:deleted",
            ServerEvent::CursorUpdate { .. } => "cursor:update",
            ServerEvent::TaskDragUpdate { .. } => "task:drag-update",
            ServerEvent::TaskTypingUpdate { .. } => "task:typing-update",
            ServerEvent::MutationResult { .. } => "mutation:result",
            ServerEvent::Ping { .. } => "ping",
            ServerEvent::Error(_) => "error",
        }
    }
}

#[cfg(test)]
#[path = "tests/protocol_tests.rs"]
mod tests;
