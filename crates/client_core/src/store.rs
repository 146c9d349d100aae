//! Local copy of one board as a client sees it.
//!
//! Server events are applied idempotently, keyed by entity id, and an event
//! carrying an older `updatedAt` than the copy already held is skipped. Local
//! edits go through a two-phase contract: `apply` performs the edit
//! tentatively and returns a `Pending`, then `settle` either folds in the
//! committed entity or restores what the edit replaced.

use std::collections::HashMap;

use chrono::Utc;
use shared::{
    domain::{Board, BoardId, BoardMember, BoardSnapshot, List, ListId, Task, TaskId, UserId, UserSummary},
    error::{ApiError, ErrorCode},
    ordering::{self, Placement, PlacementError},
    protocol::{Committed, MutationRequest, ServerEvent},
};

#[derive(Debug, Clone, PartialEq)]
enum Undo {
    RemoveTask(TaskId),
    RestoreTask(Task),
    RemoveList(ListId),
    RestoreList(List),
    RestoreBoard(Board),
    Undelete,
}

/// A tentative edit waiting for the server's verdict.
#[derive(Debug, Clone, PartialEq)]
pub struct Pending {
    request: MutationRequest,
    undo: Undo,
}

impl Pending {
    /// The mutation to send. Identical to what was passed to `apply`, except
    /// that a move gains its `fromListId` annotation when it had none.
    pub fn request(&self) -> &MutationRequest {
        &self.request
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Settlement {
    Committed(Committed),
    Reverted { error: ApiError },
}

#[derive(Debug, Clone)]
pub struct BoardState {
    board: Board,
    members: Vec<BoardMember>,
    lists: HashMap<ListId, List>,
    tasks: HashMap<TaskId, Task>,
    deleted: bool,
    next_temp_id: i64,
}

impl BoardState {
    pub fn from_snapshot(snapshot: BoardSnapshot) -> Self {
        let mut state = Self {
            board: snapshot.board.clone(),
            members: Vec::new(),
            lists: HashMap::new(),
            tasks: HashMap::new(),
            deleted: false,
            next_temp_id: -1,
        };
        state.reset(snapshot);
        state
    }

    /// Replaces everything with an authoritative re-fetch. The temporary id
    /// counter keeps running so ids are never reused.
    pub fn reset(&mut self, snapshot: BoardSnapshot) {
        self.board = snapshot.board;
        self.members = snapshot.members;
        self.lists.clear();
        self.tasks.clear();
        self.deleted = false;
        for entry in snapshot.lists {
            for task in entry.tasks {
                self.tasks.insert(task.id, task);
            }
            self.lists.insert(entry.list.id, entry.list);
        }
    }

    pub fn board(&self) -> &Board {
        &self.board
    }

    pub fn members(&self) -> &[BoardMember] {
        &self.members
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted
    }

    pub fn list(&self, list_id: ListId) -> Option<&List> {
        self.lists.get(&list_id)
    }

    pub fn task(&self, task_id: TaskId) -> Option<&Task> {
        self.tasks.get(&task_id)
    }

    /// Lists in board order.
    pub fn lists(&self) -> Vec<&List> {
        let mut lists: Vec<&List> = self.lists.values().collect();
        lists.sort_by(|a, b| ordering::compare(*a, *b));
        lists
    }

    /// Tasks of one list in display order.
    pub fn tasks_in(&self, list_id: ListId) -> Vec<&Task> {
        let mut tasks: Vec<&Task> = self
            .tasks
            .values()
            .filter(|task| task.list_id == list_id)
            .collect();
        tasks.sort_by(|a, b| ordering::compare(*a, *b));
        tasks
    }

    /// Folds one server event into the copy. Returns whether anything changed.
    pub fn apply_event(&mut self, event: &ServerEvent) -> bool {
        match event {
            ServerEvent::BoardUpdated { board } if board.id == self.board.id => {
                self.upsert_board(board.clone())
            }
            ServerEvent::BoardDeleted { board_id } if *board_id == self.board.id => {
                !std::mem::replace(&mut self.deleted, true)
            }
            ServerEvent::ListCreated { list, .. } | ServerEvent::ListUpdated { list } => {
                self.upsert_list(list.clone())
            }
            ServerEvent::ListDeleted { list_id, .. } => self.remove_list(*list_id),
            ServerEvent::TaskCreated { task, .. }
            | ServerEvent::TaskUpdated { task }
            | ServerEvent::TaskMoved { task, .. } => self.upsert_task(task.clone()),
            ServerEvent::TaskDeleted { task_id, .. } => self.tasks.remove(task_id).is_some(),
            _ => false,
        }
    }

    /// Performs `request` locally ahead of the server. Checks that would make
    /// the server reject the request outright fail here without touching the
    /// copy.
    pub fn apply(&mut self, mut request: MutationRequest) -> Result<Pending, ApiError> {
        if self.deleted {
            return Err(ApiError::new(ErrorCode::NotFound, "board was deleted"));
        }
        let undo = match &mut request {
            MutationRequest::CreateBoard { .. } => {
                return Err(ApiError::validation(
                    "create_board does not apply to an open board",
                ));
            }
            MutationRequest::UpdateBoard {
                board_id,
                name,
                description,
                color,
            } => {
                self.ensure_board(*board_id)?;
                let name = optional_text(name.clone(), "name")?;
                let previous = self.board.clone();
                if let Some(name) = name {
                    self.board.name = name;
                }
                if let Some(description) = description {
                    self.board.description = description.clone();
                }
                if let Some(color) = color {
                    self.board.color = color.clone();
                }
                Undo::RestoreBoard(previous)
            }
            MutationRequest::DeleteBoard { board_id } => {
                self.ensure_board(*board_id)?;
                self.deleted = true;
                Undo::Undelete
            }
            MutationRequest::CreateList {
                board_id,
                title,
                placement,
            } => {
                let board_id = board_id.ok_or_else(|| ApiError::missing_field("boardId"))?;
                self.ensure_board(board_id)?;
                let title = required_text(title.clone(), "title")?;
                let position = self.place_list(placement.unwrap_or(Placement::End))?;
                let id = ListId(self.temp_id());
                self.lists.insert(
                    id,
                    List {
                        id,
                        board_id,
                        title,
                        position,
                        updated_at: Utc::now(),
                    },
                );
                Undo::RemoveList(id)
            }
            MutationRequest::UpdateList {
                list_id,
                title,
                position,
            } => {
                let title = optional_text(title.clone(), "title")?;
                let position = finite(*position)?;
                let list = self
                    .lists
                    .get_mut(list_id)
                    .ok_or_else(|| not_found("list", list_id.0))?;
                let previous = list.clone();
                if let Some(title) = title {
                    list.title = title;
                }
                if let Some(position) = position {
                    list.position = position;
                }
                Undo::RestoreList(previous)
            }
            MutationRequest::DeleteList { list_id } => {
                if !self.lists.contains_key(list_id) {
                    return Err(not_found("list", list_id.0));
                }
                if self.tasks.values().any(|task| task.list_id == *list_id) {
                    return Err(ApiError::new(
                        ErrorCode::Conflict,
                        "list still holds tasks",
                    ));
                }
                let previous = self
                    .lists
                    .remove(list_id)
                    .ok_or_else(|| not_found("list", list_id.0))?;
                Undo::RestoreList(previous)
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
                let title = required_text(title.clone(), "title")?;
                if !self.lists.contains_key(&list_id) {
                    return Err(not_found("list", list_id.0));
                }
                let position =
                    self.place_task(list_id, None, placement.unwrap_or(Placement::End))?;
                let id = TaskId(self.temp_id());
                let now = Utc::now();
                let task = Task {
                    id,
                    list_id,
                    title,
                    description: description.clone(),
                    position,
                    priority: priority.unwrap_or_default(),
                    assignee: assignee_id.map(|user_id| self.user_summary(user_id)),
                    due_date: *due_date,
                    created_at: now,
                    updated_at: now,
                };
                self.tasks.insert(id, task);
                Undo::RemoveTask(id)
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
                let title = optional_text(title.clone(), "title")?;
                let position = finite(*position)?;
                let assignee = assignee_id.map(|id| id.map(|user_id| self.user_summary(user_id)));
                let task = self
                    .tasks
                    .get_mut(task_id)
                    .ok_or_else(|| not_found("task", task_id.0))?;
                let previous = task.clone();
                if let Some(title) = title {
                    task.title = title;
                }
                if let Some(description) = description {
                    task.description = description.clone();
                }
                if let Some(priority) = priority {
                    task.priority = *priority;
                }
                if let Some(position) = position {
                    task.position = position;
                }
                if let Some(assignee) = assignee {
                    task.assignee = assignee;
                }
                if let Some(due_date) = due_date {
                    task.due_date = *due_date;
                }
                Undo::RestoreTask(previous)
            }
            MutationRequest::MoveTask {
                task_id,
                to_list_id,
                placement,
                from_list_id,
            } => {
                let to_list_id = to_list_id.ok_or_else(|| ApiError::missing_field("toListId"))?;
                if !self.lists.contains_key(&to_list_id) {
                    return Err(not_found("list", to_list_id.0));
                }
                if !self.tasks.contains_key(task_id) {
                    return Err(not_found("task", task_id.0));
                }
                let position = self.place_task(
                    to_list_id,
                    Some(*task_id),
                    placement.unwrap_or(Placement::End),
                )?;
                // taken after placing so a compaction of the list survives a revert
                let previous = self
                    .tasks
                    .get(task_id)
                    .cloned()
                    .ok_or_else(|| not_found("task", task_id.0))?;
                if from_list_id.is_none() {
                    *from_list_id = Some(previous.list_id);
                }
                if let Some(task) = self.tasks.get_mut(task_id) {
                    task.list_id = to_list_id;
                    task.position = position;
                }
                Undo::RestoreTask(previous)
            }
            MutationRequest::DeleteTask { task_id } => {
                let previous = self
                    .tasks
                    .remove(task_id)
                    .ok_or_else(|| not_found("task", task_id.0))?;
                Undo::RestoreTask(previous)
            }
        };

        Ok(Pending { request, undo })
    }

    /// Resolves a tentative edit with the server's answer.
    pub fn settle(
        &mut self,
        pending: Pending,
        result: Result<Committed, ApiError>,
    ) -> Settlement {
        match result {
            Ok(committed) => {
                match pending.undo {
                    Undo::RemoveTask(temp) => {
                        self.tasks.remove(&temp);
                    }
                    Undo::RemoveList(temp) => {
                        self.remove_list(temp);
                    }
                    _ => {}
                }
                match &committed {
                    Committed::Board(board) => {
                        self.upsert_board(board.clone());
                    }
                    Committed::List(list) => {
                        self.upsert_list(list.clone());
                    }
                    Committed::Task(task) => {
                        self.upsert_task(task.clone());
                    }
                    Committed::BoardDeleted(board_id) => {
                        if *board_id == self.board.id {
                            self.deleted = true;
                        }
                    }
                    Committed::ListDeleted(list_id) => {
                        self.remove_list(*list_id);
                    }
                    Committed::TaskDeleted(task_id) => {
                        self.tasks.remove(task_id);
                    }
                }
                Settlement::Committed(committed)
            }
            Err(error) => {
                match pending.undo {
                    Undo::RemoveTask(temp) => {
                        self.tasks.remove(&temp);
                    }
                    Undo::RestoreTask(task) => {
                        self.upsert_task(task);
                    }
                    Undo::RemoveList(temp) => {
                        self.remove_list(temp);
                    }
                    Undo::RestoreList(list) => {
                        self.upsert_list(list);
                    }
                    Undo::RestoreBoard(board) => {
                        self.upsert_board(board);
                    }
                    Undo::Undelete => self.deleted = false,
                }
                Settlement::Reverted { error }
            }
        }
    }

    fn ensure_board(&self, board_id: BoardId) -> Result<(), ApiError> {
        if board_id == self.board.id {
            Ok(())
        } else {
            Err(not_found("board", board_id.0))
        }
    }

    fn temp_id(&mut self) -> i64 {
        let id = self.next_temp_id;
        self.next_temp_id -= 1;
        id
    }

    /// Resolves a task position, compacting the list in place when its
    /// neighbours have collapsed. Order is kept; the server announces its own
    /// compaction, which supersedes these positions.
    fn place_task(
        &mut self,
        list_id: ListId,
        moving: Option<TaskId>,
        placement: Placement<TaskId>,
    ) -> Result<f64, ApiError> {
        let siblings = self.siblings(list_id);
        match ordering::resolve(&siblings, moving, placement) {
            Err(PlacementError::NeedsRenumber) => {}
            resolved => return resolved.map_err(placement_error),
        }
        for (task_id, position) in ordering::renumber(&siblings) {
            if let Some(task) = self.tasks.get_mut(&task_id) {
                task.position = position;
            }
        }
        ordering::resolve(&self.siblings(list_id), moving, placement).map_err(placement_error)
    }

    fn place_list(&mut self, placement: Placement<ListId>) -> Result<f64, ApiError> {
        let siblings: Vec<List> = self.lists.values().cloned().collect();
        match ordering::resolve(&siblings, None, placement) {
            Err(PlacementError::NeedsRenumber) => {}
            resolved => return resolved.map_err(placement_error),
        }
        for (list_id, position) in ordering::renumber(&siblings) {
            if let Some(list) = self.lists.get_mut(&list_id) {
                list.position = position;
            }
        }
        let siblings: Vec<List> = self.lists.values().cloned().collect();
        ordering::resolve(&siblings, None, placement).map_err(placement_error)
    }

    fn siblings(&self, list_id: ListId) -> Vec<Task> {
        self.tasks
            .values()
            .filter(|task| task.list_id == list_id)
            .cloned()
            .collect()
    }

    fn user_summary(&self, user_id: UserId) -> UserSummary {
        self.members
            .iter()
            .find(|member| member.user.id == user_id)
            .map(|member| member.user.clone())
            .unwrap_or_else(|| UserSummary {
                id: user_id,
                username: format!("user-{user_id}"),
            })
    }

    fn upsert_board(&mut self, board: Board) -> bool {
        if board.id != self.board.id || board.updated_at < self.board.updated_at {
            return false;
        }
        let changed = board != self.board;
        self.board = board;
        changed
    }

    fn upsert_list(&mut self, list: List) -> bool {
        if list.board_id != self.board.id {
            return false;
        }
        if let Some(current) = self.lists.get(&list.id) {
            if list.updated_at < current.updated_at || *current == list {
                return false;
            }
        }
        self.lists.insert(list.id, list);
        true
    }

    fn upsert_task(&mut self, task: Task) -> bool {
        if !self.lists.contains_key(&task.list_id) {
            return false;
        }
        if let Some(current) = self.tasks.get(&task.id) {
            if task.updated_at < current.updated_at || *current == task {
                return false;
            }
        }
        self.tasks.insert(task.id, task);
        true
    }

    fn remove_list(&mut self, list_id: ListId) -> bool {
        let removed = self.lists.remove(&list_id).is_some();
        self.tasks.retain(|_, task| task.list_id != list_id);
        removed
    }
}

fn not_found(entity: &str, id: i64) -> ApiError {
    ApiError::new(ErrorCode::NotFound, format!("{entity} {id} not found"))
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
#[path = "tests/store_tests.rs"]
mod tests;
