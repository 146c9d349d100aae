use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shared::domain::{
    Board, BoardId, BoardMember, BoardSnapshot, List, ListId, ListWithTasks, Priority, Role, Task,
    TaskId, UserId, UserSummary,
};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow},
    Pool, Row, Sqlite,
};

mod repository;

pub use repository::{
    BoardPatch, BoardRepository, ListPatch, NewBoard, NewList, NewTask, RepoError, RepoResult,
    TaskPatch,
};

const TASK_SELECT: &str = "SELECT t.id, t.list_id, t.title, t.description, t.position, t.priority,
        t.assignee_user_id, u.username AS assignee_username, t.due_date, t.created_at, t.updated_at
     FROM tasks t
     LEFT JOIN users u ON u.id = t.assignee_user_id";

// Written statements hand back the same columns as TASK_SELECT so one row
// mapper serves both.
const TASK_RETURNING: &str = "RETURNING id, list_id, title, description, position, priority,
        assignee_user_id,
        (SELECT username FROM users WHERE users.id = assignee_user_id) AS assignee_username,
        due_date, created_at, updated_at";

const LIST_SELECT: &str = "SELECT id, board_id, title, position, updated_at FROM lists";

const BOARD_SELECT: &str =
    "SELECT id, name, description, color, owner_user_id, created_at, updated_at FROM boards";

/// SQLite-backed `BoardRepository`.
#[derive(Clone)]
pub struct Storage {
    pool: Pool<Sqlite>,
}

impl Storage {
    pub async fn new(database_url: &str) -> Result<Self> {
        ensure_sqlite_parent_dir_exists(database_url)?;

        let connect_options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(connect_options)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }
}

#[async_trait]
impl BoardRepository for Storage {
    async fn health_check(&self) -> RepoResult<()> {
        let _: i64 = sqlx::query_scalar("SELECT 1").fetch_one(&self.pool).await?;
        Ok(())
    }

    async fn create_user(&self, username: &str) -> RepoResult<UserSummary> {
        let row = sqlx::query(
            "INSERT INTO users (username) VALUES (?)
             ON CONFLICT(username) DO UPDATE SET username=excluded.username
             RETURNING id, username",
        )
        .bind(username)
        .fetch_one(&self.pool)
        .await?;
        user_from_row(&row)
    }

    async fn get_user(&self, user_id: UserId) -> RepoResult<UserSummary> {
        let row = sqlx::query("SELECT id, username FROM users WHERE id = ?")
            .bind(user_id.0)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| RepoError::not_found("user", user_id.0))?;
        user_from_row(&row)
    }

    async fn create_board(&self, owner: UserId, board: NewBoard) -> RepoResult<Board> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query(
            "INSERT INTO boards (name, description, color, owner_user_id, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?)
             RETURNING id, name, description, color, owner_user_id, created_at, updated_at",
        )
        .bind(&board.name)
        .bind(&board.description)
        .bind(&board.color)
        .bind(owner.0)
        .bind(now)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;
        let created = board_from_row(&row)?;
        sqlx::query("INSERT INTO board_members (board_id, user_id, role) VALUES (?, ?, ?)")
            .bind(created.id.0)
            .bind(owner.0)
            .bind(Role::Owner.as_str())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(created)
    }

    async fn update_board(&self, board_id: BoardId, patch: BoardPatch) -> RepoResult<Board> {
        let row = sqlx::query(
            "UPDATE boards SET
                name = COALESCE(?, name),
                description = CASE WHEN ? THEN ? ELSE description END,
                color = COALESCE(?, color),
                updated_at = ?
             WHERE id = ?
             RETURNING id, name, description, color, owner_user_id, created_at, updated_at",
        )
        .bind(&patch.name)
        .bind(patch.description.is_some())
        .bind(patch.description.clone().flatten())
        .bind(&patch.color)
        .bind(Utc::now())
        .bind(board_id.0)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| RepoError::not_found("board", board_id.0))?;
        board_from_row(&row)
    }

    async fn delete_board(&self, board_id: BoardId) -> RepoResult<()> {
        let result = sqlx::query("DELETE FROM boards WHERE id = ?")
            .bind(board_id.0)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(RepoError::not_found("board", board_id.0));
        }
        Ok(())
    }

    async fn get_board(&self, board_id: BoardId) -> RepoResult<BoardSnapshot> {
        // one read transaction so lists and tasks come from the same snapshot
        let mut tx = self.pool.begin().await?;

        let board_row = sqlx::query(&format!("{BOARD_SELECT} WHERE id = ?"))
            .bind(board_id.0)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| RepoError::not_found("board", board_id.0))?;
        let board = board_from_row(&board_row)?;

        let list_rows = sqlx::query(&format!(
            "{LIST_SELECT} WHERE board_id = ? ORDER BY position ASC, id ASC"
        ))
        .bind(board_id.0)
        .fetch_all(&mut *tx)
        .await?;

        let task_rows = sqlx::query(&format!(
            "{TASK_SELECT}
             INNER JOIN lists l ON l.id = t.list_id
             WHERE l.board_id = ?
             ORDER BY t.position ASC, t.id ASC"
        ))
        .bind(board_id.0)
        .fetch_all(&mut *tx)
        .await?;

        let member_rows = sqlx::query(
            "SELECT m.board_id, u.id AS user_id, u.username, m.role
             FROM board_members m
             INNER JOIN users u ON u.id = m.user_id
             WHERE m.board_id = ?
             ORDER BY lower(u.username) ASC",
        )
        .bind(board_id.0)
        .fetch_all(&mut *tx)
        .await?;
        tx.commit().await?;

        let mut tasks_by_list: HashMap<ListId, Vec<Task>> = HashMap::new();
        for row in &task_rows {
            let task = task_from_row(row)?;
            tasks_by_list.entry(task.list_id).or_default().push(task);
        }

        let lists = list_rows
            .iter()
            .map(|row| {
                let list = list_from_row(row)?;
                let tasks = tasks_by_list.remove(&list.id).unwrap_or_default();
                Ok(ListWithTasks { list, tasks })
            })
            .collect::<RepoResult<Vec<_>>>()?;

        let members = member_rows
            .iter()
            .map(member_from_row)
            .collect::<RepoResult<Vec<_>>>()?;

        Ok(BoardSnapshot {
            board,
            lists,
            members,
        })
    }

    async fn list_boards_for_user(&self, user_id: UserId) -> RepoResult<Vec<Board>> {
        let rows = sqlx::query(
            "SELECT b.id, b.name, b.description, b.color, b.owner_user_id, b.created_at, b.updated_at
             FROM boards b
             INNER JOIN board_members m ON m.board_id = b.id
             WHERE m.user_id = ?
             ORDER BY b.id ASC",
        )
        .bind(user_id.0)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(board_from_row).collect()
    }

    async fn add_member(
        &self,
        board_id: BoardId,
        user_id: UserId,
        role: Role,
    ) -> RepoResult<BoardMember> {
        let mut tx = self.pool.begin().await?;
        let board_exists: Option<i64> = sqlx::query_scalar("SELECT id FROM boards WHERE id = ?")
            .bind(board_id.0)
            .fetch_optional(&mut *tx)
            .await?;
        if board_exists.is_none() {
            return Err(RepoError::not_found("board", board_id.0));
        }
        let user_row = sqlx::query("SELECT id, username FROM users WHERE id = ?")
            .bind(user_id.0)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| RepoError::not_found("user", user_id.0))?;
        let user = user_from_row(&user_row)?;
        sqlx::query(
            "INSERT INTO board_members (board_id, user_id, role) VALUES (?, ?, ?)
             ON CONFLICT(board_id, user_id) DO UPDATE SET role=excluded.role",
        )
        .bind(board_id.0)
        .bind(user_id.0)
        .bind(role.as_str())
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(BoardMember {
            board_id,
            user,
            role,
        })
    }

    async fn member_role(&self, board_id: BoardId, user_id: UserId) -> RepoResult<Option<Role>> {
        let role: Option<String> =
            sqlx::query_scalar("SELECT role FROM board_members WHERE board_id = ? AND user_id = ?")
                .bind(board_id.0)
                .bind(user_id.0)
                .fetch_optional(&self.pool)
                .await?;
        role.map(|raw| Role::from_str(&raw).map_err(RepoError::Unavailable))
            .transpose()
    }

    async fn create_list(&self, list: NewList) -> RepoResult<List> {
        let row = sqlx::query(
            "INSERT INTO lists (board_id, title, position, updated_at) VALUES (?, ?, ?, ?)
             RETURNING id, board_id, title, position, updated_at",
        )
        .bind(list.board_id.0)
        .bind(&list.title)
        .bind(list.position)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?;
        list_from_row(&row)
    }

    async fn update_list(&self, list_id: ListId, patch: ListPatch) -> RepoResult<List> {
        let row = sqlx::query(
            "UPDATE lists SET
                title = COALESCE(?, title),
                position = COALESCE(?, position),
                updated_at = ?
             WHERE id = ?
             RETURNING id, board_id, title, position, updated_at",
        )
        .bind(&patch.title)
        .bind(patch.position)
        .bind(Utc::now())
        .bind(list_id.0)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| RepoError::not_found("list", list_id.0))?;
        list_from_row(&row)
    }

    async fn delete_list(&self, list_id: ListId) -> RepoResult<List> {
        // emptiness check and delete in one statement: a concurrent task
        // insert either lands first (conflict) or fails its foreign key
        let deleted = sqlx::query(
            "DELETE FROM lists
             WHERE id = ? AND NOT EXISTS (SELECT 1 FROM tasks WHERE list_id = ?)
             RETURNING id, board_id, title, position, updated_at",
        )
        .bind(list_id.0)
        .bind(list_id.0)
        .fetch_optional(&self.pool)
        .await?;
        if let Some(row) = deleted {
            return list_from_row(&row);
        }

        let exists: Option<i64> = sqlx::query_scalar("SELECT id FROM lists WHERE id = ?")
            .bind(list_id.0)
            .fetch_optional(&self.pool)
            .await?;
        match exists {
            Some(_) => Err(RepoError::Conflict(format!(
                "list {} still contains tasks",
                list_id.0
            ))),
            None => Err(RepoError::not_found("list", list_id.0)),
        }
    }

    async fn list_lists(&self, board_id: BoardId) -> RepoResult<Vec<List>> {
        let rows = sqlx::query(&format!(
            "{LIST_SELECT} WHERE board_id = ? ORDER BY position ASC, id ASC"
        ))
        .bind(board_id.0)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(list_from_row).collect()
    }

    async fn renumber_lists(
        &self,
        board_id: BoardId,
        positions: &[(ListId, f64)],
    ) -> RepoResult<Vec<List>> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;
        let mut renumbered = Vec::with_capacity(positions.len());
        for (list_id, position) in positions {
            let row = sqlx::query(
                "UPDATE lists SET position = ?, updated_at = ?
                 WHERE id = ? AND board_id = ?
                 RETURNING id, board_id, title, position, updated_at",
            )
            .bind(position)
            .bind(now)
            .bind(list_id.0)
            .bind(board_id.0)
            .fetch_optional(&mut *tx)
            .await?;
            if let Some(row) = row {
                renumbered.push(list_from_row(&row)?);
            }
        }
        tx.commit().await?;
        Ok(renumbered)
    }

    async fn board_for_list(&self, list_id: ListId) -> RepoResult<BoardId> {
        let board: Option<i64> = sqlx::query_scalar("SELECT board_id FROM lists WHERE id = ?")
            .bind(list_id.0)
            .fetch_optional(&self.pool)
            .await?;
        board
            .map(BoardId)
            .ok_or_else(|| RepoError::not_found("list", list_id.0))
    }

    async fn create_task(&self, task: NewTask) -> RepoResult<Task> {
        let now = Utc::now();
        let row = sqlx::query(&format!(
            "INSERT INTO tasks
                (list_id, title, description, position, priority, assignee_user_id, due_date, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
             {TASK_RETURNING}"
        ))
        .bind(task.list_id.0)
        .bind(&task.title)
        .bind(&task.description)
        .bind(task.position)
        .bind(task.priority.as_str())
        .bind(task.assignee_id.map(|id| id.0))
        .bind(task.due_date)
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;
        task_from_row(&row)
    }

    async fn update_task(&self, task_id: TaskId, patch: TaskPatch) -> RepoResult<Task> {
        let row = sqlx::query(&format!(
            "UPDATE tasks SET
                title = COALESCE(?, title),
                description = CASE WHEN ? THEN ? ELSE description END,
                priority = COALESCE(?, priority),
                position = COALESCE(?, position),
                assignee_user_id = CASE WHEN ? THEN ? ELSE assignee_user_id END,
                due_date = CASE WHEN ? THEN ? ELSE due_date END,
                updated_at = ?
             WHERE id = ?
             {TASK_RETURNING}"
        ))
        .bind(&patch.title)
        .bind(patch.description.is_some())
        .bind(patch.description.clone().flatten())
        .bind(patch.priority.map(Priority::as_str))
        .bind(patch.position)
        .bind(patch.assignee_id.is_some())
        .bind(patch.assignee_id.flatten().map(|id| id.0))
        .bind(patch.due_date.is_some())
        .bind(patch.due_date.flatten())
        .bind(Utc::now())
        .bind(task_id.0)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| RepoError::not_found("task", task_id.0))?;
        task_from_row(&row)
    }

    async fn move_task(
        &self,
        task_id: TaskId,
        to_list_id: ListId,
        position: f64,
    ) -> RepoResult<Task> {
        let moved = sqlx::query(&format!(
            "UPDATE tasks SET list_id = ?, position = ?, updated_at = ?
             WHERE id = ? AND EXISTS (SELECT 1 FROM lists WHERE id = ?)
             {TASK_RETURNING}"
        ))
        .bind(to_list_id.0)
        .bind(position)
        .bind(Utc::now())
        .bind(task_id.0)
        .bind(to_list_id.0)
        .fetch_optional(&self.pool)
        .await?;
        if let Some(row) = moved {
            return task_from_row(&row);
        }

        let task_exists: Option<i64> = sqlx::query_scalar("SELECT id FROM tasks WHERE id = ?")
            .bind(task_id.0)
            .fetch_optional(&self.pool)
            .await?;
        Err(match task_exists {
            Some(_) => RepoError::not_found("list", to_list_id.0),
            None => RepoError::not_found("task", task_id.0),
        })
    }

    async fn delete_task(&self, task_id: TaskId) -> RepoResult<Task> {
        let row = sqlx::query(&format!("DELETE FROM tasks WHERE id = ? {TASK_RETURNING}"))
            .bind(task_id.0)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| RepoError::not_found("task", task_id.0))?;
        task_from_row(&row)
    }

    async fn get_task(&self, task_id: TaskId) -> RepoResult<Task> {
        let row = sqlx::query(&format!("{TASK_SELECT} WHERE t.id = ?"))
            .bind(task_id.0)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| RepoError::not_found("task", task_id.0))?;
        task_from_row(&row)
    }

    async fn list_tasks(&self, list_id: ListId) -> RepoResult<Vec<Task>> {
        let rows = sqlx::query(&format!(
            "{TASK_SELECT} WHERE t.list_id = ? ORDER BY t.position ASC, t.id ASC"
        ))
        .bind(list_id.0)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(task_from_row).collect()
    }

    async fn renumber_tasks(
        &self,
        list_id: ListId,
        positions: &[(TaskId, f64)],
    ) -> RepoResult<Vec<Task>> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;
        let mut renumbered = Vec::with_capacity(positions.len());
        for (task_id, position) in positions {
            let row = sqlx::query(&format!(
                "UPDATE tasks SET position = ?, updated_at = ?
                 WHERE id = ? AND list_id = ?
                 {TASK_RETURNING}"
            ))
            .bind(position)
            .bind(now)
            .bind(task_id.0)
            .bind(list_id.0)
            .fetch_optional(&mut *tx)
            .await?;
            if let Some(row) = row {
                renumbered.push(task_from_row(&row)?);
            }
        }
        tx.commit().await?;
        Ok(renumbered)
    }

    async fn board_for_task(&self, task_id: TaskId) -> RepoResult<BoardId> {
        let board: Option<i64> = sqlx::query_scalar(
            "SELECT l.board_id FROM tasks t INNER JOIN lists l ON l.id = t.list_id WHERE t.id = ?",
        )
        .bind(task_id.0)
        .fetch_optional(&self.pool)
        .await?;
        board
            .map(BoardId)
            .ok_or_else(|| RepoError::not_found("task", task_id.0))
    }
}

fn user_from_row(row: &SqliteRow) -> RepoResult<UserSummary> {
    Ok(UserSummary {
        id: UserId(row.try_get("id")?),
        username: row.try_get("username")?,
    })
}

fn board_from_row(row: &SqliteRow) -> RepoResult<Board> {
    Ok(Board {
        id: BoardId(row.try_get("id")?),
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        color: row.try_get("color")?,
        owner_id: UserId(row.try_get("owner_user_id")?),
        created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
        updated_at: row.try_get::<DateTime<Utc>, _>("updated_at")?,
    })
}

fn list_from_row(row: &SqliteRow) -> RepoResult<List> {
    Ok(List {
        id: ListId(row.try_get("id")?),
        board_id: BoardId(row.try_get("board_id")?),
        title: row.try_get("title")?,
        position: row.try_get("position")?,
        updated_at: row.try_get::<DateTime<Utc>, _>("updated_at")?,
    })
}

fn task_from_row(row: &SqliteRow) -> RepoResult<Task> {
    let priority: String = row.try_get("priority")?;
    let assignee_id: Option<i64> = row.try_get("assignee_user_id")?;
    let assignee_username: Option<String> = row.try_get("assignee_username")?;
    Ok(Task {
        id: TaskId(row.try_get("id")?),
        list_id: ListId(row.try_get("list_id")?),
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        position: row.try_get("position")?,
        priority: Priority::from_str(&priority).map_err(RepoError::Unavailable)?,
        assignee: assignee_id
            .zip(assignee_username)
            .map(|(id, username)| UserSummary {
                id: UserId(id),
                username,
            }),
        due_date: row.try_get::<Option<DateTime<Utc>>, _>("due_date")?,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
        updated_at: row.try_get::<DateTime<Utc>, _>("updated_at")?,
    })
}

fn member_from_row(row: &SqliteRow) -> RepoResult<BoardMember> {
    let role: String = row.try_get("role")?;
    Ok(BoardMember {
        board_id: BoardId(row.try_get("board_id")?),
        user: UserSummary {
            id: UserId(row.try_get("user_id")?),
            username: row.try_get("username")?,
        },
        role: Role::from_str(&role).map_err(RepoError::Unavailable)?,
    })
}

fn ensure_sqlite_parent_dir_exists(database_url: &str) -> Result<()> {
    let Some(path) = sqlite_path(database_url) else {
        return Ok(());
    };

    let Some(parent) = path.parent() else {
        return Ok(());
    };

    if parent.as_os_str().is_empty() {
        return Ok(());
    }

    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create parent directory '{}' for database url '{database_url}'",
            parent.display()
        )
    })?;
    Ok(())
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if database_url.starts_with("sqlite::memory:") || !database_url.starts_with("sqlite:") {
        return None;
    }

    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();

    if path.is_empty() {
        return None;
    }

    Some(Path::new(path).to_path_buf())
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
