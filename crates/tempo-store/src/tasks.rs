use chrono::Utc;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use tempo_core::ids::{EntryId, LogId, RecordId, SessionId, TagId, TaskId};
use tempo_core::kinds::EntityKind;

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Active,
    Archived,
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Archived => write!(f, "archived"),
        }
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "archived" => Ok(Self::Archived),
            other => Err(format!("unknown task status: {other}")),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TaskRow {
    pub id: TaskId,
    pub title: String,
    pub description: String,
    pub estimated_minutes: Option<i64>,
    pub status: TaskStatus,
    pub parent_id: Option<TaskId>,
    pub child_ids: Vec<TaskId>,
    pub tag_ids: Vec<TagId>,
    pub created_at: String,
    pub updated_at: String,
}

/// Creation spec. Status defaults to active when unset.
#[derive(Clone, Debug, Default)]
pub struct NewTask {
    pub title: String,
    pub description: String,
    pub estimated_minutes: Option<i64>,
    pub status: Option<TaskStatus>,
    pub parent_id: Option<TaskId>,
}

/// Partial update: only present fields overwrite the row. The doubly-nested
/// options distinguish "leave alone" (None) from "set to NULL" (Some(None)).
#[derive(Clone, Debug, Default)]
pub struct TaskPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub estimated_minutes: Option<Option<i64>>,
    pub status: Option<TaskStatus>,
    pub parent: Option<Option<TaskId>>,
}

impl TaskPatch {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.estimated_minutes.is_none()
            && self.status.is_none()
            && self.parent.is_none()
    }
}

/// Every id removed by a subtree cascade, root task first.
#[derive(Clone, Debug, Default, Serialize)]
pub struct SubtreeDelete {
    pub task_ids: Vec<TaskId>,
    pub session_ids: Vec<SessionId>,
    pub log_ids: Vec<LogId>,
    pub record_ids: Vec<RecordId>,
    pub entry_ids: Vec<EntryId>,
}

pub struct TaskRepo {
    db: Database,
}

impl TaskRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    #[instrument(skip(self, spec), fields(title = %spec.title))]
    pub fn create(&self, spec: &NewTask) -> Result<TaskRow, StoreError> {
        self.db.with_conn(|conn| {
            let now = Utc::now().to_rfc3339();
            let status = spec.status.unwrap_or(TaskStatus::Active);
            conn.execute(
                "INSERT INTO tasks (title, description, estimated_minutes, status, parent_id, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                rusqlite::params![
                    spec.title,
                    spec.description,
                    spec.estimated_minutes,
                    status.to_string(),
                    spec.parent_id.map(TaskId::as_i64),
                    now,
                    now,
                ],
            )?;
            let id = TaskId::from_raw(conn.last_insert_rowid());
            get_in(conn, id)
        })
    }

    /// Get a task by id, including its ordered children and tag links.
    #[instrument(skip(self), fields(task_id = %id))]
    pub fn get(&self, id: TaskId) -> Result<TaskRow, StoreError> {
        self.db.with_conn(|conn| get_in(conn, id))
    }

    /// Parent of a task; Ok(None) for a root, NotFound if the task is absent.
    pub fn parent_of(&self, id: TaskId) -> Result<Option<TaskId>, StoreError> {
        self.db.with_conn(|conn| parent_in(conn, id))
    }

    pub fn children_of(&self, id: TaskId) -> Result<Vec<TaskId>, StoreError> {
        self.db.with_conn(|conn| children_in(conn, id))
    }

    /// All tasks without a parent, oldest first.
    #[instrument(skip(self))]
    pub fn list_roots(&self) -> Result<Vec<TaskRow>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT id FROM tasks WHERE parent_id IS NULL ORDER BY id ASC")?;
            let ids = stmt
                .query_map([], |row| row.get::<_, i64>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            ids.into_iter()
                .map(|id| get_in(conn, TaskId::from_raw(id)))
                .collect()
        })
    }

    /// Apply a partial update. Cycle validation is the caller's job; this
    /// writes whatever parent it is given.
    #[instrument(skip(self, patch), fields(task_id = %id))]
    pub fn update(&self, id: TaskId, patch: &TaskPatch) -> Result<TaskRow, StoreError> {
        self.db.with_conn(|conn| {
            // Existence check up front so an empty patch still reports NotFound.
            get_in(conn, id)?;

            let mut sets: Vec<String> = Vec::new();
            let mut params: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

            if let Some(title) = &patch.title {
                sets.push(format!("title = ?{}", params.len() + 1));
                params.push(Box::new(title.clone()));
            }
            if let Some(description) = &patch.description {
                sets.push(format!("description = ?{}", params.len() + 1));
                params.push(Box::new(description.clone()));
            }
            if let Some(estimate) = &patch.estimated_minutes {
                sets.push(format!("estimated_minutes = ?{}", params.len() + 1));
                params.push(Box::new(*estimate));
            }
            if let Some(status) = &patch.status {
                sets.push(format!("status = ?{}", params.len() + 1));
                params.push(Box::new(status.to_string()));
            }
            if let Some(parent) = &patch.parent {
                sets.push(format!("parent_id = ?{}", params.len() + 1));
                params.push(Box::new(parent.map(TaskId::as_i64)));
            }

            sets.push(format!("updated_at = ?{}", params.len() + 1));
            params.push(Box::new(Utc::now().to_rfc3339()));

            let sql = format!(
                "UPDATE tasks SET {} WHERE id = ?{}",
                sets.join(", "),
                params.len() + 1
            );
            params.push(Box::new(id.as_i64()));

            let param_refs: Vec<&dyn rusqlite::types::ToSql> =
                params.iter().map(|p| p.as_ref()).collect();
            conn.execute(&sql, param_refs.as_slice())?;

            get_in(conn, id)
        })
    }

    /// Attach a tag to a task. Idempotent.
    #[instrument(skip(self), fields(task_id = %task_id, tag_id = %tag_id))]
    pub fn link_tag(&self, task_id: TaskId, tag_id: TagId) -> Result<TaskRow, StoreError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO task_tags (task_id, tag_id) VALUES (?1, ?2)",
                [task_id.as_i64(), tag_id.as_i64()],
            )?;
            touch_in(conn, task_id)?;
            get_in(conn, task_id)
        })
    }

    /// Detach a tag from a task. Idempotent.
    #[instrument(skip(self), fields(task_id = %task_id, tag_id = %tag_id))]
    pub fn unlink_tag(&self, task_id: TaskId, tag_id: TagId) -> Result<TaskRow, StoreError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "DELETE FROM task_tags WHERE task_id = ?1 AND tag_id = ?2",
                [task_id.as_i64(), tag_id.as_i64()],
            )?;
            touch_in(conn, task_id)?;
            get_in(conn, task_id)
        })
    }

    /// Read-only breadth-first walk of a subtree, root first.
    pub fn collect_subtree(&self, root: TaskId) -> Result<Vec<TaskId>, StoreError> {
        self.db.with_conn(|conn| {
            parent_in(conn, root)?;
            collect_subtree_in(conn, root)
        })
    }

    /// Atomically delete a task, its descendants, and everything hanging off
    /// the subtree: sessions, logs, records, schedule entries, tag links.
    /// The subtree is collected first without mutating anything, then removed
    /// in one transaction so partial failure cannot leave orphans.
    #[instrument(skip(self), fields(task_id = %root))]
    pub fn delete_subtree(&self, root: TaskId) -> Result<SubtreeDelete, StoreError> {
        self.db.with_tx(|tx| {
            parent_in(tx, root)?;
            let task_ids = collect_subtree_in(tx, root)?;

            let mut out = SubtreeDelete {
                task_ids,
                ..Default::default()
            };

            for &task in &out.task_ids {
                let mut stmt =
                    tx.prepare("SELECT id FROM sessions WHERE task_id = ?1 ORDER BY id ASC")?;
                let sessions = stmt
                    .query_map([task.as_i64()], |row| row.get::<_, i64>(0))?
                    .collect::<Result<Vec<_>, _>>()?;
                out.session_ids
                    .extend(sessions.into_iter().map(SessionId::from_raw));

                let mut stmt =
                    tx.prepare("SELECT id FROM session_records WHERE task_id = ?1 ORDER BY id ASC")?;
                let records = stmt
                    .query_map([task.as_i64()], |row| row.get::<_, i64>(0))?
                    .collect::<Result<Vec<_>, _>>()?;
                out.record_ids
                    .extend(records.into_iter().map(RecordId::from_raw));

                let mut stmt = tx
                    .prepare("SELECT id FROM schedule_entries WHERE task_id = ?1 ORDER BY id ASC")?;
                let entries = stmt
                    .query_map([task.as_i64()], |row| row.get::<_, i64>(0))?
                    .collect::<Result<Vec<_>, _>>()?;
                out.entry_ids
                    .extend(entries.into_iter().map(EntryId::from_raw));
            }

            for &session in &out.session_ids {
                let mut stmt =
                    tx.prepare("SELECT id FROM session_logs WHERE session_id = ?1 ORDER BY id ASC")?;
                let logs = stmt
                    .query_map([session.as_i64()], |row| row.get::<_, i64>(0))?
                    .collect::<Result<Vec<_>, _>>()?;
                out.log_ids.extend(logs.into_iter().map(LogId::from_raw));
            }

            for &session in &out.session_ids {
                tx.execute(
                    "DELETE FROM session_logs WHERE session_id = ?1",
                    [session.as_i64()],
                )?;
                tx.execute("DELETE FROM sessions WHERE id = ?1", [session.as_i64()])?;
            }
            for &task in &out.task_ids {
                tx.execute(
                    "DELETE FROM session_records WHERE task_id = ?1",
                    [task.as_i64()],
                )?;
                tx.execute(
                    "DELETE FROM schedule_entries WHERE task_id = ?1",
                    [task.as_i64()],
                )?;
                tx.execute("DELETE FROM task_tags WHERE task_id = ?1", [task.as_i64()])?;
            }
            // Children before parents, so parent_id references never dangle.
            for &task in out.task_ids.iter().rev() {
                tx.execute("DELETE FROM tasks WHERE id = ?1", [task.as_i64()])?;
            }

            Ok(out)
        })
    }
}

fn get_in(conn: &Connection, id: TaskId) -> Result<TaskRow, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT id, title, description, estimated_minutes, status, parent_id, created_at, updated_at
         FROM tasks WHERE id = ?1",
    )?;
    let mut rows = stmt.query([id.as_i64()])?;
    let row = match rows.next()? {
        Some(row) => row,
        None => return Err(StoreError::not_found(EntityKind::Task, id)),
    };

    let status_str: String = row_helpers::get(row, 4, "tasks", "status")?;
    let mut task = TaskRow {
        id: TaskId::from_raw(row_helpers::get(row, 0, "tasks", "id")?),
        title: row_helpers::get(row, 1, "tasks", "title")?,
        description: row_helpers::get(row, 2, "tasks", "description")?,
        estimated_minutes: row_helpers::get_opt(row, 3, "tasks", "estimated_minutes")?,
        status: row_helpers::parse_enum(&status_str, "tasks", "status")?,
        parent_id: row_helpers::get_opt::<i64>(row, 5, "tasks", "parent_id")?
            .map(TaskId::from_raw),
        child_ids: Vec::new(),
        tag_ids: Vec::new(),
        created_at: row_helpers::get(row, 6, "tasks", "created_at")?,
        updated_at: row_helpers::get(row, 7, "tasks", "updated_at")?,
    };

    task.child_ids = children_in(conn, id)?;

    let mut stmt =
        conn.prepare("SELECT tag_id FROM task_tags WHERE task_id = ?1 ORDER BY tag_id ASC")?;
    let tags = stmt
        .query_map([id.as_i64()], |row| row.get::<_, i64>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    task.tag_ids = tags.into_iter().map(TagId::from_raw).collect();

    Ok(task)
}

fn parent_in(conn: &Connection, id: TaskId) -> Result<Option<TaskId>, StoreError> {
    conn.query_row(
        "SELECT parent_id FROM tasks WHERE id = ?1",
        [id.as_i64()],
        |row| row.get::<_, Option<i64>>(0),
    )
    .map(|p| p.map(TaskId::from_raw))
    .map_err(|_| StoreError::not_found(EntityKind::Task, id))
}

fn children_in(conn: &Connection, id: TaskId) -> Result<Vec<TaskId>, StoreError> {
    let mut stmt = conn.prepare("SELECT id FROM tasks WHERE parent_id = ?1 ORDER BY id ASC")?;
    let ids = stmt
        .query_map([id.as_i64()], |row| row.get::<_, i64>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ids.into_iter().map(TaskId::from_raw).collect())
}

fn collect_subtree_in(conn: &Connection, root: TaskId) -> Result<Vec<TaskId>, StoreError> {
    let mut ids = vec![root];
    let mut cursor = 0;
    while cursor < ids.len() {
        let next = children_in(conn, ids[cursor])?;
        ids.extend(next);
        cursor += 1;
    }
    Ok(ids)
}

fn touch_in(conn: &Connection, id: TaskId) -> Result<(), StoreError> {
    let now = Utc::now().to_rfc3339();
    let changed = conn.execute(
        "UPDATE tasks SET updated_at = ?1 WHERE id = ?2",
        rusqlite::params![now, id.as_i64()],
    )?;
    if changed == 0 {
        return Err(StoreError::not_found(EntityKind::Task, id));
    }
    Ok(())
}
