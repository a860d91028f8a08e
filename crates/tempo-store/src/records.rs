use chrono::Utc;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use tempo_core::ids::{RecordId, TaskId};
use tempo_core::kinds::EntityKind;

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

/// Immutable artifact left behind by an ended session. Only the note may be
/// rewritten after creation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RecordRow {
    pub id: RecordId,
    pub task_id: TaskId,
    pub title: String,
    pub note: Option<String>,
    pub total_seconds: i64,
    pub created_at: String,
}

pub struct RecordRepo {
    db: Database,
}

impl RecordRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    #[instrument(skip(self), fields(record_id = %id))]
    pub fn get(&self, id: RecordId) -> Result<RecordRow, StoreError> {
        self.db.with_conn(|conn| get_in(conn, id))
    }

    #[instrument(skip(self), fields(task_id = %task_id))]
    pub fn list_by_task(&self, task_id: TaskId) -> Result<Vec<RecordRow>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, task_id, title, note, total_seconds, created_at
                 FROM session_records WHERE task_id = ?1 ORDER BY id ASC",
            )?;
            let mut rows = stmt.query([task_id.as_i64()])?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                out.push(row_to_record(row)?);
            }
            Ok(out)
        })
    }

    /// The one permitted mutation of a record.
    #[instrument(skip(self, note), fields(record_id = %id))]
    pub fn update_note(&self, id: RecordId, note: Option<&str>) -> Result<RecordRow, StoreError> {
        self.db.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE session_records SET note = ?1 WHERE id = ?2",
                rusqlite::params![note, id.as_i64()],
            )?;
            if changed == 0 {
                return Err(StoreError::not_found(EntityKind::SessionRecord, id));
            }
            get_in(conn, id)
        })
    }

    /// Sum of recorded totals for a task's ended sessions.
    pub fn sum_for_task(&self, task_id: TaskId) -> Result<i64, StoreError> {
        self.db.with_conn(|conn| {
            conn.query_row(
                "SELECT COALESCE(SUM(total_seconds), 0) FROM session_records WHERE task_id = ?1",
                [task_id.as_i64()],
                |row| row.get(0),
            )
            .map_err(StoreError::from)
        })
    }
}

pub(crate) fn insert_in(
    conn: &Connection,
    task_id: TaskId,
    title: &str,
    note: Option<&str>,
    total_seconds: i64,
) -> Result<RecordRow, StoreError> {
    let now = Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO session_records (task_id, title, note, total_seconds, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        rusqlite::params![task_id.as_i64(), title, note, total_seconds, now],
    )?;
    get_in(conn, RecordId::from_raw(conn.last_insert_rowid()))
}

fn get_in(conn: &Connection, id: RecordId) -> Result<RecordRow, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT id, task_id, title, note, total_seconds, created_at
         FROM session_records WHERE id = ?1",
    )?;
    let mut rows = stmt.query([id.as_i64()])?;
    match rows.next()? {
        Some(row) => row_to_record(row),
        None => Err(StoreError::not_found(EntityKind::SessionRecord, id)),
    }
}

fn row_to_record(row: &rusqlite::Row<'_>) -> Result<RecordRow, StoreError> {
    Ok(RecordRow {
        id: RecordId::from_raw(row_helpers::get(row, 0, "session_records", "id")?),
        task_id: TaskId::from_raw(row_helpers::get(row, 1, "session_records", "task_id")?),
        title: row_helpers::get(row, 2, "session_records", "title")?,
        note: row_helpers::get_opt(row, 3, "session_records", "note")?,
        total_seconds: row_helpers::get(row, 4, "session_records", "total_seconds")?,
        created_at: row_helpers::get(row, 5, "session_records", "created_at")?,
    })
}
