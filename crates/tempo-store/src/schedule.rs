use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use tempo_core::ids::{EntryId, TaskId};
use tempo_core::kinds::EntityKind;

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

/// A planned calendar item. Peer of the timing entities: same store, same
/// notification mechanism, no coupling to the session state machine.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EntryRow {
    pub id: EntryId,
    pub task_id: TaskId,
    pub starts_at: String,
    pub ends_at: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Clone, Debug, Default)]
pub struct EntryPatch {
    pub starts_at: Option<DateTime<Utc>>,
    pub ends_at: Option<DateTime<Utc>>,
}

pub struct ScheduleRepo {
    db: Database,
}

impl ScheduleRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    #[instrument(skip(self), fields(task_id = %task_id))]
    pub fn create(
        &self,
        task_id: TaskId,
        starts_at: DateTime<Utc>,
        ends_at: DateTime<Utc>,
    ) -> Result<EntryRow, StoreError> {
        self.db.with_conn(|conn| {
            let now = Utc::now().to_rfc3339();
            conn.execute(
                "INSERT INTO schedule_entries (task_id, starts_at, ends_at, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![
                    task_id.as_i64(),
                    starts_at.to_rfc3339(),
                    ends_at.to_rfc3339(),
                    now,
                    now,
                ],
            )?;
            get_in(conn, EntryId::from_raw(conn.last_insert_rowid()))
        })
    }

    #[instrument(skip(self), fields(entry_id = %id))]
    pub fn get(&self, id: EntryId) -> Result<EntryRow, StoreError> {
        self.db.with_conn(|conn| get_in(conn, id))
    }

    #[instrument(skip(self, patch), fields(entry_id = %id))]
    pub fn update(&self, id: EntryId, patch: &EntryPatch) -> Result<EntryRow, StoreError> {
        self.db.with_conn(|conn| {
            let current = get_in(conn, id)?;
            let starts = patch
                .starts_at
                .map(|t| t.to_rfc3339())
                .unwrap_or(current.starts_at);
            let ends = patch
                .ends_at
                .map(|t| t.to_rfc3339())
                .unwrap_or(current.ends_at);
            let now = Utc::now().to_rfc3339();
            conn.execute(
                "UPDATE schedule_entries SET starts_at = ?1, ends_at = ?2, updated_at = ?3 WHERE id = ?4",
                rusqlite::params![starts, ends, now, id.as_i64()],
            )?;
            get_in(conn, id)
        })
    }

    #[instrument(skip(self), fields(entry_id = %id))]
    pub fn delete(&self, id: EntryId) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            let changed =
                conn.execute("DELETE FROM schedule_entries WHERE id = ?1", [id.as_i64()])?;
            if changed == 0 {
                return Err(StoreError::not_found(EntityKind::ScheduleEntry, id));
            }
            Ok(())
        })
    }

    /// Entries overlapping [from, to], earliest first.
    #[instrument(skip(self))]
    pub fn list_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<EntryRow>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, task_id, starts_at, ends_at, created_at, updated_at
                 FROM schedule_entries
                 WHERE starts_at <= ?1 AND ends_at >= ?2
                 ORDER BY starts_at ASC",
            )?;
            let mut rows = stmt.query(rusqlite::params![to.to_rfc3339(), from.to_rfc3339()])?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                out.push(row_to_entry(row)?);
            }
            Ok(out)
        })
    }

    #[instrument(skip(self), fields(task_id = %task_id))]
    pub fn list_by_task(&self, task_id: TaskId) -> Result<Vec<EntryRow>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, task_id, starts_at, ends_at, created_at, updated_at
                 FROM schedule_entries WHERE task_id = ?1 ORDER BY starts_at ASC",
            )?;
            let mut rows = stmt.query([task_id.as_i64()])?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                out.push(row_to_entry(row)?);
            }
            Ok(out)
        })
    }
}

fn get_in(conn: &Connection, id: EntryId) -> Result<EntryRow, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT id, task_id, starts_at, ends_at, created_at, updated_at
         FROM schedule_entries WHERE id = ?1",
    )?;
    let mut rows = stmt.query([id.as_i64()])?;
    match rows.next()? {
        Some(row) => row_to_entry(row),
        None => Err(StoreError::not_found(EntityKind::ScheduleEntry, id)),
    }
}

fn row_to_entry(row: &rusqlite::Row<'_>) -> Result<EntryRow, StoreError> {
    Ok(EntryRow {
        id: EntryId::from_raw(row_helpers::get(row, 0, "schedule_entries", "id")?),
        task_id: TaskId::from_raw(row_helpers::get(row, 1, "schedule_entries", "task_id")?),
        starts_at: row_helpers::get(row, 2, "schedule_entries", "starts_at")?,
        ends_at: row_helpers::get(row, 3, "schedule_entries", "ends_at")?,
        created_at: row_helpers::get(row, 4, "schedule_entries", "created_at")?,
        updated_at: row_helpers::get(row, 5, "schedule_entries", "updated_at")?,
    })
}
