use chrono::Utc;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use tempo_core::ids::{TagId, TaskId};
use tempo_core::kinds::EntityKind;

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TagRow {
    pub id: TagId,
    pub name: String,
    pub color: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Clone, Debug, Default)]
pub struct TagPatch {
    pub name: Option<String>,
    pub color: Option<Option<String>>,
}

pub struct TagRepo {
    db: Database,
}

impl TagRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Create a tag. Name uniqueness is case-sensitive; a duplicate returns
    /// Conflict carrying the offending name.
    #[instrument(skip(self), fields(name))]
    pub fn create(&self, name: &str, color: Option<&str>) -> Result<TagRow, StoreError> {
        self.db.with_conn(|conn| {
            if name_taken(conn, name, None)? {
                return Err(StoreError::Conflict(name.to_string()));
            }
            let now = Utc::now().to_rfc3339();
            conn.execute(
                "INSERT INTO tags (name, color, created_at, updated_at) VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![name, color, now, now],
            )?;
            get_in(conn, TagId::from_raw(conn.last_insert_rowid()))
        })
    }

    #[instrument(skip(self), fields(tag_id = %id))]
    pub fn get(&self, id: TagId) -> Result<TagRow, StoreError> {
        self.db.with_conn(|conn| get_in(conn, id))
    }

    #[instrument(skip(self))]
    pub fn list(&self) -> Result<Vec<TagRow>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, name, color, created_at, updated_at FROM tags ORDER BY name ASC",
            )?;
            let mut rows = stmt.query([])?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                out.push(row_to_tag(row)?);
            }
            Ok(out)
        })
    }

    /// Rename and/or recolor. The duplicate check excludes the tag's own row.
    #[instrument(skip(self, patch), fields(tag_id = %id))]
    pub fn update(&self, id: TagId, patch: &TagPatch) -> Result<TagRow, StoreError> {
        self.db.with_conn(|conn| {
            let current = get_in(conn, id)?;
            if let Some(name) = &patch.name {
                if name_taken(conn, name, Some(id))? {
                    return Err(StoreError::Conflict(name.clone()));
                }
            }
            let name = patch.name.as_deref().unwrap_or(&current.name);
            let color = match &patch.color {
                Some(c) => c.as_deref(),
                None => current.color.as_deref(),
            };
            let now = Utc::now().to_rfc3339();
            conn.execute(
                "UPDATE tags SET name = ?1, color = ?2, updated_at = ?3 WHERE id = ?4",
                rusqlite::params![name, color, now, id.as_i64()],
            )?;
            get_in(conn, id)
        })
    }

    /// Delete a tag and its linkage rows; linked tasks are untouched.
    /// Returns the ids of tasks that were linked.
    #[instrument(skip(self), fields(tag_id = %id))]
    pub fn delete(&self, id: TagId) -> Result<Vec<TaskId>, StoreError> {
        self.db.with_tx(|tx| {
            get_in(tx, id)?;
            let mut stmt =
                tx.prepare("SELECT task_id FROM task_tags WHERE tag_id = ?1 ORDER BY task_id ASC")?;
            let linked = stmt
                .query_map([id.as_i64()], |row| row.get::<_, i64>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            tx.execute("DELETE FROM task_tags WHERE tag_id = ?1", [id.as_i64()])?;
            tx.execute("DELETE FROM tags WHERE id = ?1", [id.as_i64()])?;
            Ok(linked.into_iter().map(TaskId::from_raw).collect())
        })
    }

    pub fn task_ids_of(&self, id: TagId) -> Result<Vec<TaskId>, StoreError> {
        self.db.with_conn(|conn| {
            get_in(conn, id)?;
            let mut stmt =
                conn.prepare("SELECT task_id FROM task_tags WHERE tag_id = ?1 ORDER BY task_id ASC")?;
            let ids = stmt
                .query_map([id.as_i64()], |row| row.get::<_, i64>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(ids.into_iter().map(TaskId::from_raw).collect())
        })
    }
}

fn name_taken(conn: &Connection, name: &str, exclude: Option<TagId>) -> Result<bool, StoreError> {
    let existing: Option<i64> = conn
        .query_row("SELECT id FROM tags WHERE name = ?1", [name], |row| {
            row.get(0)
        })
        .ok();
    Ok(match (existing, exclude) {
        (Some(found), Some(own)) => found != own.as_i64(),
        (Some(_), None) => true,
        (None, _) => false,
    })
}

fn get_in(conn: &Connection, id: TagId) -> Result<TagRow, StoreError> {
    let mut stmt =
        conn.prepare("SELECT id, name, color, created_at, updated_at FROM tags WHERE id = ?1")?;
    let mut rows = stmt.query([id.as_i64()])?;
    match rows.next()? {
        Some(row) => row_to_tag(row),
        None => Err(StoreError::not_found(EntityKind::Tag, id)),
    }
}

fn row_to_tag(row: &rusqlite::Row<'_>) -> Result<TagRow, StoreError> {
    Ok(TagRow {
        id: TagId::from_raw(row_helpers::get(row, 0, "tags", "id")?),
        name: row_helpers::get(row, 1, "tags", "name")?,
        color: row_helpers::get_opt(row, 2, "tags", "color")?,
        created_at: row_helpers::get(row, 3, "tags", "created_at")?,
        updated_at: row_helpers::get(row, 4, "tags", "updated_at")?,
    })
}
