use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use tempo_core::ids::{LogId, SessionId, TaskId};
use tempo_core::kinds::EntityKind;

use crate::database::Database;
use crate::error::StoreError;
use crate::records::{self, RecordRow};
use crate::row_helpers;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionRow {
    pub id: SessionId,
    pub task_id: TaskId,
    pub title: String,
    pub note: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// One start/stop interval. An open interval has ended_at and duration NULL;
/// both are set together when the log is stopped.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LogRow {
    pub id: LogId,
    pub session_id: SessionId,
    pub started_at: String,
    pub ended_at: Option<String>,
    pub duration_secs: Option<i64>,
    pub note: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

pub struct SessionRepo {
    db: Database,
}

impl SessionRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    #[instrument(skip(self, note), fields(task_id = %task_id, title))]
    pub fn create(
        &self,
        task_id: TaskId,
        title: &str,
        note: Option<&str>,
    ) -> Result<SessionRow, StoreError> {
        self.db.with_conn(|conn| {
            let now = Utc::now().to_rfc3339();
            conn.execute(
                "INSERT INTO sessions (task_id, title, note, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![task_id.as_i64(), title, note, now, now],
            )?;
            get_in(conn, SessionId::from_raw(conn.last_insert_rowid()))
        })
    }

    #[instrument(skip(self), fields(session_id = %id))]
    pub fn get(&self, id: SessionId) -> Result<SessionRow, StoreError> {
        self.db.with_conn(|conn| get_in(conn, id))
    }

    #[instrument(skip(self), fields(task_id = %task_id))]
    pub fn list_by_task(&self, task_id: TaskId) -> Result<Vec<SessionRow>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, task_id, title, note, created_at, updated_at
                 FROM sessions WHERE task_id = ?1 ORDER BY id ASC",
            )?;
            let mut rows = stmt.query([task_id.as_i64()])?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                out.push(row_to_session(row)?);
            }
            Ok(out)
        })
    }

    /// Insert a new open log (ended_at and duration NULL). The open-log
    /// uniqueness rule is enforced by the caller before this runs.
    #[instrument(skip(self), fields(session_id = %session_id))]
    pub fn insert_log(
        &self,
        session_id: SessionId,
        started_at: DateTime<Utc>,
    ) -> Result<LogRow, StoreError> {
        self.db.with_conn(|conn| {
            let now = Utc::now().to_rfc3339();
            conn.execute(
                "INSERT INTO session_logs (session_id, started_at, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![session_id.as_i64(), started_at.to_rfc3339(), now, now],
            )?;
            get_log_in(conn, LogId::from_raw(conn.last_insert_rowid()))
        })
    }

    #[instrument(skip(self), fields(log_id = %id))]
    pub fn get_log(&self, id: LogId) -> Result<LogRow, StoreError> {
        self.db.with_conn(|conn| get_log_in(conn, id))
    }

    /// The session's running log, if any. The schema admits several NULL-end
    /// rows; callers keep the at-most-one invariant, and this returns the
    /// oldest if it is ever violated.
    pub fn open_log(&self, session_id: SessionId) -> Result<Option<LogRow>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, session_id, started_at, ended_at, duration_secs, note, created_at, updated_at
                 FROM session_logs WHERE session_id = ?1 AND ended_at IS NULL ORDER BY id ASC LIMIT 1",
            )?;
            let mut rows = stmt.query([session_id.as_i64()])?;
            match rows.next()? {
                Some(row) => Ok(Some(row_to_log(row)?)),
                None => Ok(None),
            }
        })
    }

    #[instrument(skip(self), fields(session_id = %session_id))]
    pub fn list_logs(&self, session_id: SessionId) -> Result<Vec<LogRow>, StoreError> {
        self.db.with_conn(|conn| list_logs_in(conn, session_id))
    }

    /// Close a log: set end, duration, and optionally replace the note.
    /// Interval validation happens in the caller; this only persists.
    #[instrument(skip(self, note), fields(log_id = %id))]
    pub fn stop_log(
        &self,
        id: LogId,
        ended_at: DateTime<Utc>,
        duration_secs: i64,
        note: Option<&str>,
    ) -> Result<LogRow, StoreError> {
        self.db.with_conn(|conn| {
            let now = Utc::now().to_rfc3339();
            let changed = match note {
                Some(n) => conn.execute(
                    "UPDATE session_logs SET ended_at = ?1, duration_secs = ?2, note = ?3, updated_at = ?4
                     WHERE id = ?5",
                    rusqlite::params![ended_at.to_rfc3339(), duration_secs, n, now, id.as_i64()],
                )?,
                None => conn.execute(
                    "UPDATE session_logs SET ended_at = ?1, duration_secs = ?2, updated_at = ?3
                     WHERE id = ?4",
                    rusqlite::params![ended_at.to_rfc3339(), duration_secs, now, id.as_i64()],
                )?,
            };
            if changed == 0 {
                return Err(StoreError::not_found(EntityKind::SessionLog, id));
            }
            get_log_in(conn, id)
        })
    }

    #[instrument(skip(self), fields(log_id = %id))]
    pub fn delete_log(&self, id: LogId) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            let changed = conn.execute("DELETE FROM session_logs WHERE id = ?1", [id.as_i64()])?;
            if changed == 0 {
                return Err(StoreError::not_found(EntityKind::SessionLog, id));
            }
            Ok(())
        })
    }

    /// Delete a session and all its logs in one transaction.
    /// Returns the ids of the removed logs.
    #[instrument(skip(self), fields(session_id = %id))]
    pub fn delete_cascade(&self, id: SessionId) -> Result<Vec<LogId>, StoreError> {
        self.db.with_tx(|tx| {
            get_in(tx, id)?;
            let log_ids = log_ids_in(tx, id)?;
            tx.execute(
                "DELETE FROM session_logs WHERE session_id = ?1",
                [id.as_i64()],
            )?;
            tx.execute("DELETE FROM sessions WHERE id = ?1", [id.as_i64()])?;
            Ok(log_ids)
        })
    }

    /// End a session: atomically create its record and remove the session
    /// with every log. A still-running log is folded in with a duration
    /// measured against now (clamped to zero), so the partial interval
    /// survives in the record total instead of vanishing.
    #[instrument(skip(self, completion_note), fields(session_id = %id))]
    pub fn convert_to_record(
        &self,
        id: SessionId,
        completion_note: Option<&str>,
    ) -> Result<(RecordRow, Vec<LogId>), StoreError> {
        self.db.with_tx(|tx| {
            let session = get_in(tx, id)?;
            let logs = list_logs_in(tx, id)?;

            let now = Utc::now();
            let mut total: i64 = 0;
            for log in &logs {
                total += match log.duration_secs {
                    Some(d) => d,
                    None => {
                        let started =
                            row_helpers::parse_timestamp(&log.started_at, "session_logs", "started_at")?;
                        (now - started).num_seconds().max(0)
                    }
                };
            }

            let record =
                records::insert_in(tx, session.task_id, &session.title, completion_note, total)?;

            tx.execute(
                "DELETE FROM session_logs WHERE session_id = ?1",
                [id.as_i64()],
            )?;
            tx.execute("DELETE FROM sessions WHERE id = ?1", [id.as_i64()])?;

            Ok((record, logs.into_iter().map(|l| l.id).collect()))
        })
    }

    /// Sum of closed-log durations for one session; NULLs count as zero.
    pub fn sum_durations(&self, session_id: SessionId) -> Result<i64, StoreError> {
        self.db.with_conn(|conn| {
            conn.query_row(
                "SELECT COALESCE(SUM(duration_secs), 0) FROM session_logs WHERE session_id = ?1",
                [session_id.as_i64()],
                |row| row.get(0),
            )
            .map_err(StoreError::from)
        })
    }

    /// Sum of closed-log durations across all live sessions of a task.
    pub fn sum_durations_for_task(&self, task_id: TaskId) -> Result<i64, StoreError> {
        self.db.with_conn(|conn| {
            conn.query_row(
                "SELECT COALESCE(SUM(l.duration_secs), 0)
                 FROM session_logs l JOIN sessions s ON l.session_id = s.id
                 WHERE s.task_id = ?1",
                [task_id.as_i64()],
                |row| row.get(0),
            )
            .map_err(StoreError::from)
        })
    }
}

fn get_in(conn: &Connection, id: SessionId) -> Result<SessionRow, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT id, task_id, title, note, created_at, updated_at FROM sessions WHERE id = ?1",
    )?;
    let mut rows = stmt.query([id.as_i64()])?;
    match rows.next()? {
        Some(row) => row_to_session(row),
        None => Err(StoreError::not_found(EntityKind::Session, id)),
    }
}

fn get_log_in(conn: &Connection, id: LogId) -> Result<LogRow, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT id, session_id, started_at, ended_at, duration_secs, note, created_at, updated_at
         FROM session_logs WHERE id = ?1",
    )?;
    let mut rows = stmt.query([id.as_i64()])?;
    match rows.next()? {
        Some(row) => row_to_log(row),
        None => Err(StoreError::not_found(EntityKind::SessionLog, id)),
    }
}

fn list_logs_in(conn: &Connection, session_id: SessionId) -> Result<Vec<LogRow>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT id, session_id, started_at, ended_at, duration_secs, note, created_at, updated_at
         FROM session_logs WHERE session_id = ?1 ORDER BY started_at ASC",
    )?;
    let mut rows = stmt.query([session_id.as_i64()])?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        out.push(row_to_log(row)?);
    }
    Ok(out)
}

fn log_ids_in(conn: &Connection, session_id: SessionId) -> Result<Vec<LogId>, StoreError> {
    let mut stmt =
        conn.prepare("SELECT id FROM session_logs WHERE session_id = ?1 ORDER BY id ASC")?;
    let ids = stmt
        .query_map([session_id.as_i64()], |row| row.get::<_, i64>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ids.into_iter().map(LogId::from_raw).collect())
}

fn row_to_session(row: &rusqlite::Row<'_>) -> Result<SessionRow, StoreError> {
    Ok(SessionRow {
        id: SessionId::from_raw(row_helpers::get(row, 0, "sessions", "id")?),
        task_id: TaskId::from_raw(row_helpers::get(row, 1, "sessions", "task_id")?),
        title: row_helpers::get(row, 2, "sessions", "title")?,
        note: row_helpers::get_opt(row, 3, "sessions", "note")?,
        created_at: row_helpers::get(row, 4, "sessions", "created_at")?,
        updated_at: row_helpers::get(row, 5, "sessions", "updated_at")?,
    })
}

fn row_to_log(row: &rusqlite::Row<'_>) -> Result<LogRow, StoreError> {
    Ok(LogRow {
        id: LogId::from_raw(row_helpers::get(row, 0, "session_logs", "id")?),
        session_id: SessionId::from_raw(row_helpers::get(row, 1, "session_logs", "session_id")?),
        started_at: row_helpers::get(row, 2, "session_logs", "started_at")?,
        ended_at: row_helpers::get_opt(row, 3, "session_logs", "ended_at")?,
        duration_secs: row_helpers::get_opt(row, 4, "session_logs", "duration_secs")?,
        note: row_helpers::get_opt(row, 5, "session_logs", "note")?,
        created_at: row_helpers::get(row, 6, "session_logs", "created_at")?,
        updated_at: row_helpers::get(row, 7, "session_logs", "updated_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::RecordRepo;
    use crate::tasks::{NewTask, TaskRepo};
    use chrono::Duration;

    fn setup() -> (Database, TaskId) {
        let db = Database::in_memory().unwrap();
        let task = TaskRepo::new(db.clone())
            .create(&NewTask {
                title: "Write paper".into(),
                ..Default::default()
            })
            .unwrap();
        (db, task.id)
    }

    #[test]
    fn create_and_get_session() {
        let (db, task_id) = setup();
        let repo = SessionRepo::new(db);
        let session = repo.create(task_id, "Draft", Some("outline first")).unwrap();
        assert_eq!(session.task_id, task_id);
        assert_eq!(session.title, "Draft");

        let fetched = repo.get(session.id).unwrap();
        assert_eq!(fetched.note.as_deref(), Some("outline first"));
    }

    #[test]
    fn get_missing_session_is_not_found() {
        let (db, _) = setup();
        let repo = SessionRepo::new(db);
        let err = repo.get(SessionId::from_raw(99)).unwrap_err();
        assert!(matches!(
            err,
            StoreError::NotFound {
                kind: EntityKind::Session,
                id: 99
            }
        ));
    }

    #[test]
    fn insert_log_starts_open() {
        let (db, task_id) = setup();
        let repo = SessionRepo::new(db);
        let session = repo.create(task_id, "Draft", None).unwrap();
        let log = repo.insert_log(session.id, Utc::now()).unwrap();
        assert!(log.ended_at.is_none());
        assert!(log.duration_secs.is_none());

        let open = repo.open_log(session.id).unwrap();
        assert_eq!(open.unwrap().id, log.id);
    }

    #[test]
    fn stop_log_sets_end_duration_and_note() {
        let (db, task_id) = setup();
        let repo = SessionRepo::new(db);
        let session = repo.create(task_id, "Draft", None).unwrap();
        let start = Utc::now();
        let log = repo.insert_log(session.id, start).unwrap();

        let end = start + Duration::seconds(1500);
        let stopped = repo.stop_log(log.id, end, 1500, Some("good run")).unwrap();
        assert_eq!(stopped.duration_secs, Some(1500));
        assert_eq!(stopped.note.as_deref(), Some("good run"));
        assert!(stopped.ended_at.is_some());

        assert!(repo.open_log(session.id).unwrap().is_none());
    }

    #[test]
    fn logs_ordered_by_start_ascending() {
        let (db, task_id) = setup();
        let repo = SessionRepo::new(db);
        let session = repo.create(task_id, "Draft", None).unwrap();

        let t0 = Utc::now();
        let early = t0 - Duration::hours(2);
        let late = t0 - Duration::hours(1);
        // Insert later interval first; listing must still sort by start.
        let l_late = repo.insert_log(session.id, late).unwrap();
        repo.stop_log(l_late.id, late + Duration::seconds(10), 10, None)
            .unwrap();
        let l_early = repo.insert_log(session.id, early).unwrap();
        repo.stop_log(l_early.id, early + Duration::seconds(10), 10, None)
            .unwrap();

        let logs = repo.list_logs(session.id).unwrap();
        assert_eq!(logs[0].id, l_early.id);
        assert_eq!(logs[1].id, l_late.id);
    }

    #[test]
    fn delete_cascade_removes_logs() {
        let (db, task_id) = setup();
        let repo = SessionRepo::new(db);
        let session = repo.create(task_id, "Draft", None).unwrap();
        let log = repo.insert_log(session.id, Utc::now()).unwrap();

        let removed = repo.delete_cascade(session.id).unwrap();
        assert_eq!(removed, vec![log.id]);
        assert!(repo.get(session.id).is_err());
        assert!(repo.get_log(log.id).is_err());
    }

    #[test]
    fn convert_to_record_sums_closed_logs() {
        let (db, task_id) = setup();
        let repo = SessionRepo::new(db.clone());
        let session = repo.create(task_id, "Draft", None).unwrap();

        let start = Utc::now() - Duration::hours(1);
        let log = repo.insert_log(session.id, start).unwrap();
        repo.stop_log(log.id, start + Duration::seconds(1500), 1500, None)
            .unwrap();

        let (record, log_ids) = repo.convert_to_record(session.id, Some("done")).unwrap();
        assert_eq!(record.task_id, task_id);
        assert_eq!(record.title, "Draft");
        assert_eq!(record.note.as_deref(), Some("done"));
        assert_eq!(record.total_seconds, 1500);
        assert_eq!(log_ids, vec![log.id]);

        // Session and logs are gone; the record is retrievable.
        assert!(repo.get(session.id).is_err());
        assert!(repo.get_log(log.id).is_err());
        assert!(RecordRepo::new(db).get(record.id).is_ok());
    }

    #[test]
    fn convert_folds_open_log_against_now() {
        let (db, task_id) = setup();
        let repo = SessionRepo::new(db);
        let session = repo.create(task_id, "Draft", None).unwrap();

        // A log that started 100 seconds ago and is still running.
        repo.insert_log(session.id, Utc::now() - Duration::seconds(100))
            .unwrap();

        let (record, _) = repo.convert_to_record(session.id, None).unwrap();
        assert!(
            (100..110).contains(&record.total_seconds),
            "got {}",
            record.total_seconds
        );
    }

    #[test]
    fn convert_missing_session_is_not_found() {
        let (db, _) = setup();
        let repo = SessionRepo::new(db);
        assert!(matches!(
            repo.convert_to_record(SessionId::from_raw(5), None),
            Err(StoreError::NotFound { .. })
        ));
    }

    #[test]
    fn sum_durations_treats_open_log_as_zero() {
        let (db, task_id) = setup();
        let repo = SessionRepo::new(db);
        let session = repo.create(task_id, "Draft", None).unwrap();

        let start = Utc::now() - Duration::hours(1);
        let closed = repo.insert_log(session.id, start).unwrap();
        repo.stop_log(closed.id, start + Duration::seconds(600), 600, None)
            .unwrap();
        repo.insert_log(session.id, Utc::now()).unwrap(); // still open

        assert_eq!(repo.sum_durations(session.id).unwrap(), 600);
    }

    #[test]
    fn sum_durations_for_task_spans_sessions() {
        let (db, task_id) = setup();
        let repo = SessionRepo::new(db);
        let s1 = repo.create(task_id, "a", None).unwrap();
        let s2 = repo.create(task_id, "b", None).unwrap();

        let start = Utc::now() - Duration::hours(1);
        for (session, secs) in [(s1.id, 100), (s2.id, 200)] {
            let log = repo.insert_log(session, start).unwrap();
            repo.stop_log(log.id, start + Duration::seconds(secs), secs, None)
                .unwrap();
        }

        assert_eq!(repo.sum_durations_for_task(task_id).unwrap(), 300);
    }
}
