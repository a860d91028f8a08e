use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tracing::instrument;

use tempo_core::events::{AffectedEntity, ChangeEvent};
use tempo_core::ids::{LogId, RecordId, SessionId, TaskId};
use tempo_core::kinds::EntityKind;
use tempo_store::records::{RecordRepo, RecordRow};
use tempo_store::row_helpers;
use tempo_store::sessions::{LogRow, SessionRepo, SessionRow};
use tempo_store::tasks::TaskRepo;
use tempo_store::Database;

use crate::error::EngineError;
use crate::hierarchy::payload;

/// Session state machine: a session is open from creation until it is
/// converted into a record and removed. Within a session at most one log may
/// be running at a time.
pub struct TimingEngine {
    sessions: SessionRepo,
    records: RecordRepo,
    tasks: TaskRepo,
    events: broadcast::Sender<ChangeEvent>,
}

impl TimingEngine {
    pub fn new(db: Database, events: broadcast::Sender<ChangeEvent>) -> Self {
        Self {
            sessions: SessionRepo::new(db.clone()),
            records: RecordRepo::new(db.clone()),
            tasks: TaskRepo::new(db),
            events,
        }
    }

    #[instrument(skip(self, note), fields(task_id = %task_id, title))]
    pub fn create_session(
        &self,
        task_id: TaskId,
        title: &str,
        note: Option<&str>,
    ) -> Result<SessionRow, EngineError> {
        self.tasks.get(task_id)?;
        let session = self.sessions.create(task_id, title, note)?;
        self.emit(ChangeEvent::created(
            EntityKind::Session,
            session.id.as_i64(),
            payload(&session)?,
        ));
        Ok(session)
    }

    pub fn get_session(&self, id: SessionId) -> Result<SessionRow, EngineError> {
        Ok(self.sessions.get(id)?)
    }

    pub fn list_sessions(&self, task_id: TaskId) -> Result<Vec<SessionRow>, EngineError> {
        self.tasks.get(task_id)?;
        Ok(self.sessions.list_by_task(task_id)?)
    }

    pub fn list_logs(&self, session_id: SessionId) -> Result<Vec<LogRow>, EngineError> {
        self.sessions.get(session_id)?;
        Ok(self.sessions.list_logs(session_id)?)
    }

    /// Start a new interval. Rejected while another log of the same session
    /// is still running.
    #[instrument(skip(self), fields(session_id = %session_id))]
    pub fn start_log(
        &self,
        session_id: SessionId,
        started_at: Option<DateTime<Utc>>,
    ) -> Result<LogRow, EngineError> {
        self.sessions.get(session_id)?;
        if self.sessions.open_log(session_id)?.is_some() {
            return Err(EngineError::LogAlreadyRunning(session_id));
        }
        let log = self
            .sessions
            .insert_log(session_id, started_at.unwrap_or_else(Utc::now))?;
        self.emit(ChangeEvent::created(
            EntityKind::SessionLog,
            log.id.as_i64(),
            payload(&log)?,
        ));
        Ok(log)
    }

    /// Stop a running interval. End defaults to now; duration is whole
    /// seconds and must not be negative. A failed stop leaves the log as-is.
    #[instrument(skip(self, note), fields(log_id = %log_id))]
    pub fn stop_log(
        &self,
        log_id: LogId,
        ended_at: Option<DateTime<Utc>>,
        note: Option<&str>,
    ) -> Result<LogRow, EngineError> {
        let log = self.sessions.get_log(log_id)?;
        if log.ended_at.is_some() {
            return Err(EngineError::LogAlreadyStopped(log_id));
        }

        let started = row_helpers::parse_timestamp(&log.started_at, "session_logs", "started_at")?;
        let ended = ended_at.unwrap_or_else(Utc::now);
        let duration = (ended - started).num_seconds();
        if duration < 0 {
            return Err(EngineError::InvalidInterval {
                start: log.started_at.clone(),
                end: ended.to_rfc3339(),
            });
        }

        let stopped = self.sessions.stop_log(log_id, ended, duration, note)?;
        self.emit(ChangeEvent::updated(
            EntityKind::SessionLog,
            stopped.id.as_i64(),
            payload(&stopped)?,
        ));
        Ok(stopped)
    }

    /// End a session: atomically create its record, delete the session and
    /// every log, and emit SESSION_RECORD_CREATE followed by SESSION_DELETE.
    #[instrument(skip(self, completion_note), fields(session_id = %session_id))]
    pub fn end_session(
        &self,
        session_id: SessionId,
        completion_note: Option<&str>,
    ) -> Result<RecordRow, EngineError> {
        let (record, log_ids) = self.sessions.convert_to_record(session_id, completion_note)?;

        self.emit(ChangeEvent::created(
            EntityKind::SessionRecord,
            record.id.as_i64(),
            payload(&record)?,
        ));
        let affected = log_ids
            .iter()
            .map(|l| AffectedEntity::deleted(EntityKind::SessionLog, l.as_i64()))
            .collect();
        self.emit(
            ChangeEvent::deleted(EntityKind::Session, session_id.as_i64())
                .with_affected(affected),
        );
        Ok(record)
    }

    #[instrument(skip(self), fields(log_id = %log_id))]
    pub fn delete_log(&self, log_id: LogId) -> Result<(), EngineError> {
        self.sessions.delete_log(log_id)?;
        self.emit(ChangeEvent::deleted(EntityKind::SessionLog, log_id.as_i64()));
        Ok(())
    }

    /// Abandon a session without a record; its logs go with it.
    #[instrument(skip(self), fields(session_id = %session_id))]
    pub fn delete_session(&self, session_id: SessionId) -> Result<(), EngineError> {
        let log_ids = self.sessions.delete_cascade(session_id)?;
        let affected = log_ids
            .iter()
            .map(|l| AffectedEntity::deleted(EntityKind::SessionLog, l.as_i64()))
            .collect();
        self.emit(
            ChangeEvent::deleted(EntityKind::Session, session_id.as_i64())
                .with_affected(affected),
        );
        Ok(())
    }

    pub fn get_record(&self, id: RecordId) -> Result<RecordRow, EngineError> {
        Ok(self.records.get(id)?)
    }

    pub fn list_records(&self, task_id: TaskId) -> Result<Vec<RecordRow>, EngineError> {
        self.tasks.get(task_id)?;
        Ok(self.records.list_by_task(task_id)?)
    }

    /// The one permitted mutation of a record after creation.
    #[instrument(skip(self, note), fields(record_id = %id))]
    pub fn update_record_note(
        &self,
        id: RecordId,
        note: Option<&str>,
    ) -> Result<RecordRow, EngineError> {
        let record = self.records.update_note(id, note)?;
        self.emit(ChangeEvent::updated(
            EntityKind::SessionRecord,
            record.id.as_i64(),
            payload(&record)?,
        ));
        Ok(record)
    }

    fn emit(&self, event: ChangeEvent) {
        let _ = self.events.send(event);
    }
}
