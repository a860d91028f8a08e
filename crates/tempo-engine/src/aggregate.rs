use tracing::instrument;

use tempo_core::ids::{SessionId, TaskId};
use tempo_store::records::RecordRepo;
use tempo_store::sessions::SessionRepo;
use tempo_store::tasks::TaskRepo;
use tempo_store::Database;

use crate::error::EngineError;

/// Read-side duration roll-ups, recomputed on demand. Nothing here is
/// incrementally maintained; freshness comes from computing at call time.
pub struct Aggregator {
    sessions: SessionRepo,
    records: RecordRepo,
    tasks: TaskRepo,
}

impl Aggregator {
    pub fn new(db: Database) -> Self {
        Self {
            sessions: SessionRepo::new(db.clone()),
            records: RecordRepo::new(db.clone()),
            tasks: TaskRepo::new(db),
        }
    }

    /// Sum of the session's closed-log durations; an open log counts as zero.
    #[instrument(skip(self), fields(session_id = %session_id))]
    pub fn total_for_session(&self, session_id: SessionId) -> Result<i64, EngineError> {
        self.sessions.get(session_id)?;
        Ok(self.sessions.sum_durations(session_id)?)
    }

    /// Sum across every live session of the task.
    #[instrument(skip(self), fields(task_id = %task_id))]
    pub fn total_for_task(&self, task_id: TaskId) -> Result<i64, EngineError> {
        self.tasks.get(task_id)?;
        Ok(self.sessions.sum_durations_for_task(task_id)?)
    }

    /// Sum of recorded totals over the task's ended sessions.
    #[instrument(skip(self), fields(task_id = %task_id))]
    pub fn recorded_total_for_task(&self, task_id: TaskId) -> Result<i64, EngineError> {
        self.tasks.get(task_id)?;
        Ok(self.records.sum_for_task(task_id)?)
    }
}
