use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tracing::instrument;

use tempo_core::events::ChangeEvent;
use tempo_core::ids::{EntryId, TaskId};
use tempo_core::kinds::EntityKind;
use tempo_store::row_helpers;
use tempo_store::schedule::{EntryPatch, EntryRow, ScheduleRepo};
use tempo_store::tasks::TaskRepo;
use tempo_store::Database;

use crate::error::EngineError;
use crate::hierarchy::payload;

/// Planned calendar items. Independent of the timing engine; shares the
/// store and the notification stream.
pub struct ScheduleManager {
    entries: ScheduleRepo,
    tasks: TaskRepo,
    events: broadcast::Sender<ChangeEvent>,
}

impl ScheduleManager {
    pub fn new(db: Database, events: broadcast::Sender<ChangeEvent>) -> Self {
        Self {
            entries: ScheduleRepo::new(db.clone()),
            tasks: TaskRepo::new(db),
            events,
        }
    }

    #[instrument(skip(self), fields(task_id = %task_id))]
    pub fn create_entry(
        &self,
        task_id: TaskId,
        starts_at: DateTime<Utc>,
        ends_at: DateTime<Utc>,
    ) -> Result<EntryRow, EngineError> {
        self.tasks.get(task_id)?;
        if ends_at < starts_at {
            return Err(EngineError::InvalidInterval {
                start: starts_at.to_rfc3339(),
                end: ends_at.to_rfc3339(),
            });
        }
        let entry = self.entries.create(task_id, starts_at, ends_at)?;
        self.emit(ChangeEvent::created(
            EntityKind::ScheduleEntry,
            entry.id.as_i64(),
            payload(&entry)?,
        ));
        Ok(entry)
    }

    pub fn get_entry(&self, id: EntryId) -> Result<EntryRow, EngineError> {
        Ok(self.entries.get(id)?)
    }

    #[instrument(skip(self, patch), fields(entry_id = %id))]
    pub fn update_entry(&self, id: EntryId, patch: &EntryPatch) -> Result<EntryRow, EngineError> {
        let current = self.entries.get(id)?;
        let starts = match patch.starts_at {
            Some(t) => t,
            None => row_helpers::parse_timestamp(&current.starts_at, "schedule_entries", "starts_at")?,
        };
        let ends = match patch.ends_at {
            Some(t) => t,
            None => row_helpers::parse_timestamp(&current.ends_at, "schedule_entries", "ends_at")?,
        };
        if ends < starts {
            return Err(EngineError::InvalidInterval {
                start: starts.to_rfc3339(),
                end: ends.to_rfc3339(),
            });
        }
        let entry = self.entries.update(id, patch)?;
        self.emit(ChangeEvent::updated(
            EntityKind::ScheduleEntry,
            entry.id.as_i64(),
            payload(&entry)?,
        ));
        Ok(entry)
    }

    #[instrument(skip(self), fields(entry_id = %id))]
    pub fn delete_entry(&self, id: EntryId) -> Result<(), EngineError> {
        self.entries.delete(id)?;
        self.emit(ChangeEvent::deleted(EntityKind::ScheduleEntry, id.as_i64()));
        Ok(())
    }

    pub fn list_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<EntryRow>, EngineError> {
        Ok(self.entries.list_between(from, to)?)
    }

    pub fn list_by_task(&self, task_id: TaskId) -> Result<Vec<EntryRow>, EngineError> {
        self.tasks.get(task_id)?;
        Ok(self.entries.list_by_task(task_id)?)
    }

    fn emit(&self, event: ChangeEvent) {
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hierarchy::TaskManager;
    use chrono::Duration;
    use tempo_core::events::NotificationType;
    use tempo_store::tasks::NewTask;

    fn setup() -> (
        ScheduleManager,
        broadcast::Receiver<ChangeEvent>,
        TaskId,
    ) {
        let db = Database::in_memory().unwrap();
        let (tx, rx) = broadcast::channel(64);
        let tasks = TaskManager::new(db.clone(), tx.clone());
        let task_id = tasks
            .create_task(&NewTask {
                title: "t".into(),
                ..Default::default()
            })
            .unwrap()
            .id;
        let mgr = ScheduleManager::new(db, tx);
        (mgr, rx, task_id)
    }

    #[test]
    fn create_emits_entry_create() {
        let (mgr, mut rx, task_id) = setup();
        while rx.try_recv().is_ok() {}
        let t0 = Utc::now();
        let entry = mgr
            .create_entry(task_id, t0, t0 + Duration::hours(1))
            .unwrap();

        let event = rx.try_recv().unwrap();
        assert_eq!(
            event.notification_type,
            NotificationType::ScheduleEntryCreate
        );
        assert_eq!(event.primary_id, Some(entry.id.as_i64()));
    }

    #[test]
    fn backwards_range_is_invalid_interval() {
        let (mgr, _rx, task_id) = setup();
        let t0 = Utc::now();
        let err = mgr
            .create_entry(task_id, t0, t0 - Duration::hours(1))
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidInterval { .. }));
    }

    #[test]
    fn create_for_missing_task_is_not_found() {
        let (mgr, _rx, _) = setup();
        let t0 = Utc::now();
        let err = mgr
            .create_entry(TaskId::from_raw(50), t0, t0 + Duration::hours(1))
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::NotFound {
                kind: EntityKind::Task,
                id: 50
            }
        ));
    }

    #[test]
    fn update_validates_merged_range() {
        let (mgr, _rx, task_id) = setup();
        let t0 = Utc::now();
        let entry = mgr
            .create_entry(task_id, t0, t0 + Duration::hours(1))
            .unwrap();

        // Moving the end before the (unchanged) start must fail.
        let err = mgr
            .update_entry(
                entry.id,
                &EntryPatch {
                    ends_at: Some(t0 - Duration::hours(2)),
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidInterval { .. }));
    }

    #[test]
    fn delete_emits_entry_delete() {
        let (mgr, mut rx, task_id) = setup();
        let t0 = Utc::now();
        let entry = mgr
            .create_entry(task_id, t0, t0 + Duration::hours(1))
            .unwrap();
        while rx.try_recv().is_ok() {}

        mgr.delete_entry(entry.id).unwrap();
        assert!(mgr.get_entry(entry.id).is_err());

        let event = rx.try_recv().unwrap();
        assert_eq!(
            event.notification_type,
            NotificationType::ScheduleEntryDelete
        );
    }
}
