use serde::Serialize;
use tokio::sync::broadcast;
use tracing::instrument;

use tempo_core::events::{AffectedEntity, ChangeEvent};
use tempo_core::ids::TaskId;
use tempo_core::kinds::EntityKind;
use tempo_store::tasks::{NewTask, SubtreeDelete, TaskPatch, TaskRepo, TaskRow};
use tempo_store::{Database, StoreError};

use crate::error::EngineError;

/// Task tree manager: creation, partial update with cycle validation, and
/// the cascading subtree delete.
pub struct TaskManager {
    tasks: TaskRepo,
    events: broadcast::Sender<ChangeEvent>,
}

impl TaskManager {
    pub fn new(db: Database, events: broadcast::Sender<ChangeEvent>) -> Self {
        Self {
            tasks: TaskRepo::new(db),
            events,
        }
    }

    #[instrument(skip(self, spec), fields(title = %spec.title))]
    pub fn create_task(&self, spec: &NewTask) -> Result<TaskRow, EngineError> {
        if let Some(parent) = spec.parent_id {
            self.ensure_parent(parent)?;
        }
        let task = self.tasks.create(spec)?;
        self.emit(ChangeEvent::created(
            EntityKind::Task,
            task.id.as_i64(),
            payload(&task)?,
        ));
        Ok(task)
    }

    pub fn get_task(&self, id: TaskId) -> Result<TaskRow, EngineError> {
        Ok(self.tasks.get(id)?)
    }

    pub fn list_roots(&self) -> Result<Vec<TaskRow>, EngineError> {
        Ok(self.tasks.list_roots()?)
    }

    /// Partial update. A parent change re-validates the cycle condition by
    /// walking the proposed parent's ancestor chain; status changes are plain
    /// field writes with no effect on children.
    #[instrument(skip(self, patch), fields(task_id = %id))]
    pub fn update_task(&self, id: TaskId, patch: &TaskPatch) -> Result<TaskRow, EngineError> {
        self.tasks.get(id)?;
        if let Some(Some(new_parent)) = patch.parent {
            self.assert_no_cycle(id, new_parent)?;
        }
        let task = self.tasks.update(id, patch)?;
        self.emit(ChangeEvent::updated(
            EntityKind::Task,
            task.id.as_i64(),
            payload(&task)?,
        ));
        Ok(task)
    }

    /// Delete a task and its whole subtree, atomically. The emitted event
    /// lists every secondary removal so subscribers can update derived views
    /// without a second query.
    #[instrument(skip(self), fields(task_id = %id))]
    pub fn delete_task(&self, id: TaskId) -> Result<SubtreeDelete, EngineError> {
        let deleted = self.tasks.delete_subtree(id)?;
        let affected = affected_of(&deleted);
        self.emit(ChangeEvent::deleted(EntityKind::Task, id.as_i64()).with_affected(affected));
        Ok(deleted)
    }

    fn ensure_parent(&self, parent: TaskId) -> Result<(), EngineError> {
        match self.tasks.get(parent) {
            Ok(_) => Ok(()),
            Err(StoreError::NotFound { .. }) => Err(EngineError::InvalidParent(format!(
                "parent task {parent} does not exist"
            ))),
            Err(e) => Err(e.into()),
        }
    }

    /// Reject a reparent that would make `id` an ancestor of itself.
    fn assert_no_cycle(&self, id: TaskId, new_parent: TaskId) -> Result<(), EngineError> {
        if new_parent == id {
            return Err(EngineError::InvalidParent(format!(
                "task {id} cannot be its own parent"
            )));
        }
        self.ensure_parent(new_parent)?;

        let mut cursor = Some(new_parent);
        while let Some(ancestor) = cursor {
            if ancestor == id {
                return Err(EngineError::InvalidParent(format!(
                    "task {new_parent} is a descendant of task {id}"
                )));
            }
            cursor = self.tasks.parent_of(ancestor)?;
        }
        Ok(())
    }

    fn emit(&self, event: ChangeEvent) {
        // Fire-and-forget: no subscribers is fine.
        let _ = self.events.send(event);
    }
}

fn affected_of(deleted: &SubtreeDelete) -> Vec<AffectedEntity> {
    let mut affected = Vec::new();
    // The root itself is the primary id, not an affected entry.
    for &task in deleted.task_ids.iter().skip(1) {
        affected.push(AffectedEntity::deleted(EntityKind::Task, task.as_i64()));
    }
    for &session in &deleted.session_ids {
        affected.push(AffectedEntity::deleted(
            EntityKind::Session,
            session.as_i64(),
        ));
    }
    for &log in &deleted.log_ids {
        affected.push(AffectedEntity::deleted(EntityKind::SessionLog, log.as_i64()));
    }
    for &record in &deleted.record_ids {
        affected.push(AffectedEntity::deleted(
            EntityKind::SessionRecord,
            record.as_i64(),
        ));
    }
    for &entry in &deleted.entry_ids {
        affected.push(AffectedEntity::deleted(
            EntityKind::ScheduleEntry,
            entry.as_i64(),
        ));
    }
    affected
}

pub(crate) fn payload<T: Serialize>(value: &T) -> Result<serde_json::Value, EngineError> {
    serde_json::to_value(value).map_err(|e| EngineError::Store(StoreError::from(e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timing::TimingEngine;
    use tempo_core::events::NotificationType;

    fn setup() -> (TaskManager, broadcast::Receiver<ChangeEvent>, Database) {
        let db = Database::in_memory().unwrap();
        let (tx, rx) = broadcast::channel(64);
        (TaskManager::new(db.clone(), tx), rx, db)
    }

    fn spec(title: &str) -> NewTask {
        NewTask {
            title: title.into(),
            ..Default::default()
        }
    }

    fn child_spec(title: &str, parent: TaskId) -> NewTask {
        NewTask {
            title: title.into(),
            parent_id: Some(parent),
            ..Default::default()
        }
    }

    #[test]
    fn create_emits_task_create() {
        let (mgr, mut rx, _) = setup();
        let task = mgr.create_task(&spec("Write paper")).unwrap();

        let event = rx.try_recv().unwrap();
        assert_eq!(event.notification_type, NotificationType::TaskCreate);
        assert_eq!(event.primary_id, Some(task.id.as_i64()));
        assert_eq!(event.payload.as_ref().unwrap()["title"], "Write paper");
    }

    #[test]
    fn create_with_missing_parent_is_invalid_parent() {
        let (mgr, _rx, _) = setup();
        let err = mgr
            .create_task(&child_spec("orphan", TaskId::from_raw(404)))
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidParent(_)));
    }

    #[test]
    fn reparent_to_own_descendant_is_rejected_and_nothing_changes() {
        let (mgr, _rx, _) = setup();
        let b = mgr.create_task(&spec("B")).unwrap();
        let a = mgr.create_task(&child_spec("A", b.id)).unwrap();

        // B's parent may not become A: A is below B.
        let err = mgr
            .update_task(
                b.id,
                &TaskPatch {
                    parent: Some(Some(a.id)),
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidParent(_)));

        assert_eq!(mgr.get_task(b.id).unwrap().parent_id, None);
        assert_eq!(mgr.get_task(a.id).unwrap().parent_id, Some(b.id));
    }

    #[test]
    fn reparent_to_self_is_rejected() {
        let (mgr, _rx, _) = setup();
        let a = mgr.create_task(&spec("A")).unwrap();
        let err = mgr
            .update_task(
                a.id,
                &TaskPatch {
                    parent: Some(Some(a.id)),
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidParent(_)));
    }

    #[test]
    fn deep_cycle_is_rejected() {
        let (mgr, _rx, _) = setup();
        let a = mgr.create_task(&spec("A")).unwrap();
        let b = mgr.create_task(&child_spec("B", a.id)).unwrap();
        let c = mgr.create_task(&child_spec("C", b.id)).unwrap();

        let err = mgr
            .update_task(
                a.id,
                &TaskPatch {
                    parent: Some(Some(c.id)),
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidParent(_)));
    }

    #[test]
    fn valid_reparent_moves_subtree() {
        let (mgr, _rx, _) = setup();
        let a = mgr.create_task(&spec("A")).unwrap();
        let b = mgr.create_task(&spec("B")).unwrap();
        let moved = mgr
            .update_task(
                b.id,
                &TaskPatch {
                    parent: Some(Some(a.id)),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(moved.parent_id, Some(a.id));
    }

    #[test]
    fn status_change_does_not_touch_children() {
        let (mgr, _rx, _) = setup();
        let parent = mgr.create_task(&spec("parent")).unwrap();
        let child = mgr.create_task(&child_spec("child", parent.id)).unwrap();

        mgr.update_task(
            parent.id,
            &TaskPatch {
                status: Some(tempo_store::tasks::TaskStatus::Archived),
                ..Default::default()
            },
        )
        .unwrap();

        assert_eq!(
            mgr.get_task(child.id).unwrap().status,
            tempo_store::tasks::TaskStatus::Active
        );
    }

    #[test]
    fn delete_cascades_and_lists_affected() {
        let (mgr, mut rx, db) = setup();
        let (tx2, _rx2) = broadcast::channel(64);
        let timing = TimingEngine::new(db, tx2);

        let root = mgr.create_task(&spec("root")).unwrap();
        let child = mgr.create_task(&child_spec("child", root.id)).unwrap();
        let session = timing.create_session(child.id, "work", None).unwrap();
        let unrelated = mgr.create_task(&spec("unrelated")).unwrap();

        // Drain create events.
        while rx.try_recv().is_ok() {}

        let deleted = mgr.delete_task(root.id).unwrap();
        assert_eq!(deleted.task_ids, vec![root.id, child.id]);
        assert_eq!(deleted.session_ids, vec![session.id]);

        let event = rx.try_recv().unwrap();
        assert_eq!(event.notification_type, NotificationType::TaskDelete);
        assert_eq!(event.primary_id, Some(root.id.as_i64()));
        assert!(event.payload.is_none());
        assert!(event.affected.contains(&AffectedEntity::deleted(
            EntityKind::Task,
            child.id.as_i64()
        )));
        assert!(event.affected.contains(&AffectedEntity::deleted(
            EntityKind::Session,
            session.id.as_i64()
        )));

        assert!(mgr.get_task(root.id).is_err());
        assert!(mgr.get_task(child.id).is_err());
        assert!(mgr.get_task(unrelated.id).is_ok());
        assert!(timing.get_session(session.id).is_err());
    }

    #[test]
    fn delete_missing_task_is_not_found() {
        let (mgr, _rx, _) = setup();
        let err = mgr.delete_task(TaskId::from_raw(12)).unwrap_err();
        assert!(matches!(
            err,
            EngineError::NotFound {
                kind: EntityKind::Task,
                id: 12
            }
        ));
    }
}
