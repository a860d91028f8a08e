use tokio::sync::broadcast;
use tracing::instrument;

use tempo_core::events::{AffectedEntity, ChangeEvent};
use tempo_core::ids::{TagId, TaskId};
use tempo_core::kinds::EntityKind;
use tempo_store::tags::{TagPatch, TagRepo, TagRow};
use tempo_store::tasks::{TaskRepo, TaskRow};
use tempo_store::{Database, StoreError};

use crate::error::EngineError;
use crate::hierarchy::payload;

/// Tag lifecycle plus the task↔tag linkage. Tags are shared, never owned:
/// deleting one detaches it everywhere but leaves the tasks alone.
pub struct TagManager {
    tags: TagRepo,
    tasks: TaskRepo,
    events: broadcast::Sender<ChangeEvent>,
}

impl TagManager {
    pub fn new(db: Database, events: broadcast::Sender<ChangeEvent>) -> Self {
        Self {
            tags: TagRepo::new(db.clone()),
            tasks: TaskRepo::new(db),
            events,
        }
    }

    #[instrument(skip(self), fields(name))]
    pub fn create_tag(&self, name: &str, color: Option<&str>) -> Result<TagRow, EngineError> {
        let tag = self
            .tags
            .create(name, color)
            .map_err(duplicate_to_domain)?;
        self.emit(ChangeEvent::created(
            EntityKind::Tag,
            tag.id.as_i64(),
            payload(&tag)?,
        ));
        Ok(tag)
    }

    pub fn get_tag(&self, id: TagId) -> Result<TagRow, EngineError> {
        Ok(self.tags.get(id)?)
    }

    pub fn list_tags(&self) -> Result<Vec<TagRow>, EngineError> {
        Ok(self.tags.list()?)
    }

    /// Rename/recolor. The duplicate check excludes the tag's own row.
    #[instrument(skip(self, patch), fields(tag_id = %id))]
    pub fn update_tag(&self, id: TagId, patch: &TagPatch) -> Result<TagRow, EngineError> {
        let tag = self.tags.update(id, patch).map_err(duplicate_to_domain)?;
        self.emit(ChangeEvent::updated(
            EntityKind::Tag,
            tag.id.as_i64(),
            payload(&tag)?,
        ));
        Ok(tag)
    }

    /// Delete a tag. Affected lists the tasks whose tag set changed.
    #[instrument(skip(self), fields(tag_id = %id))]
    pub fn delete_tag(&self, id: TagId) -> Result<Vec<TaskId>, EngineError> {
        let untagged = self.tags.delete(id)?;
        let affected = untagged
            .iter()
            .map(|t| AffectedEntity::updated(EntityKind::Task, t.as_i64()))
            .collect();
        self.emit(ChangeEvent::deleted(EntityKind::Tag, id.as_i64()).with_affected(affected));
        Ok(untagged)
    }

    /// Attach a tag to a task; the task's refreshed representation goes out
    /// as a TASK_UPDATE.
    #[instrument(skip(self), fields(task_id = %task_id, tag_id = %tag_id))]
    pub fn assign_tag(&self, task_id: TaskId, tag_id: TagId) -> Result<TaskRow, EngineError> {
        self.tasks.get(task_id)?;
        self.tags.get(tag_id)?;
        let task = self.tasks.link_tag(task_id, tag_id)?;
        self.emit(ChangeEvent::updated(
            EntityKind::Task,
            task.id.as_i64(),
            payload(&task)?,
        ));
        Ok(task)
    }

    #[instrument(skip(self), fields(task_id = %task_id, tag_id = %tag_id))]
    pub fn remove_tag(&self, task_id: TaskId, tag_id: TagId) -> Result<TaskRow, EngineError> {
        self.tasks.get(task_id)?;
        self.tags.get(tag_id)?;
        let task = self.tasks.unlink_tag(task_id, tag_id)?;
        self.emit(ChangeEvent::updated(
            EntityKind::Task,
            task.id.as_i64(),
            payload(&task)?,
        ));
        Ok(task)
    }

    fn emit(&self, event: ChangeEvent) {
        let _ = self.events.send(event);
    }
}

fn duplicate_to_domain(e: StoreError) -> EngineError {
    match e {
        StoreError::Conflict(name) => EngineError::DuplicateTagName(name),
        other => other.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hierarchy::TaskManager;
    use tempo_core::events::NotificationType;
    use tempo_store::tasks::NewTask;

    fn setup() -> (
        TagManager,
        TaskManager,
        broadcast::Receiver<ChangeEvent>,
    ) {
        let db = Database::in_memory().unwrap();
        let (tx, rx) = broadcast::channel(64);
        (
            TagManager::new(db.clone(), tx.clone()),
            TaskManager::new(db, tx),
            rx,
        )
    }

    #[test]
    fn duplicate_tag_name_fails_second_create() {
        let (tags, _, _rx) = setup();
        tags.create_tag("focus", None).unwrap();
        let err = tags.create_tag("focus", Some("#fff")).unwrap_err();
        assert!(matches!(err, EngineError::DuplicateTagName(name) if name == "focus"));
    }

    #[test]
    fn rename_onto_existing_name_fails() {
        let (tags, _, _rx) = setup();
        tags.create_tag("focus", None).unwrap();
        let b = tags.create_tag("deep-work", None).unwrap();
        let err = tags
            .update_tag(
                b.id,
                &TagPatch {
                    name: Some("focus".into()),
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert!(matches!(err, EngineError::DuplicateTagName(_)));
    }

    #[test]
    fn assign_and_remove_roundtrip_through_tag_ids() {
        let (tags, tasks, mut rx) = setup();
        let task = tasks
            .create_task(&NewTask {
                title: "t".into(),
                ..Default::default()
            })
            .unwrap();
        let tag = tags.create_tag("focus", None).unwrap();
        while rx.try_recv().is_ok() {}

        let tagged = tags.assign_tag(task.id, tag.id).unwrap();
        assert_eq!(tagged.tag_ids, vec![tag.id]);

        let event = rx.try_recv().unwrap();
        assert_eq!(event.notification_type, NotificationType::TaskUpdate);

        let untagged = tags.remove_tag(task.id, tag.id).unwrap();
        assert!(untagged.tag_ids.is_empty());
    }

    #[test]
    fn assign_to_missing_task_is_not_found() {
        let (tags, _, _rx) = setup();
        let tag = tags.create_tag("focus", None).unwrap();
        let err = tags.assign_tag(TaskId::from_raw(77), tag.id).unwrap_err();
        assert!(matches!(
            err,
            EngineError::NotFound {
                kind: EntityKind::Task,
                id: 77
            }
        ));
    }

    #[test]
    fn delete_tag_emits_affected_task_updates() {
        let (tags, tasks, mut rx) = setup();
        let task = tasks
            .create_task(&NewTask {
                title: "t".into(),
                ..Default::default()
            })
            .unwrap();
        let tag = tags.create_tag("focus", None).unwrap();
        tags.assign_tag(task.id, tag.id).unwrap();
        while rx.try_recv().is_ok() {}

        let untagged = tags.delete_tag(tag.id).unwrap();
        assert_eq!(untagged, vec![task.id]);

        let event = rx.try_recv().unwrap();
        assert_eq!(event.notification_type, NotificationType::TagDelete);
        assert_eq!(
            event.affected,
            vec![AffectedEntity::updated(EntityKind::Task, task.id.as_i64())]
        );

        // The task survives with an empty tag set.
        assert!(tasks.get_task(task.id).unwrap().tag_ids.is_empty());
    }
}
