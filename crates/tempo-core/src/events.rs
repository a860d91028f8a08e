use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::kinds::EntityKind;

/// One notification type per entity kind and operation.
/// Wire form is the lower-snake-case serde name (e.g. `session_record_create`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    TaskCreate,
    TaskUpdate,
    TaskDelete,
    TagCreate,
    TagUpdate,
    TagDelete,
    SessionCreate,
    SessionUpdate,
    SessionDelete,
    SessionLogCreate,
    SessionLogUpdate,
    SessionLogDelete,
    SessionRecordCreate,
    SessionRecordUpdate,
    SessionRecordDelete,
    ScheduleEntryCreate,
    ScheduleEntryUpdate,
    ScheduleEntryDelete,
}

impl NotificationType {
    pub fn created(kind: EntityKind) -> Self {
        match kind {
            EntityKind::Task => Self::TaskCreate,
            EntityKind::Tag => Self::TagCreate,
            EntityKind::Session => Self::SessionCreate,
            EntityKind::SessionLog => Self::SessionLogCreate,
            EntityKind::SessionRecord => Self::SessionRecordCreate,
            EntityKind::ScheduleEntry => Self::ScheduleEntryCreate,
        }
    }

    pub fn updated(kind: EntityKind) -> Self {
        match kind {
            EntityKind::Task => Self::TaskUpdate,
            EntityKind::Tag => Self::TagUpdate,
            EntityKind::Session => Self::SessionUpdate,
            EntityKind::SessionLog => Self::SessionLogUpdate,
            EntityKind::SessionRecord => Self::SessionRecordUpdate,
            EntityKind::ScheduleEntry => Self::ScheduleEntryUpdate,
        }
    }

    pub fn deleted(kind: EntityKind) -> Self {
        match kind {
            EntityKind::Task => Self::TaskDelete,
            EntityKind::Tag => Self::TagDelete,
            EntityKind::Session => Self::SessionDelete,
            EntityKind::SessionLog => Self::SessionLogDelete,
            EntityKind::SessionRecord => Self::SessionRecordDelete,
            EntityKind::ScheduleEntry => Self::ScheduleEntryDelete,
        }
    }

    pub fn kind(&self) -> EntityKind {
        match self {
            Self::TaskCreate | Self::TaskUpdate | Self::TaskDelete => EntityKind::Task,
            Self::TagCreate | Self::TagUpdate | Self::TagDelete => EntityKind::Tag,
            Self::SessionCreate | Self::SessionUpdate | Self::SessionDelete => EntityKind::Session,
            Self::SessionLogCreate | Self::SessionLogUpdate | Self::SessionLogDelete => {
                EntityKind::SessionLog
            }
            Self::SessionRecordCreate | Self::SessionRecordUpdate | Self::SessionRecordDelete => {
                EntityKind::SessionRecord
            }
            Self::ScheduleEntryCreate | Self::ScheduleEntryUpdate | Self::ScheduleEntryDelete => {
                EntityKind::ScheduleEntry
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TaskCreate => "task_create",
            Self::TaskUpdate => "task_update",
            Self::TaskDelete => "task_delete",
            Self::TagCreate => "tag_create",
            Self::TagUpdate => "tag_update",
            Self::TagDelete => "tag_delete",
            Self::SessionCreate => "session_create",
            Self::SessionUpdate => "session_update",
            Self::SessionDelete => "session_delete",
            Self::SessionLogCreate => "session_log_create",
            Self::SessionLogUpdate => "session_log_update",
            Self::SessionLogDelete => "session_log_delete",
            Self::SessionRecordCreate => "session_record_create",
            Self::SessionRecordUpdate => "session_record_update",
            Self::SessionRecordDelete => "session_record_delete",
            Self::ScheduleEntryCreate => "schedule_entry_create",
            Self::ScheduleEntryUpdate => "schedule_entry_update",
            Self::ScheduleEntryDelete => "schedule_entry_delete",
        }
    }
}

impl std::fmt::Display for NotificationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A secondary entity touched by a mutation (e.g. a descendant task removed
/// by a cascade), tagged with the notification type that applies to it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AffectedEntity {
    #[serde(rename = "notificationType")]
    pub notification_type: NotificationType,
    pub id: i64,
}

impl AffectedEntity {
    pub fn deleted(kind: EntityKind, id: i64) -> Self {
        Self {
            notification_type: NotificationType::deleted(kind),
            id,
        }
    }

    pub fn updated(kind: EntityKind, id: i64) -> Self {
        Self {
            notification_type: NotificationType::updated(kind),
            id,
        }
    }
}

/// A committed mutation, as emitted on the engine's broadcast channel.
/// Emission happens strictly after the store transaction commits.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub notification_type: NotificationType,
    pub primary_id: Option<i64>,
    pub ids: Option<Vec<i64>>,
    pub payload: Option<serde_json::Value>,
    pub affected: Vec<AffectedEntity>,
    pub occurred_at: DateTime<Utc>,
}

impl ChangeEvent {
    pub fn created(kind: EntityKind, id: i64, payload: serde_json::Value) -> Self {
        Self {
            notification_type: NotificationType::created(kind),
            primary_id: Some(id),
            ids: None,
            payload: Some(payload),
            affected: Vec::new(),
            occurred_at: Utc::now(),
        }
    }

    pub fn updated(kind: EntityKind, id: i64, payload: serde_json::Value) -> Self {
        Self {
            notification_type: NotificationType::updated(kind),
            primary_id: Some(id),
            ids: None,
            payload: Some(payload),
            affected: Vec::new(),
            occurred_at: Utc::now(),
        }
    }

    /// Delete events carry no payload.
    pub fn deleted(kind: EntityKind, id: i64) -> Self {
        Self {
            notification_type: NotificationType::deleted(kind),
            primary_id: Some(id),
            ids: None,
            payload: None,
            affected: Vec::new(),
            occurred_at: Utc::now(),
        }
    }

    pub fn with_affected(mut self, affected: Vec<AffectedEntity>) -> Self {
        self.affected = affected;
        self
    }
}

/// Wire shape delivered to subscribers of the broadcast topic.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NotificationEnvelope {
    #[serde(rename = "notificationType")]
    pub notification_type: String,
    pub id: Option<i64>,
    pub ids: Option<Vec<i64>>,
    pub data: Option<serde_json::Value>,
    pub affected: Option<Vec<AffectedEntity>>,
    #[serde(rename = "occurredAt")]
    pub occurred_at: String,
}

impl From<&ChangeEvent> for NotificationEnvelope {
    fn from(event: &ChangeEvent) -> Self {
        Self {
            notification_type: event.notification_type.as_str().to_string(),
            id: event.primary_id,
            ids: event.ids.clone(),
            data: event.payload.clone(),
            affected: if event.affected.is_empty() {
                None
            } else {
                Some(event.affected.clone())
            },
            occurred_at: event.occurred_at.to_rfc3339(),
        }
    }
}
