use serde::{Deserialize, Serialize};

/// Entity kinds the store and the notification stream talk about.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Task,
    Tag,
    Session,
    SessionLog,
    SessionRecord,
    ScheduleEntry,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Task => "task",
            Self::Tag => "tag",
            Self::Session => "session",
            Self::SessionLog => "session_log",
            Self::SessionRecord => "session_record",
            Self::ScheduleEntry => "schedule_entry",
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EntityKind {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "task" => Ok(Self::Task),
            "tag" => Ok(Self::Tag),
            "session" => Ok(Self::Session),
            "session_log" => Ok(Self::SessionLog),
            "session_record" => Ok(Self::SessionRecord),
            "schedule_entry" => Ok(Self::ScheduleEntry),
            other => Err(format!("unknown entity kind: {other}")),
        }
    }
}
