use tempo_core::ids::{LogId, SessionId};
use tempo_core::kinds::EntityKind;
use tempo_store::StoreError;

/// Domain errors reported synchronously to the caller of a mutating
/// operation. Everything else from the store passes through as `Store`.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("{kind} {id} not found")]
    NotFound { kind: EntityKind, id: i64 },

    #[error("invalid parent: {0}")]
    InvalidParent(String),

    #[error("duplicate tag name: {0}")]
    DuplicateTagName(String),

    #[error("session {0} already has a running log")]
    LogAlreadyRunning(SessionId),

    #[error("log {0} is already stopped")]
    LogAlreadyStopped(LogId),

    #[error("invalid interval: end {end} precedes start {start}")]
    InvalidInterval { start: String, end: String },

    #[error("store error: {0}")]
    Store(StoreError),
}

impl EngineError {
    /// Stable string code for the RPC error surface.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "NOT_FOUND",
            Self::InvalidParent(_) => "INVALID_PARENT",
            Self::DuplicateTagName(_) => "DUPLICATE_TAG_NAME",
            Self::LogAlreadyRunning(_) => "LOG_ALREADY_RUNNING",
            Self::LogAlreadyStopped(_) => "LOG_ALREADY_STOPPED",
            Self::InvalidInterval { .. } => "INVALID_INTERVAL",
            Self::Store(_) => "INTERNAL_ERROR",
        }
    }
}

impl From<StoreError> for EngineError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound { kind, id } => Self::NotFound { kind, id },
            other => Self::Store(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_not_found_maps_through() {
        let err: EngineError = StoreError::not_found(EntityKind::Session, 4i64).into();
        assert!(matches!(
            err,
            EngineError::NotFound {
                kind: EntityKind::Session,
                id: 4
            }
        ));
        assert_eq!(err.code(), "NOT_FOUND");
    }

    #[test]
    fn other_store_errors_wrap() {
        let err: EngineError = StoreError::Database("locked".into()).into();
        assert!(matches!(err, EngineError::Store(_)));
        assert_eq!(err.code(), "INTERNAL_ERROR");
    }

    #[test]
    fn codes_are_stable() {
        assert_eq!(
            EngineError::DuplicateTagName("focus".into()).code(),
            "DUPLICATE_TAG_NAME"
        );
        assert_eq!(
            EngineError::LogAlreadyRunning(SessionId::from_raw(1)).code(),
            "LOG_ALREADY_RUNNING"
        );
        assert_eq!(
            EngineError::InvalidInterval {
                start: "a".into(),
                end: "b".into()
            }
            .code(),
            "INVALID_INTERVAL"
        );
    }
}
