use chrono::{DateTime, Utc};

use crate::error::StoreError;

/// Get a required column value from a row, returning CorruptRow on failure.
pub fn get<T: rusqlite::types::FromSql>(
    row: &rusqlite::Row<'_>,
    idx: usize,
    table: &'static str,
    column: &'static str,
) -> Result<T, StoreError> {
    row.get(idx).map_err(|e| StoreError::CorruptRow {
        table,
        column,
        detail: e.to_string(),
    })
}

/// Get an optional column value.
pub fn get_opt<T: rusqlite::types::FromSql>(
    row: &rusqlite::Row<'_>,
    idx: usize,
    table: &'static str,
    column: &'static str,
) -> Result<Option<T>, StoreError> {
    row.get(idx).map_err(|e| StoreError::CorruptRow {
        table,
        column,
        detail: e.to_string(),
    })
}

/// Parse a string into an enum, returning CorruptRow on failure.
pub fn parse_enum<T: std::str::FromStr>(
    raw: &str,
    table: &'static str,
    column: &'static str,
) -> Result<T, StoreError> {
    raw.parse().map_err(|_| StoreError::CorruptRow {
        table,
        column,
        detail: format!("unknown variant: {raw}"),
    })
}

/// Parse a stored RFC 3339 timestamp, returning CorruptRow on failure.
pub fn parse_timestamp(
    raw: &str,
    table: &'static str,
    column: &'static str,
) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::CorruptRow {
            table,
            column,
            detail: format!("invalid timestamp: {e}"),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_enum_success() {
        let result: Result<crate::tasks::TaskStatus, _> = parse_enum("active", "tasks", "status");
        assert!(result.is_ok());
    }

    #[test]
    fn parse_enum_failure() {
        let result: Result<crate::tasks::TaskStatus, _> = parse_enum("INVALID", "tasks", "status");
        assert!(matches!(
            result,
            Err(StoreError::CorruptRow {
                table: "tasks",
                column: "status",
                ..
            })
        ));
    }

    #[test]
    fn parse_timestamp_success() {
        let dt = parse_timestamp("2026-03-01T10:00:00+00:00", "session_logs", "started_at").unwrap();
        assert_eq!(dt.timestamp(), 1772359200);
    }

    #[test]
    fn parse_timestamp_failure() {
        let result = parse_timestamp("yesterday", "session_logs", "started_at");
        assert!(matches!(
            result,
            Err(StoreError::CorruptRow {
                table: "session_logs",
                column: "started_at",
                ..
            })
        ));
    }
}
