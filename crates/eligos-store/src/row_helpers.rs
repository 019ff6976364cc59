use chrono::{SecondsFormat, Utc};

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

/// Current time as a sortable RFC 3339 string (microsecond precision, UTC).
pub fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Normalize an email address for storage and lookup.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamps_sort_lexicographically() {
        let a = now_timestamp();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let b = now_timestamp();
        assert!(a < b, "{a} >= {b}");
        assert!(a.ends_with('Z'));
    }

    #[test]
    fn email_normalized() {
        assert_eq!(normalize_email("  Ada@Example.COM "), "ada@example.com");
    }

    #[test]
    fn get_reports_corrupt_row() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        let result = conn.query_row("SELECT 'text'", [], |row| {
            Ok(get::<i64>(row, 0, "users", "created_at"))
        });
        assert!(matches!(
            result.unwrap(),
            Err(StoreError::CorruptRow { table: "users", column: "created_at", .. })
        ));
    }
}
