//! Small helpers shared by everything that builds or reads SQL

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::functions::FunctionFlags;
use rusqlite::types::{Type, ValueRef};
use rusqlite::{Connection, Row};
use uuid::Uuid;

/// The work item table
pub const WORK_ITEMS: &str = "work_items";

/// Quote a table (or alias) and column as `"table"."column"`
pub fn column(table: &str, column: &str) -> String {
    format!("\"{}\".\"{}\"", table, column)
}

/// JSON path for a top level key of a JSON object, `'$."key"'`
///
/// Callers must reject keys containing quotes.
pub fn json_path(key: &str) -> String {
    format!("'$.\"{}\"'", key)
}

/// Extract a key from the work item `fields` column
pub fn json_extract(table: &str, key: &str) -> String {
    format!("json_extract({}, {})", column(table, "fields"), json_path(key))
}

/// Unicode lowercase of a text value, registered on every connection
///
/// SQLite's own `LIKE` and `lower()` fold ASCII only.
pub const FOLD_CASE: &str = "fold_case";

/// Register the scalar functions compiled queries rely on
pub fn register_functions(conn: &Connection) -> rusqlite::Result<()> {
    conn.create_scalar_function(
        FOLD_CASE,
        1,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            let folded = match ctx.get_raw(0) {
                ValueRef::Text(text) => Some(String::from_utf8_lossy(text).to_lowercase()),
                ValueRef::Integer(i) => Some(i.to_string()),
                ValueRef::Real(f) => Some(f.to_string()),
                ValueRef::Null | ValueRef::Blob(_) => None,
            };
            Ok(folded)
        },
    )
}

/// Escape `%`, `_` and `\` for use in a `LIKE ... ESCAPE '\'` pattern
pub fn escape_like(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

pub fn to_millis(time: DateTime<Utc>) -> i64 {
    time.timestamp_millis()
}

pub fn from_millis(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .unwrap_or_default()
}

/// Read a TEXT column holding a UUID
pub fn uuid_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
    let text: String = row.get(idx)?;
    Uuid::parse_str(&text)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

/// Read a nullable TEXT column holding a UUID
pub fn opt_uuid_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<Uuid>> {
    let text: Option<String> = row.get(idx)?;
    text.map(|t| {
        Uuid::parse_str(&t)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
    })
    .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_column_and_paths() {
        assert_eq!(column("work_items", "type"), r#""work_items"."type""#);
        assert_eq!(json_path("system.title"), r#"'$."system.title"'"#);
        assert_eq!(
            json_extract("work_items", "system.title"),
            r#"json_extract("work_items"."fields", '$."system.title"')"#
        );
    }

    #[test]
    fn test_escape_like() {
        assert_eq!(escape_like("50%_off\\"), "50\\%\\_off\\\\");
        assert_eq!(escape_like("plain"), "plain");
    }

    #[test]
    fn test_millis_round_trip() {
        let now = Utc::now();
        let restored = from_millis(to_millis(now));
        assert_eq!(restored.timestamp_millis(), now.timestamp_millis());
    }
}
