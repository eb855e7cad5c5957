//! Row mapping for the `work_items` table

use rusqlite::types::Type;
use rusqlite::{params, Connection, Row};

use crate::error::Result;
use crate::model::{Fields, WorkItemStorage};
use crate::storage::sql::{column, from_millis, to_millis, uuid_at, WORK_ITEMS};

const COLUMNS: [&str; 10] = [
    "id",
    "space_id",
    "type",
    "number",
    "version",
    "execution_order",
    "fields",
    "created_at",
    "updated_at",
    "deleted_at",
];

/// Comma separated, qualified work item columns in hydration order
pub(crate) fn select_columns() -> String {
    COLUMNS
        .iter()
        .map(|c| column(WORK_ITEMS, c))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Build a `WorkItemStorage` from a row selected with `select_columns`
pub(crate) fn hydrate_work_item(row: &Row<'_>) -> rusqlite::Result<WorkItemStorage> {
    let fields_json: String = row.get(6)?;
    let fields: Fields = serde_json::from_str(&fields_json)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(6, Type::Text, Box::new(e)))?;
    let deleted_at: Option<i64> = row.get(9)?;

    Ok(WorkItemStorage {
        id: uuid_at(row, 0)?,
        space_id: uuid_at(row, 1)?,
        type_id: uuid_at(row, 2)?,
        number: row.get(3)?,
        version: row.get(4)?,
        execution_order: row.get(5)?,
        fields,
        created_at: from_millis(row.get(7)?),
        updated_at: from_millis(row.get(8)?),
        deleted_at: deleted_at.map(from_millis),
    })
}

pub(crate) fn insert_work_item(conn: &Connection, item: &WorkItemStorage) -> Result<()> {
    conn.execute(
        "INSERT INTO work_items
            (id, space_id, type, number, version, execution_order, fields,
             created_at, updated_at, deleted_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            item.id.to_string(),
            item.space_id.to_string(),
            item.type_id.to_string(),
            item.number,
            item.version,
            item.execution_order,
            serde_json::to_string(&item.fields)?,
            to_millis(item.created_at),
            to_millis(item.updated_at),
            item.deleted_at.map(to_millis),
        ],
    )?;
    Ok(())
}

/// Compare-and-swap update of a live row
///
/// Writes `item` only while the stored version still equals
/// `expected_version`. Returns the number of rows written (0 or 1).
pub(crate) fn update_work_item(
    conn: &Connection,
    item: &WorkItemStorage,
    expected_version: i64,
) -> Result<usize> {
    let written = conn.execute(
        "UPDATE work_items
         SET type = ?1, version = ?2, execution_order = ?3, fields = ?4,
             updated_at = ?5, deleted_at = ?6
         WHERE id = ?7 AND version = ?8 AND deleted_at IS NULL",
        params![
            item.type_id.to_string(),
            item.version,
            item.execution_order,
            serde_json::to_string(&item.fields)?,
            to_millis(item.updated_at),
            item.deleted_at.map(to_millis),
            item.id.to_string(),
            expected_version,
        ],
    )?;
    Ok(written)
}
