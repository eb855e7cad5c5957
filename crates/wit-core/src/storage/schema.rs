//! SQLite schema for the work item store
//!
//! Work items carry fixed columns plus one JSON `fields` column holding the
//! type specific attributes. Related tables (spaces, iterations, areas, ...)
//! are the targets of the query compiler's table joins.

use rusqlite::{Connection, Result};

/// Current schema version for migrations
pub const SCHEMA_VERSION: i32 = 1;

/// Identity of the seeded parent-child link type
pub const PARENT_CHILD_LINK_TYPE_ID: &str = "25c326a7-6d03-4f5a-b23b-86a9ee4171e9";

/// Initialize the database schema
pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        -- Schema version tracking
        CREATE TABLE IF NOT EXISTS schema_info (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS space_templates (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            description TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            deleted_at INTEGER
        );

        CREATE TABLE IF NOT EXISTS identities (
            id TEXT PRIMARY KEY,
            username TEXT NOT NULL UNIQUE,
            full_name TEXT,
            email TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            deleted_at INTEGER
        );

        CREATE TABLE IF NOT EXISTS spaces (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            description TEXT,
            space_template_id TEXT NOT NULL,
            owner_id TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            deleted_at INTEGER,
            FOREIGN KEY (space_template_id) REFERENCES space_templates(id),
            FOREIGN KEY (owner_id) REFERENCES identities(id)
        );

        CREATE TABLE IF NOT EXISTS work_item_types (
            id TEXT PRIMARY KEY,
            space_template_id TEXT NOT NULL,
            name TEXT NOT NULL,
            description TEXT,
            can_construct INTEGER NOT NULL DEFAULT 1,
            extended_type_id TEXT,
            fields TEXT NOT NULL DEFAULT '{}',
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            deleted_at INTEGER,
            UNIQUE (space_template_id, name),
            FOREIGN KEY (space_template_id) REFERENCES space_templates(id),
            FOREIGN KEY (extended_type_id) REFERENCES work_item_types(id)
        );

        -- Iterations and areas keep a materialized path "/root/../self"
        CREATE TABLE IF NOT EXISTS iterations (
            id TEXT PRIMARY KEY,
            space_id TEXT NOT NULL,
            name TEXT NOT NULL,
            path TEXT NOT NULL,
            state TEXT NOT NULL DEFAULT 'new',
            start_at INTEGER,
            end_at INTEGER,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            deleted_at INTEGER,
            FOREIGN KEY (space_id) REFERENCES spaces(id)
        );

        CREATE TABLE IF NOT EXISTS areas (
            id TEXT PRIMARY KEY,
            space_id TEXT NOT NULL,
            name TEXT NOT NULL,
            path TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            deleted_at INTEGER,
            FOREIGN KEY (space_id) REFERENCES spaces(id)
        );

        CREATE TABLE IF NOT EXISTS codebases (
            id TEXT PRIMARY KEY,
            space_id TEXT NOT NULL,
            url TEXT NOT NULL,
            type TEXT NOT NULL DEFAULT 'git',
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            deleted_at INTEGER,
            FOREIGN KEY (space_id) REFERENCES spaces(id)
        );

        CREATE TABLE IF NOT EXISTS labels (
            id TEXT PRIMARY KEY,
            space_id TEXT NOT NULL,
            name TEXT NOT NULL,
            text_color TEXT NOT NULL DEFAULT '#000000',
            background_color TEXT NOT NULL DEFAULT '#FFFFFF',
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            deleted_at INTEGER,
            UNIQUE (space_id, name),
            FOREIGN KEY (space_id) REFERENCES spaces(id)
        );

        CREATE TABLE IF NOT EXISTS board_columns (
            id TEXT PRIMARY KEY,
            space_template_id TEXT NOT NULL,
            name TEXT NOT NULL,
            column_order INTEGER NOT NULL,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            deleted_at INTEGER,
            FOREIGN KEY (space_template_id) REFERENCES space_templates(id)
        );

        CREATE TABLE IF NOT EXISTS work_item_link_types (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            forward_name TEXT NOT NULL,
            reverse_name TEXT NOT NULL,
            topology TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            deleted_at INTEGER
        );

        CREATE TABLE IF NOT EXISTS work_item_number_sequences (
            space_id TEXT PRIMARY KEY,
            current_val INTEGER NOT NULL,
            FOREIGN KEY (space_id) REFERENCES spaces(id)
        );

        CREATE TABLE IF NOT EXISTS work_items (
            id TEXT PRIMARY KEY,
            space_id TEXT NOT NULL,
            type TEXT NOT NULL,
            number INTEGER NOT NULL,
            version INTEGER NOT NULL DEFAULT 0,
            execution_order REAL NOT NULL,
            fields TEXT NOT NULL DEFAULT '{}',
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            deleted_at INTEGER,
            FOREIGN KEY (space_id) REFERENCES spaces(id),
            FOREIGN KEY (type) REFERENCES work_item_types(id)
        );

        CREATE TABLE IF NOT EXISTS work_item_links (
            id TEXT PRIMARY KEY,
            link_type_id TEXT NOT NULL,
            source_id TEXT NOT NULL,
            target_id TEXT NOT NULL,
            version INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            deleted_at INTEGER,
            FOREIGN KEY (link_type_id) REFERENCES work_item_link_types(id),
            FOREIGN KEY (source_id) REFERENCES work_items(id),
            FOREIGN KEY (target_id) REFERENCES work_items(id)
        );

        -- Append-only audit trail
        CREATE TABLE IF NOT EXISTS work_item_revisions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            revision_time INTEGER NOT NULL,
            revision_type TEXT NOT NULL CHECK (revision_type IN ('create', 'update', 'delete')),
            modifier_id TEXT NOT NULL,
            work_item_id TEXT NOT NULL,
            work_item_type_id TEXT NOT NULL,
            work_item_version INTEGER NOT NULL,
            work_item_fields TEXT
        );

        CREATE TRIGGER IF NOT EXISTS work_item_revisions_no_update
        BEFORE UPDATE ON work_item_revisions BEGIN
            SELECT RAISE(ABORT, 'work item revisions are append-only');
        END;

        CREATE TRIGGER IF NOT EXISTS work_item_revisions_no_delete
        BEFORE DELETE ON work_item_revisions BEGIN
            SELECT RAISE(ABORT, 'work item revisions are append-only');
        END;

        -- Indexes for common query patterns
        CREATE UNIQUE INDEX IF NOT EXISTS idx_work_items_space_number
            ON work_items(space_id, number);
        CREATE INDEX IF NOT EXISTS idx_work_items_space_order
            ON work_items(space_id, execution_order);
        CREATE INDEX IF NOT EXISTS idx_work_items_type ON work_items(type);
        CREATE INDEX IF NOT EXISTS idx_work_item_links_target
            ON work_item_links(target_id, link_type_id);
        CREATE INDEX IF NOT EXISTS idx_work_item_revisions_item
            ON work_item_revisions(work_item_id);
        CREATE INDEX IF NOT EXISTS idx_iterations_space ON iterations(space_id);
        CREATE INDEX IF NOT EXISTS idx_areas_space ON areas(space_id);
        "#,
    )?;

    conn.execute(
        "INSERT OR IGNORE INTO work_item_link_types
            (id, name, forward_name, reverse_name, topology, created_at, updated_at)
         VALUES (?1, 'Parenting', 'parent of', 'child of', 'tree', 0, 0)",
        [PARENT_CHILD_LINK_TYPE_ID],
    )?;

    // Set schema version
    conn.execute(
        "INSERT OR REPLACE INTO schema_info (key, value) VALUES ('version', ?)",
        [SCHEMA_VERSION.to_string()],
    )?;

    Ok(())
}

/// Get the current schema version from the database
pub fn get_schema_version(conn: &Connection) -> Result<Option<i32>> {
    let mut stmt = conn.prepare("SELECT value FROM schema_info WHERE key = 'version'")?;
    let result: Result<String> = stmt.query_row([], |row| row.get(0));

    match result {
        Ok(version_str) => Ok(version_str.parse().ok()),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Check if schema needs initialization or migration
pub fn needs_init(conn: &Connection) -> bool {
    let table_exists: bool = conn
        .prepare("SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_info'")
        .and_then(|mut stmt| stmt.exists([]))
        .unwrap_or(false);

    if !table_exists {
        return true;
    }

    match get_schema_version(conn) {
        Ok(Some(v)) => v < SCHEMA_VERSION,
        _ => true,
    }
}
