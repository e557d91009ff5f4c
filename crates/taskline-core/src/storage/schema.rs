//! SQLite schema for the relational backend
//!
//! One row per item with a column per field. `position` records insertion
//! order so a reopened store returns the collection in the same order.

use rusqlite::{params, Connection, OptionalExtension, Result};

/// Current schema version for migrations
pub const SCHEMA_VERSION: i32 = 1;

/// Initialize the database schema
pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        -- Schema version tracking
        CREATE TABLE IF NOT EXISTS schema_info (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS items (
            id TEXT PRIMARY KEY,
            text TEXT NOT NULL,
            importance TEXT NOT NULL,
            due_date INTEGER,
            is_completed INTEGER NOT NULL,
            color TEXT,
            date_created INTEGER NOT NULL,
            date_edited INTEGER,
            last_updated_by TEXT,
            position INTEGER NOT NULL
        );

        -- Sorting by creation date and filtering completed items
        CREATE INDEX IF NOT EXISTS idx_items_date_created ON items(date_created);
        CREATE INDEX IF NOT EXISTS idx_items_is_completed ON items(is_completed);
        CREATE INDEX IF NOT EXISTS idx_items_position ON items(position);
        "#,
    )?;

    conn.execute(
        "INSERT OR REPLACE INTO schema_info (key, value) VALUES ('version', ?)",
        params![SCHEMA_VERSION.to_string()],
    )?;

    Ok(())
}

/// Check whether the schema needs to be created
pub fn needs_init(conn: &Connection) -> bool {
    let version: Option<String> = conn
        .query_row(
            "SELECT value FROM schema_info WHERE key = 'version'",
            [],
            |row| row.get(0),
        )
        .optional()
        .unwrap_or(None);

    version.and_then(|v| v.parse::<i32>().ok()) != Some(SCHEMA_VERSION)
}
