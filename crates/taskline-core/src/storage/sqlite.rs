//! Relational backend
//!
//! Persists each item as a row and issues explicit insert/update/delete/
//! select statements keyed by id. Every statement commits on its own, so
//! `save` has nothing left to flush. Queries are answered with SQL.

use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, Row};
use tracing::debug;

use super::error::{StorageError, StorageResult};
use super::schema::{init_schema, needs_init};
use super::{LocalBackend, StorageKind};
use crate::models::{Importance, Item, ItemQuery, SortKey, SortOrder};

const SELECT_ITEMS: &str = "SELECT id, text, importance, due_date, is_completed, color, \
     date_created, date_edited, last_updated_by FROM items";

const IMPORTANCE_RANK: &str =
    "CASE importance WHEN 'low' THEN 0 WHEN 'important' THEN 2 ELSE 1 END";

/// SQLite-backed item storage
pub struct SqliteBackend {
    conn: Connection,
}

impl SqliteBackend {
    /// Open or create the database at `path`
    pub fn open(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| StorageError::CreateDirectory {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let conn = Connection::open(path)?;
        Self::with_connection(conn)
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> StorageResult<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> StorageResult<Self> {
        if needs_init(&conn) {
            init_schema(&conn)?;
        }
        Ok(Self { conn })
    }

    /// Get a reference to the underlying connection
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    fn select(&self, sql: &str) -> StorageResult<Vec<Item>> {
        let mut stmt = self.conn.prepare(sql)?;
        let items = stmt
            .query_map([], item_from_row)?
            .collect::<Result<Vec<Item>, _>>()?;
        Ok(items)
    }
}

impl LocalBackend for SqliteBackend {
    fn kind(&self) -> StorageKind {
        StorageKind::Sqlite
    }

    fn load(&mut self) -> StorageResult<Vec<Item>> {
        self.select(&format!("{} ORDER BY position", SELECT_ITEMS))
    }

    fn insert(&mut self, item: &Item, _snapshot: &[Item]) -> StorageResult<()> {
        insert_item(&self.conn, item, None)?;
        debug!(id = %item.id, "Inserted item row");
        Ok(())
    }

    fn update(&mut self, item: &Item, _snapshot: &[Item]) -> StorageResult<()> {
        let changed = self.conn.execute(
            r#"
            UPDATE items SET text = ?2, importance = ?3, due_date = ?4, is_completed = ?5,
                color = ?6, date_created = ?7, date_edited = ?8, last_updated_by = ?9
            WHERE id = ?1
            "#,
            params![
                item.id,
                item.text,
                item.importance.as_str(),
                item.due.map(|d| d.timestamp()),
                item.done,
                item.color,
                item.created_at.timestamp(),
                item.changed_at.map(|d| d.timestamp()),
                item.last_updated_by,
            ],
        )?;

        if changed == 0 {
            insert_item(&self.conn, item, None)?;
        }
        debug!(id = %item.id, "Updated item row");
        Ok(())
    }

    fn remove(&mut self, id: &str, _snapshot: &[Item]) -> StorageResult<()> {
        self.conn
            .execute("DELETE FROM items WHERE id = ?", params![id])?;
        debug!(id, "Deleted item row");
        Ok(())
    }

    fn clear(&mut self) -> StorageResult<()> {
        self.conn.execute("DELETE FROM items", [])?;
        Ok(())
    }

    fn replace_all(&mut self, items: &[Item]) -> StorageResult<()> {
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM items", [])?;
        for (position, item) in items.iter().enumerate() {
            insert_item(&tx, item, Some(position as i64))?;
        }
        tx.commit()?;
        Ok(())
    }

    fn save(&mut self, _snapshot: &[Item]) -> StorageResult<()> {
        Ok(())
    }

    fn query(&self, query: &ItemQuery, _snapshot: &[Item]) -> StorageResult<Vec<Item>> {
        let filter = if query.include_completed {
            ""
        } else {
            " WHERE is_completed = 0"
        };
        let key = match query.sort {
            SortKey::Created => "date_created",
            SortKey::Importance => IMPORTANCE_RANK,
        };
        let direction = match query.order {
            SortOrder::Ascending => "ASC",
            SortOrder::Descending => "DESC",
        };

        self.select(&format!(
            "{}{} ORDER BY {} {}, position {}",
            SELECT_ITEMS, filter, key, direction, direction
        ))
    }
}

/// Insert one row; appends after the last position unless one is given
fn insert_item(conn: &Connection, item: &Item, position: Option<i64>) -> rusqlite::Result<()> {
    conn.execute(
        r#"
        INSERT INTO items (id, text, importance, due_date, is_completed, color,
            date_created, date_edited, last_updated_by, position)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9,
            COALESCE(?10, (SELECT COALESCE(MAX(position), -1) + 1 FROM items)))
        "#,
        params![
            item.id,
            item.text,
            item.importance.as_str(),
            item.due.map(|d| d.timestamp()),
            item.done,
            item.color,
            item.created_at.timestamp(),
            item.changed_at.map(|d| d.timestamp()),
            item.last_updated_by,
            position,
        ],
    )?;
    Ok(())
}

fn item_from_row(row: &Row<'_>) -> rusqlite::Result<Item> {
    let importance: String = row.get(2)?;
    let due: Option<i64> = row.get(3)?;
    let created: i64 = row.get(6)?;
    let edited: Option<i64> = row.get(7)?;

    Ok(Item {
        id: row.get(0)?,
        text: row.get(1)?,
        importance: Importance::parse_lenient(&importance),
        due: due.map(|s| timestamp_at(3, s)).transpose()?,
        done: row.get(4)?,
        color: row.get(5)?,
        created_at: timestamp_at(6, created)?,
        changed_at: edited.map(|s| timestamp_at(7, s)).transpose()?,
        last_updated_by: row.get(8)?,
    })
}

/// Epoch seconds from column `idx`; out-of-range values fail the row
fn timestamp_at(idx: usize, secs: i64) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::from_timestamp(secs, 0).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            Type::Integer,
            format!("timestamp {} out of range", secs).into(),
        )
    })
}
