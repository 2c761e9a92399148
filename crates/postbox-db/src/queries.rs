use anyhow::Result;
use postbox_types::EntryValue;
use rusqlite::Connection;

use crate::Database;
use crate::models::{AppendOutcome, EntryRow, ObjectRow};

impl Database {
    // -- Entries --

    /// Append `value` under `key` in `namespace`. Existing keys are never
    /// overwritten; a second write to the same key reports `Duplicate`.
    pub fn append_entry(&self, namespace: &str, key: &str, value: &EntryValue) -> Result<AppendOutcome> {
        let json = serde_json::to_string(value)?;
        self.with_conn(|conn| {
            let changed = conn.execute(
                "INSERT INTO entries (namespace, key, value) VALUES (?1, ?2, ?3)
                 ON CONFLICT(namespace, key) DO NOTHING",
                (namespace, key, &json),
            )?;
            if changed == 0 {
                return Ok(AppendOutcome::Duplicate);
            }
            Ok(AppendOutcome::Appended(conn.last_insert_rowid()))
        })
    }

    /// Every entry of a namespace in commit order.
    pub fn list_entries(&self, namespace: &str) -> Result<Vec<EntryRow>> {
        self.entries_since(namespace, 0)
    }

    /// Entries of a namespace committed after `after_seq`, in commit order.
    pub fn entries_since(&self, namespace: &str, after_seq: i64) -> Result<Vec<EntryRow>> {
        self.with_conn(|conn| query_entries_since(conn, namespace, after_seq))
    }

    // -- Objects --

    pub fn upsert_object(&self, object_key: &str, file_name: &str, size: i64, sha256: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO objects (object_key, file_name, size, sha256) VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(object_key) DO UPDATE SET
                    file_name = excluded.file_name,
                    size = excluded.size,
                    sha256 = excluded.sha256,
                    updated_at = datetime('now')",
                rusqlite::params![object_key, file_name, size, sha256],
            )?;
            Ok(())
        })
    }

    pub fn get_object(&self, object_key: &str) -> Result<Option<ObjectRow>> {
        self.with_conn(|conn| query_object(conn, object_key))
    }
}

fn query_entries_since(conn: &Connection, namespace: &str, after_seq: i64) -> Result<Vec<EntryRow>> {
    let mut stmt = conn.prepare(
        "SELECT seq, namespace, key, value, created_at
         FROM entries
         WHERE namespace = ?1 AND seq > ?2
         ORDER BY seq ASC",
    )?;

    let rows = stmt
        .query_map(rusqlite::params![namespace, after_seq], |row| {
            Ok(EntryRow {
                seq: row.get(0)?,
                namespace: row.get(1)?,
                key: row.get(2)?,
                value: row.get(3)?,
                created_at: row.get(4)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
}

fn query_object(conn: &Connection, object_key: &str) -> Result<Option<ObjectRow>> {
    let mut stmt = conn.prepare(
        "SELECT object_key, file_name, size, sha256, updated_at FROM objects WHERE object_key = ?1",
    )?;

    let row = stmt
        .query_row([object_key], |row| {
            Ok(ObjectRow {
                object_key: row.get(0)?,
                file_name: row.get(1)?,
                size: row.get(2)?,
                sha256: row.get(3)?,
                updated_at: row.get(4)?,
            })
        })
        .optional()?;

    Ok(row)
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
