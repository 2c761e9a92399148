use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use postbox_types::{ChildAdded, EntryValue};
use postbox_types::api::EntryResponse;

/// A row of `entries`. `value` holds the entry's JSON encoding.
pub struct EntryRow {
    pub seq: i64,
    pub namespace: String,
    pub key: String,
    pub value: String,
    pub created_at: String,
}

impl EntryRow {
    pub fn decode_value(&self) -> Result<EntryValue> {
        serde_json::from_str(&self.value)
            .with_context(|| format!("Corrupt value for entry {}/{}", self.namespace, self.key))
    }

    pub fn to_child_added(&self) -> Result<ChildAdded> {
        Ok(ChildAdded {
            namespace: self.namespace.clone(),
            seq: self.seq,
            key: self.key.clone(),
            value: self.decode_value()?,
        })
    }

    pub fn to_response(&self) -> Result<EntryResponse> {
        Ok(EntryResponse {
            key: self.key.clone(),
            value: self.decode_value()?,
            created_at: parse_sqlite_timestamp(&self.created_at)?,
        })
    }
}

pub struct ObjectRow {
    pub object_key: String,
    pub file_name: String,
    pub size: i64,
    pub sha256: String,
    pub updated_at: String,
}

/// Result of appending to a namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    /// Stored with this commit sequence number.
    Appended(i64),
    /// The key already exists in the namespace; nothing was written.
    Duplicate,
}

/// SQLite stores timestamps as "YYYY-MM-DD HH:MM:SS" without timezone.
fn parse_sqlite_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    if let Ok(ts) = raw.parse::<DateTime<Utc>>() {
        return Ok(ts);
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
        .map(|ndt| ndt.and_utc())
        .with_context(|| format!("Corrupt timestamp '{}'", raw))
}
