use serde::{Deserialize, Serialize};

use crate::models::{Entry, EntryValue};

/// A child appended to a namespace. `seq` is the store's commit order and is
/// only meaningful within one namespace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChildAdded {
    pub namespace: String,
    pub seq: i64,
    pub key: String,
    pub value: EntryValue,
}

impl ChildAdded {
    pub fn into_entry(self) -> Entry {
        Entry {
            key: self.key,
            value: self.value,
        }
    }
}

/// Frames sent to subscribers over the stream WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum StreamEvent {
    /// Sent once per existing child on subscribe, then once per new child.
    ChildAdded(ChildAdded),
}
