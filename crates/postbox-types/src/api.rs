use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::EntryValue;

// -- Database --

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryResponse {
    pub key: String,
    pub value: EntryValue,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriteResponse {
    pub key: String,
    pub seq: i64,
}

// -- Storage --

/// Returned once an object's bytes are durably stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadResult {
    pub object_key: String,
    pub size: u64,
    pub sha256: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublicUrlResponse {
    pub url: String,
}
