//! Row models for the metadata store.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// One unique physical payload.
///
/// Exactly one row exists per distinct digest; `ref_count` is the number
/// of logical files currently pointing at it and stays >= 1 while any do.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct StoredObjectRow {
    /// Hex-encoded BLAKE3 digest (primary key).
    pub digest: String,
    /// Payload length in bytes.
    pub size: i64,
    /// Number of logical files referencing this object.
    pub ref_count: i64,
    /// Creation timestamp (UTC, `datetime('now')`).
    pub created_at: String,
}

/// One user-visible upload record.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct LogicalFileRow {
    pub id: i64,
    /// Display name as uploaded.
    pub name: String,
    /// Normalized folder path (`/`-separated, leading slash).
    pub folder: String,
    /// Owning user.
    pub owner: String,
    /// Digest of the backing stored object.
    pub digest: String,
    /// False for the first upload of this content, true for later
    /// duplicates that only added a reference.
    pub is_reference: bool,
    /// Payload length in bytes.
    pub size: i64,
    /// Upload timestamp (UTC).
    pub uploaded_at: String,
}

/// Fields for a new logical file record.
#[derive(Debug, Clone)]
pub struct NewLogicalFile<'a> {
    pub name: &'a str,
    pub folder: &'a str,
    pub owner: &'a str,
    pub digest: &'a str,
    pub is_reference: bool,
    pub size: i64,
}
