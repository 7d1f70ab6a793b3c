//! # depot-store
//!
//! The deduplicating file store engine.
//!
//! Composes the physical blob store ([`depot_cas::BlobStore`]) with the
//! metadata store ([`depot_meta::MetaStore`]). Identical byte content is
//! stored once on disk no matter how often or by whom it is uploaded;
//! every upload keeps its own logical identity (name, owner, folder).
//!
//! Ingest ordering is blob-first: the physical write happens before any
//! database record becomes visible, so a storage failure never leaves a
//! StoredObject pointing at missing bytes. The blob write is idempotent,
//! which also makes the ordering crash-safe (a crash between the two steps
//! leaves an orphaned blob that the next identical upload re-adopts).

use std::path::Path;

use depot_cas::{digest_to_hex, hex_to_digest, BlobError, BlobStore};
use depot_meta::{LogicalFileRow, MetaError, MetaStore, NewLogicalFile};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("storage error: {0}")]
    Storage(#[from] BlobError),

    #[error("metadata error: {0}")]
    Meta(#[from] MetaError),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Whether an upload stored new bytes or only added a reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IngestOutcome {
    /// First sight of this content: bytes were persisted.
    Original,
    /// Content already present: only a reference was recorded.
    Duplicate,
}

/// Result of one ingest call.
#[derive(Debug, Clone)]
pub struct Receipt {
    pub file: LogicalFileRow,
    pub outcome: IngestOutcome,
}

/// Upload metadata supplied by the caller.
#[derive(Debug, Clone)]
pub struct UploadMeta<'a> {
    pub name: &'a str,
    pub folder: &'a str,
    pub owner: &'a str,
}

/// Space accounting, global or per owner.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Savings {
    /// Bytes as if every upload stored its own copy.
    pub logical_bytes: u64,
    /// Deduplicated bytes actually held.
    pub physical_bytes: u64,
    /// `logical - physical`, i.e. sum of (ref_count - 1) * size.
    pub saved_bytes: u64,
    /// `saved / logical * 100`; zero when nothing is stored.
    pub percent: f64,
}

impl Savings {
    fn from_totals(logical: i64, physical: i64) -> Self {
        let logical = logical.max(0) as u64;
        let physical = physical.max(0) as u64;
        let saved = logical.saturating_sub(physical);
        let percent = if logical > 0 {
            saved as f64 / logical as f64 * 100.0
        } else {
            0.0
        };
        Self {
            logical_bytes: logical,
            physical_bytes: physical,
            saved_bytes: saved,
            percent,
        }
    }
}

/// The deduplicating file store.
pub struct Store {
    blobs: BlobStore,
    meta: MetaStore,
}

impl Store {
    /// Open a store: blob directory plus metadata database.
    pub async fn open(blob_root: impl AsRef<Path>, db_path: impl AsRef<Path>) -> Result<Self> {
        let blobs = BlobStore::open(blob_root)?;
        let meta = MetaStore::open(db_path).await?;
        Ok(Self { blobs, meta })
    }

    /// Ingest one upload.
    ///
    /// Computes the content digest, persists the bytes if they are new,
    /// and records a logical file either way. Two uploads with identical
    /// bytes always resolve to the same stored object; the second and
    /// later ones are marked duplicates.
    pub async fn ingest(&self, bytes: &[u8], meta: UploadMeta<'_>) -> Result<Receipt> {
        if bytes.is_empty() {
            return Err(StoreError::InvalidInput("empty upload payload".into()));
        }
        if meta.name.trim().is_empty() {
            return Err(StoreError::InvalidInput("blank display name".into()));
        }

        let folder = normalize_folder(meta.folder);

        // Physical write first; idempotent, so the duplicate path costs a
        // single existence check and the record below never points at
        // missing bytes.
        let digest = self.blobs.put(bytes)?;
        let hex = digest_to_hex(&digest);

        let ref_count = self.meta.upsert_object(&hex, bytes.len() as i64).await?;
        let outcome = if ref_count == 1 {
            IngestOutcome::Original
        } else {
            IngestOutcome::Duplicate
        };

        let file = self
            .meta
            .insert_file(NewLogicalFile {
                name: meta.name,
                folder: &folder,
                owner: meta.owner,
                digest: &hex,
                is_reference: outcome == IngestOutcome::Duplicate,
                size: bytes.len() as i64,
            })
            .await?;

        info!(
            file_id = file.id,
            owner = %file.owner,
            digest = %&hex[..8],
            size = bytes.len(),
            ?outcome,
            "ingested upload"
        );

        Ok(Receipt { file, outcome })
    }

    /// Delete a logical file owned by `owner`.
    ///
    /// Decrements the backing object's reference count; when it reaches
    /// zero the object record and the physical bytes are removed. Other
    /// logical files sharing the object are unaffected.
    pub async fn delete(&self, file_id: i64, owner: &str) -> Result<()> {
        let file = self.require_owned(file_id, owner).await?;

        let Some((deleted, remaining)) = self.meta.delete_file_and_release(file.id).await? else {
            return Err(StoreError::NotFound(format!("file {} not found", file_id)));
        };

        if remaining == 0 {
            if let Some(digest) = hex_to_digest(&deleted.digest) {
                match self.blobs.remove(&digest) {
                    Ok(()) => {}
                    // Already gone; the logical state is what matters.
                    Err(BlobError::NotFound { .. }) => {
                        warn!(digest = %deleted.digest, "blob already absent at last release")
                    }
                    Err(e) => return Err(e.into()),
                }
            }
        }

        info!(file_id, owner, remaining, "deleted logical file");
        Ok(())
    }

    /// Read back a file's content, integrity-checked against its digest.
    pub async fn download(&self, file_id: i64, owner: &str) -> Result<(String, Vec<u8>)> {
        let file = self.require_owned(file_id, owner).await?;

        let digest = hex_to_digest(&file.digest).ok_or_else(|| {
            StoreError::NotFound(format!("file {} has malformed digest", file_id))
        })?;
        let bytes = self.blobs.get(&digest)?;
        Ok((file.name, bytes))
    }

    /// Change a file's display name.
    pub async fn rename(&self, file_id: i64, owner: &str, new_name: &str) -> Result<()> {
        if new_name.trim().is_empty() {
            return Err(StoreError::InvalidInput("blank display name".into()));
        }
        let file = self.require_owned(file_id, owner).await?;
        self.meta.rename_file(file.id, new_name).await?;
        Ok(())
    }

    /// Move a file to another folder.
    pub async fn move_to_folder(&self, file_id: i64, owner: &str, folder: &str) -> Result<()> {
        let file = self.require_owned(file_id, owner).await?;
        let folder = normalize_folder(folder);
        self.meta.move_file(file.id, &folder).await?;
        Ok(())
    }

    /// List an owner's files, optionally within one folder.
    pub async fn list(&self, owner: &str, folder: Option<&str>) -> Result<Vec<LogicalFileRow>> {
        let normalized = folder.map(normalize_folder);
        Ok(self.meta.list_files(owner, normalized.as_deref()).await?)
    }

    /// Global space savings across all stored objects.
    pub async fn space_saved(&self) -> Result<Savings> {
        let (logical, physical) = self.meta.space_totals().await?;
        Ok(Savings::from_totals(logical, physical))
    }

    /// One owner's space accounting.
    pub async fn owner_usage(&self, owner: &str) -> Result<Savings> {
        let (logical, physical) = self.meta.owner_space(owner).await?;
        Ok(Savings::from_totals(logical, physical))
    }

    /// Number of logical files across all owners.
    pub async fn file_count(&self) -> Result<i64> {
        Ok(self.meta.file_count().await?)
    }

    async fn require_owned(&self, file_id: i64, owner: &str) -> Result<LogicalFileRow> {
        let file = self
            .meta
            .get_file(file_id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("file {} not found", file_id)))?;
        if file.owner != owner {
            return Err(StoreError::Forbidden(format!(
                "file {} is not owned by {}",
                file_id, owner
            )));
        }
        Ok(file)
    }
}

/// Normalize a folder path: leading slash, no trailing slash, `/` for root.
pub fn normalize_folder(folder: &str) -> String {
    let trimmed = folder.trim().trim_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        format!("/{}", trimmed)
    }
}
