//! # depot-cas
//!
//! Content-addressed blob storage for Depot.
//!
//! Blobs are keyed by their BLAKE3 digest and stored under a 2-level
//! hex fan-out so no single directory grows unbounded:
//!
//! ```text
//! <data_dir>/blobs/
//! └── blake3/
//!     └── ab/
//!         └── cd/
//!             └── abcd1234...ef
//! ```
//!
//! Writes go through a unique temp file plus atomic rename, so a blob is
//! never visible under its final name until its bytes are fully on disk.
//! Storing the same content twice is a no-op: physical bytes for a given
//! digest are written at most once.

use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, instrument};

/// BLAKE3 digest (32 bytes), the content identity key.
pub type Digest = [u8; 32];

/// Errors that can occur during blob store operations.
#[derive(Error, Debug)]
pub enum BlobError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("blob not found: {digest}")]
    NotFound { digest: String },

    #[error("digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch { expected: String, actual: String },
}

pub type Result<T> = std::result::Result<T, BlobError>;

/// Compute the BLAKE3 digest of the given bytes.
#[inline]
pub fn compute_digest(data: &[u8]) -> Digest {
    *blake3::hash(data).as_bytes()
}

/// Hex-encode a digest.
#[inline]
pub fn digest_to_hex(digest: &Digest) -> String {
    hex::encode(digest)
}

/// Parse a 64-char hex string into a digest.
pub fn hex_to_digest(s: &str) -> Option<Digest> {
    if s.len() != 64 {
        return None;
    }
    let bytes = hex::decode(s).ok()?;
    let mut digest = [0u8; 32];
    digest.copy_from_slice(&bytes);
    Some(digest)
}

/// Physical blob store.
///
/// One file per distinct digest. All mutation is idempotent with respect
/// to content: concurrent writers of the same bytes converge on one blob.
#[derive(Debug, Clone)]
pub struct BlobStore {
    root: PathBuf,
}

impl BlobStore {
    /// Open (or create) a blob store rooted at the given directory.
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// Path where a blob with the given digest lives: `blake3/ab/cd/<hex>`.
    pub fn blob_path(&self, digest: &Digest) -> PathBuf {
        let hex = digest_to_hex(digest);
        let l1 = &hex[..2];
        let l2 = &hex[2..4];
        self.root.join("blake3").join(l1).join(l2).join(&hex)
    }

    /// Store bytes, returning the content digest.
    ///
    /// If the content already exists this is a no-op. Thread-safe: unique
    /// temp names avoid collisions, and a lost rename race against an
    /// identical blob is success.
    #[instrument(skip(self, data), level = "debug")]
    pub fn put(&self, data: &[u8]) -> Result<Digest> {
        let digest = compute_digest(data);
        let path = self.blob_path(&digest);

        if path.exists() {
            debug!(digest = %&digest_to_hex(&digest)[..8], "blob already present");
            return Ok(digest);
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let temp_name = format!(
            "{}.{}.{:?}.tmp",
            path.file_name().unwrap().to_string_lossy(),
            std::process::id(),
            std::thread::current().id()
        );
        let temp_path = path.with_file_name(&temp_name);
        let mut file = File::create(&temp_path)?;
        file.write_all(data)?;
        file.sync_all()?;

        if let Err(e) = fs::rename(&temp_path, &path) {
            let _ = fs::remove_file(&temp_path);
            // If the target exists now, another writer won the race with
            // identical content; the store is in the desired state.
            if path.exists() {
                return Ok(digest);
            }
            return Err(BlobError::Io(e));
        }

        Ok(digest)
    }

    /// Retrieve a blob's bytes, verifying the digest on read.
    #[instrument(skip(self), level = "debug")]
    pub fn get(&self, digest: &Digest) -> Result<Vec<u8>> {
        let path = self.blob_path(digest);
        if !path.exists() {
            return Err(BlobError::NotFound {
                digest: digest_to_hex(digest),
            });
        }

        let mut file = File::open(&path)?;
        let mut data = Vec::new();
        file.read_to_end(&mut data)?;

        let actual = compute_digest(&data);
        if actual != *digest {
            return Err(BlobError::DigestMismatch {
                expected: digest_to_hex(digest),
                actual: digest_to_hex(&actual),
            });
        }

        Ok(data)
    }

    /// Memory-map a blob for reads without copying into the heap.
    ///
    /// Useful for serving large downloads; the mapping shares the page
    /// cache with other readers. No digest verification is performed.
    pub fn open_mmap(&self, digest: &Digest) -> Result<memmap2::Mmap> {
        let path = self.blob_path(digest);
        if !path.exists() {
            return Err(BlobError::NotFound {
                digest: digest_to_hex(digest),
            });
        }

        let file = File::open(&path)?;
        // Safety: blobs are immutable once renamed into place.
        let mmap = unsafe { memmap2::Mmap::map(&file) }.map_err(io::Error::other)?;
        Ok(mmap)
    }

    /// Check whether a blob exists.
    pub fn contains(&self, digest: &Digest) -> bool {
        self.blob_path(digest).exists()
    }

    /// Remove a blob from disk.
    pub fn remove(&self, digest: &Digest) -> Result<()> {
        let path = self.blob_path(digest);
        if path.exists() {
            fs::remove_file(path)?;
            Ok(())
        } else {
            Err(BlobError::NotFound {
                digest: digest_to_hex(digest),
            })
        }
    }

    /// Root directory of the store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Count blobs and total physical bytes by traversing the fan-out.
    pub fn stats(&self) -> Result<BlobStats> {
        let mut blob_count = 0u64;
        let mut total_bytes = 0u64;

        let base = self.root.join("blake3");
        if !base.exists() {
            return Ok(BlobStats::default());
        }

        for l1 in fs::read_dir(&base)? {
            let l1 = l1?;
            if !l1.file_type()?.is_dir() {
                continue;
            }
            for l2 in fs::read_dir(l1.path())? {
                let l2 = l2?;
                if !l2.file_type()?.is_dir() {
                    continue;
                }
                for blob in fs::read_dir(l2.path())? {
                    let blob = blob?;
                    if blob.file_type()?.is_file() {
                        // Temp files from in-flight writes don't count.
                        if blob.path().extension().is_some_and(|ext| ext == "tmp") {
                            continue;
                        }
                        blob_count += 1;
                        total_bytes += blob.metadata()?.len();
                    }
                }
            }
        }

        Ok(BlobStats {
            blob_count,
            total_bytes,
        })
    }
}

/// Physical statistics for a blob store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BlobStats {
    /// Number of unique blobs on disk.
    pub blob_count: u64,
    /// Deduplicated bytes on disk.
    pub total_bytes: u64,
}
