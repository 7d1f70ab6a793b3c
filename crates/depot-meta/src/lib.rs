//! # depot-meta
//!
//! SQLite-backed metadata store for Depot.
//!
//! Holds the digest -> StoredObject mapping and the logical file records.
//! The first-seen race between concurrent uploads of identical content is
//! serialized by the UNIQUE constraint on `stored_objects.digest`: the
//! upsert either inserts the row (ref_count 1) or becomes the increment,
//! so no two StoredObjects can exist for one digest. Reference counts are
//! only ever touched by single-statement updates, never read-modify-write
//! from the application.

mod models;

pub use models::{LogicalFileRow, NewLogicalFile, StoredObjectRow};

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Error, Debug)]
pub enum MetaError {
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("not found: {0}")]
    NotFound(String),
}

pub type Result<T> = std::result::Result<T, MetaError>;

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS stored_objects (
    digest     TEXT PRIMARY KEY,
    size       INTEGER NOT NULL,
    ref_count  INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS logical_files (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    name         TEXT NOT NULL,
    folder       TEXT NOT NULL DEFAULT '/',
    owner        TEXT NOT NULL,
    digest       TEXT NOT NULL REFERENCES stored_objects(digest),
    is_reference INTEGER NOT NULL DEFAULT 0,
    size         INTEGER NOT NULL,
    uploaded_at  TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE INDEX IF NOT EXISTS idx_logical_files_owner  ON logical_files(owner, folder);
CREATE INDEX IF NOT EXISTS idx_logical_files_digest ON logical_files(digest);
"#;

/// Metadata store over a single SQLite database.
pub struct MetaStore {
    pool: Pool<Sqlite>,
}

impl MetaStore {
    /// Open (or create) the database at the given path and run migrations.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}?mode=rwc", path.display()))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .foreign_keys(true)
            // Prevent transient "database is locked" errors under concurrent access.
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            // SQLite permits limited write concurrency; a single connection
            // avoids persistent "database is locked" failures.
            .max_connections(1)
            .connect_with(opts)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// Create the schema if missing. Idempotent.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::raw_sql(SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }

    /// Check database connectivity.
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Stored objects
    // ------------------------------------------------------------------

    /// Register a payload digest, returning the resulting reference count.
    ///
    /// First sight inserts the row with `ref_count` 1; any later (or
    /// concurrently racing) call for the same digest lands on the UPDATE
    /// arm and increments instead. The returned count is 1 exactly when
    /// this call created the object.
    pub async fn upsert_object(&self, digest: &str, size: i64) -> Result<i64> {
        let ref_count: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO stored_objects (digest, size, ref_count) VALUES (?, ?, 1)
            ON CONFLICT(digest) DO UPDATE SET ref_count = ref_count + 1
            RETURNING ref_count
            "#,
        )
        .bind(digest)
        .bind(size)
        .fetch_one(&self.pool)
        .await?;

        debug!(digest = %&digest[..8.min(digest.len())], ref_count, "object upserted");
        Ok(ref_count)
    }

    /// Fetch a stored object by digest.
    pub async fn get_object(&self, digest: &str) -> Result<Option<StoredObjectRow>> {
        let row = sqlx::query_as::<_, StoredObjectRow>(
            "SELECT * FROM stored_objects WHERE digest = ?",
        )
        .bind(digest)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    // ------------------------------------------------------------------
    // Logical files
    // ------------------------------------------------------------------

    /// Insert a logical file record, returning the stored row.
    pub async fn insert_file(&self, file: NewLogicalFile<'_>) -> Result<LogicalFileRow> {
        let row = sqlx::query_as::<_, LogicalFileRow>(
            r#"
            INSERT INTO logical_files (name, folder, owner, digest, is_reference, size)
            VALUES (?, ?, ?, ?, ?, ?)
            RETURNING *
            "#,
        )
        .bind(file.name)
        .bind(file.folder)
        .bind(file.owner)
        .bind(file.digest)
        .bind(file.is_reference)
        .bind(file.size)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    /// Fetch a logical file by id.
    pub async fn get_file(&self, id: i64) -> Result<Option<LogicalFileRow>> {
        let row = sqlx::query_as::<_, LogicalFileRow>("SELECT * FROM logical_files WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    /// List an owner's files, optionally restricted to one folder.
    pub async fn list_files(
        &self,
        owner: &str,
        folder: Option<&str>,
    ) -> Result<Vec<LogicalFileRow>> {
        let rows = match folder {
            Some(folder) => {
                sqlx::query_as::<_, LogicalFileRow>(
                    "SELECT * FROM logical_files WHERE owner = ? AND folder = ? ORDER BY id",
                )
                .bind(owner)
                .bind(folder)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, LogicalFileRow>(
                    "SELECT * FROM logical_files WHERE owner = ? ORDER BY id",
                )
                .bind(owner)
                .fetch_all(&self.pool)
                .await?
            }
        };
        Ok(rows)
    }

    /// Change a file's display name.
    pub async fn rename_file(&self, id: i64, new_name: &str) -> Result<()> {
        let result = sqlx::query("UPDATE logical_files SET name = ? WHERE id = ?")
            .bind(new_name)
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(MetaError::NotFound(format!("logical file {} not found", id)));
        }
        Ok(())
    }

    /// Move a file to another folder.
    pub async fn move_file(&self, id: i64, new_folder: &str) -> Result<()> {
        let result = sqlx::query("UPDATE logical_files SET folder = ? WHERE id = ?")
            .bind(new_folder)
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(MetaError::NotFound(format!("logical file {} not found", id)));
        }
        Ok(())
    }

    /// Delete a logical file and release its stored object in one
    /// transaction.
    ///
    /// Returns the deleted row and the object's remaining reference count;
    /// at zero the object row is gone and the caller must remove the
    /// physical blob. Returns `None` when the id is unknown.
    pub async fn delete_file_and_release(
        &self,
        id: i64,
    ) -> Result<Option<(LogicalFileRow, i64)>> {
        let mut tx = self.pool.begin().await?;

        let file = sqlx::query_as::<_, LogicalFileRow>(
            "DELETE FROM logical_files WHERE id = ? RETURNING *",
        )
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(file) = file else {
            tx.rollback().await?;
            return Ok(None);
        };

        let remaining: Option<i64> = sqlx::query_scalar(
            "UPDATE stored_objects SET ref_count = ref_count - 1 WHERE digest = ? RETURNING ref_count",
        )
        .bind(&file.digest)
        .fetch_optional(&mut *tx)
        .await?;

        let remaining = match remaining {
            Some(n) => n,
            None => {
                // Object row missing despite a referencing file: repair by
                // treating the reference as the last one.
                warn!(digest = %file.digest, "stored object missing during release");
                0
            }
        };

        if remaining <= 0 {
            sqlx::query("DELETE FROM stored_objects WHERE digest = ?")
                .bind(&file.digest)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(Some((file, remaining)))
    }

    // ------------------------------------------------------------------
    // Statistics
    // ------------------------------------------------------------------

    /// Global (logical_bytes, physical_bytes) over all stored objects.
    ///
    /// Logical counts every reference at full size; physical counts each
    /// distinct payload once. The difference is the space deduplication
    /// has saved.
    pub async fn space_totals(&self) -> Result<(i64, i64)> {
        let row: (i64, i64) = sqlx::query_as(
            "SELECT COALESCE(SUM(ref_count * size), 0), COALESCE(SUM(size), 0) FROM stored_objects",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    /// Per-owner (logical_bytes, physical_bytes).
    ///
    /// Physical attributes each payload to the upload that first stored
    /// it, so an owner's duplicates count as zero physical bytes.
    pub async fn owner_space(&self, owner: &str) -> Result<(i64, i64)> {
        let logical: i64 =
            sqlx::query_scalar("SELECT COALESCE(SUM(size), 0) FROM logical_files WHERE owner = ?")
                .bind(owner)
                .fetch_one(&self.pool)
                .await?;
        let physical: i64 = sqlx::query_scalar(
            "SELECT COALESCE(SUM(size), 0) FROM logical_files WHERE owner = ? AND is_reference = 0",
        )
        .bind(owner)
        .fetch_one(&self.pool)
        .await?;
        Ok((logical, physical))
    }

    /// Number of logical files in the store.
    pub async fn file_count(&self) -> Result<i64> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM logical_files")
            .fetch_one(&self.pool)
            .await?;
        Ok(n)
    }
}
