//! # depot-daemon
//!
//! The Depot storage daemon.
//!
//! `depotd` owns the blob directory and the metadata database and serves
//! the dedup store's operations over a Unix Domain Socket. Clients (the
//! `depot` CLI or anything speaking the protocol) exchange
//! length-prefixed bincode frames of `depot_ipc::Request` /
//! `depot_ipc::Response`.

pub mod commands;
pub mod socket;

use anyhow::Result;
use std::path::PathBuf;
use std::sync::Arc;

use depot_store::Store;

/// Paths a daemon instance operates on.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    /// UDS socket path.
    pub socket_path: PathBuf,
    /// Blob store root directory.
    pub blob_root: PathBuf,
    /// SQLite database path.
    pub db_path: PathBuf,
    /// Maximum accepted upload payload in bytes.
    pub max_upload_bytes: u64,
}

impl DaemonConfig {
    /// Build from the loaded application config.
    pub fn from_config(config: &depot_config::Config) -> Self {
        Self {
            socket_path: config.daemon.socket.clone(),
            blob_root: config.storage.blob_root(),
            db_path: config.storage.db_path(),
            max_upload_bytes: config.limits.max_upload_bytes,
        }
    }
}

/// Open the store and serve until the listener fails.
pub async fn run_daemon(config: DaemonConfig) -> Result<()> {
    let store = Arc::new(Store::open(&config.blob_root, &config.db_path).await?);
    socket::run_listener(config, store).await
}
