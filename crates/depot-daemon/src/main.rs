//! depotd - Depot storage daemon
//!
//! Usage:
//!   depotd [data_dir]
//!
//! Paths come from `~/.depot/config.toml` / `.depot/config.toml`, with
//! `DEPOT_DATA_DIR` and `DEPOT_SOCKET` overriding; a positional data_dir
//! argument overrides both.

use anyhow::{Context, Result};
use std::path::PathBuf;
use tracing::info;

use depot_config::logging::{init_logging, LogLevel};
use depot_daemon::{run_daemon, DaemonConfig};

#[tokio::main]
async fn main() -> Result<()> {
    init_logging(LogLevel::Info);

    let app_config = depot_config::Config::load().context("Failed to load configuration")?;
    let mut config = DaemonConfig::from_config(&app_config);

    // Optional positional override of the data root.
    let args: Vec<String> = std::env::args().collect();
    if args.len() > 1 {
        let data_dir = PathBuf::from(&args[1]);
        config.blob_root = data_dir.join("blobs");
        config.db_path = data_dir.join("depot.db");
    }

    info!(
        blobs = %config.blob_root.display(),
        db = %config.db_path.display(),
        socket = %config.socket_path.display(),
        "Starting depotd"
    );

    run_daemon(config).await
}
