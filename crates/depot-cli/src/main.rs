//! # depot CLI
//!
//! Command-line client for the Depot deduplicating file store.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use depot_ipc::client::Client;
use depot_ipc::SpaceInfo;

/// Depot - deduplicating file storage
#[derive(Parser)]
#[command(name = "depot")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Daemon socket path (defaults to the configured one)
    #[arg(long)]
    socket: Option<PathBuf>,

    /// Acting user (defaults to $USER)
    #[arg(long)]
    owner: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload one or more files
    Upload {
        /// Files to upload
        #[arg(value_name = "FILE", required = true)]
        files: Vec<PathBuf>,

        /// Target folder
        #[arg(short, long, default_value = "/")]
        folder: String,
    },

    /// Delete a file by id
    Rm {
        #[arg(value_name = "ID")]
        id: i64,
    },

    /// Download a file by id
    Download {
        #[arg(value_name = "ID")]
        id: i64,

        /// Output path (defaults to the stored display name)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// List your files
    Ls {
        /// Restrict to one folder
        #[arg(short, long)]
        folder: Option<String>,
    },

    /// Rename a file
    Rename {
        #[arg(value_name = "ID")]
        id: i64,
        #[arg(value_name = "NAME")]
        name: String,
    },

    /// Move a file to another folder
    Mv {
        #[arg(value_name = "ID")]
        id: i64,
        #[arg(value_name = "FOLDER")]
        folder: String,
    },

    /// Show space statistics
    Stats {
        /// Only your own usage instead of store-wide totals
        #[arg(long)]
        mine: bool,
    },

    /// Check daemon health
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    depot_config::logging::init_logging(depot_config::logging::LogLevel::Warn);

    let cli = Cli::parse();

    let socket = cli
        .socket
        .clone()
        .unwrap_or_else(|| depot_config::config().daemon.socket.clone());
    let owner = cli
        .owner
        .clone()
        .or_else(|| std::env::var("USER").ok())
        .unwrap_or_else(|| "anonymous".to_string());

    let mut client = Client::connect_to(&socket)
        .await
        .with_context(|| format!("Failed to connect to depotd at {}", socket.display()))?;

    match cli.command {
        Commands::Upload { files, folder } => upload(&mut client, files, folder, owner).await,
        Commands::Rm { id } => {
            client.delete(id, owner).await?;
            println!("Deleted file {}", id);
            Ok(())
        }
        Commands::Download { id, output } => download(&mut client, id, output, owner).await,
        Commands::Ls { folder } => ls(&mut client, folder, owner).await,
        Commands::Rename { id, name } => {
            client.rename(id, owner, name.clone()).await?;
            println!("Renamed file {} to {}", id, name);
            Ok(())
        }
        Commands::Mv { id, folder } => {
            client.move_to_folder(id, owner, folder.clone()).await?;
            println!("Moved file {} to {}", id, folder);
            Ok(())
        }
        Commands::Stats { mine } => stats(&mut client, mine, owner).await,
        Commands::Status => {
            let (status, file_count) = client.status().await?;
            println!("depotd: {} ({} files)", status, file_count);
            Ok(())
        }
    }
}

async fn upload(
    client: &mut Client,
    files: Vec<PathBuf>,
    folder: String,
    owner: String,
) -> Result<()> {
    let mut last_usage = SpaceInfo::default();

    for path in files {
        let bytes = std::fs::read(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| path.display().to_string());

        let (file, duplicate, usage) = client
            .upload(name.clone(), folder.clone(), owner.clone(), bytes)
            .await?;

        let outcome = if duplicate {
            "duplicate (reference stored)"
        } else {
            "stored"
        };
        println!("  {} (id {}) - {}", name, file.id, outcome);
        last_usage = usage;
    }

    println!();
    println!(
        "  Usage: {} logical, {} on disk, {} saved",
        format_bytes(last_usage.logical_bytes),
        format_bytes(last_usage.physical_bytes),
        format_bytes(last_usage.saved_bytes)
    );
    Ok(())
}

async fn download(
    client: &mut Client,
    id: i64,
    output: Option<PathBuf>,
    owner: String,
) -> Result<()> {
    let (name, bytes) = client.download(id, owner).await?;
    let target = output.unwrap_or_else(|| PathBuf::from(&name));
    std::fs::write(&target, &bytes)
        .with_context(|| format!("Failed to write {}", target.display()))?;
    println!("Wrote {} ({})", target.display(), format_bytes(bytes.len() as u64));
    Ok(())
}

async fn ls(client: &mut Client, folder: Option<String>, owner: String) -> Result<()> {
    let files = client.list(owner, folder).await?;
    if files.is_empty() {
        println!("No files.");
        return Ok(());
    }

    for file in files {
        let marker = if file.is_reference { "ref" } else { "   " };
        println!(
            "  {:>6}  {:>10}  {}  {}{}{}",
            file.id,
            format_bytes(file.size as u64),
            marker,
            file.folder,
            if file.folder.ends_with('/') { "" } else { "/" },
            file.name
        );
    }
    Ok(())
}

async fn stats(client: &mut Client, mine: bool, owner: String) -> Result<()> {
    let space = client.stats(if mine { Some(owner) } else { None }).await?;

    println!();
    println!("  Depot Space Statistics");
    println!("  ======================");
    println!("  Logical:  {}", format_bytes(space.logical_bytes));
    println!("  On disk:  {}", format_bytes(space.physical_bytes));
    println!(
        "  Saved:    {} ({:.1}%)",
        format_bytes(space.saved_bytes),
        space.percent
    );
    Ok(())
}

fn format_bytes(bytes: u64) -> String {
    const KIB: u64 = 1024;
    const MIB: u64 = KIB * 1024;
    const GIB: u64 = MIB * 1024;
    if bytes >= GIB {
        format!("{:.2} GiB", bytes as f64 / GIB as f64)
    } else if bytes >= MIB {
        format!("{:.2} MiB", bytes as f64 / MIB as f64)
    } else if bytes >= KIB {
        format!("{:.2} KiB", bytes as f64 / KIB as f64)
    } else {
        format!("{} B", bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_parses() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.00 KiB");
        assert_eq!(format_bytes(3 * 1024 * 1024), "3.00 MiB");
    }

    #[test]
    fn test_upload_requires_files() {
        let result = Cli::try_parse_from(["depot", "upload"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_stats_flags() {
        let cli = Cli::try_parse_from(["depot", "stats", "--mine"]).unwrap();
        assert!(matches!(cli.command, Commands::Stats { mine: true }));
    }
}
