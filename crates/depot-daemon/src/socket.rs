//! Unix Domain Socket listener for `depotd`.

use crate::commands::CommandHandler;
use crate::DaemonConfig;
use anyhow::Result;
use std::sync::Arc;
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, error, info, warn};

use depot_ipc::{frame, Request};
use depot_store::Store;

/// Run the UDS listener loop.
pub async fn run_listener(config: DaemonConfig, store: Arc<Store>) -> Result<()> {
    if let Some(parent) = config.socket_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    // Remove stale socket from a previous run.
    if config.socket_path.exists() {
        std::fs::remove_file(&config.socket_path)?;
    }

    let listener = UnixListener::bind(&config.socket_path)?;
    info!(socket = %config.socket_path.display(), "Listening for connections");

    let handler = Arc::new(CommandHandler::new(store, config.max_upload_bytes));

    loop {
        match listener.accept().await {
            Ok((stream, _addr)) => {
                let handler = Arc::clone(&handler);
                tokio::spawn(async move {
                    if let Err(e) = handle_client(stream, handler).await {
                        warn!(error = %e, "Client handler error");
                    }
                });
            }
            Err(e) => {
                error!(error = %e, "Accept failed");
            }
        }
    }
}

/// Serve one client: read frames until EOF, answering each in turn.
async fn handle_client(mut stream: UnixStream, handler: Arc<CommandHandler>) -> Result<()> {
    debug!("New client connected");

    loop {
        let request: Request = match frame::read(&mut stream).await {
            Ok(req) => req,
            Err(e) => {
                if is_disconnect(&e) {
                    debug!("Client disconnected");
                    return Ok(());
                }
                // Oversized or garbled frame: drop the client.
                warn!(error = %e, "Bad frame, dropping client");
                return Ok(());
            }
        };

        debug!(request = request_kind(&request), "Received request");
        let response = handler.handle_request(request).await;
        frame::write(&mut stream, &response).await?;
    }
}

fn is_disconnect(err: &anyhow::Error) -> bool {
    err.downcast_ref::<std::io::Error>()
        .is_some_and(|e| e.kind() == std::io::ErrorKind::UnexpectedEof)
}

fn request_kind(request: &Request) -> &'static str {
    match request {
        Request::Handshake { .. } => "handshake",
        Request::Status => "status",
        Request::Upload { .. } => "upload",
        Request::Delete { .. } => "delete",
        Request::Download { .. } => "download",
        Request::Rename { .. } => "rename",
        Request::Move { .. } => "move",
        Request::List { .. } => "list",
        Request::Stats { .. } => "stats",
    }
}
