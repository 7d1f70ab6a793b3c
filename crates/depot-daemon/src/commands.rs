//! Request dispatch for `depotd`.

use std::sync::Arc;

use depot_ipc::{ErrorKind, FileEntry, Request, Response, SpaceInfo};
use depot_meta::{LogicalFileRow, MetaError};
use depot_store::{IngestOutcome, Savings, Store, StoreError, UploadMeta};
use tracing::{info, warn};

/// Maps protocol requests onto store operations.
pub struct CommandHandler {
    store: Arc<Store>,
    max_upload_bytes: u64,
}

impl CommandHandler {
    pub fn new(store: Arc<Store>, max_upload_bytes: u64) -> Self {
        Self {
            store,
            max_upload_bytes,
        }
    }

    /// Handle one request; every error becomes a classified wire error.
    pub async fn handle_request(&self, request: Request) -> Response {
        match request {
            Request::Handshake { client_version } => {
                info!(client_version = %client_version, "Handshake");
                Response::HandshakeAck {
                    server_version: env!("CARGO_PKG_VERSION").to_string(),
                }
            }

            Request::Status => match self.store.file_count().await {
                Ok(file_count) => Response::StatusAck {
                    status: "ready".to_string(),
                    file_count,
                },
                Err(e) => error_response(e),
            },

            Request::Upload {
                name,
                folder,
                owner,
                bytes,
            } => self.handle_upload(&name, &folder, &owner, bytes).await,

            Request::Delete { file_id, owner } => {
                match self.store.delete(file_id, &owner).await {
                    Ok(()) => Response::DeleteAck,
                    Err(e) => error_response(e),
                }
            }

            Request::Download { file_id, owner } => {
                match self.store.download(file_id, &owner).await {
                    Ok((name, bytes)) => Response::DownloadAck { name, bytes },
                    Err(e) => error_response(e),
                }
            }

            Request::Rename {
                file_id,
                owner,
                new_name,
            } => match self.store.rename(file_id, &owner, &new_name).await {
                Ok(()) => Response::RenameAck,
                Err(e) => error_response(e),
            },

            Request::Move {
                file_id,
                owner,
                folder,
            } => match self.store.move_to_folder(file_id, &owner, &folder).await {
                Ok(()) => Response::MoveAck,
                Err(e) => error_response(e),
            },

            Request::List { owner, folder } => {
                match self.store.list(&owner, folder.as_deref()).await {
                    Ok(rows) => Response::ListAck {
                        files: rows.into_iter().map(to_entry).collect(),
                    },
                    Err(e) => error_response(e),
                }
            }

            Request::Stats { owner } => {
                let result = match owner {
                    Some(owner) => self.store.owner_usage(&owner).await,
                    None => self.store.space_saved().await,
                };
                match result {
                    Ok(savings) => Response::StatsAck {
                        space: to_space(savings),
                    },
                    Err(e) => error_response(e),
                }
            }
        }
    }

    async fn handle_upload(
        &self,
        name: &str,
        folder: &str,
        owner: &str,
        bytes: Vec<u8>,
    ) -> Response {
        if bytes.len() as u64 > self.max_upload_bytes {
            return Response::Error {
                kind: ErrorKind::InvalidInput,
                message: format!(
                    "payload of {} bytes exceeds limit of {}",
                    bytes.len(),
                    self.max_upload_bytes
                ),
            };
        }

        let receipt = match self
            .store
            .ingest(
                &bytes,
                UploadMeta {
                    name,
                    folder,
                    owner,
                },
            )
            .await
        {
            Ok(receipt) => receipt,
            Err(e) => return error_response(e),
        };

        // Quota usage reflecting this upload; failure here shouldn't void
        // a completed ingest.
        let usage = match self.store.owner_usage(owner).await {
            Ok(savings) => to_space(savings),
            Err(e) => {
                warn!(error = %e, owner, "usage query failed after upload");
                SpaceInfo::default()
            }
        };

        Response::UploadAck {
            duplicate: receipt.outcome == IngestOutcome::Duplicate,
            file: to_entry(receipt.file),
            usage,
        }
    }
}

fn to_entry(row: LogicalFileRow) -> FileEntry {
    FileEntry {
        id: row.id,
        name: row.name,
        folder: row.folder,
        owner: row.owner,
        digest: row.digest,
        is_reference: row.is_reference,
        size: row.size,
        uploaded_at: row.uploaded_at,
    }
}

fn to_space(savings: Savings) -> SpaceInfo {
    SpaceInfo {
        logical_bytes: savings.logical_bytes,
        physical_bytes: savings.physical_bytes,
        saved_bytes: savings.saved_bytes,
        percent: savings.percent,
    }
}

fn error_response(err: StoreError) -> Response {
    let kind = match &err {
        StoreError::InvalidInput(_) => ErrorKind::InvalidInput,
        StoreError::NotFound(_) => ErrorKind::NotFound,
        StoreError::Forbidden(_) => ErrorKind::Forbidden,
        StoreError::Storage(depot_cas::BlobError::NotFound { .. }) => ErrorKind::NotFound,
        StoreError::Storage(_) => ErrorKind::Storage,
        StoreError::Meta(MetaError::NotFound(_)) => ErrorKind::NotFound,
        StoreError::Meta(_) => ErrorKind::Internal,
    };
    Response::Error {
        kind,
        message: err.to_string(),
    }
}
