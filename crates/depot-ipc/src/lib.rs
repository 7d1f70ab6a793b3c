//! # depot-ipc
//!
//! Wire protocol between `depotd` and its clients.
//!
//! Frames are a u32 little-endian length followed by a bincode-serialized
//! [`Request`] or [`Response`]. The frame length is capped so a client
//! cannot make the daemon buffer unbounded payloads; the cap is also the
//! upload size ceiling.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Maximum frame payload: bounds upload size and daemon buffering.
pub const MAX_FRAME: u32 = 64 * 1024 * 1024;

/// Error classification carried across the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Empty payload, blank name, malformed field.
    InvalidInput,
    /// Unknown file id or missing blob.
    NotFound,
    /// Operation attempted by a non-owner.
    Forbidden,
    /// Physical write/read failure.
    Storage,
    /// Anything else.
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidInput => "invalid-input",
            ErrorKind::NotFound => "not-found",
            ErrorKind::Forbidden => "forbidden",
            ErrorKind::Storage => "storage",
            ErrorKind::Internal => "internal",
        }
    }
}

/// One logical file as seen by clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileEntry {
    pub id: i64,
    pub name: String,
    pub folder: String,
    pub owner: String,
    pub digest: String,
    pub is_reference: bool,
    pub size: i64,
    pub uploaded_at: String,
}

/// Space accounting block returned with uploads and stats.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct SpaceInfo {
    pub logical_bytes: u64,
    pub physical_bytes: u64,
    pub saved_bytes: u64,
    pub percent: f64,
}

#[derive(Debug, Serialize, Deserialize)]
pub enum Request {
    Handshake {
        client_version: String,
    },
    Status,
    Upload {
        name: String,
        folder: String,
        owner: String,
        bytes: Vec<u8>,
    },
    Delete {
        file_id: i64,
        owner: String,
    },
    Download {
        file_id: i64,
        owner: String,
    },
    Rename {
        file_id: i64,
        owner: String,
        new_name: String,
    },
    Move {
        file_id: i64,
        owner: String,
        folder: String,
    },
    List {
        owner: String,
        folder: Option<String>,
    },
    /// Global stats when `owner` is None, per-owner otherwise.
    Stats {
        owner: Option<String>,
    },
}

#[derive(Debug, Serialize, Deserialize)]
pub enum Response {
    HandshakeAck {
        server_version: String,
    },
    StatusAck {
        status: String,
        file_count: i64,
    },
    UploadAck {
        file: FileEntry,
        duplicate: bool,
        usage: SpaceInfo,
    },
    DeleteAck,
    DownloadAck {
        name: String,
        bytes: Vec<u8>,
    },
    RenameAck,
    MoveAck,
    ListAck {
        files: Vec<FileEntry>,
    },
    StatsAck {
        space: SpaceInfo,
    },
    Error {
        kind: ErrorKind,
        message: String,
    },
}

/// Default daemon socket path: `~/.depot/depotd.sock`.
pub fn default_socket_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join(".depot/depotd.sock")
}

/// Frame I/O shared by daemon and client.
pub mod frame {
    use super::MAX_FRAME;
    use serde::de::DeserializeOwned;
    use serde::Serialize;
    use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

    /// Write one length-prefixed bincode frame.
    pub async fn write<W, T>(stream: &mut W, value: &T) -> anyhow::Result<()>
    where
        W: AsyncWrite + Unpin,
        T: Serialize,
    {
        let payload = bincode::serialize(value)?;
        if payload.len() > MAX_FRAME as usize {
            anyhow::bail!("frame too large: {} bytes", payload.len());
        }
        stream.write_all(&(payload.len() as u32).to_le_bytes()).await?;
        stream.write_all(&payload).await?;
        Ok(())
    }

    /// Read one length-prefixed bincode frame.
    pub async fn read<R, T>(stream: &mut R) -> anyhow::Result<T>
    where
        R: AsyncRead + Unpin,
        T: DeserializeOwned,
    {
        let mut len_buf = [0u8; 4];
        stream.read_exact(&mut len_buf).await?;
        let len = u32::from_le_bytes(len_buf);
        if len > MAX_FRAME {
            anyhow::bail!("frame too large: {} bytes", len);
        }
        let mut payload = vec![0u8; len as usize];
        stream.read_exact(&mut payload).await?;
        Ok(bincode::deserialize(&payload)?)
    }
}

/// Client for talking to `depotd`.
pub mod client {
    use super::*;
    use std::path::Path;
    use tokio::net::UnixStream;

    pub struct Client {
        stream: UnixStream,
    }

    impl Client {
        /// Connect to the daemon at the default socket path.
        pub async fn connect() -> anyhow::Result<Self> {
            Self::connect_to(default_socket_path()).await
        }

        /// Connect to the daemon at a custom socket path.
        pub async fn connect_to(socket_path: impl AsRef<Path>) -> anyhow::Result<Self> {
            let stream = UnixStream::connect(socket_path.as_ref()).await?;
            Ok(Self { stream })
        }

        /// Send a request and receive the response.
        pub async fn send(&mut self, request: Request) -> anyhow::Result<Response> {
            frame::write(&mut self.stream, &request).await?;
            frame::read(&mut self.stream).await
        }

        /// Handshake with the daemon, returning its version.
        pub async fn handshake(&mut self) -> anyhow::Result<String> {
            let request = Request::Handshake {
                client_version: env!("CARGO_PKG_VERSION").to_string(),
            };
            match self.send(request).await? {
                Response::HandshakeAck { server_version } => Ok(server_version),
                Response::Error { kind, message } => {
                    anyhow::bail!("handshake failed ({}): {}", kind.as_str(), message)
                }
                _ => anyhow::bail!("unexpected response"),
            }
        }

        pub async fn status(&mut self) -> anyhow::Result<(String, i64)> {
            match self.send(Request::Status).await? {
                Response::StatusAck { status, file_count } => Ok((status, file_count)),
                Response::Error { kind, message } => {
                    anyhow::bail!("status failed ({}): {}", kind.as_str(), message)
                }
                _ => anyhow::bail!("unexpected response"),
            }
        }

        pub async fn upload(
            &mut self,
            name: String,
            folder: String,
            owner: String,
            bytes: Vec<u8>,
        ) -> anyhow::Result<(FileEntry, bool, SpaceInfo)> {
            let request = Request::Upload {
                name,
                folder,
                owner,
                bytes,
            };
            match self.send(request).await? {
                Response::UploadAck {
                    file,
                    duplicate,
                    usage,
                } => Ok((file, duplicate, usage)),
                Response::Error { kind, message } => {
                    anyhow::bail!("upload failed ({}): {}", kind.as_str(), message)
                }
                _ => anyhow::bail!("unexpected response"),
            }
        }

        pub async fn delete(&mut self, file_id: i64, owner: String) -> anyhow::Result<()> {
            match self.send(Request::Delete { file_id, owner }).await? {
                Response::DeleteAck => Ok(()),
                Response::Error { kind, message } => {
                    anyhow::bail!("delete failed ({}): {}", kind.as_str(), message)
                }
                _ => anyhow::bail!("unexpected response"),
            }
        }

        pub async fn download(
            &mut self,
            file_id: i64,
            owner: String,
        ) -> anyhow::Result<(String, Vec<u8>)> {
            match self.send(Request::Download { file_id, owner }).await? {
                Response::DownloadAck { name, bytes } => Ok((name, bytes)),
                Response::Error { kind, message } => {
                    anyhow::bail!("download failed ({}): {}", kind.as_str(), message)
                }
                _ => anyhow::bail!("unexpected response"),
            }
        }

        pub async fn rename(
            &mut self,
            file_id: i64,
            owner: String,
            new_name: String,
        ) -> anyhow::Result<()> {
            let request = Request::Rename {
                file_id,
                owner,
                new_name,
            };
            match self.send(request).await? {
                Response::RenameAck => Ok(()),
                Response::Error { kind, message } => {
                    anyhow::bail!("rename failed ({}): {}", kind.as_str(), message)
                }
                _ => anyhow::bail!("unexpected response"),
            }
        }

        pub async fn move_to_folder(
            &mut self,
            file_id: i64,
            owner: String,
            folder: String,
        ) -> anyhow::Result<()> {
            let request = Request::Move {
                file_id,
                owner,
                folder,
            };
            match self.send(request).await? {
                Response::MoveAck => Ok(()),
                Response::Error { kind, message } => {
                    anyhow::bail!("move failed ({}): {}", kind.as_str(), message)
                }
                _ => anyhow::bail!("unexpected response"),
            }
        }

        pub async fn list(
            &mut self,
            owner: String,
            folder: Option<String>,
        ) -> anyhow::Result<Vec<FileEntry>> {
            match self.send(Request::List { owner, folder }).await? {
                Response::ListAck { files } => Ok(files),
                Response::Error { kind, message } => {
                    anyhow::bail!("list failed ({}): {}", kind.as_str(), message)
                }
                _ => anyhow::bail!("unexpected response"),
            }
        }

        pub async fn stats(&mut self, owner: Option<String>) -> anyhow::Result<SpaceInfo> {
            match self.send(Request::Stats { owner }).await? {
                Response::StatsAck { space } => Ok(space),
                Response::Error { kind, message } => {
                    anyhow::bail!("stats failed ({}): {}", kind.as_str(), message)
                }
                _ => anyhow::bail!("unexpected response"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_serialization() {
        let req = Request::Upload {
            name: "a.txt".into(),
            folder: "/".into(),
            owner: "alice".into(),
            bytes: vec![1, 2, 3],
        };
        let bytes = bincode::serialize(&req).unwrap();
        let decoded: Request = bincode::deserialize(&bytes).unwrap();
        assert!(matches!(decoded, Request::Upload { ref name, .. } if name == "a.txt"));
    }

    #[test]
    fn test_response_serialization() {
        let resp = Response::Error {
            kind: ErrorKind::Forbidden,
            message: "not yours".into(),
        };
        let bytes = bincode::serialize(&resp).unwrap();
        let decoded: Response = bincode::deserialize(&bytes).unwrap();
        assert!(matches!(
            decoded,
            Response::Error {
                kind: ErrorKind::Forbidden,
                ..
            }
        ));
    }

    #[test]
    fn test_error_kind_labels() {
        assert_eq!(ErrorKind::InvalidInput.as_str(), "invalid-input");
        assert_eq!(ErrorKind::NotFound.as_str(), "not-found");
        assert_eq!(ErrorKind::Forbidden.as_str(), "forbidden");
    }

    #[test]
    fn test_default_socket_path() {
        let path = default_socket_path();
        assert!(path.to_string_lossy().ends_with(".sock"));
    }

    #[tokio::test]
    async fn test_frame_roundtrip() {
        let (mut a, mut b) = tokio::io::duplex(1024);
        frame::write(&mut a, &Request::Status).await.unwrap();
        let decoded: Request = frame::read(&mut b).await.unwrap();
        assert!(matches!(decoded, Request::Status));
    }
}
