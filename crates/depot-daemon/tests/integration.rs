//! Integration tests for depot-daemon
//!
//! Each test boots a daemon on a scratch socket, drives it with the
//! protocol client, and checks the dedup behavior end to end.

use std::time::Duration;

use depot_daemon::{run_daemon, DaemonConfig};
use depot_ipc::client::Client;
use tempfile::TempDir;

async fn start_daemon(temp: &TempDir) -> (tokio::task::JoinHandle<()>, std::path::PathBuf) {
    let socket_path = temp.path().join("depotd.sock");
    let config = DaemonConfig {
        socket_path: socket_path.clone(),
        blob_root: temp.path().join("blobs"),
        db_path: temp.path().join("depot.db"),
        max_upload_bytes: 1024 * 1024,
    };

    let handle = tokio::spawn(async move {
        let _ = run_daemon(config).await;
    });

    // Wait for the socket to come up.
    for _ in 0..100 {
        if socket_path.exists() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    (handle, socket_path)
}

#[tokio::test]
async fn test_handshake_and_status() {
    let temp = TempDir::new().unwrap();
    let (daemon, socket_path) = start_daemon(&temp).await;

    let mut client = Client::connect_to(&socket_path).await.unwrap();
    let server_version = client.handshake().await.unwrap();
    assert!(!server_version.is_empty());

    let (status, file_count) = client.status().await.unwrap();
    assert_eq!(status, "ready");
    assert_eq!(file_count, 0);

    daemon.abort();
}

#[tokio::test]
async fn test_upload_dedup_over_socket() {
    let temp = TempDir::new().unwrap();
    let (daemon, socket_path) = start_daemon(&temp).await;

    let mut client = Client::connect_to(&socket_path).await.unwrap();
    let payload = vec![3u8; 1000];

    let (first, duplicate, usage) = client
        .upload(
            "report.pdf".into(),
            "/".into(),
            "alice".into(),
            payload.clone(),
        )
        .await
        .unwrap();
    assert!(!duplicate);
    assert!(!first.is_reference);
    assert_eq!(usage.logical_bytes, 1000);
    assert_eq!(usage.saved_bytes, 0);

    let (second, duplicate, usage) = client
        .upload(
            "report_copy.pdf".into(),
            "/".into(),
            "alice".into(),
            payload.clone(),
        )
        .await
        .unwrap();
    assert!(duplicate);
    assert!(second.is_reference);
    assert_eq!(second.digest, first.digest);
    assert_eq!(usage.logical_bytes, 2000);
    assert_eq!(usage.saved_bytes, 1000);

    let space = client.stats(None).await.unwrap();
    assert_eq!(space.physical_bytes, 1000);
    assert_eq!(space.saved_bytes, 1000);
    assert!((space.percent - 50.0).abs() < 1e-9);

    daemon.abort();
}

#[tokio::test]
async fn test_delete_and_download_over_socket() {
    let temp = TempDir::new().unwrap();
    let (daemon, socket_path) = start_daemon(&temp).await;

    let mut client = Client::connect_to(&socket_path).await.unwrap();
    let payload = b"shared bytes".to_vec();

    let (first, _, _) = client
        .upload("a.bin".into(), "/".into(), "alice".into(), payload.clone())
        .await
        .unwrap();
    let (second, _, _) = client
        .upload("b.bin".into(), "/".into(), "alice".into(), payload.clone())
        .await
        .unwrap();

    // Deleting one duplicate leaves the other readable.
    client.delete(first.id, "alice".into()).await.unwrap();
    let (name, bytes) = client.download(second.id, "alice".into()).await.unwrap();
    assert_eq!(name, "b.bin");
    assert_eq!(bytes, payload);

    client.delete(second.id, "alice".into()).await.unwrap();
    let space = client.stats(None).await.unwrap();
    assert_eq!(space.physical_bytes, 0);

    daemon.abort();
}

#[tokio::test]
async fn test_error_classification_over_socket() {
    let temp = TempDir::new().unwrap();
    let (daemon, socket_path) = start_daemon(&temp).await;

    let mut client = Client::connect_to(&socket_path).await.unwrap();

    // Empty payload.
    let err = client
        .upload("empty.bin".into(), "/".into(), "alice".into(), Vec::new())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("invalid-input"));

    // Unknown id.
    let err = client.delete(999, "alice".into()).await.unwrap_err();
    assert!(err.to_string().contains("not-found"));

    // Wrong owner.
    let (file, _, _) = client
        .upload("mine.txt".into(), "/".into(), "alice".into(), b"x".to_vec())
        .await
        .unwrap();
    let err = client.delete(file.id, "mallory".into()).await.unwrap_err();
    assert!(err.to_string().contains("forbidden"));

    daemon.abort();
}

#[tokio::test]
async fn test_rename_move_list_over_socket() {
    let temp = TempDir::new().unwrap();
    let (daemon, socket_path) = start_daemon(&temp).await;

    let mut client = Client::connect_to(&socket_path).await.unwrap();

    let (file, _, _) = client
        .upload("draft.txt".into(), "/".into(), "alice".into(), b"v1".to_vec())
        .await
        .unwrap();

    client
        .rename(file.id, "alice".into(), "final.txt".into())
        .await
        .unwrap();
    client
        .move_to_folder(file.id, "alice".into(), "/docs".into())
        .await
        .unwrap();

    let in_docs = client
        .list("alice".into(), Some("/docs".into()))
        .await
        .unwrap();
    assert_eq!(in_docs.len(), 1);
    assert_eq!(in_docs[0].name, "final.txt");

    let at_root = client.list("alice".into(), Some("/".into())).await.unwrap();
    assert!(at_root.is_empty());

    daemon.abort();
}
