//! End-to-end dedup behavior of the store engine.

use std::sync::Arc;

use depot_store::{IngestOutcome, Store, UploadMeta};
use tempfile::TempDir;

async fn open_store(temp: &TempDir) -> Store {
    Store::open(temp.path().join("blobs"), temp.path().join("depot.db"))
        .await
        .unwrap()
}

/// The canonical lifecycle: original upload, duplicate upload, staggered
/// deletes. Physical bytes survive until the last reference goes.
#[tokio::test]
async fn test_report_pdf_lifecycle() {
    let temp = TempDir::new().unwrap();
    let store = open_store(&temp).await;
    let payload = vec![0xABu8; 1000];

    let original = store
        .ingest(
            &payload,
            UploadMeta {
                name: "report.pdf",
                folder: "/",
                owner: "alice",
            },
        )
        .await
        .unwrap();
    assert_eq!(original.outcome, IngestOutcome::Original);

    let savings = store.space_saved().await.unwrap();
    assert_eq!(savings.saved_bytes, 0);

    let copy = store
        .ingest(
            &payload,
            UploadMeta {
                name: "report_copy.pdf",
                folder: "/",
                owner: "alice",
            },
        )
        .await
        .unwrap();
    assert_eq!(copy.outcome, IngestOutcome::Duplicate);

    let savings = store.space_saved().await.unwrap();
    assert_eq!(savings.saved_bytes, 1000);
    assert_eq!(savings.logical_bytes, 2000);
    assert!((savings.percent - 50.0).abs() < 1e-9);

    // Delete the original; the duplicate must still download.
    store.delete(original.file.id, "alice").await.unwrap();
    let (_, bytes) = store.download(copy.file.id, "alice").await.unwrap();
    assert_eq!(bytes, payload);

    // Delete the last reference; the bytes are gone.
    store.delete(copy.file.id, "alice").await.unwrap();
    let savings = store.space_saved().await.unwrap();
    assert_eq!(savings.physical_bytes, 0);
    assert_eq!(savings.logical_bytes, 0);
    assert_eq!(savings.percent, 0.0);
}

/// N identical uploads of size S save exactly (N-1)*S bytes at
/// (N-1)/N percent.
#[tokio::test]
async fn test_space_saved_formula() {
    let temp = TempDir::new().unwrap();
    let store = open_store(&temp).await;
    let payload = vec![5u8; 256];
    let n = 4u64;

    for i in 0..n {
        let name = format!("copy_{}.bin", i);
        store
            .ingest(
                &payload,
                UploadMeta {
                    name: &name,
                    folder: "/",
                    owner: "alice",
                },
            )
            .await
            .unwrap();
    }

    let savings = store.space_saved().await.unwrap();
    assert_eq!(savings.saved_bytes, (n - 1) * 256);
    let expected_pct = (n - 1) as f64 / n as f64 * 100.0;
    assert!((savings.percent - expected_pct).abs() < 1e-9);
}

/// Concurrent first-seen ingest of identical content must converge on one
/// stored object with all uploads accounted for, never two objects.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_ingest_of_identical_content() {
    let temp = TempDir::new().unwrap();
    let store = Arc::new(open_store(&temp).await);
    let payload = vec![0x42u8; 2048];
    let tasks = 8;

    let handles: Vec<_> = (0..tasks)
        .map(|i| {
            let store = Arc::clone(&store);
            let payload = payload.clone();
            tokio::spawn(async move {
                let name = format!("upload_{}.bin", i);
                store
                    .ingest(
                        &payload,
                        UploadMeta {
                            name: &name,
                            folder: "/",
                            owner: "alice",
                        },
                    )
                    .await
                    .unwrap()
            })
        })
        .collect();

    let mut originals = 0;
    let mut duplicates = 0;
    for handle in handles {
        match handle.await.unwrap().outcome {
            IngestOutcome::Original => originals += 1,
            IngestOutcome::Duplicate => duplicates += 1,
        }
    }

    // Exactly one upload won the insert; everyone else incremented.
    assert_eq!(originals, 1);
    assert_eq!(duplicates, tasks - 1);

    let savings = store.space_saved().await.unwrap();
    assert_eq!(savings.physical_bytes, 2048);
    assert_eq!(savings.logical_bytes, 2048 * tasks as u64);
    assert_eq!(store.file_count().await.unwrap(), tasks as i64);
}

/// Concurrent deletes of files sharing one object must not lose updates:
/// the object disappears exactly when the last reference does.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_delete_of_shared_object() {
    let temp = TempDir::new().unwrap();
    let store = Arc::new(open_store(&temp).await);
    let payload = vec![0x17u8; 512];

    let mut ids = Vec::new();
    for i in 0..6 {
        let name = format!("f{}.bin", i);
        let receipt = store
            .ingest(
                &payload,
                UploadMeta {
                    name: &name,
                    folder: "/",
                    owner: "alice",
                },
            )
            .await
            .unwrap();
        ids.push(receipt.file.id);
    }

    let handles: Vec<_> = ids
        .into_iter()
        .map(|id| {
            let store = Arc::clone(&store);
            tokio::spawn(async move { store.delete(id, "alice").await })
        })
        .collect();

    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let savings = store.space_saved().await.unwrap();
    assert_eq!(savings.physical_bytes, 0);
    assert_eq!(store.file_count().await.unwrap(), 0);
}
