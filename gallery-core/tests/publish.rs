mod common;

use std::sync::Arc;

use async_trait::async_trait;

use gallery_core::publish::{decode_manifest, encode_manifest, PublishError, Publisher};
use gallery_core::store::{LocalStore, ObjectStore, StoreError, StoreResult, StoredObject};

use common::write_bytes;

fn output_tree() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    write_bytes(&dir.path().join("cover.webp"), b"RIFF-cover");
    write_bytes(&dir.path().join("trip/day one/clip.webm"), b"webm-bytes");
    write_bytes(&dir.path().join("trip/day one/clip.webp"), b"RIFF-thumb");
    write_bytes(&dir.path().join("trip/notes.txt"), b"hello");
    dir
}

#[tokio::test]
async fn publish_uploads_artifacts_then_manifest() {
    let output = output_tree();
    let bucket = tempfile::tempdir().unwrap();
    let store = Arc::new(LocalStore::new(bucket.path()));
    let publisher = Publisher::new(store.clone(), "data.json");

    let report = publisher.publish(output.path()).await.unwrap();
    assert_eq!(report.artifacts, 4);
    assert_eq!(
        report.uploaded,
        vec![
            "cover.webp",
            "trip/day one/clip.webm",
            "trip/day one/clip.webp",
            "trip/notes.txt"
        ]
    );
    assert!(report.failed.is_empty());
    assert!(report.manifest_uploaded);
    assert_eq!(report.manifest_path, output.path().join("data.json"));

    let remote = store.get("data.json").await.unwrap().unwrap();
    assert_eq!(remote.mime_type, "application/json");
    let artifacts = decode_manifest(&remote.bytes).unwrap();
    let local = std::fs::read(output.path().join("data.json")).unwrap();
    assert_eq!(decode_manifest(&local).unwrap(), artifacts);

    let clip = artifacts
        .iter()
        .find(|a| a.relative_path == "trip/day one/clip.webm")
        .unwrap();
    assert_eq!(clip.name, "clip.webm");
    assert_eq!(clip.size, 10);
    assert_eq!(clip.mime_type, "video/webm");
    assert_eq!(
        store.get("trip/notes.txt").await.unwrap().unwrap().bytes,
        b"hello"
    );
}

#[tokio::test]
async fn manifest_round_trip_keeps_keys_and_types() {
    let output = output_tree();
    let bucket = tempfile::tempdir().unwrap();
    let publisher = Publisher::new(Arc::new(LocalStore::new(bucket.path())), "data.json");

    let artifacts = publisher.collect(output.path()).await.unwrap();
    let decoded = decode_manifest(&encode_manifest(&artifacts).unwrap()).unwrap();
    assert_eq!(decoded.len(), artifacts.len());
    for (before, after) in artifacts.iter().zip(&decoded) {
        assert_eq!(before.relative_path, after.relative_path);
        assert_eq!(before.size, after.size);
        assert_eq!(before.mime_type, after.mime_type);
        assert!(!after.relative_path.contains('\\'));
    }
}

#[tokio::test]
async fn republish_never_overwrites() {
    let output = output_tree();
    let bucket = tempfile::tempdir().unwrap();
    let store = Arc::new(LocalStore::new(bucket.path()));
    let publisher = Publisher::new(store.clone(), "data.json");
    publisher.publish(output.path()).await.unwrap();

    write_bytes(&output.path().join("cover.webp"), b"RIFF-changed-locally");
    write_bytes(&output.path().join("late.webp"), b"RIFF-late");
    let report = publisher.publish(output.path()).await.unwrap();

    assert_eq!(report.artifacts, 5);
    assert_eq!(report.uploaded, vec!["late.webp"]);
    assert_eq!(report.already_present.len(), 4);
    assert!(!report.manifest_uploaded);
    assert_eq!(
        store.get("cover.webp").await.unwrap().unwrap().bytes,
        b"RIFF-cover"
    );
    let remote = decode_manifest(&store.get("data.json").await.unwrap().unwrap().bytes).unwrap();
    assert_eq!(remote.len(), 4);
    let local = decode_manifest(&std::fs::read(output.path().join("data.json")).unwrap()).unwrap();
    assert_eq!(local.len(), 5);
}

#[tokio::test]
async fn staging_files_and_manifest_are_not_artifacts() {
    let output = output_tree();
    write_bytes(&output.path().join(".cover.webp.k2j4h5g6f7.partial"), b"half");
    write_bytes(&output.path().join("data.json"), b"[]");
    let bucket = tempfile::tempdir().unwrap();
    let publisher = Publisher::new(Arc::new(LocalStore::new(bucket.path())), "data.json");

    let keys: Vec<String> = publisher
        .collect(output.path())
        .await
        .unwrap()
        .into_iter()
        .map(|a| a.relative_path)
        .collect();
    assert_eq!(
        keys,
        vec![
            "cover.webp",
            "trip/day one/clip.webm",
            "trip/day one/clip.webp",
            "trip/notes.txt"
        ]
    );
}

#[tokio::test]
async fn missing_output_root_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let publisher = Publisher::new(Arc::new(LocalStore::new(dir.path())), "data.json");
    let err = publisher
        .publish(&dir.path().join("missing"))
        .await
        .unwrap_err();
    assert!(matches!(err, PublishError::Enumeration(_)));
}

/// Local store whose writes fail for one key.
struct FlakyStore {
    inner: LocalStore,
    failing_key: &'static str,
}

#[async_trait]
impl ObjectStore for FlakyStore {
    async fn exists(&self, key: &str) -> StoreResult<bool> {
        self.inner.exists(key).await
    }

    async fn put(&self, key: &str, bytes: Vec<u8>, mime_type: &str) -> StoreResult<()> {
        if key == self.failing_key {
            return Err(StoreError::Status {
                key: key.to_string(),
                status: 503,
                body: "slow down".into(),
            });
        }
        self.inner.put(key, bytes, mime_type).await
    }

    async fn get(&self, key: &str) -> StoreResult<Option<StoredObject>> {
        self.inner.get(key).await
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        self.inner.delete(key).await
    }
}

#[tokio::test]
async fn upload_failure_is_recorded_and_run_continues() {
    let output = output_tree();
    let bucket = tempfile::tempdir().unwrap();
    let store = Arc::new(FlakyStore {
        inner: LocalStore::new(bucket.path()),
        failing_key: "trip/day one/clip.webm",
    });
    let publisher = Publisher::new(store.clone(), "data.json");

    let report = publisher.publish(output.path()).await.unwrap();
    assert_eq!(report.uploaded.len(), 3);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].key, "trip/day one/clip.webm");
    assert!(report.failed[0].error.contains("503"));
    assert!(report.manifest_uploaded);

    let manifest = decode_manifest(&store.get("data.json").await.unwrap().unwrap().bytes).unwrap();
    assert_eq!(manifest.len(), 4);
}

#[tokio::test]
async fn prune_deletes_listed_artifacts_by_extension() {
    let output = tempfile::tempdir().unwrap();
    write_bytes(&output.path().join("old/movie.mkv"), b"matroska");
    write_bytes(&output.path().join("old/movie.webm"), b"webm");
    write_bytes(&output.path().join("other.mkv"), b"matroska");
    let bucket = tempfile::tempdir().unwrap();
    let store = Arc::new(LocalStore::new(bucket.path()));
    let publisher = Publisher::new(store.clone(), "data.json");
    publisher.publish(output.path()).await.unwrap();

    let report = publisher.prune(".mkv").await.unwrap();
    assert_eq!(report.extension, "mkv");
    assert_eq!(report.deleted, vec!["old/movie.mkv", "other.mkv"]);
    assert!(report.failed.is_empty());
    assert!(!store.exists("old/movie.mkv").await.unwrap());
    assert!(!store.exists("other.mkv").await.unwrap());
    assert!(store.exists("old/movie.webm").await.unwrap());
}

#[tokio::test]
async fn prune_requires_remote_manifest() {
    let bucket = tempfile::tempdir().unwrap();
    let publisher = Publisher::new(Arc::new(LocalStore::new(bucket.path())), "data.json");
    let err = publisher.prune("mkv").await.unwrap_err();
    assert!(matches!(err, PublishError::ManifestMissing(key) if key == "data.json"));
}
