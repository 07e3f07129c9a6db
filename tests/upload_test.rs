// Integration tests for the Uploader
// Runs against in-memory object stores; real S3 is exercised only through the binary

use k3s_backup::config::UploadTarget;
use k3s_backup::upload::{
    list_files, MemoryConnector, MemoryObjectStore, UploadFailureKind, Uploader,
};
use pretty_assertions::assert_eq;
use std::fs;
use std::path::Path;
use tempfile::{tempdir, TempDir};

fn snapshot_tree() -> TempDir {
    let root = tempdir().expect("tree root");
    let files: &[(&str, &str)] = &[
        ("k8s-resources.yaml", "sample k8s resources data"),
        ("etcd-backup/etcd/name", "sample etcd name data"),
        ("manifests-backup/manifests/ccm.yaml", "sample ccm data"),
        ("manifests-backup/manifests/coredns.yaml", "sample coredns data"),
        (
            "manifests-backup/manifests/metrics-server/auth-reader.yaml",
            "sample auth reader data",
        ),
    ];
    for (relative, content) in files {
        let path = root.path().join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }
    root
}

fn expected_keys(prefix: &str) -> Vec<String> {
    [
        "etcd-backup/etcd/name",
        "k8s-resources.yaml",
        "manifests-backup/manifests/ccm.yaml",
        "manifests-backup/manifests/coredns.yaml",
        "manifests-backup/manifests/metrics-server/auth-reader.yaml",
    ]
    .iter()
    .map(|r| format!("{}/{}", prefix, r))
    .collect()
}

async fn assert_store_mirrors_tree(store: &MemoryObjectStore, root: &Path, prefix: &str) {
    let objects = store.objects().await;
    assert_eq!(objects.keys().cloned().collect::<Vec<_>>(), expected_keys(prefix));
    for (key, data) in objects {
        let relative = key.strip_prefix(&format!("{}/", prefix)).unwrap();
        assert_eq!(data, fs::read(root.join(relative)).unwrap(), "content of {key}");
    }
}

#[tokio::test]
async fn test_list_files_skips_directories() {
    let tree = snapshot_tree();
    fs::create_dir_all(tree.path().join("etcd-backup/etcd/member/wal")).unwrap();

    let files = list_files(tree.path()).await.unwrap();
    let relative: Vec<_> = files.iter().map(|f| f.relative.as_str()).collect();

    assert_eq!(relative.len(), 5);
    assert!(relative.contains(&"etcd-backup/etcd/name"));
    assert!(!relative.iter().any(|r| r.ends_with("wal")));
}

#[tokio::test]
async fn test_upload_round_trips_content() {
    let tree = snapshot_tree();
    let connector = MemoryConnector::new();
    let targets = vec![UploadTarget::new("aws", "k3s-backups")];

    let report = Uploader::new(&connector)
        .upload(tree.path(), "backup_2024-01-01_00-00-00", &targets)
        .await
        .expect("upload failed");

    assert!(report.all_succeeded());
    assert_eq!(report.files_found, 5);
    let aws = report.target("aws").unwrap();
    assert_eq!(aws.uploaded.len(), 5);
    assert!(aws
        .uploaded
        .iter()
        .any(|o| o.uri == "s3://k3s-backups/backup_2024-01-01_00-00-00/k8s-resources.yaml"));

    let store = connector.store("aws").unwrap();
    assert_store_mirrors_tree(&store, tree.path(), "backup_2024-01-01_00-00-00").await;
}

#[tokio::test]
async fn test_reupload_is_idempotent() {
    let tree = snapshot_tree();
    let connector = MemoryConnector::new();
    let targets = vec![UploadTarget::new("aws", "k3s-backups")];
    let uploader = Uploader::new(&connector);

    uploader.upload(tree.path(), "run", &targets).await.unwrap();
    let first = connector.store("aws").unwrap().objects().await;

    uploader.upload(tree.path(), "run", &targets).await.unwrap();
    let store = connector.store("aws").unwrap();

    assert_eq!(store.objects().await, first);
    assert_eq!(store.put_count(), 10);
}

#[tokio::test]
async fn test_two_targets_both_receive_every_file() {
    let tree = snapshot_tree();
    let connector = MemoryConnector::new();
    let targets = vec![
        UploadTarget::new("aws", "k3s-backups").with_profile("default"),
        UploadTarget::new("wasabi", "k3s-backups")
            .with_profile("wasabi")
            .with_region("us-east-1")
            .with_endpoint("https://s3.wasabisys.com"),
    ];

    let report = Uploader::new(&connector)
        .upload(tree.path(), "run", &targets)
        .await
        .unwrap();

    assert!(report.all_succeeded());
    for name in ["aws", "wasabi"] {
        let store = connector.store(name).unwrap();
        assert_store_mirrors_tree(&store, tree.path(), "run").await;
    }
}

#[tokio::test]
async fn test_failing_target_does_not_block_the_other() {
    let tree = snapshot_tree();
    let connector = MemoryConnector::new().with_store("aws", MemoryObjectStore::failing_after(2));
    let targets = vec![
        UploadTarget::new("aws", "k3s-backups"),
        UploadTarget::new("wasabi", "k3s-backups"),
    ];

    let report = Uploader::new(&connector)
        .upload(tree.path(), "run", &targets)
        .await
        .unwrap();

    assert_eq!(report.failed_targets(), vec!["aws"]);
    let aws = report.target("aws").unwrap();
    assert_eq!(aws.uploaded.len(), 2);
    assert_eq!(aws.failure, Some(UploadFailureKind::Network));

    let wasabi = connector.store("wasabi").unwrap();
    assert_store_mirrors_tree(&wasabi, tree.path(), "run").await;
}

#[tokio::test]
async fn test_missing_profile_uploads_nothing() {
    let tree = snapshot_tree();
    let connector = MemoryConnector::new().with_known_profiles(["default"]);
    let targets = vec![UploadTarget::new("aws", "k3s-backups").with_profile("absent")];

    let report = Uploader::new(&connector)
        .upload(tree.path(), "run", &targets)
        .await
        .unwrap();

    let aws = report.target("aws").unwrap();
    assert_eq!(aws.failure, Some(UploadFailureKind::CredentialsUnavailable));
    assert!(aws.uploaded.is_empty());
    assert!(connector.store("aws").is_none());
}

#[tokio::test]
async fn test_target_prefix_override_and_listing() {
    let tree = snapshot_tree();
    let connector = MemoryConnector::new();
    let targets = vec![UploadTarget::new("aws", "b").with_prefix("pinned/")];

    let report = Uploader::new(&connector)
        .with_list_after_upload(true)
        .upload(tree.path(), "run", &targets)
        .await
        .unwrap();

    let aws = report.target("aws").unwrap();
    assert_eq!(aws.listed, Some(5));
    assert!(aws.uploaded.iter().all(|o| o.key.starts_with("pinned/")));
    assert!(aws.uploaded.iter().all(|o| !o.key.contains("//")));
}

#[tokio::test]
async fn test_missing_root_is_an_error() {
    let connector = MemoryConnector::new();
    let targets = vec![UploadTarget::new("aws", "b")];

    let err = Uploader::new(&connector)
        .upload(Path::new("/nonexistent/k3s-backup"), "run", &targets)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), UploadFailureKind::FileNotFound);
}
