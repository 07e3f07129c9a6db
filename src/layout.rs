use std::path::{Path, PathBuf};

/// Directory holding the etcd copy, relative to the root
pub const ETCD_BACKUP_DIR: &str = "etcd-backup";

/// Directory holding the manifests copy, relative to the root
pub const MANIFESTS_BACKUP_DIR: &str = "manifests-backup";

/// Cluster resource dump, relative to the root
pub const RESOURCES_FILE: &str = "k8s-resources.yaml";

/// Paths of one snapshot tree. The layout is fixed; only the root varies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotLayout {
    root: PathBuf,
}

impl SnapshotLayout {
    /// Layout rooted at `root`. Nothing is created on disk.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Local root the tree is written under
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `<root>/etcd-backup`, owned by the etcd step
    pub fn etcd_backup_dir(&self) -> PathBuf {
        self.root.join(ETCD_BACKUP_DIR)
    }

    /// `<root>/manifests-backup`, owned by the manifests step
    pub fn manifests_backup_dir(&self) -> PathBuf {
        self.root.join(MANIFESTS_BACKUP_DIR)
    }

    /// True when `name` is a top-level entry one of the steps writes
    pub fn owns_entry(name: &str) -> bool {
        matches!(name, ETCD_BACKUP_DIR | MANIFESTS_BACKUP_DIR | RESOURCES_FILE)
    }

    /// `<root>/etcd-backup/etcd`
    pub fn etcd_dir(&self) -> PathBuf {
        self.etcd_backup_dir().join("etcd")
    }

    /// `<root>/manifests-backup/manifests`
    pub fn manifests_dir(&self) -> PathBuf {
        self.manifests_backup_dir().join("manifests")
    }

    /// `<root>/k8s-resources.yaml`
    pub fn resources_file(&self) -> PathBuf {
        self.root.join(RESOURCES_FILE)
    }
}
