//! Uploader
//!
//! Copies every regular file of a snapshot tree to each configured target,
//! keyed as `prefix/relative/path`. Targets are independent: the first failed
//! object stops its own target, and the remaining targets are still attempted.

mod store;
#[cfg(feature = "s3")]
mod s3;

pub use store::{MemoryConnector, MemoryObjectStore, ObjectStore, StoreConnector};
#[cfg(feature = "s3")]
pub use s3::{S3Connector, S3ObjectStore};

use crate::config::UploadTarget;
use serde::Serialize;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

/// Errors raised while uploading
#[derive(Error, Debug)]
pub enum UploadError {
    /// No usable credentials for the target, or the service refused them
    #[error("Credentials unavailable for target '{target}': {message}")]
    CredentialsUnavailable { target: String, message: String },

    /// The tree root or a file under it is missing
    #[error("File not found: {}", path.display())]
    FileNotFound { path: PathBuf },

    /// The request never got a service response
    #[error("Network error uploading {uri}: {message}")]
    Network { uri: String, message: String },

    /// The service answered with an error
    #[error("Request to {uri} rejected: {message}")]
    Rejected { uri: String, message: String },

    /// The request could not be built
    #[error("Invalid request for {uri}: {message}")]
    InvalidRequest { uri: String, message: String },

    /// Local read failure other than a missing file
    #[error("Failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Serializable classification of an [`UploadError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadFailureKind {
    /// See [`UploadError::CredentialsUnavailable`]
    CredentialsUnavailable,
    /// See [`UploadError::FileNotFound`]
    FileNotFound,
    /// See [`UploadError::Network`]
    Network,
    /// See [`UploadError::Rejected`]
    Rejected,
    /// See [`UploadError::InvalidRequest`]
    InvalidRequest,
    /// See [`UploadError::Io`]
    Io,
}

impl UploadError {
    /// Payload-free classification for reports
    pub fn kind(&self) -> UploadFailureKind {
        match self {
            UploadError::CredentialsUnavailable { .. } => UploadFailureKind::CredentialsUnavailable,
            UploadError::FileNotFound { .. } => UploadFailureKind::FileNotFound,
            UploadError::Network { .. } => UploadFailureKind::Network,
            UploadError::Rejected { .. } => UploadFailureKind::Rejected,
            UploadError::InvalidRequest { .. } => UploadFailureKind::InvalidRequest,
            UploadError::Io { .. } => UploadFailureKind::Io,
        }
    }
}

/// A file of the snapshot tree scheduled for upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalFile {
    /// Absolute path on disk
    pub path: PathBuf,
    /// Path relative to the tree root, `/`-separated
    pub relative: String,
}

/// One object written to a target
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UploadedObject {
    /// Local file that was sent
    pub source: PathBuf,
    /// Object key in the bucket
    pub key: String,
    /// `s3://bucket/key`
    pub uri: String,
}

/// Outcome for one target
#[derive(Debug, Clone, Serialize)]
pub struct TargetReport {
    /// Target name
    pub target: String,
    /// Destination bucket
    pub bucket: String,
    /// Prefix the keys were written under
    pub prefix: String,
    /// Objects stored before the target finished or failed
    pub uploaded: Vec<UploadedObject>,
    /// Failure message, `None` on success
    pub error: Option<String>,
    /// Classification of `error`
    pub failure: Option<UploadFailureKind>,
    /// Keys found under the prefix afterwards, when listing is enabled
    pub listed: Option<usize>,
}

impl TargetReport {
    fn new(target: &UploadTarget, prefix: &str) -> Self {
        Self {
            target: target.name.clone(),
            bucket: target.bucket.clone(),
            prefix: prefix.to_string(),
            uploaded: Vec::new(),
            error: None,
            failure: None,
            listed: None,
        }
    }

    fn fail(&mut self, err: &UploadError) {
        self.error = Some(err.to_string());
        self.failure = Some(err.kind());
    }

    /// True when every file reached this target
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// Outcome for all targets
#[derive(Debug, Clone, Default, Serialize)]
pub struct UploadReport {
    /// Regular files found under the root
    pub files_found: usize,
    /// One entry per target, in configuration order
    pub targets: Vec<TargetReport>,
}

impl UploadReport {
    /// True when every target succeeded
    pub fn all_succeeded(&self) -> bool {
        self.targets.iter().all(TargetReport::succeeded)
    }

    /// Names of the targets that failed
    pub fn failed_targets(&self) -> Vec<&str> {
        self.targets
            .iter()
            .filter(|t| !t.succeeded())
            .map(|t| t.target.as_str())
            .collect()
    }

    /// Report for the target called `name`
    pub fn target(&self, name: &str) -> Option<&TargetReport> {
        self.targets.iter().find(|t| t.target == name)
    }
}

/// Build the object key for a file: `prefix/relative`.
///
/// A trailing `/` on the prefix is not doubled and an empty prefix yields the
/// bare relative path.
pub fn object_key(prefix: &str, relative: &str) -> String {
    let prefix = prefix.trim_end_matches('/');
    if prefix.is_empty() {
        relative.to_string()
    } else {
        format!("{}/{}", prefix, relative)
    }
}

fn relative_key(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    Some(parts.join("/"))
}

/// Every regular file under `root`, in a stable order.
pub async fn list_files(root: &Path) -> Result<Vec<LocalFile>, UploadError> {
    let root = root.to_path_buf();
    let task_root = root.clone();
    tokio::task::spawn_blocking(move || {
        let root = task_root;
        let mut files = Vec::new();
        for entry in WalkDir::new(&root).min_depth(1).sort_by_file_name() {
            let entry = entry.map_err(|e| {
                let path = e.path().unwrap_or(root.as_path()).to_path_buf();
                store::read_error(&path, e.into())
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            if let Some(relative) = relative_key(&root, entry.path()) {
                files.push(LocalFile {
                    path: entry.path().to_path_buf(),
                    relative,
                });
            }
        }
        Ok::<_, UploadError>(files)
    })
    .await
    .map_err(|e| UploadError::Io {
        path: root,
        source: io::Error::other(e),
    })?
}

/// Uploads a snapshot tree to every target
pub struct Uploader<'a> {
    connector: &'a dyn StoreConnector,
    list_after_upload: bool,
}

impl<'a> Uploader<'a> {
    /// Uploader connecting targets through `connector`
    pub fn new(connector: &'a dyn StoreConnector) -> Self {
        Self {
            connector,
            list_after_upload: false,
        }
    }

    /// List each target's prefix once its upload finishes
    pub fn with_list_after_upload(mut self, enabled: bool) -> Self {
        self.list_after_upload = enabled;
        self
    }

    /// Upload every file under `root` to each target.
    ///
    /// Only a failure to enumerate `root` is returned as an error; per-target
    /// failures are recorded in the report.
    pub async fn upload(
        &self,
        root: &Path,
        run_prefix: &str,
        targets: &[UploadTarget],
    ) -> Result<UploadReport, UploadError> {
        let files = list_files(root).await?;
        if files.is_empty() {
            warn!(root = %root.display(), "No files found to upload");
        } else {
            info!(root = %root.display(), files = files.len(), "Found files to upload");
        }

        let mut report = UploadReport {
            files_found: files.len(),
            targets: Vec::with_capacity(targets.len()),
        };

        for target in targets {
            let target_report = self.upload_target(&files, run_prefix, target).await;
            report.targets.push(target_report);
        }

        Ok(report)
    }

    async fn upload_target(
        &self,
        files: &[LocalFile],
        run_prefix: &str,
        target: &UploadTarget,
    ) -> TargetReport {
        let prefix = target.effective_prefix(run_prefix);
        let mut report = TargetReport::new(target, prefix);

        info!(
            destination = %target.name,
            bucket = %target.bucket,
            prefix = %prefix,
            endpoint = ?target.endpoint_url,
            "Starting upload"
        );

        let store = match self.connector.connect(target).await {
            Ok(store) => store,
            Err(e) => {
                error!(destination = %target.name, error = %e, "Failed to connect to target");
                report.fail(&e);
                return report;
            }
        };

        for file in files {
            let key = object_key(prefix, &file.relative);
            let uri = format!("{}/{}", target.base_uri(), key);
            debug!(source = %file.path.display(), %uri, "Uploading");

            if let Err(e) = store.put_file(&key, &file.path).await {
                error!(destination = %target.name, source = %file.path.display(), error = %e, "Upload failed");
                report.fail(&e);
                return report;
            }

            info!(source = %file.path.display(), %uri, "Uploaded");
            report.uploaded.push(UploadedObject {
                source: file.path.clone(),
                key,
                uri,
            });
        }

        info!(destination = %target.name, objects = report.uploaded.len(), "Upload completed");

        if self.list_after_upload {
            match store.list_prefix(&object_key(prefix, "")).await {
                Ok(keys) => {
                    info!(destination = %target.name, count = keys.len(), "Objects under prefix");
                    for key in &keys {
                        debug!(destination = %target.name, "{}/{}", target.base_uri(), key);
                    }
                    report.listed = Some(keys.len());
                }
                Err(e) => warn!(destination = %target.name, error = %e, "Failed to list uploaded objects"),
            }
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_object_key_joins_with_single_slash() {
        assert_eq!(object_key("backup_1", "etcd-backup/etcd/name"), "backup_1/etcd-backup/etcd/name");
        assert_eq!(object_key("backup_1/", "k8s-resources.yaml"), "backup_1/k8s-resources.yaml");
        assert_eq!(object_key("", "k8s-resources.yaml"), "k8s-resources.yaml");
    }

    #[test]
    fn test_relative_key_uses_forward_slashes() {
        let root = Path::new("/tmp/b1");
        let path = root.join("manifests-backup").join("manifests").join("ccm.yaml");
        assert_eq!(
            relative_key(root, &path).as_deref(),
            Some("manifests-backup/manifests/ccm.yaml")
        );
        assert_eq!(relative_key(root, Path::new("/elsewhere/x")), None);
    }

    #[test]
    fn test_error_kinds() {
        let err = UploadError::Rejected {
            uri: "s3://b/k".to_string(),
            message: "NoSuchBucket".to_string(),
        };
        assert_eq!(err.kind(), UploadFailureKind::Rejected);
    }

    proptest! {
        #[test]
        fn prop_object_key_keeps_prefix_and_path(
            prefix in "[a-z0-9_]{1,12}",
            relative in "[a-z0-9]{1,8}(/[a-z0-9.]{1,8}){0,3}",
        ) {
            let key = object_key(&prefix, &relative);
            prop_assert!(key.starts_with(&prefix));
            prop_assert!(key.ends_with(&relative));
            prop_assert_eq!(key.len(), prefix.len() + 1 + relative.len());
            prop_assert!(!key.contains("//"));
        }
    }
}
