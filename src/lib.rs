//! # k3s-backup
//!
//! Recurring backup pipeline for a single-node k3s cluster.
//!
//! ## Overview
//!
//! One run snapshots the cluster into a fixed directory layout and then copies
//! every file of that tree to one or more S3-compatible object stores:
//!
//! ```text
//! <local root>/
//!   k8s-resources.yaml
//!   etcd-backup/etcd/...
//!   manifests-backup/manifests/...
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use k3s_backup::config::{BackupConfig, UploadTarget};
//! use k3s_backup::pipeline::BackupRun;
//! use k3s_backup::snapshot::KubectlClient;
//! use k3s_backup::upload::MemoryConnector;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = BackupConfig::new("/var/backups/k3s/run-1", "backup_2024-01-01_00-00-00")
//!     .with_target(UploadTarget::new("aws", "my-backups").with_profile("default"));
//!
//! let run = BackupRun::new(config)?;
//! let report = run
//!     .execute(&KubectlClient::default(), &MemoryConnector::new())
//!     .await?;
//! println!("{:?}", report.outcome());
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`config`]: run configuration and upload targets
//! - [`layout`]: the fixed on-disk snapshot layout
//! - [`snapshot`]: etcd, manifests and cluster-state snapshot steps
//! - [`upload`]: object-store abstraction and the multi-target uploader
//! - [`pipeline`]: the snapshot-then-upload run and its report

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

use thiserror::Error;

/// Result type for backup operations
pub type Result<T> = std::result::Result<T, BackupError>;

/// Main error type for backup operations
#[derive(Error, Debug)]
pub enum BackupError {
    /// Invalid or incomplete run configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// A snapshot step failed
    #[error("Snapshot error: {0}")]
    Snapshot(#[from] snapshot::SnapshotError),

    /// An upload to an object store failed
    #[error("Upload error: {0}")]
    Upload(#[from] upload::UploadError),

    /// Filesystem error outside a snapshot step
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Report serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Join error from blocking tasks
    #[error("Async join error: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Run configuration and upload targets
pub mod config;

/// Fixed snapshot directory layout
pub mod layout;

/// Snapshot steps
pub mod snapshot;

/// Object storage and uploader
pub mod upload;

/// Snapshot-then-upload pipeline
pub mod pipeline;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_carries_context() {
        let err = BackupError::Config("local backup path is empty".to_string());
        assert_eq!(err.to_string(), "Configuration error: local backup path is empty");
    }

    #[test]
    fn test_upload_error_converts() {
        let err: BackupError = upload::UploadError::CredentialsUnavailable {
            target: "aws".to_string(),
            message: "profile not found".to_string(),
        }
        .into();
        assert!(matches!(err, BackupError::Upload(_)));
    }
}
