//! Snapshot steps
//!
//! Each step writes into a disjoint part of the [`SnapshotLayout`]. The
//! [`Snapshotter`] attempts all three and reports each one separately, so a
//! failed etcd copy does not hide whether the manifests and the resource dump
//! were captured.

mod cluster;
mod copy;

pub use cluster::{ClusterClient, KubectlClient, StaticClusterClient};

use crate::config::{EtcdSource, SnapshotSources};
use crate::layout::SnapshotLayout;
use serde::Serialize;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Instant;
use thiserror::Error;
use tokio::fs;
use tokio::process::Command;
use tracing::{error, info};

/// Errors raised by a snapshot step
#[derive(Error, Debug)]
pub enum SnapshotError {
    /// A source path exists but cannot be read
    #[error("Permission denied reading {}", path.display())]
    PermissionDenied {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A source path does not exist or is not a directory
    #[error("Path not found: {}", path.display())]
    PathNotFound { path: PathBuf },

    /// Any other read failure on a source
    #[error("Failed to read {}: {source}", path.display())]
    ReadError {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The resource export could not reach the cluster
    #[error("Cluster API unavailable: {0}")]
    ApiUnavailable(String),

    /// Writing under the local root failed
    #[error("Failed to write {}: {source}", path.display())]
    WriteError {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// An external command could not start or exited non-zero
    #[error("Command `{command}` failed: {message}")]
    CommandFailed { command: String, message: String },

    /// A blocking filesystem task panicked or was cancelled
    #[error("Snapshot task aborted: {0}")]
    Aborted(String),
}

/// The three parts of a snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotStep {
    /// etcd data into `etcd-backup/etcd/`
    Etcd,
    /// Control-plane manifests into `manifests-backup/manifests/`
    Manifests,
    /// Live resources into `k8s-resources.yaml`
    ClusterState,
}

impl fmt::Display for SnapshotStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SnapshotStep::Etcd => "etcd",
            SnapshotStep::Manifests => "manifests",
            SnapshotStep::ClusterState => "cluster-state",
        };
        f.write_str(name)
    }
}

/// Result of one step
#[derive(Debug, Clone, Serialize)]
pub struct StepReport {
    /// Which step ran
    pub step: SnapshotStep,
    /// Files the step left under the root
    pub files_written: usize,
    /// Wall-clock time spent in the step
    pub duration_ms: u64,
    /// Failure message, `None` on success
    pub error: Option<String>,
}

impl StepReport {
    /// True when the step finished without error
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// Result of a full snapshot
#[derive(Debug, Clone, Default, Serialize)]
pub struct SnapshotReport {
    /// One entry per step, in execution order
    pub steps: Vec<StepReport>,
}

impl SnapshotReport {
    /// True when every step succeeded
    pub fn is_complete(&self) -> bool {
        self.steps.iter().all(StepReport::succeeded)
    }

    /// True when at least one step wrote something usable
    pub fn produced_anything(&self) -> bool {
        self.steps.iter().any(|s| s.succeeded() && s.files_written > 0)
    }

    /// Steps that returned an error
    pub fn failed_steps(&self) -> Vec<SnapshotStep> {
        self.steps
            .iter()
            .filter(|s| !s.succeeded())
            .map(|s| s.step)
            .collect()
    }
}

/// Populates a [`SnapshotLayout`] from the configured sources
pub struct Snapshotter<'a> {
    sources: &'a SnapshotSources,
    cluster: &'a dyn ClusterClient,
}

impl<'a> Snapshotter<'a> {
    /// Snapshotter reading from `sources` and exporting through `cluster`
    pub fn new(sources: &'a SnapshotSources, cluster: &'a dyn ClusterClient) -> Self {
        Self { sources, cluster }
    }

    /// Capture etcd state into `etcd-backup/etcd/`, replacing any earlier copy.
    pub async fn snapshot_etcd(&self, layout: &SnapshotLayout) -> Result<usize, SnapshotError> {
        clear(layout.etcd_backup_dir()).await?;
        let dest = layout.etcd_dir();
        match &self.sources.etcd {
            EtcdSource::Copy { data_dir } => copy_dir(data_dir, &dest).await,
            EtcdSource::K3sSnapshot { binary } => k3s_etcd_snapshot(binary, &dest).await,
        }
    }

    /// Copy the control-plane manifests into `manifests-backup/manifests/`,
    /// replacing any earlier copy.
    pub async fn snapshot_manifests(&self, layout: &SnapshotLayout) -> Result<usize, SnapshotError> {
        clear(layout.manifests_backup_dir()).await?;
        copy_dir(&self.sources.manifests_dir, &layout.manifests_dir()).await
    }

    /// Write the live resource dump to `k8s-resources.yaml`, verbatim.
    ///
    /// A dump left by an earlier run is removed first, so a failed export
    /// never leaves stale state behind.
    pub async fn export_cluster_state(&self, layout: &SnapshotLayout) -> Result<usize, SnapshotError> {
        clear(layout.resources_file()).await?;
        let dump = self.cluster.get_resources(&self.sources.resource_kinds).await?;

        let path = layout.resources_file();
        fs::create_dir_all(layout.root())
            .await
            .map_err(|e| copy::write_error(layout.root(), e))?;
        fs::write(&path, &dump)
            .await
            .map_err(|e| copy::write_error(&path, e))?;

        info!(path = %path.display(), bytes = dump.len(), "Cluster resources exported");
        Ok(1)
    }

    /// Run every step in order, recording each outcome.
    pub async fn run(&self, layout: &SnapshotLayout) -> SnapshotReport {
        info!(root = %layout.root().display(), "Starting k3s snapshot");

        let mut report = SnapshotReport::default();
        for step in [SnapshotStep::Etcd, SnapshotStep::Manifests, SnapshotStep::ClusterState] {
            let started = Instant::now();
            let result = match step {
                SnapshotStep::Etcd => self.snapshot_etcd(layout).await,
                SnapshotStep::Manifests => self.snapshot_manifests(layout).await,
                SnapshotStep::ClusterState => self.export_cluster_state(layout).await,
            };
            let duration_ms = started.elapsed().as_millis() as u64;

            let step_report = match result {
                Ok(files_written) => {
                    info!(step = %step, files = files_written, duration_ms, "Snapshot step completed");
                    StepReport { step, files_written, duration_ms, error: None }
                }
                Err(e) => {
                    error!(step = %step, error = %e, "Snapshot step failed");
                    StepReport { step, files_written: 0, duration_ms, error: Some(e.to_string()) }
                }
            };
            report.steps.push(step_report);
        }

        report
    }
}

async fn clear(path: PathBuf) -> Result<(), SnapshotError> {
    tokio::task::spawn_blocking(move || copy::clear_path(&path))
        .await
        .map_err(|e| SnapshotError::Aborted(e.to_string()))?
}

async fn copy_dir(src: &Path, dst: &Path) -> Result<usize, SnapshotError> {
    let (src, dst) = (src.to_path_buf(), dst.to_path_buf());
    info!(source = %src.display(), dest = %dst.display(), "Copying directory");
    tokio::task::spawn_blocking(move || copy::copy_tree(&src, &dst))
        .await
        .map_err(|e| SnapshotError::Aborted(e.to_string()))?
}

async fn k3s_etcd_snapshot(binary: &Path, dest: &Path) -> Result<usize, SnapshotError> {
    fs::create_dir_all(dest)
        .await
        .map_err(|e| copy::write_error(dest, e))?;

    let command = format!("{} etcd-snapshot save --dir {}", binary.display(), dest.display());
    info!(%command, "Saving etcd snapshot");

    let output = Command::new(binary)
        .args(["etcd-snapshot", "save", "--dir"])
        .arg(dest)
        .output()
        .await
        .map_err(|e| SnapshotError::CommandFailed {
            command: command.clone(),
            message: e.to_string(),
        })?;

    if !output.status.success() {
        return Err(SnapshotError::CommandFailed {
            command,
            message: format!(
                "exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ),
        });
    }

    count_files(dest).await
}

async fn count_files(dir: &Path) -> Result<usize, SnapshotError> {
    let dir = dir.to_path_buf();
    tokio::task::spawn_blocking(move || {
        let mut count = 0;
        for entry in walkdir::WalkDir::new(&dir).min_depth(1) {
            let entry = entry.map_err(|e| copy::source_error(&dir, e.into()))?;
            if entry.file_type().is_file() {
                count += 1;
            }
        }
        Ok::<usize, SnapshotError>(count)
    })
    .await
    .map_err(|e| SnapshotError::Aborted(e.to_string()))?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_classification() {
        let ok = StepReport { step: SnapshotStep::Etcd, files_written: 3, duration_ms: 1, error: None };
        let failed = StepReport {
            step: SnapshotStep::ClusterState,
            files_written: 0,
            duration_ms: 1,
            error: Some("Cluster API unavailable".to_string()),
        };

        let report = SnapshotReport { steps: vec![ok.clone()] };
        assert!(report.is_complete());

        let report = SnapshotReport { steps: vec![ok, failed] };
        assert!(!report.is_complete());
        assert!(report.produced_anything());
        assert_eq!(report.failed_steps(), vec![SnapshotStep::ClusterState]);
    }

    #[test]
    fn test_step_names() {
        assert_eq!(SnapshotStep::ClusterState.to_string(), "cluster-state");
        assert_eq!(SnapshotStep::Etcd.to_string(), "etcd");
    }
}
