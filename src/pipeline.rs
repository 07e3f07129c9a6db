// Backup run - snapshot the cluster, then upload the tree
// Stages are reported individually so a caller can tell "no backup" apart
// from "backup produced, upload failed".

use crate::config::BackupConfig;
use crate::layout::SnapshotLayout;
use crate::snapshot::{ClusterClient, SnapshotReport, Snapshotter};
use crate::upload::{StoreConnector, UploadReport, Uploader};
use crate::{BackupError, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::Path;
use tracing::{error, info, warn};

/// Overall classification of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    /// Snapshot complete and every target received every file
    Success,
    /// Nothing was uploaded because the snapshot failed
    NoBackup,
    /// A tree was produced but at least one target failed
    UploadFailed,
}

impl RunOutcome {
    /// Process exit status for this outcome
    pub fn exit_code(self) -> i32 {
        match self {
            RunOutcome::Success => 0,
            RunOutcome::NoBackup => 1,
            RunOutcome::UploadFailed => 3,
        }
    }
}

/// Everything observed during one run
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    /// Root the tree was written under
    pub local_root: String,
    /// Run prefix
    pub prefix: String,
    /// When the run started
    pub started_at: DateTime<Utc>,
    /// When the run finished
    pub finished_at: DateTime<Utc>,
    /// Per-step snapshot results
    pub snapshot: SnapshotReport,
    /// `None` when the upload stage was skipped
    pub upload: Option<UploadReport>,
    /// Why the upload stage did not run
    pub upload_skipped_reason: Option<String>,
}

impl RunReport {
    /// Classify the run for the exit status
    pub fn outcome(&self) -> RunOutcome {
        match &self.upload {
            None => RunOutcome::NoBackup,
            Some(upload) if upload.all_succeeded() && self.snapshot.is_complete() => {
                RunOutcome::Success
            }
            Some(_) => RunOutcome::UploadFailed,
        }
    }

    /// Write the report as pretty JSON.
    pub async fn write_json(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, json).await?;
        Ok(())
    }
}

/// One backup invocation
pub struct BackupRun {
    config: BackupConfig,
    layout: SnapshotLayout,
}

impl BackupRun {
    /// Validate `config` and fix the layout. Nothing touches disk yet.
    pub fn new(config: BackupConfig) -> Result<Self> {
        config.validate()?;
        let layout = SnapshotLayout::new(config.local_root.clone());
        Ok(Self { config, layout })
    }

    /// Validated configuration
    pub fn config(&self) -> &BackupConfig {
        &self.config
    }

    /// Layout of the local tree
    pub fn layout(&self) -> &SnapshotLayout {
        &self.layout
    }

    /// Snapshot into the local root, then upload to every target.
    ///
    /// Output from an earlier run under the same root is replaced step by
    /// step. Errors are returned only when the local root cannot be created,
    /// holds entries no step writes, or cannot be enumerated. Step and target
    /// failures land in the report.
    pub async fn execute(
        &self,
        cluster: &dyn ClusterClient,
        connector: &dyn StoreConnector,
    ) -> Result<RunReport> {
        let started_at = Utc::now();
        let root = self.layout.root();

        info!(
            local_root = %root.display(),
            prefix = %self.config.remote_prefix,
            targets = self.config.targets.len(),
            "Starting backup run"
        );

        tokio::fs::create_dir_all(root).await?;
        reject_foreign_entries(root).await?;

        let snapshot = Snapshotter::new(&self.config.sources, cluster)
            .run(&self.layout)
            .await;

        let mut upload_skipped_reason = None;
        let upload = if !snapshot.is_complete() && !self.config.allow_partial {
            let reason = format!(
                "snapshot steps failed: {}",
                snapshot
                    .failed_steps()
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(", ")
            );
            error!(%reason, "Skipping upload");
            upload_skipped_reason = Some(reason);
            None
        } else if !snapshot.produced_anything() {
            let reason = "snapshot produced no files".to_string();
            error!(%reason, "Skipping upload");
            upload_skipped_reason = Some(reason);
            None
        } else {
            if !snapshot.is_complete() {
                warn!("Uploading a partial snapshot");
            }
            let uploader =
                Uploader::new(connector).with_list_after_upload(self.config.list_after_upload);
            Some(
                uploader
                    .upload(root, &self.config.remote_prefix, &self.config.targets)
                    .await?,
            )
        };

        let report = RunReport {
            local_root: root.display().to_string(),
            prefix: self.config.remote_prefix.clone(),
            started_at,
            finished_at: Utc::now(),
            snapshot,
            upload,
            upload_skipped_reason,
        };

        match report.outcome() {
            RunOutcome::Success => info!(prefix = %report.prefix, "Backup and upload completed successfully"),
            RunOutcome::UploadFailed => {
                let failed = report
                    .upload
                    .as_ref()
                    .map(|u| u.failed_targets().join(", "))
                    .unwrap_or_default();
                error!(failed_targets = %failed, "Backup produced but upload incomplete");
            }
            RunOutcome::NoBackup => error!("No backup was uploaded"),
        }

        if let Some(ref path) = self.config.report_path {
            if let Err(e) = report.write_json(path).await {
                warn!(path = %path.display(), error = %e, "Failed to write run report");
            }
        }

        Ok(report)
    }
}

/// The whole root is uploaded, so anything the steps do not own must not be there.
async fn reject_foreign_entries(root: &Path) -> Result<()> {
    let mut foreign = Vec::new();
    let mut entries = tokio::fs::read_dir(root).await?;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name().to_string_lossy().into_owned();
        if !SnapshotLayout::owns_entry(&name) {
            foreign.push(name);
        }
    }

    if foreign.is_empty() {
        return Ok(());
    }
    foreign.sort();
    Err(BackupError::Config(format!(
        "local backup path {} holds entries no snapshot step writes: {}",
        root.display(),
        foreign.join(", ")
    )))
}
