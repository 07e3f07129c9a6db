//! Run configuration
//!
//! A [`BackupConfig`] is built once per invocation (normally from CLI flags)
//! and passed explicitly into every stage. Nothing is read from ambient
//! process state afterwards.

use crate::{BackupError, Result};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Default k3s embedded etcd data directory
pub const DEFAULT_ETCD_DIR: &str = "/var/lib/rancher/k3s/server/db/etcd";

/// Default k3s control-plane manifests directory
pub const DEFAULT_MANIFESTS_DIR: &str = "/var/lib/rancher/k3s/server/manifests";

/// Resource kinds exported when none are configured
pub const DEFAULT_RESOURCE_KINDS: &[&str] = &["all"];

/// Build the default run prefix, `backup_<YYYY-mm-dd_HH-MM-SS>`.
pub fn timestamp_prefix(now: DateTime<Local>) -> String {
    format!("backup_{}", now.format("%Y-%m-%d_%H-%M-%S"))
}

/// How the etcd part of the snapshot is produced
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EtcdSource {
    /// Recursively copy the etcd data directory
    Copy { data_dir: PathBuf },
    /// Run `k3s etcd-snapshot save --dir <dest>`
    K3sSnapshot { binary: PathBuf },
}

impl Default for EtcdSource {
    fn default() -> Self {
        Self::Copy {
            data_dir: PathBuf::from(DEFAULT_ETCD_DIR),
        }
    }
}

/// Where the snapshot steps read from
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotSources {
    /// How etcd is captured
    pub etcd: EtcdSource,
    /// Directory copied into `manifests-backup/manifests/`
    pub manifests_dir: PathBuf,
    /// Kinds passed to a single `kubectl get` call, e.g. `all` or `pv,pvc`
    pub resource_kinds: Vec<String>,
}

impl Default for SnapshotSources {
    fn default() -> Self {
        Self {
            etcd: EtcdSource::default(),
            manifests_dir: PathBuf::from(DEFAULT_MANIFESTS_DIR),
            resource_kinds: DEFAULT_RESOURCE_KINDS.iter().map(|k| k.to_string()).collect(),
        }
    }
}

impl SnapshotSources {
    /// Copy etcd from `dir`
    pub fn with_etcd_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.etcd = EtcdSource::Copy { data_dir: dir.into() };
        self
    }

    /// Take etcd through `<binary> etcd-snapshot save`
    pub fn with_k3s_snapshot(mut self, binary: impl Into<PathBuf>) -> Self {
        self.etcd = EtcdSource::K3sSnapshot { binary: binary.into() };
        self
    }

    /// Copy manifests from `dir`
    pub fn with_manifests_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.manifests_dir = dir.into();
        self
    }

    /// Replace the exported resource kinds
    pub fn with_resource_kinds<I, S>(mut self, kinds: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.resource_kinds = kinds.into_iter().map(Into::into).collect();
        self
    }
}

/// One object-storage destination
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadTarget {
    /// Short label used in logs and reports (`aws`, `wasabi`)
    pub name: String,
    /// Destination bucket
    pub bucket: String,
    /// Overrides the run prefix for this target only
    pub prefix: Option<String>,
    /// Named profile in the shared AWS config/credentials files
    pub profile: Option<String>,
    /// Region; the SDK's resolution applies when `None`
    pub region: Option<String>,
    /// Custom endpoint for S3-compatible services
    pub endpoint_url: Option<String>,
    /// Address the bucket by path rather than virtual host
    pub force_path_style: bool,
}

impl UploadTarget {
    /// Target using the SDK defaults for everything but the bucket
    pub fn new(name: impl Into<String>, bucket: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            bucket: bucket.into(),
            prefix: None,
            profile: None,
            region: None,
            endpoint_url: None,
            force_path_style: false,
        }
    }

    /// Pin this target to `prefix` instead of the run prefix
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    /// Credentials come from this profile only
    pub fn with_profile(mut self, profile: impl Into<String>) -> Self {
        self.profile = Some(profile.into());
        self
    }

    /// Set the region
    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    /// Send requests to `endpoint` instead of AWS
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint_url = Some(endpoint.into());
        self
    }

    /// Toggle path-style addressing
    pub fn with_force_path_style(mut self, enabled: bool) -> Self {
        self.force_path_style = enabled;
        self
    }

    /// The prefix objects for this target are written under
    pub fn effective_prefix<'a>(&'a self, run_prefix: &'a str) -> &'a str {
        self.prefix.as_deref().unwrap_or(run_prefix)
    }

    /// `s3://bucket` base used in log lines
    pub fn base_uri(&self) -> String {
        format!("s3://{}", self.bucket)
    }
}

/// Everything one backup run needs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupConfig {
    /// Root of the snapshot tree; uploaded in full
    pub local_root: PathBuf,
    /// Key prefix shared by every target without an override
    pub remote_prefix: String,
    /// Destinations, uploaded in order
    pub targets: Vec<UploadTarget>,
    /// Where the snapshot reads from
    pub sources: SnapshotSources,
    /// Upload even when a snapshot step failed
    pub allow_partial: bool,
    /// List the uploaded prefix on each target afterwards
    pub list_after_upload: bool,
    /// Write the JSON run report here
    pub report_path: Option<PathBuf>,
}

impl BackupConfig {
    /// Config with default sources and no targets yet
    pub fn new(local_root: impl Into<PathBuf>, remote_prefix: impl Into<String>) -> Self {
        Self {
            local_root: local_root.into(),
            remote_prefix: remote_prefix.into(),
            targets: Vec::new(),
            sources: SnapshotSources::default(),
            allow_partial: false,
            list_after_upload: false,
            report_path: None,
        }
    }

    /// Append an upload target
    pub fn with_target(mut self, target: UploadTarget) -> Self {
        self.targets.push(target);
        self
    }

    /// Replace the snapshot sources
    pub fn with_sources(mut self, sources: SnapshotSources) -> Self {
        self.sources = sources;
        self
    }

    /// Upload even when a snapshot step failed
    pub fn with_allow_partial(mut self, enabled: bool) -> Self {
        self.allow_partial = enabled;
        self
    }

    /// List each target's prefix after uploading
    pub fn with_list_after_upload(mut self, enabled: bool) -> Self {
        self.list_after_upload = enabled;
        self
    }

    /// Write the JSON run report to `path`
    pub fn with_report_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.report_path = Some(path.into());
        self
    }

    /// Reject configurations that cannot produce a backup at all.
    pub fn validate(&self) -> Result<()> {
        if self.local_root.as_os_str().is_empty() {
            return Err(BackupError::Config("local backup path is empty".to_string()));
        }
        if self.targets.is_empty() {
            return Err(BackupError::Config("no upload target configured".to_string()));
        }
        for target in &self.targets {
            if target.bucket.trim().is_empty() {
                return Err(BackupError::Config(format!(
                    "target '{}' has an empty bucket name",
                    target.name
                )));
            }
        }
        let mut names: Vec<&str> = self.targets.iter().map(|t| t.name.as_str()).collect();
        names.sort_unstable();
        if names.windows(2).any(|w| w[0] == w[1]) {
            return Err(BackupError::Config("target names must be unique".to_string()));
        }
        if self.sources.resource_kinds.is_empty() {
            return Err(BackupError::Config("no resource kinds to export".to_string()));
        }
        Ok(())
    }
}
