//! Command-line interface
//!
//! Every flag can also be supplied through a `K3S_BACKUP_*` environment
//! variable so the binary can be driven from a cron entry or a systemd timer
//! without a wrapper script.

use chrono::{DateTime, Local};
use clap::{Parser, ValueEnum};
use k3s_backup::config::{
    timestamp_prefix, BackupConfig, SnapshotSources, UploadTarget, DEFAULT_ETCD_DIR,
    DEFAULT_MANIFESTS_DIR,
};
use k3s_backup::snapshot::KubectlClient;
use std::path::PathBuf;

const WASABI_DEFAULT_REGION: &str = "us-east-1";

/// Back up a single-node k3s cluster and upload it to S3 and/or Wasabi.
#[derive(Parser, Debug)]
#[command(name = "k3s-backup")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Root directory for the snapshot tree
    #[arg(long, env = "K3S_BACKUP_LOCAL_PATH")]
    pub local_backup_path: PathBuf,

    /// Bucket of the primary (AWS) target
    #[arg(long, env = "K3S_BACKUP_S3_BUCKET")]
    pub s3_bucket: String,

    /// Object key prefix [default: backup_<YYYY-mm-dd_HH-MM-SS>]
    #[arg(long, env = "K3S_BACKUP_S3_PREFIX")]
    pub s3_prefix: Option<String>,

    /// AWS profile for the primary target
    #[arg(long, env = "K3S_BACKUP_AWS_PROFILE")]
    pub aws_profile: Option<String>,

    /// AWS region for the primary target
    #[arg(long, env = "K3S_BACKUP_AWS_REGION")]
    pub aws_region: Option<String>,

    /// Bucket of the Wasabi target [default: same as --s3-bucket]
    #[arg(long, env = "K3S_BACKUP_WASABI_BUCKET")]
    pub wasabi_bucket: Option<String>,

    /// Profile for the Wasabi target; enables the Wasabi upload
    #[arg(long, env = "K3S_BACKUP_WASABI_PROFILE")]
    pub wasabi_profile: Option<String>,

    /// Wasabi region; enables the Wasabi upload
    #[arg(long, env = "K3S_BACKUP_WASABI_REGION")]
    pub wasabi_region: Option<String>,

    /// Wasabi endpoint URL [default: https://s3.<region>.wasabisys.com]
    #[arg(long, env = "K3S_BACKUP_WASABI_ENDPOINT")]
    pub wasabi_endpoint: Option<String>,

    /// Address Wasabi buckets by path instead of virtual host
    #[arg(long, env = "K3S_BACKUP_WASABI_PATH_STYLE")]
    pub wasabi_path_style: bool,

    /// Write the tree to <local-backup-path>/<prefix>
    #[arg(long)]
    pub timestamped_dir: bool,

    /// How the etcd snapshot is taken
    #[arg(long, value_enum, default_value_t = EtcdMode::Copy, env = "K3S_BACKUP_ETCD_MODE")]
    pub etcd_mode: EtcdMode,

    /// etcd data directory (copy mode)
    #[arg(long, default_value = DEFAULT_ETCD_DIR, env = "K3S_BACKUP_ETCD_DIR")]
    pub etcd_dir: PathBuf,

    /// k3s binary (k3s-snapshot mode)
    #[arg(long, default_value = "k3s", env = "K3S_BACKUP_K3S_BIN")]
    pub k3s_bin: PathBuf,

    /// Control-plane manifests directory
    #[arg(long, default_value = DEFAULT_MANIFESTS_DIR, env = "K3S_BACKUP_MANIFESTS_DIR")]
    pub manifests_dir: PathBuf,

    /// kubectl binary used for the resource export
    #[arg(long, default_value = "kubectl", env = "K3S_BACKUP_KUBECTL_BIN")]
    pub kubectl_bin: PathBuf,

    /// kubeconfig passed to kubectl
    #[arg(long, env = "K3S_BACKUP_KUBECONFIG")]
    pub kubeconfig: Option<PathBuf>,

    /// Resource kinds to export, comma-separated
    #[arg(long, value_delimiter = ',', default_value = "all", env = "K3S_BACKUP_RESOURCES")]
    pub resources: Vec<String>,

    /// Upload even if a snapshot step failed
    #[arg(long)]
    pub allow_partial: bool,

    /// List the uploaded prefix on each target afterwards
    #[arg(long)]
    pub list_uploaded: bool,

    /// Write a JSON run report to this file
    #[arg(long, env = "K3S_BACKUP_REPORT")]
    pub report: Option<PathBuf>,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

/// Source of the etcd part of the snapshot
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum EtcdMode {
    /// Copy the etcd data directory
    Copy,
    /// Run `k3s etcd-snapshot save`
    K3sSnapshot,
}

impl Cli {
    /// Default log filter for the verbosity count
    pub fn log_filter(&self) -> &'static str {
        match self.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }

    fn wasabi_enabled(&self) -> bool {
        self.wasabi_profile.is_some()
            || self.wasabi_region.is_some()
            || self.wasabi_endpoint.is_some()
            || self.wasabi_bucket.is_some()
    }

    /// kubectl client built from `--kubectl-bin` and `--kubeconfig`
    pub fn kubectl(&self) -> KubectlClient {
        let client = KubectlClient::new().with_binary(&self.kubectl_bin);
        match self.kubeconfig {
            Some(ref path) => client.with_kubeconfig(path),
            None => client,
        }
    }

    /// Resolve flags into a run configuration; `now` seeds the default prefix.
    pub fn to_config(&self, now: DateTime<Local>) -> BackupConfig {
        let prefix = self
            .s3_prefix
            .clone()
            .unwrap_or_else(|| timestamp_prefix(now));

        let local_root = if self.timestamped_dir {
            self.local_backup_path.join(&prefix)
        } else {
            self.local_backup_path.clone()
        };

        let sources = match self.etcd_mode {
            EtcdMode::Copy => SnapshotSources::default().with_etcd_dir(&self.etcd_dir),
            EtcdMode::K3sSnapshot => SnapshotSources::default().with_k3s_snapshot(&self.k3s_bin),
        }
        .with_manifests_dir(&self.manifests_dir)
        .with_resource_kinds(self.resources.iter().map(|r| r.trim()).filter(|r| !r.is_empty()));

        let mut aws = UploadTarget::new("aws", &self.s3_bucket);
        if let Some(ref profile) = self.aws_profile {
            aws = aws.with_profile(profile);
        }
        if let Some(ref region) = self.aws_region {
            aws = aws.with_region(region);
        }

        let mut config = BackupConfig::new(local_root, prefix)
            .with_sources(sources)
            .with_target(aws)
            .with_allow_partial(self.allow_partial)
            .with_list_after_upload(self.list_uploaded);

        if self.wasabi_enabled() {
            let region = self
                .wasabi_region
                .clone()
                .unwrap_or_else(|| WASABI_DEFAULT_REGION.to_string());
            let endpoint = self
                .wasabi_endpoint
                .clone()
                .unwrap_or_else(|| format!("https://s3.{}.wasabisys.com", region));
            let bucket = self.wasabi_bucket.as_deref().unwrap_or(&self.s3_bucket);

            let mut wasabi = UploadTarget::new("wasabi", bucket)
                .with_region(region)
                .with_endpoint(endpoint)
                .with_force_path_style(self.wasabi_path_style);
            if let Some(ref profile) = self.wasabi_profile {
                wasabi = wasabi.with_profile(profile);
            }
            config = config.with_target(wasabi);
        }

        if let Some(ref report) = self.report {
            config = config.with_report_path(report);
        }

        config
    }
}
