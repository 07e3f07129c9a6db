//! k3s-backup
//!
//! Snapshot a single-node k3s cluster and upload the tree to S3 and/or Wasabi.
//!
//! Usage:
//!   k3s-backup --local-backup-path /var/backups/k3s --s3-bucket my-backups \
//!       --aws-profile backup --aws-region us-east-1 \
//!       [--wasabi-profile wasabi --wasabi-region us-east-1]
//!
//! Exit status: 0 on success, 1 when no backup was uploaded, 3 when the tree
//! was produced but an upload target failed.

mod cli;

use anyhow::{Context, Result};
use clap::Parser;
use k3s_backup::pipeline::{BackupRun, RunOutcome};
use k3s_backup::upload::S3Connector;
use std::process::ExitCode;
use tracing::error;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cli::Cli;

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| cli.log_filter().into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match run(&cli).await {
        Ok(outcome) => ExitCode::from(outcome.exit_code() as u8),
        Err(e) => {
            error!("Backup process failed: {:#}", e);
            ExitCode::from(RunOutcome::NoBackup.exit_code() as u8)
        }
    }
}

async fn run(cli: &Cli) -> Result<RunOutcome> {
    let config = cli.to_config(chrono::Local::now());
    let run = BackupRun::new(config).context("invalid configuration")?;

    let report = run
        .execute(&cli.kubectl(), &S3Connector::new())
        .await
        .context("backup run aborted")?;

    Ok(report.outcome())
}
