//! Cluster API access for the resource export step

use super::SnapshotError;
use async_trait::async_trait;
use std::ffi::OsString;
use std::path::PathBuf;
use std::sync::Mutex;
use tokio::process::Command;
use tracing::debug;

/// Source of the live cluster resource dump
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// List `kinds` across all namespaces, serialized as YAML.
    async fn get_resources(&self, kinds: &[String]) -> Result<Vec<u8>, SnapshotError>;
}

/// Runs `kubectl get <kinds> --all-namespaces -o yaml`
#[derive(Debug, Clone)]
pub struct KubectlClient {
    binary: PathBuf,
    kubeconfig: Option<PathBuf>,
}

impl Default for KubectlClient {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("kubectl"),
            kubeconfig: None,
        }
    }
}

impl KubectlClient {
    /// `kubectl` from `PATH` with its default kubeconfig
    pub fn new() -> Self {
        Self::default()
    }

    /// Use another kubectl binary
    pub fn with_binary(mut self, binary: impl Into<PathBuf>) -> Self {
        self.binary = binary.into();
        self
    }

    /// k3s writes its admin kubeconfig to `/etc/rancher/k3s/k3s.yaml`
    pub fn with_kubeconfig(mut self, path: impl Into<PathBuf>) -> Self {
        self.kubeconfig = Some(path.into());
        self
    }

    fn args(&self, kinds: &[String]) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "get".into(),
            kinds.join(",").into(),
            "--all-namespaces".into(),
            "-o".into(),
            "yaml".into(),
        ];
        if let Some(ref kubeconfig) = self.kubeconfig {
            args.push("--kubeconfig".into());
            args.push(kubeconfig.clone().into_os_string());
        }
        args
    }
}

#[async_trait]
impl ClusterClient for KubectlClient {
    async fn get_resources(&self, kinds: &[String]) -> Result<Vec<u8>, SnapshotError> {
        let args = self.args(kinds);
        debug!(binary = %self.binary.display(), ?args, "Running cluster export");

        let output = Command::new(&self.binary)
            .args(&args)
            .output()
            .await
            .map_err(|e| {
                SnapshotError::ApiUnavailable(format!(
                    "failed to run {}: {}",
                    self.binary.display(),
                    e
                ))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(SnapshotError::ApiUnavailable(format!(
                "{} exited with {}: {}",
                self.binary.display(),
                output.status,
                stderr.trim()
            )));
        }

        Ok(output.stdout)
    }
}

/// Fixed-response client for tests and offline runs
#[derive(Debug, Default)]
pub struct StaticClusterClient {
    response: Option<Vec<u8>>,
    requests: Mutex<Vec<Vec<String>>>,
}

impl StaticClusterClient {
    /// Always answer with `output`
    pub fn new(output: impl Into<Vec<u8>>) -> Self {
        Self {
            response: Some(output.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Always fail with `ApiUnavailable`
    pub fn unavailable() -> Self {
        Self::default()
    }

    /// Kinds requested so far, one entry per call
    pub fn requests(&self) -> Vec<Vec<String>> {
        self.requests
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ClusterClient for StaticClusterClient {
    async fn get_resources(&self, kinds: &[String]) -> Result<Vec<u8>, SnapshotError> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(kinds.to_vec());
        }
        self.response.clone().ok_or_else(|| {
            SnapshotError::ApiUnavailable("connection to the cluster refused".to_string())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(list: &[&str]) -> Vec<String> {
        list.iter().map(|k| k.to_string()).collect()
    }

    #[test]
    fn test_kubectl_args_join_kinds() {
        let client = KubectlClient::new();
        let args = client.args(&kinds(&["deployments", "pv", "pvc"]));
        assert_eq!(
            args,
            vec!["get", "deployments,pv,pvc", "--all-namespaces", "-o", "yaml"]
                .into_iter()
                .map(OsString::from)
                .collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_kubectl_args_include_kubeconfig() {
        let client = KubectlClient::new().with_kubeconfig("/etc/rancher/k3s/k3s.yaml");
        let args = client.args(&kinds(&["all"]));
        assert_eq!(args[5], OsString::from("--kubeconfig"));
        assert_eq!(args[6], OsString::from("/etc/rancher/k3s/k3s.yaml"));
    }

    #[tokio::test]
    async fn test_missing_binary_is_api_unavailable() {
        let client = KubectlClient::new().with_binary("/nonexistent/kubectl");
        let err = client.get_resources(&kinds(&["all"])).await.unwrap_err();
        assert!(matches!(err, SnapshotError::ApiUnavailable(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_non_zero_exit_is_api_unavailable() {
        let client = KubectlClient::new().with_binary("false");
        let err = client.get_resources(&kinds(&["all"])).await.unwrap_err();
        assert!(matches!(err, SnapshotError::ApiUnavailable(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stdout_is_returned_verbatim() {
        let client = KubectlClient::new().with_binary("echo");
        let out = client.get_resources(&kinds(&["all"])).await.unwrap();
        assert_eq!(out, b"get all --all-namespaces -o yaml\n");
    }

    #[tokio::test]
    async fn test_static_client_records_requests() {
        let client = StaticClusterClient::new("items: []\n");
        let out = client.get_resources(&kinds(&["all"])).await.unwrap();
        assert_eq!(out, b"items: []\n");
        assert_eq!(client.requests(), vec![kinds(&["all"])]);

        let down = StaticClusterClient::unavailable();
        assert!(down.get_resources(&kinds(&["all"])).await.is_err());
    }
}
