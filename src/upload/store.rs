// Object store abstraction and the in-memory backend

use super::UploadError;
use crate::config::UploadTarget;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::RwLock;

/// One connected object-storage destination
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Upload the file at `path` as object `key`, overwriting any existing object.
    async fn put_file(&self, key: &str, path: &Path) -> Result<(), UploadError>;

    /// Keys currently stored under `prefix`
    async fn list_prefix(&self, prefix: &str) -> Result<Vec<String>, UploadError>;
}

/// Creates an [`ObjectStore`] for a configured target
#[async_trait]
pub trait StoreConnector: Send + Sync {
    /// Resolve credentials and endpoint for `target`.
    ///
    /// Fails with `CredentialsUnavailable` before any object is written.
    async fn connect(&self, target: &UploadTarget) -> Result<Box<dyn ObjectStore>, UploadError>;
}

/// Map an error raised while reading a snapshot file for upload.
pub(crate) fn read_error(path: &Path, err: io::Error) -> UploadError {
    if err.kind() == io::ErrorKind::NotFound {
        UploadError::FileNotFound {
            path: path.to_path_buf(),
        }
    } else {
        UploadError::Io {
            path: path.to_path_buf(),
            source: err,
        }
    }
}

/// In-memory bucket. Clones share the same objects.
#[derive(Clone, Default)]
pub struct MemoryObjectStore {
    objects: Arc<RwLock<BTreeMap<String, Vec<u8>>>>,
    puts: Arc<AtomicUsize>,
    fail_after: Option<usize>,
}

impl MemoryObjectStore {
    /// Empty store that never fails
    pub fn new() -> Self {
        Self::default()
    }

    /// A store whose puts fail with a network error once `count` succeeded
    pub fn failing_after(count: usize) -> Self {
        Self {
            fail_after: Some(count),
            ..Self::default()
        }
    }

    /// Stored bytes for `key`
    pub async fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.objects.read().await.get(key).cloned()
    }

    /// Snapshot of every stored object
    pub async fn objects(&self) -> BTreeMap<String, Vec<u8>> {
        self.objects.read().await.clone()
    }

    /// Number of stored objects
    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }

    /// True when nothing is stored
    pub async fn is_empty(&self) -> bool {
        self.objects.read().await.is_empty()
    }

    /// Number of successful puts, overwrites included
    pub fn put_count(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put_file(&self, key: &str, path: &Path) -> Result<(), UploadError> {
        if let Some(limit) = self.fail_after {
            if self.puts.load(Ordering::SeqCst) >= limit {
                return Err(UploadError::Network {
                    uri: format!("memory://{}", key),
                    message: "connection reset by peer".to_string(),
                });
            }
        }

        let data = tokio::fs::read(path).await.map_err(|e| read_error(path, e))?;
        self.objects.write().await.insert(key.to_string(), data);
        self.puts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn list_prefix(&self, prefix: &str) -> Result<Vec<String>, UploadError> {
        Ok(self
            .objects
            .read()
            .await
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }
}

/// Hands out one [`MemoryObjectStore`] per target name
#[derive(Default)]
pub struct MemoryConnector {
    stores: Mutex<HashMap<String, MemoryObjectStore>>,
    known_profiles: Option<HashSet<String>>,
}

impl MemoryConnector {
    /// Connector accepting any profile
    pub fn new() -> Self {
        Self::default()
    }

    /// Use `store` for the target called `name`
    pub fn with_store(self, name: impl Into<String>, store: MemoryObjectStore) -> Self {
        if let Ok(mut stores) = self.stores.lock() {
            stores.insert(name.into(), store);
        }
        self
    }

    /// Only these profiles resolve; any other profile is missing credentials
    pub fn with_known_profiles<I, S>(mut self, profiles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.known_profiles = Some(profiles.into_iter().map(Into::into).collect());
        self
    }

    /// The store handed out for `name`, if that target connected
    pub fn store(&self, name: &str) -> Option<MemoryObjectStore> {
        self.stores.lock().ok()?.get(name).cloned()
    }
}

#[async_trait]
impl StoreConnector for MemoryConnector {
    async fn connect(&self, target: &UploadTarget) -> Result<Box<dyn ObjectStore>, UploadError> {
        if let Some(ref known) = self.known_profiles {
            let profile = target.profile.as_deref().unwrap_or("default");
            if !known.contains(profile) {
                return Err(UploadError::CredentialsUnavailable {
                    target: target.name.clone(),
                    message: format!("profile file does not contain profile `{}`", profile),
                });
            }
        }

        let mut stores = self.stores.lock().map_err(|_| UploadError::CredentialsUnavailable {
            target: target.name.clone(),
            message: "connector state poisoned".to_string(),
        })?;
        let store = stores.entry(target.name.clone()).or_default().clone();
        Ok(Box::new(store))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_memory_store_put_and_list() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("name");
        std::fs::write(&file, b"etcd-member").unwrap();

        let store = MemoryObjectStore::new();
        store.put_file("run/etcd-backup/etcd/name", &file).await.unwrap();
        store.put_file("other/name", &file).await.unwrap();

        assert_eq!(store.get("run/etcd-backup/etcd/name").await.unwrap(), b"etcd-member");
        assert_eq!(
            store.list_prefix("run/").await.unwrap(),
            vec!["run/etcd-backup/etcd/name".to_string()]
        );
        assert_eq!(store.put_count(), 2);
    }

    #[tokio::test]
    async fn test_missing_file_is_file_not_found() {
        let store = MemoryObjectStore::new();
        let err = store
            .put_file("k", Path::new("/nonexistent/file"))
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::FileNotFound { .. }));
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_failing_store_reports_network_error() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("a");
        std::fs::write(&file, b"a").unwrap();

        let store = MemoryObjectStore::failing_after(1);
        store.put_file("a", &file).await.unwrap();
        let err = store.put_file("b", &file).await.unwrap_err();
        assert!(matches!(err, UploadError::Network { .. }));
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_connector_rejects_unknown_profile() {
        let connector = MemoryConnector::new().with_known_profiles(["backup"]);
        let target = UploadTarget::new("aws", "bucket").with_profile("missing");
        let err = connector.connect(&target).await.err().unwrap();
        assert!(matches!(err, UploadError::CredentialsUnavailable { .. }));
        assert!(connector.store("aws").is_none());

        let target = UploadTarget::new("aws", "bucket").with_profile("backup");
        assert!(connector.connect(&target).await.is_ok());
        assert!(connector.store("aws").is_some());
    }
}
