//! File-backed credential stores, one file per agent
//!
//! Directory layout:
//! ```text
//! <credentials_dir>/
//! ├── agent-<agent_id>.store
//! ├── agent-<agent_id>.store-wal   (written by SQLite-backed libraries)
//! └── agent-<agent_id>.store-shm
//! ```

use super::client::{CredentialStore, CredentialStoreProvider};
use super::types::DeviceIdentity;
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Sidecar suffixes removed together with the store file
const SIDECAR_SUFFIXES: &[&str] = &["-wal", "-shm", "-journal"];

/// Reject agent ids that cannot safely address a store file
pub fn validate_agent_id(agent_id: &str) -> Result<()> {
    let id = agent_id.trim();
    if id.is_empty() {
        return Err(Error::InvalidRequest("agent id is required".to_string()));
    }
    if id != agent_id
        || id.contains(['/', '\\', '\0'])
        || id.contains("..")
        || id.len() > 128
    {
        return Err(Error::InvalidRequest(format!(
            "agent id '{}' is not allowed",
            agent_id
        )));
    }
    Ok(())
}

/// Credential store persisted as a JSON document
pub struct FileCredentialStore {
    path: PathBuf,
    closed: AtomicBool,
    write_lock: Mutex<()>,
}

impl FileCredentialStore {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            closed: AtomicBool::new(false),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::Store(format!(
                "credential store {} is closed",
                self.path.display()
            )));
        }
        Ok(())
    }

    fn sidecar(&self, suffix: &str) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(suffix);
        PathBuf::from(name)
    }

    async fn write_device(&self, device: &DeviceIdentity) -> Result<()> {
        let json = serde_json::to_vec_pretty(device)?;
        let tmp = self.sidecar(".tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl CredentialStore for FileCredentialStore {
    async fn load_or_create_device(&self) -> Result<DeviceIdentity> {
        self.ensure_open()?;
        let _guard = self.write_lock.lock().await;

        match tokio::fs::read(&self.path).await {
            Ok(data) => serde_json::from_slice(&data).map_err(|e| {
                Error::Store(format!(
                    "corrupt credential store {}: {}",
                    self.path.display(),
                    e
                ))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let device = DeviceIdentity::generate();
                self.write_device(&device).await?;
                tracing::debug!(
                    store = %self.path.display(),
                    device = %device.device_id,
                    "Created new device identity"
                );
                Ok(device)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn save_device(&self, device: &DeviceIdentity) -> Result<()> {
        self.ensure_open()?;
        let _guard = self.write_lock.lock().await;
        self.write_device(device).await
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn erase(&self) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut targets = vec![self.path.clone()];
        targets.extend(SIDECAR_SUFFIXES.iter().map(|s| self.sidecar(s)));

        for target in targets {
            match tokio::fs::remove_file(&target).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(Error::Store(format!(
                        "failed to remove {}: {}",
                        target.display(),
                        e
                    )))
                }
            }
        }
        Ok(())
    }

    fn location(&self) -> String {
        self.path.display().to_string()
    }
}

/// Hands every agent its own store file under one directory
pub struct FileCredentialStoreProvider {
    dir: PathBuf,
}

impl FileCredentialStoreProvider {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    /// Store path for an agent
    pub fn store_path(&self, agent_id: &str) -> PathBuf {
        self.dir.join(format!("agent-{}.store", agent_id))
    }
}

#[async_trait]
impl CredentialStoreProvider for FileCredentialStoreProvider {
    async fn open(&self, agent_id: &str) -> Result<Arc<dyn CredentialStore>> {
        validate_agent_id(agent_id)?;
        tokio::fs::create_dir_all(&self.dir).await?;
        Ok(Arc::new(FileCredentialStore::new(self.store_path(agent_id))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_agent_id() {
        tokio_test::assert_ok!(validate_agent_id("agent-1"));
        tokio_test::assert_err!(validate_agent_id(""));
        tokio_test::assert_err!(validate_agent_id("  "));
        tokio_test::assert_err!(validate_agent_id("../etc"));
        tokio_test::assert_err!(validate_agent_id("a/b"));
        tokio_test::assert_err!(validate_agent_id(" padded"));
    }

    #[tokio::test]
    async fn test_load_or_create_is_stable() {
        let dir = tempfile::tempdir().unwrap();
        let provider = FileCredentialStoreProvider::new(dir.path().to_path_buf());

        let store = provider.open("agent-a").await.unwrap();
        let first = store.load_or_create_device().await.unwrap();
        let second = store.load_or_create_device().await.unwrap();
        assert_eq!(first, second);

        let reopened = provider.open("agent-a").await.unwrap();
        assert_eq!(reopened.load_or_create_device().await.unwrap(), first);
    }

    #[tokio::test]
    async fn test_agents_get_distinct_locations() {
        let dir = tempfile::tempdir().unwrap();
        let provider = FileCredentialStoreProvider::new(dir.path().to_path_buf());

        let a = provider.open("agent-a").await.unwrap();
        let b = provider.open("agent-b").await.unwrap();
        assert_ne!(a.location(), b.location());

        let da = a.load_or_create_device().await.unwrap();
        let db = b.load_or_create_device().await.unwrap();
        assert_ne!(da.device_id, db.device_id);
    }

    #[tokio::test]
    async fn test_erase_removes_sidecars() {
        let dir = tempfile::tempdir().unwrap();
        let provider = FileCredentialStoreProvider::new(dir.path().to_path_buf());
        let store = provider.open("agent-a").await.unwrap();
        store.load_or_create_device().await.unwrap();

        let path = provider.store_path("agent-a");
        let wal = PathBuf::from(format!("{}-wal", path.display()));
        std::fs::write(&wal, b"wal").unwrap();

        store.erase().await.unwrap();
        assert!(!path.exists());
        assert!(!wal.exists());

        // Erasing twice is fine
        store.erase().await.unwrap();
    }

    #[tokio::test]
    async fn test_closed_store_rejects_writes() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCredentialStore::new(dir.path().join("agent-x.store"));
        let device = store.load_or_create_device().await.unwrap();
        store.close().await.unwrap();
        assert!(matches!(
            store.save_device(&device).await,
            Err(Error::Store(_))
        ));
    }

    #[tokio::test]
    async fn test_corrupt_store_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agent-x.store");
        std::fs::write(&path, b"not json").unwrap();
        let store = FileCredentialStore::new(path);
        assert!(matches!(
            store.load_or_create_device().await,
            Err(Error::Store(_))
        ));
    }
}
