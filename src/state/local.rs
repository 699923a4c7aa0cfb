//! File-based state storage.
//!
//! State lives in a JSON file written atomically (temp file, fsync,
//! rename). The lock is a sibling file named after the state file.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::error::{Result, StateError};

use super::lock::{generate_holder_id, LockInfo, LOCK_EXPIRY_SECS};
use super::store::StateStore;
use super::types::{StackState, STATE_VERSION};

/// Default state directory name.
pub const STATE_DIR: &str = ".halldyll";

/// Local file-based state store.
#[derive(Debug, Clone)]
pub struct LocalStateStore {
    state_path: PathBuf,
    lock_path: PathBuf,
}

impl LocalStateStore {
    /// Store for `stack` under `base_dir`: `<base_dir>/<stack>.state.json`.
    #[must_use]
    pub fn for_stack(base_dir: impl AsRef<Path>, stack: &str) -> Self {
        Self::with_state_path(base_dir.as_ref().join(format!("{stack}.state.json")))
    }

    /// Store backed by an explicit state file.
    #[must_use]
    pub fn with_state_path(state_path: impl Into<PathBuf>) -> Self {
        let state_path = state_path.into();
        let lock_path = state_path.with_extension("lock");
        Self {
            state_path,
            lock_path,
        }
    }

    /// Path of the state file.
    #[must_use]
    pub fn state_path(&self) -> &Path {
        &self.state_path
    }

    async fn ensure_parent(path: &Path) -> Result<()> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            if !dir.exists() {
                debug!("Creating state directory: {}", dir.display());
                fs::create_dir_all(dir)
                    .await
                    .map_err(|e| StateError::storage(format!("Failed to create state directory: {e}")))?;
            }
        }
        Ok(())
    }

    /// Writes `content` to `path` through a synced temporary file.
    async fn write_atomic(path: &Path, content: &str) -> Result<()> {
        Self::ensure_parent(path).await?;
        let temp_path = path.with_extension("tmp");

        let mut file = fs::File::create(&temp_path)
            .await
            .map_err(|e| StateError::storage(format!("Failed to create {}: {e}", temp_path.display())))?;
        file.write_all(content.as_bytes())
            .await
            .map_err(|e| StateError::storage(format!("Failed to write {}: {e}", temp_path.display())))?;
        file.sync_all()
            .await
            .map_err(|e| StateError::storage(format!("Failed to sync {}: {e}", temp_path.display())))?;

        fs::rename(&temp_path, path)
            .await
            .map_err(|e| StateError::storage(format!("Failed to replace {}: {e}", path.display())))?;
        Ok(())
    }

    async fn remove_if_exists(path: &Path) -> Result<()> {
        match fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StateError::storage(format!("Failed to delete {}: {e}", path.display())).into()),
        }
    }

    async fn read_lock(&self) -> Result<Option<LockInfo>> {
        let content = match fs::read_to_string(&self.lock_path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(StateError::LockFailed {
                    message: format!("Failed to read lock file: {e}"),
                }
                .into());
            }
        };

        let lock = serde_json::from_str(&content).map_err(|e| StateError::Corrupted {
            message: format!("Failed to parse lock file: {e}"),
        })?;
        Ok(Some(lock))
    }
}

#[async_trait]
impl StateStore for LocalStateStore {
    async fn load(&self) -> Result<Option<StackState>> {
        let content = match fs::read_to_string(&self.state_path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("State file does not exist: {}", self.state_path.display());
                return Ok(None);
            }
            Err(e) => {
                return Err(StateError::Corrupted {
                    message: format!("Failed to read state file: {e}"),
                }
                .into());
            }
        };

        info!("Loading state from: {}", self.state_path.display());

        let state: StackState = serde_json::from_str(&content).map_err(|e| StateError::Corrupted {
            message: format!("Failed to parse state file: {e}"),
        })?;

        if state.version != STATE_VERSION {
            return Err(StateError::VersionMismatch {
                expected: STATE_VERSION.to_string(),
                found: state.version,
            }
            .into());
        }

        Ok(Some(state))
    }

    async fn save(&self, state: &StackState) -> Result<()> {
        let content = serde_json::to_string_pretty(state)
            .map_err(|e| StateError::serialization(format!("Failed to serialize state: {e}")))?;

        Self::write_atomic(&self.state_path, &content).await?;
        debug!(
            "Saved state ({} resources) to {}",
            state.len(),
            self.state_path.display()
        );
        Ok(())
    }

    async fn delete(&self) -> Result<()> {
        info!("Deleting state file: {}", self.state_path.display());
        Self::remove_if_exists(&self.state_path).await?;
        Self::remove_if_exists(&self.lock_path).await
    }

    async fn acquire_lock(&self, holder: &str, operation: &str) -> Result<LockInfo> {
        if let Some(existing) = self.read_lock().await? {
            if !existing.is_expired() {
                return Err(StateError::LockedByOther {
                    holder: existing.holder,
                    since: existing.acquired_at.to_rfc3339(),
                }
                .into());
            }
            warn!("Taking over expired lock held by {}", existing.holder);
        }

        let holder = if holder.is_empty() {
            generate_holder_id()
        } else {
            holder.to_string()
        };
        let lock = LockInfo::new(&holder, operation);

        let content = serde_json::to_string_pretty(&lock)
            .map_err(|e| StateError::serialization(format!("Failed to serialize lock: {e}")))?;
        Self::write_atomic(&self.lock_path, &content)
            .await
            .map_err(|e| StateError::LockFailed {
                message: e.to_string(),
            })?;

        info!(
            "Acquired state lock {} for {operation} (expires in {LOCK_EXPIRY_SECS}s)",
            lock.lock_id
        );
        Ok(lock)
    }

    async fn release_lock(&self, lock_id: &str) -> Result<()> {
        match self.read_lock().await? {
            Some(existing) if existing.lock_id == lock_id => {
                Self::remove_if_exists(&self.lock_path).await?;
                debug!("Released state lock {lock_id}");
            }
            Some(existing) => {
                warn!(
                    "Not releasing lock {}: held under a different id ({lock_id} expected)",
                    existing.lock_id
                );
            }
            None => {}
        }
        Ok(())
    }

    async fn force_unlock(&self) -> Result<Option<LockInfo>> {
        let existing = self.read_lock().await?;
        Self::remove_if_exists(&self.lock_path).await?;
        Ok(existing)
    }

    async fn lock_info(&self) -> Result<Option<LockInfo>> {
        self.read_lock().await
    }

    fn backend_type(&self) -> &'static str {
        "local"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HalldyllError;
    use tempfile::TempDir;

    fn create_test_store() -> (LocalStateStore, TempDir) {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let store = LocalStateStore::for_stack(temp_dir.path().join(STATE_DIR), "dev");
        (store, temp_dir)
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let (store, _temp) = create_test_store();
        assert!(store.load().await.expect("load").is_none());

        let state = StackState::new("blackcandy", "dev");
        store.save(&state).await.expect("Failed to save state");

        let loaded = store
            .load()
            .await
            .expect("Failed to load state")
            .expect("State should exist");
        assert_eq!(loaded.project, "blackcandy");
        assert_eq!(loaded.stack, "dev");
        assert!(store.state_path().ends_with("dev.state.json"));
    }

    #[tokio::test]
    async fn test_version_mismatch() {
        let (store, _temp) = create_test_store();
        let mut state = StackState::new("blackcandy", "dev");
        state.version = String::from("0.1");
        store.save(&state).await.expect("save");

        let err = store.load().await.expect_err("old state rejected");
        assert!(matches!(err, HalldyllError::State(StateError::VersionMismatch { .. })));
    }

    #[tokio::test]
    async fn test_corrupted_state() {
        let (store, _temp) = create_test_store();
        LocalStateStore::write_atomic(store.state_path(), "{ not json")
            .await
            .expect("write");

        let err = store.load().await.expect_err("corrupted");
        assert!(matches!(err, HalldyllError::State(StateError::Corrupted { .. })));
    }

    #[tokio::test]
    async fn test_lock_acquire_release() {
        let (store, _temp) = create_test_store();

        let lock = store.acquire_lock("ci", "up").await.expect("acquire");
        let err = store.acquire_lock("other", "up").await.expect_err("held");
        assert!(matches!(err, HalldyllError::State(StateError::LockedByOther { .. })));

        store.release_lock("wrong-id").await.expect("no-op");
        assert!(store.lock_info().await.expect("info").is_some());

        store.release_lock(&lock.lock_id).await.expect("release");
        assert!(store.lock_info().await.expect("info").is_none());
    }

    #[tokio::test]
    async fn test_force_unlock() {
        let (store, _temp) = create_test_store();
        store.acquire_lock("", "destroy").await.expect("acquire");

        let removed = store.force_unlock().await.expect("unlock").expect("was locked");
        assert_eq!(removed.operation, "destroy");
        assert!(store.acquire_lock("ci", "up").await.is_ok());
    }

    #[tokio::test]
    async fn test_delete_removes_state_and_lock() {
        let (store, _temp) = create_test_store();
        store.save(&StackState::new("p", "dev")).await.expect("save");
        store.acquire_lock("ci", "up").await.expect("lock");

        store.delete().await.expect("delete");
        assert!(store.load().await.expect("load").is_none());
        assert!(store.lock_info().await.expect("info").is_none());
    }
}
