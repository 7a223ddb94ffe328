//! State persistence and run locking
//!
//! State is stored per stack in `<root>/<stack>/state.json`:
//!
//! ```text
//! .stackflow/
//! └── shop-live/
//!     ├── state.json          # Current state
//!     ├── state.json.backup   # Previous state
//!     └── lock.json           # Held while a run is in progress
//! ```

use crate::error::{CloudError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use stackflow_core::{STATE_VERSION, StackState};
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, OwnedMutexGuard};

const STATE_FILE: &str = "state.json";
const STATE_BACKUP: &str = "state.json.backup";
const LOCK_FILE: &str = "lock.json";

/// Where stack state lives between runs
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Load the state of `stack`, `None` if it was never applied
    async fn load(&self, stack: &str) -> Result<Option<StackState>>;

    /// Persist `state` under its stack name
    async fn save(&self, state: &StackState) -> Result<()>;

    /// Take the run lock of `stack`; fails if another run holds it
    async fn acquire_lock(&self, stack: &str) -> Result<StateLock>;
}

/// File-backed state store
#[derive(Debug, Clone)]
pub struct FileStateStore {
    root: PathBuf,
}

impl FileStateStore {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Get the state directory of a stack
    fn stack_dir(&self, stack: &str) -> PathBuf {
        self.root.join(stack)
    }

    fn state_path(&self, stack: &str) -> PathBuf {
        self.stack_dir(stack).join(STATE_FILE)
    }

    fn backup_path(&self, stack: &str) -> PathBuf {
        self.stack_dir(stack).join(STATE_BACKUP)
    }

    fn lock_path(&self, stack: &str) -> PathBuf {
        self.stack_dir(stack).join(LOCK_FILE)
    }

    /// Ensure the state directory exists
    async fn ensure_stack_dir(&self, stack: &str) -> Result<()> {
        let dir = self.stack_dir(stack);
        if !dir.exists() {
            fs::create_dir_all(&dir).await?;
            tracing::debug!("Created state directory: {}", dir.display());
        }
        Ok(())
    }

    async fn try_create_lock(&self, path: &Path) -> std::io::Result<()> {
        let info = LockInfo {
            holder: lock_holder(),
            acquired_at: Utc::now(),
        };
        let content = serde_json::to_vec_pretty(&info)?;

        let mut file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .await?;
        file.write_all(&content).await?;
        file.flush().await
    }
}

#[async_trait]
impl StateStore for FileStateStore {
    async fn load(&self, stack: &str) -> Result<Option<StackState>> {
        let path = self.state_path(stack);
        if !path.exists() {
            tracing::debug!(stack, "State file not found");
            return Ok(None);
        }

        let content = fs::read_to_string(&path).await?;
        let state: StackState = serde_json::from_str(&content)?;

        if state.version > STATE_VERSION {
            return Err(CloudError::StateError(format!(
                "State file version {} is newer than supported version {}",
                state.version, STATE_VERSION
            )));
        }

        tracing::debug!(stack, "Loaded state with {} resources", state.resources.len());
        Ok(Some(state))
    }

    async fn save(&self, state: &StackState) -> Result<()> {
        self.ensure_stack_dir(&state.stack).await?;

        let path = self.state_path(&state.stack);
        let backup = self.backup_path(&state.stack);

        if path.exists() {
            if backup.exists() {
                fs::remove_file(&backup).await?;
            }
            fs::rename(&path, &backup).await?;
            tracing::debug!("Created state backup");
        }

        let content = serde_json::to_string_pretty(state)?;
        fs::write(&path, content).await?;

        tracing::debug!(
            stack = %state.stack,
            "Saved state with {} resources",
            state.resources.len()
        );
        Ok(())
    }

    async fn acquire_lock(&self, stack: &str) -> Result<StateLock> {
        self.ensure_stack_dir(stack).await?;
        let lock_path = self.lock_path(stack);

        match self.try_create_lock(&lock_path).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                let content = fs::read_to_string(&lock_path).await?;
                let lock_info: LockInfo = serde_json::from_str(&content)?;

                // Locks older than an hour are left over from a crashed run
                let age = Utc::now().signed_duration_since(lock_info.acquired_at);
                if age.num_hours() < 1 {
                    return Err(CloudError::LockError(format!(
                        "Stack {stack} is locked by {} since {}",
                        lock_info.holder, lock_info.acquired_at
                    )));
                }

                tracing::warn!("Removing stale lock from {}", lock_info.holder);
                fs::remove_file(&lock_path).await?;
                self.try_create_lock(&lock_path).await?;
            }
            Err(e) => return Err(e.into()),
        }

        tracing::debug!(stack, "Acquired state lock");
        Ok(StateLock {
            stack: stack.to_string(),
            file: Some(lock_path),
            guard: None,
            released: false,
        })
    }
}

/// In-memory state store
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    states: Mutex<HashMap<String, StackState>>,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn load(&self, stack: &str) -> Result<Option<StackState>> {
        Ok(self.states.lock().await.get(stack).cloned())
    }

    async fn save(&self, state: &StackState) -> Result<()> {
        self.states
            .lock()
            .await
            .insert(state.stack.clone(), state.clone());
        Ok(())
    }

    async fn acquire_lock(&self, stack: &str) -> Result<StateLock> {
        let lock = self
            .locks
            .lock()
            .await
            .entry(stack.to_string())
            .or_default()
            .clone();

        let guard = lock
            .try_lock_owned()
            .map_err(|_| CloudError::LockError(format!("Stack {stack} is already being applied")))?;

        Ok(StateLock {
            stack: stack.to_string(),
            file: None,
            guard: Some(guard),
            released: false,
        })
    }
}

/// Lock information
#[derive(Debug, Serialize, Deserialize)]
struct LockInfo {
    holder: String,
    acquired_at: DateTime<Utc>,
}

fn lock_holder() -> String {
    let host = std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("HOST"))
        .unwrap_or_else(|_| "unknown".to_string());
    format!("{host}:{}", std::process::id())
}

/// RAII guard for the run lock of one stack
#[derive(Debug)]
pub struct StateLock {
    stack: String,
    file: Option<PathBuf>,
    guard: Option<OwnedMutexGuard<()>>,
    released: bool,
}

impl StateLock {
    pub fn stack(&self) -> &str {
        &self.stack
    }

    /// Release the lock
    pub async fn release(mut self) -> Result<()> {
        if !self.released {
            if let Some(path) = &self.file
                && path.exists()
            {
                fs::remove_file(path).await?;
            }
            self.guard.take();
            self.released = true;
            tracing::debug!(stack = %self.stack, "Released state lock");
        }
        Ok(())
    }
}

impl Drop for StateLock {
    fn drop(&mut self) {
        if !self.released
            && let Some(path) = &self.file
            && path.exists()
        {
            let _ = std::fs::remove_file(path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stackflow_core::{ResourceRecord, RunStatus};
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_state_save_load() {
        let temp_dir = tempdir().unwrap();
        let store = FileStateStore::new(temp_dir.path());

        let mut state = StackState::new("shop-live");
        state.set_resource(
            "db",
            ResourceRecord::new("database-0001", "database")
                .with_output("endpoint_address", serde_json::json!("db.internal")),
        );
        state.last_run = Some(RunStatus::Succeeded);

        store.save(&state).await.unwrap();
        store.save(&state).await.unwrap();

        let loaded = store.load("shop-live").await.unwrap().unwrap();
        assert_eq!(loaded, state);
        assert!(temp_dir.path().join("shop-live").join(STATE_BACKUP).exists());
    }

    #[tokio::test]
    async fn test_missing_state() {
        let temp_dir = tempdir().unwrap();
        let store = FileStateStore::new(temp_dir.path());

        assert!(store.load("nothing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_newer_state_version_is_rejected() {
        let temp_dir = tempdir().unwrap();
        let store = FileStateStore::new(temp_dir.path());

        let mut state = StackState::new("s");
        state.version = STATE_VERSION + 1;
        store.save(&state).await.unwrap();

        let err = store.load("s").await.unwrap_err();
        assert!(matches!(err, CloudError::StateError(_)));
    }

    #[tokio::test]
    async fn test_file_lock_is_exclusive() {
        let temp_dir = tempdir().unwrap();
        let store = FileStateStore::new(temp_dir.path());

        let lock = store.acquire_lock("s").await.unwrap();
        let err = store.acquire_lock("s").await.unwrap_err();
        assert!(matches!(err, CloudError::LockError(_)));

        // other stacks are independent
        let other = store.acquire_lock("t").await.unwrap();

        lock.release().await.unwrap();
        let again = store.acquire_lock("s").await.unwrap();
        drop(again);
        drop(other);
        assert!(!temp_dir.path().join("s").join(LOCK_FILE).exists());
    }

    #[tokio::test]
    async fn test_stale_file_lock_is_taken_over() {
        let temp_dir = tempdir().unwrap();
        let store = FileStateStore::new(temp_dir.path());
        std::fs::create_dir_all(temp_dir.path().join("s")).unwrap();

        let stale = LockInfo {
            holder: "crashed".to_string(),
            acquired_at: Utc::now() - chrono::Duration::hours(2),
        };
        std::fs::write(
            temp_dir.path().join("s").join(LOCK_FILE),
            serde_json::to_string(&stale).unwrap(),
        )
        .unwrap();

        assert!(store.acquire_lock("s").await.is_ok());
    }

    #[tokio::test]
    async fn test_memory_lock_is_exclusive() {
        let store = MemoryStateStore::new();

        let lock = store.acquire_lock("s").await.unwrap();
        assert!(store.acquire_lock("s").await.is_err());
        lock.release().await.unwrap();
        assert!(store.acquire_lock("s").await.is_ok());
    }
}
