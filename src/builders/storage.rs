use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::warn;

/// Keys of the workspace-scoped state kept between sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageKey {
    /// `files.exclude` as it was before exclusions were toggled off.
    SavedState,
    /// What the controller itself wrote to `files.exclude`.
    AppliedState,
    /// `explorer.excludeGitIgnore` as it was before it was toggled off.
    GitIgnoreSavedState,
}

impl StorageKey {
    pub const ALL: [StorageKey; 3] = [
        StorageKey::SavedState,
        StorageKey::AppliedState,
        StorageKey::GitIgnoreSavedState,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            StorageKey::SavedState => "savedState",
            StorageKey::AppliedState => "appliedState",
            StorageKey::GitIgnoreSavedState => "gitIgnoreSavedState",
        }
    }
}

impl fmt::Display for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A small key-value store scoped to the current workspace.
#[async_trait]
pub trait WorkspaceStorage: Send + Sync {
    fn get(&self, key: StorageKey) -> Option<Value>;
    /// Stores `value` under `key`; `None` deletes the key.
    async fn store(&self, key: StorageKey, value: Option<Value>) -> Result<()>;
}

/// Typed wrapper over a [`WorkspaceStorage`].
#[derive(Clone)]
pub struct Storage {
    inner: Arc<dyn WorkspaceStorage>,
}

impl Storage {
    pub fn new(inner: Arc<dyn WorkspaceStorage>) -> Self {
        Self { inner }
    }

    /// Reads `key`. A value that no longer decodes reads as absent.
    pub fn get_workspace<T: DeserializeOwned>(&self, key: StorageKey) -> Option<T> {
        let value = self.inner.get(key)?;
        match serde_json::from_value(value) {
            Ok(decoded) => Some(decoded),
            Err(e) => {
                warn!("Ignoring unreadable stored {key}: {e}");
                None
            }
        }
    }

    pub async fn store_workspace<T: Serialize + Sync>(
        &self,
        key: StorageKey,
        value: Option<&T>,
    ) -> Result<()> {
        let value = value
            .map(serde_json::to_value)
            .transpose()
            .with_context(|| format!("Failed to serialize {key}"))?;
        self.inner.store(key, value).await
    }
}

/// Keeps the state in one JSON object file inside the workspace.
pub struct JsonFileStorage {
    path: PathBuf,
    entries: Mutex<Map<String, Value>>,
}

impl JsonFileStorage {
    /// Storage at the default location under `workspace_root`.
    pub fn new(workspace_root: &Path) -> Self {
        Self::at(
            workspace_root
                .join(".vscode")
                .join("toggleexcludedfiles.state.json"),
        )
    }

    pub fn at(path: PathBuf) -> Self {
        let entries = match Self::load(&path) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("{e:#}, starting from empty state");
                Map::new()
            }
        };
        Self {
            path,
            entries: Mutex::new(entries),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(path: &Path) -> Result<Map<String, Value>> {
        if !path.exists() {
            return Ok(Map::new());
        }
        let content = fs::read_to_string(path).context("Failed to read state file")?;
        serde_json::from_str(&content).context("Failed to parse state file")
    }
}

#[async_trait]
impl WorkspaceStorage for JsonFileStorage {
    fn get(&self, key: StorageKey) -> Option<Value> {
        self.entries.lock().unwrap().get(key.as_str()).cloned()
    }

    async fn store(&self, key: StorageKey, value: Option<Value>) -> Result<()> {
        let snapshot = {
            let mut entries = self.entries.lock().unwrap();
            match value {
                Some(value) => {
                    entries.insert(key.as_str().to_string(), value);
                }
                None => {
                    entries.remove(key.as_str());
                }
            }
            entries.clone()
        };

        if snapshot.is_empty() {
            if self.path.exists() {
                tokio::fs::remove_file(&self.path)
                    .await
                    .context("Failed to remove state file")?;
            }
            return Ok(());
        }

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .context("Failed to create state directory")?;
        }
        let serialized =
            serde_json::to_string_pretty(&snapshot).context("Failed to serialize state")?;
        tokio::fs::write(&self.path, serialized)
            .await
            .context("Failed to write state file")?;
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryStorage {
    entries: Mutex<HashMap<StorageKey, Value>>,
    read_only: AtomicBool,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().unwrap().is_empty()
    }

    /// Makes every later `store` fail, as a full or read-only disk would.
    pub fn reject_writes(&self) {
        self.read_only.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl WorkspaceStorage for MemoryStorage {
    fn get(&self, key: StorageKey) -> Option<Value> {
        self.entries.lock().unwrap().get(&key).cloned()
    }

    async fn store(&self, key: StorageKey, value: Option<Value>) -> Result<()> {
        if self.read_only.load(Ordering::SeqCst) {
            anyhow::bail!("Workspace storage rejected the write for {key}");
        }
        let mut entries = self.entries.lock().unwrap();
        match value {
            Some(value) => {
                entries.insert(key, value);
            }
            None => {
                entries.remove(&key);
            }
        }
        Ok(())
    }
}
