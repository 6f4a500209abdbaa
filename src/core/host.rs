use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::{Mutex as AsyncMutex, OwnedRwLockWriteGuard, RwLock, broadcast};
use tracing::{debug, warn};

const EVENT_CAPACITY: usize = 64;

/// The configuration layer a value is read from or written to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfigurationTarget {
    /// User-level settings shared by every workspace.
    Global,
    /// Project-level settings of the open workspace.
    Workspace,
}

impl ConfigurationTarget {
    pub const ALL: [ConfigurationTarget; 2] =
        [ConfigurationTarget::Global, ConfigurationTarget::Workspace];
}

/// The raw value of one setting at every layer, before any typing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InspectedSetting {
    pub key: String,
    pub global_value: Option<Value>,
    pub workspace_value: Option<Value>,
}

impl InspectedSetting {
    pub fn value(&self, target: ConfigurationTarget) -> Option<&Value> {
        match target {
            ConfigurationTarget::Global => self.global_value.as_ref(),
            ConfigurationTarget::Workspace => self.workspace_value.as_ref(),
        }
    }

    /// Workspace wins over global, mirroring how the editor resolves settings.
    pub fn effective_value(&self) -> Option<&Value> {
        self.workspace_value
            .as_ref()
            .or(self.global_value.as_ref())
    }
}

/// Published by a host after one or more settings changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigurationChangeEvent {
    changed: Vec<String>,
}

impl ConfigurationChangeEvent {
    pub fn new<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            changed: keys.into_iter().map(Into::into).collect(),
        }
    }

    pub fn changed_keys(&self) -> &[String] {
        &self.changed
    }

    /// A section is affected when it names a changed key, a parent of one
    /// (`files` for `files.exclude`), or a child of one.
    pub fn affects_configuration(&self, section: &str) -> bool {
        self.changed
            .iter()
            .any(|key| key == section || is_child_of(key, section) || is_child_of(section, key))
    }
}

fn is_child_of(key: &str, parent: &str) -> bool {
    key.len() > parent.len() && key.starts_with(parent) && key.as_bytes()[parent.len()] == b'.'
}

#[derive(Debug, Error)]
pub enum HostError {
    #[error("write of `{key}` at {target:?} scope was rejected")]
    WriteRejected {
        key: String,
        target: ConfigurationTarget,
    },
    #[error("no workspace is open, cannot write `{0}` at workspace scope")]
    NoWorkspace(String),
}

/// Trait defining the configuration operations the toggle controller needs
/// from its host editor.
///
/// Reads are synchronous, writes are asynchronous. Every successful write
/// publishes a [`ConfigurationChangeEvent`] to subscribers.
#[async_trait]
pub trait ConfigurationHost: Send + Sync {
    /// Reads `key` at every configuration layer.
    fn inspect(&self, key: &str) -> InspectedSetting;

    /// Writes `value` to `key` at `target`. `None` removes the key from that layer.
    async fn update(
        &self,
        key: &str,
        value: Option<Value>,
        target: ConfigurationTarget,
    ) -> Result<()>;

    /// Subscribes to configuration change notifications.
    fn subscribe(&self) -> broadcast::Receiver<ConfigurationChangeEvent>;

    /// Sets a context flag used for conditional UI visibility.
    fn set_context(&self, key: &str, value: bool);
}

/// A host backed by the editor's `settings.json` files: the user settings
/// file holds the global layer, `<workspace>/.vscode/settings.json` the
/// workspace layer.
///
/// Each write rewrites its whole file, so writes to the same file are
/// serialized.
pub struct FileConfigurationHost {
    global_path: PathBuf,
    workspace_path: Option<PathBuf>,
    global_lock: AsyncMutex<()>,
    workspace_lock: AsyncMutex<()>,
    contexts: Mutex<HashMap<String, bool>>,
    events: broadcast::Sender<ConfigurationChangeEvent>,
}

impl FileConfigurationHost {
    pub fn new(global_path: PathBuf, workspace_root: Option<&Path>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            global_path,
            workspace_path: workspace_root.map(|root| root.join(".vscode").join("settings.json")),
            global_lock: AsyncMutex::new(()),
            workspace_lock: AsyncMutex::new(()),
            contexts: Mutex::new(HashMap::new()),
            events,
        }
    }

    pub fn settings_path(&self, target: ConfigurationTarget) -> Option<&Path> {
        match target {
            ConfigurationTarget::Global => Some(&self.global_path),
            ConfigurationTarget::Workspace => self.workspace_path.as_deref(),
        }
    }

    pub fn contexts(&self) -> HashMap<String, bool> {
        self.contexts.lock().unwrap().clone()
    }

    fn read_layer(path: &Path) -> Result<Map<String, Value>> {
        if !path.exists() {
            return Ok(Map::new());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings file {}", path.display()))?;
        if content.trim().is_empty() {
            return Ok(Map::new());
        }

        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse settings file {}", path.display()))
    }

    fn read_value(&self, target: ConfigurationTarget, key: &str) -> Option<Value> {
        let path = self.settings_path(target)?;
        match Self::read_layer(path) {
            Ok(mut layer) => layer.remove(key),
            Err(e) => {
                warn!("{e:#}");
                None
            }
        }
    }
}

#[async_trait]
impl ConfigurationHost for FileConfigurationHost {
    fn inspect(&self, key: &str) -> InspectedSetting {
        InspectedSetting {
            key: key.to_string(),
            global_value: self.read_value(ConfigurationTarget::Global, key),
            workspace_value: self.read_value(ConfigurationTarget::Workspace, key),
        }
    }

    async fn update(
        &self,
        key: &str,
        value: Option<Value>,
        target: ConfigurationTarget,
    ) -> Result<()> {
        let path = self
            .settings_path(target)
            .ok_or_else(|| HostError::NoWorkspace(key.to_string()))?
            .to_path_buf();
        let _file = match target {
            ConfigurationTarget::Global => self.global_lock.lock().await,
            ConfigurationTarget::Workspace => self.workspace_lock.lock().await,
        };

        // Refuse to rewrite a file we could not parse rather than clobbering it.
        let mut layer = Self::read_layer(&path)?;
        match value {
            Some(value) => {
                layer.insert(key.to_string(), value);
            }
            None => {
                layer.shift_remove(key);
            }
        }

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }
        let content = serde_json::to_string_pretty(&layer).context("Failed to serialize settings")?;
        tokio::fs::write(&path, content)
            .await
            .with_context(|| format!("Failed to write settings file {}", path.display()))?;

        debug!(key, ?target, "settings file updated");
        let _ = self.events.send(ConfigurationChangeEvent::new([key]));
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<ConfigurationChangeEvent> {
        self.events.subscribe()
    }

    fn set_context(&self, key: &str, value: bool) {
        debug!(key, value, "context updated");
        self.contexts.lock().unwrap().insert(key.to_string(), value);
    }
}

/// One write a [`MemoryConfigurationHost`] accepted.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedWrite {
    pub key: String,
    pub value: Option<Value>,
    pub target: ConfigurationTarget,
}

/// An in-memory host. Besides plain reads and writes it can simulate edits
/// made by someone else, reject writes to a key, and hold writes pending.
pub struct MemoryConfigurationHost {
    global: Mutex<Map<String, Value>>,
    workspace: Mutex<Map<String, Value>>,
    rejected_keys: Mutex<HashSet<String>>,
    writes: Mutex<Vec<RecordedWrite>>,
    contexts: Mutex<HashMap<String, bool>>,
    gate: Arc<RwLock<()>>,
    events: broadcast::Sender<ConfigurationChangeEvent>,
}

impl Default for MemoryConfigurationHost {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryConfigurationHost {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            global: Mutex::new(Map::new()),
            workspace: Mutex::new(Map::new()),
            rejected_keys: Mutex::new(HashSet::new()),
            writes: Mutex::new(Vec::new()),
            contexts: Mutex::new(HashMap::new()),
            gate: Arc::new(RwLock::new(())),
            events,
        }
    }

    pub fn with_value(self, key: &str, value: Value, target: ConfigurationTarget) -> Self {
        self.layer(target).lock().unwrap().insert(key.to_string(), value);
        self
    }

    /// Changes a setting the way the user or another tool would: no write is
    /// recorded, but subscribers are notified.
    pub fn set_external(&self, key: &str, value: Option<Value>, target: ConfigurationTarget) {
        self.set_raw(key, value, target);
        let _ = self.events.send(ConfigurationChangeEvent::new([key]));
    }

    /// Makes every later write to `key` fail.
    pub fn reject_writes_to(&self, key: &str) {
        self.rejected_keys.lock().unwrap().insert(key.to_string());
    }

    /// Holds every write pending until the returned guard is dropped.
    pub async fn pause_writes(&self) -> OwnedRwLockWriteGuard<()> {
        self.gate.clone().write_owned().await
    }

    pub fn value(&self, key: &str, target: ConfigurationTarget) -> Option<Value> {
        self.layer(target).lock().unwrap().get(key).cloned()
    }

    pub fn writes(&self) -> Vec<RecordedWrite> {
        self.writes.lock().unwrap().clone()
    }

    pub fn context(&self, key: &str) -> Option<bool> {
        self.contexts.lock().unwrap().get(key).copied()
    }

    fn layer(&self, target: ConfigurationTarget) -> &Mutex<Map<String, Value>> {
        match target {
            ConfigurationTarget::Global => &self.global,
            ConfigurationTarget::Workspace => &self.workspace,
        }
    }

    fn set_raw(&self, key: &str, value: Option<Value>, target: ConfigurationTarget) {
        let mut layer = self.layer(target).lock().unwrap();
        match value {
            Some(value) => {
                layer.insert(key.to_string(), value);
            }
            None => {
                layer.shift_remove(key);
            }
        }
    }
}

#[async_trait]
impl ConfigurationHost for MemoryConfigurationHost {
    fn inspect(&self, key: &str) -> InspectedSetting {
        InspectedSetting {
            key: key.to_string(),
            global_value: self.value(key, ConfigurationTarget::Global),
            workspace_value: self.value(key, ConfigurationTarget::Workspace),
        }
    }

    async fn update(
        &self,
        key: &str,
        value: Option<Value>,
        target: ConfigurationTarget,
    ) -> Result<()> {
        let _open = self.gate.read().await;

        if self.rejected_keys.lock().unwrap().contains(key) {
            return Err(HostError::WriteRejected {
                key: key.to_string(),
                target,
            }
            .into());
        }

        self.set_raw(key, value.clone(), target);
        self.writes.lock().unwrap().push(RecordedWrite {
            key: key.to_string(),
            value,
            target,
        });
        let _ = self.events.send(ConfigurationChangeEvent::new([key]));
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<ConfigurationChangeEvent> {
        self.events.subscribe()
    }

    fn set_context(&self, key: &str, value: bool) {
        self.contexts.lock().unwrap().insert(key.to_string(), value);
    }
}
