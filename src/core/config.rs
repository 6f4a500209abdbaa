use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;
use std::sync::Arc;
use tracing::warn;

use crate::core::host::{ConfigurationHost, ConfigurationTarget, InspectedSetting};

/// Prefix of this tool's own settings, commands and context flags.
pub const EXTENSION_PREFIX: &str = "toggleexcludedfiles";

pub const FILES_EXCLUDE: &str = "files.exclude";
pub const EXCLUDE_GIT_IGNORE: &str = "explorer.excludeGitIgnore";
pub const MODE: &str = "toggleexcludedfiles.mode";
pub const STATUS_BAR_ENABLED: &str = "toggleexcludedfiles.statusBar.enabled";

/// Glob pattern to its setting, as found in `files.exclude`: either a flag or
/// a `{ "when": ... }` clause. Kept as raw JSON so it is written back verbatim.
pub type FilesExcludeConfiguration = BTreeMap<String, Value>;

/// A write that has been prepared but not started yet.
pub type PendingWrite<'a> = Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

/// Selects which of the managed settings take part in toggling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToggleMode {
    /// Only `files.exclude`.
    #[default]
    Files,
    /// Only `explorer.excludeGitIgnore`.
    GitIgnore,
    /// Both settings at once.
    Both,
}

impl ToggleMode {
    pub fn includes_files(self) -> bool {
        matches!(self, ToggleMode::Files | ToggleMode::Both)
    }

    pub fn includes_git_ignore(self) -> bool {
        matches!(self, ToggleMode::GitIgnore | ToggleMode::Both)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ToggleMode::Files => "files",
            ToggleMode::GitIgnore => "gitignore",
            ToggleMode::Both => "both",
        }
    }
}

impl fmt::Display for ToggleMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ToggleMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "files" => Ok(ToggleMode::Files),
            "gitignore" => Ok(ToggleMode::GitIgnore),
            "both" => Ok(ToggleMode::Both),
            other => anyhow::bail!("Invalid mode: {other} (expected files, gitignore or both)"),
        }
    }
}

/// Snapshot of `files.exclude` at both configuration layers.
///
/// Used for the live value as well as for the persisted restore point and the
/// record of what the controller forced to `false`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredFilesExcludes {
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub global_value: Option<FilesExcludeConfiguration>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace_value: Option<FilesExcludeConfiguration>,
}

impl StoredFilesExcludes {
    pub fn value(&self, target: ConfigurationTarget) -> Option<&FilesExcludeConfiguration> {
        match target {
            ConfigurationTarget::Global => self.global_value.as_ref(),
            ConfigurationTarget::Workspace => self.workspace_value.as_ref(),
        }
    }

    pub fn has_any_value(&self) -> bool {
        self.global_value.is_some() || self.workspace_value.is_some()
    }

    /// The same layers with every pattern switched off.
    pub fn to_applied(&self) -> StoredFilesExcludes {
        let disable = |value: &FilesExcludeConfiguration| {
            value
                .keys()
                .map(|pattern| (pattern.clone(), Value::Bool(false)))
                .collect::<FilesExcludeConfiguration>()
        };

        StoredFilesExcludes {
            key: self.key.clone(),
            global_value: self.global_value.as_ref().map(disable),
            workspace_value: self.workspace_value.as_ref().map(disable),
        }
    }
}

/// Typed access to the settings this tool reads and writes, on top of a
/// [`ConfigurationHost`]. Every read goes to the host, nothing is cached.
#[derive(Clone)]
pub struct ExtensionConfiguration {
    host: Arc<dyn ConfigurationHost>,
}

impl ExtensionConfiguration {
    pub fn new(host: Arc<dyn ConfigurationHost>) -> Self {
        Self { host }
    }

    pub fn host(&self) -> &Arc<dyn ConfigurationHost> {
        &self.host
    }

    /// The effective value of `key`. Values of the wrong shape read as absent.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let inspected = self.host.inspect(key);
        decode(key, inspected.effective_value().cloned())
    }

    pub fn inspect<T: DeserializeOwned>(&self, key: &str) -> (Option<T>, Option<T>) {
        let InspectedSetting {
            global_value,
            workspace_value,
            ..
        } = self.host.inspect(key);
        (decode(key, global_value), decode(key, workspace_value))
    }

    pub fn mode(&self) -> ToggleMode {
        self.get(MODE).unwrap_or_default()
    }

    pub fn status_bar_enabled(&self) -> bool {
        self.get(STATUS_BAR_ENABLED).unwrap_or(true)
    }

    pub fn files_exclude(&self) -> StoredFilesExcludes {
        let (global_value, workspace_value) = self.inspect(FILES_EXCLUDE);
        StoredFilesExcludes {
            key: FILES_EXCLUDE.to_string(),
            global_value,
            workspace_value,
        }
    }

    /// `explorer.excludeGitIgnore`, assumed on when nobody set it.
    pub fn git_ignore(&self) -> bool {
        self.get(EXCLUDE_GIT_IGNORE).unwrap_or(true)
    }

    pub fn git_ignore_target(&self) -> ConfigurationTarget {
        self.defined_target(EXCLUDE_GIT_IGNORE)
    }

    /// Workspace when the workspace layer defines `key`, global otherwise.
    pub fn defined_target(&self, key: &str) -> ConfigurationTarget {
        if self.host.inspect(key).workspace_value.is_some() {
            ConfigurationTarget::Workspace
        } else {
            ConfigurationTarget::Global
        }
    }

    /// Prepares a write of `value` to `key` at `target`. Nothing reaches the
    /// host until the returned future is polled.
    pub fn update<T: Serialize + ?Sized>(
        &self,
        key: &'static str,
        value: Option<&T>,
        target: ConfigurationTarget,
    ) -> PendingWrite<'_> {
        let value = value.map(serde_json::to_value).transpose();
        self.write(key, value, target)
    }

    fn write(
        &self,
        key: &'static str,
        value: serde_json::Result<Option<Value>>,
        target: ConfigurationTarget,
    ) -> PendingWrite<'_> {
        Box::pin(async move {
            let value = value.with_context(|| format!("Failed to serialize value for {key}"))?;
            self.host.update(key, value, target).await
        })
    }

    /// Writes `value` at whichever layer currently defines `key`.
    pub async fn update_effective<T: Serialize + ?Sized>(
        &self,
        key: &'static str,
        value: &T,
    ) -> Result<()> {
        let target = self.defined_target(key);
        self.update(key, Some(value), target).await
    }
}

fn decode<T: DeserializeOwned>(key: &str, value: Option<Value>) -> Option<T> {
    let value = value?;
    match serde_json::from_value(value) {
        Ok(decoded) => Some(decoded),
        Err(e) => {
            warn!("Ignoring malformed value for {key}: {e}");
            None
        }
    }
}
