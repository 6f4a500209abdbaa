use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::TryRecvError};
use tracing::{debug, warn};

use crate::builders::commands::{Command, CommandProvider, ModePicker};
use crate::builders::reporter::{StatusBarController, ToggleStatus};
use crate::builders::storage::{JsonFileStorage, Storage, WorkspaceStorage};
use crate::core::config::ExtensionConfiguration;
use crate::core::controller::ExcludeController;
use crate::core::host::{ConfigurationChangeEvent, ConfigurationHost, FileConfigurationHost};

/// Everything that lives for one activation: the controller, the
/// presentation adapters wired to it and the notification receivers.
pub struct ExtensionContext {
    pub configuration: ExtensionConfiguration,
    pub controller: Arc<ExcludeController>,
    pub status_bar: StatusBarController,
    pub commands: CommandProvider,
    configuration_events: broadcast::Receiver<ConfigurationChangeEvent>,
    toggle_events: broadcast::Receiver<()>,
}

impl ExtensionContext {
    /// Wires everything up and runs the startup reconciliation.
    pub async fn activate(
        host: Arc<dyn ConfigurationHost>,
        storage: Arc<dyn WorkspaceStorage>,
    ) -> Self {
        let configuration_events = host.subscribe();
        let configuration = ExtensionConfiguration::new(host);
        let controller = Arc::new(ExcludeController::new(
            configuration.clone(),
            Storage::new(storage),
        ));
        let toggle_events = controller.on_did_toggle();

        controller.on_configuration_changed(None).await;

        let status_bar = StatusBarController::new(controller.clone(), configuration.clone());
        let commands = CommandProvider::new(controller.clone(), configuration.clone());

        Self {
            configuration,
            controller,
            status_bar,
            commands,
            configuration_events,
            toggle_events,
        }
    }

    pub async fn run(&mut self, command: Command, picker: &dyn ModePicker) -> Result<()> {
        self.commands.execute(command, picker).await?;
        self.dispatch_pending_events().await;
        Ok(())
    }

    /// Delivers every queued notification, the controller first so the
    /// status bar sees reconciled state.
    pub async fn dispatch_pending_events(&mut self) {
        loop {
            match self.configuration_events.try_recv() {
                Ok(event) => {
                    debug!(keys = ?event.changed_keys(), "configuration changed");
                    self.controller.on_configuration_changed(Some(&event)).await;
                    self.status_bar.on_configuration_changed(Some(&event));
                }
                Err(TryRecvError::Lagged(skipped)) => {
                    warn!("Missed {skipped} configuration notifications, resyncing");
                    self.controller.on_configuration_changed(None).await;
                    self.status_bar.on_configuration_changed(None);
                }
                Err(TryRecvError::Empty | TryRecvError::Closed) => break,
            }
        }

        let mut toggled = false;
        loop {
            match self.toggle_events.try_recv() {
                Ok(()) | Err(TryRecvError::Lagged(_)) => toggled = true,
                Err(TryRecvError::Empty | TryRecvError::Closed) => break,
            }
        }
        if toggled {
            self.status_bar.on_toggled();
        }
    }

    pub fn status(&self) -> ToggleStatus {
        ToggleStatus {
            mode: self.configuration.mode(),
            toggled: self.controller.toggled(),
            can_toggle: self.controller.can_toggle(),
            status_bar: self.status_bar.item(),
        }
    }
}

/// The editor's user settings file, `<config dir>/Code/User/settings.json`.
pub fn default_user_settings_path() -> Result<PathBuf> {
    let config_dir = dirs::config_dir().context("Failed to locate the user configuration directory")?;
    Ok(config_dir.join("Code").join("User").join("settings.json"))
}

/// Activates against the settings files of `workspace_root`.
pub async fn open_workspace(
    workspace_root: &Path,
    user_settings: Option<PathBuf>,
) -> Result<ExtensionContext> {
    let user_settings = match user_settings {
        Some(path) => path,
        None => default_user_settings_path()?,
    };
    debug!(
        workspace = %workspace_root.display(),
        user_settings = %user_settings.display(),
        "opening workspace"
    );

    let host = Arc::new(FileConfigurationHost::new(user_settings, Some(workspace_root)));
    let storage = Arc::new(JsonFileStorage::new(workspace_root));
    Ok(ExtensionContext::activate(host, storage).await)
}
