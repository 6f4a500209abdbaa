use std::sync::{Arc, Mutex};

use crate::builders::commands::Command;
use crate::core::config::{
    EXCLUDE_GIT_IGNORE, ExtensionConfiguration, FILES_EXCLUDE, MODE, STATUS_BAR_ENABLED,
    ToggleMode,
};
use crate::core::controller::ExcludeController;
use crate::core::host::ConfigurationChangeEvent;

/// What the status bar shows: an eye icon, its tooltip and the command it runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusBarItem {
    pub text: String,
    pub tooltip: String,
    pub command: &'static str,
}

impl StatusBarItem {
    fn new(mode: ToggleMode, toggled: bool) -> Self {
        let text = if toggled { "$(eye-closed)" } else { "$(eye)" };
        let action = if toggled { "Hide" } else { "Show" };
        let source = match mode {
            ToggleMode::Files => "files.exclude",
            ToggleMode::GitIgnore => ".gitignore",
            ToggleMode::Both => "Both",
        };

        Self {
            text: text.to_string(),
            tooltip: format!("{action} Files Excluded by {source}"),
            command: Command::Toggle.id(),
        }
    }
}

/// Keeps a status bar item in sync with the controller.
///
/// The item only exists while the status bar is enabled and there is
/// something to toggle.
pub struct StatusBarController {
    controller: Arc<ExcludeController>,
    configuration: ExtensionConfiguration,
    item: Mutex<Option<StatusBarItem>>,
}

impl StatusBarController {
    pub fn new(controller: Arc<ExcludeController>, configuration: ExtensionConfiguration) -> Self {
        let status_bar = Self {
            controller,
            configuration,
            item: Mutex::new(None),
        };
        status_bar.on_configuration_changed(None);
        status_bar
    }

    pub fn item(&self) -> Option<StatusBarItem> {
        self.item.lock().unwrap().clone()
    }

    pub fn on_configuration_changed(&self, event: Option<&ConfigurationChangeEvent>) {
        let relevant = match event {
            None => true,
            Some(event) => [STATUS_BAR_ENABLED, MODE, FILES_EXCLUDE, EXCLUDE_GIT_IGNORE]
                .iter()
                .any(|section| event.affects_configuration(section)),
        };
        if !relevant {
            return;
        }

        let item = (self.configuration.status_bar_enabled() && self.controller.can_toggle())
            .then(|| StatusBarItem::new(self.configuration.mode(), self.controller.toggled()));
        *self.item.lock().unwrap() = item;
    }

    pub fn on_toggled(&self) {
        let mut item = self.item.lock().unwrap();
        if item.is_some() {
            *item = Some(StatusBarItem::new(
                self.configuration.mode(),
                self.controller.toggled(),
            ));
        }
    }
}

/// A point-in-time summary of the toggle state, for reporting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToggleStatus {
    pub mode: ToggleMode,
    pub toggled: bool,
    pub can_toggle: bool,
    pub status_bar: Option<StatusBarItem>,
}

pub trait StatusReporter {
    fn render(&self, status: &ToggleStatus) -> String;
}

/// Renders the status as plain lines for the terminal.
pub struct ConsoleReporter;

impl ConsoleReporter {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ConsoleReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusReporter for ConsoleReporter {
    fn render(&self, status: &ToggleStatus) -> String {
        let state = if status.toggled {
            "excluded files are shown"
        } else {
            "excluded files are hidden"
        };
        let mut lines = vec![
            format!("Mode: {}", status.mode),
            format!("Toggled: {} ({state})", status.toggled),
            format!("Can toggle: {}", status.can_toggle),
        ];
        match &status.status_bar {
            Some(item) => lines.push(format!(
                "Status bar: {} {} [{}]",
                item.text, item.tooltip, item.command
            )),
            None => lines.push("Status bar: hidden".to_string()),
        }
        lines.join("\n")
    }
}
