use anyhow::{Context, Result};
use std::io::{self, BufRead, Write};
use std::str::FromStr;
use std::sync::Arc;
use tracing::info;

use crate::core::config::{ExtensionConfiguration, MODE, ToggleMode};
use crate::core::controller::ExcludeController;

/// The commands exposed to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Restore,
    /// Shows excluded files, i.e. applies the toggle.
    Show,
    Toggle,
    SetMode,
}

impl Command {
    pub const ALL: [Command; 4] = [
        Command::Restore,
        Command::Show,
        Command::Toggle,
        Command::SetMode,
    ];

    pub fn id(self) -> &'static str {
        match self {
            Command::Restore => "toggleexcludedfiles.restore",
            Command::Show => "toggleexcludedfiles.show",
            Command::Toggle => "toggleexcludedfiles.toggle",
            Command::SetMode => "toggleexcludedfiles.setMode",
        }
    }
}

impl FromStr for Command {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Command::ALL
            .into_iter()
            .find(|command| command.id() == s)
            .ok_or_else(|| anyhow::anyhow!("Unknown command: {s}"))
    }
}

/// One entry of the mode prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModeOption {
    pub label: &'static str,
    pub description: &'static str,
    pub value: ToggleMode,
    pub picked: bool,
}

pub const MODE_PROMPT_TITLE: &str = "Toggle Excluded Files: Set Mode";
pub const MODE_PROMPT_PLACEHOLDER: &str =
    "Choose which exclusions to toggle when using the eye icon";

pub fn mode_options(current: ToggleMode) -> Vec<ModeOption> {
    [
        (
            "$(file) Files",
            "Toggle files.exclude patterns only",
            ToggleMode::Files,
        ),
        (
            "$(git-branch) Git Ignore",
            "Toggle explorer.excludeGitIgnore setting only",
            ToggleMode::GitIgnore,
        ),
        (
            "$(files) Both",
            "Toggle both files.exclude and explorer.excludeGitIgnore simultaneously",
            ToggleMode::Both,
        ),
    ]
    .into_iter()
    .map(|(label, description, value)| ModeOption {
        label,
        description,
        value,
        picked: value == current,
    })
    .collect()
}

/// Presents the mode options and returns the selection, `None` if dismissed.
pub trait ModePicker: Send + Sync {
    fn pick(&self, options: &[ModeOption]) -> Result<Option<ToggleMode>>;
}

/// Prompts on stdin/stdout.
pub struct ConsoleModePicker;

impl ModePicker for ConsoleModePicker {
    fn pick(&self, options: &[ModeOption]) -> Result<Option<ToggleMode>> {
        let mut stdout = io::stdout().lock();
        writeln!(stdout, "{MODE_PROMPT_TITLE}")?;
        for (index, option) in options.iter().enumerate() {
            let marker = if option.picked { "*" } else { " " };
            writeln!(
                stdout,
                "{marker} {}. {} - {}",
                index + 1,
                option.label,
                option.description
            )?;
        }
        write!(stdout, "{MODE_PROMPT_PLACEHOLDER}: ")?;
        stdout.flush()?;

        let mut input = String::new();
        io::stdin()
            .lock()
            .read_line(&mut input)
            .context("Failed to read mode selection")?;
        Ok(parse_selection(&input, options))
    }
}

/// Accepts the option number or the mode name. Anything else dismisses.
pub fn parse_selection(input: &str, options: &[ModeOption]) -> Option<ToggleMode> {
    let input = input.trim();
    if let Ok(index) = input.parse::<usize>() {
        return index
            .checked_sub(1)
            .and_then(|index| options.get(index))
            .map(|option| option.value);
    }
    input
        .parse::<ToggleMode>()
        .ok()
        .filter(|mode| options.iter().any(|option| option.value == *mode))
}

/// Routes commands to the controller.
pub struct CommandProvider {
    controller: Arc<ExcludeController>,
    configuration: ExtensionConfiguration,
}

impl CommandProvider {
    pub fn new(controller: Arc<ExcludeController>, configuration: ExtensionConfiguration) -> Self {
        Self {
            controller,
            configuration,
        }
    }

    pub async fn execute(&self, command: Command, picker: &dyn ModePicker) -> Result<()> {
        match command {
            Command::Restore => self.restore().await,
            Command::Show => self.show().await,
            Command::Toggle => self.toggle().await,
            Command::SetMode => return self.set_mode(picker).await,
        }
        Ok(())
    }

    pub async fn restore(&self) {
        self.controller.restore_configuration().await;
    }

    pub async fn show(&self) {
        self.controller.apply_configuration().await;
    }

    pub async fn toggle(&self) {
        self.controller.toggle_configuration().await;
    }

    pub async fn set_mode(&self, picker: &dyn ModePicker) -> Result<()> {
        let current = self.configuration.mode();
        match picker.pick(&mode_options(current))? {
            Some(mode) => self.set_mode_to(mode).await,
            None => Ok(()),
        }
    }

    /// Writes `mode` unless it is already the current one.
    pub async fn set_mode_to(&self, mode: ToggleMode) -> Result<()> {
        if mode == self.configuration.mode() {
            return Ok(());
        }
        info!(%mode, "changing toggle mode");
        self.configuration
            .update_effective(MODE, &mode)
            .await
            .context("Failed to update mode")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_ids_round_trip() {
        for command in Command::ALL {
            assert_eq!(command.id().parse::<Command>().unwrap(), command);
        }
        assert!("toggleexcludedfiles.hide".parse::<Command>().is_err());
    }

    #[test]
    fn options_mark_current_mode() {
        let options = mode_options(ToggleMode::GitIgnore);
        let picked: Vec<ToggleMode> = options
            .iter()
            .filter(|option| option.picked)
            .map(|option| option.value)
            .collect();
        assert_eq!(picked, vec![ToggleMode::GitIgnore]);
    }

    #[test]
    fn selection_accepts_numbers_and_names() {
        let options = mode_options(ToggleMode::Files);
        assert_eq!(parse_selection("3\n", &options), Some(ToggleMode::Both));
        assert_eq!(parse_selection(" gitignore ", &options), Some(ToggleMode::GitIgnore));
        assert_eq!(parse_selection("0", &options), None);
        assert_eq!(parse_selection("4", &options), None);
        assert_eq!(parse_selection("", &options), None);
    }
}
