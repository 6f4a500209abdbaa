// This file is the module declaration file for the `core` module.
// It declares the submodules that make up the toggle engine and exposes
// them to the rest of the crate.

// `config` module:
// Typed access to the settings this tool manages (`files.exclude`,
// `explorer.excludeGitIgnore`) and its own settings (`toggleexcludedfiles.*`).
// Defines `ToggleMode`, the `StoredFilesExcludes` snapshot and the
// `ExtensionConfiguration` wrapper that every other component reads through.
pub mod config;

// `controller` module:
// The `ExcludeController` state machine. It applies and restores the
// exclusions, persists the restore point, and reconciles that restore point
// against edits made outside of it.
pub mod controller;

// `host` module:
// The `ConfigurationHost` trait abstracting the editor's settings, along with
// a `settings.json` backed implementation and an in-memory one.
pub mod host;
