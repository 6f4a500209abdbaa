// This file is the module declaration file for the `builders` module.
// It declares and makes public all the sub-modules within the `src/builders`
// directory. These modules hold the pieces built around the controller:
// persistence, comparison helpers and the user-facing surfaces.

// The `pub mod commands;` declaration exposes the `commands` module.
//
// `commands` module:
// Defines the user-facing commands (`restore`, `show`, `toggle`, `setMode`),
// the three-option mode prompt and the `CommandProvider` that routes each
// command to the `ExcludeController`.
pub mod commands;

// The `pub mod object;` declaration exposes the `object` module.
//
// `object` module:
// Pure structural equality over `files.exclude` mappings. The reconciler uses
// it to tell its own writes apart from edits made by someone else.
pub mod object;

// The `pub mod reporter;` declaration exposes the `reporter` module.
//
// `reporter` module:
// The status bar item that mirrors the toggle state, and a `StatusReporter`
// trait with a `ConsoleReporter` that prints the state for the `status` command.
pub mod reporter;

// The `pub mod storage;` declaration exposes the `storage` module.
//
// `storage` module:
// The workspace-scoped key-value store holding the restore snapshots. Defines
// the `WorkspaceStorage` trait with `JsonFileStorage` and `MemoryStorage`
// implementations, and the typed `Storage` wrapper.
pub mod storage;
