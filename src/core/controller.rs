use anyhow::Result;
use futures_util::future::join_all;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::builders::object::same_layers;
use crate::builders::storage::{Storage, StorageKey};
use crate::core::config::{
    EXCLUDE_GIT_IGNORE, ExtensionConfiguration, FILES_EXCLUDE, MODE, PendingWrite,
    StoredFilesExcludes,
};
use crate::core::host::{ConfigurationChangeEvent, ConfigurationTarget};

pub const TOGGLED_CONTEXT: &str = "toggleexcludedfiles:toggled";
pub const LOADED_CONTEXT: &str = "toggleexcludedfiles:loaded";

/// Toggles `files.exclude` and `explorer.excludeGitIgnore` off and back on.
///
/// Whether exclusions are currently toggled is never stored as a flag: it is
/// derived from which restore snapshots exist in workspace storage, so the
/// state survives restarts. Operations are guarded against re-entry; a call
/// made while another one is running returns without doing anything.
pub struct ExcludeController {
    configuration: ExtensionConfiguration,
    storage: Storage,
    working: AtomicBool,
    loaded: AtomicBool,
    on_did_toggle: broadcast::Sender<()>,
}

/// Holds the working flag for the duration of one operation.
struct WorkingGuard<'a>(&'a AtomicBool);

impl<'a> WorkingGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for WorkingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl ExcludeController {
    pub fn new(configuration: ExtensionConfiguration, storage: Storage) -> Self {
        let (on_did_toggle, _) = broadcast::channel(16);
        Self {
            configuration,
            storage,
            working: AtomicBool::new(false),
            loaded: AtomicBool::new(false),
            on_did_toggle,
        }
    }

    /// Notified once after every apply or restore, and when stale state is
    /// dropped because a managed setting was edited elsewhere.
    pub fn on_did_toggle(&self) -> broadcast::Receiver<()> {
        self.on_did_toggle.subscribe()
    }

    pub fn is_working(&self) -> bool {
        self.working.load(Ordering::SeqCst)
    }

    pub fn toggled(&self) -> bool {
        let mode = self.configuration.mode();
        (mode.includes_files() && self.stored_exclude_configuration().is_some())
            || (mode.includes_git_ignore() && self.saved_git_ignore_state().is_some())
    }

    pub fn can_toggle(&self) -> bool {
        let mode = self.configuration.mode();
        let can_toggle_files =
            mode.includes_files() && self.configuration.files_exclude().has_any_value();
        can_toggle_files || mode.includes_git_ignore()
    }

    /// Reacts to a configuration change, or performs the initial sync when
    /// `event` is `None`.
    ///
    /// If a managed setting no longer holds either the value it had before
    /// the toggle or the value the toggle wrote, someone else edited it and
    /// the matching restore point is discarded. The live value is left alone.
    pub async fn on_configuration_changed(&self, event: Option<&ConfigurationChangeEvent>) {
        if self.is_working() {
            return;
        }
        if let Some(event) = event
            && ![FILES_EXCLUDE, EXCLUDE_GIT_IGNORE, MODE]
                .iter()
                .any(|section| event.affects_configuration(section))
        {
            return;
        }

        let mode = self.configuration.mode();
        let mut cleared = false;

        if mode.includes_files()
            && let Some(saved) = self.saved_exclude_configuration()
        {
            debug!("checking files.exclude against saved state");
            let live = self.configuration.files_exclude();
            let matches_applied = self
                .applied_exclude_configuration()
                .is_some_and(|applied| same_layers(&applied, &live));

            if !same_layers(&saved, &live) && !matches_applied {
                info!("files.exclude was edited directly, clearing saved state");
                if let Err(e) = self.clear_exclude_configuration().await {
                    warn!("Failed to clear files.exclude state: {e:#}");
                }
                cleared = true;
            }
        }

        if mode.includes_git_ignore()
            && let Some(saved) = self.saved_git_ignore_state()
            && self.configuration.git_ignore() != !saved
        {
            info!("explorer.excludeGitIgnore was edited directly, clearing saved state");
            if let Err(e) = self.clear_git_ignore_state().await {
                warn!("Failed to clear git ignore state: {e:#}");
            }
            cleared = true;
        }

        if cleared {
            self.fire_toggled();
        }
    }

    /// Switches the managed settings off, saving what they were.
    pub async fn apply_configuration(&self) {
        if self.is_working() || self.toggled() {
            return;
        }
        let Some(guard) = WorkingGuard::acquire(&self.working) else {
            return;
        };

        info!("applying exclude configuration");
        if let Err(e) = self.apply_segments().await {
            error!("Failed to apply exclude configuration: {e:#}");
            self.clear_after_failure().await;
        }

        drop(guard);
        debug!("apply done");
        self.fire_toggled();
    }

    /// Writes the saved values back and forgets them.
    pub async fn restore_configuration(&self) {
        if self.is_working() || !self.toggled() {
            return;
        }
        let Some(guard) = WorkingGuard::acquire(&self.working) else {
            return;
        };

        info!("restoring exclude configuration");
        if let Err(e) = self.restore_segments().await {
            error!("Failed to restore exclude configuration: {e:#}");
            self.clear_after_failure().await;
        }

        drop(guard);
        debug!("restore done");
        self.fire_toggled();
    }

    pub async fn toggle_configuration(&self) {
        if self.is_working() {
            return;
        }

        debug!("toggling exclude configuration");
        if self.toggled() {
            self.restore_configuration().await;
        } else {
            self.apply_configuration().await;
        }
    }

    async fn apply_segments(&self) -> Result<()> {
        let mode = self.configuration.mode();
        let mut writes: Vec<PendingWrite<'_>> = Vec::new();

        if mode.includes_files() {
            let exclude = self.configuration.files_exclude();
            if exclude.has_any_value() {
                self.save_exclude_configuration(Some(&exclude)).await?;

                let applied = exclude.to_applied();
                for target in ConfigurationTarget::ALL {
                    if let Some(value) = applied.value(target) {
                        writes.push(self.configuration.update(FILES_EXCLUDE, Some(value), target));
                    }
                }

                self.save_applied_exclude_configuration(Some(&applied))
                    .await?;
            }
        }

        if mode.includes_git_ignore() && self.configuration.git_ignore() {
            self.save_git_ignore_state(true).await?;
            writes.push(self.configuration.update(
                EXCLUDE_GIT_IGNORE,
                Some(&false),
                self.configuration.git_ignore_target(),
            ));
        }

        settle(writes).await
    }

    async fn restore_segments(&self) -> Result<()> {
        let mode = self.configuration.mode();
        let mut writes: Vec<PendingWrite<'_>> = Vec::new();

        if mode.includes_files()
            && let Some(excludes) = self.saved_exclude_configuration()
        {
            for target in ConfigurationTarget::ALL {
                if let Some(value) = excludes.value(target) {
                    writes.push(self.configuration.update(FILES_EXCLUDE, Some(value), target));
                }
            }
        }

        if mode.includes_git_ignore()
            && let Some(saved) = self.saved_git_ignore_state()
        {
            writes.push(self.configuration.update(
                EXCLUDE_GIT_IGNORE,
                Some(&saved),
                self.configuration.git_ignore_target(),
            ));
        }

        // The restore point is single use. It is dropped alongside the writes,
        // which are issued first and still land if clearing fails.
        let (written, cleared) = tokio::join!(settle(writes), self.clear_all_states());
        written.and(cleared)
    }

    async fn clear_after_failure(&self) {
        if let Err(e) = self.clear_all_states().await {
            error!("Failed to clear saved state: {e:#}");
        }
    }

    async fn clear_exclude_configuration(&self) -> Result<()> {
        self.save_applied_exclude_configuration(None).await?;
        self.save_exclude_configuration(None).await
    }

    async fn clear_git_ignore_state(&self) -> Result<()> {
        self.storage
            .store_workspace::<bool>(StorageKey::GitIgnoreSavedState, None)
            .await
    }

    async fn clear_all_states(&self) -> Result<()> {
        self.clear_exclude_configuration().await?;
        self.clear_git_ignore_state().await
    }

    fn stored_exclude_configuration(&self) -> Option<StoredFilesExcludes> {
        self.storage.get_workspace(StorageKey::SavedState)
    }

    /// Reads the restore snapshot and publishes the context flags.
    fn saved_exclude_configuration(&self) -> Option<StoredFilesExcludes> {
        let excludes = self.stored_exclude_configuration();
        self.update_context();
        excludes
    }

    fn applied_exclude_configuration(&self) -> Option<StoredFilesExcludes> {
        self.storage.get_workspace(StorageKey::AppliedState)
    }

    fn saved_git_ignore_state(&self) -> Option<bool> {
        self.storage.get_workspace(StorageKey::GitIgnoreSavedState)
    }

    async fn save_exclude_configuration(&self, excludes: Option<&StoredFilesExcludes>) -> Result<()> {
        self.storage
            .store_workspace(StorageKey::SavedState, excludes)
            .await
    }

    async fn save_applied_exclude_configuration(
        &self,
        excludes: Option<&StoredFilesExcludes>,
    ) -> Result<()> {
        self.storage
            .store_workspace(StorageKey::AppliedState, excludes)
            .await
    }

    async fn save_git_ignore_state(&self, state: bool) -> Result<()> {
        self.storage
            .store_workspace(StorageKey::GitIgnoreSavedState, Some(&state))
            .await
    }

    fn update_context(&self) {
        let host = self.configuration.host();
        host.set_context(TOGGLED_CONTEXT, self.toggled());
        if !self.loaded.swap(true, Ordering::SeqCst) {
            host.set_context(LOADED_CONTEXT, true);
        }
    }

    fn fire_toggled(&self) {
        self.update_context();
        let _ = self.on_did_toggle.send(());
    }
}

/// Runs every pending write to completion, then fails if any of them failed.
async fn settle(writes: Vec<PendingWrite<'_>>) -> Result<()> {
    if writes.is_empty() {
        return Ok(());
    }

    let failures: Vec<anyhow::Error> = join_all(writes)
        .await
        .into_iter()
        .filter_map(Result::err)
        .collect();
    for failure in &failures {
        warn!("Configuration write failed: {failure:#}");
    }

    match failures.len() {
        0 => Ok(()),
        count => anyhow::bail!("{count} configuration write(s) failed"),
    }
}
