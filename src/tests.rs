#[cfg(test)]
mod tests {
    use crate::builders::storage::{MemoryStorage, Storage, StorageKey, WorkspaceStorage};
    use crate::core::config::{EXCLUDE_GIT_IGNORE, ExtensionConfiguration, FILES_EXCLUDE, MODE};
    use crate::core::controller::{ExcludeController, LOADED_CONTEXT, TOGGLED_CONTEXT};
    use crate::core::host::{
        ConfigurationChangeEvent, ConfigurationTarget, MemoryConfigurationHost,
    };
    use serde_json::{Value, json};
    use std::sync::Arc;

    struct Harness {
        host: Arc<MemoryConfigurationHost>,
        storage: Arc<MemoryStorage>,
        controller: ExcludeController,
    }

    fn setup(host: MemoryConfigurationHost) -> Harness {
        let host = Arc::new(host);
        let storage = Arc::new(MemoryStorage::new());
        let controller = ExcludeController::new(
            ExtensionConfiguration::new(host.clone()),
            Storage::new(storage.clone()),
        );
        Harness {
            host,
            storage,
            controller,
        }
    }

    fn workspace_excludes(mode: &str) -> MemoryConfigurationHost {
        MemoryConfigurationHost::new()
            .with_value(MODE, json!(mode), ConfigurationTarget::Global)
            .with_value(FILES_EXCLUDE, json!({"a/**": true}), ConfigurationTarget::Workspace)
    }

    fn changed(key: &str) -> ConfigurationChangeEvent {
        ConfigurationChangeEvent::new([key])
    }

    fn workspace_value(harness: &Harness, key: &str) -> Option<Value> {
        harness.host.value(key, ConfigurationTarget::Workspace)
    }

    #[tokio::test]
    async fn test_apply_disables_patterns_and_saves_restore_point() {
        let h = setup(workspace_excludes("files"));

        h.controller.apply_configuration().await;

        assert!(h.controller.toggled());
        assert_eq!(workspace_value(&h, FILES_EXCLUDE), Some(json!({"a/**": false})));
        assert_eq!(
            h.storage.get(StorageKey::SavedState),
            Some(json!({"key": "files.exclude", "workspaceValue": {"a/**": true}}))
        );
        assert_eq!(
            h.storage.get(StorageKey::AppliedState),
            Some(json!({"key": "files.exclude", "workspaceValue": {"a/**": false}}))
        );
        assert_eq!(h.host.context(TOGGLED_CONTEXT), Some(true));
        assert_eq!(h.host.context(LOADED_CONTEXT), Some(true));
    }

    #[tokio::test]
    async fn test_apply_twice_is_a_no_op() {
        let h = setup(workspace_excludes("files"));
        let mut toggles = h.controller.on_did_toggle();

        h.controller.apply_configuration().await;
        h.controller.apply_configuration().await;

        assert_eq!(h.host.writes().len(), 1);
        assert!(toggles.try_recv().is_ok());
        assert!(toggles.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_round_trip_in_both_mode() {
        let h = setup(
            workspace_excludes("both").with_value(
                EXCLUDE_GIT_IGNORE,
                json!(true),
                ConfigurationTarget::Global,
            ),
        );

        h.controller.apply_configuration().await;
        assert!(h.controller.toggled());
        assert_eq!(
            h.host.value(EXCLUDE_GIT_IGNORE, ConfigurationTarget::Global),
            Some(json!(false))
        );
        assert_eq!(h.storage.get(StorageKey::GitIgnoreSavedState), Some(json!(true)));

        h.controller.restore_configuration().await;
        assert!(!h.controller.toggled());
        assert_eq!(workspace_value(&h, FILES_EXCLUDE), Some(json!({"a/**": true})));
        assert_eq!(
            h.host.value(EXCLUDE_GIT_IGNORE, ConfigurationTarget::Global),
            Some(json!(true))
        );
        assert!(h.storage.is_empty());
    }

    #[tokio::test]
    async fn test_git_ignore_written_where_it_is_defined() {
        let h = setup(
            MemoryConfigurationHost::new()
                .with_value(MODE, json!("gitignore"), ConfigurationTarget::Global)
                .with_value(EXCLUDE_GIT_IGNORE, json!(true), ConfigurationTarget::Global)
                .with_value(EXCLUDE_GIT_IGNORE, json!(true), ConfigurationTarget::Workspace),
        );

        h.controller.toggle_configuration().await;

        assert_eq!(workspace_value(&h, EXCLUDE_GIT_IGNORE), Some(json!(false)));
        assert_eq!(
            h.host.value(EXCLUDE_GIT_IGNORE, ConfigurationTarget::Global),
            Some(json!(true))
        );
    }

    #[tokio::test]
    async fn test_git_ignore_already_off_is_not_toggled() {
        let h = setup(
            MemoryConfigurationHost::new()
                .with_value(MODE, json!("gitignore"), ConfigurationTarget::Global)
                .with_value(EXCLUDE_GIT_IGNORE, json!(false), ConfigurationTarget::Global),
        );

        h.controller.apply_configuration().await;

        assert!(!h.controller.toggled());
        assert!(h.host.writes().is_empty());
    }

    #[tokio::test]
    async fn test_own_writes_do_not_clear_state() {
        let h = setup(workspace_excludes("files"));
        h.controller.apply_configuration().await;

        h.controller
            .on_configuration_changed(Some(&changed(FILES_EXCLUDE)))
            .await;

        assert!(h.controller.toggled());
        assert!(h.storage.get(StorageKey::SavedState).is_some());
    }

    #[tokio::test]
    async fn test_external_edit_forfeits_restore_point() {
        let h = setup(workspace_excludes("files"));
        h.controller.apply_configuration().await;
        let writes_before = h.host.writes().len();

        h.host.set_external(
            FILES_EXCLUDE,
            Some(json!({"a/**": true, "b/**": true})),
            ConfigurationTarget::Workspace,
        );
        h.controller
            .on_configuration_changed(Some(&changed(FILES_EXCLUDE)))
            .await;

        assert!(!h.controller.toggled());
        assert_eq!(h.storage.get(StorageKey::SavedState), None);
        assert_eq!(h.storage.get(StorageKey::AppliedState), None);
        assert_eq!(h.host.writes().len(), writes_before);
        assert_eq!(
            workspace_value(&h, FILES_EXCLUDE),
            Some(json!({"a/**": true, "b/**": true}))
        );
    }

    #[tokio::test]
    async fn test_reverting_by_hand_keeps_restore_point() {
        let h = setup(workspace_excludes("files"));
        h.controller.apply_configuration().await;

        h.host.set_external(
            FILES_EXCLUDE,
            Some(json!({"a/**": true})),
            ConfigurationTarget::Workspace,
        );
        h.controller
            .on_configuration_changed(Some(&changed(FILES_EXCLUDE)))
            .await;

        assert!(h.controller.toggled());
    }

    #[tokio::test]
    async fn test_removed_layer_is_an_external_edit() {
        let h = setup(workspace_excludes("files"));
        h.controller.apply_configuration().await;

        h.host
            .set_external(FILES_EXCLUDE, Some(json!({})), ConfigurationTarget::Workspace);
        h.controller
            .on_configuration_changed(Some(&changed(FILES_EXCLUDE)))
            .await;

        assert!(!h.controller.toggled());
    }

    #[tokio::test]
    async fn test_external_git_ignore_edit_clears_saved_state() {
        let h = setup(
            MemoryConfigurationHost::new()
                .with_value(MODE, json!("gitignore"), ConfigurationTarget::Global),
        );
        h.controller.apply_configuration().await;
        assert!(h.controller.toggled());

        h.host
            .set_external(EXCLUDE_GIT_IGNORE, Some(json!(true)), ConfigurationTarget::Global);
        h.controller
            .on_configuration_changed(Some(&changed(EXCLUDE_GIT_IGNORE)))
            .await;

        assert!(!h.controller.toggled());
        assert_eq!(h.storage.get(StorageKey::GitIgnoreSavedState), None);
    }

    #[tokio::test]
    async fn test_files_mode_ignores_git_ignore() {
        let h = setup(
            workspace_excludes("files").with_value(
                EXCLUDE_GIT_IGNORE,
                json!(true),
                ConfigurationTarget::Global,
            ),
        );
        h.controller.apply_configuration().await;
        assert_eq!(h.storage.get(StorageKey::GitIgnoreSavedState), None);

        h.host
            .set_external(EXCLUDE_GIT_IGNORE, Some(json!(false)), ConfigurationTarget::Global);
        h.controller
            .on_configuration_changed(Some(&changed(EXCLUDE_GIT_IGNORE)))
            .await;

        assert!(h.controller.toggled());
        assert_eq!(h.storage.get(StorageKey::GitIgnoreSavedState), None);
        assert!(h.storage.get(StorageKey::SavedState).is_some());
    }

    #[tokio::test]
    async fn test_unrelated_changes_are_ignored() {
        let h = setup(workspace_excludes("files"));
        h.controller.apply_configuration().await;
        h.host.set_external(
            FILES_EXCLUDE,
            Some(json!({"z/**": true})),
            ConfigurationTarget::Workspace,
        );

        h.controller
            .on_configuration_changed(Some(&changed("editor.fontSize")))
            .await;
        assert!(h.controller.toggled());

        h.controller.on_configuration_changed(None).await;
        assert!(!h.controller.toggled());
    }

    #[tokio::test]
    async fn test_second_toggle_while_writing_is_dropped() {
        let h = setup(workspace_excludes("files"));
        let gate = h.host.pause_writes().await;

        let first = h.controller.toggle_configuration();
        tokio::pin!(first);
        assert!(futures_util::poll!(&mut first).is_pending());
        assert!(h.controller.is_working());

        h.controller.toggle_configuration().await;
        h.controller.restore_configuration().await;

        drop(gate);
        first.await;

        assert!(!h.controller.is_working());
        assert!(h.controller.toggled());
        assert_eq!(h.host.writes().len(), 1);
        assert_eq!(workspace_value(&h, FILES_EXCLUDE), Some(json!({"a/**": false})));
    }

    #[tokio::test]
    async fn test_reconciler_waits_for_running_operation() {
        let h = setup(workspace_excludes("files"));
        let gate = h.host.pause_writes().await;

        let apply = h.controller.apply_configuration();
        tokio::pin!(apply);
        assert!(futures_util::poll!(&mut apply).is_pending());

        h.host.set_external(
            FILES_EXCLUDE,
            Some(json!({"b/**": true})),
            ConfigurationTarget::Workspace,
        );
        h.controller
            .on_configuration_changed(Some(&changed(FILES_EXCLUDE)))
            .await;
        assert!(h.storage.get(StorageKey::SavedState).is_some());

        drop(gate);
        apply.await;
    }

    #[tokio::test]
    async fn test_failed_write_clears_everything() {
        let h = setup(
            workspace_excludes("both").with_value(
                EXCLUDE_GIT_IGNORE,
                json!(true),
                ConfigurationTarget::Global,
            ),
        );
        h.host.reject_writes_to(EXCLUDE_GIT_IGNORE);
        let mut toggles = h.controller.on_did_toggle();

        h.controller.apply_configuration().await;

        // The files.exclude write still went through, only the saved state is gone.
        assert_eq!(workspace_value(&h, FILES_EXCLUDE), Some(json!({"a/**": false})));
        assert!(h.storage.is_empty());
        assert!(!h.controller.toggled());
        assert!(toggles.try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_failed_restore_still_forgets_restore_point() {
        let h = setup(workspace_excludes("files"));
        h.controller.apply_configuration().await;
        h.host.reject_writes_to(FILES_EXCLUDE);

        h.controller.restore_configuration().await;

        assert!(!h.controller.toggled());
        assert!(h.storage.is_empty());
        assert_eq!(workspace_value(&h, FILES_EXCLUDE), Some(json!({"a/**": false})));
    }

    #[tokio::test]
    async fn test_restore_writes_land_when_state_cannot_be_cleared() {
        let h = setup(workspace_excludes("files"));
        h.controller.apply_configuration().await;
        h.storage.reject_writes();
        let mut toggles = h.controller.on_did_toggle();

        h.controller.restore_configuration().await;

        assert_eq!(workspace_value(&h, FILES_EXCLUDE), Some(json!({"a/**": true})));
        assert!(toggles.try_recv().is_ok());
        assert!(!h.controller.is_working());
    }

    #[tokio::test]
    async fn test_when_clauses_are_toggled_and_restored_verbatim() {
        let original = json!({"a/**": true, "**/*.js": {"when": "$(basename).ts"}});
        let h = setup(MemoryConfigurationHost::new().with_value(
            FILES_EXCLUDE,
            original.clone(),
            ConfigurationTarget::Workspace,
        ));
        assert!(h.controller.can_toggle());

        h.controller.toggle_configuration().await;
        assert!(h.controller.toggled());
        assert_eq!(
            workspace_value(&h, FILES_EXCLUDE),
            Some(json!({"a/**": false, "**/*.js": false}))
        );

        h.controller.toggle_configuration().await;
        assert!(!h.controller.toggled());
        assert_eq!(workspace_value(&h, FILES_EXCLUDE), Some(original));
        assert!(h.storage.is_empty());
    }

    #[tokio::test]
    async fn test_restore_follows_current_mode() {
        let h = setup(
            workspace_excludes("both").with_value(
                EXCLUDE_GIT_IGNORE,
                json!(true),
                ConfigurationTarget::Global,
            ),
        );
        h.controller.apply_configuration().await;

        h.host
            .set_external(MODE, Some(json!("files")), ConfigurationTarget::Global);
        h.controller.on_configuration_changed(Some(&changed(MODE))).await;
        h.controller.restore_configuration().await;

        assert_eq!(workspace_value(&h, FILES_EXCLUDE), Some(json!({"a/**": true})));
        // Switching modes while toggled is not migrated: git ignore stays off.
        assert_eq!(
            h.host.value(EXCLUDE_GIT_IGNORE, ConfigurationTarget::Global),
            Some(json!(false))
        );
        assert!(h.storage.is_empty());
    }

    #[test]
    fn test_can_toggle() {
        let h = setup(
            MemoryConfigurationHost::new()
                .with_value(MODE, json!("files"), ConfigurationTarget::Global),
        );
        assert!(!h.controller.can_toggle());

        h.host
            .set_external(MODE, Some(json!("gitignore")), ConfigurationTarget::Global);
        assert!(h.controller.can_toggle());

        let h = setup(workspace_excludes("files"));
        assert!(h.controller.can_toggle());
    }

    #[tokio::test]
    async fn test_global_and_workspace_layers_are_handled_separately() {
        let h = setup(
            MemoryConfigurationHost::new()
                .with_value(FILES_EXCLUDE, json!({"g/**": true}), ConfigurationTarget::Global)
                .with_value(FILES_EXCLUDE, json!({"w/**": true}), ConfigurationTarget::Workspace),
        );

        h.controller.apply_configuration().await;
        assert_eq!(
            h.host.value(FILES_EXCLUDE, ConfigurationTarget::Global),
            Some(json!({"g/**": false}))
        );
        assert_eq!(workspace_value(&h, FILES_EXCLUDE), Some(json!({"w/**": false})));

        h.controller.toggle_configuration().await;
        assert_eq!(
            h.host.value(FILES_EXCLUDE, ConfigurationTarget::Global),
            Some(json!({"g/**": true}))
        );
        assert_eq!(workspace_value(&h, FILES_EXCLUDE), Some(json!({"w/**": true})));
    }
}
