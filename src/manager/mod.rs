pub mod layout;
pub mod ledger;
pub mod settings;

use chrono::{DateTime, Local};
use serde::Serialize;

use crate::installer::{Installer, InstallerEvent, StatusSink};
use crate::manager::layout::{SettingsLayout, project};
use crate::manager::ledger::PendingActions;
use crate::manager::settings::{SettingsStore, SettingsValues, StoredSettings};
use crate::schedule::timer::{UpdateTimer, Watchdog};

#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize)]
pub enum SaveStatus {
    Success,
    NotValid,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SaveResponse {
    pub status: SaveStatus,
    pub settings: SettingsLayout,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct StatusMessage {
    pub message: String,
    pub is_error: bool,
}

/// Process-lifetime application state. Every method runs on the single event
/// thread, so nothing in here is shared or locked.
pub struct ExtensionManager<I, S> {
    installer: I,
    status: S,
    store: SettingsStore,
    settings: StoredSettings,
    ledger: PendingActions,
    categories: Vec<String>,
    update_timer: UpdateTimer,
    watchdog: Watchdog,
    last_status: Option<StatusMessage>,
}

impl<I, S> ExtensionManager<I, S>
where
    I: Installer,
    S: StatusSink,
{
    pub fn new(installer: I, status: S, store: SettingsStore, settings: StoredSettings) -> Self {
        Self {
            installer,
            status,
            store,
            settings,
            ledger: PendingActions::default(),
            categories: Vec::new(),
            update_timer: UpdateTimer::new(),
            watchdog: Watchdog::default(),
            last_status: None,
        }
    }

    /// Arms the update timer from the stored settings.
    pub fn start(&mut self, now: DateTime<Local>) {
        match self.update_timer.rearm(&self.settings.update_time, now) {
            Some(deadline) => log::info!("next update check at {}", deadline.to_rfc3339()),
            None => log::info!("automatic updates are not scheduled"),
        }
    }

    /// Read path: every fresh read starts from an empty ledger.
    pub fn get_settings(&mut self) -> SettingsLayout {
        self.ledger.reset();
        project(
            self.settings.to_values(),
            &self.ledger,
            &self.categories,
            &self.installer,
        )
    }

    /// Write path. Only a valid, non-dry-run submission is persisted, re-arms
    /// the update timer and flushes the pending actions.
    pub fn save_settings(
        &mut self,
        mut values: SettingsValues,
        dry_run: bool,
        now: DateTime<Local>,
    ) -> SaveResponse {
        self.ledger.apply_submission(&mut values, &self.installer);

        let layout = project(values, &self.ledger, &self.categories, &self.installer);
        let status = if layout.has_error {
            SaveStatus::NotValid
        } else {
            SaveStatus::Success
        };

        if !dry_run && !layout.has_error {
            self.commit(layout.values.clone(), now);
        }

        SaveResponse {
            status,
            settings: layout,
        }
    }

    fn commit(&mut self, values: SettingsValues, now: DateTime<Local>) {
        self.settings = StoredSettings::from_values(values);
        if let Err(err) = self.store.save(&self.settings) {
            log::error!("failed to persist settings: {err:#}");
        }

        if self.installer.features().log_mode {
            self.installer.set_log_state(self.settings.logging);
        }

        self.start(now);
        let performed = self.ledger.flush(&mut self.installer);
        log::debug!("flushed {performed} pending action(s)");
    }

    pub fn handle_installer_event(&mut self, event: InstallerEvent) {
        match event {
            InstallerEvent::RepositoryChanged(categories) => {
                log::debug!("repository lists {} categories", categories.len());
                self.categories = categories;
            }
            InstallerEvent::InstallsChanged(installed) => {
                log::info!("installed extensions: {}", installed.join(", "));
            }
            InstallerEvent::UpdatesChanged(updates) => {
                log::info!("updates available: {}", updates.join(", "));
            }
            InstallerEvent::StatusChanged { message, is_error } => {
                if is_error {
                    log::warn!("installer: {message}");
                }
                self.status.set_status(&message, is_error);
                self.last_status = Some(StatusMessage { message, is_error });
            }
        }
    }

    pub fn core_paired(&mut self, now: DateTime<Local>) {
        log::info!("core paired");
        self.watchdog.start(now);
    }

    pub fn core_unpaired(&mut self) {
        log::info!("core unpaired");
        self.watchdog.stop();
        self.installer.restart_manager();
    }

    pub fn fire_due_timers(&mut self, now: DateTime<Local>) {
        if self.update_timer.take_due(now) {
            log::info!("it's update time");
            self.installer.update_all();
            self.start(now);
        }

        if self.watchdog.take_due(now) {
            // Re-asserting the last status detects a stalled status channel.
            if let Some(last) = &self.last_status {
                self.status.set_status(&last.message, last.is_error);
            }
        }
    }

    pub fn next_deadline(&self) -> Option<DateTime<Local>> {
        match (self.update_timer.deadline(), self.watchdog.deadline()) {
            (Some(update), Some(watchdog)) => Some(update.min(watchdog)),
            (update, watchdog) => update.or(watchdog),
        }
    }

    #[cfg(test)]
    pub fn settings(&self) -> &StoredSettings {
        &self.settings
    }

    #[cfg(test)]
    pub fn categories(&self) -> &[String] {
        &self.categories
    }

    #[cfg(test)]
    pub fn installer(&self) -> &I {
        &self.installer
    }

    #[cfg(test)]
    pub fn last_status(&self) -> Option<&StatusMessage> {
        self.last_status.as_ref()
    }

    #[cfg(test)]
    pub fn update_deadline(&self) -> Option<DateTime<Local>> {
        self.update_timer.deadline()
    }

    pub fn pending(&self) -> &PendingActions {
        &self.ledger
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use chrono::{Duration, TimeZone};
    use serde_json::Value;
    use tempfile::{TempDir, tempdir};

    use super::*;
    use crate::installer::fake::{FakeInstaller, RecordingSink};
    use crate::installer::{ActionKind, Features};

    fn manager(dir: &TempDir) -> ExtensionManager<FakeInstaller, RecordingSink> {
        let mut installer = FakeInstaller::default().with_extension(0, "ext.foo", "Foo");
        installer.features = Features {
            auto_update: true,
            log_mode: true,
        };
        let store = SettingsStore::new(dir.path().join("config.json"));
        let mut manager =
            ExtensionManager::new(installer, RecordingSink::default(), store, StoredSettings::default());
        manager.handle_installer_event(InstallerEvent::RepositoryChanged(vec![
            "Playback".to_string(),
        ]));
        manager
    }

    fn morning() -> DateTime<Local> {
        Local
            .timestamp_opt(1_780_000_000, 0)
            .single()
            .expect("valid epoch")
    }

    #[test]
    fn committing_an_install_persists_and_flushes() {
        let dir = tempdir().expect("tempdir");
        let mut manager = manager(&dir);
        let values = SettingsValues {
            update_time: Some("14:30".to_string()),
            selected_category: Some(0),
            selected_extension: Some("ext.foo".to_string()),
            action: Some(ActionKind::Install),
            ..SettingsValues::default()
        };

        let response = manager.save_settings(values, false, morning());
        assert_eq!(response.status, SaveStatus::Success);
        assert_eq!(manager.pending().len(), 1);
        assert_eq!(
            manager.pending().get("ext.foo").map(|p| p.action),
            Some(ActionKind::Install)
        );
        assert_eq!(
            manager.installer().performed,
            vec![(ActionKind::Install, "ext.foo".to_string())]
        );
        assert!(manager.update_deadline().is_some());

        let raw: Value = serde_json::from_str(
            &fs::read_to_string(dir.path().join("config.json")).expect("persisted"),
        )
        .expect("json");
        assert_eq!(raw["settings"]["update_time"], Value::from("2:30pm"));
        assert!(raw["settings"].get("action").is_none());
        assert_eq!(manager.installer().log_state, Some(false));
    }

    #[test]
    fn invalid_time_is_rejected_without_side_effects() {
        let dir = tempdir().expect("tempdir");
        let mut manager = manager(&dir);
        let values = SettingsValues {
            update_time: Some("99:99".to_string()),
            ..SettingsValues::default()
        };

        let response = manager.save_settings(values, false, morning());
        assert_eq!(response.status, SaveStatus::NotValid);
        assert_eq!(response.settings.values.update_time.as_deref(), Some("99:99"));
        assert!(!dir.path().join("config.json").exists());
        assert!(manager.update_deadline().is_none());
        assert_eq!(manager.settings().update_time, "02:00");
    }

    #[test]
    fn dry_run_updates_ledger_but_commits_nothing() {
        let dir = tempdir().expect("tempdir");
        let mut manager = manager(&dir);
        let values = SettingsValues {
            selected_category: Some(0),
            selected_extension: Some("ext.foo".to_string()),
            action: Some(ActionKind::Install),
            ..SettingsValues::default()
        };

        let response = manager.save_settings(values, true, morning());
        assert_eq!(response.status, SaveStatus::Success);
        assert!(manager.pending().is_pending("ext.foo"));
        assert!(manager.installer().performed.is_empty());
        assert!(!dir.path().join("config.json").exists());
    }

    #[test]
    fn reading_the_form_discards_uncommitted_actions() {
        let dir = tempdir().expect("tempdir");
        let mut manager = manager(&dir);
        let values = SettingsValues {
            selected_category: Some(0),
            selected_extension: Some("ext.foo".to_string()),
            action: Some(ActionKind::Install),
            ..SettingsValues::default()
        };
        manager.save_settings(values, true, morning());

        let layout = manager.get_settings();
        assert!(manager.pending().is_empty());
        assert_eq!(layout.values.update_time.as_deref(), Some("2:00am"));
    }

    #[test]
    fn update_timer_fires_once_and_rearms() {
        let dir = tempdir().expect("tempdir");
        let mut manager = manager(&dir);
        let now = morning();
        manager.start(now);
        let deadline = manager.update_deadline().expect("armed");

        manager.fire_due_timers(deadline - Duration::seconds(1));
        assert_eq!(manager.installer().update_all_calls, 0);

        manager.fire_due_timers(deadline);
        assert_eq!(manager.installer().update_all_calls, 1);
        let next = manager.update_deadline().expect("re-armed");
        assert!(next > deadline);
    }

    #[test]
    fn watchdog_replays_last_status_while_paired() {
        let dir = tempdir().expect("tempdir");
        let mut manager = manager(&dir);
        let now = morning();
        manager.handle_installer_event(InstallerEvent::StatusChanged {
            message: "Idle".to_string(),
            is_error: false,
        });
        manager.core_paired(now);
        assert!(manager.next_deadline().is_some());

        manager.fire_due_timers(now + Duration::seconds(60));
        assert_eq!(
            manager.status.messages,
            vec![("Idle".to_string(), false), ("Idle".to_string(), false)]
        );

        manager.core_unpaired();
        assert_eq!(manager.installer().restart_calls, 1);
        assert!(manager.next_deadline().is_none());
    }
}
