use std::sync::mpsc::{Receiver, RecvTimeoutError, Sender};
use std::time::Duration;

use chrono::Local;

use crate::installer::{Installer, InstallerEvent, StatusSink};
use crate::manager::layout::SettingsLayout;
use crate::manager::settings::SettingsValues;
use crate::manager::{ExtensionManager, SaveResponse};

/// Upper bound on a single wait, so wall-clock jumps are noticed.
const MAX_IDLE_WAIT: Duration = Duration::from_secs(60);

pub enum Event {
    GetSettings {
        reply: Sender<SettingsLayout>,
    },
    SaveSettings {
        values: SettingsValues,
        dry_run: bool,
        reply: Sender<SaveResponse>,
    },
    Installer(InstallerEvent),
    CorePaired,
    CoreUnpaired,
    Shutdown,
}

impl From<InstallerEvent> for Event {
    fn from(event: InstallerEvent) -> Self {
        Event::Installer(event)
    }
}

/// Drives the manager until shutdown or until every sender is gone. Events
/// are handled one at a time; timers fire between events.
pub fn run_event_loop<I, S>(manager: &mut ExtensionManager<I, S>, events: &Receiver<Event>)
where
    I: Installer,
    S: StatusSink,
{
    manager.start(Local::now());
    loop {
        let now = Local::now();
        manager.fire_due_timers(now);

        let wait = manager
            .next_deadline()
            .map(|deadline| (deadline - now).to_std().unwrap_or(Duration::ZERO))
            .unwrap_or(MAX_IDLE_WAIT)
            .min(MAX_IDLE_WAIT);

        let event = match events.recv_timeout(wait) {
            Ok(event) => event,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => {
                log::info!("event channel closed");
                break;
            }
        };

        if !handle_event(manager, event) {
            break;
        }
    }
}

/// Returns false once the loop should stop.
fn handle_event<I, S>(manager: &mut ExtensionManager<I, S>, event: Event) -> bool
where
    I: Installer,
    S: StatusSink,
{
    match event {
        Event::GetSettings { reply } => {
            let _ = reply.send(manager.get_settings());
        }
        Event::SaveSettings {
            values,
            dry_run,
            reply,
        } => {
            let response = manager.save_settings(values, dry_run, Local::now());
            log::debug!("pending actions: {}", manager.pending().summary());
            let _ = reply.send(response);
        }
        Event::Installer(event) => manager.handle_installer_event(event),
        Event::CorePaired => manager.core_paired(Local::now()),
        Event::CoreUnpaired => manager.core_unpaired(),
        Event::Shutdown => {
            log::info!("shutting down");
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;
    use std::thread;

    use tempfile::tempdir;

    use super::*;
    use crate::installer::fake::{FakeInstaller, RecordingSink};
    use crate::manager::SaveStatus;
    use crate::manager::settings::{SettingsStore, StoredSettings};

    #[test]
    fn serves_settings_requests_until_shutdown() {
        let dir = tempdir().expect("tempdir");
        let mut manager = ExtensionManager::new(
            FakeInstaller::default(),
            RecordingSink::default(),
            SettingsStore::new(dir.path().join("config.json")),
            StoredSettings::default(),
        );
        let (tx, rx) = mpsc::channel();

        let client = thread::spawn(move || {
            tx.send(Event::from(InstallerEvent::RepositoryChanged(vec![
                "Playback".to_string(),
            ])))
            .expect("send");

            let (reply_tx, reply_rx) = mpsc::channel();
            tx.send(Event::GetSettings { reply: reply_tx }).expect("send");
            let layout = reply_rx.recv().expect("layout");

            let (reply_tx, reply_rx) = mpsc::channel();
            tx.send(Event::SaveSettings {
                values: SettingsValues {
                    update_time: Some("nope".to_string()),
                    ..SettingsValues::default()
                },
                dry_run: false,
                reply: reply_tx,
            })
            .expect("send");
            let response = reply_rx.recv().expect("response");

            tx.send(Event::Shutdown).expect("send");
            (layout, response)
        });

        run_event_loop(&mut manager, &rx);
        let (layout, response) = client.join().expect("client thread");
        assert!(!layout.has_error);
        assert_eq!(response.status, SaveStatus::NotValid);
        assert_eq!(manager.categories(), ["Playback".to_string()]);
    }

    #[test]
    fn closed_channel_stops_the_loop() {
        let dir = tempdir().expect("tempdir");
        let mut manager = ExtensionManager::new(
            FakeInstaller::default(),
            RecordingSink::default(),
            SettingsStore::new(dir.path().join("config.json")),
            StoredSettings::default(),
        );
        let (tx, rx) = mpsc::channel::<Event>();
        drop(tx);
        run_event_loop(&mut manager, &rx);
        assert_eq!(manager.installer().update_all_calls, 0);
    }
}
