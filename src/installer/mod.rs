pub mod catalog;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    /// Reverts whatever is pending for the extension; never sent to the installer.
    NoChange,
    Install,
    Update,
    Uninstall,
    Start,
    Restart,
    Stop,
}

impl ActionKind {
    pub fn label(self) -> &'static str {
        match self {
            ActionKind::NoChange => "Revert Action",
            ActionKind::Install => "Install",
            ActionKind::Update => "Update",
            ActionKind::Uninstall => "Uninstall",
            ActionKind::Start => "Start",
            ActionKind::Restart => "Restart",
            ActionKind::Stop => "Stop",
        }
    }
}

/// One `{title, value}` pair of a catalog listing.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct CatalogEntry {
    pub title: String,
    pub value: String,
}

#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct ExtensionDetails {
    pub description: Option<String>,
    pub author: String,
    pub display_name: String,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ExtensionState {
    NotInstalled,
    Stopped,
    Running,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ExtensionStatus {
    pub state: ExtensionState,
    pub version: Option<String>,
    pub logging: Option<bool>,
}

#[derive(Debug, Clone, Copy, Default, Eq, PartialEq, Deserialize)]
pub struct Features {
    #[serde(default)]
    pub auto_update: bool,
    #[serde(default)]
    pub log_mode: bool,
}

/// Push notifications raised by the installer.
#[derive(Debug, Clone, PartialEq)]
pub enum InstallerEvent {
    /// Category titles; a category's index in this list is its identifier.
    RepositoryChanged(Vec<String>),
    InstallsChanged(Vec<String>),
    UpdatesChanged(Vec<String>),
    StatusChanged { message: String, is_error: bool },
}

/// The external collaborator that discovers, installs and runs extensions.
///
/// Query methods must be answered from the installer's current state; callers
/// re-query on every projection and never cache results across calls.
pub trait Installer {
    fn extensions_by_category(&self, category: usize) -> Vec<CatalogEntry>;
    fn details(&self, extension_id: &str) -> ExtensionDetails;
    fn status(&self, extension_id: &str) -> ExtensionStatus;
    fn actions(&self, extension_id: &str) -> Vec<ActionKind>;
    fn features(&self) -> Features;

    /// Invocation order across extensions is not guaranteed.
    fn perform_action(&mut self, action: ActionKind, extension_id: &str);
    fn update_all(&mut self);
    fn restart_manager(&mut self);
    fn set_log_state(&mut self, enabled: bool);
}

pub trait StatusSink {
    fn set_status(&mut self, message: &str, is_error: bool);
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_kinds_use_snake_case_on_the_wire() {
        let encoded = serde_json::to_string(&ActionKind::NoChange).expect("encode");
        assert_eq!(encoded, "\"no_change\"");
        let decoded: ActionKind = serde_json::from_str("\"uninstall\"").expect("decode");
        assert_eq!(decoded, ActionKind::Uninstall);
    }

    #[test]
    fn revert_sentinel_has_its_own_label() {
        assert_eq!(ActionKind::NoChange.label(), "Revert Action");
        assert_eq!(ActionKind::Restart.label(), "Restart");
    }
}
