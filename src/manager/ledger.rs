use std::collections::HashMap;

use crate::installer::{ActionKind, Installer};
use crate::manager::settings::SettingsValues;

pub const NO_PENDING_ACTIONS: &str = "(none)";

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct PendingAction {
    pub action: ActionKind,
    pub friendly: String,
}

/// Session-scoped set of actions the user queued, one per extension.
#[derive(Debug, Default)]
pub struct PendingActions {
    entries: HashMap<String, PendingAction>,
}

impl PendingActions {
    pub fn reset(&mut self) {
        self.entries.clear();
    }

    pub fn apply_delta<I>(&mut self, extension_id: Option<&str>, action: ActionKind, installer: &I)
    where
        I: Installer + ?Sized,
    {
        let Some(extension_id) = extension_id else {
            return;
        };
        if action == ActionKind::NoChange {
            self.entries.remove(extension_id);
            return;
        }

        let display_name = installer.details(extension_id).display_name;
        self.entries.insert(
            extension_id.to_string(),
            PendingAction {
                action,
                friendly: format!("{} {}", action.label(), display_name),
            },
        );
    }

    /// Consumes the submitted action and applies it to the selected extension.
    pub fn apply_submission<I>(&mut self, values: &mut SettingsValues, installer: &I)
    where
        I: Installer + ?Sized,
    {
        if let Some(action) = values.take_action() {
            self.apply_delta(values.selected_extension.as_deref(), action, installer);
        }
    }

    pub fn is_pending(&self, extension_id: &str) -> bool {
        self.entries.contains_key(extension_id)
    }

    #[cfg(test)]
    pub fn get(&self, extension_id: &str) -> Option<&PendingAction> {
        self.entries.get(extension_id)
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn summary(&self) -> String {
        if self.entries.is_empty() {
            return NO_PENDING_ACTIONS.to_string();
        }
        self.entries
            .values()
            .map(|pending| pending.friendly.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Hands every entry to the installer. Iteration order is unspecified and
    /// the ledger keeps its entries until the next reset.
    pub fn flush<I>(&self, installer: &mut I) -> usize
    where
        I: Installer + ?Sized,
    {
        for (extension_id, pending) in &self.entries {
            log::info!("performing pending action: {}", pending.friendly);
            installer.perform_action(pending.action, extension_id);
        }
        self.entries.len()
    }
}
