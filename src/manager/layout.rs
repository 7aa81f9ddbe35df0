use serde::Serialize;
use serde_json::{Value, json};

use crate::installer::{ActionKind, ExtensionState, ExtensionStatus, Installer};
use crate::manager::ledger::PendingActions;
use crate::manager::settings::SettingsValues;
use crate::schedule::time_of_day::{TIME_FORMAT_HINT, UpdateTime};

/// Widgets of the settings form, in the wire shape the settings client renders.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Widget {
    Group {
        title: String,
        items: Vec<Widget>,
    },
    #[serde(rename = "string")]
    Text {
        title: String,
        setting: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    Dropdown {
        title: String,
        values: Vec<Choice>,
        setting: String,
    },
    Label {
        title: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Choice {
    pub title: String,
    pub value: Value,
}

impl Choice {
    fn new(title: impl Into<String>, value: Value) -> Self {
        Self {
            title: title.into(),
            value,
        }
    }

    fn placeholder(title: &str) -> Self {
        Self::new(title, Value::Null)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SettingsLayout {
    pub values: SettingsValues,
    pub layout: Vec<Widget>,
    pub has_error: bool,
}

/// Builds the settings form for `values`. Catalog data is re-read from the
/// installer on every call; a selection that no longer resolves is cleared.
pub fn project<I>(
    mut values: SettingsValues,
    ledger: &PendingActions,
    categories: &[String],
    installer: &I,
) -> SettingsLayout
where
    I: Installer + ?Sized,
{
    let mut has_error = false;

    let mut update_time_error = None;
    if let Some(raw) = values.update_time.as_deref().filter(|raw| !raw.is_empty()) {
        match raw.parse::<UpdateTime>() {
            Ok(time) => values.update_time = Some(time.to_string()),
            Err(err) => {
                log::debug!("rejecting update time: {err}");
                update_time_error = Some(TIME_FORMAT_HINT.to_string());
                has_error = true;
            }
        }
    }

    let features = installer.features();
    let mut global_items = Vec::new();
    if features.auto_update {
        global_items.push(Widget::Text {
            title: "Check for updates @ [hh:mm]".to_string(),
            setting: "update_time".to_string(),
            error: update_time_error,
        });
    }
    if features.log_mode {
        global_items.push(Widget::Dropdown {
            title: "Logging".to_string(),
            values: vec![
                Choice::new("Enabled", Value::Bool(true)),
                Choice::new("Disabled", Value::Bool(false)),
            ],
            setting: "logging".to_string(),
        });
    }

    let mut category_values = vec![Choice::placeholder("(select category)")];
    category_values.extend(
        categories
            .iter()
            .enumerate()
            .map(|(index, title)| Choice::new(title.clone(), json!(index))),
    );

    let mut selector_title = "[EXTENSION]".to_string();
    let mut selector_values = vec![Choice::placeholder("(select extension)")];
    let mut extension_title = "(no extension selected)".to_string();
    let mut extension_items = Vec::new();

    if let Some(category_index) = values.selected_category {
        match categories.get(category_index) {
            Some(category_title) => {
                let extensions = installer.extensions_by_category(category_index);
                selector_title = format!("[{} EXTENSIONS]", category_title.to_uppercase());
                selector_values.extend(
                    extensions
                        .iter()
                        .map(|entry| Choice::new(entry.title.clone(), json!(entry.value))),
                );

                let selected = values
                    .selected_extension
                    .as_deref()
                    .filter(|id| extensions.iter().any(|entry| entry.value == *id));
                match selected {
                    Some(extension_id) => {
                        let details = installer.details(extension_id);
                        extension_title = details
                            .description
                            .filter(|description| !description.is_empty())
                            .unwrap_or_else(|| "(no description)".to_string());
                        extension_items.push(Widget::Label {
                            title: format!("by: {}", details.author),
                        });
                        extension_items.push(Widget::Label {
                            title: status_title(&installer.status(extension_id)),
                        });
                        extension_items.push(Widget::Dropdown {
                            title: "Action".to_string(),
                            values: action_choices(extension_id, ledger, installer),
                            setting: "action".to_string(),
                        });
                    }
                    None => values.selected_extension = None,
                }
            }
            None => {
                log::debug!("clearing stale category selection {category_index}");
                values.selected_category = None;
                values.selected_extension = None;
            }
        }
    }

    let layout = vec![
        Widget::Group {
            title: "[GLOBAL SETTINGS]".to_string(),
            items: global_items,
        },
        Widget::Dropdown {
            title: "[CATEGORY]".to_string(),
            values: category_values,
            setting: "selected_category".to_string(),
        },
        Widget::Dropdown {
            title: selector_title,
            values: selector_values,
            setting: "selected_extension".to_string(),
        },
        Widget::Group {
            title: extension_title,
            items: extension_items,
        },
        Widget::Group {
            title: "[PENDING ACTIONS]".to_string(),
            items: vec![Widget::Label {
                title: ledger.summary(),
            }],
        },
    ];

    SettingsLayout {
        values,
        layout,
        has_error,
    }
}

fn action_choices<I>(extension_id: &str, ledger: &PendingActions, installer: &I) -> Vec<Choice>
where
    I: Installer + ?Sized,
{
    let offered = if ledger.is_pending(extension_id) {
        vec![ActionKind::NoChange]
    } else {
        installer.actions(extension_id)
    };

    let mut choices = vec![Choice::placeholder("(select action)")];
    choices.extend(
        offered
            .into_iter()
            .map(|action| Choice::new(action.label(), json!(action))),
    );
    choices
}

fn status_title(status: &ExtensionStatus) -> String {
    let Some(version) = status.version.as_deref() else {
        return "NOT INSTALLED".to_string();
    };
    let mut title = format!("INSTALLED: version {version}");
    if status.state == ExtensionState::Stopped {
        title.push_str(" (stopped)");
    }
    if status.logging == Some(true) {
        title.push_str(" [logging]");
    }
    title
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::installer::Features;
    use crate::installer::fake::FakeInstaller;

    fn installer() -> FakeInstaller {
        let mut installer = FakeInstaller::default()
            .with_extension(0, "ext.foo", "Foo")
            .with_extension(1, "ext.bar", "Bar");
        installer.features = Features {
            auto_update: true,
            log_mode: true,
        };
        installer
    }

    fn categories() -> Vec<String> {
        vec!["Playback".to_string(), "Library".to_string()]
    }

    fn group_items<'a>(layout: &'a SettingsLayout, title: &str) -> &'a [Widget] {
        layout
            .layout
            .iter()
            .find_map(|widget| match widget {
                Widget::Group { title: t, items } if t == title => Some(items.as_slice()),
                _ => None,
            })
            .expect("group present")
    }

    fn dropdown_values<'a>(layout: &'a SettingsLayout, setting: &str) -> Vec<&'a Choice> {
        fn walk<'a>(widgets: &'a [Widget], setting: &str, out: &mut Vec<&'a Choice>) {
            for widget in widgets {
                match widget {
                    Widget::Dropdown {
                        values, setting: s, ..
                    } if s == setting => out.extend(values.iter()),
                    Widget::Group { items, .. } => walk(items, setting, out),
                    _ => {}
                }
            }
        }
        let mut out = Vec::new();
        walk(&layout.layout, setting, &mut out);
        out
    }

    #[test]
    fn valid_time_is_canonicalized() {
        let values = SettingsValues {
            update_time: Some("14:30".to_string()),
            ..SettingsValues::default()
        };
        let layout = project(values, &PendingActions::default(), &categories(), &installer());
        assert!(!layout.has_error);
        assert_eq!(layout.values.update_time.as_deref(), Some("2:30pm"));
    }

    #[test]
    fn invalid_time_is_echoed_with_field_error() {
        let values = SettingsValues {
            update_time: Some("99:99".to_string()),
            ..SettingsValues::default()
        };
        let layout = project(values, &PendingActions::default(), &categories(), &installer());
        assert!(layout.has_error);
        assert_eq!(layout.values.update_time.as_deref(), Some("99:99"));
        assert!(matches!(
            &group_items(&layout, "[GLOBAL SETTINGS]")[0],
            Widget::Text { error: Some(error), .. } if error == TIME_FORMAT_HINT
        ));
    }

    #[test]
    fn empty_time_is_not_an_error() {
        let values = SettingsValues {
            update_time: Some(String::new()),
            ..SettingsValues::default()
        };
        let layout = project(values, &PendingActions::default(), &categories(), &installer());
        assert!(!layout.has_error);
    }

    #[test]
    fn disabled_features_hide_global_controls() {
        let mut installer = installer();
        installer.features = Features::default();
        let layout = project(
            SettingsValues::default(),
            &PendingActions::default(),
            &categories(),
            &installer,
        );
        assert!(group_items(&layout, "[GLOBAL SETTINGS]").is_empty());
    }

    #[test]
    fn selected_extension_offers_installer_actions() {
        let values = SettingsValues {
            selected_category: Some(0),
            selected_extension: Some("ext.foo".to_string()),
            ..SettingsValues::default()
        };
        let layout = project(values, &PendingActions::default(), &categories(), &installer());

        let actions = dropdown_values(&layout, "action");
        let titles = actions.iter().map(|c| c.title.as_str()).collect::<Vec<_>>();
        assert_eq!(titles, vec!["(select action)", "Install"]);
        assert_eq!(actions[1].value, json!("install"));

        let items = group_items(&layout, "Foo description");
        assert_eq!(
            items[0],
            Widget::Label {
                title: "by: Test Author".to_string()
            }
        );
        assert_eq!(
            items[1],
            Widget::Label {
                title: "NOT INSTALLED".to_string()
            }
        );
        assert!(layout.layout.iter().any(|widget| matches!(
            widget,
            Widget::Dropdown { title, .. } if title == "[PLAYBACK EXTENSIONS]"
        )));
    }

    #[test]
    fn pending_extension_only_offers_revert() {
        let installer = installer();
        let mut ledger = PendingActions::default();
        ledger.apply_delta(Some("ext.foo"), ActionKind::Install, &installer);
        let values = SettingsValues {
            selected_category: Some(0),
            selected_extension: Some("ext.foo".to_string()),
            ..SettingsValues::default()
        };
        let layout = project(values, &ledger, &categories(), &installer);

        let titles = dropdown_values(&layout, "action")
            .iter()
            .map(|c| c.title.clone())
            .collect::<Vec<_>>();
        assert_eq!(titles, vec!["(select action)", "Revert Action"]);
        assert_eq!(
            group_items(&layout, "[PENDING ACTIONS]")[0],
            Widget::Label {
                title: "Install Foo".to_string()
            }
        );
    }

    #[test]
    fn vanished_extension_selection_is_cleared() {
        let values = SettingsValues {
            selected_category: Some(1),
            selected_extension: Some("ext.foo".to_string()),
            ..SettingsValues::default()
        };
        let layout = project(values, &PendingActions::default(), &categories(), &installer());
        assert_eq!(layout.values.selected_category, Some(1));
        assert_eq!(layout.values.selected_extension, None);
        assert!(!layout.has_error);
    }

    #[test]
    fn stale_category_index_is_cleared() {
        let values = SettingsValues {
            selected_category: Some(7),
            selected_extension: Some("ext.foo".to_string()),
            ..SettingsValues::default()
        };
        let layout = project(values, &PendingActions::default(), &categories(), &installer());
        assert_eq!(layout.values.selected_category, None);
        assert_eq!(layout.values.selected_extension, None);
    }

    #[test]
    fn installed_status_shows_version() {
        let status = ExtensionStatus {
            state: ExtensionState::Stopped,
            version: Some("1.2.0".to_string()),
            logging: Some(true),
        };
        assert_eq!(
            status_title(&status),
            "INSTALLED: version 1.2.0 (stopped) [logging]"
        );
    }

    #[test]
    fn layout_serializes_in_widget_wire_shape() {
        let values = SettingsValues {
            update_time: Some("bad".to_string()),
            ..SettingsValues::default()
        };
        let layout = project(values, &PendingActions::default(), &categories(), &installer());
        let encoded = serde_json::to_value(&layout).expect("encode");
        assert_eq!(encoded["has_error"], json!(true));
        assert_eq!(encoded["layout"][0]["type"], json!("group"));
        assert_eq!(encoded["layout"][0]["items"][0]["type"], json!("string"));
        assert_eq!(encoded["layout"][1]["values"][0]["value"], Value::Null);
        assert_eq!(encoded["layout"][1]["values"][2]["value"], json!(1));
    }
}
