use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::installer::ActionKind;

/// Name under which the settings blob is kept in the config document.
pub const SETTINGS_CONFIG_NAME: &str = "settings";
pub const DEFAULT_UPDATE_TIME: &str = "02:00";

/// Form values as submitted by, and echoed back to, the settings client.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SettingsValues {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logging: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_category: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_extension: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<ActionKind>,
}

impl SettingsValues {
    /// Removes the transient action so it never reaches persistence.
    pub fn take_action(&mut self) -> Option<ActionKind> {
        self.action.take()
    }
}

/// The only state that survives a restart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredSettings {
    #[serde(default = "default_update_time")]
    pub update_time: String,
    #[serde(default)]
    pub logging: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_category: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_extension: Option<String>,
}

impl Default for StoredSettings {
    fn default() -> Self {
        Self {
            update_time: default_update_time(),
            logging: false,
            selected_category: None,
            selected_extension: None,
        }
    }
}

impl StoredSettings {
    pub fn to_values(&self) -> SettingsValues {
        SettingsValues {
            update_time: Some(self.update_time.clone()),
            logging: Some(self.logging),
            selected_category: self.selected_category,
            selected_extension: self.selected_extension.clone(),
            action: None,
        }
    }

    /// An absent update time is kept as an empty string, which leaves the
    /// update timer disarmed.
    pub fn from_values(values: SettingsValues) -> Self {
        Self {
            update_time: values.update_time.unwrap_or_default(),
            logging: values.logging.unwrap_or(false),
            selected_category: values.selected_category,
            selected_extension: values.selected_extension,
        }
    }
}

fn default_update_time() -> String {
    DEFAULT_UPDATE_TIME.to_string()
}

/// JSON config document holding named config blobs.
#[derive(Debug, Clone)]
pub struct SettingsStore {
    path: PathBuf,
}

impl SettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Missing file or missing blob yields the defaults.
    pub fn load(&self) -> Result<StoredSettings> {
        let document = self.read_document()?;
        match document.get(SETTINGS_CONFIG_NAME) {
            Some(blob) => serde_json::from_value(blob.clone()).with_context(|| {
                format!(
                    "invalid '{SETTINGS_CONFIG_NAME}' entry in {}",
                    self.path.display()
                )
            }),
            None => Ok(StoredSettings::default()),
        }
    }

    /// Rewrites the settings blob, leaving other config names untouched.
    pub fn save(&self, settings: &StoredSettings) -> Result<()> {
        let mut document = self.read_document()?;
        document.insert(
            SETTINGS_CONFIG_NAME.to_string(),
            serde_json::to_value(settings)?,
        );
        let text = serde_json::to_string_pretty(&Value::Object(document))?;
        fs::write(&self.path, format!("{text}\n"))
            .with_context(|| format!("unable to write config file {}", self.path.display()))?;
        Ok(())
    }

    fn read_document(&self) -> Result<Map<String, Value>> {
        if !self.path.exists() {
            return Ok(Map::new());
        }
        let content = fs::read_to_string(&self.path)
            .with_context(|| format!("unable to read config file {}", self.path.display()))?;
        if content.trim().is_empty() {
            return Ok(Map::new());
        }
        let value = serde_json::from_str::<Value>(&content).map_err(|err| {
            let line = err.line();
            let column = err.column();
            anyhow::anyhow!("invalid JSON at line {line}, column {column}: {err}")
        })?;
        match value {
            Value::Object(map) => Ok(map),
            _ => bail!("config file {} must hold a JSON object", self.path.display()),
        }
    }
}
