use std::collections::HashSet;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::Deserialize;

use crate::installer::{
    ActionKind, CatalogEntry, ExtensionDetails, ExtensionState, ExtensionStatus, Features,
    Installer, InstallerEvent,
};

pub type Notifier = Box<dyn Fn(InstallerEvent) + Send>;

#[derive(Debug, Clone)]
pub struct Repository {
    pub features: Features,
    pub categories: Vec<Category>,
}

#[derive(Debug, Clone)]
pub struct Category {
    pub title: String,
    pub extensions: Vec<RepositoryExtension>,
}

#[derive(Debug, Clone)]
pub struct RepositoryExtension {
    pub id: String,
    pub display_name: String,
    pub author: String,
    pub description: Option<String>,
    pub version: String,
    pub installed: Option<Installed>,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Installed {
    pub version: String,
    pub running: bool,
}

impl Repository {
    pub fn extension_count(&self) -> usize {
        self.categories.iter().map(|c| c.extensions.len()).sum()
    }

    fn extensions(&self) -> impl Iterator<Item = &RepositoryExtension> {
        self.categories.iter().flat_map(|c| c.extensions.iter())
    }

    fn extensions_mut(&mut self) -> impl Iterator<Item = &mut RepositoryExtension> {
        self.categories.iter_mut().flat_map(|c| c.extensions.iter_mut())
    }

    fn find(&self, extension_id: &str) -> Option<&RepositoryExtension> {
        self.extensions().find(|ext| ext.id == extension_id)
    }

    fn find_mut(&mut self, extension_id: &str) -> Option<&mut RepositoryExtension> {
        self.extensions_mut().find(|ext| ext.id == extension_id)
    }

    fn installed_ids(&self) -> Vec<String> {
        self.extensions()
            .filter(|ext| ext.installed.is_some())
            .map(|ext| ext.id.clone())
            .collect()
    }
}

pub fn load_repository(path: &Path) -> Result<Repository> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("unable to read repository file {}", path.display()))?;
    parse_repository_text(&content)
}

pub fn parse_repository_text(content: &str) -> Result<Repository> {
    let raw = serde_json::from_str::<RepositoryFile>(content).map_err(|err| {
        let line = err.line();
        let column = err.column();
        anyhow::anyhow!("invalid JSON at line {line}, column {column}: {err}")
    })?;

    let mut ids = HashSet::new();
    let mut categories = Vec::with_capacity(raw.categories.len());
    for category in raw.categories {
        if category.title.trim().is_empty() {
            bail!("repository categories must have a title");
        }
        let mut extensions = Vec::with_capacity(category.extensions.len());
        for ext in category.extensions {
            if !ids.insert(ext.id.clone()) {
                bail!("duplicate extension id found: {}", ext.id);
            }
            if ext.version.trim().is_empty() {
                bail!("extension '{}' must list a version", ext.id);
            }
            let installed = ext.installed_version.map(|version| Installed {
                version,
                running: ext.running,
            });
            extensions.push(RepositoryExtension {
                display_name: ext.display_name.unwrap_or_else(|| ext.id.clone()),
                id: ext.id,
                author: ext.author,
                description: ext.description,
                version: ext.version,
                installed,
            });
        }
        categories.push(Category {
            title: category.title,
            extensions,
        });
    }

    Ok(Repository {
        features: raw.features,
        categories,
    })
}

/// Installer backed by a repository file. It keeps install and run state in
/// memory and reports every transition through the notifier; nothing is
/// executed on the host.
pub struct CatalogInstaller {
    repository: Repository,
    logging: bool,
    notify: Notifier,
}

impl CatalogInstaller {
    pub fn new(repository: Repository, notify: Notifier) -> Self {
        Self {
            repository,
            logging: false,
            notify,
        }
    }

    /// Publishes the initial catalog and install state.
    pub fn announce(&self) {
        let titles = self
            .repository
            .categories
            .iter()
            .map(|c| c.title.clone())
            .collect();
        (self.notify)(InstallerEvent::RepositoryChanged(titles));
        (self.notify)(InstallerEvent::InstallsChanged(self.repository.installed_ids()));
        self.report(
            format!(
                "{} extension(s) available",
                self.repository.extension_count()
            ),
            false,
        );
    }

    fn report(&self, message: String, is_error: bool) {
        (self.notify)(InstallerEvent::StatusChanged { message, is_error });
    }

    fn transition(&mut self, action: ActionKind, extension_id: &str) -> Result<String> {
        let Some(ext) = self.repository.find_mut(extension_id) else {
            bail!("unknown extension '{extension_id}'");
        };
        let name = ext.display_name.clone();
        let available = ext.version.clone();

        match action {
            ActionKind::Install if ext.installed.is_none() => {
                ext.installed = Some(Installed {
                    version: available.clone(),
                    running: true,
                });
                return Ok(format!("Installed {name} {available}"));
            }
            ActionKind::Uninstall if ext.installed.is_some() => {
                ext.installed = None;
                return Ok(format!("Uninstalled {name}"));
            }
            _ => {}
        }

        if let Some(installed) = ext.installed.as_mut() {
            match action {
                ActionKind::Update if installed.version != available => {
                    installed.version = available.clone();
                    return Ok(format!("Updated {name} to {available}"));
                }
                ActionKind::Start if !installed.running => {
                    installed.running = true;
                    return Ok(format!("Started {name}"));
                }
                ActionKind::Restart if installed.running => {
                    return Ok(format!("Restarted {name}"));
                }
                ActionKind::Stop if installed.running => {
                    installed.running = false;
                    return Ok(format!("Stopped {name}"));
                }
                _ => {}
            }
        }

        bail!(
            "cannot {} {name} in its current state",
            action.label().to_lowercase()
        )
    }
}

impl Installer for CatalogInstaller {
    fn extensions_by_category(&self, category: usize) -> Vec<CatalogEntry> {
        self.repository
            .categories
            .get(category)
            .map(|category| {
                category
                    .extensions
                    .iter()
                    .map(|ext| CatalogEntry {
                        title: ext.display_name.clone(),
                        value: ext.id.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    fn details(&self, extension_id: &str) -> ExtensionDetails {
        self.repository
            .find(extension_id)
            .map(|ext| ExtensionDetails {
                description: ext.description.clone(),
                author: ext.author.clone(),
                display_name: ext.display_name.clone(),
            })
            .unwrap_or_else(|| ExtensionDetails {
                display_name: extension_id.to_string(),
                ..ExtensionDetails::default()
            })
    }

    fn status(&self, extension_id: &str) -> ExtensionStatus {
        match self
            .repository
            .find(extension_id)
            .and_then(|ext| ext.installed.as_ref())
        {
            Some(installed) => ExtensionStatus {
                state: if installed.running {
                    ExtensionState::Running
                } else {
                    ExtensionState::Stopped
                },
                version: Some(installed.version.clone()),
                logging: Some(self.logging),
            },
            None => ExtensionStatus {
                state: ExtensionState::NotInstalled,
                version: None,
                logging: None,
            },
        }
    }

    fn actions(&self, extension_id: &str) -> Vec<ActionKind> {
        let Some(ext) = self.repository.find(extension_id) else {
            return Vec::new();
        };
        let Some(installed) = ext.installed.as_ref() else {
            return vec![ActionKind::Install];
        };

        let mut actions = Vec::new();
        if installed.version != ext.version {
            actions.push(ActionKind::Update);
        }
        actions.push(ActionKind::Uninstall);
        if installed.running {
            actions.extend([ActionKind::Restart, ActionKind::Stop]);
        } else {
            actions.push(ActionKind::Start);
        }
        actions
    }

    fn features(&self) -> Features {
        self.repository.features
    }

    fn perform_action(&mut self, action: ActionKind, extension_id: &str) {
        if action == ActionKind::NoChange {
            log::debug!("ignoring revert sentinel for {extension_id}");
            return;
        }
        match self.transition(action, extension_id) {
            Ok(message) => {
                log::info!("{message}");
                self.report(message, false);
                (self.notify)(InstallerEvent::InstallsChanged(self.repository.installed_ids()));
            }
            Err(err) => self.report(err.to_string(), true),
        }
    }

    fn update_all(&mut self) {
        let mut updated = Vec::new();
        for ext in self.repository.extensions_mut() {
            if let Some(installed) = ext.installed.as_mut()
                && installed.version != ext.version
            {
                installed.version = ext.version.clone();
                updated.push(ext.id.clone());
            }
        }

        let message = if updated.is_empty() {
            "All extensions are up to date".to_string()
        } else {
            format!("Updated {} extension(s)", updated.len())
        };
        if !updated.is_empty() {
            (self.notify)(InstallerEvent::UpdatesChanged(updated));
        }
        self.report(message, false);
    }

    fn restart_manager(&mut self) {
        log::warn!("manager restart requested");
        self.report("Restarting extension manager".to_string(), false);
    }

    fn set_log_state(&mut self, enabled: bool) {
        if self.logging != enabled {
            log::info!("extension logging {}", if enabled { "enabled" } else { "disabled" });
        }
        self.logging = enabled;
    }
}

#[derive(Debug, Deserialize)]
struct RepositoryFile {
    #[serde(default)]
    features: Features,
    categories: Vec<CategoryFile>,
}

#[derive(Debug, Deserialize)]
struct CategoryFile {
    title: String,
    #[serde(default)]
    extensions: Vec<ExtensionFile>,
}

#[derive(Debug, Deserialize)]
struct ExtensionFile {
    id: String,
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    author: String,
    #[serde(default)]
    description: Option<String>,
    version: String,
    #[serde(default)]
    installed_version: Option<String>,
    #[serde(default = "default_running")]
    running: bool,
}

fn default_running() -> bool {
    true
}
