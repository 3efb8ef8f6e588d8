use std::{
    collections::HashSet,
    fs,
    path::{Path, PathBuf},
};

use directories::ProjectDirs;
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::{Result, StampError};

/// User settings, loaded once at startup and shared read-only.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    /// Property name holding the page creation date
    pub create_time_property_name: String,

    /// Property name holding the last update date
    pub update_time_property_name: String,

    /// Whether to look the creation time up in git history
    #[serde(alias = "useGitCreationTime")]
    pub use_external_history_for_creation_time: bool,

    /// Page names never touched, comma separated
    pub ignore_pages: String,

    /// Date pattern in date-fns notation, e.g. `yyyy-MM-dd`
    pub date_format: String,

    /// Preferred language tag, e.g. `en` or `zh-CN`
    pub language: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            create_time_property_name: "created".to_string(),
            update_time_property_name: "updated".to_string(),
            use_external_history_for_creation_time: true,
            ignore_pages: String::new(),
            date_format: "MMM do, yyyy".to_string(),
            language: "en".to_string(),
        }
    }
}

impl Settings {
    /// Location of the settings file when none is given on the command line
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "pagestamp").map(|dirs| dirs.config_dir().join("settings.json"))
    }

    /// Loads settings from `path`, falling back to defaults when the file is absent
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("No settings file at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let raw = fs::read_to_string(path)?;
        let settings: Settings = serde_json::from_str(&raw)?;
        settings.validate()?;

        info!("Loaded settings from {}", path.display());
        Ok(settings)
    }

    /// Writes the settings as pretty JSON, creating parent directories
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        info!("Settings written to {}", path.display());
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let create = self.create_time_property_name.trim();
        let update = self.update_time_property_name.trim();

        for name in [create, update] {
            if name.is_empty() || name.contains("::") || name.contains(char::is_whitespace) {
                return Err(StampError::ConfigError {
                    message: format!("Invalid property name: {:?}", name),
                });
            }
        }
        if create == update {
            return Err(StampError::ConfigError {
                message: format!("Create and update properties are both named {:?}", create),
            });
        }
        Ok(())
    }

    /// Lowercased page names from `ignore_pages`
    pub fn ignore_list(&self) -> HashSet<String> {
        self.ignore_pages
            .split(',')
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty())
            .collect()
    }
}
