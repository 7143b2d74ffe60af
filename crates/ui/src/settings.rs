// Preferences kept between runs: the save directory and the last search term

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const SETTINGS_FILE: &str = "settings.json";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub save_dir: Option<PathBuf>,
    pub last_term: Option<String>,
}

impl Settings {
    /// `<config dir>/wallgrid/settings.json`, if the platform has a config dir
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("wallgrid").join(SETTINGS_FILE))
    }

    /// Reads settings from `path`; a missing or unreadable file gives the defaults
    pub fn load(path: &Path) -> Self {
        let raw = match std::fs::read(path) {
            Ok(raw) => raw,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "no saved settings");
                return Self::default();
            }
        };

        serde_json::from_slice(&raw).unwrap_or_else(|e| {
            warn!(path = %path.display(), error = %e, "ignoring malformed settings");
            Self::default()
        })
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let json = serde_json::to_vec_pretty(self).context("failed to encode settings")?;
        std::fs::write(path, json).with_context(|| format!("failed to write {}", path.display()))
    }

    /// Saved directory if it still exists, otherwise `fallback`
    pub fn save_dir_or(&self, fallback: PathBuf) -> PathBuf {
        self.save_dir
            .clone()
            .filter(|dir| dir.is_dir())
            .unwrap_or(fallback)
    }
}
