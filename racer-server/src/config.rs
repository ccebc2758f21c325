//! Settings file handling.
//!
//! Settings live in `config.json` in the platform config directory
//! (`~/.config/racer/config.json` on Linux) unless `--config` names a file.
//! Every field is optional; anything left out keeps its default.

use directories::ProjectDirs;
use log::{debug, info};
use std::fs;
use std::path::{Path, PathBuf};

use racer_core::EngineSettings;

use crate::ServerError;

const CONFIG_FILE: &str = "config.json";

pub fn get_project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("org", "racer", "racer")
}

pub fn default_config_path() -> Option<PathBuf> {
    get_project_dirs().map(|dirs| dirs.config_dir().join(CONFIG_FILE))
}

/// Load and validate settings.
///
/// An explicit `path` must exist. Without one, a missing default file just
/// means default settings.
pub fn load_settings(path: Option<&Path>) -> Result<EngineSettings, ServerError> {
    let (path, required) = match path {
        Some(path) => (path.to_path_buf(), true),
        None => match default_config_path() {
            Some(path) => (path, false),
            None => {
                debug!("No config directory on this platform, using defaults");
                return Ok(EngineSettings::default());
            }
        },
    };

    if !required && !path.exists() {
        debug!("No config file at {}, using defaults", path.display());
        return Ok(EngineSettings::default());
    }

    let settings = read_settings(&path)?;
    info!("Loaded settings from {}", path.display());
    Ok(settings)
}

fn read_settings(path: &Path) -> Result<EngineSettings, ServerError> {
    let text = fs::read_to_string(path).map_err(|source| ServerError::ConfigRead {
        path: path.to_path_buf(),
        source,
    })?;
    let settings: EngineSettings =
        serde_json::from_str(&text).map_err(|source| ServerError::ConfigParse {
            path: path.to_path_buf(),
            source,
        })?;
    settings.validate()?;
    Ok(settings)
}
