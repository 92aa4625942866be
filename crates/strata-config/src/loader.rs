use std::path::{Path, PathBuf};

use strata_common::{Error, Result};
use tracing::{debug, info};

use crate::model::AppConfig;

const LOCAL_CANDIDATES: [&str; 3] = ["strata.yml", "strata.yaml", "strata.toml"];

/// Locates and parses the configuration file.
///
/// An explicitly supplied path must exist. Otherwise the working directory and
/// the user config directory are searched, falling back to defaults.
#[derive(Debug, Default)]
pub struct ConfigLoader {
    explicit: Option<PathBuf>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            explicit: Some(path.into()),
        }
    }

    /// Paths searched, in order, when no explicit path is given.
    pub fn candidates(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = LOCAL_CANDIDATES.iter().map(PathBuf::from).collect();
        if let Some(dir) = dirs::config_dir() {
            paths.push(dir.join("strata").join("config.yml"));
        }
        paths
    }

    pub fn load(&self) -> Result<AppConfig> {
        if let Some(path) = &self.explicit {
            if !path.is_file() {
                return Err(Error::Config(format!(
                    "config file not found: {}",
                    path.display()
                )));
            }
            return load_from_path(path);
        }

        for candidate in self.candidates() {
            if candidate.is_file() {
                return load_from_path(&candidate);
            }
        }

        debug!("no config file found, using defaults");
        let config = AppConfig::default();
        config.validate()?;
        Ok(config)
    }
}

pub fn load_from_path(path: &Path) -> Result<AppConfig> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("failed to read {}: {e}", path.display())))?;

    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
    let config: AppConfig = match ext {
        "yml" | "yaml" => serde_yaml::from_str(&contents)
            .map_err(|e| Error::Config(format!("YAML parse error in {}: {e}", path.display())))?,
        "toml" => toml::from_str(&contents)
            .map_err(|e| Error::Config(format!("TOML parse error in {}: {e}", path.display())))?,
        other => {
            return Err(Error::Config(format!(
                "unsupported config extension: {other}"
            )));
        }
    };

    config.validate()?;
    info!("config loaded from {}", path.display());
    Ok(config)
}
