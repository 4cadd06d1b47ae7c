//! Loader configuration.
//!
//! Every field has a default, so an empty TOML file (or no file at all) gives
//! the standard layout: data under `resources/`, JSON/RON/TOML files, and the
//! usual set of reader-owned special keys.

use modkit_core::populate::{DEFAULT_SPECIAL_KEYS, Populator};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read loader config {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid loader config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Settings for a [`Session`](crate::session::Session).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoaderConfig {
    /// Subdirectory of a mod folder holding its data files.
    pub resources_dir: String,
    /// Keys the populator skips silently when a target has no matching member.
    pub special_keys: Vec<String>,
    /// File extensions picked up during discovery.
    pub extensions: Vec<String>,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            resources_dir: "resources".to_string(),
            special_keys: DEFAULT_SPECIAL_KEYS.iter().map(|k| k.to_string()).collect(),
            extensions: ["json", "ron", "toml"].map(String::from).to_vec(),
        }
    }
}

impl LoaderConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// A populator using this config's special keys.
    pub fn populator(&self) -> Populator {
        Populator::new(self.special_keys.iter().cloned())
    }
}
