//! Configuration file support.

use indexmap::IndexMap;
use rhi_sluice_core::{TaskRegistry, TaskSpec};
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};

/// Main configuration structure.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Default CLI options.
    pub defaults: Defaults,
    /// Arguments applied to every task of a type unless given explicitly.
    pub task_defaults: IndexMap<String, IndexMap<String, ArgValue>>,
}

/// Default CLI options.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Defaults {
    /// Enable verbose output by default.
    pub verbose: bool,
    /// Enable quiet output by default.
    pub quiet: bool,
    /// Log level when neither flag nor `RUST_LOG` says otherwise.
    pub log_level: Option<String>,
}

/// A task argument value. TOML scalars are accepted and passed on as text.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum ArgValue {
    Text(String),
    Integer(i64),
    Float(f64),
    Bool(bool),
}

impl fmt::Display for ArgValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgValue::Text(s) => f.write_str(s),
            ArgValue::Integer(n) => write!(f, "{}", n),
            ArgValue::Float(n) => write!(f, "{}", n),
            ArgValue::Bool(b) => write!(f, "{}", b),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

impl Config {
    /// Load config from `path`, or from the default location when `None`.
    ///
    /// A missing file is not an error.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::load_from_path(path),
            None => match Self::default_path() {
                Some(path) => Self::load_from_path(&path),
                None => Ok(Self::default()),
            },
        }
    }

    pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Get the default config file path.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("sluice").join("config.toml"))
    }

    /// Defaults configured for `task_type`, looked up by canonical name
    /// first and then by the name as written.
    pub fn task_defaults_for(
        &self,
        task_type: &str,
        registry: &TaskRegistry,
    ) -> IndexMap<String, String> {
        let canonical = registry.get(task_type).map(|f| f.decl().name.clone());
        let mut merged = IndexMap::new();
        for name in canonical.iter().map(String::as_str).chain([task_type]) {
            if let Some(defaults) = self.task_defaults.get(name) {
                for (key, value) in defaults {
                    merged.entry(key.clone()).or_insert_with(|| value.to_string());
                }
            }
        }
        merged
    }

    /// Merge configured defaults into `specs`; explicit arguments win.
    pub fn apply_task_defaults(&self, specs: &mut [TaskSpec], registry: &TaskRegistry) {
        if self.task_defaults.is_empty() {
            return;
        }
        for spec in specs {
            let defaults = self.task_defaults_for(&spec.task_type, registry);
            spec.merge_defaults(&defaults);
        }
    }
}
