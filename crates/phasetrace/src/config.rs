//! Configuration file support for phasetrace.
//!
//! All phasetrace data lives in a `.phasetrace/` directory:
//! - `.phasetrace/config.toml` - Configuration file
//! - `.phasetrace/traces/<session id>/` - Per-session artifacts
//!
//! Config discovery searches for `.phasetrace/config.toml` starting from the
//! current directory and walking up to parent directories.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use phasetrace_forest::{DEFAULT_CACHE_CAPACITY, DEFAULT_MAX_DEPTH, FilterConfig, InclusionFilter};

/// The phasetrace data directory name.
pub const PHASETRACE_DIR: &str = ".phasetrace";
/// The config file name within the phasetrace directory.
pub const CONFIG_FILE: &str = "config.toml";

/// Main configuration structure.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct Config {
    /// Trace capture settings.
    pub trace: TraceConfig,
    /// Inclusion filter settings.
    pub filter: FilterSection,
}

/// Trace capture configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TraceConfig {
    /// Root directory for session artifact trees.
    pub root: PathBuf,
    /// Maximum recorded node depth, counted as edges from a root.
    pub max_depth: usize,
    /// Capacity of the per-forest node construction cache.
    pub cache_capacity: usize,
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from(PHASETRACE_DIR).join("traces"),
            max_depth: DEFAULT_MAX_DEPTH,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
        }
    }
}

/// Inclusion filter configuration. Entries extend the built-in denylists.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct FilterSection {
    /// Extra top-level runtime packages to exclude.
    pub runtime_packages: Vec<String>,
    /// Extra top-level development-tooling packages to exclude.
    pub dev_packages: Vec<String>,
    /// Extra module-name substrings to exclude.
    pub irrelevant_substrings: Vec<String>,
}

impl Config {
    /// Load configuration from a file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Read(path.to_path_buf(), e))?;
        let config: Config =
            toml::from_str(&content).map_err(|e| ConfigError::Parse(path.to_path_buf(), e))?;
        Ok(config)
    }

    /// Find and load configuration starting from a specific directory.
    ///
    /// Looks for `.phasetrace/config.toml` in the directory and its parents.
    pub fn find_and_load_from(start: &Path) -> Result<Option<(Self, PathBuf)>, ConfigError> {
        let mut dir = start.to_path_buf();

        loop {
            let phasetrace_dir = dir.join(PHASETRACE_DIR);
            let config_path = phasetrace_dir.join(CONFIG_FILE);
            if config_path.exists() {
                let config = Self::from_file(&config_path)?;
                // Return the .phasetrace directory, not the config file
                return Ok(Some((config, phasetrace_dir)));
            }

            if !dir.pop() {
                break;
            }
        }

        Ok(None)
    }

    /// Find and load configuration from the current directory upward.
    pub fn find_and_load() -> Result<Option<(Self, PathBuf)>, ConfigError> {
        let current = std::env::current_dir().map_err(ConfigError::Cwd)?;
        Self::find_and_load_from(&current)
    }

    /// Load configuration or use defaults.
    pub fn load_or_default() -> Self {
        match Self::find_and_load() {
            Ok(Some((config, path))) => {
                tracing::info!("Loaded config from {}", path.display());
                config
            }
            Ok(None) => {
                tracing::debug!("No .phasetrace/config.toml found, using defaults");
                Self::default()
            }
            Err(e) => {
                tracing::warn!("Failed to load config: {}, using defaults", e);
                Self::default()
            }
        }
    }

    /// Build the inclusion filter described by this configuration.
    pub fn inclusion_filter(&self) -> InclusionFilter {
        InclusionFilter::new(FilterConfig {
            runtime_packages: self.filter.runtime_packages.clone(),
            dev_packages: self.filter.dev_packages.clone(),
            irrelevant_substrings: self.filter.irrelevant_substrings.clone(),
            max_depth: self.trace.max_depth,
        })
    }

    /// Validate the configuration.
    ///
    /// Returns a list of validation errors if any are found.
    pub fn validate(&self) -> Vec<ConfigValidationError> {
        let mut errors = Vec::new();

        if self.trace.max_depth == 0 {
            errors.push(ConfigValidationError {
                field: "trace.max_depth".to_string(),
                message: "Depth bound must be at least 1.".to_string(),
            });
        }

        if self.trace.cache_capacity == 0 {
            errors.push(ConfigValidationError {
                field: "trace.cache_capacity".to_string(),
                message: "Construction cache capacity must be at least 1.".to_string(),
            });
        }

        if self.trace.root.as_os_str().is_empty() {
            errors.push(ConfigValidationError {
                field: "trace.root".to_string(),
                message: "Trace root directory cannot be empty.".to_string(),
            });
        }

        errors
    }
}

/// Error loading or parsing a config file.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {0}: {1}")]
    Read(PathBuf, #[source] std::io::Error),

    #[error("Failed to parse config file {0}: {1}")]
    Parse(PathBuf, #[source] toml::de::Error),

    #[error("Failed to resolve current directory: {0}")]
    Cwd(#[source] std::io::Error),
}

/// Configuration validation error.
#[derive(Debug, Clone)]
pub struct ConfigValidationError {
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for ConfigValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl std::error::Error for ConfigValidationError {}
