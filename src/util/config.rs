//! Configuration file support for Stowage.
//!
//! Stowage supports two configuration file locations:
//! - Global: `~/.stowage/config.toml` - User-wide defaults
//! - Project: `.stowage/config.toml` - Project-specific overrides
//!
//! Project config takes precedence over global config.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::core::platform::PlatformDefinition;

/// Stowage configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Install settings
    pub install: InstallConfig,

    /// Local registry settings
    pub registry: RegistryConfig,

    /// Source cache settings
    pub cache: CacheConfig,

    /// Platform definitions (override or extend the built-ins)
    pub platforms: BTreeMap<String, PlatformDefinition>,
}

/// Install-related configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct InstallConfig {
    /// Concurrent resolution tasks per wave (None = number of CPUs)
    pub jobs: Option<usize>,

    /// Stop issuing resolution work after the first failure
    pub fail_fast: Option<bool>,

    /// Platform ids to install into (empty = detect)
    pub platforms: Vec<String>,
}

/// Registry configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Directory laid out as `<name>/<version>/`
    pub path: Option<PathBuf>,
}

/// Cache configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Where git checkouts are materialized
    pub dir: Option<PathBuf>,
}

impl Config {
    /// Load configuration from a file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;

        toml::from_str(&contents)
            .with_context(|| format!("failed to parse config file: {}", path.display()))
    }

    /// Load configuration with fallback to defaults if file doesn't exist.
    pub fn load_or_default(path: &Path) -> Self {
        if path.exists() {
            Self::load(path).unwrap_or_else(|e| {
                tracing::warn!("Failed to load config from {}: {:#}", path.display(), e);
                Self::default()
            })
        } else {
            Self::default()
        }
    }

    /// Merge another config into this one (other takes precedence).
    pub fn merge(&mut self, other: Config) {
        if other.install.jobs.is_some() {
            self.install.jobs = other.install.jobs;
        }
        if other.install.fail_fast.is_some() {
            self.install.fail_fast = other.install.fail_fast;
        }
        if !other.install.platforms.is_empty() {
            self.install.platforms = other.install.platforms;
        }

        if other.registry.path.is_some() {
            self.registry.path = other.registry.path;
        }
        if other.cache.dir.is_some() {
            self.cache.dir = other.cache.dir;
        }

        self.platforms.extend(other.platforms);
    }
}

/// Load merged configuration from global and project locations.
///
/// Order of precedence (highest to lowest):
/// 1. Project config (.stowage/config.toml)
/// 2. Global config (~/.stowage/config.toml)
/// 3. Defaults
pub fn load_config(global_path: Option<&Path>, project_path: &Path) -> Config {
    let mut config = Config::default();

    if let Some(global_path) = global_path {
        config.merge(Config::load_or_default(global_path));
    }

    config.merge(Config::load_or_default(project_path));

    config
}

/// Get the global stowage directory (~/.stowage).
pub fn global_config_dir() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|b| b.home_dir().join(".stowage"))
}

/// Get the global config path (~/.stowage/config.toml).
pub fn global_config_path() -> Option<PathBuf> {
    global_config_dir().map(|dir| dir.join("config.toml"))
}
