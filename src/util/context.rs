//! Global context for Stowage operations.
//!
//! Provides centralized access to configuration, paths, and environment.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use anyhow::{Context, Result};
use directories::ProjectDirs;

use crate::core::manifest::find_manifest;
use crate::core::errors::StowageError;
use crate::util::config::{global_config_dir, load_config, Config};

/// Project directories for Stowage
static PROJECT_DIRS: LazyLock<Option<ProjectDirs>> =
    LazyLock::new(|| ProjectDirs::from("dev", "stowage", "stowage"));

/// Global context containing configuration and paths.
#[derive(Debug, Clone)]
pub struct GlobalContext {
    /// Current working directory
    cwd: PathBuf,

    /// Home directory for global Stowage data (~/.stowage/)
    home: PathBuf,

    /// Merged global + project configuration
    config: Config,
}

impl GlobalContext {
    /// Create a new GlobalContext rooted at the current directory.
    pub fn new() -> Result<Self> {
        let cwd = std::env::current_dir().context("failed to get current directory")?;
        Self::with_cwd(cwd)
    }

    /// Create a GlobalContext with a specific working directory.
    ///
    /// Configuration is loaded from `~/.stowage/config.toml` and then
    /// `<cwd>/.stowage/config.toml`.
    pub fn with_cwd(cwd: PathBuf) -> Result<Self> {
        let home = global_config_dir().unwrap_or_else(|| PathBuf::from(".stowage"));
        let config = load_config(
            Some(&home.join("config.toml")),
            &cwd.join(".stowage").join("config.toml"),
        );

        Ok(GlobalContext {
            cwd,
            home,
            config,
        })
    }

    /// Replace the loaded configuration.
    pub fn with_config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Get the current working directory.
    pub fn cwd(&self) -> &Path {
        &self.cwd
    }

    /// Get the merged configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Get the cache directory for materialized sources.
    ///
    /// Everything under this directory is treated as immutable.
    pub fn cache_dir(&self) -> PathBuf {
        if let Some(dir) = &self.config.cache.dir {
            return dir.clone();
        }
        match PROJECT_DIRS.as_ref() {
            Some(dirs) => dirs.cache_dir().to_path_buf(),
            None => self.home.join("cache"),
        }
    }

    /// Get the local registry directory.
    pub fn registry_dir(&self) -> PathBuf {
        self.config
            .registry
            .path
            .clone()
            .unwrap_or_else(|| self.home.join("registry"))
    }

    /// Find the workspace root (directory containing Stowage.toml), searching
    /// upward from cwd.
    pub fn find_workspace_root(&self) -> Result<PathBuf, StowageError> {
        let manifest = find_manifest(&self.cwd)?;
        Ok(manifest
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.cwd.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_context_paths() {
        let tmp = TempDir::new().unwrap();
        let ctx = GlobalContext::with_cwd(tmp.path().to_path_buf()).unwrap();
        assert_eq!(ctx.cwd(), tmp.path());
        assert!(ctx.registry_dir().ends_with("registry"));
    }

    #[test]
    fn test_project_config_overrides_cache_dir() {
        let tmp = TempDir::new().unwrap();
        std::fs::create_dir_all(tmp.path().join(".stowage")).unwrap();
        std::fs::write(
            tmp.path().join(".stowage/config.toml"),
            "[cache]\ndir = \"/tmp/stowage-cache\"\n",
        )
        .unwrap();

        let ctx = GlobalContext::with_cwd(tmp.path().to_path_buf()).unwrap();
        assert_eq!(ctx.cache_dir(), PathBuf::from("/tmp/stowage-cache"));
    }

    #[test]
    fn test_find_workspace_root() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("Stowage.toml"), "[package]\nname = \"ws\"\n").unwrap();
        let nested = tmp.path().join("docs");
        std::fs::create_dir(&nested).unwrap();

        let ctx = GlobalContext::with_cwd(nested).unwrap();
        assert_eq!(ctx.find_workspace_root().unwrap(), tmp.path());
    }
}
