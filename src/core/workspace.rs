//! Workspace - the directory resources are installed into.
//!
//! A Workspace owns the root manifest (if any) and knows where the
//! workspace index and project configuration live.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::core::manifest::{read_manifest, Manifest, MANIFEST_NAME};

/// Name of the per-workspace state directory.
pub const STATE_DIR: &str = ".stowage";

/// An install target workspace.
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
    manifest: Option<Manifest>,
}

impl Workspace {
    /// Open the workspace rooted at `root`, loading its manifest if present.
    pub fn new(root: &Path) -> Result<Self> {
        let root = root
            .canonicalize()
            .with_context(|| format!("workspace directory not found: {}", root.display()))?;
        let manifest = read_manifest(&root.join(MANIFEST_NAME))?;
        Ok(Workspace { root, manifest })
    }

    /// Get the workspace root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Get the root manifest, if the workspace has one.
    pub fn manifest(&self) -> Option<&Manifest> {
        self.manifest.as_ref()
    }

    /// Get the root manifest path (which may not exist yet).
    pub fn manifest_path(&self) -> PathBuf {
        self.root.join(MANIFEST_NAME)
    }

    /// Re-read the root manifest after it was edited.
    pub fn reload_manifest(&mut self) -> Result<()> {
        self.manifest = read_manifest(&self.manifest_path())?;
        Ok(())
    }

    /// Get the .stowage directory.
    pub fn state_dir(&self) -> PathBuf {
        self.root.join(STATE_DIR)
    }

    /// Get the workspace index path.
    pub fn index_path(&self) -> PathBuf {
        self.state_dir().join("index.toml")
    }

    /// Get the project configuration path.
    pub fn config_path(&self) -> PathBuf {
        self.state_dir().join("config.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_workspace_without_manifest() {
        let tmp = TempDir::new().unwrap();
        let ws = Workspace::new(tmp.path()).unwrap();
        assert!(ws.manifest().is_none());
        assert!(ws.index_path().ends_with(".stowage/index.toml"));
    }

    #[test]
    fn test_workspace_paths() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(
            tmp.path().join(MANIFEST_NAME),
            "[package]\nname = \"ws\"\n\n[dependencies]\nrules = \"^1\"\n",
        )
        .unwrap();

        let ws = Workspace::new(tmp.path()).unwrap();
        assert_eq!(ws.manifest().unwrap().dependencies().len(), 1);
        assert!(ws.config_path().ends_with(".stowage/config.toml"));
        assert!(ws.root().is_absolute());
    }
}
