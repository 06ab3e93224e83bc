//! The workspace index: which package owns which installed file.
//!
//! Stored at `.stowage/index.toml`. It is the only state carried from one
//! run to the next: read at the start of an install, rewritten at the end.
//! Everything is kept in `BTreeMap`s and no timestamps are recorded, so an
//! unchanged install leaves the file byte-identical.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::core::dependency_id::SourceType;
use crate::flow::model::MergePolicy;
use crate::util::fs;

/// Current index format version.
pub const INDEX_VERSION: u32 = 1;

/// Persisted ownership record for a workspace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkspaceIndex {
    pub version: u32,

    /// Installed packages by name
    #[serde(default)]
    pub packages: BTreeMap<String, IndexedPackage>,

    /// Installed files by workspace-relative path
    #[serde(default)]
    pub files: BTreeMap<String, IndexedFile>,
}

/// An installed package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexedPackage {
    /// Canonical dependency key
    pub key: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    pub source: SourceType,

    /// Content root the package was installed from
    pub path: String,
}

/// An installed file and the packages contributing to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexedFile {
    pub merge: MergePolicy,
    pub owners: Vec<FileOwner>,
}

/// One package's share of an installed file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileOwner {
    pub package: String,

    pub priority: i32,

    /// Leaf keys contributed (deep merges only)
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub keys: BTreeSet<String>,

    /// Package-relative files the keys were read from (deep merges only)
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub sources: BTreeSet<String>,
}

impl Default for WorkspaceIndex {
    fn default() -> Self {
        WorkspaceIndex {
            version: INDEX_VERSION,
            packages: BTreeMap::new(),
            files: BTreeMap::new(),
        }
    }
}

impl WorkspaceIndex {
    /// Load the index, or an empty one if the file does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        let Some(contents) = fs::read_optional(path)? else {
            return Ok(Self::default());
        };
        let index: WorkspaceIndex = toml::from_str(&contents)
            .with_context(|| format!("failed to parse workspace index: {}", path.display()))?;
        if index.version > INDEX_VERSION {
            anyhow::bail!(
                "workspace index version {} is newer than this version of stowage supports",
                index.version
            );
        }
        Ok(index)
    }

    /// Save the index. Returns whether the file changed.
    pub fn save(&self, path: &Path) -> Result<bool> {
        let contents =
            toml::to_string_pretty(self).context("failed to serialize workspace index")?;
        if fs::read_optional(path)?.as_deref() == Some(contents.as_str()) {
            return Ok(false);
        }
        fs::write_atomic(path, &contents)?;
        Ok(true)
    }

    pub fn file(&self, path: &str) -> Option<&IndexedFile> {
        self.files.get(path)
    }

    /// Files a package contributes to.
    pub fn files_owned_by<'a>(
        &'a self,
        package: &'a str,
    ) -> impl Iterator<Item = (&'a String, &'a IndexedFile)> + 'a {
        self.files
            .iter()
            .filter(move |(_, file)| file.owners.iter().any(|o| o.package == package))
    }

    /// Replace the owners of `path` from `released` with `owners`.
    ///
    /// Owners not in `released` are kept. A file left without owners is
    /// dropped from the index.
    pub fn update_file(
        &mut self,
        path: &str,
        merge: MergePolicy,
        released: &BTreeSet<String>,
        owners: Vec<FileOwner>,
    ) {
        let mut kept: Vec<FileOwner> = self
            .files
            .remove(path)
            .map(|file| file.owners)
            .unwrap_or_default()
            .into_iter()
            .filter(|o| !released.contains(&o.package))
            .collect();

        for owner in owners {
            match kept.iter_mut().find(|o| o.package == owner.package) {
                Some(existing) => {
                    existing.priority = owner.priority;
                    existing.keys.extend(owner.keys);
                    existing.sources.extend(owner.sources);
                }
                None => kept.push(owner),
            }
        }
        kept.sort_by(|a, b| a.package.cmp(&b.package));

        if !kept.is_empty() {
            self.files.insert(
                path.to_string(),
                IndexedFile {
                    merge,
                    owners: kept,
                },
            );
        }
    }

    /// Drop a package from every file it owns and from the package table.
    pub fn remove_package(&mut self, package: &str) {
        self.packages.remove(package);
        self.files.retain(|_, file| {
            file.owners.retain(|o| o.package != package);
            !file.owners.is_empty()
        });
    }
}
