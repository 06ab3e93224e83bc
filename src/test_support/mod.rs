//! Test utilities and mocks for unit tests.
//!
//! Provides in-process stand-ins for the git and registry collaborators so
//! resolution can run without a network, plus fixtures that lay packages
//! out on disk.
//!
//! # Example
//!
//! ```rust,ignore
//! use crate::test_support::{MockCloner, PackageFixture};
//!
//! #[test]
//! fn test_example() {
//!     let tmp = tempfile::TempDir::new().unwrap();
//!     PackageFixture::new("remote").file("rules/a.md", "# A").write(tmp.path());
//!     let cloner = MockCloner::new().with_repo("https://github.com/o/r", tmp.path());
//!     // resolve declarations pointing at https://github.com/o/r ...
//! }
//! ```

pub mod fixtures;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{bail, Result};
use semver::Version;

use crate::core::dependency_id::normalize_git_url;
use crate::core::errors::StowageError;
use crate::sources::registry::Constraint;
use crate::sources::{CloneRequest, GitCloner, RegistryLookup, RegistryMatch, SourceCache, SourceResolver};

pub use fixtures::*;

/// Git cloner that serves pre-made directories.
///
/// Clones share state, so a test can hand one copy to the resolver and
/// inspect recorded calls through another.
#[derive(Debug, Clone, Default)]
pub struct MockCloner {
    repos: Arc<Mutex<HashMap<String, PathBuf>>>,
    calls: Arc<Mutex<Vec<CloneRequest>>>,
}

impl MockCloner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `dir` for any spelling of `url`.
    pub fn with_repo(self, url: &str, dir: &Path) -> Self {
        self.repos
            .lock()
            .unwrap()
            .insert(normalize_git_url(url), dir.to_path_buf());
        self
    }

    /// Every request made so far.
    pub fn calls(&self) -> Vec<CloneRequest> {
        self.calls.lock().unwrap().clone()
    }
}

impl GitCloner for MockCloner {
    fn clone_repo(&self, request: &CloneRequest) -> Result<PathBuf> {
        self.calls.lock().unwrap().push(request.clone());
        let Some(dir) = self.repos.lock().unwrap().get(&normalize_git_url(&request.url)).cloned()
        else {
            bail!("fatal: repository '{}' not found", request.url);
        };
        let content = match &request.subdirectory {
            Some(sub) => dir.join(sub),
            None => dir,
        };
        if !content.is_dir() {
            return Err(StowageError::not_found("path", content.display().to_string()).into());
        }
        Ok(content)
    }
}

/// Registry backed by fixtures written on demand.
#[derive(Debug, Clone, Default)]
pub struct MockRegistry {
    packages: Arc<Mutex<HashMap<String, Vec<(Version, PathBuf)>>>>,
}

impl MockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write `fixture` under `dir/<name>/<version>` and make it resolvable.
    pub fn publish(&self, dir: &Path, name: &str, version: &str, fixture: PackageFixture) -> PathBuf {
        let root = fixture
            .version(version)
            .write(&dir.join(name).join(version));
        self.packages
            .lock()
            .unwrap()
            .entry(name.to_string())
            .or_default()
            .push((Version::parse(version).unwrap(), root.clone()));
        root
    }
}

impl RegistryLookup for MockRegistry {
    fn resolve_version(&self, name: &str, constraint: Option<&str>) -> Result<RegistryMatch> {
        let parsed = Constraint::parse(name, constraint)?;
        let packages = self.packages.lock().unwrap();
        let Some(versions) = packages.get(name) else {
            return Err(StowageError::not_found("package", name).into());
        };
        let best = versions
            .iter()
            .filter(|(v, _)| parsed.matches(v))
            .max_by(|a, b| a.0.cmp(&b.0))
            .ok_or_else(|| StowageError::not_found("package version", name))?;
        Ok(RegistryMatch {
            version: best.0.to_string(),
            path: best.1.clone(),
            resolution_source: parsed.resolution_source(),
        })
    }
}

/// A source resolver over mocks, caching under `root/.cache`.
pub fn test_sources(root: &Path, cloner: MockCloner, registry: MockRegistry) -> SourceResolver {
    SourceResolver::new(
        SourceCache::new(root.join(".cache")),
        Arc::new(cloner),
        Arc::new(registry),
    )
}
