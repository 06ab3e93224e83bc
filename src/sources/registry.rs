//! Registry sources - named, versioned packages.
//!
//! Lookups go through [`RegistryLookup`]. The built-in [`LocalRegistry`]
//! serves a directory laid out as `<root>/<name>/<version>/`.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use semver::{Version, VersionReq};

use crate::core::errors::StowageError;
use crate::core::package::ResolutionSource;

/// The version a registry picked for a constraint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryMatch {
    pub version: String,
    /// Local content root of that version
    pub path: PathBuf,
    pub resolution_source: ResolutionSource,
}

/// Registry lookup collaborator.
pub trait RegistryLookup: Send + Sync {
    /// Pick a version of `name`. `None` (or `*`, `latest`) means newest.
    fn resolve_version(&self, name: &str, constraint: Option<&str>) -> Result<RegistryMatch>;
}

/// A parsed version constraint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Constraint {
    Latest,
    Exact(Version),
    Range(VersionReq),
}

impl Constraint {
    pub fn parse(name: &str, constraint: Option<&str>) -> Result<Self, StowageError> {
        let raw = constraint.map(str::trim).unwrap_or_default();
        if raw.is_empty() || raw == "*" || raw.eq_ignore_ascii_case("latest") {
            return Ok(Constraint::Latest);
        }
        let exact = raw.strip_prefix('=').unwrap_or(raw).trim();
        if let Ok(version) = Version::parse(exact) {
            return Ok(Constraint::Exact(version));
        }
        VersionReq::parse(raw).map(Constraint::Range).map_err(|e| {
            StowageError::validation(
                format!("version constraint for `{}`", name),
                format!("`{}`: {}", raw, e),
            )
        })
    }

    pub fn matches(&self, version: &Version) -> bool {
        match self {
            Constraint::Latest => version.pre.is_empty(),
            Constraint::Exact(exact) => version == exact,
            Constraint::Range(req) => req.matches(version),
        }
    }

    pub fn resolution_source(&self) -> ResolutionSource {
        match self {
            Constraint::Latest => ResolutionSource::Latest,
            Constraint::Exact(_) => ResolutionSource::Exact,
            Constraint::Range(_) => ResolutionSource::Range,
        }
    }
}

/// A registry on the local filesystem.
#[derive(Debug, Clone)]
pub struct LocalRegistry {
    root: PathBuf,
}

impl LocalRegistry {
    pub fn new(root: PathBuf) -> Self {
        LocalRegistry { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Published versions of a package, ascending.
    pub fn versions(&self, name: &str) -> Result<Vec<Version>> {
        let dir = self.root.join(name);
        if !dir.is_dir() {
            return Err(StowageError::not_found("package", name).into());
        }

        let mut versions = Vec::new();
        for entry in std::fs::read_dir(&dir)
            .with_context(|| format!("failed to read registry directory: {}", dir.display()))?
        {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            match Version::parse(&entry.file_name().to_string_lossy()) {
                Ok(version) => versions.push(version),
                Err(_) => tracing::debug!(
                    "ignoring non-version entry {} in registry",
                    entry.path().display()
                ),
            }
        }
        versions.sort();
        Ok(versions)
    }
}

impl RegistryLookup for LocalRegistry {
    fn resolve_version(&self, name: &str, constraint: Option<&str>) -> Result<RegistryMatch> {
        let parsed = Constraint::parse(name, constraint)?;
        let versions = self.versions(name)?;

        let version = versions
            .iter()
            .rev()
            .find(|v| parsed.matches(v))
            .ok_or_else(|| {
                StowageError::not_found(
                    "package version",
                    format!("{}@{}", name, constraint.unwrap_or("*")),
                )
            })?;

        tracing::debug!("registry: {}@{} -> {}", name, constraint.unwrap_or("*"), version);
        Ok(RegistryMatch {
            version: version.to_string(),
            path: self.root.join(name).join(version.to_string()),
            resolution_source: parsed.resolution_source(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn registry(versions: &[&str]) -> (TempDir, LocalRegistry) {
        let tmp = TempDir::new().unwrap();
        for v in versions {
            std::fs::create_dir_all(tmp.path().join("rules-pack").join(v)).unwrap();
        }
        let registry = LocalRegistry::new(tmp.path().to_path_buf());
        (tmp, registry)
    }

    #[test]
    fn test_latest_skips_prereleases() {
        let (_tmp, registry) = registry(&["1.0.0", "1.2.0", "2.0.0-beta.1"]);
        let found = registry.resolve_version("rules-pack", None).unwrap();
        assert_eq!(found.version, "1.2.0");
        assert_eq!(found.resolution_source, ResolutionSource::Latest);
        assert!(found.path.ends_with("rules-pack/1.2.0"));
    }

    #[test]
    fn test_range_and_exact() {
        let (_tmp, registry) = registry(&["1.0.0", "1.4.2", "2.1.0"]);

        let range = registry.resolve_version("rules-pack", Some("^1.2")).unwrap();
        assert_eq!(range.version, "1.4.2");
        assert_eq!(range.resolution_source, ResolutionSource::Range);

        let exact = registry.resolve_version("rules-pack", Some("1.0.0")).unwrap();
        assert_eq!(exact.version, "1.0.0");
        assert_eq!(exact.resolution_source, ResolutionSource::Exact);
    }

    #[test]
    fn test_unknown_package_and_version() {
        let (_tmp, registry) = registry(&["1.0.0"]);

        let err = registry.resolve_version("nope", None).unwrap_err();
        assert!(StowageError::is_not_found(&err));

        let err = registry.resolve_version("rules-pack", Some("^3")).unwrap_err();
        assert!(StowageError::is_not_found(&err));
    }

    #[test]
    fn test_bad_constraint_is_validation_error() {
        let (_tmp, registry) = registry(&["1.0.0"]);
        let err = registry
            .resolve_version("rules-pack", Some("not a version"))
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<StowageError>(),
            Some(StowageError::Validation { .. })
        ));
    }
}
