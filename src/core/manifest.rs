//! Stowage.toml manifest parsing.
//!
//! The manifest lists a package's metadata and the dependencies it declares.
//! Both the current (`[dependencies]`, `[dev-dependencies]`) and legacy
//! (`[packages]`, `[dev-packages]`) table names are accepted and normalized
//! here, so nothing past this boundary ever looks at schema versions.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::core::dependency::{Declaration, DependencySpec};
use crate::core::errors::StowageError;

/// Canonical manifest file name.
pub const MANIFEST_NAME: &str = "Stowage.toml";

/// Package metadata from the [package] section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PackageMetadata {
    /// Package name
    pub name: String,

    /// Package version (semver, informational for path/git packages)
    #[serde(default)]
    pub version: Option<String>,

    /// Package description
    #[serde(default)]
    pub description: Option<String>,

    /// Default install priority for this package's files
    #[serde(default)]
    pub priority: Option<i32>,
}

/// On-disk layout. Dependency tables stay as raw TOML tables so their
/// declaration order survives (`toml` is built with `preserve_order`).
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawManifest {
    #[serde(default)]
    package: Option<PackageMetadata>,

    #[serde(default)]
    dependencies: toml::Table,

    #[serde(default, rename = "dev-dependencies")]
    dev_dependencies: toml::Table,

    /// Legacy name for `[dependencies]`
    #[serde(default)]
    packages: toml::Table,

    /// Legacy name for `[dev-dependencies]`
    #[serde(default, rename = "dev-packages")]
    dev_packages: toml::Table,
}

/// A parsed manifest.
#[derive(Debug, Clone)]
pub struct Manifest {
    /// Package metadata (None for a workspace-only manifest)
    pub package: Option<PackageMetadata>,

    dependencies: Vec<Declaration>,
    dev_dependencies: Vec<Declaration>,
    path: PathBuf,
}

impl Manifest {
    /// Load a manifest from a file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read manifest: {}", path.display()))?;
        Self::parse(&contents, path)
    }

    /// Parse manifest contents; `path` is where they were read from.
    pub fn parse(contents: &str, path: &Path) -> Result<Self> {
        let raw: RawManifest = toml::from_str(contents)
            .with_context(|| format!("failed to parse manifest: {}", path.display()))?;

        let dependencies = merge_tables(raw.dependencies, raw.packages, "dependencies", path)?;
        let dev_dependencies =
            merge_tables(raw.dev_dependencies, raw.dev_packages, "dev-dependencies", path)?;

        Ok(Manifest {
            package: raw.package,
            dependencies: to_declarations(dependencies, path, false)?,
            dev_dependencies: to_declarations(dev_dependencies, path, true)?,
            path: path.to_path_buf(),
        })
    }

    /// Declared dependencies, in declaration order.
    pub fn dependencies(&self) -> &[Declaration] {
        &self.dependencies
    }

    /// Declared dev-dependencies, in declaration order.
    pub fn dev_dependencies(&self) -> &[Declaration] {
        &self.dev_dependencies
    }

    /// Path of the manifest file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Directory containing the manifest.
    pub fn dir(&self) -> &Path {
        self.path.parent().unwrap_or(Path::new("."))
    }

    /// The package name, if the manifest has a [package] section.
    pub fn name(&self) -> Option<&str> {
        self.package.as_ref().map(|p| p.name.as_str())
    }

    pub fn version(&self) -> Option<&str> {
        self.package.as_ref().and_then(|p| p.version.as_deref())
    }

    pub fn priority(&self) -> Option<i32> {
        self.package.as_ref().and_then(|p| p.priority)
    }
}

/// Read a manifest, returning `None` when the file does not exist.
pub fn read_manifest(path: &Path) -> Result<Option<Manifest>> {
    if !path.is_file() {
        return Ok(None);
    }
    Manifest::load(path).map(Some)
}

/// Locate the manifest at a content root.
pub fn manifest_path_at(content_root: &Path) -> Option<PathBuf> {
    let path = content_root.join(MANIFEST_NAME);
    path.is_file().then_some(path)
}

/// Find the manifest in `start` or any parent directory.
pub fn find_manifest(start: &Path) -> Result<PathBuf, StowageError> {
    let mut current = start.to_path_buf();
    loop {
        if let Some(found) = manifest_path_at(&current) {
            return Ok(found);
        }
        if !current.pop() {
            return Err(StowageError::not_found(
                "manifest",
                format!("{} in {} or any parent directory", MANIFEST_NAME, start.display()),
            ));
        }
    }
}

/// Fold a legacy table into the current one, rejecting names declared in both.
fn merge_tables(
    mut current: toml::Table,
    legacy: toml::Table,
    section: &str,
    path: &Path,
) -> Result<toml::Table> {
    if !legacy.is_empty() {
        tracing::debug!(
            "{}: reading legacy table for [{}]",
            path.display(),
            section
        );
    }
    for (name, value) in legacy {
        if current.contains_key(&name) {
            return Err(StowageError::validation(
                format!("dependency `{}`", name),
                format!("declared in both [{}] and its legacy table", section),
            )
            .into());
        }
        current.insert(name, value);
    }
    Ok(current)
}

fn to_declarations(table: toml::Table, path: &Path, is_dev: bool) -> Result<Vec<Declaration>> {
    table
        .into_iter()
        .map(|(name, value)| {
            let spec: DependencySpec = value.try_into().with_context(|| {
                format!("invalid dependency `{}` in {}", name, path.display())
            })?;
            Ok(spec.to_declaration(&name, path, is_dev)?)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_preserves_order() {
        let manifest = Manifest::parse(
            r#"
[package]
name = "root"

[dependencies]
zeta = { path = "../zeta" }
alpha = "^1.0"
mid = { url = "https://github.com/o/mid" }
"#,
            Path::new("/ws/Stowage.toml"),
        )
        .unwrap();

        let names: Vec<_> = manifest.dependencies().iter().map(|d| d.name()).collect();
        assert_eq!(names, vec!["zeta", "alpha", "mid"]);
        assert_eq!(manifest.name(), Some("root"));
        assert!(manifest.dev_dependencies().is_empty());
    }

    #[test]
    fn test_legacy_tables_normalize() {
        let manifest = Manifest::parse(
            r#"
[packages]
old = { git = "https://github.com/o/old", branch = "dev" }

[dev-packages]
fixtures = { path = "./fixtures" }
"#,
            Path::new("/ws/Stowage.toml"),
        )
        .unwrap();

        assert_eq!(manifest.dependencies().len(), 1);
        assert_eq!(manifest.dependencies()[0].reference(), Some("dev"));
        assert_eq!(manifest.dev_dependencies().len(), 1);
        assert!(manifest.dev_dependencies()[0].is_dev());
    }

    #[test]
    fn test_duplicate_across_legacy_rejected() {
        let result = Manifest::parse(
            r#"
[dependencies]
dup = "1.0"

[packages]
dup = "2.0"
"#,
            Path::new("/ws/Stowage.toml"),
        );
        let err = result.unwrap_err();
        assert!(format!("{:#}", err).contains("legacy table"));
    }

    #[test]
    fn test_invalid_declaration_is_validation_error() {
        let result = Manifest::parse(
            "[dependencies]\nbad = { path = \"../x\", ref = \"main\" }\n",
            Path::new("/ws/Stowage.toml"),
        );
        let err = result.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<StowageError>(),
            Some(StowageError::Validation { .. })
        ));
    }

    #[test]
    fn test_read_manifest_missing_is_none() {
        let tmp = TempDir::new().unwrap();
        assert!(read_manifest(&tmp.path().join(MANIFEST_NAME)).unwrap().is_none());
        assert!(manifest_path_at(tmp.path()).is_none());
    }

    #[test]
    fn test_find_manifest_upward() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join(MANIFEST_NAME), "[package]\nname = \"ws\"\n").unwrap();
        let nested = tmp.path().join("a/b");
        std::fs::create_dir_all(&nested).unwrap();

        assert_eq!(find_manifest(&nested).unwrap(), tmp.path().join(MANIFEST_NAME));
    }
}
