//! Package sources.
//!
//! Sources turn a declaration into a located content root: a local path,
//! a git checkout, or a registry version. Each kind has one `locate`
//! function; [`SourceResolver`] dispatches on the declaration's
//! [`SourceSpec`] and reads the package manifest found there.

pub mod cache;
pub mod git;
pub mod path;
pub mod registry;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};

use crate::core::dependency::{Declaration, SourceSpec};
use crate::core::dependency_id::SourceType;
use crate::core::errors::StowageError;
use crate::core::manifest::{manifest_path_at, read_manifest, Manifest};
use crate::core::package::{Mutability, ResolutionSource, ResolvedPackageSource};

pub use cache::SourceCache;
pub use git::{CloneRequest, Git2Cloner, GitCloner};
pub use registry::{LocalRegistry, RegistryLookup, RegistryMatch};

/// Where a source kind found a package, before its manifest is read.
#[derive(Debug, Clone)]
pub struct LocatedSource {
    pub path: PathBuf,
    pub declared_path: String,
    pub mutability: Mutability,
    pub version: Option<String>,
    pub resolution_source: Option<ResolutionSource>,
}

/// A resolved source together with the manifest at its content root.
#[derive(Debug, Clone)]
pub struct ResolvedSource {
    pub source: ResolvedPackageSource,
    pub manifest: Option<Manifest>,
}

/// Resolves declarations of every source kind.
///
/// Shared by the resolver's worker threads; holds no per-run state.
pub struct SourceResolver {
    cache: SourceCache,
    cloner: Arc<dyn GitCloner>,
    registry: Arc<dyn RegistryLookup>,
}

impl SourceResolver {
    pub fn new(
        cache: SourceCache,
        cloner: Arc<dyn GitCloner>,
        registry: Arc<dyn RegistryLookup>,
    ) -> Self {
        SourceResolver {
            cache,
            cloner,
            registry,
        }
    }

    /// The default collaborators: libgit2 clones into `cache_dir` and a
    /// directory registry at `registry_dir`.
    pub fn with_defaults(cache_dir: PathBuf, registry_dir: PathBuf) -> Self {
        let cache = SourceCache::new(cache_dir);
        let cloner = Arc::new(Git2Cloner::new(cache.clone()));
        SourceResolver::new(cache, cloner, Arc::new(LocalRegistry::new(registry_dir)))
    }

    pub fn cache(&self) -> &SourceCache {
        &self.cache
    }

    /// Locate a declaration's content and read its manifest.
    ///
    /// Not-found errors carry the declaring manifest; collaborator failures
    /// are passed through with context only.
    pub fn resolve(&self, decl: &Declaration) -> Result<ResolvedSource> {
        let spec = decl.source_spec()?;
        let source_type = match &spec {
            SourceSpec::Path { .. } => SourceType::Path,
            SourceSpec::Git { .. } => SourceType::Git,
            SourceSpec::Registry { .. } => SourceType::Registry,
        };

        let located = match spec {
            SourceSpec::Path { path } => path::locate(&path, decl, &self.cache)?,
            SourceSpec::Git {
                url,
                reference,
                resource_path,
            } => self.locate_git(decl, url, reference, resource_path)?,
            SourceSpec::Registry { constraint } => self.locate_registry(decl, constraint)?,
        };

        let manifest = match manifest_path_at(&located.path) {
            Some(path) => read_manifest(&path)?,
            None => None,
        };
        let package_name = manifest
            .as_ref()
            .and_then(|m| m.name())
            .unwrap_or(decl.name())
            .to_string();
        let version = located
            .version
            .or_else(|| manifest.as_ref().and_then(|m| m.version()).map(str::to_string));

        tracing::debug!(
            "resolved `{}` -> {} ({})",
            decl.name(),
            located.path.display(),
            source_type
        );
        Ok(ResolvedSource {
            source: ResolvedPackageSource {
                package_name,
                absolute_path: located.path,
                declared_path: located.declared_path,
                mutability: located.mutability,
                version,
                source_type,
                resolution_source: located.resolution_source,
            },
            manifest,
        })
    }

    fn locate_git(
        &self,
        decl: &Declaration,
        url: String,
        reference: Option<String>,
        resource_path: Option<String>,
    ) -> Result<LocatedSource> {
        let request = CloneRequest {
            url,
            reference,
            subdirectory: resource_path,
        };
        let path = self
            .cloner
            .clone_repo(&request)
            .map_err(|e| with_declaration(e, decl))
            .with_context(|| format!("failed to fetch `{}` from {}", decl.name(), request.url))?;

        let mutability = if self.cache.contains(&path) {
            Mutability::Immutable
        } else {
            Mutability::Mutable
        };
        Ok(LocatedSource {
            path,
            declared_path: request.url,
            mutability,
            version: None,
            resolution_source: None,
        })
    }

    fn locate_registry(&self, decl: &Declaration, constraint: Option<String>) -> Result<LocatedSource> {
        let found = self
            .registry
            .resolve_version(decl.name(), constraint.as_deref())
            .map_err(|e| with_declaration(e, decl))?;

        let path = match decl.base() {
            Some(base) => found.path.join(base),
            None => found.path,
        };
        if !path.is_dir() {
            return Err(StowageError::not_found("path", path.display().to_string())
                .declared_in(decl.declared_in())
                .into());
        }

        Ok(LocatedSource {
            declared_path: path.display().to_string(),
            path,
            mutability: Mutability::Immutable,
            version: Some(found.version),
            resolution_source: Some(found.resolution_source),
        })
    }
}

/// Attach the declaring manifest to a not-found error.
fn with_declaration(err: anyhow::Error, decl: &Declaration) -> anyhow::Error {
    match err.downcast::<StowageError>() {
        Ok(classified) => classified.declared_in(decl.declared_in()).into(),
        Err(other) => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{MockCloner, MockRegistry, PackageFixture};
    use tempfile::TempDir;

    fn resolver(tmp: &TempDir, cloner: MockCloner, registry: MockRegistry) -> SourceResolver {
        SourceResolver::new(
            SourceCache::new(tmp.path().join("cache")),
            Arc::new(cloner),
            Arc::new(registry),
        )
    }

    #[test]
    fn test_path_source_takes_manifest_name() {
        let tmp = TempDir::new().unwrap();
        PackageFixture::new("real-name")
            .version("1.2.0")
            .write(&tmp.path().join("packs/dir-name"));
        let sources = resolver(&tmp, MockCloner::new(), MockRegistry::new());

        let decl = Declaration::new("alias", tmp.path().join("Stowage.toml")).with_path("packs/dir-name");
        let resolved = sources.resolve(&decl).unwrap();
        assert_eq!(resolved.source.package_name, "real-name");
        assert_eq!(resolved.source.version.as_deref(), Some("1.2.0"));
        assert_eq!(resolved.source.source_type, SourceType::Path);
        assert!(resolved.manifest.is_some());
    }

    #[test]
    fn test_git_source_uses_cloner() {
        let tmp = TempDir::new().unwrap();
        let checkout = tmp.path().join("checkout");
        PackageFixture::new("remote").write(&checkout.join("packs/x"));
        let cloner = MockCloner::new().with_repo("https://github.com/o/r", &checkout);
        let sources = resolver(&tmp, cloner.clone(), MockRegistry::new());

        let decl = Declaration::new("remote", tmp.path().join("Stowage.toml"))
            .with_url("https://github.com/o/r#v1")
            .with_path("packs/x");
        let resolved = sources.resolve(&decl).unwrap();

        assert_eq!(resolved.source.absolute_path, checkout.join("packs/x"));
        let calls = cloner.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].reference.as_deref(), Some("v1"));
        assert_eq!(calls[0].subdirectory.as_deref(), Some("packs/x"));
    }

    #[test]
    fn test_registry_source_records_resolution() {
        let tmp = TempDir::new().unwrap();
        let registry = MockRegistry::new();
        registry.publish(&tmp.path().join("registry"), "rules-pack", "1.4.0", PackageFixture::new("rules-pack"));
        let sources = resolver(&tmp, MockCloner::new(), registry);

        let decl = Declaration::new("rules-pack", tmp.path().join("Stowage.toml")).with_version("^1.0");
        let resolved = sources.resolve(&decl).unwrap();
        assert_eq!(resolved.source.version.as_deref(), Some("1.4.0"));
        assert_eq!(resolved.source.mutability, Mutability::Immutable);
        assert_eq!(resolved.source.resolution_source, Some(ResolutionSource::Range));
    }

    #[test]
    fn test_not_found_carries_declaring_manifest() {
        let tmp = TempDir::new().unwrap();
        let sources = resolver(&tmp, MockCloner::new(), MockRegistry::new());
        let manifest = tmp.path().join("Stowage.toml");

        let err = sources
            .resolve(&Declaration::new("ghost", &manifest))
            .unwrap_err();
        match err.downcast_ref::<StowageError>() {
            Some(StowageError::NotFound { declared_in, .. }) => {
                assert_eq!(declared_in.as_deref(), Some(manifest.as_path()));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
