//! Dependency declarations.
//!
//! A [`Declaration`] is a dependency reference exactly as written in a
//! manifest, normalized into one shape regardless of which manifest schema
//! (current or legacy key names) it was read from.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::errors::StowageError;

/// A dependency declaration read from a manifest.
///
/// Immutable once constructed; the resolver only ever derives new values
/// (identities, resolved sources) from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Declaration {
    name: String,
    version: Option<String>,
    path: Option<PathBuf>,
    url: Option<String>,
    reference: Option<String>,
    base: Option<String>,
    include: Vec<String>,
    priority: Option<i32>,
    is_dev: bool,
    declared_in: PathBuf,
    depth: usize,
}

/// The closed set of source kinds a declaration can point at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceSpec {
    /// Local directory, relative paths not yet resolved
    Path { path: PathBuf },
    /// Git repository with optional ref and in-repo resource path
    Git {
        url: String,
        reference: Option<String>,
        resource_path: Option<String>,
    },
    /// Named package from the registry
    Registry { constraint: Option<String> },
}

impl Declaration {
    /// Create a registry declaration with no constraint.
    pub fn new(name: impl Into<String>, declared_in: impl Into<PathBuf>) -> Self {
        Declaration {
            name: name.into(),
            version: None,
            path: None,
            url: None,
            reference: None,
            base: None,
            include: Vec::new(),
            priority: None,
            is_dev: false,
            declared_in: declared_in.into(),
            depth: 0,
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_ref(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
    }

    pub fn with_base(mut self, base: impl Into<String>) -> Self {
        self.base = Some(base.into());
        self
    }

    pub fn with_include(mut self, include: Vec<String>) -> Self {
        self.include = include;
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn dev(mut self, is_dev: bool) -> Self {
        self.is_dev = is_dev;
        self
    }

    pub fn at_depth(mut self, depth: usize) -> Self {
        self.depth = depth;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    pub fn reference(&self) -> Option<&str> {
        self.reference.as_deref()
    }

    pub fn base(&self) -> Option<&str> {
        self.base.as_deref()
    }

    /// Package-relative globs narrowing which files are installed.
    pub fn include(&self) -> &[String] {
        &self.include
    }

    pub fn priority(&self) -> Option<i32> {
        self.priority
    }

    pub fn is_dev(&self) -> bool {
        self.is_dev
    }

    /// The manifest this declaration was read from.
    pub fn declared_in(&self) -> &Path {
        &self.declared_in
    }

    /// The directory relative paths in this declaration are resolved against.
    pub fn declaring_dir(&self) -> &Path {
        self.declared_in.parent().unwrap_or(Path::new("."))
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Validate the declaration and classify its source.
    pub fn source_spec(&self) -> Result<SourceSpec, StowageError> {
        validate_package_name(&self.name)?;

        match (&self.url, &self.path) {
            (Some(url), path) => {
                let (url, embedded) = split_embedded_ref(url);
                let reference = match (self.reference.as_deref(), embedded) {
                    (Some(explicit), Some(embedded)) if explicit != embedded => {
                        return Err(self.invalid(format!(
                            "conflicting refs `{}` (field) and `{}` (url fragment)",
                            explicit, embedded
                        )));
                    }
                    (Some(explicit), _) => Some(explicit.to_string()),
                    (None, embedded) => embedded.map(str::to_string),
                };
                if url.trim().is_empty() {
                    return Err(self.invalid("empty git url"));
                }
                if path.as_ref().is_some_and(|p| p.is_absolute()) {
                    return Err(self.invalid("`path` on a git dependency must be repository-relative"));
                }
                let resource_path = path
                    .as_ref()
                    .map(|p| p.to_string_lossy().replace('\\', "/"))
                    .or_else(|| self.base.clone())
                    .map(|p| p.trim_matches('/').to_string())
                    .filter(|p| !p.is_empty() && p != ".");
                Ok(SourceSpec::Git {
                    url: url.to_string(),
                    reference,
                    resource_path,
                })
            }
            (None, Some(path)) => {
                if self.reference.is_some() {
                    return Err(self.invalid("`ref` is only valid for git dependencies"));
                }
                let path = match &self.base {
                    Some(base) => path.join(base),
                    None => path.clone(),
                };
                Ok(SourceSpec::Path { path })
            }
            (None, None) => {
                if self.reference.is_some() {
                    return Err(self.invalid("`ref` is only valid for git dependencies"));
                }
                Ok(SourceSpec::Registry {
                    constraint: self.version.clone(),
                })
            }
        }
    }

    fn invalid(&self, message: impl Into<String>) -> StowageError {
        StowageError::validation(format!("dependency `{}`", self.name), message)
    }

    /// Parse a dependency given on the command line.
    ///
    /// Accepts a local path (`./x`, `../x`, `/x`, `~/x`), a git URL
    /// (`https://...`, `git@host:...`, anything ending in `.git`, optionally
    /// with a `#ref` fragment), or `name[@constraint]` for the registry.
    pub fn parse_cli(spec: &str, declared_in: &Path) -> Result<Self, StowageError> {
        let spec = spec.trim();
        if spec.is_empty() {
            return Err(StowageError::validation("dependency", "empty package spec"));
        }

        if looks_like_git(spec) {
            let (url, _) = split_embedded_ref(spec);
            let name = name_from_url(url).ok_or_else(|| {
                StowageError::validation("dependency", format!("cannot infer name from `{}`", spec))
            })?;
            return Ok(Declaration::new(name, declared_in).with_url(spec));
        }

        if looks_like_path(spec) {
            let name = Path::new(spec.trim_end_matches(['/', '\\']))
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .filter(|n| n != "." && n != "..")
                .ok_or_else(|| {
                    StowageError::validation(
                        "dependency",
                        format!("cannot infer name from path `{}`", spec),
                    )
                })?;
            return Ok(Declaration::new(name, declared_in).with_path(spec));
        }

        let (name, constraint) = match spec.rsplit_once('@') {
            Some((name, constraint)) if !name.is_empty() => (name, Some(constraint)),
            _ => (spec, None),
        };
        let mut decl = Declaration::new(name, declared_in);
        if let Some(constraint) = constraint {
            decl = decl.with_version(constraint);
        }
        decl.source_spec()?;
        Ok(decl)
    }
}

impl std::fmt::Display for Declaration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)?;
        if let Some(url) = &self.url {
            write!(f, " ({})", url)?;
        } else if let Some(path) = &self.path {
            write!(f, " ({})", path.display())?;
        } else if let Some(version) = &self.version {
            write!(f, " {}", version)?;
        }
        Ok(())
    }
}

/// Dependency specification as it appears in a manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DependencySpec {
    /// Simple version constraint: `foo = "^1.0"`
    Simple(String),

    /// Detailed specification
    Detailed(DetailedDependencySpec),
}

/// Detailed dependency specification.
///
/// Legacy field names (`git`, `branch`, `tag`, `rev`) are accepted as
/// aliases so older manifests read into the same shape.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DetailedDependencySpec {
    /// Version constraint (registry) or informational version
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// Local path, or in-repo sub-path for git dependencies
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,

    /// Git repository URL
    #[serde(default, alias = "git", skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Git branch, tag or commit
    #[serde(
        default,
        rename = "ref",
        alias = "branch",
        alias = "tag",
        alias = "rev",
        skip_serializing_if = "Option::is_none"
    )]
    pub reference: Option<String>,

    /// Content sub-directory inside the located source
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base: Option<String>,

    /// Resource filter globs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub include: Option<Vec<String>>,

    /// Install priority override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i32>,
}

impl DependencySpec {
    /// Convert to a declaration given its name and the manifest it came from.
    pub fn to_declaration(
        &self,
        name: &str,
        manifest_path: &Path,
        is_dev: bool,
    ) -> Result<Declaration, StowageError> {
        let decl = match self {
            DependencySpec::Simple(version) => {
                Declaration::new(name, manifest_path).with_version(version.clone())
            }
            DependencySpec::Detailed(spec) => Declaration {
                version: spec.version.clone(),
                path: spec.path.clone(),
                url: spec.url.clone(),
                reference: spec.reference.clone(),
                base: spec.base.clone(),
                include: spec.include.clone().unwrap_or_default(),
                priority: spec.priority,
                ..Declaration::new(name, manifest_path)
            },
        }
        .dev(is_dev);

        decl.source_spec()?;
        Ok(decl)
    }
}

/// Validate a package name.
pub fn validate_package_name(name: &str) -> Result<(), StowageError> {
    if name.is_empty() {
        return Err(StowageError::validation("package name", "name cannot be empty"));
    }
    if name.contains(['/', '\\']) || name == "." || name == ".." {
        return Err(StowageError::validation(
            format!("package name `{}`", name),
            "name cannot contain path separators",
        ));
    }
    if name.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(StowageError::validation(
            format!("package name `{}`", name),
            "name cannot contain whitespace",
        ));
    }
    Ok(())
}

/// Split an embedded `#ref` off a git URL.
pub fn split_embedded_ref(url: &str) -> (&str, Option<&str>) {
    match url.rsplit_once('#') {
        Some((base, reference)) if !reference.is_empty() => (base, Some(reference)),
        Some((base, _)) => (base, None),
        None => (url, None),
    }
}

fn looks_like_git(spec: &str) -> bool {
    spec.starts_with("https://")
        || spec.starts_with("http://")
        || spec.starts_with("ssh://")
        || spec.starts_with("git://")
        || spec.starts_with("git@")
        || split_embedded_ref(spec).0.ends_with(".git")
}

fn looks_like_path(spec: &str) -> bool {
    spec.starts_with("./")
        || spec.starts_with("../")
        || spec.starts_with('/')
        || spec.starts_with('~')
        || spec == "."
        || spec.contains('\\')
}

/// Infer a package name from the last segment of a git URL.
fn name_from_url(url: &str) -> Option<String> {
    let last = url
        .trim_end_matches('/')
        .rsplit(['/', ':'])
        .next()?
        .trim_end_matches(".git");
    if last.is_empty() {
        None
    } else {
        Some(last.to_string())
    }
}
