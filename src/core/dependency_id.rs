//! Canonical dependency identity - WHAT a declaration really points at.
//!
//! Two declarations that refer to the same real-world content must produce
//! the same key, no matter which manifest declared them or at what depth.
//! The resolver deduplicates on this key, which is also what makes cycles
//! terminate.

use std::fmt;
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};
use url::Url;

use crate::core::dependency::{Declaration, SourceSpec};
use crate::core::errors::StowageError;

/// Stand-in for "no ref given" in git keys.
///
/// `~` is forbidden in git ref names, so this can never collide with a real
/// branch or tag, and nothing will ever try to check it out.
pub const NO_REF_SENTINEL: &str = "~default";

/// The kind of source a dependency resolves from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Git,
    Path,
    Registry,
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceType::Git => write!(f, "git"),
            SourceType::Path => write!(f, "path"),
            SourceType::Registry => write!(f, "registry"),
        }
    }
}

/// Canonical identity of a dependency.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DependencyId {
    key: String,
    display_name: String,
    source_type: SourceType,
}

impl DependencyId {
    /// Compute the identity of a declaration.
    ///
    /// `declaring_dir` is the directory relative paths are resolved against,
    /// normally the directory of the manifest the declaration came from.
    pub fn compute(decl: &Declaration, declaring_dir: &Path) -> Result<Self, StowageError> {
        let (key, source_type) = match decl.source_spec()? {
            SourceSpec::Git {
                url,
                reference,
                resource_path,
            } => {
                let key = format!(
                    "git:{}#{}:{}",
                    normalize_git_url(&url),
                    reference.as_deref().unwrap_or(NO_REF_SENTINEL),
                    resource_path.unwrap_or_default()
                );
                (key, SourceType::Git)
            }
            SourceSpec::Path { path } => {
                let absolute = resolve_declared_path(&path, declaring_dir);
                (format!("path:{}", absolute.display()), SourceType::Path)
            }
            SourceSpec::Registry { constraint } => {
                let constraint = constraint
                    .as_deref()
                    .map(str::trim)
                    .filter(|c| !c.is_empty())
                    .unwrap_or("*");
                (
                    format!("registry:{}:{}", decl.name(), constraint),
                    SourceType::Registry,
                )
            }
        };

        Ok(DependencyId {
            key,
            display_name: decl.name().to_string(),
            source_type,
        })
    }

    /// The canonical dedup key.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Human-readable name (the declared package name).
    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn source_type(&self) -> SourceType {
        self.source_type
    }
}

impl fmt::Display for DependencyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.display_name, self.key)
    }
}

/// Normalize a git URL so equivalent spellings compare equal.
///
/// - lowercases the whole URL
/// - rewrites scp-style `git@host:owner/repo` and `ssh://`/`git://` URLs to
///   `https://host/owner/repo`
/// - strips userinfo, trailing slashes and a trailing `.git`
pub fn normalize_git_url(url: &str) -> String {
    let lowered = url.trim().to_lowercase();

    let rewritten = if let Some((host, path)) = scp_like(&lowered) {
        format!("https://{}/{}", host, path.trim_start_matches('/'))
    } else if let Ok(parsed) = Url::parse(&lowered) {
        match (parsed.scheme(), parsed.host_str()) {
            ("ssh" | "git" | "git+ssh" | "git+https" | "http" | "https", Some(host)) => {
                format!("https://{}{}", host, parsed.path())
            }
            _ => lowered.clone(),
        }
    } else {
        lowered.clone()
    };

    let mut normalized = rewritten.trim_end_matches('/').to_string();
    if let Some(stripped) = normalized.strip_suffix(".git") {
        normalized = stripped.trim_end_matches('/').to_string();
    }
    normalized
}

/// Split `user@host:path` (scp-style) into host and path.
fn scp_like(url: &str) -> Option<(&str, &str)> {
    if url.contains("://") {
        return None;
    }
    let (userhost, path) = url.split_once(':')?;
    let host = userhost.rsplit_once('@').map_or(userhost, |(_, h)| h);
    if host.is_empty() || host.contains('/') {
        return None;
    }
    Some((host, path))
}

/// Resolve a declared path to an absolute, normalized path.
///
/// `~` expands to the home directory; relative paths are joined onto
/// `declaring_dir`. `.` and `..` components are folded lexically, then
/// symlinks are resolved when the path exists.
pub fn resolve_declared_path(path: &Path, declaring_dir: &Path) -> PathBuf {
    let expanded = expand_home(path);
    let joined = if expanded.is_absolute() {
        expanded
    } else {
        declaring_dir.join(expanded)
    };
    let folded = fold_components(&joined);
    folded.canonicalize().unwrap_or(folded)
}

fn expand_home(path: &Path) -> PathBuf {
    let Ok(rest) = path.strip_prefix("~") else {
        return path.to_path_buf();
    };
    match directories::BaseDirs::new() {
        Some(dirs) => dirs.home_dir().join(rest),
        None => path.to_path_buf(),
    }
}

fn fold_components(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn decl(name: &str) -> Declaration {
        Declaration::new(name, "/ws/Stowage.toml")
    }

    #[test]
    fn test_scp_and_https_share_a_key() {
        let a = decl("b").with_url("git@github.com:a/b.git#main");
        let b = decl("b").with_url("https://github.com/a/b#main");

        let id_a = DependencyId::compute(&a, Path::new("/ws")).unwrap();
        let id_b = DependencyId::compute(&b, Path::new("/other")).unwrap();

        assert_eq!(id_a.key(), id_b.key());
        assert_eq!(id_a.key(), "git:https://github.com/a/b#main:");
        assert_eq!(id_a.source_type(), SourceType::Git);
    }

    #[test]
    fn test_missing_ref_uses_sentinel() {
        let id = DependencyId::compute(&decl("r").with_url("https://github.com/o/r"), Path::new("/"))
            .unwrap();
        assert!(id.key().contains(NO_REF_SENTINEL));

        let main = DependencyId::compute(
            &decl("r").with_url("https://github.com/o/r").with_ref("main"),
            Path::new("/"),
        )
        .unwrap();
        assert_ne!(id.key(), main.key());
    }

    #[test]
    fn test_resource_path_distinguishes_keys() {
        let x = decl("x").with_url("https://github.com/o/mono").with_path("packs/x");
        let y = decl("y").with_url("https://github.com/o/mono").with_path("packs/y");
        let id_x = DependencyId::compute(&x, Path::new("/")).unwrap();
        let id_y = DependencyId::compute(&y, Path::new("/")).unwrap();
        assert_ne!(id_x.key(), id_y.key());
        assert!(id_x.key().ends_with(":packs/x"));
    }

    #[test]
    fn test_normalize_git_url_variants() {
        assert_eq!(
            normalize_git_url("ssh://git@GitHub.com/Acme/Rules.git/"),
            "https://github.com/acme/rules"
        );
        assert_eq!(
            normalize_git_url("https://gitlab.com/org/project"),
            "https://gitlab.com/org/project"
        );
        assert_eq!(
            normalize_git_url("git@gitlab.com:org/sub/project.git"),
            "https://gitlab.com/org/sub/project"
        );
    }

    #[test]
    fn test_path_keys_are_absolute_and_folded() {
        let tmp = TempDir::new().unwrap();
        std::fs::create_dir_all(tmp.path().join("pkg")).unwrap();
        std::fs::create_dir_all(tmp.path().join("nested")).unwrap();

        let from_root = decl("pkg").with_path("./pkg");
        let from_nested = decl("pkg").with_path("../pkg");

        let a = DependencyId::compute(&from_root, tmp.path()).unwrap();
        let b = DependencyId::compute(&from_nested, &tmp.path().join("nested")).unwrap();
        assert_eq!(a.key(), b.key());
        assert!(a.key().starts_with("path:"));
        assert!(!a.key().contains(".."));
    }

    #[test]
    fn test_registry_key() {
        let any = DependencyId::compute(&decl("rules"), Path::new("/")).unwrap();
        assert_eq!(any.key(), "registry:rules:*");

        let pinned = DependencyId::compute(&decl("rules").with_version(" ^1.2 "), Path::new("/"))
            .unwrap();
        assert_eq!(pinned.key(), "registry:rules:^1.2");
    }
}
