//! Git sources - packages fetched from git repositories.
//!
//! The clone itself sits behind [`GitCloner`] so resolution can be tested
//! without a network. [`Git2Cloner`] is the real implementation.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use git2::build::{CheckoutBuilder, RepoBuilder};
use git2::{FetchOptions, Oid, Repository};

use crate::core::dependency_id::normalize_git_url;
use crate::core::errors::StowageError;
use crate::sources::cache::SourceCache;
use crate::util::fs;

/// What to clone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloneRequest {
    pub url: String,
    /// Branch, tag or commit; `None` for the default branch
    pub reference: Option<String>,
    /// Repository-relative directory holding the package
    pub subdirectory: Option<String>,
}

/// Clone collaborator.
///
/// Returns the local directory holding the requested content (the
/// subdirectory already joined on). Network and process failures are
/// returned as-is.
pub trait GitCloner: Send + Sync {
    fn clone_repo(&self, request: &CloneRequest) -> Result<PathBuf>;
}

/// How a ref will be fetched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefKind<'a> {
    /// 40 hex chars: shallow fetch of exactly that commit
    FullSha(&'a str),
    /// Abbreviated commit: full clone, then rev-parse
    ShortSha(&'a str),
    /// Branch or tag
    Named(&'a str),
    /// Remote default branch
    Default,
}

impl<'a> RefKind<'a> {
    pub fn classify(reference: Option<&'a str>) -> Self {
        let Some(reference) = reference.map(str::trim).filter(|r| !r.is_empty()) else {
            return RefKind::Default;
        };
        let is_hex = reference.chars().all(|c| c.is_ascii_hexdigit());
        match reference.len() {
            40 if is_hex => RefKind::FullSha(reference),
            7..=39 if is_hex => RefKind::ShortSha(reference),
            _ => RefKind::Named(reference),
        }
    }

    fn is_commit(&self) -> bool {
        matches!(self, RefKind::FullSha(_) | RefKind::ShortSha(_))
    }
}

/// Clones with libgit2 into the source cache.
pub struct Git2Cloner {
    cache: SourceCache,
    /// One lock per checkout directory; different resource paths of one
    /// repository share a checkout
    locks: Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>,
}

impl Git2Cloner {
    pub fn new(cache: SourceCache) -> Self {
        Git2Cloner {
            cache,
            locks: Mutex::new(HashMap::new()),
        }
    }

    fn lock_for(&self, dir: &Path) -> Arc<Mutex<()>> {
        let mut locks = match self.locks.lock() {
            Ok(locks) => locks,
            Err(poisoned) => poisoned.into_inner(),
        };
        locks.entry(dir.to_path_buf()).or_default().clone()
    }

    fn checkout(&self, request: &CloneRequest, dir: &Path) -> Result<()> {
        let kind = RefKind::classify(request.reference.as_deref());

        if Repository::open(dir).is_ok() {
            if kind.is_commit() {
                tracing::debug!("reusing checkout {}", dir.display());
                return Ok(());
            }
            tracing::info!("Updating {}", request.url);
            return update(dir, kind);
        }

        if dir.exists() {
            std::fs::remove_dir_all(dir)
                .with_context(|| format!("failed to clear stale checkout {}", dir.display()))?;
        }
        let parent = self.cache.git_dir();
        fs::ensure_dir(&parent)?;

        // clone next to the final location, then move into place
        let staging = tempfile::TempDir::new_in(&parent)
            .with_context(|| format!("failed to create temp dir in {}", parent.display()))?;
        let target = staging.path().join("checkout");
        tracing::info!("Cloning {}", request.url);
        clone_into(&request.url, kind, &target)
            .with_context(|| format!("failed to clone {}", request.url))?;
        std::fs::rename(&target, dir)
            .with_context(|| format!("failed to move checkout to {}", dir.display()))?;
        Ok(())
    }
}

impl GitCloner for Git2Cloner {
    fn clone_repo(&self, request: &CloneRequest) -> Result<PathBuf> {
        let normalized = normalize_git_url(&request.url);
        let dir = self
            .cache
            .checkout_path(&normalized, request.reference.as_deref());

        let lock = self.lock_for(&dir);
        let _guard = match lock.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        self.checkout(request, &dir)?;

        let content = match &request.subdirectory {
            Some(sub) => dir.join(sub),
            None => dir,
        };
        if !content.is_dir() {
            return Err(StowageError::not_found(
                "path",
                format!(
                    "{} in {}",
                    request.subdirectory.as_deref().unwrap_or("."),
                    request.url
                ),
            )
            .into());
        }
        Ok(content)
    }
}

fn clone_into(url: &str, kind: RefKind<'_>, target: &Path) -> Result<()> {
    match kind {
        RefKind::FullSha(sha) => {
            let repo = Repository::init(target)?;
            let mut remote = repo.remote_anonymous(url)?;
            let mut options = FetchOptions::new();
            options.depth(1);
            remote
                .fetch(&[sha], Some(&mut options), None)
                .with_context(|| format!("failed to fetch commit {}", sha))?;
            detach_at(&repo, Oid::from_str(sha)?)
        }
        RefKind::ShortSha(sha) => {
            let repo = Repository::clone(url, target)?;
            let oid = repo
                .revparse_single(sha)
                .with_context(|| format!("commit {} not found", sha))?
                .id();
            detach_at(&repo, oid)
        }
        RefKind::Named(name) => match RepoBuilder::new().branch(name).clone(url, target) {
            Ok(_) => Ok(()),
            Err(_) => {
                // not a branch; tags come along with a full clone
                if target.exists() {
                    std::fs::remove_dir_all(target)?;
                }
                let repo = Repository::clone(url, target)?;
                let oid = repo
                    .revparse_single(&format!("refs/tags/{}", name))
                    .or_else(|_| repo.revparse_single(name))
                    .with_context(|| format!("ref `{}` not found", name))?
                    .peel_to_commit()?
                    .id();
                detach_at(&repo, oid)
            }
        },
        RefKind::Default => {
            Repository::clone(url, target)?;
            Ok(())
        }
    }
}

/// Fetch and hard-reset an existing checkout of a named or default ref.
fn update(dir: &Path, kind: RefKind<'_>) -> Result<()> {
    let repo = Repository::open(dir).context("failed to open git repository")?;
    let mut remote = repo.find_remote("origin")?;
    remote.fetch(
        &["+refs/heads/*:refs/remotes/origin/*", "+refs/tags/*:refs/tags/*"],
        None,
        None,
    )?;

    let spec = match kind {
        RefKind::Named(name) => format!("origin/{}", name),
        _ => "origin/HEAD".to_string(),
    };
    let fallback = match kind {
        RefKind::Named(name) => name.to_string(),
        _ => "HEAD".to_string(),
    };
    let commit = repo
        .revparse_single(&spec)
        .or_else(|_| repo.revparse_single(&fallback))?
        .peel_to_commit()?;
    repo.reset(commit.as_object(), git2::ResetType::Hard, None)?;
    Ok(())
}

fn detach_at(repo: &Repository, oid: Oid) -> Result<()> {
    let commit = repo.find_commit(oid)?;
    repo.checkout_tree(commit.as_object(), Some(CheckoutBuilder::new().force()))?;
    repo.set_head_detached(oid)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_classify_ref() {
        let full = "3f2a9c1d3f2a9c1d3f2a9c1d3f2a9c1d3f2a9c1d";
        assert_eq!(RefKind::classify(Some(full)), RefKind::FullSha(full));
        assert_eq!(RefKind::classify(Some("3f2a9c1")), RefKind::ShortSha("3f2a9c1"));
        assert_eq!(RefKind::classify(Some("main")), RefKind::Named("main"));
        assert_eq!(RefKind::classify(Some("v1.0.0")), RefKind::Named("v1.0.0"));
        // too short to be taken for a commit
        assert_eq!(RefKind::classify(Some("beef")), RefKind::Named("beef"));
        assert_eq!(RefKind::classify(None), RefKind::Default);
        assert_eq!(RefKind::classify(Some(" ")), RefKind::Default);
    }

    fn commit_all(repo: &Repository, message: &str) -> Oid {
        let mut index = repo.index().unwrap();
        index
            .add_all(["*"].iter(), git2::IndexAddOption::DEFAULT, None)
            .unwrap();
        index.write().unwrap();
        let tree = repo.find_tree(index.write_tree().unwrap()).unwrap();
        let sig = git2::Signature::now("test", "test@example.com").unwrap();
        let parent = repo.head().ok().and_then(|h| h.peel_to_commit().ok());
        let parents: Vec<&git2::Commit> = parent.iter().collect();
        repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &parents)
            .unwrap()
    }

    #[test]
    fn test_clone_local_repository_with_subdirectory() {
        let tmp = TempDir::new().unwrap();
        let origin = tmp.path().join("origin");
        std::fs::create_dir_all(origin.join("packs/x/rules")).unwrap();
        std::fs::write(origin.join("packs/x/rules/a.md"), "a").unwrap();
        let repo = Repository::init(&origin).unwrap();
        commit_all(&repo, "init");

        let cloner = Git2Cloner::new(SourceCache::new(tmp.path().join("cache")));
        let url = format!("file://{}", origin.display());
        let path = cloner
            .clone_repo(&CloneRequest {
                url: url.clone(),
                reference: None,
                subdirectory: Some("packs/x".to_string()),
            })
            .unwrap();
        assert!(path.join("rules/a.md").is_file());
        assert!(path.starts_with(tmp.path().join("cache/git")));

        let missing = cloner.clone_repo(&CloneRequest {
            url,
            reference: None,
            subdirectory: Some("nope".to_string()),
        });
        assert!(StowageError::is_not_found(&missing.unwrap_err()));
    }
}
