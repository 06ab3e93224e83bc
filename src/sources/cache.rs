//! Source cache layout.
//!
//! Everything materialized from remote sources lives under one cache root:
//!
//! ```text
//! <cache>/git/<host-owner-repo>-<hash>/   one checkout per url + ref
//! ```
//!
//! Content under the cache root is treated as read-only by the rest of the
//! crate, which is what makes a resolved package `immutable`.

use std::path::{Path, PathBuf};

use url::Url;

use crate::util::hash::short_hash;

/// The on-disk cache for fetched sources.
#[derive(Debug, Clone)]
pub struct SourceCache {
    root: PathBuf,
}

impl SourceCache {
    /// Create a cache rooted at `root`. Nothing is created on disk.
    pub fn new(root: PathBuf) -> Self {
        SourceCache { root }
    }

    /// Get the cache root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding git checkouts.
    pub fn git_dir(&self) -> PathBuf {
        self.root.join("git")
    }

    /// Checkout directory for one repository at one ref.
    ///
    /// `url` should already be normalized so equivalent spellings share a
    /// checkout.
    pub fn checkout_path(&self, url: &str, reference: Option<&str>) -> PathBuf {
        let hash_input = format!("{}#{}", url, reference.unwrap_or_default());
        let dir_name = format!("{}-{}", sanitize_url_for_path(url), short_hash(&hash_input, 8));
        self.git_dir().join(dir_name)
    }

    /// Whether `path` lies inside the cache.
    pub fn contains(&self, path: &Path) -> bool {
        let root = self.root.canonicalize().unwrap_or_else(|_| self.root.clone());
        let path = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        path.starts_with(root)
    }
}

/// Sanitize a URL for use as a directory name.
fn sanitize_url_for_path(url: &str) -> String {
    let mut name = match Url::parse(url) {
        Ok(parsed) => {
            let path = parsed.path().trim_matches('/').replace('/', "-");
            [parsed.host_str().unwrap_or_default(), path.as_str()]
                .iter()
                .filter(|part| !part.is_empty())
                .copied()
                .collect::<Vec<_>>()
                .join("-")
        }
        Err(_) => url
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '.' { c } else { '-' })
            .collect::<String>()
            .trim_matches('-')
            .to_string(),
    };

    if name.ends_with(".git") {
        name.truncate(name.len() - 4);
    }
    if name.is_empty() {
        name.push_str("repo");
    }
    name
}
