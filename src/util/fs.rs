//! Filesystem utilities.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use glob::Pattern;
use walkdir::WalkDir;

/// Recursively copy a directory.
pub fn copy_dir_all(src: &Path, dst: &Path) -> Result<()> {
    ensure_dir(dst)?;

    for entry in fs::read_dir(src)
        .with_context(|| format!("failed to read directory: {}", src.display()))?
    {
        let entry = entry?;
        let ty = entry.file_type()?;
        let src_path = entry.path();
        let dst_path = dst.join(entry.file_name());

        if ty.is_dir() {
            copy_dir_all(&src_path, &dst_path)?;
        } else {
            fs::copy(&src_path, &dst_path).with_context(|| {
                format!(
                    "failed to copy {} to {}",
                    src_path.display(),
                    dst_path.display()
                )
            })?;
        }
    }
    Ok(())
}

/// Ensure a directory exists, creating it if necessary.
pub fn ensure_dir(path: &Path) -> Result<()> {
    if !path.exists() {
        fs::create_dir_all(path)
            .with_context(|| format!("failed to create directory: {}", path.display()))?;
    }
    Ok(())
}

/// Read a file to string, with nice error messages.
pub fn read_to_string(path: &Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("failed to read file: {}", path.display()))
}

/// Read a file to string, or `None` if it does not exist.
pub fn read_optional(path: &Path) -> Result<Option<String>> {
    if !path.is_file() {
        return Ok(None);
    }
    read_to_string(path).map(Some)
}

/// Write a file atomically: contents go to a temp file in the same directory
/// which is then renamed over the target.
pub fn write_atomic(path: &Path, contents: impl AsRef<[u8]>) -> Result<()> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    ensure_dir(parent)?;

    let mut tmp = tempfile::NamedTempFile::new_in(parent)
        .with_context(|| format!("failed to create temp file in {}", parent.display()))?;
    tmp.write_all(contents.as_ref())
        .with_context(|| format!("failed to write file: {}", path.display()))?;
    tmp.persist(path)
        .with_context(|| format!("failed to write file: {}", path.display()))?;
    Ok(())
}

/// Remove a file, then any parent directories left empty, up to `stop_at`.
pub fn remove_file_pruning(path: &Path, stop_at: &Path) -> Result<()> {
    if path.exists() {
        fs::remove_file(path)
            .with_context(|| format!("failed to remove file: {}", path.display()))?;
    }

    let mut dir = path.parent();
    while let Some(current) = dir {
        if current == stop_at || !current.starts_with(stop_at) {
            break;
        }
        let is_empty = fs::read_dir(current)
            .map(|mut entries| entries.next().is_none())
            .unwrap_or(false);
        if !is_empty || fs::remove_dir(current).is_err() {
            break;
        }
        dir = current.parent();
    }
    Ok(())
}

/// List files under `root` as sorted, `/`-separated relative paths.
///
/// Hidden VCS metadata (`.git`) is skipped.
pub fn walk_files(root: &Path) -> Result<Vec<String>> {
    let mut files = Vec::new();
    let walker = WalkDir::new(root)
        .follow_links(true)
        .into_iter()
        .filter_entry(|e| e.file_name() != ".git");

    for entry in walker {
        let entry = entry.with_context(|| format!("failed to walk {}", root.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        if let Ok(rel) = entry.path().strip_prefix(root) {
            files.push(to_slash(rel));
        }
    }

    files.sort();
    Ok(files)
}

/// Check whether a relative path matches any of the given glob patterns.
///
/// An empty pattern list matches everything.
pub fn matches_any(rel_path: &str, patterns: &[String]) -> Result<bool> {
    if patterns.is_empty() {
        return Ok(true);
    }
    for pattern in patterns {
        let compiled =
            Pattern::new(pattern).with_context(|| format!("invalid glob pattern: {}", pattern))?;
        let dir_prefix = format!("{}/", pattern.trim_end_matches('/'));
        if compiled.matches(rel_path) || rel_path.starts_with(&dir_prefix) {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Render a relative path with `/` separators.
pub fn to_slash(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Get the relative path from `base` to `path`.
pub fn relative_path(base: &Path, path: &Path) -> PathBuf {
    pathdiff::diff_paths(path, base).unwrap_or_else(|| path.to_path_buf())
}
