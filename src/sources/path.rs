//! Path sources - packages in local directories.

use std::path::Path;

use crate::core::dependency::Declaration;
use crate::core::dependency_id::resolve_declared_path;
use crate::core::errors::StowageError;
use crate::core::package::Mutability;
use crate::sources::cache::SourceCache;
use crate::sources::LocatedSource;

/// Locate a path dependency.
///
/// `path` is the declared path with any `base` already joined on; it is
/// resolved against the declaring manifest's directory.
pub fn locate(
    path: &Path,
    decl: &Declaration,
    cache: &SourceCache,
) -> Result<LocatedSource, StowageError> {
    let absolute = resolve_declared_path(path, decl.declaring_dir());
    if !absolute.is_dir() {
        return Err(StowageError::not_found("path", absolute.display().to_string())
            .declared_in(decl.declared_in()));
    }

    let mutability = if cache.contains(&absolute) {
        Mutability::Immutable
    } else {
        Mutability::Mutable
    };

    Ok(LocatedSource {
        path: absolute,
        declared_path: path.display().to_string(),
        mutability,
        version: None,
        resolution_source: None,
    })
}
