//! Resolved package sources.
//!
//! A [`ResolvedPackageSource`] is created exactly once per unique dependency
//! identity per run and never mutated afterward.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::dependency_id::{DependencyId, SourceType};

/// Whether a resolved package's content may change under us.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mutability {
    /// A working directory the user may edit
    Mutable,
    /// Content materialized under the read-only cache area
    Immutable,
}

/// How a registry version was chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResolutionSource {
    /// No constraint was given; the newest available version was taken
    Latest,
    /// The constraint named one exact version
    Exact,
    /// The newest version matching a range constraint
    Range,
}

impl fmt::Display for ResolutionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolutionSource::Latest => write!(f, "latest"),
            ResolutionSource::Exact => write!(f, "exact"),
            ResolutionSource::Range => write!(f, "range"),
        }
    }
}

/// A concrete, located package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPackageSource {
    /// Package name (from the package's own manifest when it has one)
    pub package_name: String,

    /// Absolute content root
    pub absolute_path: PathBuf,

    /// The path as it was declared (path deps) or located (git/registry)
    pub declared_path: String,

    pub mutability: Mutability,

    pub version: Option<String>,

    pub source_type: SourceType,

    /// Registry only: how the version was chosen
    pub resolution_source: Option<ResolutionSource>,
}

impl ResolvedPackageSource {
    /// The package's content root.
    pub fn content_root(&self) -> &Path {
        &self.absolute_path
    }

    pub fn is_mutable(&self) -> bool {
        self.mutability == Mutability::Mutable
    }
}

/// A package selected for installation, with everything the flow engine needs.
#[derive(Debug, Clone)]
pub struct InstallPackage {
    /// Canonical identity
    pub id: DependencyId,

    pub source: ResolvedPackageSource,

    /// Install precedence
    pub priority: Priority,

    /// Resource filter globs (package-relative); empty means everything
    pub include: Vec<String>,
}

impl InstallPackage {
    pub fn name(&self) -> &str {
        &self.source.package_name
    }
}

/// Install precedence of a package.
///
/// Higher `level` wins; among equal levels, the package closer to the root
/// (lower `order`, the breadth-first position) wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Priority {
    pub level: i32,
    pub order: usize,
}

impl Priority {
    pub fn new(level: i32, order: usize) -> Self {
        Priority { level, order }
    }

    /// Whether `self` takes precedence over `other`.
    pub fn beats(&self, other: &Priority) -> bool {
        self.cmp(other) == std::cmp::Ordering::Greater
    }
}

impl Ord for Priority {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.level
            .cmp(&other.level)
            .then_with(|| other.order.cmp(&self.order))
    }
}

impl PartialOrd for Priority {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
