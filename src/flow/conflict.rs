//! Target-path collisions between packages.
//!
//! Decides, for each `replace` target, which package keeps the path and
//! where everyone else goes. Nothing is ever silently overwritten: a file
//! is either written by its rightful owner or relocated to
//! `<dir>/<package>/<file>`.

use std::collections::{BTreeSet, HashSet};
use std::path::Path;

use serde::Serialize;

use crate::core::index::WorkspaceIndex;
use crate::core::package::Priority;

/// One package wanting to write one path.
#[derive(Debug, Clone)]
pub struct Claim<'a> {
    pub package: &'a str,
    pub priority: Priority,
    pub content: &'a [u8],
}

/// Where a claim ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placement {
    pub package: String,
    pub path: String,
    /// Set when the claim was moved away from the requested path
    pub relocated_from: Option<String>,
}

/// A collision and how it was settled, for reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowConflict {
    pub path: String,
    pub packages: Vec<String>,
    pub resolution: String,
}

/// The outcome for one requested path.
#[derive(Debug, Clone, Default)]
pub struct Resolution {
    pub placements: Vec<Placement>,
    pub conflict: Option<FlowConflict>,
}

/// Resolves collisions for one installation run.
///
/// Not safe to share between concurrent runs that may target the same
/// files: it remembers every path handed out so far.
pub struct ConflictResolver<'a> {
    index: &'a WorkspaceIndex,
    root: &'a Path,
    run_packages: &'a BTreeSet<String>,
    force: bool,
    planned: HashSet<String>,
}

impl<'a> ConflictResolver<'a> {
    pub fn new(
        index: &'a WorkspaceIndex,
        root: &'a Path,
        run_packages: &'a BTreeSet<String>,
        force: bool,
    ) -> Self {
        ConflictResolver {
            index,
            root,
            run_packages,
            force,
            planned: HashSet::new(),
        }
    }

    /// Settle every claim on `path`.
    pub fn resolve(&mut self, path: &str, claims: &[Claim<'_>]) -> Resolution {
        let mut claims: Vec<&Claim<'_>> = claims.iter().collect();
        claims.sort_by(|a, b| b.priority.cmp(&a.priority));
        let Some(winner) = claims.first() else {
            return Resolution::default();
        };

        let mut reasons = Vec::new();
        let index = self.index;
        let run_packages = self.run_packages;
        let blocking_owner = index.file(path).and_then(|file| {
            file.owners
                .iter()
                .find(|o| !run_packages.contains(&o.package))
        });

        let mut original_free = !self.planned.contains(path);
        if let Some(owner) = blocking_owner {
            original_free = false;
            reasons.push(format!("already installed by `{}`", owner.package));
        } else if original_free && self.index.file(path).is_none() {
            if let Ok(existing) = std::fs::read(self.root.join(path)) {
                if existing == winner.content {
                    tracing::debug!("adopting identical unowned file {}", path);
                } else if self.force {
                    tracing::warn!("overwriting unowned file {} (--force)", path);
                    reasons.push("overwrote an unowned file (--force)".to_string());
                } else {
                    original_free = false;
                    reasons.push("an unowned file with different content exists".to_string());
                }
            }
        }
        if claims.len() > 1 {
            reasons.push(format!(
                "claimed by {} packages, `{}` has precedence",
                claims.len(),
                winner.package
            ));
        }

        let mut resolution = Resolution::default();
        for (i, claim) in claims.iter().enumerate() {
            if i == 0 && original_free {
                self.planned.insert(path.to_string());
                resolution.placements.push(Placement {
                    package: claim.package.to_string(),
                    path: path.to_string(),
                    relocated_from: None,
                });
                continue;
            }

            let target = self.relocation_target(path, claim.package);
            tracing::debug!("relocating {} for `{}` to {}", path, claim.package, target);
            self.planned.insert(target.clone());
            resolution.placements.push(Placement {
                package: claim.package.to_string(),
                path: target,
                relocated_from: Some(path.to_string()),
            });
        }

        if !reasons.is_empty() {
            let mut packages: Vec<String> = claims.iter().map(|c| c.package.to_string()).collect();
            if let Some(owner) = blocking_owner {
                packages.insert(0, owner.package.clone());
            }
            resolution.conflict = Some(FlowConflict {
                path: path.to_string(),
                packages,
                resolution: reasons.join("; "),
            });
        }
        resolution
    }

    /// `<dir>/<package>/<file>`, or `<dir>/<package>/<stem>-N.<ext>` when
    /// that is taken by someone else.
    fn relocation_target(&self, path: &str, package: &str) -> String {
        let (dir, file) = match path.rsplit_once('/') {
            Some((dir, file)) => (format!("{}/", dir), file),
            None => (String::new(), path),
        };
        let (stem, ext) = match file.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() => (stem, format!(".{}", ext)),
            _ => (file, String::new()),
        };

        let mut candidate = format!("{}{}/{}", dir, package, file);
        let mut n = 2;
        while !self.is_free_for(&candidate, package) {
            candidate = format!("{}{}/{}-{}{}", dir, package, stem, n, ext);
            n += 1;
        }
        candidate
    }

    fn is_free_for(&self, candidate: &str, package: &str) -> bool {
        if self.planned.contains(candidate) {
            return false;
        }
        match self.index.file(candidate) {
            Some(file) => file.owners.iter().all(|o| o.package == package),
            None => !self.root.join(candidate).exists(),
        }
    }
}
