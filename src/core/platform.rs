//! Platform definitions - target tool layouts.
//!
//! A platform describes where one client tool expects its configuration
//! (`.claude/`, `.cursor/`, ...) and carries the export flows that map
//! package files into that layout, plus the import flows that map them back.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::core::errors::StowageError;
use crate::flow::model::{Flow, MergePolicy};

/// A target tool's directory and file conventions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformDefinition {
    /// Platform identifier ("claude", "cursor", ...)
    #[serde(default)]
    pub id: String,

    /// Workspace-relative root directory (".claude")
    pub root_dir: String,

    /// Optional workspace-relative root instructions file ("CLAUDE.md")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_file: Option<String>,

    /// Well-known sub-directories under `root_dir`
    #[serde(default)]
    pub subdirs: Vec<String>,

    /// Package -> workspace flows
    #[serde(default)]
    pub export: Vec<Flow>,

    /// Workspace -> package flows
    #[serde(default)]
    pub import: Vec<Flow>,

    /// Enabled when no platform is detected in the workspace
    #[serde(default)]
    pub default: bool,

    /// Set to false to never auto-enable this platform
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

impl PlatformDefinition {
    fn builtin(id: &str, root_dir: &str, root_file: Option<&str>) -> Self {
        PlatformDefinition {
            id: id.to_string(),
            root_dir: root_dir.to_string(),
            root_file: root_file.map(str::to_string),
            subdirs: Vec::new(),
            export: Vec::new(),
            import: Vec::new(),
            default: false,
            enabled: true,
        }
    }

    /// Whether the platform's root dir or root file exists in `workspace`.
    pub fn is_detected(&self, workspace: &Path) -> bool {
        workspace.join(&self.root_dir).is_dir()
            || self
                .root_file
                .as_ref()
                .is_some_and(|f| workspace.join(f).is_file())
    }

    /// Add a symmetric pair: an export flow and its reverse import flow.
    fn mirrored(mut self, package: &str, workspace: &str, merge: MergePolicy) -> Self {
        self.export.push(Flow::new(package, workspace).merge(merge));
        self.import.push(Flow::new(workspace, package).merge(merge));
        self
    }

    fn with_subdirs(mut self, subdirs: &[&str]) -> Self {
        self.subdirs = subdirs.iter().map(|s| s.to_string()).collect();
        self
    }
}

/// The built-in platform set.
pub fn builtin_platforms() -> Vec<PlatformDefinition> {
    let mut claude = PlatformDefinition::builtin("claude", ".claude", Some("CLAUDE.md"))
        .with_subdirs(&["rules", "commands", "agents", "skills"])
        .mirrored("rules/**/*.md", "{rootDir}/rules/**/*.md", MergePolicy::Replace)
        .mirrored("commands/**/*.md", "{rootDir}/commands/**/*.md", MergePolicy::Replace)
        .mirrored("agents/**/*.md", "{rootDir}/agents/**/*.md", MergePolicy::Replace)
        .mirrored("skills/**", "{rootDir}/skills/**", MergePolicy::Replace)
        .mirrored("mcp.json", ".mcp.json", MergePolicy::Deep)
        .mirrored("AGENTS.md", "{rootFile}", MergePolicy::Composite);
    claude.default = true;

    let cursor = PlatformDefinition::builtin("cursor", ".cursor", None)
        .with_subdirs(&["rules", "commands"])
        .mirrored("rules/**/*.md", "{rootDir}/rules/**/*.mdc", MergePolicy::Replace)
        .mirrored("commands/**/*.md", "{rootDir}/commands/**/*.md", MergePolicy::Replace)
        .mirrored("mcp.json", "{rootDir}/mcp.json", MergePolicy::Deep);

    let windsurf = PlatformDefinition::builtin("windsurf", ".windsurf", None)
        .with_subdirs(&["rules", "workflows"])
        .mirrored("rules/**/*.md", "{rootDir}/rules/**/*.md", MergePolicy::Replace)
        .mirrored("commands/**/*.md", "{rootDir}/workflows/**/*.md", MergePolicy::Replace);

    let codex = PlatformDefinition::builtin("codex", ".codex", Some("AGENTS.md"))
        .with_subdirs(&["prompts"])
        .mirrored("commands/**/*.md", "{rootDir}/prompts/**/*.md", MergePolicy::Replace)
        .mirrored("codex.toml", "{rootDir}/config.toml", MergePolicy::Deep)
        .mirrored("AGENTS.md", "{rootFile}", MergePolicy::Composite);

    vec![claude, cursor, windsurf, codex]
}

/// The built-ins with configured definitions layered on top.
///
/// A configured id that matches a built-in replaces it; others are added.
pub fn known_platforms(configured: &BTreeMap<String, PlatformDefinition>) -> Vec<PlatformDefinition> {
    let mut platforms = builtin_platforms();
    for (id, definition) in configured {
        let definition = PlatformDefinition {
            id: id.clone(),
            ..definition.clone()
        };
        match platforms.iter_mut().find(|p| &p.id == id) {
            Some(existing) => *existing = definition,
            None => platforms.push(definition),
        }
    }
    platforms
}

/// Pick the platforms to install into.
///
/// Explicitly selected ids win. Otherwise every enabled platform detected in
/// the workspace is used, falling back to the `default` ones.
pub fn select_platforms(
    known: &[PlatformDefinition],
    selected: &[String],
    workspace: &Path,
) -> Result<Vec<PlatformDefinition>, StowageError> {
    if !selected.is_empty() {
        return selected
            .iter()
            .map(|id| {
                known.iter().find(|p| &p.id == id).cloned().ok_or_else(|| {
                    StowageError::not_found("platform", id.clone())
                })
            })
            .collect();
    }

    let detected: Vec<_> = known
        .iter()
        .filter(|p| p.enabled && p.is_detected(workspace))
        .cloned()
        .collect();
    if !detected.is_empty() {
        return Ok(detected);
    }

    Ok(known
        .iter()
        .filter(|p| p.enabled && p.default)
        .cloned()
        .collect())
}
