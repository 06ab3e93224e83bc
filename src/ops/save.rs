//! Implementation of `stowage save`.
//!
//! The reverse of install: each enabled platform's import flows copy
//! workspace files back into a package directory. Files the workspace index
//! attributes to other packages are left out, as are deep-merge keys and
//! composite blocks that belong to someone else.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;

use crate::core::index::WorkspaceIndex;
use crate::core::manifest::{read_manifest, MANIFEST_NAME};
use crate::core::platform::{known_platforms, select_platforms, PlatformDefinition};
use crate::core::Workspace;
use crate::flow::composite::CompositeDoc;
use crate::flow::format::DocFormat;
use crate::flow::model::{Flow, MergePolicy};
use crate::flow::pattern::{render, PathPattern, PatternVars};
use crate::flow::tree::{self, KeySet};
use crate::ops::manifest_edit::ensure_package_manifest;
use crate::util::{fs, GlobalContext};

/// Options for `stowage save`.
#[derive(Debug, Clone, Default)]
pub struct SaveOptions {
    /// Platform ids; empty means configured or detected
    pub platforms: Vec<String>,
    pub dry_run: bool,
}

/// Result of `stowage save`.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveReport {
    pub package: String,
    /// Package-relative files written
    pub files_written: Vec<String>,
    /// Workspace files left out because another package owns them
    pub files_skipped: Vec<String>,
}

/// Save workspace configuration into the package at `package_dir`.
pub fn save(
    ctx: &GlobalContext,
    ws: &Workspace,
    package_dir: &Path,
    opts: &SaveOptions,
) -> Result<SaveReport> {
    let manifest = read_manifest(&package_dir.join(MANIFEST_NAME))?;
    let name = match manifest.as_ref().and_then(|m| m.name()) {
        Some(name) => name.to_string(),
        None => package_dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .with_context(|| format!("cannot name a package at {}", package_dir.display()))?,
    };
    let version = manifest.as_ref().and_then(|m| m.version()).map(str::to_string);

    let known = known_platforms(&ctx.config().platforms);
    let selected = if opts.platforms.is_empty() {
        &ctx.config().install.platforms
    } else {
        &opts.platforms
    };
    let platforms = select_platforms(&known, selected, ws.root())?;
    let index = WorkspaceIndex::load(&ws.index_path())?;

    let saver = Saver {
        root: ws.root(),
        package_dir,
        name: &name,
        index: &index,
        dry_run: opts.dry_run,
    };
    let mut report = SaveReport {
        package: name.clone(),
        ..Default::default()
    };
    let mut claimed = BTreeSet::new();
    for platform in &platforms {
        let vars = PatternVars {
            root_dir: &platform.root_dir,
            root_file: platform.root_file.as_deref(),
            name: &name,
            version: version.as_deref(),
            priority: 0,
        };
        for flow in &platform.import {
            saver
                .apply(platform, flow, &vars, &mut claimed, &mut report)
                .with_context(|| format!("{}: {}", platform.id, flow.label()))?;
        }
    }

    if !opts.dry_run && !report.files_written.is_empty() {
        ensure_package_manifest(&package_dir.join(MANIFEST_NAME), &name)?;
    }
    report.files_skipped.sort();
    report.files_skipped.dedup();
    tracing::info!(
        "Saved {} file(s) into {}",
        report.files_written.len(),
        package_dir.display()
    );
    Ok(report)
}

struct Saver<'a> {
    root: &'a Path,
    package_dir: &'a Path,
    name: &'a str,
    index: &'a WorkspaceIndex,
    dry_run: bool,
}

impl Saver<'_> {
    fn apply(
        &self,
        platform: &PlatformDefinition,
        flow: &Flow,
        vars: &PatternVars<'_>,
        claimed: &mut BTreeSet<String>,
        report: &mut SaveReport,
    ) -> Result<()> {
        let from = match vars.substitute(&flow.from) {
            Ok(from) => from,
            // e.g. `{rootFile}` on a platform without one
            Err(err) => {
                tracing::debug!("skipping import flow of {}: {}", platform.id, err);
                return Ok(());
            }
        };
        let to = vars.substitute(&flow.to)?;
        let pattern = PathPattern::compile(&from)?;

        for file in self.candidates(&pattern)? {
            let Some(captures) = pattern.captures(&file) else {
                continue;
            };
            if self.owned_by_others(&file) {
                tracing::debug!("not saving {} (owned by another package)", file);
                report.files_skipped.push(file);
                continue;
            }
            let target = render(&to, &captures)?;
            // the first platform to produce a target wins
            if !claimed.insert(target.clone()) {
                continue;
            }

            let source = self.root.join(&file);
            let content = match flow.merge {
                MergePolicy::Replace => Some(
                    std::fs::read(&source)
                        .with_context(|| format!("failed to read {}", source.display()))?,
                ),
                MergePolicy::Deep => self.deep_content(&file, &source, &target)?,
                MergePolicy::Composite => self.composite_content(&source)?,
            };
            let Some(content) = content else {
                continue;
            };
            self.write(&target, &content, report)?;
        }
        Ok(())
    }

    /// Workspace files that may match `pattern`.
    fn candidates(&self, pattern: &PathPattern) -> Result<Vec<String>> {
        if pattern.wildcards() == 0 {
            let path = pattern.as_str().to_string();
            return Ok(if self.root.join(&path).is_file() {
                vec![path]
            } else {
                Vec::new()
            });
        }

        let base = pattern.base_dir();
        let dir = self.root.join(base);
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        Ok(fs::walk_files(&dir)?
            .into_iter()
            .map(|file| match base {
                "" => file,
                base => format!("{}/{}", base, file),
            })
            .collect())
    }

    fn owned_by_others(&self, file: &str) -> bool {
        self.index.file(file).is_some_and(|f| {
            f.merge == MergePolicy::Replace && f.owners.iter().all(|o| o.package != self.name)
        })
    }

    /// The document without keys other packages own.
    fn deep_content(&self, file: &str, source: &Path, target: &str) -> Result<Option<Vec<u8>>> {
        let source_format = DocFormat::from_path(source)?;
        let target_format = DocFormat::from_path(Path::new(target))?;
        let mut doc = source_format.parse(&fs::read_to_string(source)?)?;

        let foreign: KeySet = self
            .index
            .file(file)
            .map(|f| {
                f.owners
                    .iter()
                    .filter(|o| o.package != self.name)
                    .flat_map(|o| o.keys.iter().cloned())
                    .collect()
            })
            .unwrap_or_default();
        tree::remove_keys(&mut doc, &foreign);
        if tree::is_empty(&doc) {
            return Ok(None);
        }
        Ok(Some(target_format.render(&doc)?.into_bytes()))
    }

    /// The package's own block, or the free text when it has none.
    fn composite_content(&self, source: &Path) -> Result<Option<Vec<u8>>> {
        let doc = CompositeDoc::parse(&fs::read_to_string(source)?);
        let body = doc.block(self.name).unwrap_or(&doc.preamble).trim();
        if body.is_empty() {
            return Ok(None);
        }
        Ok(Some(format!("{}\n", body).into_bytes()))
    }

    fn write(&self, target: &str, content: &[u8], report: &mut SaveReport) -> Result<()> {
        let path: PathBuf = self.package_dir.join(target);
        if std::fs::read(&path).is_ok_and(|existing| existing == content) {
            return Ok(());
        }
        if !self.dry_run {
            fs::write_atomic(&path, content)?;
        }
        tracing::debug!("saved {}", target);
        report.files_written.push(target.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::index::{FileOwner, IndexedFile};
    use crate::util::config::Config;
    use serde_json::json;
    use tempfile::TempDir;

    fn context(ws: &Path) -> GlobalContext {
        GlobalContext::with_cwd(ws.to_path_buf())
            .unwrap()
            .with_config(Config::default())
    }

    fn owner(package: &str, keys: &[&str]) -> FileOwner {
        FileOwner {
            package: package.to_string(),
            priority: 0,
            keys: keys.iter().map(|k| k.to_string()).collect(),
            sources: BTreeSet::new(),
        }
    }

    #[test]
    fn test_save_claude_workspace() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("ws");
        std::fs::create_dir_all(root.join(".claude/rules/team")).unwrap();
        std::fs::write(root.join(".claude/rules/team/style.md"), "# Style").unwrap();
        std::fs::write(root.join(".claude/rules/vendor.md"), "# Vendor").unwrap();
        std::fs::write(
            root.join(".mcp.json"),
            r#"{"servers": {"mine": {"cmd": "x"}, "theirs": {"cmd": "y"}}}"#,
        )
        .unwrap();
        std::fs::write(
            root.join("CLAUDE.md"),
            "# Notes\n\n<!-- stowage:begin other -->\nother text\n<!-- stowage:end other -->\n",
        )
        .unwrap();

        let ws = Workspace::new(&root).unwrap();
        let mut index = WorkspaceIndex::default();
        index.files.insert(
            ".claude/rules/vendor.md".to_string(),
            IndexedFile {
                merge: MergePolicy::Replace,
                owners: vec![owner("other", &[])],
            },
        );
        index.files.insert(
            ".mcp.json".to_string(),
            IndexedFile {
                merge: MergePolicy::Deep,
                owners: vec![owner("other", &["/servers/theirs/cmd"])],
            },
        );
        index.save(&ws.index_path()).unwrap();

        let package = tmp.path().join("my-pack");
        let report = save(&context(ws.root()), &ws, &package, &SaveOptions::default()).unwrap();

        assert_eq!(report.package, "my-pack");
        assert_eq!(report.files_skipped, vec![".claude/rules/vendor.md"]);
        assert_eq!(
            report.files_written,
            vec!["rules/team/style.md", "mcp.json", "AGENTS.md"]
        );
        assert_eq!(
            std::fs::read_to_string(package.join("rules/team/style.md")).unwrap(),
            "# Style"
        );
        let mcp: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(package.join("mcp.json")).unwrap())
                .unwrap();
        assert_eq!(mcp, json!({"servers": {"mine": {"cmd": "x"}}}));
        assert_eq!(
            std::fs::read_to_string(package.join("AGENTS.md")).unwrap(),
            "# Notes\n"
        );
        assert!(package.join(MANIFEST_NAME).is_file());
    }

    #[test]
    fn test_save_takes_own_composite_block() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("ws");
        std::fs::create_dir_all(&root).unwrap();
        std::fs::write(
            root.join("CLAUDE.md"),
            "# Notes\n\n<!-- stowage:begin my-pack -->\nmine\n<!-- stowage:end my-pack -->\n",
        )
        .unwrap();

        let ws = Workspace::new(&root).unwrap();
        let package = tmp.path().join("my-pack");
        let opts = SaveOptions {
            platforms: vec!["claude".to_string()],
            dry_run: false,
        };
        save(&context(ws.root()), &ws, &package, &opts).unwrap();
        assert_eq!(std::fs::read_to_string(package.join("AGENTS.md")).unwrap(), "mine\n");
    }

    #[test]
    fn test_first_platform_wins() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("ws");
        std::fs::create_dir_all(root.join(".claude/commands")).unwrap();
        std::fs::create_dir_all(root.join(".cursor/commands")).unwrap();
        std::fs::write(root.join(".claude/commands/go.md"), "claude").unwrap();
        std::fs::write(root.join(".cursor/commands/go.md"), "cursor").unwrap();

        let ws = Workspace::new(&root).unwrap();
        let package = tmp.path().join("pack");
        let opts = SaveOptions {
            platforms: vec!["claude".to_string(), "cursor".to_string()],
            dry_run: false,
        };
        let report = save(&context(ws.root()), &ws, &package, &opts).unwrap();
        assert_eq!(report.files_written, vec!["commands/go.md"]);
        assert_eq!(
            std::fs::read_to_string(package.join("commands/go.md")).unwrap(),
            "claude"
        );
    }

    #[test]
    fn test_dry_run_writes_nothing() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("ws");
        std::fs::create_dir_all(root.join(".claude/rules")).unwrap();
        std::fs::write(root.join(".claude/rules/a.md"), "# A").unwrap();

        let ws = Workspace::new(&root).unwrap();
        let package = tmp.path().join("pack");
        let opts = SaveOptions {
            platforms: Vec::new(),
            dry_run: true,
        };
        let report = save(&context(ws.root()), &ws, &package, &opts).unwrap();
        assert_eq!(report.files_written, vec!["rules/a.md"]);
        assert!(!package.exists());
    }
}
