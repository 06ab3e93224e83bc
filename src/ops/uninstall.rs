//! Implementation of `stowage uninstall`.
//!
//! A package's contribution is removed using only the workspace index:
//! files it alone owns are deleted, its deep-merge keys are stripped from
//! shared documents (keys other packages also set fall back to the
//! strongest remaining owner's value), and its composite blocks are cut out.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::Value;

use crate::core::index::{FileOwner, WorkspaceIndex};
use crate::core::Workspace;
use crate::flow::composite::CompositeDoc;
use crate::flow::format::DocFormat;
use crate::flow::model::MergePolicy;
use crate::flow::tree::{self, KeySet};
use crate::ops::manifest_edit::remove_declaration;
use crate::util::diagnostic::PackageNotInstalledError;
use crate::util::fs;

/// Options for uninstalling a package.
#[derive(Debug, Clone, Default)]
pub struct UninstallOptions {
    pub dry_run: bool,
}

/// What removing one package changed on disk.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Removal {
    /// Shared files rewritten without the package's share
    pub files_written: Vec<String>,
    pub files_removed: Vec<String>,
}

/// Result of `stowage uninstall`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UninstallReport {
    pub package: String,
    #[serde(flatten)]
    pub removal: Removal,
    /// Whether the declaration was dropped from `Stowage.toml`
    pub manifest_updated: bool,
}

/// Uninstall `package` from the workspace.
pub fn uninstall(ws: &mut Workspace, package: &str, opts: &UninstallOptions) -> Result<UninstallReport> {
    let index_path = ws.index_path();
    let mut index = WorkspaceIndex::load(&index_path)?;

    let installed =
        index.packages.contains_key(package) || index.files_owned_by(package).next().is_some();
    if !installed {
        let names: Vec<&str> = index.packages.keys().map(String::as_str).collect();
        return Err(PackageNotInstalledError {
            package: package.to_string(),
            suggestions: (!names.is_empty()).then(|| format!("installed: {}", names.join(", "))),
        }
        .into());
    }

    tracing::info!("Uninstalling {}", package);
    let removal = remove_contribution(ws.root(), &mut index, package, opts.dry_run)?;

    let mut manifest_updated = false;
    if !opts.dry_run {
        manifest_updated = remove_declaration(&ws.manifest_path(), package)?;
        if manifest_updated {
            ws.reload_manifest()?;
        }
        index.save(&index_path)?;
    }

    Ok(UninstallReport {
        package: package.to_string(),
        removal,
        manifest_updated,
    })
}

/// Remove everything `package` contributes to the workspace and drop it
/// from the index.
///
/// The index is updated even in a dry run; the caller decides whether to
/// save it.
pub fn remove_contribution(
    root: &Path,
    index: &mut WorkspaceIndex,
    package: &str,
    dry_run: bool,
) -> Result<Removal> {
    let mut removal = Removal::default();
    let owned: Vec<(String, MergePolicy)> = index
        .files_owned_by(package)
        .map(|(path, file)| (path.clone(), file.merge))
        .collect();

    for (path, merge) in owned {
        let Some(file) = index.file(&path) else {
            continue;
        };
        let others: Vec<_> = file.owners.iter().filter(|o| o.package != package).collect();
        let absolute = root.join(&path);

        let content = match merge {
            MergePolicy::Replace if others.is_empty() => None,
            MergePolicy::Replace => {
                tracing::debug!("keeping {} (shared with other packages)", path);
                continue;
            }
            MergePolicy::Deep => {
                let shared: KeySet = others.iter().flat_map(|o| o.keys.iter().cloned()).collect();
                let (overlap, mine): (KeySet, KeySet) = file
                    .owners
                    .iter()
                    .filter(|o| o.package == package)
                    .flat_map(|o| o.keys.iter().cloned())
                    .partition(|k| shared.contains(k));
                let restore = remaining_values(index, &others, &overlap, &absolute);
                strip_deep(&absolute, &mine, &restore, others.is_empty())
                    .with_context(|| format!("failed to remove `{}` from {}", package, path))?
            }
            MergePolicy::Composite => strip_composite(&absolute, package)
                .with_context(|| format!("failed to remove `{}` from {}", package, path))?,
        };

        match content {
            Some(Edit::Write(text)) => {
                if !dry_run {
                    fs::write_atomic(&absolute, text)?;
                }
                tracing::debug!("rewrote {}", path);
                removal.files_written.push(path);
            }
            Some(Edit::Unchanged) => {}
            None => {
                if !absolute.exists() {
                    continue;
                }
                if !dry_run {
                    fs::remove_file_pruning(&absolute, root)?;
                }
                tracing::debug!("removed {}", path);
                removal.files_removed.push(path);
            }
        }
    }

    index.remove_package(package);
    Ok(removal)
}

enum Edit {
    Write(String),
    Unchanged,
}

/// The remaining owners' own values for `keys`, lowest priority first.
///
/// Re-read from each owner's installed content; an owner whose source is
/// gone contributes nothing and the value already in the file stays.
fn remaining_values(
    index: &WorkspaceIndex,
    others: &[&FileOwner],
    keys: &KeySet,
    target: &Path,
) -> Vec<Value> {
    if keys.is_empty() {
        return Vec::new();
    }
    let mut owners = others.to_vec();
    owners.sort_by_key(|o| o.priority);

    let mut values = Vec::new();
    for owner in owners {
        let Some(installed) = index.packages.get(&owner.package) else {
            continue;
        };
        let wanted: KeySet = owner.keys.intersection(keys).cloned().collect();
        if wanted.is_empty() {
            continue;
        }
        for source in &owner.sources {
            let path = Path::new(&installed.path).join(source);
            let value = fs::read_to_string(&path).and_then(|text| {
                let format = DocFormat::from_path(&path).or_else(|_| DocFormat::from_path(target))?;
                format.parse(&text)
            });
            match value {
                Ok(mut value) => {
                    let drop: KeySet = tree::leaf_keys(&value)
                        .into_iter()
                        .filter(|k| !wanted.contains(k))
                        .collect();
                    tree::remove_keys(&mut value, &drop);
                    values.push(value);
                }
                Err(err) => {
                    tracing::debug!("cannot re-read {} for `{}`: {:#}", path.display(), owner.package, err);
                }
            }
        }
    }
    values
}

/// `None` means the file should be deleted.
fn strip_deep(
    absolute: &Path,
    keys: &KeySet,
    restore: &[Value],
    last_owner: bool,
) -> Result<Option<Edit>> {
    let Some(text) = fs::read_optional(absolute)? else {
        return Ok(Some(Edit::Unchanged));
    };
    let format = DocFormat::from_path(absolute)?;
    let existing = format.parse(&text)?;

    let mut doc = existing.clone();
    tree::remove_keys(&mut doc, keys);
    for value in restore {
        tree::merge(&mut doc, value, &KeySet::new());
    }
    if last_owner && tree::is_empty(&doc) {
        return Ok(None);
    }
    if doc == existing {
        return Ok(Some(Edit::Unchanged));
    }
    Ok(Some(Edit::Write(format.render(&doc)?)))
}

fn strip_composite(absolute: &Path, package: &str) -> Result<Option<Edit>> {
    let Some(text) = fs::read_optional(absolute)? else {
        return Ok(Some(Edit::Unchanged));
    };
    let mut doc = CompositeDoc::parse(&text);
    if !doc.remove(package) {
        return Ok(Some(Edit::Unchanged));
    }
    if doc.is_empty() {
        return Ok(None);
    }
    Ok(Some(Edit::Write(doc.render())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::index::IndexedPackage;
    use crate::core::platform::builtin_platforms;
    use crate::flow::{apply_flows, FlowOptions};
    use crate::test_support::{install_package, PackageFixture};
    use serde_json::json;
    use tempfile::TempDir;

    fn install(ws: &Path, index: &mut WorkspaceIndex, packages: &[(&str, &Path, i32)]) {
        let packages: Vec<_> = packages
            .iter()
            .enumerate()
            .map(|(order, (name, root, level))| install_package(name, root, *level, order))
            .collect();
        let claude: Vec<_> = builtin_platforms().into_iter().filter(|p| p.id == "claude").collect();
        let result = apply_flows(&packages, &claude, ws, index, &FlowOptions::default());
        assert!(result.errors.is_empty(), "{:?}", result.errors);
        result.apply_to_index(index);
        for package in &packages {
            index.packages.insert(
                package.name().to_string(),
                IndexedPackage {
                    key: package.id.key().to_string(),
                    version: None,
                    source: package.id.source_type(),
                    path: package.source.content_root().display().to_string(),
                },
            );
        }
    }

    fn read_json(path: std::path::PathBuf) -> serde_json::Value {
        serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap()
    }

    #[test]
    fn test_shared_key_falls_back_to_remaining_owner() {
        let tmp = TempDir::new().unwrap();
        let ws = tmp.path().join("ws");
        std::fs::create_dir_all(&ws).unwrap();
        let a = PackageFixture::new("a")
            .file("mcp.json", r#"{"setting1": "from-a", "settingA": "only-in-a"}"#)
            .write(&tmp.path().join("a"));
        let b = PackageFixture::new("b")
            .file("mcp.json", r#"{"setting1": "from-b", "settingB": "only-in-b"}"#)
            .write(&tmp.path().join("b"));

        let mut index = WorkspaceIndex::default();
        install(&ws, &mut index, &[("a", &a, 100), ("b", &b, 50)]);
        assert_eq!(read_json(ws.join(".mcp.json"))["setting1"], "from-a");

        let removal = remove_contribution(&ws, &mut index, "a", false).unwrap();
        assert_eq!(removal.files_written, vec![".mcp.json"]);
        assert_eq!(
            read_json(ws.join(".mcp.json")),
            json!({"setting1": "from-b", "settingB": "only-in-b"})
        );
        let owner = &index.file(".mcp.json").unwrap().owners[0];
        assert_eq!(owner.package, "b");
        assert!(owner.keys.contains("/setting1"));
    }

    #[test]
    fn test_identical_replace_file_survives_one_owner() {
        let tmp = TempDir::new().unwrap();
        let ws = tmp.path().join("ws");
        std::fs::create_dir_all(&ws).unwrap();
        let a = PackageFixture::new("a")
            .file("rules/common.md", "# Common")
            .write(&tmp.path().join("a"));

        let mut index = WorkspaceIndex::default();
        install(&ws, &mut index, &[("a", &a, 0)]);
        // a second package shipping the same bytes adopts the file
        let mut owners = index.file(".claude/rules/common.md").unwrap().owners.clone();
        owners[0].package = "b".to_string();
        index.update_file(".claude/rules/common.md", MergePolicy::Replace, &Default::default(), owners);

        let removal = remove_contribution(&ws, &mut index, "a", false).unwrap();
        assert!(removal.files_removed.is_empty());
        assert!(ws.join(".claude/rules/common.md").is_file());
        let owners = &index.file(".claude/rules/common.md").unwrap().owners;
        assert_eq!(owners.len(), 1);
        assert_eq!(owners[0].package, "b");
    }

    #[test]
    fn test_remove_shared_contributions() {
        let tmp = TempDir::new().unwrap();
        let ws = tmp.path().join("ws");
        std::fs::create_dir_all(&ws).unwrap();
        std::fs::write(ws.join("CLAUDE.md"), "# Notes\n").unwrap();

        let a = PackageFixture::new("a")
            .file("rules/a.md", "# A")
            .file("mcp.json", r#"{"servers": {"a": {"cmd": "a"}}, "shared": 1}"#)
            .file("AGENTS.md", "from a")
            .write(&tmp.path().join("a"));
        let b = PackageFixture::new("b")
            .file("mcp.json", r#"{"servers": {"b": {"cmd": "b"}}}"#)
            .file("AGENTS.md", "from b")
            .write(&tmp.path().join("b"));

        let mut index = WorkspaceIndex::default();
        install(&ws, &mut index, &[("a", &a, 0), ("b", &b, 0)]);

        let removal = remove_contribution(&ws, &mut index, "a", false).unwrap();
        assert_eq!(removal.files_removed, vec![".claude/rules/a.md"]);
        assert!(!ws.join(".claude/rules").exists());

        let mcp: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(ws.join(".mcp.json")).unwrap()).unwrap();
        assert_eq!(mcp, json!({"servers": {"b": {"cmd": "b"}}}));

        let claude_md = std::fs::read_to_string(ws.join("CLAUDE.md")).unwrap();
        assert!(claude_md.starts_with("# Notes"));
        assert!(!claude_md.contains("from a"));
        assert!(claude_md.contains("from b"));

        assert!(index.files_owned_by("a").next().is_none());
        assert_eq!(index.file(".mcp.json").unwrap().owners.len(), 1);
    }

    #[test]
    fn test_last_owner_deletes_merged_file() {
        let tmp = TempDir::new().unwrap();
        let ws = tmp.path().join("ws");
        std::fs::create_dir_all(&ws).unwrap();
        let a = PackageFixture::new("a")
            .file("mcp.json", r#"{"servers": {"a": {}}}"#)
            .write(&tmp.path().join("a"));

        let mut index = WorkspaceIndex::default();
        install(&ws, &mut index, &[("a", &a, 0)]);
        assert!(ws.join(".mcp.json").is_file());

        let removal = remove_contribution(&ws, &mut index, "a", false).unwrap();
        assert_eq!(removal.files_removed, vec![".mcp.json"]);
        assert!(!ws.join(".mcp.json").exists());
        assert!(index.files.is_empty());
    }

    #[test]
    fn test_user_keys_survive_removal() {
        let tmp = TempDir::new().unwrap();
        let ws = tmp.path().join("ws");
        std::fs::create_dir_all(&ws).unwrap();
        std::fs::write(ws.join(".mcp.json"), r#"{"mine": true}"#).unwrap();
        let a = PackageFixture::new("a")
            .file("mcp.json", r#"{"servers": {"a": {}}}"#)
            .write(&tmp.path().join("a"));

        let mut index = WorkspaceIndex::default();
        install(&ws, &mut index, &[("a", &a, 0)]);
        remove_contribution(&ws, &mut index, "a", false).unwrap();

        let mcp: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(ws.join(".mcp.json")).unwrap()).unwrap();
        assert_eq!(mcp, json!({"mine": true}));
    }

    #[test]
    fn test_uninstall_unknown_package() {
        let tmp = TempDir::new().unwrap();
        let mut ws = Workspace::new(tmp.path()).unwrap();
        let err = uninstall(&mut ws, "ghost", &UninstallOptions::default()).unwrap_err();
        assert!(err.downcast_ref::<PackageNotInstalledError>().is_some());
    }

    #[test]
    fn test_uninstall_updates_manifest_and_index() {
        let tmp = TempDir::new().unwrap();
        let pack = PackageFixture::new("a")
            .file("rules/a.md", "# A")
            .write(&tmp.path().join("packs/a"));
        PackageFixture::new("root")
            .path_dep("a", "packs/a")
            .write(tmp.path());

        let mut ws = Workspace::new(tmp.path()).unwrap();
        let mut index = WorkspaceIndex::default();
        install(ws.root(), &mut index, &[("a", &pack, 0)]);
        index.save(&ws.index_path()).unwrap();

        let report = uninstall(&mut ws, "a", &UninstallOptions::default()).unwrap();
        assert!(report.manifest_updated);
        assert_eq!(report.removal.files_removed, vec![".claude/rules/a.md"]);
        assert!(ws.manifest().unwrap().dependencies().is_empty());
        assert!(WorkspaceIndex::load(&ws.index_path()).unwrap().files.is_empty());
    }
}
