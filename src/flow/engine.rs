//! Flow execution.
//!
//! Applies every enabled platform's export flows for a set of resolved
//! packages against one workspace. Work happens in two passes:
//!
//! 1. collect: match each package's files against the flows and compute
//!    target paths, grouping contributions by target
//! 2. apply: for each target, merge all contributions with the target's
//!    policy, settle collisions, and write only what changed
//!
//! Failures are recorded per flow and never stop the remaining flows.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use anyhow::Result;
use serde::Serialize;

use crate::core::errors::StowageError;
use crate::core::index::{FileOwner, WorkspaceIndex};
use crate::core::package::{InstallPackage, Priority};
use crate::core::platform::PlatformDefinition;
use crate::flow::composite::CompositeDoc;
use crate::flow::conflict::{Claim, ConflictResolver, FlowConflict};
use crate::flow::format::DocFormat;
use crate::flow::model::{Flow, MergePolicy};
use crate::flow::pattern::{render, PathPattern, PatternVars};
use crate::flow::tree::{self, KeySet};
use crate::util::fs;

/// Engine switches.
#[derive(Debug, Clone, Copy, Default)]
pub struct FlowOptions {
    /// Plan and report only; touch nothing on disk
    pub dry_run: bool,
    /// Overwrite unowned files that differ instead of relocating
    pub force: bool,
}

/// One failed flow application.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowError {
    /// `<platform>: <from> -> <to>`
    pub flow: String,
    pub source_path: String,
    /// Error class: `not-found`, `validation` or `io`
    pub error: String,
    pub message: String,
    #[serde(skip)]
    pub package: String,
}

impl FlowError {
    fn new(flow: &str, package: &str, source_path: &str, err: &anyhow::Error) -> Self {
        let class = match err.downcast_ref::<StowageError>() {
            Some(StowageError::NotFound { .. }) => "not-found",
            Some(StowageError::Validation { .. }) => "validation",
            None => "io",
        };
        FlowError {
            flow: flow.to_string(),
            source_path: source_path.to_string(),
            error: class.to_string(),
            message: format!("{:#}", err),
            package: package.to_string(),
        }
    }
}

/// A file moved away from the path its flow asked for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RelocatedFile {
    pub package: String,
    pub from: String,
    pub to: String,
}

/// Ownership produced for one target file.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnedFile {
    pub merge: MergePolicy,
    pub owners: Vec<FileOwner>,
    /// Packages whose previous ownership of this file is superseded
    #[serde(skip)]
    pub released: BTreeSet<String>,
}

/// Everything one flow application did (or would do, in a dry run).
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowResult {
    /// Files whose content changed
    pub files_written: Vec<String>,
    /// Files deleted because nobody produces them anymore
    pub files_removed: Vec<String>,
    /// Source files matched by a flow
    pub files_processed: usize,
    pub conflicts: Vec<FlowConflict>,
    pub errors: Vec<FlowError>,
    /// Every file this run's packages now contribute to
    pub target_paths: Vec<String>,
    /// Per target file, who contributed what
    pub file_mapping: BTreeMap<String, OwnedFile>,
    pub relocated_files: Vec<RelocatedFile>,
}

impl FlowResult {
    /// Fold this result's ownership changes into the workspace index.
    pub fn apply_to_index(&self, index: &mut WorkspaceIndex) {
        for (path, owned) in &self.file_mapping {
            index.update_file(path, owned.merge, &owned.released, owned.owners.clone());
        }
    }

    /// Whether any flow failed for `package`.
    pub fn has_errors_for(&self, package: &str) -> bool {
        self.errors.iter().any(|e| e.package == package)
    }
}

/// A single source file headed for a target.
#[derive(Debug, Clone)]
struct Contribution {
    package: String,
    priority: Priority,
    merge: MergePolicy,
    source: PathBuf,
    source_rel: String,
    flow: String,
}

/// Apply export flows for `packages` into `target_dir`.
pub fn apply_flows(
    packages: &[InstallPackage],
    platforms: &[PlatformDefinition],
    target_dir: &Path,
    index: &WorkspaceIndex,
    options: &FlowOptions,
) -> FlowResult {
    let mut engine = FlowEngine::new(packages, target_dir, index, options);
    let contributions = engine.collect(packages, platforms);
    engine.apply(contributions);
    engine.finish()
}

struct FlowEngine<'a> {
    root: &'a Path,
    index: &'a WorkspaceIndex,
    options: &'a FlowOptions,
    run_packages: BTreeSet<String>,
    priorities: HashMap<String, Priority>,
    /// Packages that failed before producing any contribution
    incomplete: BTreeSet<String>,
    result: FlowResult,
}

impl<'a> FlowEngine<'a> {
    fn new(
        packages: &[InstallPackage],
        root: &'a Path,
        index: &'a WorkspaceIndex,
        options: &'a FlowOptions,
    ) -> Self {
        FlowEngine {
            root,
            index,
            options,
            run_packages: packages.iter().map(|p| p.name().to_string()).collect(),
            priorities: packages
                .iter()
                .map(|p| (p.name().to_string(), p.priority))
                .collect(),
            incomplete: BTreeSet::new(),
            result: FlowResult::default(),
        }
    }

    fn fail(&mut self, flow: &str, package: &str, source: &str, err: anyhow::Error) {
        tracing::warn!("{}: {}: {:#}", package, flow, err);
        self.result
            .errors
            .push(FlowError::new(flow, package, source, &err));
    }

    // ---- pass 1 ---------------------------------------------------------

    fn collect(
        &mut self,
        packages: &[InstallPackage],
        platforms: &[PlatformDefinition],
    ) -> BTreeMap<String, Vec<Contribution>> {
        let mut by_target: BTreeMap<String, Vec<Contribution>> = BTreeMap::new();

        for package in packages {
            let name = package.name();
            let files = match self.package_files(package) {
                Ok(files) => files,
                Err(err) => {
                    let root = package.source.content_root().display().to_string();
                    self.fail("walk", name, &root, err);
                    self.incomplete.insert(name.to_string());
                    continue;
                }
            };

            for platform in platforms {
                let vars = PatternVars {
                    root_dir: &platform.root_dir,
                    root_file: platform.root_file.as_deref(),
                    name,
                    version: package.source.version.as_deref(),
                    priority: package.priority.level,
                };

                // a source file is taken by the first flow that matches it
                let mut claimed: BTreeSet<&str> = BTreeSet::new();
                for flow in &platform.export {
                    let label = format!("{}: {}", platform.id, flow.label());
                    if let Some(condition) = &flow.condition {
                        if !condition.holds(self.root) {
                            tracing::debug!("skipping {} (condition not met)", label);
                            continue;
                        }
                    }

                    let (pattern, target) = match compile_flow(flow, &vars) {
                        Ok(compiled) => compiled,
                        Err(err) => {
                            self.fail(&label, name, "", err.into());
                            self.incomplete.insert(name.to_string());
                            continue;
                        }
                    };

                    for file in &files {
                        if claimed.contains(file.as_str()) {
                            continue;
                        }
                        let Some(captures) = pattern.captures(file) else {
                            continue;
                        };
                        claimed.insert(file);
                        self.result.files_processed += 1;

                        match render(&target, &captures) {
                            Ok(target_path) => {
                                by_target.entry(target_path).or_default().push(Contribution {
                                    package: name.to_string(),
                                    priority: package.priority,
                                    merge: flow.merge,
                                    source: package.source.content_root().join(file),
                                    source_rel: file.clone(),
                                    flow: label.clone(),
                                });
                            }
                            Err(err) => {
                                self.fail(&label, name, file, err.into());
                                self.incomplete.insert(name.to_string());
                            }
                        }
                    }
                }
            }
        }

        by_target
    }

    fn package_files(&self, package: &InstallPackage) -> Result<Vec<String>> {
        let mut files = Vec::new();
        for file in fs::walk_files(package.source.content_root())? {
            if fs::matches_any(&file, &package.include)? {
                files.push(file);
            }
        }
        Ok(files)
    }

    // ---- pass 2 ---------------------------------------------------------

    fn apply(&mut self, mut by_target: BTreeMap<String, Vec<Contribution>>) {
        // files this run's packages owned before but no longer produce
        let mut stale: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for (path, file) in &self.index.files {
            for owner in &file.owners {
                let still_produced = by_target
                    .get(path)
                    .is_some_and(|c| c.iter().any(|c| c.package == owner.package));
                if self.run_packages.contains(&owner.package)
                    && !self.incomplete.contains(&owner.package)
                    && !still_produced
                {
                    stale
                        .entry(path.clone())
                        .or_default()
                        .insert(owner.package.clone());
                }
            }
        }

        let targets: BTreeSet<String> = by_target.keys().chain(stale.keys()).cloned().collect();
        let run_packages = self.run_packages.clone();
        let mut resolver =
            ConflictResolver::new(self.index, self.root, &run_packages, self.options.force);

        for path in targets {
            let mut contributions = by_target.remove(&path).unwrap_or_default();
            let stale = stale.remove(&path).unwrap_or_default();

            contributions.sort_by(|a, b| b.priority.cmp(&a.priority));
            let policy = match contributions.first() {
                Some(top) => top.merge,
                None => match self.index.file(&path) {
                    Some(file) => file.merge,
                    None => continue,
                },
            };
            let (contributions, mismatched): (Vec<_>, Vec<_>) =
                contributions.into_iter().partition(|c| c.merge == policy);
            for c in mismatched {
                let err = StowageError::validation(
                    format!("target `{}`", path),
                    format!("`{}` uses merge policy {}, another flow uses {}", c.package, c.merge, policy),
                );
                self.fail(&c.flow, &c.package, &c.source_rel, err.into());
            }

            match policy {
                MergePolicy::Replace => self.apply_replace(&path, contributions, stale, &mut resolver),
                MergePolicy::Deep => self.apply_deep(&path, contributions, stale),
                MergePolicy::Composite => self.apply_composite(&path, contributions, stale),
            }
        }
    }

    fn apply_replace(
        &mut self,
        path: &str,
        contributions: Vec<Contribution>,
        stale: BTreeSet<String>,
        resolver: &mut ConflictResolver<'_>,
    ) {
        let mut loaded = Vec::new();
        for c in contributions {
            match std::fs::read(&c.source) {
                Ok(content) => loaded.push((c, content)),
                Err(err) => {
                    let err = anyhow::Error::new(err)
                        .context(format!("failed to read {}", c.source.display()));
                    self.fail(&c.flow, &c.package, &c.source_rel, err);
                }
            }
        }

        let mut released = stale.clone();
        released.extend(loaded.iter().map(|(c, _)| c.package.clone()));

        if loaded.is_empty() {
            self.release_stale(path, MergePolicy::Replace, released);
            return;
        }

        let claims: Vec<Claim<'_>> = loaded
            .iter()
            .map(|(c, content)| Claim {
                package: &c.package,
                priority: c.priority,
                content,
            })
            .collect();
        let resolution = resolver.resolve(path, &claims);
        if let Some(conflict) = resolution.conflict {
            tracing::warn!("conflict at {}: {}", conflict.path, conflict.resolution);
            self.result.conflicts.push(conflict);
        }

        // the requested path is released by everyone; placements re-add owners
        self.mapping(path, MergePolicy::Replace).released.extend(released);

        for placement in resolution.placements {
            let Some((c, content)) = loaded.iter().find(|(c, _)| c.package == placement.package)
            else {
                continue;
            };
            if let Err(err) = self.write_if_changed(&placement.path, content) {
                self.fail(&c.flow, &c.package, &c.source_rel, err);
                continue;
            }
            if let Some(from) = &placement.relocated_from {
                self.result.relocated_files.push(RelocatedFile {
                    package: placement.package.clone(),
                    from: from.clone(),
                    to: placement.path.clone(),
                });
            }
            self.result.target_paths.push(placement.path.clone());
            let owned = self.mapping(&placement.path, MergePolicy::Replace);
            owned.released.insert(placement.package.clone());
            owned.owners.push(FileOwner {
                package: placement.package.clone(),
                priority: c.priority.level,
                keys: BTreeSet::new(),
                sources: BTreeSet::new(),
            });
        }
    }

    /// Drop ownership of a file nobody in this run produces anymore,
    /// deleting it when no one else owns it either.
    fn release_stale(&mut self, path: &str, merge: MergePolicy, released: BTreeSet<String>) {
        let sole_owners = self
            .index
            .file(path)
            .is_some_and(|f| f.owners.iter().all(|o| released.contains(&o.package)));
        if sole_owners {
            match self.remove_file(path) {
                Ok(()) => tracing::info!("removed stale file {}", path),
                Err(err) => self.fail("cleanup", "", path, err),
            }
        }
        self.mapping(path, merge).released.extend(released);
    }

    fn apply_deep(&mut self, path: &str, contributions: Vec<Contribution>, stale: BTreeSet<String>) {
        let format = match DocFormat::from_path(Path::new(path)) {
            Ok(format) => format,
            Err(err) => {
                for c in &contributions {
                    let err = StowageError::validation(format!("target `{}`", path), err.to_string());
                    self.fail(&c.flow, &c.package, &c.source_rel, err.into());
                }
                return;
            }
        };

        let existing_text = match fs::read_optional(&self.root.join(path)) {
            Ok(text) => text,
            Err(err) => {
                self.fail_all(&contributions, err);
                return;
            }
        };
        let existing = match format.parse(existing_text.as_deref().unwrap_or_default()) {
            Ok(doc) => doc,
            Err(err) => {
                let err = err.context(format!("existing {} cannot be merged into", path));
                self.fail_all(&contributions, err);
                return;
            }
        };

        let mut parsed = Vec::new();
        for c in contributions {
            let source_format = DocFormat::from_path(&c.source).unwrap_or(format);
            let value = fs::read_to_string(&c.source).and_then(|text| {
                source_format
                    .parse(&text)
                    .map_err(|e| e.context(format!("failed to parse {}", c.source.display())))
            });
            match value {
                Ok(value) => parsed.push((c, value)),
                Err(err) => self.fail(&c.flow, &c.package, &c.source_rel, err),
            }
        }

        let mut released = stale;
        released.extend(parsed.iter().map(|(c, _)| c.package.clone()));

        // keys only the released packages own are stripped before re-merging
        let index = self.index;
        let previous = index.file(path).map(|f| f.owners.as_slice()).unwrap_or_default();
        let others: Vec<&FileOwner> = previous
            .iter()
            .filter(|o| !released.contains(&o.package))
            .collect();
        let shared: KeySet = others.iter().flat_map(|o| o.keys.iter().cloned()).collect();
        let strip: KeySet = previous
            .iter()
            .filter(|o| released.contains(&o.package))
            .flat_map(|o| o.keys.iter().cloned())
            .filter(|k| !shared.contains(k))
            .collect();

        let mut doc = existing.clone();
        tree::remove_keys(&mut doc, &strip);
        let base = doc.clone();

        // ascending priority: the highest-priority value is merged last
        parsed.sort_by(|a, b| a.0.priority.cmp(&b.0.priority));
        let mut owners: BTreeMap<String, FileOwner> = BTreeMap::new();
        for (c, value) in &parsed {
            let protected: KeySet = others
                .iter()
                .filter(|o| o.priority > c.priority.level)
                .flat_map(|o| o.keys.iter().cloned())
                .collect();
            tree::merge(&mut doc, value, &protected);

            let keys = tree::leaf_keys(value)
                .into_iter()
                .filter(|k| !(k.contains("[]") && tree::contains_key(&base, k)));
            let owner = owners.entry(c.package.clone()).or_insert_with(|| FileOwner {
                package: c.package.clone(),
                priority: c.priority.level,
                keys: BTreeSet::new(),
                sources: BTreeSet::new(),
            });
            owner.keys.extend(keys);
            owner.sources.insert(c.source_rel.clone());
        }

        let outcome = if tree::is_empty(&doc) && others.is_empty() && owners.is_empty() {
            if existing_text.is_some() {
                self.remove_file(path)
            } else {
                Ok(())
            }
        } else if existing_text.is_some() && doc == existing {
            Ok(())
        } else {
            format
                .render(&doc)
                .and_then(|text| self.write_if_changed(path, text.as_bytes()))
        };
        if let Err(err) = outcome {
            let flow = parsed.first().map(|(c, _)| c.flow.clone()).unwrap_or_default();
            self.fail(&flow, "", path, err);
            return;
        }

        if !owners.is_empty() {
            self.result.target_paths.push(path.to_string());
        }
        let owned = self.mapping(path, MergePolicy::Deep);
        owned.released.extend(released);
        owned.owners.extend(owners.into_values());
    }

    fn apply_composite(
        &mut self,
        path: &str,
        contributions: Vec<Contribution>,
        stale: BTreeSet<String>,
    ) {
        let existing_text = match fs::read_optional(&self.root.join(path)) {
            Ok(text) => text,
            Err(err) => {
                self.fail_all(&contributions, err);
                return;
            }
        };
        let mut doc = CompositeDoc::parse(existing_text.as_deref().unwrap_or_default());

        let mut bodies: BTreeMap<String, (Priority, String)> = BTreeMap::new();
        for c in &contributions {
            match fs::read_to_string(&c.source) {
                Ok(text) => {
                    let entry = bodies
                        .entry(c.package.clone())
                        .or_insert_with(|| (c.priority, String::new()));
                    if !entry.1.is_empty() {
                        entry.1.push_str("\n\n");
                    }
                    entry.1.push_str(text.trim_end());
                }
                Err(err) => self.fail(&c.flow, &c.package, &c.source_rel, err),
            }
        }

        let mut released = stale;
        released.extend(bodies.keys().cloned());
        for package in &released {
            doc.remove(package);
        }
        for (package, (_, body)) in &bodies {
            doc.upsert(package, body);
        }

        let index = self.index;
        let index_priority: HashMap<&str, i32> = index
            .file(path)
            .map(|f| f.owners.iter().map(|o| (o.package.as_str(), o.priority)).collect())
            .unwrap_or_default();
        let priorities = &self.priorities;
        doc.sort_blocks_by_key(|name| {
            let level = priorities
                .get(name)
                .map(|p| p.level)
                .or_else(|| index_priority.get(name).copied())
                .unwrap_or(0);
            (std::cmp::Reverse(level), name.to_string())
        });

        let outcome = if doc.is_empty() {
            if existing_text.is_some() {
                self.remove_file(path)
            } else {
                Ok(())
            }
        } else {
            self.write_if_changed(path, doc.render().as_bytes())
        };
        if let Err(err) = outcome {
            let flow = contributions.first().map(|c| c.flow.clone()).unwrap_or_default();
            self.fail(&flow, "", path, err);
            return;
        }

        if !bodies.is_empty() {
            self.result.target_paths.push(path.to_string());
        }
        let owned = self.mapping(path, MergePolicy::Composite);
        owned.released.extend(released);
        owned.owners.extend(bodies.into_iter().map(|(package, (priority, _))| FileOwner {
            package,
            priority: priority.level,
            keys: BTreeSet::new(),
            sources: BTreeSet::new(),
        }));
    }

    // ---- helpers --------------------------------------------------------

    fn fail_all(&mut self, contributions: &[Contribution], err: anyhow::Error) {
        for c in contributions {
            self.fail(&c.flow, &c.package, &c.source_rel, anyhow::anyhow!("{:#}", err));
        }
    }

    fn mapping(&mut self, path: &str, merge: MergePolicy) -> &mut OwnedFile {
        self.result
            .file_mapping
            .entry(path.to_string())
            .or_insert_with(|| OwnedFile {
                merge,
                owners: Vec::new(),
                released: BTreeSet::new(),
            })
    }

    fn write_if_changed(&mut self, path: &str, content: &[u8]) -> Result<()> {
        let absolute = self.root.join(path);
        if std::fs::read(&absolute).is_ok_and(|existing| existing == content) {
            return Ok(());
        }
        if !self.options.dry_run {
            fs::write_atomic(&absolute, content)?;
        }
        tracing::debug!("wrote {}", path);
        self.result.files_written.push(path.to_string());
        Ok(())
    }

    fn remove_file(&mut self, path: &str) -> Result<()> {
        let absolute = self.root.join(path);
        if !absolute.exists() {
            return Ok(());
        }
        if !self.options.dry_run {
            fs::remove_file_pruning(&absolute, self.root)?;
        }
        self.result.files_removed.push(path.to_string());
        Ok(())
    }

    fn finish(mut self) -> FlowResult {
        self.result.target_paths.sort();
        self.result.target_paths.dedup();
        self.result
    }
}

/// Substitute variables and compile a flow's source pattern.
fn compile_flow(flow: &Flow, vars: &PatternVars<'_>) -> Result<(PathPattern, String), StowageError> {
    let from = vars.substitute(&flow.from)?;
    let to = vars.substitute(&flow.to)?;
    Ok((PathPattern::compile(&from)?, to))
}
