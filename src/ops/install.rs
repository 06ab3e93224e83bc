//! Implementation of `stowage install`.
//!
//! Sequences one run: select platforms, resolve, apply flows, persist the
//! workspace index, report. With a package spec only that package (and what
//! it pulls in) is installed and the declaration is added to `Stowage.toml`;
//! without one, every top-level declaration of the root manifest gets its
//! own installation context. Contexts are applied together in a single flow
//! pass against the same index, so collision checks never race and priority
//! decides every collision.

use std::collections::BTreeSet;
use std::path::PathBuf;

use anyhow::Result;
use serde::Serialize;

use crate::core::dependency::Declaration;
use crate::core::errors::StowageError;
use crate::core::index::{IndexedPackage, WorkspaceIndex};
use crate::core::package::InstallPackage;
use crate::core::platform::{known_platforms, select_platforms, PlatformDefinition};
use crate::core::Workspace;
use crate::flow::{apply_flows, FlowConflict, FlowError, FlowOptions, FlowResult, RelocatedFile};
use crate::ops::manifest_edit::add_declaration;
use crate::ops::resolve::{resolve_options, root_manifest, source_resolver};
use crate::ops::uninstall::remove_contribution;
use crate::resolver::{ResolvedGraph, WaveResolver};
use crate::sources::SourceResolver;
use crate::util::diagnostic::InstallFailedError;
use crate::util::GlobalContext;

/// Options for `stowage install`.
#[derive(Debug, Clone, Default)]
pub struct InstallOptions {
    /// Package to add and install; `None` installs the whole manifest
    pub spec: Option<String>,
    /// Platform ids; empty means configured or detected
    pub platforms: Vec<String>,
    pub include_dev: bool,
    pub jobs: Option<usize>,
    pub fail_fast: bool,
    pub force: bool,
    pub dry_run: bool,
}

/// How the run was started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InstallMode {
    /// One package named on the command line
    Single,
    /// Everything the root manifest declares
    Bulk,
}

/// One unit of installation work.
#[derive(Debug, Clone)]
pub struct InstallationContext {
    /// What was asked for (the spec or the top-level declaration)
    pub source: String,
    pub mode: InstallMode,
    pub target_dir: PathBuf,
    pub packages: Vec<InstallPackage>,
    /// Declarations under this context that did not resolve
    pub warnings: Vec<String>,
}

/// A package recorded by this run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstalledPackage {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    pub key: String,
}

/// Everything an install did, for human or JSON reporting.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallReport {
    pub mode: InstallMode,
    pub dry_run: bool,
    pub platforms: Vec<String>,
    pub packages: Vec<InstalledPackage>,
    pub files_written: Vec<String>,
    pub files_removed: Vec<String>,
    pub files_processed: usize,
    pub conflicts: Vec<FlowConflict>,
    pub errors: Vec<FlowError>,
    pub relocated_files: Vec<RelocatedFile>,
    pub warnings: Vec<String>,
    /// Previously installed packages no longer declared and now removed
    pub removed_packages: Vec<String>,
}

impl InstallReport {
    fn new(mode: InstallMode, dry_run: bool, platforms: &[PlatformDefinition]) -> Self {
        InstallReport {
            mode,
            dry_run,
            platforms: platforms.iter().map(|p| p.id.clone()).collect(),
            packages: Vec::new(),
            files_written: Vec::new(),
            files_removed: Vec::new(),
            files_processed: 0,
            conflicts: Vec::new(),
            errors: Vec::new(),
            relocated_files: Vec::new(),
            warnings: Vec::new(),
            removed_packages: Vec::new(),
        }
    }

    fn absorb(&mut self, result: FlowResult) {
        self.files_written.extend(result.files_written);
        self.files_removed.extend(result.files_removed);
        self.files_processed += result.files_processed;
        self.conflicts.extend(result.conflicts);
        self.errors.extend(result.errors);
        self.relocated_files.extend(result.relocated_files);
    }
}

/// Install into the workspace with the default source collaborators.
pub fn install(ctx: &GlobalContext, ws: &mut Workspace, opts: &InstallOptions) -> Result<InstallReport> {
    install_with(&source_resolver(ctx), ctx, ws, opts)
}

/// Install using the given source resolver.
pub fn install_with(
    sources: &SourceResolver,
    ctx: &GlobalContext,
    ws: &mut Workspace,
    opts: &InstallOptions,
) -> Result<InstallReport> {
    let platforms = platforms_for(ctx, ws, opts)?;
    tracing::info!(
        "Installing into {} ({})",
        ws.root().display(),
        platforms.iter().map(|p| p.id.as_str()).collect::<Vec<_>>().join(", ")
    );

    let index_path = ws.index_path();
    let mut index = WorkspaceIndex::load(&index_path)?;
    let resolver = WaveResolver::new(
        sources,
        resolve_options(ctx, opts.include_dev, opts.jobs, opts.fail_fast),
    );

    let (mode, graph, contexts) = match &opts.spec {
        Some(spec) => {
            let decl = Declaration::parse_cli(spec, &ws.manifest_path())?;
            let graph = resolver.resolve(vec![decl.clone()])?;
            if graph.roots().is_empty() {
                return Err(root_failure(&graph, spec));
            }
            let context = context_for(&graph, 0, spec.clone(), InstallMode::Single, ws);
            if !opts.dry_run {
                add_declaration(&ws.manifest_path(), &decl)?;
                ws.reload_manifest()?;
            }
            (InstallMode::Single, graph, vec![context])
        }
        None => {
            let manifest = root_manifest(ws)?;
            let graph = resolver.resolve_manifest(manifest)?;
            let declared: Vec<String> = manifest
                .dependencies()
                .iter()
                .chain(manifest.dev_dependencies())
                .map(|d| d.name().to_string())
                .collect();
            let contexts = (0..graph.root_keys.len())
                .map(|root| {
                    let source = declared.get(root).cloned().unwrap_or_default();
                    context_for(&graph, root, source, InstallMode::Bulk, ws)
                })
                .filter(|c| !c.packages.is_empty() || !c.warnings.is_empty())
                .collect::<Vec<_>>();
            (InstallMode::Bulk, graph, contexts)
        }
    };

    let mut report = InstallReport::new(mode, opts.dry_run, &platforms);
    report.warnings.extend(graph.warnings.iter().cloned());
    for name in &graph.cancelled {
        report.warnings.push(format!("`{}` was not resolved (fail-fast)", name));
    }

    let flow_options = FlowOptions {
        dry_run: opts.dry_run,
        force: opts.force,
    };
    // every context targets the workspace root, so all of them go through one
    // flow application: collisions are settled by priority across the whole
    // run, never by which declaration came first
    let mut run_packages = Vec::new();
    for context in &contexts {
        report.warnings.extend(context.warnings.iter().cloned());
        if context.packages.is_empty() {
            continue;
        }
        tracing::info!("Planning flows for {}", context.source);
        run_packages.extend(context.packages.iter().cloned());
    }

    if !run_packages.is_empty() {
        let result = apply_flows(&run_packages, &platforms, ws.root(), &index, &flow_options);
        result.apply_to_index(&mut index);

        for package in &run_packages {
            index.packages.insert(
                package.name().to_string(),
                IndexedPackage {
                    key: package.id.key().to_string(),
                    version: package.source.version.clone(),
                    source: package.id.source_type(),
                    path: package.source.content_root().display().to_string(),
                },
            );
            report.packages.push(InstalledPackage {
                name: package.name().to_string(),
                version: package.source.version.clone(),
                key: package.id.key().to_string(),
            });
        }
        report.absorb(result);
    }

    // packages dropped from the manifest; only safe when the graph is complete
    if mode == InstallMode::Bulk && graph.missing.is_empty() && graph.cancelled.is_empty() {
        let current: BTreeSet<&str> = graph.nodes.iter().map(|n| n.name.as_str()).collect();
        let orphans: Vec<String> = index
            .packages
            .keys()
            .filter(|name| !current.contains(name.as_str()))
            .cloned()
            .collect();
        for orphan in orphans {
            tracing::info!("Removing {} (no longer declared)", orphan);
            let removal = remove_contribution(ws.root(), &mut index, &orphan, opts.dry_run)?;
            report.files_written.extend(removal.files_written);
            report.files_removed.extend(removal.files_removed);
            report.removed_packages.push(orphan);
        }
    }

    for warning in &report.warnings {
        tracing::warn!("{}", warning);
    }

    let failed = report.files_written.is_empty() && !report.errors.is_empty();
    // removals already happened on disk; the index has to agree even on failure
    if !opts.dry_run && (!failed || !report.files_removed.is_empty()) {
        index.save(&index_path)?;
    }
    if failed {
        return Err(InstallFailedError {
            errors: report.errors.len(),
            first: report.errors.first().map(|e| format!("{}: {}", e.flow, e.message)),
        }
        .into());
    }
    Ok(report)
}

fn platforms_for(
    ctx: &GlobalContext,
    ws: &Workspace,
    opts: &InstallOptions,
) -> Result<Vec<PlatformDefinition>> {
    let known = known_platforms(&ctx.config().platforms);
    let selected = if opts.platforms.is_empty() {
        &ctx.config().install.platforms
    } else {
        &opts.platforms
    };
    let platforms = select_platforms(&known, selected, ws.root())?;
    if platforms.is_empty() {
        anyhow::bail!("no platforms enabled; pass --platform or configure [install] platforms");
    }
    Ok(platforms)
}

fn context_for(
    graph: &ResolvedGraph,
    root: usize,
    source: String,
    mode: InstallMode,
    ws: &Workspace,
) -> InstallationContext {
    InstallationContext {
        source,
        mode,
        target_dir: ws.root().to_path_buf(),
        packages: graph.install_packages_for_root(root),
        warnings: graph
            .missing_for_root(root)
            .map(|m| {
                format!(
                    "could not resolve `{}` (declared in {}): {}",
                    m.name,
                    m.declared_in.display(),
                    m.reason
                )
            })
            .collect(),
    }
}

/// The error for a single-package install whose package did not resolve.
fn root_failure(graph: &ResolvedGraph, spec: &str) -> anyhow::Error {
    match graph.missing_for_root(0).next() {
        Some(missing) if missing.not_found => anyhow::anyhow!("{}", missing.reason).context(
            StowageError::not_found("package", spec).declared_in(&missing.declared_in),
        ),
        Some(missing) => anyhow::anyhow!("failed to install `{}`: {}", spec, missing.reason),
        None => anyhow::anyhow!("failed to install `{}`: resolution was cancelled", spec),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{test_sources, MockCloner, MockRegistry, PackageFixture};
    use serde_json::json;
    use tempfile::TempDir;

    struct Fixture {
        _tmp: TempDir,
        ws: Workspace,
        ctx: GlobalContext,
        sources: SourceResolver,
    }

    fn fixture(setup: impl FnOnce(&std::path::Path)) -> Fixture {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("ws");
        std::fs::create_dir_all(&root).unwrap();
        setup(&root);
        let ws = Workspace::new(&root).unwrap();
        let ctx = GlobalContext::with_cwd(ws.root().to_path_buf())
            .unwrap()
            .with_config(Default::default());
        let sources = test_sources(tmp.path(), MockCloner::new(), MockRegistry::new());
        Fixture {
            _tmp: tmp,
            ws,
            ctx,
            sources,
        }
    }

    fn run(f: &mut Fixture, opts: InstallOptions) -> Result<InstallReport> {
        install_with(&f.sources, &f.ctx, &mut f.ws, &opts)
    }

    fn read_json(path: std::path::PathBuf) -> serde_json::Value {
        serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap()
    }

    #[test]
    fn test_bulk_install_and_idempotence() {
        let mut f = fixture(|root| {
            PackageFixture::new("ws")
                .path_dep("a", "packs/a")
                .write(root);
            PackageFixture::new("a")
                .path_dep("b", "../b")
                .file("rules/style.md", "# Style")
                .write(&root.join("packs/a"));
            PackageFixture::new("b")
                .file("commands/go.md", "# Go")
                .write(&root.join("packs/b"));
        });

        let report = run(&mut f, InstallOptions::default()).unwrap();
        assert_eq!(report.mode, InstallMode::Bulk);
        assert_eq!(report.platforms, vec!["claude"]);
        assert_eq!(
            report.files_written,
            vec![".claude/commands/go.md", ".claude/rules/style.md"]
        );
        let names: Vec<_> = report.packages.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);

        let index_before = std::fs::read_to_string(f.ws.index_path()).unwrap();
        let again = run(&mut f, InstallOptions::default()).unwrap();
        assert!(again.files_written.is_empty());
        assert_eq!(std::fs::read_to_string(f.ws.index_path()).unwrap(), index_before);
    }

    #[test]
    fn test_priority_merge_end_to_end() {
        let mut f = fixture(|root| {
            PackageFixture::new("ws")
                .path_dep("a", "packs/a")
                .path_dep("b", "packs/b")
                .write(root);
            PackageFixture::new("a")
                .priority(100)
                .file("mcp.json", r#"{"setting1": "from-a", "settingA": "only-in-a"}"#)
                .write(&root.join("packs/a"));
            PackageFixture::new("b")
                .priority(50)
                .file("mcp.json", r#"{"setting1": "from-b", "settingB": "only-in-b"}"#)
                .write(&root.join("packs/b"));
        });

        run(&mut f, InstallOptions::default()).unwrap();
        assert_eq!(
            read_json(f.ws.root().join(".mcp.json")),
            json!({"setting1": "from-a", "settingA": "only-in-a", "settingB": "only-in-b"})
        );
    }

    #[test]
    fn test_single_install_adds_declaration() {
        let mut f = fixture(|root| {
            PackageFixture::new("extra")
                .file("rules/x.md", "# X")
                .write(&root.join("vendor/extra"));
        });

        let opts = InstallOptions {
            spec: Some("./vendor/extra".to_string()),
            ..Default::default()
        };
        let report = run(&mut f, opts).unwrap();
        assert_eq!(report.mode, InstallMode::Single);
        assert_eq!(report.files_written, vec![".claude/rules/x.md"]);

        let manifest = f.ws.manifest().unwrap();
        assert_eq!(manifest.dependencies()[0].name(), "extra");
        let index = WorkspaceIndex::load(&f.ws.index_path()).unwrap();
        assert!(index.packages.contains_key("extra"));
    }

    #[test]
    fn test_single_install_missing_package() {
        let mut f = fixture(|_| {});
        let opts = InstallOptions {
            spec: Some("./nowhere".to_string()),
            ..Default::default()
        };
        let err = run(&mut f, opts).unwrap_err();
        assert!(StowageError::is_not_found(&err));
        assert!(f.ws.manifest().is_none());
    }

    #[test]
    fn test_dry_run_touches_nothing() {
        let mut f = fixture(|root| {
            PackageFixture::new("ws").path_dep("a", "packs/a").write(root);
            PackageFixture::new("a")
                .file("rules/a.md", "# A")
                .write(&root.join("packs/a"));
        });

        let report = run(
            &mut f,
            InstallOptions {
                dry_run: true,
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(report.files_written, vec![".claude/rules/a.md"]);
        assert!(!f.ws.root().join(".claude").exists());
        assert!(!f.ws.index_path().exists());
    }

    #[test]
    fn test_missing_dependency_is_a_warning() {
        let mut f = fixture(|root| {
            PackageFixture::new("ws")
                .path_dep("ghost", "packs/ghost")
                .path_dep("a", "packs/a")
                .write(root);
            PackageFixture::new("a")
                .file("rules/a.md", "# A")
                .write(&root.join("packs/a"));
        });

        let report = run(&mut f, InstallOptions::default()).unwrap();
        assert_eq!(report.files_written, vec![".claude/rules/a.md"]);
        assert!(report.warnings.iter().any(|w| w.contains("ghost")));
    }

    #[test]
    fn test_undeclared_package_is_removed() {
        let mut f = fixture(|root| {
            PackageFixture::new("ws")
                .path_dep("a", "packs/a")
                .path_dep("b", "packs/b")
                .write(root);
            PackageFixture::new("a")
                .file("rules/a.md", "# A")
                .write(&root.join("packs/a"));
            PackageFixture::new("b")
                .file("rules/b.md", "# B")
                .write(&root.join("packs/b"));
        });
        run(&mut f, InstallOptions::default()).unwrap();
        assert!(f.ws.root().join(".claude/rules/b.md").is_file());

        PackageFixture::new("ws")
            .path_dep("a", "packs/a")
            .write(f.ws.root());
        f.ws.reload_manifest().unwrap();

        let report = run(&mut f, InstallOptions::default()).unwrap();
        assert_eq!(report.removed_packages, vec!["b"]);
        assert!(!f.ws.root().join(".claude/rules/b.md").exists());
        assert!(f.ws.root().join(".claude/rules/a.md").is_file());
    }

    #[test]
    fn test_all_flows_failing_is_a_hard_failure() {
        let mut f = fixture(|root| {
            PackageFixture::new("ws").path_dep("a", "packs/a").write(root);
            PackageFixture::new("a")
                .file("mcp.json", "{ not json")
                .write(&root.join("packs/a"));
        });

        let err = run(&mut f, InstallOptions::default()).unwrap_err();
        assert!(err.downcast_ref::<InstallFailedError>().is_some());
        assert!(!f.ws.index_path().exists());
    }

    #[test]
    fn test_bulk_collision_goes_to_higher_priority() {
        let mut f = fixture(|root| {
            PackageFixture::new("ws")
                .path_dep("low", "packs/low")
                .path_dep("high", "packs/high")
                .write(root);
            PackageFixture::new("low")
                .file("rules/s.md", "low")
                .write(&root.join("packs/low"));
            PackageFixture::new("high")
                .priority(100)
                .file("rules/s.md", "high")
                .write(&root.join("packs/high"));
        });

        let report = run(&mut f, InstallOptions::default()).unwrap();
        let root = f.ws.root();
        assert_eq!(std::fs::read_to_string(root.join(".claude/rules/s.md")).unwrap(), "high");
        assert_eq!(
            std::fs::read_to_string(root.join(".claude/rules/low/s.md")).unwrap(),
            "low"
        );
        assert_eq!(report.relocated_files.len(), 1);
        assert_eq!(report.relocated_files[0].package, "low");

        let index = WorkspaceIndex::load(&f.ws.index_path()).unwrap();
        let owners: Vec<_> = index
            .file(".claude/rules/s.md")
            .unwrap()
            .owners
            .iter()
            .map(|o| o.package.as_str())
            .collect();
        assert_eq!(owners, vec!["high"]);
    }

    #[test]
    fn test_failed_install_still_records_removals() {
        let mut f = fixture(|root| {
            PackageFixture::new("ws").path_dep("a", "packs/a").write(root);
            PackageFixture::new("a")
                .file("rules/a.md", "# A")
                .file("mcp.json", r#"{"x": 1}"#)
                .write(&root.join("packs/a"));
        });
        run(&mut f, InstallOptions::default()).unwrap();
        assert!(f.ws.root().join(".claude/rules/a.md").is_file());

        let pack = f.ws.root().join("packs/a");
        std::fs::remove_file(pack.join("rules/a.md")).unwrap();
        std::fs::write(pack.join("mcp.json"), "{ not json").unwrap();

        let err = run(&mut f, InstallOptions::default()).unwrap_err();
        assert!(err.downcast_ref::<InstallFailedError>().is_some());
        assert!(!f.ws.root().join(".claude/rules/a.md").exists());
        let index = WorkspaceIndex::load(&f.ws.index_path()).unwrap();
        assert!(index.file(".claude/rules/a.md").is_none());
    }

    #[test]
    fn test_explicit_platforms() {
        let mut f = fixture(|root| {
            PackageFixture::new("ws").path_dep("a", "packs/a").write(root);
            PackageFixture::new("a")
                .file("rules/a.md", "# A")
                .write(&root.join("packs/a"));
        });

        let report = run(
            &mut f,
            InstallOptions {
                platforms: vec!["cursor".to_string(), "windsurf".to_string()],
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(
            report.files_written,
            vec![".cursor/rules/a.mdc", ".windsurf/rules/a.md"]
        );

        let err = run(
            &mut f,
            InstallOptions {
                platforms: vec!["nope".to_string()],
                ..Default::default()
            },
        )
        .unwrap_err();
        assert!(StowageError::is_not_found(&err));
    }
}
