//! Workspace resolution operations.

use anyhow::Result;

use crate::core::errors::StowageError;
use crate::core::{Manifest, Workspace};
use crate::resolver::{ResolveOptions, ResolvedGraph, WaveResolver};
use crate::sources::SourceResolver;
use crate::util::GlobalContext;

/// The source resolver configured for this context.
pub fn source_resolver(ctx: &GlobalContext) -> SourceResolver {
    SourceResolver::with_defaults(ctx.cache_dir(), ctx.registry_dir())
}

/// Resolution options from command-line switches, falling back to config.
pub fn resolve_options(
    ctx: &GlobalContext,
    include_dev: bool,
    jobs: Option<usize>,
    fail_fast: bool,
) -> ResolveOptions {
    let defaults = ResolveOptions::default();
    let install = &ctx.config().install;
    ResolveOptions {
        include_dev,
        jobs: jobs.or(install.jobs).unwrap_or(defaults.jobs),
        fail_fast: fail_fast || install.fail_fast.unwrap_or(false),
    }
}

/// Resolve the dependency graph of the workspace's root manifest.
pub fn resolve_workspace(
    ws: &Workspace,
    sources: &SourceResolver,
    options: ResolveOptions,
) -> Result<ResolvedGraph> {
    let manifest = root_manifest(ws)?;
    tracing::info!("Resolving dependencies of {}", manifest.path().display());

    let graph = WaveResolver::new(sources, options).resolve_manifest(manifest)?;
    for warning in &graph.warnings {
        tracing::warn!("{}", warning);
    }
    for missing in &graph.missing {
        tracing::warn!(
            "could not resolve `{}` (declared in {}): {}",
            missing.name,
            missing.declared_in.display(),
            missing.reason
        );
    }
    Ok(graph)
}

/// Display name of the workspace: its package name, else its directory.
pub fn root_name(ws: &Workspace) -> String {
    ws.manifest()
        .and_then(Manifest::name)
        .map(str::to_string)
        .or_else(|| {
            ws.root()
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
        })
        .unwrap_or_else(|| ".".to_string())
}

pub(crate) fn root_manifest(ws: &Workspace) -> Result<&Manifest> {
    ws.manifest().ok_or_else(|| {
        StowageError::not_found("manifest", ws.manifest_path().display().to_string()).into()
    })
}
