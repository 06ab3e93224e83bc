//! Breadth-first ("wave") dependency resolution.
//!
//! Each wave drains the whole queue. Identities are computed and checked
//! against the visited set on the calling thread, then the surviving
//! declarations have their sources resolved on a bounded rayon pool.
//! Results are folded back in queue order, so the outcome does not depend
//! on which worker finished first.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use rayon::prelude::*;

use crate::core::dependency::Declaration;
use crate::core::dependency_id::DependencyId;
use crate::core::manifest::Manifest;
use crate::core::package::Priority;
use crate::resolver::graph::{DependencyGraphNode, MissingPackage, ResolvedGraph};
use crate::sources::{ResolvedSource, SourceResolver};

/// Resolution switches.
#[derive(Debug, Clone, Copy)]
pub struct ResolveOptions {
    /// Include the root manifest's dev-dependencies
    pub include_dev: bool,
    /// Concurrent source resolutions per wave
    pub jobs: usize,
    /// Stop issuing work after the first failure
    pub fail_fast: bool,
}

impl Default for ResolveOptions {
    fn default() -> Self {
        ResolveOptions {
            include_dev: false,
            jobs: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            fail_fast: false,
        }
    }
}

/// A declaration waiting in the queue.
#[derive(Debug, Clone)]
struct Queued {
    decl: Declaration,
    /// Top-level declaration this one was reached from
    root: usize,
}

enum Outcome {
    Resolved(Box<ResolvedSource>),
    Failed(anyhow::Error),
    Cancelled,
}

/// Per-run traversal state. Owned by the resolving thread only.
#[derive(Default)]
struct WaveState {
    /// Keys already claimed, whether or not they resolved
    visited: HashSet<String>,
    /// Content root -> node, for content reached through different keys
    content_roots: HashMap<PathBuf, usize>,
    graph: ResolvedGraph,
}

/// Resolves a manifest's dependency graph wave by wave.
pub struct WaveResolver<'a> {
    sources: &'a SourceResolver,
    options: ResolveOptions,
}

impl<'a> WaveResolver<'a> {
    pub fn new(sources: &'a SourceResolver, options: ResolveOptions) -> Self {
        WaveResolver { sources, options }
    }

    /// Resolve everything a root manifest declares.
    pub fn resolve_manifest(&self, manifest: &Manifest) -> Result<ResolvedGraph> {
        let mut roots = manifest.dependencies().to_vec();
        if self.options.include_dev {
            roots.extend(manifest.dev_dependencies().iter().cloned());
        }
        self.resolve(roots)
    }

    /// Resolve a list of top-level declarations.
    ///
    /// Individual failures never abort the run; they are reported in
    /// [`ResolvedGraph::missing`]. Only infrastructure errors (the worker
    /// pool) are returned as `Err`.
    pub fn resolve(&self, roots: Vec<Declaration>) -> Result<ResolvedGraph> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.options.jobs.max(1))
            .build()
            .context("failed to start resolver thread pool")?;

        let mut state = WaveState::default();
        let mut queue: VecDeque<Queued> = VecDeque::new();
        for (root, decl) in roots.into_iter().enumerate() {
            let key = DependencyId::compute(&decl, decl.declaring_dir())
                .ok()
                .map(|id| id.key().to_string());
            state.graph.root_keys.push(key);
            queue.push_back(Queued { decl, root });
        }

        let cancel = AtomicBool::new(false);
        let mut wave = 0;
        while !queue.is_empty() {
            if self.options.fail_fast && cancel.load(Ordering::SeqCst) {
                for item in queue.drain(..) {
                    tracing::debug!("not resolving `{}` (fail-fast)", item.decl.name());
                    state.graph.cancelled.push(item.decl.name().to_string());
                }
                break;
            }

            let items: Vec<Queued> = queue.drain(..).collect();
            let tasks = self.claim(&mut state, items, &cancel);
            tracing::debug!("wave {}: resolving {} declaration(s)", wave, tasks.len());

            let outcomes: Vec<Outcome> = pool.install(|| {
                tasks
                    .par_iter()
                    .map(|(item, _)| self.resolve_one(&item.decl, &cancel))
                    .collect()
            });

            for ((item, id), outcome) in tasks.into_iter().zip(outcomes) {
                match outcome {
                    Outcome::Resolved(resolved) => {
                        self.add_node(&mut state, &mut queue, item, id, *resolved)
                    }
                    Outcome::Failed(err) => {
                        tracing::warn!("failed to resolve `{}`: {:#}", item.decl.name(), err);
                        let missing = MissingPackage::new(&item.decl, item.root, &err);
                        state.graph.warnings.push(format!(
                            "could not resolve `{}` (declared in {}): {}",
                            missing.name,
                            missing.declared_in.display(),
                            missing.reason
                        ));
                        state.graph.missing.push(missing);
                    }
                    Outcome::Cancelled => {
                        tracing::debug!("cancelled `{}` (fail-fast)", item.decl.name());
                        state.graph.cancelled.push(item.decl.name().to_string());
                    }
                }
            }
            wave += 1;
        }

        state.graph.link();
        Ok(state.graph)
    }

    /// Compute identities and drop declarations whose key was already seen.
    fn claim(
        &self,
        state: &mut WaveState,
        items: Vec<Queued>,
        cancel: &AtomicBool,
    ) -> Vec<(Queued, DependencyId)> {
        let mut tasks = Vec::new();
        for item in items {
            match DependencyId::compute(&item.decl, item.decl.declaring_dir()) {
                Ok(id) => {
                    if !state.visited.insert(id.key().to_string()) {
                        tracing::debug!("`{}` already visited ({})", item.decl.name(), id.key());
                        continue;
                    }
                    tasks.push((item, id));
                }
                Err(err) => {
                    let err = anyhow::Error::new(err);
                    tracing::warn!("invalid dependency `{}`: {:#}", item.decl.name(), err);
                    state
                        .graph
                        .warnings
                        .push(format!("invalid dependency `{}`: {:#}", item.decl.name(), err));
                    state
                        .graph
                        .missing
                        .push(MissingPackage::new(&item.decl, item.root, &err));
                    if self.options.fail_fast {
                        cancel.store(true, Ordering::SeqCst);
                    }
                }
            }
        }
        tasks
    }

    /// Worker side: side-effect free apart from the fetch itself.
    fn resolve_one(&self, decl: &Declaration, cancel: &AtomicBool) -> Outcome {
        if self.options.fail_fast && cancel.load(Ordering::SeqCst) {
            return Outcome::Cancelled;
        }
        match self.sources.resolve(decl) {
            Ok(resolved) => Outcome::Resolved(Box::new(resolved)),
            Err(err) => {
                if self.options.fail_fast {
                    cancel.store(true, Ordering::SeqCst);
                }
                Outcome::Failed(err)
            }
        }
    }

    fn add_node(
        &self,
        state: &mut WaveState,
        queue: &mut VecDeque<Queued>,
        item: Queued,
        id: DependencyId,
        resolved: ResolvedSource,
    ) {
        let content_root = resolved
            .source
            .absolute_path
            .canonicalize()
            .unwrap_or_else(|_| resolved.source.absolute_path.clone());

        // same content through another key (a package declaring itself by URL)
        if let Some(&existing) = state.content_roots.get(&content_root) {
            tracing::debug!(
                "`{}` ({}) is the same content as `{}`",
                item.decl.name(),
                id.key(),
                state.graph.nodes[existing].name
            );
            state.graph.alias(id.key(), existing);
            return;
        }

        let name = resolved.source.package_name.clone();
        if let Some(existing) = state.graph.node(&name) {
            let message = format!(
                "package `{}` from {} conflicts with `{}` from {}; keeping the first",
                name,
                id.key(),
                existing.name,
                existing.id.key()
            );
            tracing::warn!("{}", message);
            state.graph.warnings.push(message);
            return;
        }

        let children: Vec<Declaration> = resolved
            .manifest
            .as_ref()
            .map(|m| m.dependencies().to_vec())
            .unwrap_or_default();
        let dependency_keys = children
            .iter()
            .filter_map(|c| DependencyId::compute(c, c.declaring_dir()).ok())
            .map(|c| c.key().to_string())
            .collect();

        let level = item
            .decl
            .priority()
            .or_else(|| resolved.manifest.as_ref().and_then(|m| m.priority()))
            .unwrap_or(0);
        let node = DependencyGraphNode {
            name,
            version: resolved.source.version.clone(),
            priority: Priority::new(level, state.graph.len()),
            dependencies: children.iter().map(|c| c.name().to_string()).collect(),
            dependency_keys,
            include: item.decl.include().to_vec(),
            depth: item.decl.depth(),
            is_dev: item.decl.is_dev(),
            root: item.root,
            id,
            source: resolved.source,
        };
        tracing::debug!(
            "resolved `{}` at depth {} ({})",
            node.name,
            node.depth,
            node.id.key()
        );

        let depth = item.decl.depth() + 1;
        for child in children {
            queue.push_back(Queued {
                decl: child.at_depth(depth),
                root: item.root,
            });
        }

        let index = state.graph.push_node(node);
        state.content_roots.insert(content_root, index);
    }
}
