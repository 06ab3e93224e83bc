//! The resolved dependency graph.
//!
//! Nodes are stored in breadth-first order; a node's position is its
//! install-precedence tie-break. Edges are kept by canonical key so that a
//! dependency resolved through an alias (same content reached by a
//! different key) still points at the one node that owns the content.

use std::collections::HashMap;
use std::path::PathBuf;

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;

use crate::core::dependency::Declaration;
use crate::core::dependency_id::DependencyId;
use crate::core::package::{InstallPackage, Priority, ResolvedPackageSource};

/// One resolved package.
#[derive(Debug, Clone)]
pub struct DependencyGraphNode {
    pub name: String,
    pub version: Option<String>,
    pub id: DependencyId,
    pub source: ResolvedPackageSource,
    /// Declared names of this package's dependencies
    pub dependencies: Vec<String>,
    /// Canonical keys of those dependencies that had a valid identity
    pub dependency_keys: Vec<String>,
    pub priority: Priority,
    pub include: Vec<String>,
    pub depth: usize,
    pub is_dev: bool,
    /// Index of the top-level declaration that first reached this package
    pub root: usize,
}

impl DependencyGraphNode {
    pub fn to_install_package(&self) -> InstallPackage {
        InstallPackage {
            id: self.id.clone(),
            source: self.source.clone(),
            priority: self.priority,
            include: self.include.clone(),
        }
    }
}

/// A declaration that could not be resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingPackage {
    pub name: String,
    pub declared_in: PathBuf,
    pub reason: String,
    /// Index of the top-level declaration it was reached from
    pub root: usize,
    /// Classified as not-found rather than malformed or fetch failure
    pub not_found: bool,
}

impl MissingPackage {
    pub fn new(decl: &Declaration, root: usize, err: &anyhow::Error) -> Self {
        MissingPackage {
            name: decl.name().to_string(),
            declared_in: decl.declared_in().to_path_buf(),
            reason: format!("{:#}", err),
            root,
            not_found: crate::core::errors::StowageError::is_not_found(err),
        }
    }
}

/// Result of a wave resolution.
#[derive(Debug, Default)]
pub struct ResolvedGraph {
    pub nodes: Vec<DependencyGraphNode>,
    pub warnings: Vec<String>,
    pub missing: Vec<MissingPackage>,
    /// Names of declarations dropped after a fail-fast stop
    pub cancelled: Vec<String>,
    /// Keys of the top-level declarations, in declaration order
    pub root_keys: Vec<Option<String>>,
    key_to_node: HashMap<String, usize>,
    graph: DiGraph<usize, ()>,
}

impl ResolvedGraph {
    pub(crate) fn push_node(&mut self, node: DependencyGraphNode) -> usize {
        let index = self.nodes.len();
        self.key_to_node.insert(node.id.key().to_string(), index);
        self.nodes.push(node);
        index
    }

    /// Point another key at an existing node.
    pub(crate) fn alias(&mut self, key: &str, index: usize) {
        self.key_to_node.insert(key.to_string(), index);
    }

    /// Build the edge view once every node is known.
    pub(crate) fn link(&mut self) {
        let mut graph = DiGraph::with_capacity(self.nodes.len(), 0);
        let indices: Vec<NodeIndex> = (0..self.nodes.len()).map(|i| graph.add_node(i)).collect();
        for (from, node) in self.nodes.iter().enumerate() {
            for key in &node.dependency_keys {
                if let Some(&to) = self.key_to_node.get(key) {
                    if !graph.contains_edge(indices[from], indices[to]) {
                        graph.add_edge(indices[from], indices[to], ());
                    }
                }
            }
        }
        self.graph = graph;
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, name: &str) -> Option<&DependencyGraphNode> {
        self.nodes.iter().find(|n| n.name == name)
    }

    pub fn node_index_for_key(&self, key: &str) -> Option<usize> {
        self.key_to_node.get(key).copied()
    }

    /// Node names in breadth-first order.
    pub fn names(&self) -> Vec<&str> {
        self.nodes.iter().map(|n| n.name.as_str()).collect()
    }

    /// Direct dependencies of a node, in graph order.
    pub fn dependencies_of(&self, index: usize) -> Vec<usize> {
        let mut deps: Vec<usize> = self
            .graph
            .neighbors_directed(NodeIndex::new(index), Direction::Outgoing)
            .map(|n| self.graph[n])
            .collect();
        deps.sort_unstable();
        deps
    }

    /// Nodes reached from the top-level declarations, in declaration order.
    pub fn roots(&self) -> Vec<usize> {
        let mut roots = Vec::new();
        for key in self.root_keys.iter().flatten() {
            if let Some(index) = self.node_index_for_key(key) {
                if !roots.contains(&index) {
                    roots.push(index);
                }
            }
        }
        roots
    }

    /// Whether the manifest graph contains a cycle.
    pub fn has_cycle(&self) -> bool {
        petgraph::algo::is_cyclic_directed(&self.graph)
    }

    /// Every resolved package, in install order.
    pub fn install_packages(&self) -> Vec<InstallPackage> {
        self.nodes.iter().map(|n| n.to_install_package()).collect()
    }

    /// Packages first reached from top-level declaration `root`.
    pub fn install_packages_for_root(&self, root: usize) -> Vec<InstallPackage> {
        self.nodes
            .iter()
            .filter(|n| n.root == root)
            .map(|n| n.to_install_package())
            .collect()
    }

    pub fn missing_for_root(&self, root: usize) -> impl Iterator<Item = &MissingPackage> {
        self.missing.iter().filter(move |m| m.root == root)
    }
}
