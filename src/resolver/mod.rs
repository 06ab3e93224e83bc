//! Dependency resolution.
//!
//! Declarations are expanded breadth-first into a deduplicated graph. The
//! resolver owns all traversal state; worker threads only fetch sources.

pub mod graph;
pub mod wave;

pub use graph::{DependencyGraphNode, MissingPackage, ResolvedGraph};
pub use wave::{ResolveOptions, WaveResolver};
