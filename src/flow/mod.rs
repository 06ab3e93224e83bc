//! Flow-based installation.
//!
//! A flow maps package files matching a source pattern to a workspace target
//! with a merge policy. This module holds the flow model, the pattern
//! language, the merge primitives for each policy, and the engine that
//! applies a platform's flows for a set of packages.

pub mod composite;
pub mod conflict;
pub mod engine;
pub mod format;
pub mod model;
pub mod pattern;
pub mod tree;

pub use conflict::{ConflictResolver, FlowConflict};
pub use engine::{apply_flows, FlowError, FlowOptions, FlowResult, OwnedFile, RelocatedFile};
pub use model::{Flow, FlowCondition, MergePolicy};
