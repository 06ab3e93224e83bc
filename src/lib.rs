//! Stowage - a package manager for portable AI-tool configuration.
//!
//! Packages of rules, commands, agents, skills and MCP definitions are
//! resolved into a deduplicated graph and installed into each client
//! tool's directory layout through declarative flows.

pub mod core;
pub mod flow;
pub mod ops;
pub mod resolver;
pub mod sources;
pub mod util;

/// Test utilities and mocks for Stowage unit tests.
///
/// Only compiled for tests. Provides stand-ins for the git and registry
/// collaborators and on-disk package fixtures.
#[cfg(test)]
pub mod test_support;

pub use core::{
    dependency::Declaration, dependency_id::DependencyId, errors::StowageError,
    manifest::Manifest, workspace::Workspace,
};

pub use resolver::ResolvedGraph;
pub use util::context::GlobalContext;
