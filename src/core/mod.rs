//! Core data structures for Stowage.
//!
//! - Declarations and their canonical identities
//! - Manifests and resolved package sources
//! - Platform definitions and the workspace index

pub mod dependency;
pub mod dependency_id;
pub mod errors;
pub mod index;
pub mod manifest;
pub mod package;
pub mod platform;
pub mod workspace;

pub use dependency::{Declaration, SourceSpec};
pub use dependency_id::{DependencyId, SourceType};
pub use errors::StowageError;
pub use index::WorkspaceIndex;
pub use manifest::{find_manifest, Manifest, MANIFEST_NAME};
pub use package::{InstallPackage, Mutability, Priority, ResolvedPackageSource};
pub use platform::PlatformDefinition;
pub use workspace::Workspace;
