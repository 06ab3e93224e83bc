//! High-level operations.
//!
//! This module contains the implementation of Stowage commands.

pub mod install;
pub mod manifest_edit;
pub mod resolve;
pub mod save;
pub mod uninstall;

pub use install::{
    install, install_with, InstallMode, InstallOptions, InstallReport, InstallationContext,
    InstalledPackage,
};
pub use manifest_edit::{add_declaration, ensure_package_manifest, remove_declaration};
pub use resolve::{resolve_options, resolve_workspace, root_name, source_resolver};
pub use save::{save, SaveOptions, SaveReport};
pub use uninstall::{remove_contribution, uninstall, Removal, UninstallOptions, UninstallReport};
