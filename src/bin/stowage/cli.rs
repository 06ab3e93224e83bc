//! CLI definitions using clap.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;

/// Stowage - a package manager for portable AI-tool configuration
#[derive(Parser)]
#[command(name = "stowage")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Install a package, or everything Stowage.toml declares
    Install(InstallArgs),

    /// Remove an installed package's files from the workspace
    Uninstall(UninstallArgs),

    /// Display the dependency tree
    Tree(TreeArgs),

    /// Copy workspace configuration back into a package directory
    Save(SaveArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

#[derive(Args)]
pub struct InstallArgs {
    /// Package to add: a path, a git URL, or name[@version]
    pub spec: Option<String>,

    /// Platform to install into (repeatable; default: detected)
    #[arg(long = "platform", value_name = "ID")]
    pub platforms: Vec<String>,

    /// Also install dev-dependencies
    #[arg(long)]
    pub dev: bool,

    /// Concurrent source resolutions
    #[arg(short, long, env = "STOWAGE_JOBS")]
    pub jobs: Option<usize>,

    /// Stop resolving after the first failure
    #[arg(long)]
    pub fail_fast: bool,

    /// Overwrite unowned files instead of relocating
    #[arg(long)]
    pub force: bool,

    /// Show what would change without writing anything
    #[arg(long)]
    pub dry_run: bool,

    /// Print the install report as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args)]
pub struct UninstallArgs {
    /// Package name
    pub name: String,

    /// Show what would be removed without removing it
    #[arg(long)]
    pub dry_run: bool,

    /// Print the report as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args)]
pub struct TreeArgs {
    /// Maximum depth to display
    #[arg(short, long)]
    pub depth: Option<usize>,

    /// Include dev-dependencies
    #[arg(long)]
    pub dev: bool,
}

#[derive(Args)]
pub struct SaveArgs {
    /// Package directory to save into
    pub dir: PathBuf,

    /// Platform to read from (repeatable; default: detected)
    #[arg(long = "platform", value_name = "ID")]
    pub platforms: Vec<String>,

    /// Show what would be saved without writing anything
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    #[arg(value_enum)]
    pub shell: Shell,
}
