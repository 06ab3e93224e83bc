//! Stowage CLI - a package manager for portable AI-tool configuration

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

mod cli;
mod commands;

use cli::{Cli, Commands};
use stowage::core::errors::StowageError;
use stowage::util::diagnostic::{emit, suggestions, InstallFailedError, PackageNotInstalledError};
use stowage::util::Shell;

/// Flags shared by every command.
pub struct GlobalOptions {
    pub verbose: bool,
    pub no_color: bool,
}

impl GlobalOptions {
    /// A shell for this invocation; `json` switches to machine output.
    pub fn shell(&self, json: bool) -> Shell {
        Shell::from_flags(self.verbose, self.no_color, json)
    }
}

fn main() {
    let cli = Cli::parse();
    let opts = GlobalOptions {
        verbose: cli.verbose,
        no_color: cli.no_color,
    };

    if let Err(e) = run(cli, &opts) {
        report(&e, &opts);
        std::process::exit(1);
    }
}

fn run(cli: Cli, opts: &GlobalOptions) -> Result<()> {
    // Set up logging
    let filter = if opts.verbose {
        EnvFilter::new("stowage=debug")
    } else {
        EnvFilter::new("stowage=info")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .init();

    // Execute command
    match cli.command {
        Commands::Install(args) => commands::install::execute(args, opts),
        Commands::Uninstall(args) => commands::uninstall::execute(args, opts),
        Commands::Tree(args) => commands::tree::execute(args, opts),
        Commands::Save(args) => commands::save::execute(args, opts),
        Commands::Completions(args) => commands::completions::execute(args),
    }
}

fn report(e: &anyhow::Error, opts: &GlobalOptions) {
    let color = opts.shell(false).use_color();
    if let Some(classified) = e.downcast_ref::<StowageError>() {
        let mut diag = classified.to_diagnostic();
        let chain = format!("{:#}", e);
        if chain != classified.to_string() {
            diag = diag.with_context(chain);
        }
        emit(&diag, color);
        return;
    }

    eprintln!("error: {:#}", e);
    if let Some(failed) = e.downcast_ref::<InstallFailedError>() {
        if let Some(first) = &failed.first {
            eprintln!("  = first error: {}", first);
        }
        eprintln!("{}", suggestions::INSTALL_FAILED);
    } else if let Some(not_installed) = e.downcast_ref::<PackageNotInstalledError>() {
        match &not_installed.suggestions {
            Some(help) => eprintln!("help: {}", help),
            None => eprintln!("{}", suggestions::PACKAGE_NOT_INSTALLED),
        }
    }
}
