//! `stowage install` command

use std::path::Path;

use anyhow::Result;

use crate::cli::InstallArgs;
use crate::commands::open_workspace;
use crate::GlobalOptions;
use stowage::ops::install::{install, InstallMode, InstallOptions, InstallReport};
use stowage::util::diagnostic::{emit, suggestions, Diagnostic};
use stowage::util::{fs, Shell, Status};

pub fn execute(args: InstallArgs, global_opts: &GlobalOptions) -> Result<()> {
    let shell = global_opts.shell(args.json);
    let (ctx, mut ws) = open_workspace(args.spec.is_none())?;

    // relative path specs are typed against the cwd but recorded against the root
    let spec = args
        .spec
        .map(|spec| rebase_path_spec(&spec, &std::env::current_dir()?, ws.root()))
        .transpose()?;

    let opts = InstallOptions {
        spec,
        platforms: args.platforms,
        include_dev: args.dev,
        jobs: args.jobs,
        fail_fast: args.fail_fast,
        force: args.force,
        dry_run: args.dry_run,
    };

    let spinner = shell.spinner(
        Status::Installing,
        opts.spec.as_deref().unwrap_or("dependencies"),
    );
    let result = install(&ctx, &mut ws, &opts);
    spinner.finish();
    let report = result?;

    if shell.is_json() {
        return shell.json(&report);
    }
    if report.mode == InstallMode::Single && !report.dry_run {
        if let Some(spec) = &opts.spec {
            shell.status(Status::Added, format!("{} to {}", spec, ws.manifest_path().display()));
        }
    }
    print_report(&shell, &report);
    Ok(())
}

/// Rewrite `./x` or `../x` typed in `cwd` relative to the workspace root.
fn rebase_path_spec(spec: &str, cwd: &Path, root: &Path) -> Result<String, std::io::Error> {
    let is_relative_path = spec == "."
        || spec == ".."
        || spec.starts_with("./")
        || spec.starts_with("../");
    if !is_relative_path {
        return Ok(spec.to_string());
    }

    let joined = cwd.join(spec);
    let absolute = joined.canonicalize().unwrap_or(joined);
    let relative = fs::to_slash(&fs::relative_path(root, &absolute));
    Ok(if relative.is_empty() {
        ".".to_string()
    } else if relative.starts_with("..") {
        relative
    } else {
        format!("./{}", relative)
    })
}

fn print_report(shell: &Shell, report: &InstallReport) {
    for relocated in &report.relocated_files {
        shell.status(
            Status::Relocated,
            format!("{} -> {} ({})", relocated.from, relocated.to, relocated.package),
        );
    }
    for conflict in &report.conflicts {
        shell.warn(format!("{}: {}", conflict.path, conflict.resolution));
    }
    for error in &report.errors {
        shell.status(Status::Error, format!("{}: {}", error.flow, error.message));
    }
    if !report.relocated_files.is_empty() {
        let note = Diagnostic::note(format!(
            "{} file(s) were installed at a different path",
            report.relocated_files.len()
        ))
        .with_suggestion(suggestions::RELOCATED);
        emit(&note, shell.use_color());
    }
    for package in &report.removed_packages {
        shell.status(Status::Removed, package);
    }

    let verb = if report.dry_run { "Would write" } else { "Wrote" };
    for package in &report.packages {
        let version = package
            .version
            .as_deref()
            .map(|v| format!(" v{}", v))
            .unwrap_or_default();
        shell.status(Status::Installed, format!("{}{}", package.name, version));
    }
    shell.status(
        Status::Finished,
        format!(
            "{} {} file(s), removed {} ({} platform(s): {})",
            verb,
            report.files_written.len(),
            report.files_removed.len(),
            report.platforms.len(),
            report.platforms.join(", ")
        ),
    );
}
