//! `stowage uninstall` command

use anyhow::Result;

use crate::cli::UninstallArgs;
use crate::commands::open_workspace;
use crate::GlobalOptions;
use stowage::ops::uninstall::{uninstall, UninstallOptions};
use stowage::util::Status;

pub fn execute(args: UninstallArgs, global_opts: &GlobalOptions) -> Result<()> {
    let shell = global_opts.shell(args.json);
    let (_ctx, mut ws) = open_workspace(false)?;

    let opts = UninstallOptions {
        dry_run: args.dry_run,
    };
    let report = uninstall(&mut ws, &args.name, &opts)?;

    if shell.is_json() {
        return shell.json(&report);
    }

    for path in &report.removal.files_removed {
        shell.status(Status::Removed, path);
    }
    for path in &report.removal.files_written {
        shell.status(Status::Saved, path);
    }
    let verb = if args.dry_run { "Would uninstall" } else { "Uninstalled" };
    shell.status(
        Status::Finished,
        format!(
            "{} {} ({} file(s) removed, {} updated)",
            verb,
            report.package,
            report.removal.files_removed.len(),
            report.removal.files_written.len()
        ),
    );
    Ok(())
}
