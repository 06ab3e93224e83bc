//! `stowage save` command

use anyhow::Result;

use crate::cli::SaveArgs;
use crate::commands::open_workspace;
use crate::GlobalOptions;
use stowage::ops::save::{save, SaveOptions};
use stowage::util::Status;

pub fn execute(args: SaveArgs, global_opts: &GlobalOptions) -> Result<()> {
    let shell = global_opts.shell(false);
    let (ctx, ws) = open_workspace(false)?;

    let package_dir = std::env::current_dir()?.join(&args.dir);
    let opts = SaveOptions {
        platforms: args.platforms,
        dry_run: args.dry_run,
    };
    let report = save(&ctx, &ws, &package_dir, &opts)?;

    for path in &report.files_written {
        shell.status(Status::Saved, path);
    }
    for path in &report.files_skipped {
        shell.status(Status::Skipped, format!("{} (owned by another package)", path));
    }
    let verb = if args.dry_run { "Would save" } else { "Saved" };
    shell.status(
        Status::Finished,
        format!("{} {} file(s) into {}", verb, report.files_written.len(), report.package),
    );
    Ok(())
}
