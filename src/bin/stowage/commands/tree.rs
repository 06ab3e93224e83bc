//! `stowage tree` command

use std::collections::HashSet;

use anyhow::Result;

use crate::cli::TreeArgs;
use crate::commands::open_workspace;
use crate::GlobalOptions;
use stowage::ops::resolve::{resolve_options, resolve_workspace, root_name, source_resolver};
use stowage::resolver::ResolvedGraph;
use stowage::util::{Shell, Status};

pub fn execute(args: TreeArgs, global_opts: &GlobalOptions) -> Result<()> {
    let shell = global_opts.shell(false);
    let (ctx, ws) = open_workspace(true)?;
    let sources = source_resolver(&ctx);
    let options = resolve_options(&ctx, args.dev, None, false);

    let spinner = shell.spinner(Status::Resolving, "dependency graph");
    let result = resolve_workspace(&ws, &sources, options);
    spinner.finish();
    let graph = result?;

    shell.println(root_name(&ws));
    let mut seen = HashSet::new();
    let max_depth = args.depth.unwrap_or(usize::MAX);
    for index in graph.roots() {
        print_node(&shell, &graph, index, 1, max_depth, &mut seen);
    }

    for missing in &graph.missing {
        shell.println(format!("├── {} (missing)", missing.name));
    }
    Ok(())
}

/// Print one node and, unless it was already shown, its dependencies.
fn print_node(
    shell: &Shell,
    graph: &ResolvedGraph,
    index: usize,
    depth: usize,
    max_depth: usize,
    seen: &mut HashSet<usize>,
) {
    if depth > max_depth {
        return;
    }

    let node = &graph.nodes[index];
    let is_duplicate = !seen.insert(index);

    let prefix = format!("{}├── ", "│   ".repeat(depth - 1));
    let version = node
        .version
        .as_deref()
        .map(|v| format!(" v{}", v))
        .unwrap_or_default();
    let dup_marker = if is_duplicate { " (*)" } else { "" };
    shell.println(format!("{}{}{}{}", prefix, node.name, version, dup_marker));

    // Don't recurse into duplicates
    if is_duplicate {
        return;
    }
    for dep in graph.dependencies_of(index) {
        print_node(shell, graph, dep, depth + 1, max_depth, seen);
    }
}
