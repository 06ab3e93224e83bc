//! Command implementations

pub mod completions;
pub mod install;
pub mod save;
pub mod tree;
pub mod uninstall;

use anyhow::Result;

use stowage::core::Workspace;
use stowage::util::GlobalContext;

/// Open the workspace for the current directory.
///
/// The nearest directory with a `Stowage.toml` is the workspace root. When
/// `require_manifest` is false and there is none, the current directory is
/// used. The returned context is rooted at the workspace, so project
/// configuration is read from `<root>/.stowage/config.toml`.
pub fn open_workspace(require_manifest: bool) -> Result<(GlobalContext, Workspace)> {
    let ctx = GlobalContext::new()?;
    let root = match ctx.find_workspace_root() {
        Ok(root) => root,
        Err(_) if !require_manifest => ctx.cwd().to_path_buf(),
        Err(e) => return Err(e.into()),
    };

    let ws = Workspace::new(&root)?;
    let ctx = GlobalContext::with_cwd(ws.root().to_path_buf())?;
    Ok((ctx, ws))
}
