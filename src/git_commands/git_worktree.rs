use std::path::Path;

use anyhow::Result;

use super::{run_git, run_git_output};

/// Whether this repository supports linked worktrees.
///
/// Bare probes `git worktree list`; failure (ancient git, unusual repo
/// layout) routes strategy selection to the index variant.
pub fn supported(workdir: &Path) -> bool {
    run_git_output(workdir, &["worktree", "list"])
        .map(|out| out.success())
        .unwrap_or(false)
}

/// Add a detached scratch worktree at `path`, checked out at `rev`.
pub fn add_detached(workdir: &Path, path: &Path, rev: &str) -> Result<()> {
    let path_str = path.to_string_lossy();
    run_git(workdir, &["worktree", "add", "--detach", &path_str, rev])
}

/// Remove a scratch worktree, discarding anything left in it.
pub fn remove(workdir: &Path, path: &Path) -> Result<()> {
    let path_str = path.to_string_lossy();
    run_git(workdir, &["worktree", "remove", "--force", &path_str])
}

/// Prune stale worktree bookkeeping. Best effort, used by recovery.
pub fn prune(workdir: &Path) {
    let _ = run_git_output(workdir, &["worktree", "prune"]);
}
