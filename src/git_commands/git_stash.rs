use std::path::Path;

use anyhow::{Result, bail};

use super::{run_git, run_git_output, run_git_stdout};

/// Create a stash commit from the current working tree and index without
/// resetting either, and register it under `message` in the stash list.
///
/// Returns `None` when there is nothing to stash.
pub fn create_named(workdir: &Path, message: &str) -> Result<Option<String>> {
    let output = run_git_output(workdir, &["stash", "create", message])?;
    if !output.success() {
        bail!("git stash create failed:\n{}", output.stderr);
    }
    let oid = output.stdout.trim().to_string();
    if oid.is_empty() {
        return Ok(None);
    }
    run_git(workdir, &["stash", "store", "-m", message, &oid])?;
    Ok(Some(oid))
}

/// Stash away working tree and index, leaving the tree clean at HEAD.
pub fn push_named(workdir: &Path, message: &str) -> Result<()> {
    run_git(
        workdir,
        &["stash", "push", "--include-untracked", "-m", message],
    )
}

/// Apply a stash commit to the working tree. The stash entry is kept, so
/// recovery can be re-run safely.
pub fn apply_flat(workdir: &Path, stash_ref: &str) -> Result<()> {
    run_git(workdir, &["stash", "apply", stash_ref])
}

/// Drop a stash entry.
pub fn drop(workdir: &Path, stash_ref: &str) -> Result<()> {
    run_git(workdir, &["stash", "drop", stash_ref])
}

/// Find the `stash@{n}` reference whose message matches `message`.
pub fn find_by_message(workdir: &Path, message: &str) -> Result<Option<String>> {
    let list = run_git_stdout(workdir, &["stash", "list", "--format=%gd %gs"])?;
    for line in list.lines() {
        if let Some((stash_ref, subject)) = line.split_once(' ')
            && subject.contains(message)
        {
            return Ok(Some(stash_ref.to_string()));
        }
    }
    Ok(None)
}
