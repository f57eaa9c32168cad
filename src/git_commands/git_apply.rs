use std::io::Write;
use std::path::Path;
use std::process::{Command, Stdio};

use anyhow::{Result, bail};

use super::GitOutput;

/// Feed a patch to `git apply` with the given arguments.
fn apply_stdin(workdir: &Path, args: &[&str], patch: &str, envs: &[(&str, &str)]) -> Result<GitOutput> {
    let mut cmd = Command::new("git");
    cmd.current_dir(workdir)
        .arg("apply")
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    for (key, value) in envs {
        cmd.env(key, value);
    }

    let mut child = cmd.spawn()?;
    child
        .stdin
        .as_mut()
        .expect("stdin was piped")
        .write_all(patch.as_bytes())?;
    let output = child.wait_with_output()?;

    Ok(GitOutput {
        status: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}

/// Apply a patch to the working tree.
pub fn apply_patch(workdir: &Path, patch: &str) -> Result<()> {
    let output = apply_stdin(workdir, &[], patch, &[])?;
    if !output.success() {
        bail!("git apply failed:\n{}", output.stderr);
    }
    Ok(())
}

/// Apply a patch to a specific index file, leaving the repository's real
/// index alone. Used to stage patches into throwaway indexes when building
/// fixup trees.
pub fn apply_cached_with_index(workdir: &Path, patch: &str, index_path: &str) -> Result<()> {
    let output = apply_stdin(
        workdir,
        &["--cached"],
        patch,
        &[("GIT_INDEX_FILE", index_path)],
    )?;
    if !output.success() {
        bail!("git apply --cached failed:\n{}", output.stderr);
    }
    Ok(())
}

/// Dry-run a patch against the file state of `rev` without touching the
/// real index or working tree.
///
/// Reads `rev` into a throwaway index file and runs
/// `git apply --cached --check` there, so the check sees exactly the tree
/// the patch was generated for.
pub fn check_against_tree(workdir: &Path, rev: &str, patch: &str) -> Result<GitOutput> {
    // the index path must not exist yet: git rejects zero-byte index files
    let index_dir = tempfile::tempdir()?;
    let index_path = index_dir.path().join("index").to_string_lossy().into_owned();
    let envs: [(&str, &str); 1] = [("GIT_INDEX_FILE", &index_path)];

    let read_tree = {
        let mut cmd = Command::new("git");
        cmd.current_dir(workdir).args(["read-tree", rev]);
        for (key, value) in &envs {
            cmd.env(key, value);
        }
        cmd.output()?
    };
    if !read_tree.status.success() {
        bail!(
            "git read-tree {} failed:\n{}",
            rev,
            String::from_utf8_lossy(&read_tree.stderr)
        );
    }

    apply_stdin(workdir, &["--cached", "--check"], patch, &envs)
}
