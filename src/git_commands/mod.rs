pub mod git_apply;
pub mod git_commit;
pub mod git_rebase;
pub mod git_stash;
pub mod git_worktree;

use std::path::{Component, Path, PathBuf};
use std::process::Command;

use anyhow::{Result, bail};

use crate::error::Error;

/// Minimum Git version required (`git worktree remove` was added in 2.17).
const MIN_GIT_VERSION: (u32, u32) = (2, 17);

/// Exit status, stdout and stderr of a finished git subprocess.
///
/// A non-zero status is data, not an error: callers inspect `status` and
/// decide. Only a failure to spawn git at all surfaces as `Err`.
#[derive(Debug)]
pub struct GitOutput {
    pub status: i32,
    pub stdout: String,
    pub stderr: String,
}

impl GitOutput {
    pub fn success(&self) -> bool {
        self.status == 0
    }
}

/// Run a git command and capture its outcome without judging it.
pub fn run_git_output(workdir: &Path, args: &[&str]) -> Result<GitOutput> {
    run_git_output_with_env(workdir, args, &[])
}

/// Same as [`run_git_output`], with extra environment variables set for the
/// child. The inherited environment (GIT_DIR, editor vars, ...) is passed
/// through unchanged.
pub fn run_git_output_with_env(
    workdir: &Path,
    args: &[&str],
    envs: &[(&str, &str)],
) -> Result<GitOutput> {
    let mut cmd = Command::new("git");
    cmd.current_dir(workdir).args(args);
    for (key, value) in envs {
        cmd.env(key, value);
    }
    let output = cmd.output()?;

    Ok(GitOutput {
        status: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}

/// Run a git command in the given working directory.
/// On failure, returns an error containing stderr output.
pub fn run_git(workdir: &Path, args: &[&str]) -> Result<()> {
    let output = run_git_output(workdir, args)?;
    if !output.success() {
        bail!("git {} failed:\n{}", args.join(" "), output.stderr);
    }
    Ok(())
}

/// Run a git command and return its stdout, trimmed of the trailing newline.
pub fn run_git_stdout(workdir: &Path, args: &[&str]) -> Result<String> {
    let output = run_git_output(workdir, args)?;
    if !output.success() {
        bail!("git {} failed:\n{}", args.join(" "), output.stderr);
    }
    Ok(output.stdout.trim_end_matches('\n').to_string())
}

/// Unified diff of everything uncommitted (staged and unstaged) against
/// HEAD. Renames are disabled so every entry carries plain old/new paths.
pub fn diff_head(workdir: &Path) -> Result<String> {
    run_git_stdout(
        workdir,
        &[
            "-c",
            "core.quotepath=false",
            "diff",
            "--no-color",
            "--no-ext-diff",
            "--no-renames",
            "HEAD",
        ],
    )
}

/// Check that the installed Git version meets the minimum requirement.
/// Returns an error with an actionable message if the version is too old.
pub fn check_git_version() -> Result<()> {
    let output = Command::new("git").arg("--version").output()?;
    let version_str = String::from_utf8_lossy(&output.stdout);

    let (major, minor) = parse_git_version(&version_str)
        .ok_or_else(|| anyhow::anyhow!("Could not parse Git version from: {}", version_str.trim()))?;

    if (major, minor) < MIN_GIT_VERSION {
        bail!(
            "Git {}.{} is too old. git-autosquash requires Git {}.{} or later (for `git worktree remove`).\n\
             Current version: {}",
            major,
            minor,
            MIN_GIT_VERSION.0,
            MIN_GIT_VERSION.1,
            version_str.trim()
        );
    }

    Ok(())
}

/// Parse "git version X.Y.Z..." into (major, minor).
fn parse_git_version(version_str: &str) -> Option<(u32, u32)> {
    let version_part = version_str.trim().strip_prefix("git version ")?;
    let mut parts = version_part.split('.');
    let major = parts.next()?.parse().ok()?;
    let minor = parts.next()?.parse().ok()?;
    Some((major, minor))
}

/// Truncate a full commit hash to a short display form (7 chars).
pub fn short_hash(hash: &str) -> &str {
    &hash[..7.min(hash.len())]
}

/// Validate a repository-relative path taken from a diff entry.
///
/// Rejects absolute paths, `..` traversal, and any existing symlink
/// component that resolves outside the repository root.
pub fn validate_repo_path(workdir: &Path, rel: &str) -> Result<(), Error> {
    let path = Path::new(rel);
    if path.is_absolute() {
        return Err(Error::UnsafePath(rel.to_string()));
    }
    for component in path.components() {
        match component {
            Component::Normal(_) | Component::CurDir => {}
            _ => return Err(Error::UnsafePath(rel.to_string())),
        }
    }

    let root = match workdir.canonicalize() {
        Ok(root) => root,
        Err(_) => return Err(Error::UnsafePath(rel.to_string())),
    };
    let mut current = workdir.to_path_buf();
    for component in path.components() {
        current.push(component);
        if current.is_symlink() {
            match current.canonicalize() {
                Ok(resolved) if resolved.starts_with(&root) => {}
                _ => return Err(Error::UnsafePath(rel.to_string())),
            }
        }
    }

    Ok(())
}

/// Resolve the path to the git-autosquash binary.
///
/// During `cargo test`, `current_exe()` returns the test harness binary in
/// `target/<profile>/deps/`. The actual git-autosquash binary lives one level
/// up in `target/<profile>/`. This function detects that case and returns the
/// correct path.
pub fn autosquash_exe_path() -> Result<PathBuf> {
    let exe = std::env::current_exe()?;
    if let Some(parent) = exe.parent()
        && parent.file_name().and_then(|n| n.to_str()) == Some("deps")
    {
        let bin_name = if cfg!(windows) {
            "git-autosquash.exe"
        } else {
            "git-autosquash"
        };
        if let Some(profile_dir) = parent.parent() {
            let actual = profile_dir.join(bin_name);
            if actual.exists() {
                return Ok(actual);
            }
        }
    }
    Ok(exe)
}
