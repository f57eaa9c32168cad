use std::io::Write;
use std::path::Path;

use anyhow::{Result, bail};
use shell_escape::escape;

use super::{autosquash_exe_path, run_git_output, run_git_output_with_env, run_git_stdout};

/// How a rebase invocation ended.
#[derive(Debug, PartialEq, Eq)]
pub enum RebaseOutcome {
    /// All todo entries were applied and the rebase finished.
    Completed,
    /// The rebase stopped on a conflict and is waiting in the repository.
    Stopped,
}

/// Start a rebase driven by a pre-generated todo file.
///
/// Writes the todo content to a temp file and runs `git rebase
/// --interactive` with `internal-write-todo` as the sequence editor, so the
/// rebase runs without any user interaction. A conflict leaves the rebase
/// paused in the repository and is reported as [`RebaseOutcome::Stopped`],
/// never auto-aborted: the caller owns the continue/skip/abort decision.
///
/// `upstream` is passed directly as the `<upstream>` argument (commits in
/// `upstream..HEAD` are replayed); `None` means `--root`.
pub fn run_todo_rebase(workdir: &Path, upstream: Option<&str>, todo_content: &str) -> Result<RebaseOutcome> {
    let self_exe = autosquash_exe_path()?;

    let mut temp_file = tempfile::NamedTempFile::new()?;
    temp_file.write_all(todo_content.as_bytes())?;
    temp_file.flush()?;
    let temp_path = temp_file.into_temp_path();

    // Convert backslashes to forward slashes for Git compatibility on Windows.
    let exe_str = self_exe.display().to_string().replace('\\', "/");
    let source_path = temp_path.display().to_string().replace('\\', "/");

    let sequence_editor = format!(
        "{} internal-write-todo --source {} ",
        escape(exe_str.into()),
        escape(source_path.into()),
    );

    let mut args = vec![
        "rebase",
        "--interactive",
        "--autostash",
        "--keep-empty",
        "--no-autosquash",
    ];
    match upstream {
        Some(rev) => args.push(rev),
        None => args.push("--root"),
    }

    let output = run_git_output_with_env(
        workdir,
        &args,
        &[
            ("GIT_SEQUENCE_EDITOR", sequence_editor.as_str()),
            // `true` is a no-op editor: fixup messages keep their defaults
            // and the rebase never blocks on a terminal.
            ("GIT_EDITOR", "true"),
        ],
    )?;

    let _ = temp_path.close();

    // An `edit` pause exits 0 with the rebase still in progress, a
    // conflict exits non-zero; both leave the decision to the caller.
    if in_progress(workdir) {
        return Ok(RebaseOutcome::Stopped);
    }
    if output.success() {
        return Ok(RebaseOutcome::Completed);
    }
    bail!("git rebase failed to start:\n{}", output.stderr);
}

/// Continue a paused rebase after the user resolved conflicts.
pub fn continue_rebase(workdir: &Path) -> Result<RebaseOutcome> {
    step(workdir, "--continue")
}

/// Drop the entry the rebase is stopped on and keep going.
pub fn skip(workdir: &Path) -> Result<RebaseOutcome> {
    step(workdir, "--skip")
}

/// Abort an in-progress rebase, restoring the pre-rebase HEAD.
pub fn abort(workdir: &Path) -> Result<()> {
    let output = run_git_output(workdir, &["rebase", "--abort"])?;
    if !output.success() {
        bail!("git rebase --abort failed:\n{}", output.stderr);
    }
    Ok(())
}

fn step(workdir: &Path, action: &str) -> Result<RebaseOutcome> {
    let output = run_git_output_with_env(
        workdir,
        &["rebase", action],
        &[("GIT_EDITOR", "true")],
    )?;
    if in_progress(workdir) {
        return Ok(RebaseOutcome::Stopped);
    }
    if output.success() {
        return Ok(RebaseOutcome::Completed);
    }
    bail!("git rebase {} failed:\n{}", action, output.stderr);
}

/// Whether a rebase is currently paused in this worktree.
pub fn in_progress(workdir: &Path) -> bool {
    let git_dir = match run_git_stdout(workdir, &["rev-parse", "--git-path", "rebase-merge"]) {
        Ok(dir) => dir,
        Err(_) => return false,
    };
    if workdir.join(&git_dir).exists() {
        return true;
    }
    match run_git_stdout(workdir, &["rev-parse", "--git-path", "rebase-apply"]) {
        Ok(dir) => workdir.join(dir).exists(),
        Err(_) => false,
    }
}

/// Files left with conflict markers by the stopped rebase step.
pub fn conflicting_files(workdir: &Path) -> Result<Vec<String>> {
    let stdout = run_git_stdout(workdir, &["diff", "--name-only", "--diff-filter=U"])?;
    Ok(stdout.lines().filter(|l| !l.is_empty()).map(String::from).collect())
}

/// The commit the paused rebase stopped on, if git recorded one.
pub fn stopped_commit(workdir: &Path) -> Option<String> {
    run_git_stdout(workdir, &["rev-parse", "--verify", "REBASE_HEAD"]).ok()
}
