use std::path::Path;

use anyhow::{Result, bail};

use super::{run_git, run_git_output};

/// Stage specific files.
pub fn stage_files(workdir: &Path, files: &[&str]) -> Result<()> {
    let mut args = vec!["add", "--"];
    args.extend_from_slice(files);
    run_git(workdir, &args)
}

/// Hook output announcing that the working tree was rewritten mid-commit.
const HOOK_MODIFIED_SIGNAL: &str = "files were modified by this hook";

/// Why [`amend_with_hook_retry`] gave up.
#[derive(Debug)]
pub enum AmendError {
    /// A hook rewrote files and the retried amend failed too.
    Hook(String),
    /// The amend failed for a reason unrelated to hooks.
    Other(String),
}

/// Amend the current commit, accommodating hooks that rewrite files.
///
/// If the first attempt reports that a hook modified the working tree,
/// all changes are re-staged and the amend retried once; a second failure
/// after that is a hook failure. Any other first failure is reported
/// as-is without a retry.
pub fn amend_with_hook_retry(workdir: &Path) -> Result<(), AmendError> {
    let first = run_git_output(workdir, &["commit", "--amend", "--no-edit"])
        .map_err(|e| AmendError::Other(e.to_string()))?;
    if first.success() {
        return Ok(());
    }

    let first_output = format!("{}{}", first.stdout, first.stderr);
    if !first_output.to_lowercase().contains(HOOK_MODIFIED_SIGNAL) {
        return Err(AmendError::Other(first_output));
    }

    let _ = run_git_output(workdir, &["add", "--update"]);
    let second = run_git_output(workdir, &["commit", "--amend", "--no-edit"])
        .map_err(|e| AmendError::Other(e.to_string()))?;
    if second.success() {
        return Ok(());
    }
    Err(AmendError::Hook(format!("{}{}", second.stdout, second.stderr)))
}

/// Hard-reset the working tree and index to a commit.
pub fn reset_hard(workdir: &Path, rev: &str) -> Result<()> {
    run_git(workdir, &["reset", "--hard", rev])
}

/// Move HEAD's ref to a commit, keeping the working tree untouched and
/// refreshing the index.
pub fn reset_mixed(workdir: &Path, rev: &str) -> Result<()> {
    run_git(workdir, &["reset", "--mixed", rev])
}

/// Atomically move a ref, verifying it still points at `expected_old`.
pub fn update_ref(workdir: &Path, refname: &str, new: &str, expected_old: &str) -> Result<()> {
    let output = run_git_output(workdir, &["update-ref", refname, new, expected_old])?;
    if !output.success() {
        bail!(
            "git update-ref {} failed (ref moved underneath us?):\n{}",
            refname,
            output.stderr
        );
    }
    Ok(())
}

#[cfg(unix)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::TestRepo;

    fn install_pre_commit_hook(repo: &TestRepo, script: &str) {
        use std::os::unix::fs::PermissionsExt;

        let hooks_dir = repo.workdir().join(".git").join("hooks");
        std::fs::create_dir_all(&hooks_dir).unwrap();
        let hook = hooks_dir.join("pre-commit");
        std::fs::write(&hook, script).unwrap();
        std::fs::set_permissions(&hook, std::fs::Permissions::from_mode(0o755)).unwrap();
    }

    #[test]
    fn unrelated_hook_failure_is_not_retried() {
        let repo = TestRepo::new_with_remote();
        repo.commit_file("tracked.txt", "content\n", "Add tracked");
        install_pre_commit_hook(
            &repo,
            "#!/bin/sh\necho 'rejected by policy' >&2\nexit 1\n",
        );

        match amend_with_hook_retry(&repo.workdir()) {
            Err(AmendError::Other(detail)) => assert!(detail.contains("rejected by policy")),
            other => panic!("expected non-hook failure, got {:?}", other),
        }
        // the failed amend must not have changed the commit
        assert_eq!(repo.get_message(0), "Add tracked");
    }

    #[test]
    fn hook_that_rewrites_files_triggers_one_retry() {
        let repo = TestRepo::new_with_remote();
        repo.commit_file("tracked.txt", "content\n", "Add tracked");
        // fails once while rewriting the tree, passes on the retry
        install_pre_commit_hook(
            &repo,
            "#!/bin/sh\n\
             if [ ! -f .hook-ran ]; then\n\
               touch .hook-ran\n\
               echo 'formatted' >> tracked.txt\n\
               echo 'files were modified by this hook'\n\
               exit 1\n\
             fi\n\
             exit 0\n",
        );

        assert!(amend_with_hook_retry(&repo.workdir()).is_ok());
        // the hook's rewrite was staged into the amended commit
        assert!(repo.file_at(0, "tracked.txt").contains("formatted"));
    }
}
