//! Failure taxonomy for git-autosquash.

/// Errors that abort the run, mapped to exit codes in `main`.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A repository-state precondition is not met (not a repo, detached
    /// HEAD, empty branch scope, in-progress rebase/merge, mixed index).
    #[error("precondition: {0}")]
    Precondition(String),

    /// A diff entry names a path that escapes the repository root.
    #[error("unsafe path: {0}")]
    UnsafePath(String),

    /// The patch generator found no unused target line for a change.
    #[error("unplaceable change in {file}: no match for `{line}` at {target}")]
    UnplaceableChange {
        file: String,
        line: String,
        target: String,
    },

    /// `git apply --check` rejected a generated patch.
    #[error("patch rejected for {file} at {target}: {detail}")]
    PatchReject {
        file: String,
        target: String,
        detail: String,
    },

    /// A rebase step stopped on a merge conflict and the user aborted.
    #[error("rebase conflict at {commit}: {files:?}")]
    RebaseConflict { commit: String, files: Vec<String> },

    /// A commit hook modified files and the retried amend failed too.
    #[error("hook failure while amending {commit}: {detail}")]
    HookFailure { commit: String, detail: String },

    /// The user interrupted the run (Ctrl-C or prompt escape).
    #[error("interrupted")]
    Interrupted,
}

impl Error {
    /// The process exit code for this failure.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Interrupted => 130,
            _ => 1,
        }
    }
}
