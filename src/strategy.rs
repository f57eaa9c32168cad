use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Result, anyhow};
use git2::Oid;
use slog::{debug, warn};

use crate::context::{Context, StrategyChoice};
use crate::error::Error;
use crate::git::BranchScope;
use crate::git_commands::{
    git_apply, git_commit, git_rebase, git_stash, git_worktree, run_git_stdout,
};
use crate::patch::GeneratedPatch;
use crate::rebase::{self, ConflictHandler, DriveOutcome};

/// The closed set of execution modes. All three share the same contract:
/// on any non-success outcome the working tree, index and HEAD are exactly
/// what they were before execution (modulo the retained backup stash).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Rebase in a detached scratch worktree, fast-forward the branch ref
    /// on success. The main working tree is never touched.
    Worktree,
    /// Stash everything, build fixups through throwaway indexes, rebase in
    /// place, restore the stash.
    Index,
    /// Single-target shortcut: stash, pause the rebase at the target with
    /// `edit`, apply + amend directly, continue, unstash.
    InPlace,
}

/// Pick a strategy from configuration and capability detection.
pub fn select_strategy(choice: StrategyChoice, workdir: &Path, target_count: usize) -> Strategy {
    match choice {
        StrategyChoice::Worktree => Strategy::Worktree,
        StrategyChoice::Index => Strategy::Index,
        StrategyChoice::Auto => {
            if git_worktree::supported(workdir) {
                Strategy::Worktree
            } else if target_count == 1 {
                Strategy::InPlace
            } else {
                Strategy::Index
            }
        }
    }
}

/// How an execution ended. Non-success variants report the backup stash
/// left behind for manual recovery.
#[derive(Debug)]
pub enum ExecutionOutcome {
    Success {
        /// Fixups the user chose to skip at conflicts, by commit hash.
        skipped_fixups: Vec<String>,
        /// Backup stash kept because restoring it did not apply cleanly.
        retained_stash: Option<String>,
    },
    Conflict {
        commit: String,
        files: Vec<String>,
        retained_stash: Option<String>,
    },
    Aborted {
        reason: String,
        retained_stash: Option<String>,
    },
}

/// Everything recorded before the first mutation, enough to put the
/// repository back exactly as it was.
pub struct Backup {
    pub head: String,
    pub branch_ref: String,
    pub stash_name: String,
    pub stash_created: bool,
}

impl Backup {
    /// Record HEAD, the branch ref and a named stash of the working tree
    /// and index. `keep_tree` chooses between `stash create` (tree left
    /// dirty, worktree strategy) and `stash push` (tree reset to HEAD).
    pub fn record(workdir: &Path, scope: &BranchScope, keep_tree: bool) -> Result<Backup> {
        let head = run_git_stdout(workdir, &["rev-parse", "HEAD"])?;
        let branch_ref = format!("refs/heads/{}", scope.branch_name);
        let stash_name = format!(
            "autosquash-backup-{}",
            chrono::Local::now().format("%Y%m%d-%H%M%S")
        );

        let stash_created = if keep_tree {
            git_stash::create_named(workdir, &stash_name)?.is_some()
        } else {
            git_stash::push_named(workdir, &stash_name)?;
            true
        };

        Ok(Backup {
            head,
            branch_ref,
            stash_name,
            stash_created,
        })
    }

    /// Restore HEAD, index and working tree to the recorded state.
    ///
    /// Safe to run any number of times: reset puts the tree at the saved
    /// commit, and the stash entry is applied (never popped) on top.
    pub fn rollback(&self, workdir: &Path) -> Result<()> {
        if git_rebase::in_progress(workdir) {
            let _ = git_rebase::abort(workdir);
        }
        git_commit::reset_hard(workdir, &self.head)?;
        if self.stash_created
            && let Some(stash_ref) = git_stash::find_by_message(workdir, &self.stash_name)?
        {
            git_stash::apply_flat(workdir, &stash_ref)?;
        }
        Ok(())
    }

    /// Drop the backup stash once it is no longer needed.
    fn discard_stash(&self, workdir: &Path) {
        if self.stash_created
            && let Ok(Some(stash_ref)) = git_stash::find_by_message(workdir, &self.stash_name)
        {
            let _ = git_stash::drop(workdir, &stash_ref);
        }
    }

    fn retained(&self) -> Option<String> {
        self.stash_created.then(|| self.stash_name.clone())
    }
}

/// Apply the generated patches to their target commits, atomically.
pub fn execute(
    ctx: &Context,
    workdir: &Path,
    scope: &BranchScope,
    patches: &[GeneratedPatch],
    handler: &dyn ConflictHandler,
) -> Result<ExecutionOutcome> {
    let target_count = {
        let mut targets: Vec<Oid> = patches.iter().map(|p| p.target).collect();
        targets.sort();
        targets.dedup();
        targets.len()
    };
    let strategy = select_strategy(ctx.settings.strategy, workdir, target_count);
    debug!(ctx.logger, "strategy selected"; "strategy" => format!("{:?}", strategy));

    match strategy {
        Strategy::Worktree => execute_worktree(ctx, workdir, scope, patches, handler),
        Strategy::Index => execute_index(ctx, workdir, scope, patches, handler),
        Strategy::InPlace => execute_in_place(ctx, workdir, scope, patches, handler),
    }
}

fn execute_worktree(
    ctx: &Context,
    workdir: &Path,
    scope: &BranchScope,
    patches: &[GeneratedPatch],
    handler: &dyn ConflictHandler,
) -> Result<ExecutionOutcome> {
    let backup = Backup::record(workdir, scope, true)?;
    let scratch = scratch_worktree_path(workdir)?;
    git_worktree::add_detached(workdir, &scratch, "HEAD")?;

    let upstream = scope.merge_base.to_string();
    let result: Result<(DriveOutcome, String)> = (|| {
        let fixups = rebase::fixups_for_targets(workdir, scope, patches)?;
        let todo = rebase::build_todo(scope, &fixups);
        let outcome = rebase::drive(ctx, &scratch, &upstream, &todo, handler)?;
        let new_head = run_git_stdout(&scratch, &["rev-parse", "HEAD"])?;
        Ok((outcome, new_head))
    })();

    // the scratch worktree never outlives the run
    let _ = git_worktree::remove(workdir, &scratch);
    git_worktree::prune(workdir);

    match result {
        Ok((DriveOutcome::Completed { skipped }, new_head)) => {
            let fast_forward = git_commit::update_ref(workdir, &backup.branch_ref, &new_head, &backup.head)
                // files on disk are untouched; only the index must catch up
                .and_then(|()| git_commit::reset_mixed(workdir, &new_head));
            if let Err(e) = fast_forward {
                return Ok(ExecutionOutcome::Aborted {
                    reason: format!("{:#}", e),
                    retained_stash: backup.retained(),
                });
            }
            backup.discard_stash(workdir);
            Ok(ExecutionOutcome::Success {
                skipped_fixups: skipped,
                retained_stash: None,
            })
        }
        Ok((DriveOutcome::UserAborted { commit, files }, _)) => Ok(ExecutionOutcome::Conflict {
            commit,
            files,
            retained_stash: backup.retained(),
        }),
        Err(e) => {
            if is_interrupt(&e) {
                return Err(e);
            }
            Ok(ExecutionOutcome::Aborted {
                reason: format!("{:#}", e),
                retained_stash: backup.retained(),
            })
        }
    }
}

fn execute_index(
    ctx: &Context,
    workdir: &Path,
    scope: &BranchScope,
    patches: &[GeneratedPatch],
    handler: &dyn ConflictHandler,
) -> Result<ExecutionOutcome> {
    let backup = Backup::record(workdir, scope, false)?;

    let upstream = scope.merge_base.to_string();
    let result: Result<DriveOutcome> = (|| {
        let fixups = rebase::fixups_for_targets(workdir, scope, patches)?;
        let todo = rebase::build_todo(scope, &fixups);
        rebase::drive(ctx, workdir, &upstream, &todo, handler)
    })();

    match result {
        Ok(DriveOutcome::Completed { skipped }) => {
            let retained = restore_backup_stash(ctx, workdir, &backup);
            Ok(ExecutionOutcome::Success {
                skipped_fixups: skipped,
                retained_stash: retained,
            })
        }
        Ok(DriveOutcome::UserAborted { commit, files }) => {
            // rebase --abort already restored HEAD; bring the changes back
            if let Err(e) = backup.rollback(workdir) {
                warn!(ctx.logger, "rollback failed"; "err" => format!("{:#}", e));
            }
            Ok(ExecutionOutcome::Conflict {
                commit,
                files,
                retained_stash: backup.retained(),
            })
        }
        Err(e) => {
            if let Err(rb) = backup.rollback(workdir) {
                warn!(ctx.logger, "rollback failed"; "err" => format!("{:#}", rb));
            }
            if is_interrupt(&e) {
                return Err(e);
            }
            Ok(ExecutionOutcome::Aborted {
                reason: format!("{:#}", e),
                retained_stash: backup.retained(),
            })
        }
    }
}

fn execute_in_place(
    ctx: &Context,
    workdir: &Path,
    scope: &BranchScope,
    patches: &[GeneratedPatch],
    handler: &dyn ConflictHandler,
) -> Result<ExecutionOutcome> {
    let target = patches
        .first()
        .map(|p| p.target)
        .ok_or_else(|| anyhow!("no patches to apply"))?;
    let backup = Backup::record(workdir, scope, false)?;

    let result = in_place_apply(ctx, workdir, scope, target, patches, handler);

    match result {
        Ok(DriveOutcome::Completed { skipped }) => {
            let retained = restore_backup_stash(ctx, workdir, &backup);
            Ok(ExecutionOutcome::Success {
                skipped_fixups: skipped,
                retained_stash: retained,
            })
        }
        Ok(DriveOutcome::UserAborted { commit, files }) => {
            if let Err(e) = backup.rollback(workdir) {
                warn!(ctx.logger, "rollback failed"; "err" => format!("{:#}", e));
            }
            Ok(ExecutionOutcome::Conflict {
                commit,
                files,
                retained_stash: backup.retained(),
            })
        }
        Err(e) => {
            if let Err(rb) = backup.rollback(workdir) {
                warn!(ctx.logger, "rollback failed"; "err" => format!("{:#}", rb));
            }
            if is_interrupt(&e) {
                return Err(e);
            }
            Ok(ExecutionOutcome::Aborted {
                reason: format!("{:#}", e),
                retained_stash: backup.retained(),
            })
        }
    }
}

/// Pause the rebase at the target with `edit`, apply the patches there,
/// amend, and let the rebase finish.
fn in_place_apply(
    ctx: &Context,
    workdir: &Path,
    scope: &BranchScope,
    target: Oid,
    patches: &[GeneratedPatch],
    handler: &dyn ConflictHandler,
) -> Result<DriveOutcome> {
    let upstream = scope.merge_base.to_string();
    let todo = rebase::build_todo_with_edit(scope, target);
    let outcome = git_rebase::run_todo_rebase(workdir, Some(&upstream), &todo)?;
    if outcome != git_rebase::RebaseOutcome::Stopped {
        anyhow::bail!("rebase did not pause at the target commit");
    }

    for patch in patches {
        git_apply::apply_patch(workdir, &patch.diff)?;
    }
    let files: Vec<&str> = patches.iter().map(|p| p.path.as_str()).collect();
    git_commit::stage_files(workdir, &files)?;

    match git_commit::amend_with_hook_retry(workdir) {
        Ok(()) => {}
        Err(git_commit::AmendError::Hook(detail)) => {
            return Err(Error::HookFailure {
                commit: target.to_string(),
                detail,
            }
            .into());
        }
        Err(git_commit::AmendError::Other(detail)) => {
            anyhow::bail!("git commit --amend failed:\n{}", detail);
        }
    }

    let outcome = git_rebase::continue_rebase(workdir)?;
    rebase::drive_from(ctx, workdir, outcome, handler)
}

/// A user interrupt keeps its identity through rollback so the caller
/// can exit with the cancellation status.
fn is_interrupt(e: &anyhow::Error) -> bool {
    matches!(e.downcast_ref::<Error>(), Some(Error::Interrupted))
}

/// Bring the stashed working tree changes back after a successful run.
/// Returns the stash name when it has to be kept because the apply did
/// not go cleanly.
fn restore_backup_stash(ctx: &Context, workdir: &Path, backup: &Backup) -> Option<String> {
    if !backup.stash_created {
        return None;
    }
    match git_stash::find_by_message(workdir, &backup.stash_name) {
        Ok(Some(stash_ref)) => match git_stash::apply_flat(workdir, &stash_ref) {
            Ok(()) => {
                let _ = git_stash::drop(workdir, &stash_ref);
                None
            }
            Err(e) => {
                warn!(ctx.logger, "could not restore working tree changes";
                      "stash" => &backup.stash_name, "err" => format!("{:#}", e));
                Some(backup.stash_name.clone())
            }
        },
        _ => None,
    }
}

/// Scratch worktree location inside the git directory, unique per run.
fn scratch_worktree_path(workdir: &Path) -> Result<PathBuf> {
    let git_dir = run_git_stdout(workdir, &["rev-parse", "--absolute-git-dir"])?;
    Ok(Path::new(&git_dir)
        .join("autosquash-worktrees")
        .join(uuid::Uuid::new_v4().to_string()))
}

/// Group approved patches by target for reporting.
pub fn targets_of(patches: &[GeneratedPatch]) -> HashMap<Oid, usize> {
    let mut counts = HashMap::new();
    for patch in patches {
        *counts.entry(patch.target).or_insert(0) += 1;
    }
    counts
}

#[cfg(test)]
#[path = "strategy_test.rs"]
mod tests;
