use std::collections::HashMap;
use std::path::Path;

use anyhow::{Result, bail};
use git2::Oid;
use inquire::InquireError;
use slog::debug;

use crate::context::Context;
use crate::error::Error;
use crate::git::BranchScope;
use crate::git_commands::{
    git_apply, git_rebase,
    git_rebase::RebaseOutcome,
    run_git_output_with_env, run_git_stdout, short_hash,
};
use crate::patch::GeneratedPatch;

/// What the user wants to do about a paused, conflicting rebase step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictChoice {
    /// The user resolved the conflict by hand; keep rebasing.
    Continue,
    /// Drop the conflicting entry and keep rebasing.
    Skip,
    /// Give up; the strategy rolls everything back.
    Abort,
}

/// Decides what to do when the rebase stops on a conflict.
pub trait ConflictHandler {
    fn choose(&self, commit: &str, files: &[String]) -> Result<ConflictChoice>;
}

/// Non-interactive runs cannot resolve conflicts: always abort.
pub struct AbortOnConflict;

impl ConflictHandler for AbortOnConflict {
    fn choose(&self, _commit: &str, _files: &[String]) -> Result<ConflictChoice> {
        Ok(ConflictChoice::Abort)
    }
}

/// Ask the user, offering continue / skip / abort.
pub struct PromptOnConflict;

impl ConflictHandler for PromptOnConflict {
    fn choose(&self, commit: &str, files: &[String]) -> Result<ConflictChoice> {
        const CONTINUE: &str = "continue (I resolved the conflicts)";
        const SKIP: &str = "skip this fixup";
        const ABORT: &str = "abort and restore everything";

        let header = format!(
            "Conflict applying fixup at {} ({} file(s): {})",
            short_hash(commit),
            files.len(),
            files.join(", ")
        );
        let options = vec![CONTINUE.to_string(), SKIP.to_string(), ABORT.to_string()];
        let chosen = inquire::Select::new(&header, options).prompt().map_err(|e| match e {
            InquireError::OperationCanceled | InquireError::OperationInterrupted => {
                anyhow::Error::from(Error::Interrupted)
            }
            other => other.into(),
        })?;
        Ok(match chosen.as_str() {
            CONTINUE => ConflictChoice::Continue,
            SKIP => ConflictChoice::Skip,
            _ => ConflictChoice::Abort,
        })
    }
}

/// How a driven rebase ended.
#[derive(Debug)]
pub enum DriveOutcome {
    /// The rebase ran to the end; `skipped` lists fixup commits the user
    /// dropped at conflicts.
    Completed { skipped: Vec<String> },
    /// The user aborted at a conflict; `git rebase --abort` already ran.
    UserAborted { commit: String, files: Vec<String> },
}

/// Build one `fixup!` commit for a target: a commit whose parent is the
/// target itself and whose tree is the target's tree with the generated
/// patches staged on top.
///
/// The tree is assembled in a throwaway index (`read-tree` target, then
/// `apply --cached` each patch), so neither the real index nor the working
/// tree is touched. Because the fixup's parent is the target, its diff is
/// exactly the generated patch and replays cleanly right after the target
/// is picked.
pub fn create_fixup_commit(
    workdir: &Path,
    target: Oid,
    target_subject: &str,
    patches: &[&GeneratedPatch],
) -> Result<String> {
    // the index path must not exist yet: git rejects zero-byte index files
    let index_dir = tempfile::tempdir()?;
    let index_path = index_dir.path().join("index").to_string_lossy().into_owned();
    let envs: [(&str, &str); 1] = [("GIT_INDEX_FILE", &index_path)];

    let target_rev = target.to_string();
    let read_tree = run_git_output_with_env(workdir, &["read-tree", &target_rev], &envs)?;
    if !read_tree.success() {
        bail!("git read-tree {} failed:\n{}", target_rev, read_tree.stderr);
    }

    for patch in patches {
        git_apply::apply_cached_with_index(workdir, &patch.diff, &index_path)?;
    }

    let write_tree = run_git_output_with_env(workdir, &["write-tree"], &envs)?;
    if !write_tree.success() {
        bail!("git write-tree failed:\n{}", write_tree.stderr);
    }
    let tree = write_tree.stdout.trim().to_string();

    let message = format!("fixup! {}", target_subject);
    let commit = run_git_stdout(
        workdir,
        &["commit-tree", &tree, "-p", &target_rev, "-m", &message],
    )?;
    Ok(commit.trim().to_string())
}

/// Serialize the rebase todo: every scope commit picked oldest-first, each
/// immediately followed by the fixup commits targeting it.
pub fn build_todo(scope: &BranchScope, fixups_by_target: &HashMap<Oid, Vec<String>>) -> String {
    let mut out = String::new();
    for meta in scope.commits.iter().rev() {
        out.push_str(&format!("pick {} {}\n", meta.short_hash, meta.subject));
        if let Some(fixups) = fixups_by_target.get(&meta.oid) {
            for fixup in fixups {
                out.push_str(&format!("fixup {}\n", fixup));
            }
        }
    }
    out
}

/// Serialize a todo that pauses with `edit` at one target commit.
pub fn build_todo_with_edit(scope: &BranchScope, edit_target: Oid) -> String {
    let mut out = String::new();
    for meta in scope.commits.iter().rev() {
        let command = if meta.oid == edit_target { "edit" } else { "pick" };
        out.push_str(&format!("{} {} {}\n", command, meta.short_hash, meta.subject));
    }
    out
}

/// Start a todo-driven rebase and see it through, routing every conflict
/// pause to the handler.
pub fn drive(
    ctx: &Context,
    workdir: &Path,
    upstream: &str,
    todo: &str,
    handler: &dyn ConflictHandler,
) -> Result<DriveOutcome> {
    debug!(ctx.logger, "starting rebase"; "upstream" => upstream, "todo" => todo);
    let outcome = git_rebase::run_todo_rebase(workdir, Some(upstream), todo)?;
    drive_from(ctx, workdir, outcome, handler)
}

/// Continue driving an already-started rebase until it completes or the
/// user aborts.
pub fn drive_from(
    ctx: &Context,
    workdir: &Path,
    mut outcome: RebaseOutcome,
    handler: &dyn ConflictHandler,
) -> Result<DriveOutcome> {
    let mut skipped = Vec::new();

    while outcome == RebaseOutcome::Stopped {
        let commit = git_rebase::stopped_commit(workdir).unwrap_or_else(|| "unknown".to_string());
        let files = git_rebase::conflicting_files(workdir).unwrap_or_default();
        debug!(ctx.logger, "rebase stopped"; "commit" => &commit, "files" => files.join(","));

        match handler.choose(&commit, &files)? {
            ConflictChoice::Continue => {
                outcome = git_rebase::continue_rebase(workdir)?;
            }
            ConflictChoice::Skip => {
                skipped.push(commit);
                outcome = git_rebase::skip(workdir)?;
            }
            ConflictChoice::Abort => {
                git_rebase::abort(workdir)?;
                return Ok(DriveOutcome::UserAborted { commit, files });
            }
        }
    }

    Ok(DriveOutcome::Completed { skipped })
}

/// Validate every generated patch against its target tree before anything
/// mutates. A rejection here costs nothing to undo.
pub fn check_patches(workdir: &Path, patches: &[GeneratedPatch]) -> Result<()> {
    for patch in patches {
        let target_rev = patch.target.to_string();
        let output = git_apply::check_against_tree(workdir, &target_rev, &patch.diff)?;
        if !output.success() {
            return Err(Error::PatchReject {
                file: patch.path.clone(),
                target: short_hash(&target_rev).to_string(),
                detail: output.stderr.trim().to_string(),
            }
            .into());
        }
    }
    Ok(())
}

/// Group validated patches by target commit, preserving patch order.
pub fn fixups_for_targets(
    workdir: &Path,
    scope: &BranchScope,
    patches: &[GeneratedPatch],
) -> Result<HashMap<Oid, Vec<String>>> {
    let mut by_target: Vec<(Oid, Vec<&GeneratedPatch>)> = Vec::new();
    for patch in patches {
        match by_target.iter_mut().find(|(target, _)| *target == patch.target) {
            Some((_, group)) => group.push(patch),
            None => by_target.push((patch.target, vec![patch])),
        }
    }

    let mut fixups: HashMap<Oid, Vec<String>> = HashMap::new();
    for (target, group) in by_target {
        let subject = scope
            .meta(target)
            .map(|m| m.subject.clone())
            .unwrap_or_else(|| target.to_string());
        let fixup = create_fixup_commit(workdir, target, &subject, &group)?;
        fixups.entry(target).or_default().push(fixup);
    }
    Ok(fixups)
}

#[cfg(test)]
#[path = "rebase_test.rs"]
mod tests;
