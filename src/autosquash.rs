use anyhow::{Result, bail};
use git2::{Oid, Repository};
use slog::{debug, info};

use crate::approval::{ApprovalCollaborator, AutoAccept, Decision, PromptApproval};
use crate::context::Context;
use crate::diff;
use crate::error::Error;
use crate::git::{self, BranchScope, WorkingTreeStatus};
use crate::git_commands::{self, short_hash};
use crate::msg;
use crate::patch::{self, PatchGroup};
use crate::rebase::{self, AbortOnConflict, ConflictHandler, PromptOnConflict};
use crate::resolve::{self, Mapping, MappingSource};
use crate::strategy::{self, ExecutionOutcome};

/// The whole flow: diff → resolve → approve → generate → execute.
pub fn run(ctx: &Context) -> Result<()> {
    let repo = git::open_repo()?;
    let workdir = git::require_workdir(&repo, "autosquash")?.to_path_buf();
    debug!(ctx.logger, "repository found"; "workdir" => workdir.display().to_string());

    check_preconditions(&repo)?;

    let scope = git::branch_scope(&repo)?;
    if !scope.is_feature_branch() {
        return Err(Error::Precondition(format!(
            "no commits between {} and HEAD — nothing to squash into",
            scope.upstream_label
        ))
        .into());
    }
    if scope.contains_merges {
        return Err(Error::Precondition(
            "the branch contains merge commits — flatten it before squashing".to_string(),
        )
        .into());
    }
    debug!(ctx.logger, "branch scope";
           "branch" => &scope.branch_name,
           "commits" => scope.commits.len());

    let diff_text = git_commands::diff_head(&workdir)?;
    if diff_text.trim().is_empty() {
        msg::success("Working tree is clean — nothing to squash");
        return Ok(());
    }

    let mut hunks = diff::parse_diff(&diff_text)?;
    for hunk in &hunks {
        git_commands::validate_repo_path(&workdir, &hunk.path)?;
    }
    if ctx.settings.line_by_line {
        hunks = diff::split_line_by_line(hunks);
    }
    info!(ctx.logger, "parsed diff"; "hunks" => hunks.len());

    let resolution = resolve::resolve_hunks(ctx, &repo, &scope, &hunks)?;
    for (hunk, reason) in &resolution.skipped {
        msg::warn(&format!("{}: skipped ({})", hunk.path, reason));
    }
    if resolution.mappings.is_empty() {
        msg::warn("No hunk could be mapped to a commit on this branch");
        return Ok(());
    }

    let approver: Box<dyn ApprovalCollaborator> = if ctx.settings.auto_accept {
        Box::new(AutoAccept)
    } else {
        Box::new(PromptApproval)
    };
    let decisions = approver.decide(ctx, &repo, &scope, &resolution.mappings)?;

    let (approved, ignored) = apply_decisions(&resolution.mappings, &decisions);
    if approved.is_empty() {
        msg::warn("Nothing approved — working tree left untouched");
        return Ok(());
    }
    if ignored > 0 {
        msg::warn(&format!("{} hunk(s) left in the working tree", ignored));
    }

    let groups = group_patches(&approved);
    let patches = patch::generate_patches(&repo, &groups)?;
    rebase::check_patches(&workdir, &patches)?;

    if ctx.settings.dry_run {
        print_plan(&repo, ctx, &scope, &groups)?;
        return Ok(());
    }

    let handler: Box<dyn ConflictHandler> = if ctx.settings.auto_accept {
        Box::new(AbortOnConflict)
    } else {
        Box::new(PromptOnConflict)
    };
    let outcome = strategy::execute(ctx, &workdir, &scope, &patches, handler.as_ref())?;
    report_outcome(&patches, outcome)
}

/// Refuse to run on repository states that make history rewriting unsafe.
fn check_preconditions(repo: &Repository) -> Result<()> {
    if let Some(operation) = git::operation_in_progress(repo) {
        return Err(Error::Precondition(format!(
            "a {} is in progress — finish or abort it first",
            operation
        ))
        .into());
    }
    match git::working_tree_status(repo)? {
        WorkingTreeStatus::Mixed => Err(Error::Precondition(
            "both staged and unstaged changes present — commit, stash or unstage first".to_string(),
        )
        .into()),
        _ => Ok(()),
    }
}

/// Fold the collaborator's decisions into the mappings.
fn apply_decisions<'a>(
    mappings: &[Mapping<'a>],
    decisions: &[Decision],
) -> (Vec<(Mapping<'a>, Oid)>, usize) {
    let mut approved = Vec::new();
    let mut ignored = 0;
    for (mapping, decision) in mappings.iter().zip(decisions) {
        match decision {
            Decision::Approve => approved.push((mapping.clone(), mapping.target)),
            Decision::Override(target) => {
                let mut overridden = mapping.clone();
                overridden.source = MappingSource::UserOverride;
                approved.push((overridden, *target));
            }
            Decision::Ignore => ignored += 1,
        }
    }
    (approved, ignored)
}

/// Group approved hunks by `(file, target)`, preserving diff order.
fn group_patches<'a>(approved: &[(Mapping<'a>, Oid)]) -> Vec<PatchGroup<'a>> {
    let mut groups: Vec<PatchGroup<'a>> = Vec::new();
    for (mapping, target) in approved {
        let path = &mapping.hunk.path;
        match groups
            .iter_mut()
            .find(|g| g.path == *path && g.target == *target)
        {
            Some(group) => group.hunks.push(mapping.hunk),
            None => groups.push(PatchGroup {
                path: path.clone(),
                target: *target,
                hunks: vec![mapping.hunk],
            }),
        }
    }
    groups
}

fn print_plan(repo: &Repository, ctx: &Context, scope: &BranchScope, groups: &[PatchGroup]) -> Result<()> {
    for group in groups {
        let meta = match scope.meta(group.target) {
            Some(meta) => meta.clone(),
            None => ctx.commit_metadata(repo, group.target)?,
        };
        println!(
            "  {} -> {} \"{}\" ({} hunk(s))",
            group.path,
            meta.short_hash,
            meta.subject,
            group.hunks.len()
        );
    }
    let mut targets: Vec<Oid> = groups.iter().map(|g| g.target).collect();
    targets.sort();
    targets.dedup();
    println!(
        "\nDry run: would squash {} file group(s) into {} commit(s)",
        groups.len(),
        targets.len()
    );
    Ok(())
}

fn report_outcome(patches: &[patch::GeneratedPatch], outcome: ExecutionOutcome) -> Result<()> {
    match outcome {
        ExecutionOutcome::Success {
            skipped_fixups,
            retained_stash,
        } => {
            let targets = strategy::targets_of(patches);
            msg::success(&format!(
                "Squashed {} patch(es) into {} commit(s)",
                patches.len(),
                targets.len()
            ));
            for commit in &skipped_fixups {
                msg::warn(&format!(
                    "fixup {} skipped — its changes remain in the working tree",
                    short_hash(commit)
                ));
            }
            if let Some(stash) = retained_stash {
                msg::warn(&format!(
                    "working tree changes could not be restored cleanly; kept in stash \"{}\"",
                    stash
                ));
            }
            Ok(())
        }
        ExecutionOutcome::Conflict {
            commit,
            files,
            retained_stash,
        } => {
            if let Some(stash) = retained_stash {
                msg::error(&format!("backup kept in stash \"{}\"", stash));
            }
            Err(Error::RebaseConflict { commit, files }.into())
        }
        ExecutionOutcome::Aborted {
            reason,
            retained_stash,
        } => {
            if let Some(stash) = retained_stash {
                msg::error(&format!("backup kept in stash \"{}\"", stash));
            }
            bail!("execution aborted, repository restored: {}", reason)
        }
    }
}

#[cfg(test)]
#[path = "autosquash_test.rs"]
mod tests;
