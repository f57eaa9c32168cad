use anyhow::Result;
use git2::{Oid, Repository};
use inquire::InquireError;

use crate::context::Context;
use crate::error::Error;
use crate::git::BranchScope;
use crate::git_commands::short_hash;
use crate::resolve::Mapping;

/// The user's verdict on one proposed mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Approve,
    Override(Oid),
    Ignore,
}

/// Collects decisions for the proposed mappings. The core behaves the same
/// whether the collaborator is a prompt, a script, or `--auto-accept`.
pub trait ApprovalCollaborator {
    fn decide(
        &self,
        ctx: &Context,
        repo: &Repository,
        scope: &BranchScope,
        mappings: &[Mapping],
    ) -> Result<Vec<Decision>>;
}

/// `--auto-accept`: approve only high-confidence blame mappings and leave
/// everything else in the working tree.
pub struct AutoAccept;

impl ApprovalCollaborator for AutoAccept {
    fn decide(
        &self,
        _ctx: &Context,
        _repo: &Repository,
        _scope: &BranchScope,
        mappings: &[Mapping],
    ) -> Result<Vec<Decision>> {
        Ok(mappings
            .iter()
            .map(|m| {
                if m.needs_user_confirmation {
                    Decision::Ignore
                } else {
                    Decision::Approve
                }
            })
            .collect())
    }
}

/// Interactive approval: one select prompt per mapping that needs
/// confirmation. Esc or Ctrl-C cancels the whole run before any mutation.
pub struct PromptApproval;

impl ApprovalCollaborator for PromptApproval {
    fn decide(
        &self,
        ctx: &Context,
        repo: &Repository,
        scope: &BranchScope,
        mappings: &[Mapping],
    ) -> Result<Vec<Decision>> {
        let mut decisions = Vec::with_capacity(mappings.len());
        for mapping in mappings {
            if !mapping.needs_user_confirmation {
                decisions.push(Decision::Approve);
                continue;
            }
            decisions.push(prompt_one(ctx, repo, scope, mapping)?);
        }
        Ok(decisions)
    }
}

fn prompt_one(
    ctx: &Context,
    repo: &Repository,
    scope: &BranchScope,
    mapping: &Mapping,
) -> Result<Decision> {
    let target_meta = ctx.commit_metadata(repo, mapping.target)?;
    let accept = format!(
        "squash into {} \"{}\"",
        target_meta.short_hash, target_meta.subject
    );
    const OTHER: &str = "pick another commit";
    const IGNORE: &str = "leave in working tree";

    let header = format!(
        "{}:{} ({:?}, {:?})",
        mapping.hunk.path,
        mapping.hunk.old_start,
        mapping.source,
        mapping.confidence
    );
    let options = vec![accept.clone(), OTHER.to_string(), IGNORE.to_string()];

    let chosen = inquire::Select::new(&header, options)
        .prompt()
        .map_err(map_cancel)?;

    if chosen == accept {
        return Ok(Decision::Approve);
    }
    if chosen == IGNORE {
        return Ok(Decision::Ignore);
    }

    // build the override list: remaining offers first, then the rest of
    // the branch scope, newest first
    let mut candidates: Vec<Oid> = mapping.alternatives.clone();
    for meta in &scope.commits {
        if meta.oid != mapping.target && !candidates.contains(&meta.oid) {
            candidates.push(meta.oid);
        }
    }
    if candidates.is_empty() {
        return Ok(Decision::Ignore);
    }

    let labels: Vec<String> = candidates
        .iter()
        .map(|&oid| {
            let oid_str = oid.to_string();
            match scope.meta(oid) {
                Some(meta) => format!("{} \"{}\"", meta.short_hash, meta.subject),
                None => short_hash(&oid_str).to_string(),
            }
        })
        .collect();

    let picked = inquire::Select::new("Squash into:", labels.clone())
        .prompt()
        .map_err(map_cancel)?;
    let index = labels
        .iter()
        .position(|l| *l == picked)
        .expect("selected label exists");
    Ok(Decision::Override(candidates[index]))
}

fn map_cancel(err: InquireError) -> anyhow::Error {
    match err {
        InquireError::OperationCanceled | InquireError::OperationInterrupted => {
            Error::Interrupted.into()
        }
        other => other.into(),
    }
}
