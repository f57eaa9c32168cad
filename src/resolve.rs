use anyhow::Result;
use git2::{Oid, Repository};
use slog::debug;

use crate::blame::{self, Confidence};
use crate::context::Context;
use crate::diff::{Hunk, HunkKind};
use crate::fallback::{self, FallbackKind};
use crate::git::BranchScope;

/// How a mapping's target was chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MappingSource {
    BlameMatch,
    FallbackRecent,
    FallbackFileHistory,
    FallbackConsistency,
    UserOverride,
    Ignore,
}

/// One proposed `hunk → target commit` assignment, handed to the approval
/// collaborator. Holds a shared reference to the parsed hunk; hunks are
/// never mutated after parsing.
#[derive(Debug, Clone)]
pub struct Mapping<'a> {
    pub hunk: &'a Hunk,
    pub target: Oid,
    pub source: MappingSource,
    pub confidence: Confidence,
    pub needs_user_confirmation: bool,
    /// Remaining fallback candidates, best first, for override prompts.
    pub alternatives: Vec<Oid>,
}

/// The resolver's output: proposed mappings plus everything it had to
/// leave in the working tree, with the reason.
#[derive(Debug, Default)]
pub struct Resolution<'a> {
    pub mappings: Vec<Mapping<'a>>,
    pub skipped: Vec<(&'a Hunk, String)>,
}

/// Map every hunk to a target commit, in file-then-line order.
///
/// Text hunks go through blame first (one pass per file); hunks blame
/// cannot place fall through to the fallback provider. A per-file
/// consistency cache carries the most recent assigned target forward so
/// related hunks in one file land together by default.
pub fn resolve_hunks<'a>(
    ctx: &Context,
    repo: &Repository,
    scope: &BranchScope,
    hunks: &'a [Hunk],
) -> Result<Resolution<'a>> {
    let mut resolution = Resolution::default();

    // group by path, preserving diff order
    let mut files: Vec<(&str, Vec<&'a Hunk>)> = Vec::new();
    for hunk in hunks {
        match files.last_mut() {
            Some((path, group)) if *path == hunk.path => group.push(hunk),
            _ => files.push((&hunk.path, vec![hunk])),
        }
    }

    for (path, group) in files {
        resolve_file(ctx, repo, scope, path, &group, &mut resolution)?;
    }

    Ok(resolution)
}

fn resolve_file<'a>(
    ctx: &Context,
    repo: &Repository,
    scope: &BranchScope,
    path: &str,
    group: &[&'a Hunk],
    resolution: &mut Resolution<'a>,
) -> Result<()> {
    let mut text_hunks = Vec::new();
    let mut file_exists_in_head = true;

    for &hunk in group {
        match hunk.kind {
            HunkKind::Text => text_hunks.push(hunk),
            HunkKind::NewFile => {
                file_exists_in_head = false;
                text_hunks.push(hunk);
            }
            HunkKind::DeletedFile => text_hunks.push(hunk),
            HunkKind::Binary => {
                resolution
                    .skipped
                    .push((hunk, "binary file".to_string()));
            }
            HunkKind::ModeOnly => {
                resolution
                    .skipped
                    .push((hunk, "mode-only change".to_string()));
            }
        }
    }
    if text_hunks.is_empty() {
        return Ok(());
    }

    // one blame pass for all blameable hunks of the file
    let blameable: Vec<&Hunk> = text_hunks
        .iter()
        .copied()
        .filter(|h| h.kind == HunkKind::Text)
        .collect();
    let blame_targets = if file_exists_in_head && !blameable.is_empty() {
        blame::blame_file_hunks(ctx, repo, scope, path, &blameable)?
    } else {
        Vec::new()
    };
    let mut blame_iter = blame_targets.into_iter();

    // most recent assigned target in this file, for consistency reuse
    let mut consistency: Option<Oid> = None;
    let mut consistency_reused = false;

    for &hunk in &text_hunks {
        let blame_target = if hunk.kind == HunkKind::Text && file_exists_in_head {
            blame_iter.next().flatten()
        } else {
            None
        };

        if let Some(target) = blame_target {
            debug!(ctx.logger, "blame target";
                   "path" => path,
                   "line" => hunk.old_start,
                   "commit" => target.commit.to_string(),
                   "confidence" => format!("{:?}", target.confidence));
            resolution.mappings.push(Mapping {
                hunk,
                target: target.commit,
                source: MappingSource::BlameMatch,
                confidence: target.confidence,
                needs_user_confirmation: target.confidence != Confidence::High,
                alternatives: Vec::new(),
            });
            consistency = Some(target.commit);
            continue;
        }

        let offers = fallback::offers_for(
            repo,
            scope,
            path,
            file_exists_in_head && hunk.kind != HunkKind::NewFile,
            consistency,
            consistency_reused,
        )?;
        let Some(best) = offers.first() else {
            resolution
                .skipped
                .push((hunk, "no candidate commit on this branch".to_string()));
            continue;
        };

        let source = match best.kind {
            FallbackKind::Consistency => {
                consistency_reused = true;
                MappingSource::FallbackConsistency
            }
            FallbackKind::FileHistory => MappingSource::FallbackFileHistory,
            FallbackKind::Recent => MappingSource::FallbackRecent,
        };
        debug!(ctx.logger, "fallback target";
               "path" => path,
               "line" => hunk.old_start,
               "commit" => best.commit.to_string(),
               "source" => format!("{:?}", source));
        resolution.mappings.push(Mapping {
            hunk,
            target: best.commit,
            source,
            confidence: best.confidence,
            needs_user_confirmation: true,
            alternatives: offers.iter().skip(1).map(|o| o.commit).collect(),
        });
        consistency = Some(best.commit);
    }

    Ok(())
}

#[cfg(test)]
#[path = "resolve_test.rs"]
mod tests;
