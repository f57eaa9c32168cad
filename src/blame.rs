use std::collections::HashMap;

use anyhow::Result;
use git2::{Oid, Repository};

use crate::context::Context;
use crate::diff::Hunk;
use crate::git::BranchScope;

/// How sure the resolver is about a proposed target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Confidence {
    Low,
    Medium,
    High,
}

/// A commit selected by blame evidence for one hunk.
#[derive(Debug, Clone, Copy)]
pub struct BlameTarget {
    pub commit: Oid,
    pub confidence: Confidence,
}

/// Blame every text hunk of one file and rank the evidence.
///
/// All hunks of the file share a single blame pass over the pre-image
/// (the file as it exists on HEAD), so the subprocess/libgit2 cost stays
/// constant in the number of hunks. Returns one entry per hunk; `None`
/// means blame produced no in-scope candidate and the fallback provider
/// takes over.
pub fn blame_file_hunks(
    ctx: &Context,
    repo: &Repository,
    scope: &BranchScope,
    path: &str,
    hunks: &[&Hunk],
) -> Result<Vec<Option<BlameTarget>>> {
    let head = crate::git::head_oid(repo)?;
    let ranges: Vec<(usize, usize)> = hunks.iter().map(|h| h.blame_range()).collect();
    let blamed = ctx.blame_ranges(repo, path, &ranges, head)?;

    let mut targets = Vec::with_capacity(hunks.len());
    for (hunk, lines) in hunks.iter().zip(&blamed) {
        // keep evidence only for the lines the hunk actually removes;
        // an insertion hunk keeps its single anchor line
        let removed = hunk.removed_positions();
        let evidence: Vec<(usize, Oid)> = if removed.is_empty() {
            lines.clone()
        } else {
            lines
                .iter()
                .copied()
                .filter(|(line, _)| removed.contains(line))
                .collect()
        };
        targets.push(rank_candidates(scope, &evidence));
    }
    Ok(targets)
}

/// Rank the blamed commits of one hunk.
///
/// Out-of-scope commits are dropped before ranking. The winner is the
/// in-scope commit owning the most lines, ties broken by most recent
/// author time.
fn rank_candidates(scope: &BranchScope, lines: &[(usize, Oid)]) -> Option<BlameTarget> {
    let total = lines.len();
    let mut counts: HashMap<Oid, usize> = HashMap::new();
    for &(_, oid) in lines {
        if scope.contains(oid) {
            *counts.entry(oid).or_insert(0) += 1;
        }
    }
    if counts.is_empty() {
        return None;
    }

    let author_time = |oid: Oid| scope.meta(oid).map(|m| m.author_time).unwrap_or(0);
    let (&winner, &winner_count) = counts
        .iter()
        .max_by_key(|&(&oid, &count)| (count, author_time(oid)))?;

    let confidence = if counts.len() == 1 && winner_count == total {
        // every blamed line belongs to this one in-scope commit
        Confidence::High
    } else if winner_count * 2 > total || counts.len() == 1 {
        Confidence::Medium
    } else {
        Confidence::Low
    };

    Some(BlameTarget {
        commit: winner,
        confidence,
    })
}

#[cfg(test)]
#[path = "blame_test.rs"]
mod tests;
