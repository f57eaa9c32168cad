use anyhow::Result;
use git2::{Oid, Repository};

use crate::blame::Confidence;
use crate::git::{self, BranchScope};

/// Number of recent branch commits offered when a file has no usable history.
pub const RECENT_COMMITS: usize = 5;

/// Where a fallback offer came from, in priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackKind {
    /// Reuse of a target already assigned earlier in the same file.
    Consistency,
    /// In-scope commits that last touched the file.
    FileHistory,
    /// Most recent commits on the branch, history-blind.
    Recent,
}

/// A candidate target offered without blame evidence. Always requires
/// user confirmation.
#[derive(Debug, Clone)]
pub struct FallbackOffer {
    pub commit: Oid,
    pub kind: FallbackKind,
    pub confidence: Confidence,
}

/// Offer targets for a hunk blame could not place.
///
/// Selection by context: a consistency target (a commit already assigned to
/// an earlier hunk of this file) wins; otherwise the file's own in-scope
/// history; otherwise the most recent branch commits. `consistency_reused`
/// tracks whether the session already leaned on this consistency target
/// once: confidence drops from Medium to Low after the first reuse.
pub fn offers_for(
    repo: &Repository,
    scope: &BranchScope,
    path: &str,
    file_exists_in_head: bool,
    consistency: Option<Oid>,
    consistency_reused: bool,
) -> Result<Vec<FallbackOffer>> {
    let mut offers = Vec::new();

    if let Some(commit) = consistency {
        offers.push(FallbackOffer {
            commit,
            kind: FallbackKind::Consistency,
            confidence: if consistency_reused {
                Confidence::Low
            } else {
                Confidence::Medium
            },
        });
    }

    if file_exists_in_head {
        for commit in git::commits_touching_file(repo, scope, path)? {
            if offers.iter().any(|o| o.commit == commit) {
                continue;
            }
            offers.push(FallbackOffer {
                commit,
                kind: FallbackKind::FileHistory,
                confidence: Confidence::Low,
            });
        }
    }

    if offers.iter().all(|o| o.kind == FallbackKind::Consistency) {
        // new file, or an existing file nothing in scope ever touched
        for meta in scope.commits.iter().take(RECENT_COMMITS) {
            if offers.iter().any(|o| o.commit == meta.oid) {
                continue;
            }
            offers.push(FallbackOffer {
                commit: meta.oid,
                kind: FallbackKind::Recent,
                confidence: Confidence::Low,
            });
        }
    }

    Ok(offers)
}
