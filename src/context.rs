use std::cell::RefCell;

use anyhow::Result;
use git2::{Oid, Repository};

use crate::cache::RepoCaches;
use crate::git::{self, CommitMeta};

/// Which execution strategy the user asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyChoice {
    /// Detect worktree capability and pick the best variant.
    Auto,
    /// Force the isolated-worktree strategy.
    Worktree,
    /// Force in-place index manipulation.
    Index,
}

impl StrategyChoice {
    /// Read `GIT_AUTOSQUASH_STRATEGY` from the environment. Unknown values
    /// fall back to auto-detection.
    pub fn from_env() -> Self {
        match std::env::var("GIT_AUTOSQUASH_STRATEGY").as_deref() {
            Ok("worktree") => StrategyChoice::Worktree,
            Ok("index") => StrategyChoice::Index,
            _ => StrategyChoice::Auto,
        }
    }
}

/// Per-invocation settings derived from CLI flags and environment.
#[derive(Debug, Clone, Copy)]
pub struct Settings {
    /// Split hunks into one change per hunk before resolving.
    pub line_by_line: bool,
    /// Skip the approval step; accept only high-confidence blame mappings.
    pub auto_accept: bool,
    /// Resolve and generate patches, but mutate nothing.
    pub dry_run: bool,
    pub strategy: StrategyChoice,
}

/// Everything one invocation threads through the pipeline: settings, the
/// diagnostic logger, and the bounded caches. There is no global state.
pub struct Context {
    pub settings: Settings,
    pub logger: slog::Logger,
    caches: RefCell<RepoCaches>,
}

impl Context {
    pub fn new(settings: Settings, logger: slog::Logger) -> Self {
        Context {
            settings,
            logger,
            caches: RefCell::new(RepoCaches::default()),
        }
    }

    /// Blame several pre-image ranges of one file, LRU-cached per range.
    ///
    /// Ranges already cached are served from memory; the rest go through
    /// [`git::blame_ranges`] in a single pass.
    pub fn blame_ranges(
        &self,
        repo: &Repository,
        path: &str,
        ranges: &[(usize, usize)],
        newest: Oid,
    ) -> Result<Vec<Vec<(usize, Oid)>>> {
        let mut results: Vec<Option<Vec<(usize, Oid)>>> = vec![None; ranges.len()];
        let mut missing = Vec::new();

        {
            let mut caches = self.caches.borrow_mut();
            for (i, &(start, len)) in ranges.iter().enumerate() {
                let key = RepoCaches::blame_key(newest, path, start, len);
                match caches.get_blame(&key) {
                    Some(hit) => results[i] = Some(hit),
                    None => missing.push(i),
                }
            }
        }

        if !missing.is_empty() {
            let wanted: Vec<(usize, usize)> = missing.iter().map(|&i| ranges[i]).collect();
            let fresh = git::blame_ranges(repo, path, &wanted, newest)?;
            let mut caches = self.caches.borrow_mut();
            for (&i, lines) in missing.iter().zip(fresh) {
                let (start, len) = ranges[i];
                caches.put_blame(RepoCaches::blame_key(newest, path, start, len), lines.clone());
                results[i] = Some(lines);
            }
        }

        Ok(results.into_iter().map(|r| r.expect("every range resolved")).collect())
    }

    /// Metadata for an arbitrary commit, LRU-cached by hash.
    pub fn commit_metadata(&self, repo: &Repository, oid: Oid) -> Result<CommitMeta> {
        if let Some(hit) = self.caches.borrow_mut().get_metadata(oid) {
            return Ok(hit);
        }
        let commit = repo.find_commit(oid)?;
        let meta = CommitMeta {
            oid,
            short_hash: commit
                .as_object()
                .short_id()?
                .as_str()
                .unwrap_or("")
                .to_string(),
            subject: commit.summary().unwrap_or("").to_string(),
            author_time: commit.author().when().seconds(),
        };
        self.caches.borrow_mut().put_metadata(meta.clone());
        Ok(meta)
    }
}
